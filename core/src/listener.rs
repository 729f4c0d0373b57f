//! Callback listener
//!
//! All services share the same redirect URI. The listener finds the service
//! that issued an authorization response from the ident prefix of its state.

use std::collections::{BTreeMap, HashMap};

use crate::error::{AuthError, Result};
use crate::service::Authentication;
use crate::state::state_ident;

#[derive(Default)]
pub struct Listener {
    services: BTreeMap<String, Authentication>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(&mut self, service: Authentication) -> Result<()> {
        let ident = service.ident().to_string();
        if self.services.contains_key(&ident) {
            return Err(AuthError::configuration(format!(
                "service '{}' is already registered",
                ident
            )));
        }

        tracing::debug!(service = %ident, "Service registered");
        self.services.insert(ident, service);
        Ok(())
    }

    pub fn service(&self, ident: &str) -> Option<&Authentication> {
        self.services.get(ident)
    }

    pub fn services(&self) -> impl Iterator<Item = &Authentication> {
        self.services.values()
    }

    /// Service that issued the state of an authorization response
    pub fn route(&self, params: &HashMap<String, String>) -> Option<&Authentication> {
        let ident = params.get("state").and_then(|state| state_ident(state))?;
        self.services.get(ident)
    }

    /// Rotate expired signing keys of every service
    pub async fn before_request(&self) {
        for service in self.services.values() {
            if let Err(e) = service.before_request().await {
                tracing::error!(service = %service.ident(), "Signing keys refresh failed: {}", e);
            }
        }
    }
}
