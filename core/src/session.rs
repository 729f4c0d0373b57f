//! Credential persistence in the server-side session

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SESSION_TTL_SECS;
use crate::error::Result;
use crate::platform::{cache_get, cache_put, Cache};

/// Claims and tokens known about the current user
pub type Credentials = HashMap<String, serde_json::Value>;

/// Keys kept when credentials are persisted
pub const PERSISTED_CLAIMS: &[&str] = &["sub"];

/// Server-side session state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub credentials: Credentials,
    /// Last state identifier handed out for this session
    #[serde(default)]
    pub state_id: u64,
}

impl Session {
    /// Allocate the next state identifier
    pub fn next_state_id(&mut self) -> u64 {
        self.state_id += 1;
        self.state_id
    }
}

/// Keep only the listed keys
pub fn filter_credentials(credentials: &Credentials, keep: &[&str]) -> Credentials {
    credentials
        .iter()
        .filter(|(k, _)| keep.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The `sub` claim, when it is a string
pub fn subject(credentials: &Credentials) -> Option<String> {
    credentials
        .get("sub")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Credentials previously stored in the session
///
/// Nothing is read when the cookie carries the principal instead.
pub fn retrieve_credentials(
    session: Option<&Session>,
    cookie_activated: bool,
) -> (Option<String>, Credentials) {
    match session {
        Some(session) if !cookie_activated => {
            (subject(&session.credentials), session.credentials.clone())
        }
        _ => (None, Credentials::new()),
    }
}

/// Persist the subject in the session when the cookie mode is off
pub fn store_credentials(session: Option<&mut Session>, credentials: &Credentials, cookie_activated: bool) {
    if let Some(session) = session {
        if !cookie_activated {
            session.credentials = filter_credentials(credentials, PERSISTED_CLAIMS);
        }
    }
}

fn session_key(session_id: u64) -> String {
    format!("session:{}", session_id)
}

pub async fn load_session(cache: &dyn Cache, session_id: u64) -> Result<Option<Session>> {
    cache_get(cache, &session_key(session_id)).await
}

pub async fn save_session(cache: &dyn Cache, session_id: u64, session: &Session) -> Result<()> {
    cache_put(cache, &session_key(session_id), session, SESSION_TTL_SECS).await
}

pub async fn delete_session(cache: &dyn Cache, session_id: u64) -> Result<()> {
    cache.remove(&session_key(session_id)).await
}
