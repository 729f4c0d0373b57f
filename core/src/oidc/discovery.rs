//! OIDC Discovery document fetching
//!
//! Fetches and parses OpenID Connect discovery documents.

use serde::Deserialize;

use super::request::OutboundRequest;
use crate::config::Endpoints;
use crate::error::{AuthError, Result};
use crate::platform::HttpClient;

/// OIDC Discovery document (partial)
#[derive(Debug, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(flatten)]
    pub endpoints: Endpoints,
}

/// Discovery request, when a discovery endpoint is configured
pub fn create_discovery_request(endpoints: &Endpoints) -> Option<OutboundRequest> {
    endpoints
        .discovery_endpoint
        .as_deref()
        .filter(|url| !url.is_empty())
        .map(OutboundRequest::get)
}

/// Fetch the OIDC discovery document
pub async fn fetch_discovery(request: &OutboundRequest, http: &dyn HttpClient) -> Result<DiscoveryDocument> {
    validate_discovery_url(&request.url)?;

    let response = request
        .send(http)
        .await
        .map_err(|e| AuthError::upstream_error(format!("failed to fetch discovery document: {}", e)))?;

    if response.status != 200 {
        return Err(AuthError::upstream_error(format!(
            "failed to fetch discovery document: HTTP {}",
            response.status
        )));
    }

    let doc: DiscoveryDocument = response
        .json()
        .map_err(|e| AuthError::upstream_error(format!("invalid discovery document: {}", e)))?;

    if doc.issuer.is_empty() {
        return Err(AuthError::upstream_error("discovery document has an empty issuer"));
    }

    Ok(doc)
}

/// Validate the discovery URL format (RFC 8414)
fn validate_discovery_url(discovery_url: &str) -> Result<()> {
    let url = url::Url::parse(discovery_url)
        .map_err(|_| AuthError::configuration(format!("invalid discovery URL '{}'", discovery_url)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(AuthError::configuration("discovery URL must use HTTP or HTTPS"));
    }

    if url.query().is_some() {
        return Err(AuthError::configuration("discovery URL must not have query string"));
    }

    if url.fragment().is_some() {
        return Err(AuthError::configuration("discovery URL must not have fragment"));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(AuthError::configuration("discovery URL must not have userinfo"));
    }

    Ok(())
}
