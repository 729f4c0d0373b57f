//! Token endpoint responses

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::platform::HttpResponse;

/// Successful token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Human-readable error of a rejected token request (RFC 6749 §5.2)
pub fn token_error_message(response: &HttpResponse) -> String {
    let text = response.text().unwrap_or_default();

    let is_json = response
        .header("Content-Type")
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return text;
    }

    match response.json::<TokenErrorBody>() {
        Ok(TokenErrorBody {
            error: Some(error),
            error_description,
        }) => match error_description {
            Some(description) if !description.is_empty() => format!("{}: {}", error, description),
            _ => error,
        },
        _ => text,
    }
}
