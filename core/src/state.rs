//! OAuth2 `state` parameter
//!
//! Format: `#<ident>#<token>`, where the token is an HS256 JWT over the
//! session id, the state id and the optional action id. The ident prefix lets
//! the listener route a callback to the service that issued it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AuthError, Result};
use crate::key::ServiceKey;

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    sid: u64,
    stid: u64,
    #[serde(default)]
    act: String,
}

/// Decoded authorization response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub code: String,
    pub session_id: u64,
    pub state_id: u64,
    /// Empty when the login had no action attached
    pub action_id: String,
}

/// Build the state parameter for an authorization request
pub fn encode_state(
    key: &ServiceKey,
    ident: &str,
    session_id: u64,
    state_id: u64,
    action_id: Option<&str>,
) -> Result<String> {
    if ident.contains('#') {
        return Err(AuthError::configuration("service name cannot contain '#'"));
    }

    let token = key.sign(&StateClaims {
        sid: session_id,
        stid: state_id,
        act: action_id.unwrap_or_default().to_string(),
    })?;

    Ok(format!("#{}#{}", ident, token))
}

/// Service name embedded in a state parameter
pub fn state_ident(state: &str) -> Option<&str> {
    let rest = state.strip_prefix('#')?;
    let (ident, _) = rest.rsplit_once('#')?;
    Some(ident)
}

fn decode_state(key: &ServiceKey, state: &str) -> Result<StateClaims> {
    let token = state
        .strip_prefix('#')
        .and_then(|rest| rest.rsplit_once('#'))
        .map(|(_, token)| token)
        .ok_or_else(|| AuthError::invalid_state("malformed state"))?;

    key.verify(token)
        .map_err(|e| AuthError::invalid_state(e.to_string()))
}

/// Recognise an authorization response among the request parameters
///
/// Returns `None` when there is no code, or when the state was not issued by
/// this key.
pub fn is_auth_response(key: &ServiceKey, params: &HashMap<String, String>) -> Option<AuthResponse> {
    let code = params.get("code").filter(|c| !c.is_empty())?;
    let state = params.get("state").map(String::as_str).unwrap_or_default();
    if !state.starts_with('#') {
        return None;
    }

    match decode_state(key, state) {
        Ok(claims) => Some(AuthResponse {
            code: code.clone(),
            session_id: claims.sid,
            state_id: claims.stid,
            action_id: claims.act,
        }),
        Err(e) => {
            tracing::warn!("Ignoring authorization response: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: &str) -> HashMap<String, String> {
        let mut params = HashMap::from([("state".to_string(), state.to_string())]);
        if let Some(code) = code {
            params.insert("code".to_string(), code.to_string());
        }
        params
    }

    #[test]
    fn test_state_roundtrip() {
        let key = ServiceKey::generate();
        let state = encode_state(&key, "corp", 42, 3, Some("a1")).unwrap();
        assert!(state.starts_with("#corp#"));
        assert_eq!(state_ident(&state), Some("corp"));

        let response = is_auth_response(&key, &params(Some("xyz"), &state)).unwrap();
        assert_eq!(
            response,
            AuthResponse {
                code: "xyz".into(),
                session_id: 42,
                state_id: 3,
                action_id: "a1".into(),
            }
        );
    }

    #[test]
    fn test_state_without_action() {
        let key = ServiceKey::generate();
        let state = encode_state(&key, "corp", 1, 0, None).unwrap();
        let response = is_auth_response(&key, &params(Some("c"), &state)).unwrap();
        assert_eq!(response.action_id, "");
    }

    #[test]
    fn test_missing_code_or_foreign_state() {
        let key = ServiceKey::generate();
        let state = encode_state(&key, "corp", 1, 0, None).unwrap();

        assert!(is_auth_response(&key, &params(None, &state)).is_none());
        assert!(is_auth_response(&key, &params(Some(""), &state)).is_none());
        assert!(is_auth_response(&key, &params(Some("c"), "plain-state")).is_none());
        assert!(is_auth_response(&key, &params(Some("c"), "#corp#tampered")).is_none());

        let other = ServiceKey::generate();
        assert!(is_auth_response(&other, &params(Some("c"), &state)).is_none());
    }

    #[test]
    fn test_ident_cannot_contain_separator() {
        let key = ServiceKey::generate();
        assert!(encode_state(&key, "a#b", 1, 0, None).is_err());
    }

    #[test]
    fn test_state_ident() {
        assert_eq!(state_ident("#google#abc.def.ghi"), Some("google"));
        assert_eq!(state_ident("google#abc"), None);
        assert_eq!(state_ident("#google"), None);
    }
}
