//! Signed principal cookie

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::key::ServiceKey;
use crate::session::{filter_credentials, subject, Credentials, PERSISTED_CLAIMS};

#[derive(Serialize, Deserialize)]
struct CookieClaims {
    sub: String,
    iat: u64,
}

/// Serialize the subject of `credentials` into a signed cookie value
pub fn to_cookie(key: &ServiceKey, credentials: &Credentials, now_secs: u64) -> Result<String> {
    let kept = filter_credentials(credentials, PERSISTED_CLAIMS);
    let sub = subject(&kept).ok_or_else(|| AuthError::invalid_request("credentials have no subject"))?;

    key.sign(&CookieClaims { sub, iat: now_secs })
}

/// Verify a cookie value and return `(sub, {sub})`
pub fn from_cookie(
    key: &ServiceKey,
    cookie: &str,
    max_age: Option<u64>,
    now_secs: u64,
) -> Result<(String, Credentials)> {
    let claims: CookieClaims = key.verify(cookie)?;

    if let Some(max_age) = max_age {
        if claims.iat.saturating_add(max_age) < now_secs {
            return Err(AuthError::invalid_token("cookie has expired"));
        }
    }

    let credentials = Credentials::from([("sub".to_string(), serde_json::Value::String(claims.sub.clone()))]);
    Ok((claims.sub, credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: u64 = 1_706_900_000;

    fn credentials() -> Credentials {
        Credentials::from([
            ("sub".to_string(), json!("bob")),
            ("access_token".to_string(), json!("secret-token")),
        ])
    }

    #[test]
    fn test_cookie_carries_only_subject() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let key = ServiceKey::generate();
        let cookie = to_cookie(&key, &credentials(), NOW).unwrap();

        let payload = cookie.split('.').nth(1).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(claims, json!({"sub": "bob", "iat": NOW}));

        let (principal, creds) = from_cookie(&key, &cookie, None, NOW + 10_000).unwrap();
        assert_eq!(principal, "bob");
        assert_eq!(creds, Credentials::from([("sub".to_string(), json!("bob"))]));
    }

    #[test]
    fn test_cookie_max_age() {
        let key = ServiceKey::generate();
        let cookie = to_cookie(&key, &credentials(), NOW).unwrap();

        assert!(from_cookie(&key, &cookie, Some(60), NOW + 60).is_ok());
        let err = from_cookie(&key, &cookie, Some(60), NOW + 61).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_cookie_with_extreme_issue_time() {
        let key = ServiceKey::generate();
        let cookie = to_cookie(&key, &credentials(), u64::MAX).unwrap();
        assert!(from_cookie(&key, &cookie, Some(60), NOW).is_ok());
    }

    #[test]
    fn test_cookie_signed_with_other_key_is_rejected() {
        let cookie = to_cookie(&ServiceKey::generate(), &credentials(), NOW).unwrap();
        assert!(from_cookie(&ServiceKey::generate(), &cookie, None, NOW).is_err());
        assert!(from_cookie(&ServiceKey::generate(), "garbage", None, NOW).is_err());
    }

    #[test]
    fn test_cookie_requires_subject() {
        let key = ServiceKey::generate();
        assert!(to_cookie(&key, &Credentials::new(), NOW).is_err());
    }
}
