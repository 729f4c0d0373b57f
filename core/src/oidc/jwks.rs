//! JWKS (JSON Web Key Set) handling
//!
//! Fetches the provider signing keys and refreshes them when the
//! `Cache-Control: max-age` of the previous fetch has elapsed.

use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::request::OutboundRequest;
use crate::error::{AuthError, Result};
use crate::platform::{Clock, HttpClient};

#[derive(Deserialize)]
struct RawJwkSet {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// Signing keys fetched from a JWKS document
#[derive(Debug, Clone)]
pub struct FetchedKeys {
    pub keys: Vec<Jwk>,
    /// `max-age` of the response, when the provider sent one
    pub max_age: Option<u64>,
}

/// Fetch JWKS from a URI
pub async fn fetch_jwks(jwks_uri: &str, http: &dyn HttpClient) -> Result<FetchedKeys> {
    let response = OutboundRequest::get(jwks_uri)
        .send(http)
        .await
        .map_err(|e| AuthError::upstream_error(format!("failed to fetch JWKS: {}", e)))?;

    if response.status != 200 {
        return Err(AuthError::upstream_error(format!(
            "failed to fetch JWKS: HTTP {}",
            response.status
        )));
    }

    let raw: RawJwkSet = response
        .json()
        .map_err(|e| AuthError::upstream_error(format!("invalid JWKS: {}", e)))?;

    let mut keys = Vec::with_capacity(raw.keys.len());
    for value in raw.keys {
        match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) => keys.push(jwk),
            Err(e) => tracing::debug!("Skipping unsupported JWK: {}", e),
        }
    }

    Ok(FetchedKeys {
        keys,
        max_age: response.header("Cache-Control").and_then(parse_max_age),
    })
}

/// Extract a numeric `max-age` directive from a Cache-Control header
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("max-age"))
        .and_then(|(_, value)| {
            let value = value.trim();
            if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                value.parse().ok()
            } else {
                None
            }
        })
}

#[derive(Default)]
struct KeyState {
    keys: Vec<Jwk>,
    /// Refresh deadline; `None` means the keys never expire
    expiration: Option<u64>,
}

/// Cached provider signing keys
pub struct KeyStore {
    ident: String,
    jwks_uri: Option<String>,
    state: Mutex<KeyState>,
}

impl KeyStore {
    pub fn new(ident: impl Into<String>, jwks_uri: Option<String>) -> Self {
        Self {
            ident: ident.into(),
            jwks_uri,
            state: Mutex::new(KeyState::default()),
        }
    }

    pub fn jwks_uri(&self) -> Option<&str> {
        self.jwks_uri.as_deref()
    }

    /// Adopt a JWKS URI, unless one is already configured
    pub fn adopt_jwks_uri(&mut self, jwks_uri: Option<String>) {
        if self.jwks_uri.is_none() {
            self.jwks_uri = jwks_uri.filter(|uri| !uri.is_empty());
        }
    }

    /// Force a fetch on the next refresh
    pub fn mark_expired(&mut self, now_secs: u64) {
        self.state.get_mut().expiration = Some(now_secs.saturating_sub(1));
    }

    pub async fn expiration(&self) -> Option<u64> {
        self.state.lock().await.expiration
    }

    /// Snapshot of the current keys
    pub async fn keys(&self) -> Vec<Jwk> {
        self.state.lock().await.keys.clone()
    }

    /// Refetch the keys when they have expired
    ///
    /// Concurrent callers wait for the first refresh and then see the new
    /// expiration, so the document is fetched once.
    pub async fn refresh_if_expired(&self, http: &dyn HttpClient, clock: &dyn Clock) -> Result<()> {
        let Some(jwks_uri) = self.jwks_uri.as_deref() else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        match state.expiration {
            Some(expiration) if clock.now_secs() > expiration => {}
            _ => return Ok(()),
        }

        let fetched = fetch_jwks(jwks_uri, http).await?;

        let old_ids = sorted_key_ids(&state.keys);
        let new_ids = sorted_key_ids(&fetched.keys);
        if old_ids != new_ids {
            tracing::debug!(
                service = %self.ident,
                "New signing keys fetched: {:?} -> {:?}",
                old_ids,
                new_ids
            );
        } else {
            tracing::debug!(service = %self.ident, "Same signing keys fetched: {:?}", old_ids);
        }
        state.keys = fetched.keys;

        match fetched.max_age {
            Some(max_age) => {
                tracing::debug!(service = %self.ident, "Signing keys max age: {}", max_age);
                state.expiration = Some(clock.now_secs().saturating_add(max_age));
            }
            None => {
                tracing::debug!(service = %self.ident, "No expiration date for signing keys");
                state.expiration = None;
            }
        }

        Ok(())
    }
}

fn sorted_key_ids(keys: &[Jwk]) -> Vec<String> {
    let mut ids: Vec<String> = keys
        .iter()
        .map(|k| k.common.key_id.clone().unwrap_or_default())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{json_response, MockClock, MockHttp};
    use serde_json::json;

    const NOW: u64 = 1_706_900_000;

    fn jwks_body(kids: &[&str]) -> serde_json::Value {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({"kty": "oct", "kid": kid, "alg": "HS256", "k": "c2VjcmV0"}))
            .collect();
        json!({ "keys": keys })
    }

    fn store() -> KeyStore {
        let mut store = KeyStore::new("test", Some("https://idp.example.com/certs".into()));
        store.mark_expired(NOW);
        store
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("public, max-age=3600"), Some(3600));
        assert_eq!(parse_max_age("max-age = 60 , must-revalidate"), Some(60));
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=soon"), None);
        assert_eq!(parse_max_age("max-age=-1"), None);
        assert_eq!(parse_max_age(""), None);
    }

    #[test]
    fn test_adopt_jwks_uri_keeps_configured_value() {
        let mut configured = KeyStore::new("test", Some("https://configured/certs".into()));
        configured.adopt_jwks_uri(Some("https://discovered/certs".into()));
        assert_eq!(configured.jwks_uri(), Some("https://configured/certs"));

        let mut empty = KeyStore::new("test", None);
        empty.adopt_jwks_uri(Some("https://discovered/certs".into()));
        assert_eq!(empty.jwks_uri(), Some("https://discovered/certs"));
    }

    #[tokio::test]
    async fn test_refresh_with_max_age() {
        let http = MockHttp::new(vec![(
            "certs".into(),
            json_response(200, jwks_body(&["k1", "k2"]), &[("Cache-Control", "public, max-age=300")]),
        )]);
        let clock = MockClock::at(NOW);
        let store = store();

        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(store.keys().await.len(), 2);
        assert_eq!(store.expiration().await, Some(NOW + 300));

        // Not expired yet: no new fetch
        clock.advance(300);
        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(http.requests().len(), 1);

        // Expired: rotation picks up the new key set
        clock.advance(1);
        http.push(
            "certs",
            json_response(200, jwks_body(&["k3"]), &[("Cache-Control", "max-age=300")]),
        );
        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(http.requests().len(), 2);
        let keys = store.keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].common.key_id.as_deref(), Some("k3"));
    }

    #[tokio::test]
    async fn test_huge_max_age_saturates() {
        let http = MockHttp::new(vec![(
            "certs".into(),
            json_response(200, jwks_body(&["k1"]), &[("Cache-Control", "max-age=18446744073709551615")]),
        )]);
        let clock = MockClock::at(NOW);
        let store = store();

        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(store.expiration().await, Some(u64::MAX));

        clock.advance(1_000_000);
        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_fetch_once() {
        let http = MockHttp::new(vec![(
            "certs".into(),
            json_response(200, jwks_body(&["k1"]), &[("Cache-Control", "max-age=300")]),
        )]);
        let clock = MockClock::at(NOW);
        let store = store();

        let (first, second) = tokio::join!(
            store.refresh_if_expired(&http, &clock),
            store.refresh_if_expired(&http, &clock)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(http.requests().len(), 1);
        assert_eq!(store.expiration().await, Some(NOW + 300));
    }

    #[tokio::test]
    async fn test_refresh_without_max_age_never_expires() {
        let http = MockHttp::new(vec![("certs".into(), json_response(200, jwks_body(&["k1"]), &[]))]);
        let clock = MockClock::at(NOW);
        let store = store();

        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(store.expiration().await, None);

        clock.advance(1_000_000);
        store.refresh_if_expired(&http, &clock).await.unwrap();
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_refresh_without_uri_or_expiration() {
        let http = MockHttp::new(vec![]);
        let clock = MockClock::at(NOW);

        let mut no_uri = KeyStore::new("test", None);
        no_uri.mark_expired(NOW);
        no_uri.refresh_if_expired(&http, &clock).await.unwrap();

        let never_started = KeyStore::new("test", Some("https://idp/certs".into()));
        never_started.refresh_if_expired(&http, &clock).await.unwrap();

        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_expiration() {
        let http = MockHttp::new(vec![("certs".into(), json_response(500, json!({}), &[]))]);
        let clock = MockClock::at(NOW);
        let store = store();

        assert!(store.refresh_if_expired(&http, &clock).await.is_err());
        assert_eq!(store.expiration().await, Some(NOW - 1));
    }

    #[tokio::test]
    async fn test_unsupported_keys_are_skipped() {
        let http = MockHttp::new(vec![(
            "certs".into(),
            json_response(
                200,
                json!({"keys": [
                    {"kty": "oct", "kid": "good", "k": "c2VjcmV0"},
                    {"kty": "unknown", "kid": "bad"}
                ]}),
                &[],
            ),
        )]);

        let fetched = fetch_jwks("https://idp/certs", &http).await.unwrap();
        assert_eq!(fetched.keys.len(), 1);
        assert_eq!(fetched.keys[0].common.key_id.as_deref(), Some("good"));
    }
}
