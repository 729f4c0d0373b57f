//! Platform abstraction traits
//!
//! These traits define the boundary between the platform-agnostic relying
//! party logic and the runtime that hosts it (HTTP stack, clock, secrets,
//! session storage).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AuthError, Result};

/// Key-value cache with TTL support (uses raw bytes to be dyn-compatible)
#[async_trait(?Send)]
pub trait Cache {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put_bytes(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// HTTP client for outbound requests to the identity provider
#[async_trait(?Send)]
pub trait HttpClient {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;
    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse>;
}

/// HTTP response from an outbound request
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse body as UTF-8 string
    pub fn text(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }

    /// Parse body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Turn a non-2xx status into an upstream error
    pub fn error_for_status(self) -> Result<Self> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(AuthError::upstream_error(format!("HTTP {}", self.status)))
        }
    }
}

/// Clock for current time (enables testing with deterministic timestamps)
pub trait Clock {
    fn now_secs(&self) -> u64;
}

/// Environment/secrets access
pub trait Environment {
    fn get_var(&self, name: &str) -> Result<String>;
    fn get_secret(&self, name: &str) -> Result<String>;
}

/// Typed cache get: deserialize from bytes
pub async fn cache_get<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<Option<T>> {
    match cache.get_bytes(key).await? {
        Some(bytes) => {
            let value: T = serde_json::from_slice(&bytes)
                .map_err(|e| AuthError::internal(format!("cache deserialization error: {}", e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Typed cache put: serialize to bytes
pub async fn cache_put<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl_secs: u64,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| AuthError::internal(format!("cache serialization error: {}", e)))?;
    cache.put_bytes(key, &bytes, ttl_secs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: br#"{"a":1}"#.to_vec(),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let r = response(200);
        assert_eq!(r.header("content-type"), Some("application/json"));
        assert_eq!(r.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(r.header("cache-control"), None);
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(204).error_for_status().is_ok());
        let err = response(503).error_for_status().err().unwrap();
        assert!(err.to_string().contains("HTTP 503"));
    }
}
