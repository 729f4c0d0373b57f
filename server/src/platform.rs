//! Native platform implementations
//!
//! Implements core platform traits using native Rust libraries:
//! - Cache: moka in-memory cache with TTL (session storage)
//! - HttpClient: reqwest, configured per identity provider
//! - Clock: std::time::SystemTime
//! - Environment: process environment variables

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oidc_auth_core::config::{OidcConfig, SESSION_TTL_SECS};
use oidc_auth_core::error::{AuthError, Result};
use oidc_auth_core::platform::{Cache, Clock, Environment, HttpClient, HttpResponse};

/// In-memory session cache with TTL
pub struct MokaCache {
    cache: moka::future::Cache<String, Vec<u8>>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_idle(Duration::from_secs(SESSION_TTL_SECS))
                .build(),
        }
    }
}

#[async_trait(?Send)]
impl Cache for MokaCache {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await)
    }

    async fn put_bytes(&self, key: &str, value: &[u8], _ttl_secs: u64) -> Result<()> {
        // Cache-wide idle timeout; every entry is a session
        self.cache.insert(key.to_string(), value.to_vec()).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}

/// reqwest-based HTTP client
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Client honouring the timeout, proxy and certificate verification
    /// settings of a service
    pub fn from_config(config: &OidcConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .danger_accept_invalid_certs(!config.verify);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| AuthError::configuration(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn execute(&self, builder: reqwest::RequestBuilder, method: &str) -> Result<HttpResponse> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::UpstreamTimeout
            } else {
                AuthError::upstream_error(format!("HTTP {} failed: {}", method, e))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::upstream_error(format!("failed to read response: {}", e)))?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

#[async_trait(?Send)]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.execute(builder, "GET").await
    }

    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse> {
        let mut builder = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.execute(builder, "POST").await
    }
}

/// System clock using std::time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Process environment; secrets are injected as environment variables
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get_var(&self, name: &str) -> Result<String> {
        std::env::var(name)
            .map_err(|_| AuthError::internal(format!("environment variable '{}' not set", name)))
    }

    fn get_secret(&self, name: &str) -> Result<String> {
        std::env::var(name)
            .map_err(|_| AuthError::internal(format!("secret '{}' not found in environment", name)))
    }
}
