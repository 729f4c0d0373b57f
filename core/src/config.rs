//! Configuration and secrets management
//!
//! Services are declared in YAML, one entry per identity provider. Endpoint
//! values are templates expanded against the provider's connection settings
//! (`{scheme}`, `{host}`, `{port}`, `{base_url}`, `{realm}`, `{tenant}`).

use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::error::{AuthError, Result};
use crate::platform::Environment;

/// Session lifetime in the session cache (1 hour)
pub const SESSION_TTL_SECS: u64 = 3600;

/// Default outbound request timeout, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

const WELL_KNOWN: &str = "/.well-known/openid-configuration";

/// Identity provider preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Endpoints are configured explicitly, no discovery
    #[default]
    Generic,
    /// Discovery document at `{base_url}/.well-known/openid-configuration`
    Discovery,
    Keycloak,
    Google,
    Azure,
}

impl ProviderKind {
    fn default_host(self) -> &'static str {
        match self {
            Self::Google => "accounts.google.com",
            Self::Azure => "login.microsoftonline.com",
            _ => "localhost",
        }
    }

    fn default_discovery_endpoint(self) -> Option<String> {
        match self {
            Self::Generic => None,
            Self::Discovery | Self::Google => Some(format!("{{base_url}}{}", WELL_KNOWN)),
            Self::Keycloak => Some(format!("{{base_url}}/auth/realms/{{realm}}{}", WELL_KNOWN)),
            Self::Azure => Some(format!("{{base_url}}/{{tenant}}/v2.0{}", WELL_KNOWN)),
        }
    }
}

/// Session cookie settings
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Persist the principal in a signed cookie instead of the session
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Maximum cookie age in seconds
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub httponly: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            activated: false,
            encrypt: false,
            name: default_cookie_name(),
            max_age: None,
            secure: true,
            httponly: true,
        }
    }
}

/// Configuration of one OpenID Connect relying-party service
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Server hostname (provider default when absent)
    #[serde(default)]
    pub host: Option<String>,
    /// Server port (443 with ssl, 80 without, when absent)
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub ssl: bool,
    /// HTTP/S proxy to use
    #[serde(default)]
    pub proxy: Option<String>,
    /// SSL certificate verification
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Communication timeout, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// JWT signature verification
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Accepted signing algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
    /// Base64url cookie/state signing key (random when absent)
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Acceptable clock skew with the issuer, in seconds
    #[serde(default)]
    pub time_skew: u64,
    #[serde(default)]
    pub cookie: CookieConfig,
    /// Keycloak realm
    #[serde(default)]
    pub realm: Option<String>,
    /// Azure tenant
    #[serde(default)]
    pub tenant: Option<String>,

    #[serde(default)]
    pub discovery_endpoint: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Resolved endpoint URLs of an identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub discovery_endpoint: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl Endpoints {
    /// Names of required endpoints without a value
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.authorization_endpoint) {
            missing.push("authorization_endpoint");
        }
        if is_blank(&self.token_endpoint) {
            missing.push("token_endpoint");
        }
        missing
    }
}

impl OidcConfig {
    /// Minimal configuration for a client identifier, all other settings defaulted
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Generic,
            host: None,
            port: None,
            ssl: true,
            proxy: None,
            verify: true,
            timeout: DEFAULT_TIMEOUT_SECS,
            client_id: client_id.into(),
            client_secret: String::new(),
            secure: true,
            algorithms: default_algorithms(),
            key: None,
            jwks_uri: None,
            issuer: None,
            time_skew: 0,
            cookie: CookieConfig::default(),
            realm: None,
            tenant: None,
            discovery_endpoint: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            end_session_endpoint: None,
        }
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("client_id cannot be empty"));
        }
        if self.cookie.encrypt {
            return Err(AuthError::configuration("encrypted cookies are not supported"));
        }
        if self.provider == ProviderKind::Keycloak && is_blank(&self.realm) {
            return Err(AuthError::configuration("keycloak provider requires a realm"));
        }
        if self.algorithms.is_empty() && self.secure {
            return Err(AuthError::configuration("at least one algorithm must be accepted"));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or_else(|| self.provider.default_host())
    }

    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) if port != 0 => port,
            _ if self.ssl => 443,
            _ => 80,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.ssl {
            "https"
        } else {
            "http"
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host(), self.port())
    }

    /// Expand the endpoint templates into URLs
    pub fn endpoints(&self) -> Result<Endpoints> {
        let mut params = HashMap::new();
        params.insert("scheme", self.scheme().to_string());
        params.insert("host", self.host().to_string());
        params.insert("port", self.port().to_string());
        params.insert("base_url", self.base_url());
        params.insert(
            "tenant",
            self.tenant.clone().unwrap_or_else(|| "common".to_string()),
        );
        if let Some(realm) = &self.realm {
            params.insert("realm", realm.clone());
        }

        let discovery = self
            .discovery_endpoint
            .clone()
            .or_else(|| self.provider.default_discovery_endpoint());

        let expand = |template: &Option<String>| -> Result<Option<String>> {
            match template {
                Some(t) if !t.is_empty() => expand_template(t, &params).map(Some),
                _ => Ok(None),
            }
        };

        Ok(Endpoints {
            discovery_endpoint: expand(&discovery)?,
            authorization_endpoint: expand(&self.authorization_endpoint)?,
            token_endpoint: expand(&self.token_endpoint)?,
            userinfo_endpoint: expand(&self.userinfo_endpoint)?,
            end_session_endpoint: expand(&self.end_session_endpoint)?,
        })
    }

    /// Fill an empty client secret from the `<NAME>_CLIENT_SECRET` secret
    pub fn resolve_secrets(&mut self, name: &str, env: &dyn Environment) {
        if self.client_secret.is_empty() {
            let secret_name = format!("{}_CLIENT_SECRET", name.to_uppercase().replace('-', "_"));
            if let Ok(secret) = env.get_secret(&secret_name) {
                self.client_secret = secret;
            }
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used to build redirect URIs
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub services: BTreeMap<String, OidcConfig>,
}

impl ServicesConfig {
    /// Parse and validate a YAML configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ServicesConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AuthError::configuration(format!("invalid configuration YAML: {}", e)))?;

        if config.services.is_empty() {
            return Err(AuthError::configuration("no services configured"));
        }
        for (name, service) in &config.services {
            service
                .validate()
                .map_err(|e| AuthError::configuration(format!("service '{}': {}", name, e)))?;
        }

        Ok(config)
    }

    /// Resolve client secrets of every service from the environment
    pub fn resolve_secrets(&mut self, env: &dyn Environment) {
        for (name, service) in self.services.iter_mut() {
            service.resolve_secrets(name, env);
        }
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Substitute `{name}` placeholders, rejecting unknown names
fn expand_template(template: &str, params: &HashMap<&str, String>) -> Result<String> {
    if let Some(unknown) = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| !params.contains_key(name.as_str()))
    {
        return Err(AuthError::configuration(format!(
            "unknown placeholder '{{{}}}' in endpoint '{}'",
            unknown, template
        )));
    }

    Ok(PLACEHOLDER_RE
        .replace_all(template, |c: &regex::Captures| {
            params.get(&c[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cookie_name() -> String {
    "oidc-auth".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Every JWS algorithm the verifier supports
pub fn default_algorithms() -> Vec<Algorithm> {
    vec![
        Algorithm::HS256,
        Algorithm::HS384,
        Algorithm::HS512,
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::PS256,
        Algorithm::PS384,
        Algorithm::PS512,
        Algorithm::ES256,
        Algorithm::ES384,
        Algorithm::EdDSA,
    ]
}
