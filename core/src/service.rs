//! OpenID Connect authentication service
//!
//! One `Authentication` per configured identity provider. It builds the
//! authorization-code flow requests, exchanges codes for tokens, validates
//! the id_token and persists the resulting principal.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Endpoints, OidcConfig};
use crate::cookie;
use crate::error::{AuthError, Result};
use crate::key::ServiceKey;
use crate::oidc::discovery::{create_discovery_request, fetch_discovery};
use crate::oidc::jwks::KeyStore;
use crate::oidc::request::{pairs, OutboundRequest};
use crate::oidc::tokens::{token_error_message, TokenResponse};
use crate::oidc::validate::{validate_id_token, IdTokenValidation};
use crate::platform::{Clock, HttpClient, HttpResponse};
use crate::session::{retrieve_credentials, store_credentials, subject, Credentials, Session};
use crate::state::{self, AuthResponse};

/// Incoming request as seen by the service
pub struct CallbackRequest<'a> {
    /// Query parameters
    pub params: &'a HashMap<String, String>,
    /// URL the provider redirected to, without query; must match the
    /// `redirect_uri` of the authorization request
    pub redirect_url: &'a str,
    /// Value of the principal cookie, if any
    pub cookie: Option<&'a str>,
}

/// Where to send the browser once a login completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLoginRedirect {
    pub session_id: u64,
    pub state_id: u64,
    pub action_id: Option<String>,
}

/// Outcome of principal resolution
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub principal: Option<String>,
    pub credentials: Credentials,
    /// Set when this request completed an authorization-code login
    pub redirect: Option<PostLoginRedirect>,
}

pub struct Authentication {
    ident: String,
    config: OidcConfig,
    endpoints: Endpoints,
    issuer: Option<String>,
    key: ServiceKey,
    keys: KeyStore,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl Authentication {
    pub fn new(
        ident: impl Into<String>,
        config: OidcConfig,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ident = ident.into();
        config.validate()?;

        let key = ServiceKey::from_config(config.key.as_deref())?;
        let endpoints = config.endpoints()?;
        let keys = KeyStore::new(ident.clone(), config.jwks_uri.clone());

        Ok(Self {
            issuer: config.issuer.clone(),
            ident,
            config,
            endpoints,
            key,
            keys,
            http,
            clock,
        })
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    pub fn create_discovery_request(&self) -> Option<OutboundRequest> {
        create_discovery_request(&self.endpoints)
    }

    pub fn create_auth_request(
        &self,
        session_id: u64,
        state_id: u64,
        action_id: Option<&str>,
        redirect_url: &str,
        scopes: &[&str],
        extra: &[(&str, &str)],
    ) -> Result<OutboundRequest> {
        let url = self.endpoint(&self.endpoints.authorization_endpoint, "authorization_endpoint")?;
        let state = state::encode_state(&self.key, &self.ident, session_id, state_id, action_id)?;

        let mut scope: Vec<&str> = vec!["openid"];
        for s in scopes.iter().copied().flat_map(str::split_whitespace) {
            if !scope.contains(&s) {
                scope.push(s);
            }
        }
        let scope = scope.join(" ");

        let mut request = OutboundRequest::get(url);
        request.params = pairs(&[
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", redirect_url),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("state", state.as_str()),
        ]);

        for (name, value) in extra {
            match request.params.iter_mut().find(|(k, _)| k == name) {
                Some(param) => param.1 = value.to_string(),
                None => request.params.push((name.to_string(), value.to_string())),
            }
        }

        Ok(request)
    }

    pub fn create_token_request(&self, redirect_url: &str, code: &str) -> Result<OutboundRequest> {
        let url = self.endpoint(&self.endpoints.token_endpoint, "token_endpoint")?;
        Ok(OutboundRequest::post(
            url,
            pairs(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_url),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ]),
        ))
    }

    pub fn create_refresh_token_request(&self, refresh_token: &str) -> Result<OutboundRequest> {
        let url = self.endpoint(&self.endpoints.token_endpoint, "token_endpoint")?;
        Ok(OutboundRequest::post(
            url,
            pairs(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ]),
        ))
    }

    /// End-session request, when the provider has an end-session endpoint
    pub fn create_end_session_request(&self, refresh_token: &str) -> Option<OutboundRequest> {
        let url = self.endpoints.end_session_endpoint.as_deref().filter(|u| !u.is_empty())?;
        Some(OutboundRequest::post(
            url,
            pairs(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ]),
        ))
    }

    /// Userinfo request, when the provider has a userinfo endpoint
    pub fn create_userinfo_request(&self, access_token: &str) -> Option<OutboundRequest> {
        let url = self.endpoints.userinfo_endpoint.as_deref().filter(|u| !u.is_empty())?;
        Some(OutboundRequest::post(url, pairs(&[("access_token", access_token)])))
    }

    pub async fn send_request(&self, request: &OutboundRequest) -> Result<HttpResponse> {
        request.send(self.http.as_ref()).await
    }

    /// Discover the provider and load its signing keys
    pub async fn start(&mut self) -> Result<()> {
        if let Some(request) = self.create_discovery_request() {
            let doc = fetch_discovery(&request, self.http.as_ref()).await?;
            tracing::info!(service = %self.ident, issuer = %doc.issuer, "Provider discovered");

            self.issuer = Some(doc.issuer);
            self.endpoints = doc.endpoints;
            self.keys.adopt_jwks_uri(doc.jwks_uri);
        }

        self.keys.mark_expired(self.clock.now_secs());

        let missing = self.endpoints.missing_required();
        if !missing.is_empty() {
            tracing::error!(service = %self.ident, "Endpoints without values: {}", missing.join(", "));
        }

        self.keys
            .refresh_if_expired(self.http.as_ref(), self.clock.as_ref())
            .await
    }

    /// Per-request hook: rotate the signing keys when they expired
    pub async fn before_request(&self) -> Result<()> {
        self.keys
            .refresh_if_expired(self.http.as_ref(), self.clock.as_ref())
            .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let request = self.create_refresh_token_request(refresh_token)?;
        let response = self.send_request(&request).await?.error_for_status()?;

        response
            .json()
            .map_err(|e| AuthError::upstream_error(format!("invalid token response: {}", e)))
    }

    pub fn is_auth_response(&self, params: &HashMap<String, String>) -> Option<AuthResponse> {
        state::is_auth_response(&self.key, params)
    }

    pub fn to_cookie(&self, credentials: &Credentials) -> Result<String> {
        cookie::to_cookie(&self.key, credentials, self.clock.now_secs())
    }

    pub fn from_cookie(&self, cookie: &str) -> Result<(String, Credentials)> {
        cookie::from_cookie(&self.key, cookie, self.config.cookie.max_age, self.clock.now_secs())
    }

    /// Exchange an authorization code for validated credentials
    ///
    /// Every failure is logged and yields empty credentials.
    pub async fn request_credentials(&self, redirect_url: &str, code: &str) -> Credentials {
        match self.exchange_code(redirect_url, code).await {
            Ok(credentials) => credentials,
            Err(message) => {
                tracing::error!(service = %self.ident, "{}", message);
                Credentials::new()
            }
        }
    }

    async fn exchange_code(&self, redirect_url: &str, code: &str) -> std::result::Result<Credentials, String> {
        let request = self
            .create_token_request(redirect_url, code)
            .map_err(|e| e.to_string())?;
        let response = self.send_request(&request).await.map_err(|e| e.to_string())?;

        match response.status {
            200 => {}
            400 => return Err(token_error_message(&response)),
            _ => return Err("Authentication error".to_string()),
        }

        let tokens: TokenResponse = response
            .json()
            .map_err(|e| format!("Invalid token response: {}", e))?;
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| "Invalid id_token: missing from token response".to_string())?;

        let keys = self.keys.keys().await;
        let params = IdTokenValidation {
            client_id: &self.config.client_id,
            issuer: self.issuer.as_deref(),
            algorithms: &self.config.algorithms,
            secure: self.config.secure,
            time_skew: self.config.time_skew,
            access_token: tokens.access_token.as_deref(),
        };

        let mut credentials = validate_id_token(id_token, &keys, &params, self.clock.as_ref())
            .map_err(|e| format!("Invalid id_token: {}", e))?;

        if let Some(access_token) = &tokens.access_token {
            credentials.insert("access_token".to_string(), access_token.clone().into());
        }
        if let Some(refresh_token) = &tokens.refresh_token {
            credentials.insert("refresh_token".to_string(), refresh_token.clone().into());
        }

        Ok(credentials)
    }

    /// Resolve the current principal
    ///
    /// An authorization response is exchanged first; otherwise the session,
    /// then the cookie, provide the principal.
    pub async fn get_principal(
        &self,
        request: &CallbackRequest<'_>,
        mut session: Option<&mut Session>,
    ) -> Principal {
        let cookie_activated = self.config.cookie.activated;
        let mut credentials = Credentials::new();
        let mut redirect = None;

        if let Some(auth) = self.is_auth_response(request.params) {
            credentials = self.request_credentials(request.redirect_url, &auth.code).await;
            if !credentials.is_empty() {
                redirect = Some(PostLoginRedirect {
                    session_id: auth.session_id,
                    state_id: auth.state_id,
                    action_id: Some(auth.action_id).filter(|a| !a.is_empty()),
                });
            }
        }

        if credentials.is_empty() {
            let (principal, stored) = retrieve_credentials(session.as_deref(), cookie_activated);
            credentials = stored;
            if principal.is_none() {
                credentials = self.cookie_credentials(request.cookie);
            }
        }

        if !credentials.is_empty() {
            store_credentials(session.as_deref_mut(), &credentials, cookie_activated);
        }

        Principal {
            principal: subject(&credentials),
            credentials,
            redirect,
        }
    }

    fn cookie_credentials(&self, cookie: Option<&str>) -> Credentials {
        if !self.config.cookie.activated {
            return Credentials::new();
        }

        match cookie.map(|c| self.from_cookie(c)) {
            Some(Ok((_, credentials))) => credentials,
            Some(Err(e)) => {
                tracing::debug!(service = %self.ident, "Rejected principal cookie: {}", e);
                Credentials::new()
            }
            None => Credentials::new(),
        }
    }

    /// Authorization URL the browser must be redirected to
    pub fn login(
        &self,
        session_id: u64,
        state_id: u64,
        action_id: Option<&str>,
        redirect_url: &str,
        scopes: &[&str],
    ) -> Result<String> {
        self.create_auth_request(session_id, state_id, action_id, redirect_url, scopes, &[])?
            .full_url()
    }

    /// Disconnect the current user
    ///
    /// With a token, the provider session is ended too; the logout then only
    /// succeeds when the provider answers 204.
    pub async fn logout(&self, token: Option<&str>) -> Result<bool> {
        let mut status = true;

        if let Some(request) = token.and_then(|t| self.create_end_session_request(t)) {
            let response = self.send_request(&request).await?;
            status = status && response.status == 204;
        }

        Ok(status)
    }

    pub async fn user_info(&self, access_token: &str) -> Result<Credentials> {
        let Some(request) = self.create_userinfo_request(access_token) else {
            return Ok(Credentials::new());
        };

        let response = self.send_request(&request).await?;
        if response.status != 200 {
            return Ok(Credentials::new());
        }

        response
            .json()
            .map_err(|e| AuthError::upstream_error(format!("invalid userinfo response: {}", e)))
    }

    fn endpoint<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AuthError::configuration(format!("{} is not configured", name)))
    }
}
