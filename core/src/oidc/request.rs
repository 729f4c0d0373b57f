//! Outbound requests to the identity provider
//!
//! Requests are built as plain values first, so they can be inspected or
//! turned into browser redirects, and sent through the platform `HttpClient`
//! afterwards.

use url::form_urlencoded;

use crate::error::{AuthError, Result};
use crate::platform::{HttpClient, HttpResponse};

pub(crate) const USER_AGENT: &str = "oidc-auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Request to an identity provider endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    /// Query string parameters
    pub params: Vec<(String, String)>,
    /// Form-encoded body parameters
    pub data: Vec<(String, String)>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, data: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            params: Vec::new(),
            data,
        }
    }

    /// Look up a query or body parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .chain(self.data.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Full URL, query parameters included
    pub fn full_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| AuthError::configuration(format!("invalid endpoint URL '{}': {}", self.url, e)))?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url.into())
    }

    pub fn form_body(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.data.iter())
            .finish()
    }

    /// Send the request, whatever the response status
    pub async fn send(&self, http: &dyn HttpClient) -> Result<HttpResponse> {
        let url = self.full_url()?;
        tracing::trace!("{} {}", self.method.as_str(), url);

        match self.method {
            Method::Get => {
                http.get(&url, &[("Accept", "application/json"), ("User-Agent", USER_AGENT)])
                    .await
            }
            Method::Post => {
                http.post(
                    &url,
                    &[
                        ("Accept", "application/json"),
                        ("Content-Type", "application/x-www-form-urlencoded"),
                        ("User-Agent", USER_AGENT),
                    ],
                    self.form_body().as_bytes(),
                )
                .await
            }
        }
    }
}

/// Build a parameter list from string pairs
pub(crate) fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
