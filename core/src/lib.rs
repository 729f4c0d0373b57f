//! oidc-auth-core: Platform-agnostic OpenID Connect security service
//!
//! This crate implements an OpenID Connect relying party using the
//! authorization-code flow: provider discovery, signing key rotation, id_token
//! validation, and principal persistence in a session or a signed cookie. It
//! depends only on abstract platform traits (Cache, HttpClient, Clock,
//! Environment) and never imports platform-specific code.

pub mod config;
pub mod cookie;
pub mod error;
pub mod key;
pub mod listener;
pub mod oidc;
pub mod platform;
pub mod service;
pub mod session;
pub mod state;

pub use listener::Listener;
pub use service::{Authentication, CallbackRequest, PostLoginRedirect, Principal};

#[cfg(test)]
pub mod test_support;
