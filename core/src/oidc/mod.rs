//! OIDC (OpenID Connect) module
//!
//! Discovery, JWKS fetching, outbound requests and id_token validation.

pub mod discovery;
pub mod jwks;
pub mod request;
pub mod tokens;
pub mod validate;

pub use discovery::{create_discovery_request, fetch_discovery, DiscoveryDocument};
pub use jwks::KeyStore;
pub use request::{Method, OutboundRequest};
pub use tokens::TokenResponse;
pub use validate::{validate_id_token, IdTokenClaims, IdTokenValidation};
