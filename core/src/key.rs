//! Service signing key
//!
//! HS256 key shared by the state parameter and the session cookie. Configured
//! as base64url, or generated at startup when absent.

use base64::{engine::general_purpose::URL_SAFE, engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AuthError, Result};

const GENERATED_KEY_LEN: usize = 32;

pub struct ServiceKey {
    bytes: Vec<u8>,
}

impl ServiceKey {
    /// Decode a configured key, or generate a random one
    pub fn from_config(key: Option<&str>) -> Result<Self> {
        match key {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = URL_SAFE
                    .decode(encoded)
                    .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
                    .map_err(|e| AuthError::configuration(format!("invalid key encoding: {}", e)))?;
                if bytes.is_empty() {
                    return Err(AuthError::configuration("key cannot be empty"));
                }
                Ok(Self { bytes })
            }
            _ => Ok(Self::generate()),
        }
    }

    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Base64url form, suitable for the `key` configuration entry
    pub fn encoded(&self) -> String {
        URL_SAFE.encode(&self.bytes)
    }

    /// Sign claims as an HS256 JWT
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.bytes),
        )
        .map_err(|e| AuthError::internal(format!("failed to sign token: {}", e)))
    }

    /// Verify an HS256 JWT; time-based claims are left to the caller
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);

        decode::<T>(token, &DecodingKey::from_secret(&self.bytes), &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::invalid_token(format!("signature verification failed: {}", e)))
    }
}
