//! id_token validation
//!
//! Verifies the signature against the provider keys, then checks audience,
//! issuer, time-based claims and the access token hash.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::HashMap;

use crate::error::{AuthError, Result};
use crate::platform::Clock;
use crate::session::Credentials;

/// Registered id_token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,

    pub sub: String,

    /// Audience (can be string or array)
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    pub exp: u64,

    #[serde(default)]
    pub iat: Option<u64>,

    #[serde(default)]
    pub nbf: Option<u64>,

    #[serde(default)]
    pub at_hash: Option<String>,

    #[serde(flatten)]
    pub custom_claims: HashMap<String, serde_json::Value>,
}

/// Deserialize audience as either string or array
fn deserialize_audience<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(AudienceVisitor)
}

/// What an id_token is checked against
pub struct IdTokenValidation<'a> {
    pub client_id: &'a str,
    /// Expected issuer; not checked when unknown
    pub issuer: Option<&'a str>,
    pub algorithms: &'a [Algorithm],
    /// Signature verification
    pub secure: bool,
    /// Leeway for time-based claims, in seconds
    pub time_skew: u64,
    /// Access token issued along the id_token, checked against `at_hash`
    pub access_token: Option<&'a str>,
}

/// Validate an id_token and return its claims as credentials
pub fn validate_id_token(
    token: &str,
    keys: &[Jwk],
    params: &IdTokenValidation<'_>,
    clock: &dyn Clock,
) -> Result<Credentials> {
    let header = decode_header(token)
        .map_err(|e| AuthError::invalid_token(format!("invalid JWT header: {}", e)))?;

    if params.secure && !params.algorithms.contains(&header.alg) {
        return Err(AuthError::token_verification_failed(format!(
            "algorithm {:?} is not accepted",
            header.alg
        )));
    }

    // Time-based claims are checked below against the platform clock
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_required_spec_claims(&["exp", "aud", "sub"]);
    validation.set_audience(&[params.client_id]);
    if let Some(issuer) = params.issuer {
        validation.set_issuer(&[issuer]);
    }

    let raw = if params.secure {
        decode_with_keys(token, &header, keys, &validation)?
    } else {
        validation.insecure_disable_signature_validation();
        decode::<serde_json::Map<String, serde_json::Value>>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| AuthError::token_verification_failed(e.to_string()))?
            .claims
    };

    let claims: IdTokenClaims = serde_json::from_value(serde_json::Value::Object(raw.clone()))
        .map_err(|e| AuthError::invalid_token(format!("invalid id_token claims: {}", e)))?;

    validate_subject(&claims.sub)?;
    validate_times(&claims, params.time_skew, clock.now_secs())?;

    if let Some(at_hash) = &claims.at_hash {
        let access_token = params.access_token.ok_or_else(|| {
            AuthError::token_verification_failed("no access_token provided to compare against at_hash")
        })?;
        if &access_token_hash(access_token, header.alg) != at_hash {
            return Err(AuthError::token_verification_failed(
                "at_hash does not match the access_token",
            ));
        }
    }

    Ok(raw.into_iter().collect())
}

/// Try the key named by `kid`, or every key when there is no such key
fn decode_with_keys(
    token: &str,
    header: &Header,
    keys: &[Jwk],
    validation: &Validation,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let by_kid: Vec<&Jwk> = match header.kid.as_deref() {
        Some(kid) => keys
            .iter()
            .filter(|k| k.common.key_id.as_deref() == Some(kid))
            .collect(),
        None => Vec::new(),
    };
    let candidates: Vec<&Jwk> = if by_kid.is_empty() {
        keys.iter().collect()
    } else {
        by_kid
    };

    if candidates.is_empty() {
        return Err(AuthError::token_verification_failed("no signing key available"));
    }

    let mut last_error = None;
    for jwk in candidates {
        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        match decode::<serde_json::Map<String, serde_json::Value>>(token, &key, validation) {
            Ok(data) => return Ok(data.claims),
            Err(e) if is_key_mismatch(e.kind()) => last_error = Some(e),
            Err(e) => return Err(AuthError::token_verification_failed(e.to_string())),
        }
    }

    Err(AuthError::token_verification_failed(
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "signature verification failed".to_string()),
    ))
}

/// Errors after which another key may still verify the token
fn is_key_mismatch(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
    )
}

fn validate_times(claims: &IdTokenClaims, skew: u64, now_secs: u64) -> Result<()> {
    if now_secs > claims.exp.saturating_add(skew) {
        return Err(AuthError::token_verification_failed("token has expired"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now_secs.saturating_add(skew) {
            return Err(AuthError::token_verification_failed("token is not yet valid (nbf claim)"));
        }
    }

    if let Some(iat) = claims.iat {
        if iat > now_secs.saturating_add(skew) {
            return Err(AuthError::token_verification_failed("token issued in the future (iat claim)"));
        }
    }

    Ok(())
}

/// Validate subject format
fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(AuthError::invalid_token("subject cannot be empty"));
    }

    if subject.len() > 255 {
        return Err(AuthError::invalid_token("subject too long"));
    }

    if subject.chars().any(char::is_control) {
        return Err(AuthError::invalid_token("subject contains control characters"));
    }

    Ok(())
}

/// `at_hash` value of an access token: left half of the digest matching the
/// signing algorithm, base64url without padding
pub fn access_token_hash(access_token: &str, alg: Algorithm) -> String {
    let digest: Vec<u8> = match alg {
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
        _ => Sha256::digest(access_token.as_bytes()).to_vec(),
    };

    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
