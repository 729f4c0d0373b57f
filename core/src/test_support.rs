//! Mock implementations of platform traits for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{AuthError, Result};
use crate::platform::{Cache, Clock, Environment, HttpClient, HttpResponse};

/// Mock cache backed by an in-memory HashMap
pub struct MockCache {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait(?Send)]
impl Cache for MockCache {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.store.lock().unwrap();
        Ok(store.get(key).cloned())
    }

    async fn put_bytes(&self, key: &str, value: &[u8], _ttl_secs: u64) -> Result<()> {
        self.store.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Outbound request seen by [`MockHttp`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: String,
}

/// Mock HTTP client with pre-configured responses
///
/// Responses are matched by URL substring; the most recently added match wins.
pub struct MockHttp {
    responses: Mutex<Vec<(String, HttpResponse)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttp {
    pub fn new(responses: Vec<(String, HttpResponse)>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Register a response that takes precedence over earlier ones
    pub fn push(&self, pattern: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(0, (pattern.to_string(), response));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, method: &'static str, url: &str, body: &[u8]) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        });

        let responses = self.responses.lock().unwrap();
        for (pattern, response) in responses.iter() {
            if url.contains(pattern.as_str()) {
                return Ok(HttpResponse {
                    status: response.status,
                    headers: response.headers.clone(),
                    body: response.body.clone(),
                });
            }
        }
        Err(AuthError::upstream_error(format!("no mock response for {} {}", method, url)))
    }
}

#[async_trait(?Send)]
impl HttpClient for MockHttp {
    async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse> {
        // Suspend like a real round trip so concurrent callers interleave
        tokio::task::yield_now().await;
        self.respond("GET", url, &[])
    }

    async fn post(&self, url: &str, _headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse> {
        self.respond("POST", url, body)
    }
}

/// JSON response with optional extra headers
pub fn json_response(status: u16, body: serde_json::Value, headers: &[(&str, &str)]) -> HttpResponse {
    let mut all_headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    all_headers.extend(headers.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    HttpResponse {
        status,
        headers: all_headers,
        body: serde_json::to_vec(&body).unwrap(),
    }
}

/// Mock clock with an adjustable timestamp
pub struct MockClock(pub Mutex<u64>);

impl MockClock {
    pub fn at(now: u64) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, secs: u64) {
        *self.0.lock().unwrap() += secs;
    }
}

impl Clock for MockClock {
    fn now_secs(&self) -> u64 {
        *self.0.lock().unwrap()
    }
}

/// Mock environment backed by an in-memory HashMap
pub struct MockEnv {
    vars: HashMap<String, String>,
    secrets: HashMap<String, String>,
}

impl MockEnv {
    pub fn new(vars: HashMap<String, String>, secrets: HashMap<String, String>) -> Self {
        Self { vars, secrets }
    }
}

impl Environment for MockEnv {
    fn get_var(&self, name: &str) -> Result<String> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::internal(format!("variable '{}' not found", name)))
    }

    fn get_secret(&self, name: &str) -> Result<String> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::internal(format!("secret '{}' not found", name)))
    }
}

/// RSA key pair generated at runtime, exposed as PEM and as a public JWK
pub struct TestRsaKey {
    pub private_pem: String,
    pub jwk: serde_json::Value,
}

impl TestRsaKey {
    pub fn generate(kid: &str) -> Self {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rand::rngs::OsRng;
        use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("key generation failed");
        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private key PEM export failed")
            .to_string();
        let public_key = private_key.to_public_key();

        let jwk = serde_json::json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        });

        Self { private_pem, jwk }
    }

    /// Sign claims as an RS256 JWT carrying `kid` in its header
    pub fn sign(&self, kid: Option<&str>, claims: &serde_json::Value) -> String {
        use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("invalid private key");
        encode(&header, claims, &key).expect("failed to sign token")
    }
}
