//! oidc-auth-server: OpenID Connect security service - native HTTP adapter
//!
//! Lightweight HTTP server using hyper. Uses a single-threaded tokio runtime
//! (compatible with core's !Send async traits).

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use oidc_auth_core::config::{CookieConfig, ServerSettings, ServicesConfig, SESSION_TTL_SECS};
use oidc_auth_core::error::AuthError;
use oidc_auth_core::platform::{Clock, Environment};
use oidc_auth_core::session::{delete_session, load_session, save_session, Session};
use oidc_auth_core::state::AuthResponse;
use oidc_auth_core::{Authentication, CallbackRequest, Listener, PostLoginRedirect};

mod platform;

use platform::{MokaCache, ProcessEnv, ReqwestHttpClient, SystemClock};

const SESSION_COOKIE: &str = "oidc-sid";
const MAX_SESSIONS: u64 = 10_000;

/// Shared application state
struct AppState {
    listener: Listener,
    sessions: MokaCache,
    settings: ServerSettings,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AuthError> {
    let env = ProcessEnv;

    let path = env.get_var("OIDC_CONFIG").unwrap_or_else(|_| "oidc.yaml".into());
    let yaml = std::fs::read_to_string(&path)
        .map_err(|e| AuthError::configuration(format!("cannot read '{}': {}", path, e)))?;

    let mut config = ServicesConfig::from_yaml_str(&yaml)?;
    config.resolve_secrets(&env);
    if let Ok(port) = env.get_var("PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| AuthError::configuration("PORT must be a number"))?;
    }

    let ServicesConfig { server, services } = config;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut listener = Listener::new();
    for (name, service_config) in services {
        let http = Arc::new(ReqwestHttpClient::from_config(&service_config)?);
        let mut service = Authentication::new(name.clone(), service_config, http, clock.clone())?;
        service.start().await?;
        tracing::info!(service = %name, "Service started");
        listener.register_service(service)?;
    }

    let port = server.port;
    let state = Arc::new(AppState {
        listener,
        sessions: MokaCache::new(MAX_SESSIONS),
        settings: server,
    });

    let tcp = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| AuthError::configuration(format!("failed to bind port {}: {}", port, e)))?;

    tracing::info!("oidc-auth-server listening on port {}", port);

    loop {
        let (stream, _) = match tcp.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                continue;
            }
        };
        let state = state.clone();

        // Each connection is handled sequentially (single-threaded runtime)
        let io = hyper_util::rt::TokioIo::new(stream);
        let service = service_fn(move |req| {
            let state = state.clone();
            async move { handle_request(req, &state).await }
        });

        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            tracing::warn!("connection error: {}", e);
        }
    }
}

type HyperResponse = Response<Full<Bytes>>;

async fn handle_request(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<HyperResponse, std::convert::Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!("{} {}", method, path);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let response = match (method, segments.as_slice()) {
        (Method::GET, [""]) => handle_health(state),
        (Method::GET, ["login", ident]) => handle_login(req, state, ident).await,
        (Method::GET, ["callback"]) => handle_callback(req, state).await,
        (Method::GET, ["me"]) => handle_me(req, state).await,
        (Method::GET, ["userinfo", ident]) => handle_userinfo(req, state, ident).await,
        (Method::POST, ["refresh", ident]) => handle_refresh(req, state, ident).await,
        (Method::POST, ["logout", ident]) => handle_logout(req, state, ident).await,
        _ => json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "not_found"})),
    };

    Ok(response)
}

fn handle_health(state: &AppState) -> HyperResponse {
    let services: Vec<&str> = state.listener.services().map(Authentication::ident).collect();
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "name": "oidc-auth",
            "services": services,
        }),
    )
}

/// Redirect the browser to the provider authorization endpoint
async fn handle_login(req: Request<Incoming>, state: &AppState, ident: &str) -> HyperResponse {
    let service = match find_service(state, ident) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let params = query_params(req.uri().query());
    let cookies = parse_cookies(req.headers());
    let (session_id, mut session) = load_or_create_session(state, &cookies).await;
    let state_id = session.next_state_id();
    if let Err(e) = save_session(&state.sessions, session_id, &session).await {
        return error_response(&e);
    }

    let scopes: Vec<&str> = params
        .get("scope")
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    match service.login(
        session_id,
        state_id,
        params.get("action").map(String::as_str),
        &callback_url(&state.settings),
        &scopes,
    ) {
        Ok(url) => redirect_response(&url, &[session_cookie(session_id)]),
        Err(e) => error_response(&e),
    }
}

/// Authorization response from the provider
async fn handle_callback(req: Request<Incoming>, state: &AppState) -> HyperResponse {
    state.listener.before_request().await;

    let params = query_params(req.uri().query());
    if let Some(error) = params.get("error") {
        let description = params.get("error_description").cloned().unwrap_or_default();
        tracing::warn!("Provider returned an error: {} {}", error, description);
        return error_response(&AuthError::token_verification_failed(error.clone()));
    }

    let service = match state.listener.route(&params) {
        Some(s) => s,
        None => return error_response(&AuthError::invalid_state("no service issued this state")),
    };

    let cookies = parse_cookies(req.headers());
    let (session_id, mut session) = load_or_create_session(state, &cookies).await;
    // The code is only redeemed for the session the state was issued to
    if let Err(e) = check_state_session(service.is_auth_response(&params).as_ref(), session_id) {
        return error_response(&e);
    }

    let redirect_url = callback_url(&state.settings);
    let cookie_config = &service.config().cookie;

    let request = CallbackRequest {
        params: &params,
        redirect_url: &redirect_url,
        cookie: cookies.get(&cookie_config.name).map(String::as_str),
    };
    let principal = service.get_principal(&request, Some(&mut session)).await;

    let redirect = match (principal.principal.as_ref(), principal.redirect) {
        (Some(_), Some(redirect)) => redirect,
        _ => return error_response(&AuthError::token_verification_failed("authentication failed")),
    };

    if let Err(e) = save_session(&state.sessions, session_id, &session).await {
        return error_response(&e);
    }

    let mut set_cookies = vec![session_cookie(session_id)];
    if cookie_config.activated {
        match service.to_cookie(&principal.credentials) {
            Ok(value) => set_cookies.push(principal_cookie(cookie_config, &value)),
            Err(e) => return error_response(&e),
        }
    }

    redirect_response(&post_login_location(&redirect), &set_cookies)
}

/// Current principal, from the session or the principal cookie
async fn handle_me(req: Request<Incoming>, state: &AppState) -> HyperResponse {
    let cookies = parse_cookies(req.headers());
    let (session_id, mut session) = load_or_create_session(state, &cookies).await;
    let empty = HashMap::new();
    let redirect_url = callback_url(&state.settings);

    for service in state.listener.services() {
        let request = CallbackRequest {
            params: &empty,
            redirect_url: &redirect_url,
            cookie: cookies.get(&service.config().cookie.name).map(String::as_str),
        };
        let principal = service.get_principal(&request, Some(&mut session)).await;
        if let Some(sub) = principal.principal {
            if let Err(e) = save_session(&state.sessions, session_id, &session).await {
                return error_response(&e);
            }
            return json_response(
                StatusCode::OK,
                &serde_json::json!({"service": service.ident(), "sub": sub}),
            );
        }
    }

    error_response(&AuthError::token_verification_failed("not authenticated"))
}

async fn handle_userinfo(req: Request<Incoming>, state: &AppState, ident: &str) -> HyperResponse {
    let service = match find_service(state, ident) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };
    let access_token = match extract_bearer_token(req.headers()) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    match service.user_info(&access_token).await {
        Ok(info) => json_response(StatusCode::OK, &info),
        Err(e) => error_response(&e),
    }
}

async fn handle_refresh(req: Request<Incoming>, state: &AppState, ident: &str) -> HyperResponse {
    let service = match find_service(state, ident) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };
    let form = match read_form(req).await {
        Ok(f) => f,
        Err(e) => return error_response(&e),
    };
    let refresh_token = match form.get("refresh_token") {
        Some(t) => t,
        None => return error_response(&AuthError::invalid_request("missing required parameter: refresh_token")),
    };

    match service.refresh_token(refresh_token).await {
        Ok(tokens) => json_response(StatusCode::OK, &tokens),
        Err(e) => error_response(&e),
    }
}

/// End the local session, and the provider session when a token is given
async fn handle_logout(req: Request<Incoming>, state: &AppState, ident: &str) -> HyperResponse {
    let service = match find_service(state, ident) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };
    let cookies = parse_cookies(req.headers());
    let form = match read_form(req).await {
        Ok(f) => f,
        Err(e) => return error_response(&e),
    };

    let status = match service.logout(form.get("refresh_token").map(String::as_str)).await {
        Ok(status) => status,
        Err(e) => return error_response(&e),
    };

    if let Some(session_id) = session_id_from(&cookies) {
        if let Err(e) = delete_session(&state.sessions, session_id).await {
            tracing::warn!("failed to delete session: {}", e);
        }
    }

    let mut response = json_response(StatusCode::OK, &serde_json::json!({"logged_out": status}));
    for cookie in [
        expired_cookie(SESSION_COOKIE),
        expired_cookie(&service.config().cookie.name),
    ] {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().append("Set-Cookie", value);
        }
    }
    response
}

fn find_service<'a>(state: &'a AppState, ident: &str) -> Result<&'a Authentication, AuthError> {
    state
        .listener
        .service(ident)
        .ok_or_else(|| AuthError::invalid_request(format!("unknown service '{}'", ident)))
}

async fn load_or_create_session(state: &AppState, cookies: &HashMap<String, String>) -> (u64, Session) {
    if let Some(session_id) = session_id_from(cookies) {
        match load_session(&state.sessions, session_id).await {
            Ok(Some(session)) => return (session_id, session),
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to load session: {}", e),
        }
    }
    (rand::random(), Session::default())
}

fn check_state_session(auth: Option<&AuthResponse>, session_id: u64) -> Result<(), AuthError> {
    match auth {
        Some(auth) if auth.session_id == session_id => Ok(()),
        Some(_) => Err(AuthError::invalid_state("state was issued to another session")),
        None => Err(AuthError::invalid_state("state or code is invalid")),
    }
}

fn session_id_from(cookies: &HashMap<String, String>) -> Option<u64> {
    cookies.get(SESSION_COOKIE).and_then(|v| v.parse().ok())
}

fn callback_url(settings: &ServerSettings) -> String {
    format!("{}/callback", settings.public_url.trim_end_matches('/'))
}

/// Application location once the login completed
fn post_login_location(redirect: &PostLoginRedirect) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("_s", &redirect.session_id.to_string());
    query.append_pair("_c", &format!("{:05}", redirect.state_id));
    if let Some(action) = &redirect.action_id {
        query.append_pair(action, "");
    }
    format!("/me?{}", query.finish())
}

fn query_params(query: Option<&str>) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

async fn read_form(req: Request<Incoming>) -> Result<HashMap<String, String>, AuthError> {
    let body = req
        .collect()
        .await
        .map_err(|_| AuthError::invalid_request("failed to read body"))?
        .to_bytes();
    Ok(url::form_urlencoded::parse(&body).into_owned().collect())
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all("Cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn session_cookie(session_id: u64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, session_id, SESSION_TTL_SECS
    )
}

fn principal_cookie(config: &CookieConfig, value: &str) -> String {
    let mut cookie = format!("{}={}; Path=/; SameSite=Lax", config.name, value);
    if let Some(max_age) = config.max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    if config.httponly {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

fn expired_cookie(name: &str) -> String {
    format!("{}=; Path=/; Max-Age=0", name)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let header = headers
        .get("Authorization")
        .ok_or_else(|| AuthError::invalid_request("missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::invalid_request("invalid Authorization header encoding"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AuthError::invalid_request("Authorization header must use Bearer scheme"))
}

fn redirect_response(location: &str, cookies: &[String]) -> HyperResponse {
    let mut builder = Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location);
    for cookie in cookies {
        builder = builder.header("Set-Cookie", cookie.as_str());
    }
    builder
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| internal_error_response())
}

fn error_response(err: &AuthError) -> HyperResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &err.to_error_response())
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HyperResponse {
    let json = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| internal_error_response())
}

fn internal_error_response() -> HyperResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
