// src/web/auth.rs
// Shared-password login and the session gate

use axum::{
    Json,
    extract::{Request, State, rejection::JsonRejection},
    http::{Extensions, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::LOGIN_PAGE_PATH;
use crate::config::{BundleMount, ServerConfig};
use crate::gateway::PeerAddr;
use crate::session::{SESSION_COOKIE, SessionId, SessionState};
use crate::state::AppState;

/// Paths reachable without a session. Exact match only.
pub const PUBLIC_PATHS: [&str; 4] = ["/login.html", "/index.css", "/favicon.ico", "/api/login"];

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
}

/// Allow-listed paths and the vendored bundles skip the gate
pub fn is_public(path: &str, bundles: &[BundleMount]) -> bool {
    PUBLIC_PATHS.contains(&path) || bundles.iter().any(|bundle| bundle.covers(path))
}

fn password_matches(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

fn session_id(jar: &SignedCookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| cookie.value().parse().ok())
}

async fn is_authenticated(state: &AppState, jar: &SignedCookieJar) -> bool {
    let Some(id) = session_id(jar) else {
        return false;
    };
    state
        .sessions
        .get(&id)
        .await
        .is_some_and(|session| session.authenticated)
}

fn session_cookie(id: SessionId, config: &ServerConfig) -> Cookie<'static> {
    let max_age = i64::try_from(config.session_ttl.as_secs()).unwrap_or(i64::MAX);

    let mut cookie = Cookie::new(SESSION_COOKIE, id.to_string());
    cookie.set_http_only(true);
    cookie.set_secure(config.secure_cookies);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(max_age));
    cookie
}

/// Middleware run before every plain request
pub async fn session_gate(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();

    if is_public(&path, &state.config.bundles) || is_authenticated(&state, &jar).await {
        return next.run(request).await;
    }

    debug!(%path, "no authenticated session, redirecting to login");
    (StatusCode::FOUND, [(header::LOCATION, LOGIN_PAGE_PATH)]).into_response()
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    extensions: Extensions,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let peer = extensions.get::<PeerAddr>().map(|p| p.0);

    let supplied = match body {
        Ok(Json(req)) => req.password,
        Err(rejection) => {
            debug!(?peer, "unreadable login body: {}", rejection);
            None
        }
    };

    let accepted = supplied
        .as_deref()
        .is_some_and(|password| password_matches(&state.config.password, password));

    if !accepted {
        warn!(?peer, "login failed");
        return (StatusCode::UNAUTHORIZED, Json(LoginResponse { success: false })).into_response();
    }

    let id = session_id(&jar).unwrap_or_else(SessionId::generate);
    state
        .sessions
        .set(id, SessionState { authenticated: true })
        .await;

    info!(?peer, "login succeeded");
    let jar = jar.add(session_cookie(id, &state.config));
    (jar, Json(LoginResponse { success: true })).into_response()
}
