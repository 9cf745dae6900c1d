// src/web/mod.rs
// HTTP routing: login API, static mounts and the session gate

pub mod auth;

use axum::{
    Router,
    extract::State,
    handler::Handler,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Login endpoint
pub const LOGIN_API_PATH: &str = "/api/login";
/// Where unauthenticated visitors are sent
pub const LOGIN_PAGE_PATH: &str = "/login.html";

/// Create the web router
///
/// The session gate is the outermost layer, so it sees every plain request
/// (vendored bundles and the not-found fallback included) before dispatch.
/// Anything no mount can answer, whatever the method, gets the custom 404 page.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let not_found = not_found_page.with_state(state.clone());

    let app_root = ServeDir::new(&config.public_dir)
        .call_fallback_on_method_not_allowed(true)
        .fallback(not_found.clone());

    let mut router = Router::new().route(
        LOGIN_API_PATH,
        post(auth::login).fallback(not_found_page),
    );

    for bundle in &config.bundles {
        let mount = ServeDir::new(&bundle.root)
            .call_fallback_on_method_not_allowed(true)
            .fallback(not_found.clone());
        router = router.nest_service(bundle.prefix, mount);
    }

    router
        .fallback_service(app_root)
        .layer(middleware::from_fn_with_state(state.clone(), auth::session_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `<public>/404.html` with status 404
async fn not_found_page(State(state): State<AppState>) -> Response {
    let path = state.config.not_found_page();
    match tokio::fs::read(&path).await {
        Ok(page) => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            page,
        )
            .into_response(),
        Err(e) => {
            warn!("not-found page {} unreadable: {}", path.display(), e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
