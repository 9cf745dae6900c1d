// tests/test_helpers.rs
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response, header};
use axum::response::IntoResponse;
use axum_extra::extract::cookie::{Cookie, Key, SignedCookieJar};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tunnelgate::session::{MemorySessionStore, SESSION_COOKIE};
use tunnelgate::tunnel::{Tunnel, UnavailableTunnel};
use tunnelgate::{AppState, GatewayService, ServerConfig, gateway};

pub const PASSWORD: &str = "correct horse battery staple";

pub const INDEX_HTML: &str = "<!doctype html><title>app</title><main id=\"app\"></main>";
pub const LOGIN_HTML: &str = "<!doctype html><title>login</title><form id=\"login\"></form>";
pub const NOT_FOUND_HTML: &str = "<!doctype html><title>404</title><h1>page not found</h1>";
pub const SCRAMJET_JS: &str = "self.$scramjet = {};";

/// Static roots on disk plus the state pointing at them. Keep it alive for
/// the duration of the test.
pub struct TestSite {
    pub dir: TempDir,
    pub state: AppState,
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Build a site with an application root, one vendored bundle and a fresh
/// in-memory session store.
pub fn create_test_site() -> TestSite {
    let dir = tempfile::tempdir().expect("create temp dir");
    let public = dir.path().join("public");
    write(&public.join("index.html"), INDEX_HTML);
    write(&public.join("login.html"), LOGIN_HTML);
    write(&public.join("index.css"), "body { margin: 0; }");
    write(&public.join("404.html"), NOT_FOUND_HTML);

    let vendor = dir.path().join("vendor");
    write(&vendor.join("scramjet/scramjet.all.js"), SCRAMJET_JS);
    std::fs::create_dir_all(vendor.join("libcurl")).unwrap();
    std::fs::create_dir_all(vendor.join("baremux")).unwrap();

    let mut config = ServerConfig::new(PASSWORD, &public);
    for bundle in &mut config.bundles {
        let name = bundle.prefix.trim_start_matches('/');
        let dir_name = if name == "scram" { "scramjet" } else { name };
        bundle.root = vendor.join(dir_name);
    }

    let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
    let state = AppState::new(Arc::new(config), sessions);
    TestSite { dir, state }
}

/// Service stack with the no-backend tunnel
pub fn create_test_app(site: &TestSite) -> GatewayService {
    create_test_app_with_tunnel(site, Arc::new(UnavailableTunnel))
}

pub fn create_test_app_with_tunnel(site: &TestSite, tunnel: Arc<dyn Tunnel>) -> GatewayService {
    gateway(site.state.clone(), tunnel)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

pub fn login_request(password: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let body = serde_json::json!({ "password": password }).to_string();
    builder.body(Body::from(body)).unwrap()
}

/// `name=value` pair of the session cookie set by a response, if any
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(SESSION_COOKIE))
        .and_then(|v| v.split(';').next())
        .map(|pair| pair.trim().to_string())
}

/// Sign an arbitrary session cookie value with the site's key
pub fn forge_signed_cookie(key: &Key, value: &str) -> String {
    let jar = SignedCookieJar::new(key.clone()).add(Cookie::new(SESSION_COOKIE, value.to_string()));
    let response = jar.into_response();
    session_cookie(&response).expect("signed cookie present")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
