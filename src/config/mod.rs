// src/config/mod.rs
// Process configuration: CLI flags with environment fallbacks, read once at startup

use clap::Parser;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{GateError, Result};

/// Port used when `PORT` is absent or unusable
pub const DEFAULT_PORT: u16 = 8080;

/// Session lifetime (24 hours)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24;

/// URL prefix of the scramjet bundle
pub const SCRAMJET_PREFIX: &str = "/scram";
/// URL prefix of the libcurl transport bundle
pub const LIBCURL_PREFIX: &str = "/libcurl";
/// URL prefix of the bare-mux bundle
pub const BAREMUX_PREFIX: &str = "/baremux";

#[derive(Parser, Debug, Clone)]
#[command(name = "tunnelgate")]
#[command(about = "Password-gated static file and tunnel-upgrade server")]
#[command(version)]
pub struct Args {
    /// Port to listen on. Leading digits are used; anything unparseable means 8080
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Shared password required by the login page
    #[arg(long, env = "SITE_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Application UI root (login.html, index.html, 404.html, ...)
    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Scramjet bundle served under /scram/
    #[arg(long, env = "SCRAMJET_DIR", default_value = "vendor/scramjet")]
    pub scramjet_dir: PathBuf,

    /// libcurl transport bundle served under /libcurl/
    #[arg(long, env = "LIBCURL_DIR", default_value = "vendor/libcurl")]
    pub libcurl_dir: PathBuf,

    /// bare-mux bundle served under /baremux/
    #[arg(long, env = "BAREMUX_DIR", default_value = "vendor/baremux")]
    pub baremux_dir: PathBuf,

    /// WebSocket URL of the tunnel backend that speaks the wisp protocol
    #[arg(long, env = "WISP_UPSTREAM")]
    pub wisp_upstream: Option<String>,

    /// Mark the session cookie Secure (enable behind HTTPS)
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Session lifetime in seconds
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = DEFAULT_SESSION_TTL_SECS)]
    pub session_ttl_secs: u64,
}

/// A vendored asset bundle mounted at a fixed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMount {
    pub prefix: &'static str,
    pub root: PathBuf,
}

impl BundleMount {
    /// True when `path` is the prefix itself or lies underneath it
    pub fn covers(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Immutable runtime configuration derived from [`Args`]
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub password: String,
    pub public_dir: PathBuf,
    pub bundles: Vec<BundleMount>,
    pub wisp_upstream: Option<Url>,
    pub secure_cookies: bool,
    pub session_ttl: Duration,
}

impl ServerConfig {
    /// Build a config with default mounts, mainly for tests and embedding
    pub fn new(password: impl Into<String>, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: DEFAULT_PORT,
            password: password.into(),
            public_dir: public_dir.into(),
            bundles: default_bundles(
                PathBuf::from("vendor/scramjet"),
                PathBuf::from("vendor/libcurl"),
                PathBuf::from("vendor/baremux"),
            ),
            wisp_upstream: None,
            secure_cookies: false,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }

    /// Listen on every interface
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Path of the custom not-found page
    pub fn not_found_page(&self) -> PathBuf {
        self.public_dir.join("404.html")
    }

    /// Static roots that do not exist on disk
    pub fn missing_roots(&self) -> Vec<&Path> {
        std::iter::once(self.public_dir.as_path())
            .chain(self.bundles.iter().map(|b| b.root.as_path()))
            .filter(|p| !p.is_dir())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.password.is_empty() {
            return Err(GateError::Config("password must not be empty".to_string()));
        }
        if self.session_ttl.is_zero() {
            return Err(GateError::Config(
                "session ttl must be greater than 0".to_string(),
            ));
        }
        if let Some(url) = &self.wisp_upstream
            && !matches!(url.scheme(), "ws" | "wss")
        {
            return Err(GateError::Config(format!(
                "wisp upstream must be a ws:// or wss:// url, got {}",
                url
            )));
        }
        Ok(())
    }
}

// Keep the password out of logs
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("public_dir", &self.public_dir)
            .field("bundles", &self.bundles)
            .field("wisp_upstream", &self.wisp_upstream)
            .field("secure_cookies", &self.secure_cookies)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = GateError;

    fn try_from(args: Args) -> Result<Self> {
        let wisp_upstream = match args.wisp_upstream.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(
                Url::parse(raw)
                    .map_err(|e| GateError::Config(format!("invalid wisp upstream {raw}: {e}")))?,
            ),
            None => None,
        };

        let config = Self {
            port: parse_port(args.port.as_deref()),
            password: args.password,
            public_dir: args.public_dir,
            bundles: default_bundles(args.scramjet_dir, args.libcurl_dir, args.baremux_dir),
            wisp_upstream,
            secure_cookies: args.secure_cookies,
            session_ttl: Duration::from_secs(args.session_ttl_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

fn default_bundles(scramjet: PathBuf, libcurl: PathBuf, baremux: PathBuf) -> Vec<BundleMount> {
    vec![
        BundleMount {
            prefix: SCRAMJET_PREFIX,
            root: scramjet,
        },
        BundleMount {
            prefix: LIBCURL_PREFIX,
            root: libcurl,
        },
        BundleMount {
            prefix: BAREMUX_PREFIX,
            root: baremux,
        },
    ]
}

/// Parse a port the lenient way: optional leading whitespace and `+`, then
/// leading digits. Absent, non-numeric or out-of-range input yields
/// [`DEFAULT_PORT`] without complaint.
pub fn parse_port(raw: Option<&str>) -> u16 {
    let Some(raw) = raw else {
        return DEFAULT_PORT;
    };
    let trimmed = raw.trim_start();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    unsigned[..end].parse().unwrap_or(DEFAULT_PORT)
}
