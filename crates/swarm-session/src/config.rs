use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const PUSH_CHANNEL_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid backend url '{value}': {reason}")]
    InvalidBackendUrl { value: String, reason: String },
    #[error("invalid push channel url '{value}': {reason}")]
    InvalidPushUrl { value: String, reason: String },
    #[error("unsupported scheme '{scheme}' in {value}")]
    UnsupportedScheme { value: String, scheme: String },
}

/// Where the monitor finds its backend: the two trigger endpoints and the push
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub backend_url: Url,
    pub push_url: Url,
    pub request_timeout: Duration,
}

impl MonitorConfig {
    pub fn new(backend_url: &str, push_url: Option<&str>) -> Result<Self, ConfigError> {
        let backend_url = parse_backend_url(backend_url)?;
        let push_url = match push_url {
            Some(value) if !value.trim().is_empty() => parse_push_url(value)?,
            _ => derive_push_url(&backend_url)?,
        };
        Ok(Self {
            backend_url,
            push_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolves flags, then `SWARM_BACKEND_URL` / `SWARM_WS_URL`, then defaults.
    pub fn resolve(flag_backend: &str, flag_push: &str) -> Result<Self, ConfigError> {
        let backend = resolve_value(flag_backend, "SWARM_BACKEND_URL")
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let push = resolve_value(flag_push, "SWARM_WS_URL");
        Self::new(&backend, push.as_deref())
    }

    pub fn reset_url(&self) -> Url {
        join_endpoint(&self.backend_url, "reset")
    }

    pub fn start_url(&self) -> Url {
        join_endpoint(&self.backend_url, "start")
    }
}

fn resolve_value(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn parse_backend_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidBackendUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::UnsupportedScheme {
            value: value.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

fn parse_push_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidPushUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(ConfigError::UnsupportedScheme {
            value: value.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

fn derive_push_url(backend_url: &Url) -> Result<Url, ConfigError> {
    let scheme = if backend_url.scheme() == "https" {
        "wss"
    } else {
        "ws"
    };
    let host = backend_url.host_str().unwrap_or("127.0.0.1");
    let authority = match backend_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let base_path = backend_url.path().trim_end_matches('/');
    parse_push_url(&format!("{scheme}://{authority}{base_path}{PUSH_CHANNEL_PATH}"))
}

fn join_endpoint(base: &Url, endpoint: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{endpoint}", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}
