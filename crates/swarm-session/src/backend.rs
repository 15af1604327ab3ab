use crate::config::MonitorConfig;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Reset,
    Start,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Reset => "reset",
            Endpoint::Start => "start",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("{endpoint} request failed: {source}")]
    Http {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: Endpoint, status: u16 },
    #[error("http client setup failed: {0}")]
    Client(String),
}

impl TriggerError {
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            TriggerError::Http { endpoint, .. } | TriggerError::Status { endpoint, .. } => {
                Some(*endpoint)
            }
            TriggerError::Client(_) => None,
        }
    }
}

/// The two backend calls that begin a batch. `reset` always completes before
/// `start` is issued.
#[async_trait]
pub trait TriggerBackend: Send + Sync {
    async fn reset(&self) -> Result<(), TriggerError>;
    async fn start(&self) -> Result<(), TriggerError>;
}

#[derive(Debug, Clone)]
pub struct HttpTriggerBackend {
    client: reqwest::Client,
    reset_url: Url,
    start_url: Url,
}

impl HttpTriggerBackend {
    pub fn new(config: &MonitorConfig) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| TriggerError::Client(err.to_string()))?;
        Ok(Self {
            client,
            reset_url: config.reset_url(),
            start_url: config.start_url(),
        })
    }

    async fn post(&self, endpoint: Endpoint) -> Result<(), TriggerError> {
        let url = match endpoint {
            Endpoint::Reset => self.reset_url.clone(),
            Endpoint::Start => self.start_url.clone(),
        };
        debug!(event = "trigger_request", endpoint = %endpoint, url = %url);
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|source| TriggerError::Http { endpoint, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TriggerError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        info!(event = "trigger_ok", endpoint = %endpoint, status = status.as_u16());
        Ok(())
    }
}

#[async_trait]
impl TriggerBackend for HttpTriggerBackend {
    async fn reset(&self) -> Result<(), TriggerError> {
        self.post(Endpoint::Reset).await
    }

    async fn start(&self) -> Result<(), TriggerError> {
        self.post(Endpoint::Start).await
    }
}
