//! Shared HTTP plumbing for network-backed clients.

use reqwest::{Client, Request, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stagexfer_common::{Error, Result};

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound for one request, body included.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Build a `reqwest` client with these settings.
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout())
            .timeout(self.request_timeout())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            user_agent: format!("stagexfer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Why a request produced no response.
#[derive(Debug)]
pub(crate) enum SendFailure {
    Cancelled,
    TimedOut,
    Transport(reqwest::Error),
}

impl SendFailure {
    /// Whether the connection closed before the response completed.
    pub(crate) fn is_premature_close(&self) -> bool {
        let Self::Transport(err) = self else {
            return false;
        };
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(current) = source {
            if let Some(io) = current.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::UnexpectedEof {
                    return true;
                }
            }
            let message = current.to_string();
            if message.ends_with("EOF") || message.contains("connection closed before message completed") {
                return true;
            }
            source = current.source();
        }
        false
    }

    pub(crate) fn into_error(self, what: &str) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::TimedOut => Error::Timeout(what.to_string()),
            Self::Transport(err) if err.is_timeout() => Error::Timeout(format!("{}: {}", what, err)),
            Self::Transport(err) => Error::Network(format!("{}: {}", what, err)),
        }
    }
}

/// Execute `request`, bounded by `timeout` and aborted by `cancel`.
pub(crate) async fn send(
    http: &Client,
    request: Request,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<Response, SendFailure> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SendFailure::Cancelled),
        res = tokio::time::timeout(timeout, http.execute(request)) => match res {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(SendFailure::Transport(err)),
            Err(_) => Err(SendFailure::TimedOut),
        },
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => out,
    }
}
