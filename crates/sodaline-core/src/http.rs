//! HTTP plumbing shared by remote sources.
//!
//! Uses async reqwest internally, driven on a small shared tokio runtime,
//! but presents a sync interface to the sequential batch pipeline.

use std::sync::LazyLock;
use std::time::Duration;

/// Connect timeout (the per-request timeout comes from configuration)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for remote API calls
#[derive(Debug)]
pub enum HttpError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Response arrived but its body was not what the API promised
    Decode(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Decode(message) => write!(f, "invalid response: {message}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    /// Create HTTP error from reqwest error.
    ///
    /// The URL is stripped so query parameters never reach the logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        if e.is_decode() {
            return Self::Decode(e.without_url().to_string());
        }
        Self::Http {
            status,
            message: e.without_url().to_string(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Informational only: the retry wrapper retries every failure, this just
    /// picks the log wording.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Bad request, auth failures and unknown datasets will not heal
            Self::Http { status, .. } => !matches!(status, Some(400 | 401 | 403 | 404)),
            Self::Decode(_) => true,
        }
    }
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Build an async HTTP client with the given per-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .pool_max_idle_per_host(2)
        .user_agent(concat!("sodaline/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(HttpError::from_reqwest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> HttpError {
        HttpError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!http_err(404).is_retryable());
    }

    #[test]
    fn http_403_not_retryable() {
        assert!(!http_err(403).is_retryable());
    }

    #[test]
    fn http_500_retryable() {
        assert!(http_err(500).is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(http_err(429).is_retryable());
    }

    #[test]
    fn http_none_status_retryable() {
        let err = HttpError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_retryable() {
        assert!(HttpError::Decode("truncated body".to_string()).is_retryable());
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(503)), "HTTP 503: test");
    }

    #[test]
    fn display_decode() {
        let err = HttpError::Decode("missing count".to_string());
        assert_eq!(format!("{err}"), "invalid response: missing count");
    }

    #[test]
    fn client_builds_with_short_timeout() {
        assert!(http_client(Duration::from_secs(1)).is_ok());
    }
}
