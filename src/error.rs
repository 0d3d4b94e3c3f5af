use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A malformed watchlist line. Recovered by skipping the line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{source_name}:{line}: {reason}")]
pub struct InputFormatError {
    pub source_name: String,
    pub line: usize,
    pub reason: String,
}

/// What went wrong talking to the catalog or pricing service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("not found")]
    NotFound,
    #[error("throttled by upstream")]
    Throttled { retry_after: Option<Duration> },
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code >= 500,
            Self::NotFound | Self::InvalidResponse(_) => false,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("title not found in region {region}")]
    NotFound { region: String },
    #[error("enumeration failed after {attempts} attempt(s): {source}")]
    Service {
        attempts: u32,
        #[source]
        source: UpstreamError,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("not available in region {region}")]
    Unavailable { region: String },
    #[error("price lookup failed after {attempts} attempt(s): {source}")]
    Service {
        attempts: u32,
        #[source]
        source: UpstreamError,
    },
}

/// Durable state could not be read or written. Fatal to the run.
#[derive(Debug, Error)]
pub enum PersistenceFailure {
    #[error("snapshot storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error("failed to post report to messaging endpoint: {0}")]
    Http(#[from] reqwest::Error),
}
