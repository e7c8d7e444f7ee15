//! Error types for the skyvault library.

use std::time::Duration;

use thiserror::Error;

/// All errors that can occur in the skyvault library.
#[derive(Error, Debug)]
pub enum SkyError {
    /// No block of the archive could be decoded.
    #[error("Archive is corrupt: {reason}")]
    ArchiveCorrupt { reason: String },

    /// A single archive block could not be decoded. Counted, never fatal.
    #[error("Block {index} skipped: {reason}")]
    BlockSkipped { index: usize, reason: String },

    /// A record is missing required fields or has the wrong shape.
    #[error("Malformed record {uri}: {reason}")]
    RecordShape { uri: String, reason: String },

    /// The remote service throttled the request.
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// A remote call did not complete within its timeout.
    #[error("Timed out waiting for {operation}")]
    NetworkTimeout { operation: String },

    /// Persisting engagement counts failed. The in-memory result still applies.
    #[error("Cache write failed: {0}")]
    CacheWrite(String),

    /// Every hydration batch failed; no progress was possible.
    #[error("Hydration failed: {unhydrated} of {attempted} items could not be hydrated")]
    HydrationFailed { attempted: usize, unhydrated: usize },

    /// The remote service returned a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level HTTP failure.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Engagement cache storage error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No reader connection could be taken from the cache pool.
    #[error("Cache pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unreadable settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkyError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkTimeout { .. })
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Convenience result type for skyvault operations.
pub type SkyResult<T> = Result<T, SkyError>;
