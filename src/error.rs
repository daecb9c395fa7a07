//! Error types shared by every ingestion stage.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while fetching, validating, storing or snapshotting feed data.
///
/// Each variant maps to one failure class of the pipeline. Orchestrators
/// decide whether a failure aborts the whole cycle (ledger, fetch) or only
/// the sub-task that raised it (one table, one realtime stream).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Transport failure or non-success HTTP status
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The static feed archive could not be opened or extracted
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A CSV table failed its field schema; the whole file is rejected
    #[error("{file}: line {line}: {message}")]
    SchemaValidation {
        file: String,
        line: u64,
        message: String,
    },

    /// The realtime buffer is not a valid `FeedMessage`
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A statement or transaction against the store failed
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Directory creation, file write or rename failed
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A bounded sync did not finish in time and was cancelled
    #[error("sync timed out after {0:?}")]
    Timeout(Duration),

    /// A spawned or blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub(crate) fn network(url: &str, message: impl ToString) -> Self {
        IngestError::Network {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(file: &str, line: u64, message: impl ToString) -> Self {
        IngestError::SchemaValidation {
            file: file.to_string(),
            line,
            message: message.to_string(),
        }
    }

    /// Short machine-friendly label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Network { .. } => "network",
            IngestError::Archive(_) => "archive",
            IngestError::SchemaValidation { .. } => "schema_validation",
            IngestError::Decode(_) => "decode",
            IngestError::Storage(_) => "storage",
            IngestError::Filesystem { .. } => "filesystem",
            IngestError::Config(_) => "config",
            IngestError::Timeout(_) => "timeout",
            IngestError::Task(_) => "task",
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_message_names_file_and_line() {
        let err = IngestError::schema("routes.txt", 4, "missing required field `route_id`");
        assert_eq!(
            err.to_string(),
            "routes.txt: line 4: missing required field `route_id`"
        );
        assert_eq!(err.kind(), "schema_validation");
    }

    #[test]
    fn test_network_error_kind() {
        let err = IngestError::network("http://example.com/feed.pb", "HTTP 503");
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[test]
    fn test_timeout_names_duration() {
        let err = IngestError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "sync timed out after 90s");
        assert_eq!(err.kind(), "timeout");
    }
}
