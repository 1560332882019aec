//! Errors raised while a pipeline is running, as distinct from the
//! configuration errors raised while it is being built (see
//! `sentry_common::error::ConfigError`).
use thiserror::Error;

/// An error produced by a running source, filter or sink.
///
/// Every variant is considered an internal/operational failure: by the time
/// a stage is running, its configuration has already been validated, so
/// nothing here is a user-fixable mistake.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("[{stage}] http request failed: {source}")]
    Http {
        stage: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("[{stage}] kafka error: {source}")]
    Kafka {
        stage: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },
    #[error("upstream reader thread failed: {0}")]
    ReaderFailed(String),
    #[error("[{stage}] {message}")]
    Internal { stage: String, message: String },
}

impl StageError {
    pub fn internal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Process exit codes, mirroring the original's `sys.exit` conventions:
/// `0` on a clean shutdown, `1` on a configuration/user error, `255` on an
/// unexpected internal failure.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_INTERNAL_ERROR: i32 = 255;
