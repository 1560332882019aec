//! Top-level error handling shared by the whole workspace.
use thiserror::Error;

/// Error raised while loading or validating a pipeline configuration.
///
/// Covers everything a user can fix by editing their configuration: an
/// unknown module name, a schema violation (unknown or missing field), a
/// malformed glob pattern, a malformed date string. Always reported together
/// with the location of the offending pipeline item, mirroring the
/// `jsonschema`-validated, path-qualified messages of the original
/// `SentryModule.schema_validate`.
#[derive(Debug, Error)]
#[error("{location}: {message}")]
pub struct ConfigError {
    pub location: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
