use std::time::Duration;

/// Error type for Backend Client operations.
///
/// These never escape [`ObjectCache`](crate::ObjectCache): the engine records
/// them, moves to degraded mode and keeps serving from the memory layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Connecting, authenticating or selecting the database failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend did not answer within the configured timeout.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The backend rejected or failed a command.
    #[error("{op} failed: {message}")]
    Command { op: &'static str, message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create a new command error.
    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        BackendError::Command {
            op,
            message: message.into(),
        }
    }

    /// Whether the error means the connection itself is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BackendError::Connection(_) | BackendError::Timeout { .. }
        )
    }

    /// Classify a Redis error raised by `op`.
    pub fn redis(op: &'static str, err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            BackendError::Connection(format!("{op}: {err}"))
        } else {
            BackendError::command(op, err.to_string())
        }
    }
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        BackendError::redis("redis", err)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Error type for loading cache configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration source could not be read or deserialized.
    #[error("failed to load cache configuration: {0}")]
    Load(#[from] config::ConfigError),
}
