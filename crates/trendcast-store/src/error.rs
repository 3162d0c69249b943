use thiserror::Error;

/// Errors returned by a [`StatsStore`](crate::StatsStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity loss, refused connection, or timeout.
    #[error("stats store unavailable: {0}")]
    Unavailable(String),

    /// The store no longer holds the atomic script. It has been reloaded
    /// and the next call is expected to succeed.
    #[error("stats store script not loaded")]
    ScriptNotLoaded,

    /// The store cannot run server-side scripts or transactions.
    #[error("stats store does not support atomic scripts: {0}")]
    TransactionUnsupported(String),

    /// A stats entry could not be decoded.
    #[error("malformed stats entry for theme '{theme}': {reason}")]
    MalformedStatsEntry { theme: String, reason: String },

    #[error("stats store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// `true` for conditions that are expected to clear on their own.
    ///
    /// Malformed entries and missing script support will fail the same way
    /// on every attempt.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::ScriptNotLoaded)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::NoScriptError {
            return StoreError::ScriptNotLoaded;
        }
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            return StoreError::Unavailable(err.to_string());
        }
        let message = err.to_string();
        if message.to_ascii_lowercase().contains("unknown command") {
            return StoreError::TransactionUnsupported(message);
        }
        StoreError::Backend(message)
    }
}
