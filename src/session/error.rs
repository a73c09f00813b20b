//! Error taxonomy shared by the manager, every provider and every store.

/// Errors surfaced by session operations.
///
/// A missing session is never represented here: `read` lazily creates the
/// record instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed provider configuration string, manager config or duration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty, too short or otherwise unusable session identifier.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// The backend could not be reached or refused the operation.
    #[error("{backend} backend error: {message}")]
    Backend { backend: String, message: String },

    /// I/O failure from a filesystem-backed provider.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes could not be decoded into a session record.
    #[error("Corrupt session payload: {0}")]
    CorruptPayload(String),

    /// No provider registered under this name.
    #[error("Unknown session provider: {0} (forgot to register it?)")]
    UnknownProvider(String),

    /// A blocking backend call was aborted before it completed.
    #[error("Session operation cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn backend(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors caused by client input rather than the backend.
    pub fn is_invalid_session_id(&self) -> bool {
        matches!(self, Self::InvalidSessionId(_))
    }
}

impl From<rusqlite::Error> for SessionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::backend("sqlite", err)
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::backend("runtime", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
