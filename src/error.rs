use crate::config::ConfigError;
use thiserror::Error;

/// Categorizes errors for decision-making.
///
/// A lightweight, cloneable view of [`Error`] that collaborators can match on
/// without holding the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single connection attempt failed (refused, rejected, timed out)
    ConnectionFailed,
    /// The orchestrator channel is gone
    ChannelClosed,
    /// A coordination message could not be encoded or decoded
    Codec,
    /// Collaborator (handler or session) reported a failure
    Handler,
    /// Invalid configuration
    Config,
    /// I/O on the coordination transport
    Io,
    /// The runtime is shutting down
    ShuttingDown,
}

/// Errors that can occur in shard-runtime
#[derive(Error, Debug)]
pub enum Error {
    /// A connection attempt failed
    #[error("Connection attempt failed: {0}")]
    ConnectionFailed(String),

    /// A connection attempt did not complete in time
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The orchestrator channel was closed
    #[error("Orchestrator channel closed")]
    ChannelClosed,

    /// JSON encoding/decoding of a coordination message failed
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Collaborator error (user-defined)
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration rejected by validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Runtime is shutting down
    #[error("Runtime is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionFailed(_) | Error::ConnectTimeout(_) => ErrorKind::ConnectionFailed,
            Error::ChannelClosed => ErrorKind::ChannelClosed,
            Error::Codec(_) => ErrorKind::Codec,
            Error::Handler(_) => ErrorKind::Handler,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Returns `true` for failures the reconnect supervisor absorbs by retrying.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::ConnectionFailed
    }
}
