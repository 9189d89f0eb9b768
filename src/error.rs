//! Error types for the compositor and its engine plumbing

use thiserror::Error;

/// Result type alias for webcell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in webcell
#[derive(Error, Debug)]
pub enum Error {
    /// No session is registered under the handle
    #[error("Session {0} not found")]
    UnknownHandle(i32),

    /// A resource has not been produced by the engine yet; retry after a tick
    #[error("{0}")]
    NotReady(String),

    /// Session creation rejected by the session limit
    #[error("Session limit reached: {0}")]
    SessionLimit(String),

    /// `init` called twice without an intervening `free`
    #[error("webcell is already initialized")]
    AlreadyInitialized,

    /// Boundary call made before `init`
    #[error("webcell is not initialized")]
    NotInitialized,

    /// Failed to initialize the engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Malformed command frame
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A caller broke a documented precondition. Programming error, never retried.
    #[error("Precondition violated: {0}")]
    PreconditionError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller is expected to retry after pumping the engine.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotReady(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
