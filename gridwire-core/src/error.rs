//! Error types for gridwire operations.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::protocol::error_codes;

/// The main error type for gridwire operations.
#[derive(Debug, Error)]
pub enum GridError {
    /// Socket-level failures (connect, read, write).
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection carrying an invocation closed before a response arrived.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Malformed frames or messages, including missing or mismatched markers.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An error response decoded from the server.
    #[error("server error: {0}")]
    Server(ServerError),

    /// Invocation deadline exceeded.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The invocation was cancelled by its caller.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// No connection is available for the requested target.
    #[error("routing error: {0}")]
    Routing(String),

    /// The client has been shut down or is not yet started.
    #[error("client not active: {0}")]
    ClientNotActive(String),

    /// Authentication was rejected by the member.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GridError {
    /// Returns `true` if an invocation failing with this error may be retried
    /// against a freshly selected target.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ConnectionClosed(_) | Self::Io(_) | Self::Routing(_) => true,
            Self::Server(err) => err.is_retryable(),
            Self::Protocol(_)
            | Self::Timeout(_)
            | Self::Cancelled(_)
            | Self::ClientNotActive(_)
            | Self::Authentication(_)
            | Self::Serialization(_)
            | Self::Configuration(_) => false,
        }
    }

    /// Returns `true` if the error was raised because the underlying
    /// connection went away.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed(_) | Self::Io(_))
    }
}

/// An application-level error reported by a cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    code: i32,
    class_name: String,
    message: Option<String>,
    stack_trace: Vec<String>,
}

impl ServerError {
    /// Creates a server error from the decoded error holder fields.
    pub fn new(code: i32, class_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            code,
            class_name: class_name.into(),
            message,
            stack_trace: Vec::new(),
        }
    }

    /// Attaches the server-side stack trace.
    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    /// Returns the protocol error code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the server-side exception class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the server-side stack trace lines.
    pub fn stack_trace(&self) -> &[String] {
        &self.stack_trace
    }

    /// Returns `true` if the server marked the failure as transient.
    pub fn is_retryable(&self) -> bool {
        error_codes::is_retryable(self.code)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} (code {}): {}", self.class_name, self.code, message),
            None => write!(f, "{} (code {})", self.class_name, self.code),
        }
    }
}

impl From<ServerError> for GridError {
    fn from(err: ServerError) -> Self {
        Self::Server(err)
    }
}

/// A specialized `Result` type for gridwire operations.
pub type Result<T> = std::result::Result<T, GridError>;
