use dotvvm_core::{CommandError, CompilationError, SerializationError};
use thiserror::Error;

/// Failure of a pipeline stage. Returned to the host unchanged; the host
/// decides how to report it (see [`DotvvmError::status_code`]).
#[derive(Debug, Error)]
pub enum DotvvmError {
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("resource '{0}' depends on itself")]
    ResourceCycle(String),

    #[error("command '{command}' is not bound in view '{view}'")]
    CommandNotInView { command: String, view: String },

    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl DotvvmError {
    /// HTTP status a host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Serialization(_) | Self::CommandNotInView { .. } | Self::BadRequest(_) => 400,
            Self::Command(CommandError::UnknownCommand(_) | CommandError::InvalidArguments { .. }) => 400,
            Self::Command(CommandError::Serialization(_)) => 400,
            Self::Compilation(CompilationError::ViewNotFound(_)) => 404,
            _ => 500,
        }
    }
}

/// Failure of a client-side postback or SPA navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostbackError {
    /// A `spaNavigating` handler canceled the navigation.
    #[error("the navigation was canceled by an event handler")]
    Event,

    #[error("network request failed: {0}")]
    Network(String),

    #[error("postbacks are disabled while a navigation is in progress")]
    GateClosed,

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid server response: {0}")]
    InvalidResponse(String),
}

impl PostbackError {
    /// Type tag exposed to script code, e.g. `"event"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Network(_) => "network",
            Self::GateClosed => "gateClosed",
            Self::Server { .. } => "serverError",
            Self::InvalidResponse(_) => "invalidResponse",
        }
    }
}
