//! Error types for the SFU client library
//!
//! Every public operation returns [`Result`]. Validation failures are split
//! into three families so callers can react without string matching:
//!
//! - [`Error::InvalidArgument`] - malformed or missing caller-supplied input
//! - [`Error::InvalidState`] - the operation is not valid in the current
//!   lifecycle state (unloaded device, closed transport or entity, ended track)
//! - [`Error::Unsupported`] - the operation is meaningless for the transport
//!   direction or media kind, or remote parameters cannot be received with the
//!   negotiated capabilities
//!
//! Errors raised by the media engine or the signaling channel are carried in
//! [`Error::Engine`] and [`Error::Signaling`] and reach the caller of the
//! triggering operation unchanged.

use thiserror::Error;

/// Result type for SFU client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SFU client
///
/// The type is `Clone` because one engine failure may have to be reported to
/// every operation of a batched dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed or missing caller-supplied input
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Operation invalid for the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Operation meaningless for the direction/kind, or incompatible parameters
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Failure reported by the media engine collaborator
    #[error("Media engine error: {message}")]
    Engine { message: String },

    /// Failure reported by the application's signaling channel
    #[error("Signaling error: {message}")]
    Signaling { message: String },

    /// Internal error (a queue worker or batch vanished)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create a media engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create a signaling error
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(format!("malformed JSON input: {}", err))
    }
}
