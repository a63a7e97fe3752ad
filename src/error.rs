use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dto::ws::ServerMessage,
    state::{lifecycle::InvalidTransition, question::QuestionError, session::SessionError},
};

/// Message sent in place of internal error details.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Coarse classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad command, question id or option selection.
    Validation,
    /// Login state or quiz state forbids the command.
    Session,
    /// The applicable time budget is used up.
    TimeExhausted,
    /// Unexpected failure while processing.
    Internal,
}

/// Errors that can occur while dispatching a client request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request type is not part of the protocol.
    #[error("Unknown command")]
    UnknownCommand,
    /// The frame could not be decoded.
    #[error("Malformed request")]
    MalformedRequest,
    /// Invalid input provided by the client.
    #[error("{0}")]
    InvalidInput(String),
    /// Question or answer content was rejected.
    #[error(transparent)]
    Question(#[from] QuestionError),
    /// Credentials were rejected.
    #[error("{0}")]
    LoginFailed(String),
    /// Session registry refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Operation cannot be performed in the current quiz state.
    #[error("{0}")]
    InvalidState(String),
    /// No time is left for the operation.
    #[error("{0}")]
    TimeExhausted(String),
    /// Unexpected failure; details are logged, never sent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCommand
            | Self::MalformedRequest
            | Self::InvalidInput(_)
            | Self::Question(_) => ErrorKind::Validation,
            Self::LoginFailed(_) | Self::Session(_) | Self::InvalidState(_) => ErrorKind::Session,
            Self::TimeExhausted(_) => ErrorKind::TimeExhausted,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error answers a login attempt.
    fn is_login_failure(&self) -> bool {
        matches!(
            self,
            Self::LoginFailed(_)
                | Self::Session(
                    SessionError::AlreadyLoggedIn(_) | SessionError::ConnectionAlreadyLoggedIn
                )
        )
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

impl From<ServiceError> for ServerMessage {
    fn from(err: ServiceError) -> Self {
        if err.is_login_failure() {
            return ServerMessage::LoginFail {
                reason: err.to_string(),
            };
        }
        match err.kind() {
            ErrorKind::Internal => ServerMessage::error(INTERNAL_ERROR_MESSAGE),
            _ => ServerMessage::error(err.to_string()),
        }
    }
}
