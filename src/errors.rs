//! Typed error hierarchy.
//!
//! - `BackendError`: a request to the deployment backend failed
//! - `LifecycleError`: the controller refused to start an operation
//! - `SessionError`: login or session verification failed

use thiserror::Error;

use crate::domain::model::{Action, AppId, AppStatus, Operation};

/// Failures of a single backend request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Credential rejected by backend")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected response from backend: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized)
    }

    /// True when the backend answered with a non-2xx status.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            BackendError::Unauthorized
                | BackendError::Validation(_)
                | BackendError::Rejected { .. }
        )
    }
}

/// Reasons the Lifecycle Controller refuses an action before any request is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Application {0} not found")]
    NotFound(AppId),

    #[error("Application {id} is busy: {operation} in progress")]
    Busy { id: AppId, operation: Operation },

    #[error("Cannot {action} an application in status {status}")]
    InvalidTransition { action: Action, status: AppStatus },

    #[error("{0}")]
    Validation(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unknown or expired delete confirmation")]
    UnknownConfirmation,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
