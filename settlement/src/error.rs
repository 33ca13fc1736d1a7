//! Error types for settlement engine

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use ledger_core::TransferStatus;
use serde_json::json;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Debit larger than the current balance
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Credits requested
        required: i64,
        /// Credits available
        available: i64,
    },

    /// Transfer status change not admitted
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: TransferStatus,
        /// Requested status
        to: TransferStatus,
    },

    /// Unknown user, transfer or entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate user, wallet or primary wallet
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request deadline exceeded; nothing was committed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Store or transaction failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        use ledger_core::Error as L;

        match err {
            L::InvalidAmount(msg) => Error::Validation(msg),
            L::Validation(msg) => Error::Validation(msg),
            L::InsufficientBalance {
                required,
                available,
            } => Error::InsufficientBalance {
                required,
                available,
            },
            L::InvalidStateTransition { from, to } => Error::InvalidStateTransition { from, to },
            L::UserNotFound(id) => Error::NotFound(format!("user {}", id)),
            L::EntryNotFound(id) => Error::NotFound(format!("ledger entry {}", id)),
            L::TransferNotFound(id) => Error::NotFound(format!("transfer {}", id)),
            L::UserAlreadyExists(id) => Error::Conflict(format!("user {} already exists", id)),
            L::DuplicateWallet(address) => {
                Error::Conflict(format!("wallet {} already registered", address))
            }
            err @ L::DuplicatePrimaryWallet { .. } => Error::Conflict(err.to_string()),
            L::DeadlineExceeded(what) => Error::Timeout(what),
            L::Config(msg) => Error::Config(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        let message = if status_code.is_server_error() {
            tracing::error!(error = %self, kind = self.error_type(), "Request failed");
            match self {
                Error::Timeout(_) => "Request timed out".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidStateTransition { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Error {
    /// Machine-readable kind, used as the `type` of the error body
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Timeout(_) => "timeout",
            Error::Internal(_) => "internal_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
        }
    }

    /// True for the 400 class: surfaced verbatim, never retried
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
