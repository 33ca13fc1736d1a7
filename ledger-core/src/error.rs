//! Error types for the ledger

use crate::types::TransferStatus;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding error (activity rows)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zero or out-of-range amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed request (empty ids, bad pagination, bad hash...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// User has no account row
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// User already registered
    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    /// Ledger entry not found
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(String),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    /// Debit larger than the current balance
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Credits requested
        required: i64,
        /// Credits available
        available: i64,
    },

    /// Transfer status change not admitted by the state machine
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: TransferStatus,
        /// Requested status
        to: TransferStatus,
    },

    /// A primary wallet already exists for this (user, network)
    #[error("Duplicate primary wallet for user {user_id} on {network}")]
    DuplicatePrimaryWallet {
        /// Owner
        user_id: String,
        /// Network name
        network: String,
    },

    /// Same address already registered for this (user, network)
    #[error("Wallet address already registered: {0}")]
    DuplicateWallet(String),

    /// Command deadline passed before commit
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Invariant violation (balance chain, pairing, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Store failures that leave nothing committed and may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
