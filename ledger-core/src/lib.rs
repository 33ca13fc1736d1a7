//! Credits Ledger Core
//!
//! Append-only credit ledger with a single-writer settlement path.
//!
//! # Architecture
//!
//! - **Append-only entries**: Balance is the sum of a user's entries
//! - **Single Writer**: One logical writer task eliminates lost updates
//! - **Atomic commits**: Entry, running balance and transfer share one RocksDB batch
//! - **Two calculators**: Running-balance field or full replay, chosen by config
//!
//! # Invariants
//!
//! - Balance never negative after a committed write
//! - Every settlement debit is paired with exactly one transfer
//! - `balance_after` of the newest entry equals the running balance
//! - Transfer status only moves along the allowed transitions

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod balance;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use actor::{EntryDraft, SettlementDraft, SettlementReceipt, TransferChange, WalletDraft};
pub use balance::{BalanceCalculator, BalanceReport, ReplayBalance, RunningBalance};
pub use config::{BalanceMode, Config};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::{Storage, StorageStats};
pub use types::{
    AdminActivity, EntryType, LedgerEntry, Network, Page, PageRequest, Transfer, TransferFilter,
    TransferStatus, TransferUpdate, UserAccount, UserId, WalletAddress,
};
