//! Credit Settlement Engine
//!
//! Converts user credits into NILA transfers on external networks.
//!
//! # Architecture
//!
//! 1. **Validation**: amounts, admin identity, wallet format per network
//! 2. **Settlement**: the ledger writer debits credits and creates the
//!    transfer in one atomic batch
//! 3. **Lifecycle**: admins move transfers through
//!    `pending → processing → confirmed | failed | cancelled`
//! 4. **Audit**: every admin mutation is recorded, best effort
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Config, SettlementEngine, SettlementRequest};
//! use ledger_core::{Network, UserId};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let engine = SettlementEngine::open(&Config::default()).await?;
//!
//!     let result = engine
//!         .initiate_settlement(
//!             "admin-1",
//!             SettlementRequest {
//!                 user_id: UserId::new("user-1"),
//!                 credits_used: 40,
//!                 nila_amount: Decimal::new(4, 0),
//!                 network: Network::Polygon,
//!                 wallet_address: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
//!                 notes: None,
//!             },
//!         )
//!         .await?;
//!     println!("balance after: {}", result.credit_balance_after);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod api;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod retry;

// Re-exports
pub use audit::{ActivityEntry, ActivityRecorder, LedgerActivityRecorder};
pub use config::Config;
pub use engine::{SettlementEngine, SettlementRequest, SettlementResult, WalletRequest};
pub use error::{Error, Result};
