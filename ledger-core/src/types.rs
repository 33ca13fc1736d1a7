//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Integer credits (no floating point)
//! - Exact decimals for NILA amounts

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum page size for list reads
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Default page size for list reads
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// User identifier (opaque, issued by the auth provider)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject empty, oversized or control-character ids
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        if self.0.len() > 128 {
            return Err(Error::Validation("user_id is too long".to_string()));
        }
        if self.0.chars().any(char::is_control) {
            return Err(Error::Validation(
                "user_id contains control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Credits bought through a completed purchase
    CreditPurchase,
    /// Credits consumed by a settlement to NILA
    SettlementUsed,
    /// Manual or compensating correction (refunds included)
    Adjustment,
}

impl EntryType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::CreditPurchase => "credit_purchase",
            EntryType::SettlementUsed => "settlement_used",
            EntryType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Owner
    pub user_id: UserId,

    /// Type of event
    pub transaction_type: EntryType,

    /// Signed credits (positive = credit, negative = debit)
    pub amount: i64,

    /// Balance immediately after this entry
    pub balance_after: i64,

    /// Free text
    pub description: String,

    /// Transfer or purchase that caused the entry
    pub reference_id: Option<String>,

    /// Position in the user's history (1-based, contiguous)
    pub sequence: u64,

    /// Write timestamp
    pub created_at: DateTime<Utc>,
}

/// Running-balance row, one per registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Owner
    pub user_id: UserId,

    /// Authoritative running balance
    pub balance: i64,

    /// Number of entries appended so far
    pub entry_count: u64,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,

    /// Last write timestamp
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Fresh account with a zero balance
    pub fn open(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            entry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the next entry on top of `balance`, advancing the account.
    ///
    /// `balance` comes from the configured calculator; the account row is
    /// brought in line with it. Fails if the result would go negative.
    pub fn next_entry(
        &mut self,
        balance: i64,
        transaction_type: EntryType,
        amount: i64,
        description: String,
        reference_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if amount == 0 {
            return Err(Error::InvalidAmount("amount must not be zero".to_string()));
        }

        let balance_after = balance
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount("balance overflow".to_string()))?;

        if balance_after < 0 {
            return Err(Error::InsufficientBalance {
                required: amount
                    .checked_neg()
                    .ok_or_else(|| Error::InvalidAmount("amount out of range".to_string()))?,
                available: balance,
            });
        }

        self.balance = balance_after;
        self.entry_count += 1;
        self.updated_at = now;

        Ok(LedgerEntry {
            id: Uuid::now_v7(),
            user_id: self.user_id.clone(),
            transaction_type,
            amount,
            balance_after,
            description,
            reference_id,
            sequence: self.entry_count,
            created_at: now,
        })
    }
}

/// Blockchain network a transfer is settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Polygon PoS
    Polygon,
    /// Ethereum mainnet
    Ethereum,
    /// Solana
    Solana,
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn is_base58(s: &str) -> bool {
    s.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn is_prefixed_hex(s: &str, digits: usize) -> bool {
    match s.strip_prefix("0x") {
        Some(hex) => hex.len() == digits && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

impl Network {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Polygon => "polygon",
            Network::Ethereum => "ethereum",
            Network::Solana => "solana",
        }
    }

    /// EVM networks share the 0x-hex address format
    pub fn is_evm(&self) -> bool {
        matches!(self, Network::Polygon | Network::Ethereum)
    }

    /// Check address format for this network
    pub fn is_valid_address(&self, address: &str) -> bool {
        if self.is_evm() {
            is_prefixed_hex(address, 40)
        } else {
            (32..=44).contains(&address.len()) && is_base58(address)
        }
    }

    /// Check transaction hash (EVM) or signature (Solana) format
    pub fn is_valid_tx_hash(&self, hash: &str) -> bool {
        if self.is_evm() {
            is_prefixed_hex(hash, 64)
        } else {
            (64..=88).contains(&hash.len()) && is_base58(hash)
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "polygon" => Ok(Network::Polygon),
            "ethereum" => Ok(Network::Ethereum),
            "solana" => Ok(Network::Solana),
            other => Err(Error::Validation(format!("unsupported network: {}", other))),
        }
    }
}

/// Transfer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Debit committed, awaiting admin action
    Pending,
    /// Admin is submitting the on-chain transfer
    Processing,
    /// On-chain transfer confirmed (terminal)
    Confirmed,
    /// On-chain transfer failed (terminal)
    Failed,
    /// Cancelled by an admin (terminal)
    Cancelled,
}

impl TransferStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Confirmed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Edges of the settlement state machine
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Processing, Confirmed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// Terminal states that hand the debited credits back
    pub fn releases_credits(&self) -> bool {
        matches!(self, TransferStatus::Failed | TransferStatus::Cancelled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TransferStatus::Pending),
            "processing" => Ok(TransferStatus::Processing),
            "confirmed" => Ok(TransferStatus::Confirmed),
            "failed" => Ok(TransferStatus::Failed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown transfer status: {}", other))),
        }
    }
}

/// Settlement of credits to an external NILA wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer ID
    pub id: Uuid,

    /// Owner of the debited credits
    pub user_id: UserId,

    /// Credits debited (positive)
    pub credits_used: i64,

    /// NILA to send (positive)
    pub nila_amount: Decimal,

    /// Target network
    pub network: Network,

    /// Target wallet
    pub wallet_address: String,

    /// On-chain hash, set once known
    pub transaction_hash: Option<String>,

    /// Lifecycle status
    pub status: TransferStatus,

    /// Admin who created or last finalized the transfer
    pub processed_by: String,

    /// Admin notes
    pub notes: Option<String>,

    /// Paired `settlement_used` entry
    pub ledger_entry_id: Uuid,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Set when a terminal status is reached
    pub processed_at: Option<DateTime<Utc>>,
}

/// Admin patch for a transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUpdate {
    /// Requested status
    pub status: Option<TransferStatus>,

    /// On-chain hash
    pub transaction_hash: Option<String>,

    /// Replacement notes
    pub notes: Option<String>,
}

impl TransferUpdate {
    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.transaction_hash.is_none() && self.notes.is_none()
    }
}

impl Transfer {
    /// Apply an admin patch under the state-machine rules.
    ///
    /// Nothing is mutated unless every check passes. Returns the previous
    /// status when the status changed.
    pub fn apply_update(
        &mut self,
        update: &TransferUpdate,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TransferStatus>> {
        if update.is_empty() {
            return Err(Error::Validation("update contains no changes".to_string()));
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(Error::InvalidStateTransition {
                    from: self.status,
                    to: next,
                });
            }
        }

        let hash = match update.transaction_hash.as_deref().map(str::trim) {
            Some("") => {
                return Err(Error::Validation(
                    "transaction_hash must not be empty".to_string(),
                ))
            }
            Some(hash) => {
                if !self.network.is_valid_tx_hash(hash) {
                    return Err(Error::Validation(format!(
                        "invalid {} transaction hash: {}",
                        self.network, hash
                    )));
                }
                if self.status.is_terminal() && self.transaction_hash.as_deref() != Some(hash) {
                    return Err(Error::Validation(format!(
                        "cannot change transaction hash of a {} transfer",
                        self.status
                    )));
                }
                Some(hash.to_string())
            }
            None => None,
        };

        if update.status == Some(TransferStatus::Confirmed)
            && hash.is_none()
            && self.transaction_hash.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::Validation(
                "transaction_hash is required to confirm a transfer".to_string(),
            ));
        }

        if hash.is_some() {
            self.transaction_hash = hash;
        }
        if let Some(notes) = &update.notes {
            self.notes = Some(notes.clone());
        }

        let previous = self.status;
        if let Some(next) = update.status {
            self.status = next;
            if next.is_terminal() {
                self.processed_at = Some(now);
                self.processed_by = admin_id.to_string();
            }
        }
        self.updated_at = now;

        Ok(update.status.map(|_| previous))
    }
}

/// User-owned payout address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    /// Wallet ID
    pub id: Uuid,

    /// Owner
    pub user_id: UserId,

    /// Network
    pub network: Network,

    /// Address
    pub address: String,

    /// Display label
    pub label: Option<String>,

    /// At most one primary per (user, network)
    pub is_primary: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Audit row for an administrative mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActivity {
    /// Activity ID (UUIDv7)
    pub id: Uuid,

    /// Acting admin
    pub admin_id: String,

    /// e.g. `settlement.initiated`
    pub action_type: String,

    /// e.g. `transfer`
    pub entity_type: String,

    /// ID of the touched entity
    pub entity_id: String,

    /// Free-form context
    pub metadata: serde_json::Value,

    /// State before the change
    pub old_values: Option<serde_json::Value>,

    /// State after the change
    pub new_values: Option<serde_json::Value>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number, starting at 1
    pub page: u32,
    /// Items per page
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Build and validate
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        let request = Self { page, limit };
        request.validate()?;
        Ok(request)
    }

    /// Page >= 1, limit in 1..=MAX_PAGE_LIMIT
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::Validation("page must be >= 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(())
    }

    /// Items to skip
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

/// One page of a list read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Page number
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Total items across all pages
    pub total: u64,
}

/// Transfer list filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    /// Only this user's transfers
    pub user_id: Option<UserId>,
    /// Only transfers in this status
    pub status: Option<TransferStatus>,
}

impl TransferFilter {
    /// Whether the transfer passes the filter
    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == transfer.user_id)
            && self.status.map_or(true, |s| s == transfer.status)
    }
}
