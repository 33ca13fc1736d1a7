//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task owns every balance-affecting write
//! - Each command runs read-check-write to completion before the next one
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        SettlementEngine / HTTP handlers               │
//! │            many concurrent requests                   │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends commands to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  balance = calculator.balance(account)                │
//! │  check sufficiency / state machine                    │
//! │  Storage::commit(WriteSet)  (one RocksDB WriteBatch)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Reads for display do not go through the actor; they hit RocksDB
//! directly and may trail an in-flight command.

use crate::{
    balance::BalanceCalculator,
    metrics::Metrics,
    storage::WriteSet,
    types::{
        EntryType, LedgerEntry, Network, Transfer, TransferStatus, TransferUpdate, UserAccount,
        UserId, WalletAddress,
    },
    Error, Result, Storage,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Ledger append request
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Owner
    pub user_id: UserId,
    /// Entry type
    pub transaction_type: EntryType,
    /// Signed credits
    pub amount: i64,
    /// Free text
    pub description: String,
    /// Causing transfer / purchase
    pub reference_id: Option<String>,
}

/// Settlement request as seen by the writer
#[derive(Debug, Clone)]
pub struct SettlementDraft {
    /// Pre-allocated so a retried command is recognized
    pub transfer_id: Uuid,
    /// Initiating admin
    pub admin_id: String,
    /// Owner of the credits
    pub user_id: UserId,
    /// Credits to debit
    pub credits_used: i64,
    /// NILA to send
    pub nila_amount: Decimal,
    /// Target network
    pub network: Network,
    /// Target wallet
    pub wallet_address: String,
    /// Admin notes
    pub notes: Option<String>,
}

impl SettlementDraft {
    /// Input checks that need no stored state
    pub fn validate(&self) -> Result<()> {
        if self.admin_id.trim().is_empty() {
            return Err(Error::Validation("admin_id must not be empty".to_string()));
        }
        self.user_id.validate()?;
        if self.credits_used <= 0 {
            return Err(Error::InvalidAmount(
                "credits_used must be greater than zero".to_string(),
            ));
        }
        if self.nila_amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(
                "nila_amount must be greater than zero".to_string(),
            ));
        }
        if !self.network.is_valid_address(&self.wallet_address) {
            return Err(Error::Validation(format!(
                "invalid {} wallet address: {}",
                self.network, self.wallet_address
            )));
        }
        Ok(())
    }
}

/// Committed settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Created transfer (status pending)
    pub transfer: Transfer,
    /// Paired `settlement_used` entry
    pub entry: LedgerEntry,
    /// Balance before the debit
    pub balance_before: i64,
    /// Balance after the debit
    pub balance_after: i64,
}

/// Committed transfer update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferChange {
    /// Transfer before the update
    pub before: Transfer,
    /// Transfer after the update
    pub after: Transfer,
    /// Compensating entry when credits were released
    pub refund: Option<LedgerEntry>,
}

/// Wallet registration request
#[derive(Debug, Clone)]
pub struct WalletDraft {
    /// Owner
    pub user_id: UserId,
    /// Network
    pub network: Network,
    /// Address
    pub address: String,
    /// Display label
    pub label: Option<String>,
    /// Primary for (user, network)
    pub is_primary: bool,
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Open a zero-balance account
    RegisterUser {
        user_id: UserId,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<UserAccount>>,
    },

    /// Append a ledger entry
    AppendEntry {
        draft: EntryDraft,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<LedgerEntry>>,
    },

    /// Debit credits and create the paired transfer
    Settle {
        draft: SettlementDraft,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<SettlementReceipt>>,
    },

    /// Move a transfer through the state machine
    UpdateTransfer {
        transfer_id: Uuid,
        update: TransferUpdate,
        admin_id: String,
        refund_released: bool,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<TransferChange>>,
    },

    /// Register a payout address
    AddWallet {
        draft: WalletDraft,
        deadline: Option<Instant>,
        response: oneshot::Sender<Result<WalletAddress>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns all ledger writes
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Balance source consulted before every write
    calculator: Arc<dyn BalanceCalculator>,

    /// Metrics
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        calculator: Arc<dyn BalanceCalculator>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            calculator,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        tracing::info!(calculator = self.calculator.name(), "Ledger writer started");

        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }

        tracing::info!("Ledger writer stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::RegisterUser {
                user_id,
                deadline,
                response,
            } => {
                let _ = response.send(self.register_user(user_id, deadline));
            }

            LedgerMessage::AppendEntry {
                draft,
                deadline,
                response,
            } => {
                let _ = response.send(self.append_entry(draft, deadline));
            }

            LedgerMessage::Settle {
                draft,
                deadline,
                response,
            } => {
                let result = self.settle(draft, deadline);
                if result.is_err() {
                    self.metrics.record_settlement_rejection();
                }
                let _ = response.send(result);
            }

            LedgerMessage::UpdateTransfer {
                transfer_id,
                update,
                admin_id,
                refund_released,
                deadline,
                response,
            } => {
                let result =
                    self.update_transfer(transfer_id, update, &admin_id, refund_released, deadline);
                let _ = response.send(result);
            }

            LedgerMessage::AddWallet {
                draft,
                deadline,
                response,
            } => {
                let _ = response.send(self.add_wallet(draft, deadline));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn commit(&self, set: &WriteSet) -> Result<()> {
        let started = Instant::now();
        self.storage.commit(set)?;
        self.metrics
            .record_commit_duration(started.elapsed().as_secs_f64());
        self.metrics.record_entries(set.entries.len());
        Ok(())
    }

    fn check_deadline(deadline: Option<Instant>, what: &str) -> Result<()> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::DeadlineExceeded(what.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn register_user(&self, user_id: UserId, deadline: Option<Instant>) -> Result<UserAccount> {
        Self::check_deadline(deadline, "user registration")?;
        user_id.validate()?;
        if self.storage.get_account(&user_id)?.is_some() {
            return Err(Error::UserAlreadyExists(user_id.to_string()));
        }

        let account = UserAccount::open(user_id, Utc::now());
        Self::check_deadline(deadline, "user registration")?;
        self.commit(&WriteSet {
            accounts: vec![account.clone()],
            ..Default::default()
        })?;

        tracing::info!(user_id = %account.user_id, "User registered");
        Ok(account)
    }

    fn append_entry(&self, draft: EntryDraft, deadline: Option<Instant>) -> Result<LedgerEntry> {
        Self::check_deadline(deadline, "ledger append")?;
        let mut account = self.storage.require_account(&draft.user_id)?;
        let balance = self.calculator.balance(&self.storage, &account)?;

        let entry = account.next_entry(
            balance,
            draft.transaction_type,
            draft.amount,
            draft.description,
            draft.reference_id,
            Utc::now(),
        )?;

        Self::check_deadline(deadline, "ledger append")?;
        self.commit(&WriteSet {
            accounts: vec![account],
            entries: vec![entry.clone()],
            ..Default::default()
        })?;

        tracing::info!(
            user_id = %entry.user_id,
            entry_id = %entry.id,
            transaction_type = %entry.transaction_type,
            amount = entry.amount,
            balance_after = entry.balance_after,
            "Ledger entry appended"
        );
        Ok(entry)
    }

    fn settle(&self, draft: SettlementDraft, deadline: Option<Instant>) -> Result<SettlementReceipt> {
        Self::check_deadline(deadline, "settlement")?;
        draft.validate()?;

        if let Some(existing) = self.storage.find_transfer(draft.transfer_id)? {
            // Retry of a command that already committed
            let entry = self.storage.get_entry(existing.ledger_entry_id)?;
            tracing::info!(transfer_id = %existing.id, "Settlement already committed, replaying receipt");
            return Ok(SettlementReceipt {
                balance_before: entry.balance_after - entry.amount,
                balance_after: entry.balance_after,
                transfer: existing,
                entry,
            });
        }

        let mut account = self.storage.require_account(&draft.user_id)?;
        let balance_before = self.calculator.balance(&self.storage, &account)?;

        if balance_before < draft.credits_used {
            tracing::warn!(
                user_id = %draft.user_id,
                required = draft.credits_used,
                available = balance_before,
                "Settlement rejected: insufficient balance"
            );
            return Err(Error::InsufficientBalance {
                required: draft.credits_used,
                available: balance_before,
            });
        }

        let now = Utc::now();
        let entry = account.next_entry(
            balance_before,
            EntryType::SettlementUsed,
            -draft.credits_used,
            format!(
                "Settlement of {} credits to {} NILA on {}",
                draft.credits_used, draft.nila_amount, draft.network
            ),
            Some(draft.transfer_id.to_string()),
            now,
        )?;

        let transfer = Transfer {
            id: draft.transfer_id,
            user_id: draft.user_id,
            credits_used: draft.credits_used,
            nila_amount: draft.nila_amount,
            network: draft.network,
            wallet_address: draft.wallet_address,
            transaction_hash: None,
            status: TransferStatus::Pending,
            processed_by: draft.admin_id,
            notes: draft.notes,
            ledger_entry_id: entry.id,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };

        Self::check_deadline(deadline, "settlement")?;
        self.commit(&WriteSet {
            accounts: vec![account],
            entries: vec![entry.clone()],
            transfers: vec![transfer.clone()],
            ..Default::default()
        })?;
        self.metrics.record_settlement();

        tracing::info!(
            transfer_id = %transfer.id,
            user_id = %transfer.user_id,
            credits_used = transfer.credits_used,
            balance_before,
            balance_after = entry.balance_after,
            "Settlement committed"
        );

        Ok(SettlementReceipt {
            balance_after: entry.balance_after,
            balance_before,
            transfer,
            entry,
        })
    }

    fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: TransferUpdate,
        admin_id: &str,
        refund_released: bool,
        deadline: Option<Instant>,
    ) -> Result<TransferChange> {
        Self::check_deadline(deadline, "transfer update")?;
        if admin_id.trim().is_empty() {
            return Err(Error::Validation("admin_id must not be empty".to_string()));
        }

        let before = self.storage.get_transfer(transfer_id)?;
        let mut after = before.clone();
        let now = Utc::now();
        let previous = after.apply_update(&update, admin_id, now)?;

        let mut set = WriteSet::default();
        let mut refund = None;

        if previous.is_some() && refund_released && after.status.releases_credits() {
            let mut account = self.storage.require_account(&after.user_id)?;
            let balance = self.calculator.balance(&self.storage, &account)?;
            let entry = account.next_entry(
                balance,
                EntryType::Adjustment,
                after.credits_used,
                format!("Refund for {} settlement {}", after.status, after.id),
                Some(after.id.to_string()),
                now,
            )?;
            set.accounts.push(account);
            set.entries.push(entry.clone());
            refund = Some(entry);
        }
        set.transfers.push(after.clone());

        Self::check_deadline(deadline, "transfer update")?;
        self.commit(&set)?;

        if let Some(from) = previous {
            self.metrics.record_transition();
            tracing::info!(
                transfer_id = %after.id,
                from = %from,
                to = %after.status,
                admin_id,
                refunded = refund.is_some(),
                "Transfer status changed"
            );
        }

        Ok(TransferChange {
            before,
            after,
            refund,
        })
    }

    fn add_wallet(&self, draft: WalletDraft, deadline: Option<Instant>) -> Result<WalletAddress> {
        Self::check_deadline(deadline, "wallet registration")?;
        self.storage.require_account(&draft.user_id)?;

        let address = draft.address.trim().to_string();
        if !draft.network.is_valid_address(&address) {
            return Err(Error::Validation(format!(
                "invalid {} wallet address: {}",
                draft.network, address
            )));
        }

        let existing = self.storage.list_wallets(&draft.user_id)?;
        let same_address = |w: &WalletAddress| {
            if draft.network.is_evm() {
                w.address.eq_ignore_ascii_case(&address)
            } else {
                w.address == address
            }
        };

        if existing
            .iter()
            .any(|w| w.network == draft.network && same_address(w))
        {
            return Err(Error::DuplicateWallet(address));
        }
        if draft.is_primary
            && existing
                .iter()
                .any(|w| w.network == draft.network && w.is_primary)
        {
            return Err(Error::DuplicatePrimaryWallet {
                user_id: draft.user_id.to_string(),
                network: draft.network.to_string(),
            });
        }

        let wallet = WalletAddress {
            id: Uuid::now_v7(),
            user_id: draft.user_id,
            network: draft.network,
            address,
            label: draft.label,
            is_primary: draft.is_primary,
            created_at: Utc::now(),
        };

        Self::check_deadline(deadline, "wallet registration")?;
        self.commit(&WriteSet {
            wallets: vec![wallet.clone()],
            ..Default::default()
        })?;

        tracing::info!(
            user_id = %wallet.user_id,
            wallet_id = %wallet.id,
            network = %wallet.network,
            "Wallet added"
        );
        Ok(wallet)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Register a user
    pub async fn register_user(
        &self,
        user_id: UserId,
        deadline: Option<Instant>,
    ) -> Result<UserAccount> {
        self.call(|response| LedgerMessage::RegisterUser {
            user_id,
            deadline,
            response,
        })
        .await
    }

    /// Append an entry
    pub async fn append_entry(
        &self,
        draft: EntryDraft,
        deadline: Option<Instant>,
    ) -> Result<LedgerEntry> {
        self.call(|response| LedgerMessage::AppendEntry {
            draft,
            deadline,
            response,
        })
        .await
    }

    /// Debit and create transfer atomically
    pub async fn settle(
        &self,
        draft: SettlementDraft,
        deadline: Option<Instant>,
    ) -> Result<SettlementReceipt> {
        self.call(|response| LedgerMessage::Settle {
            draft,
            deadline,
            response,
        })
        .await
    }

    /// Apply a transfer update
    pub async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: TransferUpdate,
        admin_id: String,
        refund_released: bool,
        deadline: Option<Instant>,
    ) -> Result<TransferChange> {
        self.call(|response| LedgerMessage::UpdateTransfer {
            transfer_id,
            update,
            admin_id,
            refund_released,
            deadline,
            response,
        })
        .await
    }

    /// Register a wallet
    pub async fn add_wallet(
        &self,
        draft: WalletDraft,
        deadline: Option<Instant>,
    ) -> Result<WalletAddress> {
        self.call(|response| LedgerMessage::AddWallet {
            draft,
            deadline,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    calculator: Arc<dyn BalanceCalculator>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, calculator, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::RunningBalance;
    use crate::Config;
    use std::time::Duration;

    const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn spawn_test_actor() -> (LedgerHandle, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_ledger_actor(
            storage.clone(),
            Arc::new(RunningBalance),
            Metrics::new().unwrap(),
            16,
        );
        (handle, storage, temp_dir)
    }

    fn purchase(user: &str, credits: i64) -> EntryDraft {
        EntryDraft {
            user_id: UserId::new(user),
            transaction_type: EntryType::CreditPurchase,
            amount: credits,
            description: "credit pack".to_string(),
            reference_id: None,
        }
    }

    fn settlement(user: &str, credits: i64) -> SettlementDraft {
        SettlementDraft {
            transfer_id: Uuid::now_v7(),
            admin_id: "admin-1".to_string(),
            user_id: UserId::new(user),
            credits_used: credits,
            nila_amount: Decimal::new(5, 0),
            network: Network::Polygon,
            wallet_address: WALLET.to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _storage, _temp) = spawn_test_actor();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_and_append() {
        let (handle, storage, _temp) = spawn_test_actor();

        handle.register_user(UserId::new("u1"), None).await.unwrap();
        assert!(matches!(
            handle.register_user(UserId::new("u1"), None).await,
            Err(Error::UserAlreadyExists(_))
        ));

        let entry = handle.append_entry(purchase("u1", 100), None).await.unwrap();
        assert_eq!(entry.balance_after, 100);
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 100);

        assert!(matches!(
            handle.append_entry(purchase("ghost", 100), None).await,
            Err(Error::UserNotFound(_))
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_debits_and_pairs() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();

        let receipt = handle.settle(settlement("u1", 40), None).await.unwrap();
        assert_eq!(receipt.balance_before, 100);
        assert_eq!(receipt.balance_after, 60);
        assert_eq!(receipt.transfer.status, TransferStatus::Pending);
        assert_eq!(receipt.transfer.ledger_entry_id, receipt.entry.id);
        assert_eq!(receipt.entry.amount, -receipt.transfer.credits_used);

        let stored = storage.get_transfer(receipt.transfer.id).unwrap();
        assert_eq!(stored, receipt.transfer);

        let err = handle.settle(settlement("u1", 70), None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance {
                required: 70,
                available: 60
            }
        ));
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 60);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent_per_transfer_id() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();

        let draft = settlement("u1", 30);
        let first = handle.settle(draft.clone(), None).await.unwrap();
        let replay = handle.settle(draft, None).await.unwrap();

        assert_eq!(first, replay);
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 70);
        assert_eq!(storage.user_entries(&UserId::new("u1")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_writes_nothing() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();

        let expired = Instant::now() - Duration::from_millis(1);
        let draft = settlement("u1", 10);
        let transfer_id = draft.transfer_id;
        let err = handle.settle(draft, Some(expired)).await.unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert!(storage.find_transfer(transfer_id).unwrap().is_none());
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_plain_writes() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();

        let expired = Some(Instant::now() - Duration::from_millis(1));

        assert!(matches!(
            handle.append_entry(purchase("u1", 50), expired).await,
            Err(Error::DeadlineExceeded(_))
        ));
        assert!(matches!(
            handle.register_user(UserId::new("u2"), expired).await,
            Err(Error::DeadlineExceeded(_))
        ));
        let wallet = WalletDraft {
            user_id: UserId::new("u1"),
            network: Network::Polygon,
            address: WALLET.to_string(),
            label: None,
            is_primary: true,
        };
        assert!(matches!(
            handle.add_wallet(wallet, expired).await,
            Err(Error::DeadlineExceeded(_))
        ));

        let account = storage.require_account(&UserId::new("u1")).unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.entry_count, 1);
        assert!(storage.get_account(&UserId::new("u2")).unwrap().is_none());
        assert!(storage.list_wallets(&UserId::new("u1")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_min_adjustment_rejected_and_writer_survives() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();

        let draft = EntryDraft {
            transaction_type: EntryType::Adjustment,
            amount: i64::MIN,
            ..purchase("u1", 1)
        };
        assert!(matches!(
            handle.append_entry(draft, None).await,
            Err(Error::InvalidAmount(_))
        ));

        let entry = handle.append_entry(purchase("u1", 5), None).await.unwrap();
        assert_eq!(entry.balance_after, 105);
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 105);
    }

    #[tokio::test]
    async fn test_cancel_refunds_when_enabled() {
        let (handle, storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();
        handle.append_entry(purchase("u1", 100), None).await.unwrap();
        let receipt = handle.settle(settlement("u1", 40), None).await.unwrap();

        let change = handle
            .update_transfer(
                receipt.transfer.id,
                TransferUpdate {
                    status: Some(TransferStatus::Cancelled),
                    ..Default::default()
                },
                "admin-2".to_string(),
                true,
                None,
            )
            .await
            .unwrap();

        assert_eq!(change.before.status, TransferStatus::Pending);
        assert_eq!(change.after.status, TransferStatus::Cancelled);
        let refund = change.refund.unwrap();
        assert_eq!(refund.transaction_type, EntryType::Adjustment);
        assert_eq!(refund.amount, 40);
        assert_eq!(storage.require_account(&UserId::new("u1")).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_wallet_conflicts() {
        let (handle, _storage, _temp) = spawn_test_actor();
        handle.register_user(UserId::new("u1"), None).await.unwrap();

        let draft = |address: &str, is_primary: bool| WalletDraft {
            user_id: UserId::new("u1"),
            network: Network::Ethereum,
            address: address.to_string(),
            label: None,
            is_primary,
        };

        handle.add_wallet(draft(WALLET, true), None).await.unwrap();
        assert!(matches!(
            handle.add_wallet(draft(&WALLET.to_lowercase(), false), None).await,
            Err(Error::DuplicateWallet(_))
        ));
        assert!(matches!(
            handle
                .add_wallet(draft("0x000000000000000000000000000000000000dEaD", true), None)
                .await,
            Err(Error::DuplicatePrimaryWallet { .. })
        ));
        handle
            .add_wallet(draft("0x000000000000000000000000000000000000dEaD", false), None)
            .await
            .unwrap();
    }
}
