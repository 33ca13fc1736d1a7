//! Main ledger orchestration layer
//!
//! This module ties together storage, the balance calculator and the
//! writer actor into a high-level API for credit accounting.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, UserId};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let user = UserId::new("user-1");
//!     ledger.register_user(user.clone(), None).await?;
//!     ledger.complete_purchase(&user, 100, Some("order-1".to_string())).await?;
//!
//!     assert_eq!(ledger.get_balance(&user)?, 100);
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{
        spawn_ledger_actor, EntryDraft, LedgerHandle, SettlementDraft, SettlementReceipt,
        TransferChange, WalletDraft,
    },
    balance::{self, calculator_for, BalanceCalculator, BalanceReport},
    metrics::Metrics,
    storage::StorageStats,
    types::{
        AdminActivity, EntryType, LedgerEntry, Page, PageRequest, Transfer, TransferFilter,
        TransferUpdate, UserAccount, UserId, WalletAddress,
    },
    Config, Error, Result, Storage,
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Configured balance source
    calculator: Arc<dyn BalanceCalculator>,

    /// Metrics shared with the actor
    metrics: Metrics,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let calculator = calculator_for(config.balance.mode);
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;

        let handle = spawn_ledger_actor(
            storage.clone(),
            calculator.clone(),
            metrics.clone(),
            config.writer.mailbox_capacity,
        );

        tracing::info!(
            service = %config.service_name,
            balance_mode = calculator.name(),
            "Ledger opened"
        );

        Ok(Self {
            handle,
            storage,
            calculator,
            metrics,
        })
    }

    /// Open a zero-balance account
    ///
    /// Nothing is written once `deadline` has passed.
    pub async fn register_user(
        &self,
        user_id: UserId,
        deadline: Option<Instant>,
    ) -> Result<UserAccount> {
        self.handle.register_user(user_id, deadline).await
    }

    /// Append an entry through the single writer
    ///
    /// Nothing is written once `deadline` has passed.
    pub async fn append_entry(
        &self,
        draft: EntryDraft,
        deadline: Option<Instant>,
    ) -> Result<LedgerEntry> {
        self.handle.append_entry(draft, deadline).await
    }

    /// Record a completed credit purchase
    pub async fn complete_purchase(
        &self,
        user_id: &UserId,
        credits: i64,
        reference_id: Option<String>,
    ) -> Result<LedgerEntry> {
        if credits <= 0 {
            return Err(Error::InvalidAmount(
                "purchased credits must be greater than zero".to_string(),
            ));
        }

        self.append_entry(
            EntryDraft {
                user_id: user_id.clone(),
                transaction_type: EntryType::CreditPurchase,
                amount: credits,
                description: format!("Purchase of {} credits", credits),
                reference_id,
            },
            None,
        )
        .await
    }

    /// Current balance via the configured calculator
    ///
    /// Not linearized with in-flight writes.
    pub fn get_balance(&self, user_id: &UserId) -> Result<i64> {
        let account = self.storage.require_account(user_id)?;
        self.calculator.balance(&self.storage, &account)
    }

    /// Account row
    pub fn get_account(&self, user_id: &UserId) -> Result<UserAccount> {
        self.storage.require_account(user_id)
    }

    /// A user's entries, newest first
    pub fn list_entries(&self, user_id: &UserId, page: PageRequest) -> Result<Page<LedgerEntry>> {
        page.validate()?;
        let account = self.storage.require_account(user_id)?;
        let items = self
            .storage
            .user_entries_desc(user_id, page.offset(), page.limit as usize)?;

        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total: account.entry_count,
        })
    }

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        self.storage.get_entry(entry_id)
    }

    /// Debit credits and create the paired transfer in one commit
    pub async fn settle(
        &self,
        draft: SettlementDraft,
        deadline: Option<Instant>,
    ) -> Result<SettlementReceipt> {
        self.handle.settle(draft, deadline).await
    }

    /// Move a transfer through the state machine
    pub async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: TransferUpdate,
        admin_id: &str,
        refund_released: bool,
        deadline: Option<Instant>,
    ) -> Result<TransferChange> {
        self.handle
            .update_transfer(
                transfer_id,
                update,
                admin_id.to_string(),
                refund_released,
                deadline,
            )
            .await
    }

    /// Get transfer by ID
    pub fn get_transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.storage.get_transfer(transfer_id)
    }

    /// Get transfer if it was committed
    pub fn find_transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        self.storage.find_transfer(transfer_id)
    }

    /// Transfers matching `filter`, newest first
    pub fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<Transfer>> {
        self.storage.list_transfers(filter, page)
    }

    /// Register a payout wallet
    pub async fn add_wallet(
        &self,
        draft: WalletDraft,
        deadline: Option<Instant>,
    ) -> Result<WalletAddress> {
        self.handle.add_wallet(draft, deadline).await
    }

    /// A user's wallets
    pub fn list_wallets(&self, user_id: &UserId) -> Result<Vec<WalletAddress>> {
        self.storage.require_account(user_id)?;
        self.storage.list_wallets(user_id)
    }

    /// Replay a user's history against the running balance
    pub fn verify_user(&self, user_id: &UserId) -> Result<BalanceReport> {
        balance::verify_user(&self.storage, user_id)
    }

    /// Store an audit row
    pub fn record_activity(&self, activity: &AdminActivity) -> Result<()> {
        self.storage.put_activity(activity)
    }

    /// Most recent audit rows
    pub fn recent_activities(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        self.storage.recent_activities(limit)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Storage backend
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Approximate row counts
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Shutdown ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BalanceMode;
    use crate::types::{Network, TransferStatus};
    use rust_decimal::Decimal;

    async fn create_test_ledger(mode: BalanceMode) -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        config.balance.mode = mode;

        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    fn settlement(user: &UserId, credits: i64) -> SettlementDraft {
        SettlementDraft {
            transfer_id: Uuid::now_v7(),
            admin_id: "admin-1".to_string(),
            user_id: user.clone(),
            credits_used: credits,
            nila_amount: Decimal::new(1250, 2),
            network: Network::Solana,
            wallet_address: "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_is_sum_of_entries() {
        for mode in [BalanceMode::Running, BalanceMode::Replay] {
            let (ledger, _temp) = create_test_ledger(mode).await;
            let user = UserId::new("u1");
            ledger.register_user(user.clone(), None).await.unwrap();

            assert_eq!(ledger.get_balance(&user).unwrap(), 0);

            ledger.complete_purchase(&user, 100, None).await.unwrap();
            ledger.settle(settlement(&user, 30), None).await.unwrap();
            ledger
                .append_entry(EntryDraft {
                    user_id: user.clone(),
                    transaction_type: EntryType::Adjustment,
                    amount: 5,
                    description: "goodwill".to_string(),
                    reference_id: None,
                }, None)
                .await
                .unwrap();

            assert_eq!(ledger.get_balance(&user).unwrap(), 75);
            assert!(ledger.verify_user(&user).unwrap().is_consistent());
        }
    }

    #[tokio::test]
    async fn test_unknown_user_balance() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;
        assert!(matches!(
            ledger.get_balance(&UserId::new("ghost")),
            Err(Error::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purchase_requires_positive_credits() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;
        let user = UserId::new("u1");
        ledger.register_user(user.clone(), None).await.unwrap();

        assert!(matches!(
            ledger.complete_purchase(&user, 0, None).await,
            Err(Error::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_list_entries_newest_first() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;
        let user = UserId::new("u1");
        ledger.register_user(user.clone(), None).await.unwrap();

        for credits in [10, 20, 30] {
            ledger.complete_purchase(&user, credits, None).await.unwrap();
        }

        let page = ledger.list_entries(&user, PageRequest::new(1, 2).unwrap()).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].amount, 30);
        assert_eq!(page.items[1].amount, 20);

        let page = ledger.list_entries(&user, PageRequest::new(2, 2).unwrap()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].balance_after, 10);

        let entry = ledger.get_entry(page.items[0].id).unwrap();
        assert_eq!(entry, page.items[0]);
    }

    #[tokio::test]
    async fn test_settlement_lifecycle() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;
        let user = UserId::new("u1");
        ledger.register_user(user.clone(), None).await.unwrap();
        ledger.complete_purchase(&user, 100, None).await.unwrap();

        let receipt = ledger.settle(settlement(&user, 40), None).await.unwrap();
        let id = receipt.transfer.id;

        let processing = TransferUpdate {
            status: Some(TransferStatus::Processing),
            ..Default::default()
        };
        ledger
            .update_transfer(id, processing.clone(), "admin-1", true, None)
            .await
            .unwrap();

        let confirm = TransferUpdate {
            status: Some(TransferStatus::Confirmed),
            transaction_hash: Some(
                "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW"
                    .to_string(),
            ),
            notes: None,
        };
        let change = ledger
            .update_transfer(id, confirm, "admin-1", true, None)
            .await
            .unwrap();
        assert_eq!(change.after.status, TransferStatus::Confirmed);
        assert!(change.after.processed_at.is_some());
        assert!(change.refund.is_none());

        assert!(matches!(
            ledger.update_transfer(id, processing, "admin-1", true, None).await,
            Err(Error::InvalidStateTransition { .. })
        ));
        assert_eq!(ledger.get_balance(&user).unwrap(), 60);

        let page = ledger
            .list_transfers(
                &TransferFilter {
                    user_id: Some(user.clone()),
                    status: Some(TransferStatus::Confirmed),
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, id);
    }

    #[tokio::test]
    async fn test_activity_log() {
        let (ledger, _temp) = create_test_ledger(BalanceMode::Running).await;

        for action in ["user.registered", "settlement.initiated"] {
            ledger
                .record_activity(&AdminActivity {
                    id: Uuid::now_v7(),
                    admin_id: "admin-1".to_string(),
                    action_type: action.to_string(),
                    entity_type: "user".to_string(),
                    entity_id: "u1".to_string(),
                    metadata: serde_json::json!({ "source": "test" }),
                    old_values: None,
                    new_values: None,
                    created_at: chrono::Utc::now(),
                })
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let recent = ledger.recent_activities(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action_type, "settlement.initiated");
    }
}
