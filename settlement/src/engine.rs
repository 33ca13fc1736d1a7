//! Main settlement engine
//!
//! Orchestrates validation, the single-writer ledger, retries, request
//! deadlines and the admin audit trail.

use crate::{
    audit::{actions, record_quietly, ActivityEntry, ActivityRecorder, LedgerActivityRecorder},
    config::{Config, SettlementConfig},
    retry::RetryStrategy,
    Error, Result,
};
use ledger_core::{
    AdminActivity, BalanceReport, EntryDraft, EntryType, Ledger, LedgerEntry, Network, Page,
    PageRequest, SettlementDraft, StorageStats, Transfer, TransferFilter, TransferUpdate,
    UserAccount, UserId, WalletAddress, WalletDraft,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Admin request to convert credits into NILA
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
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
    #[serde(default)]
    pub notes: Option<String>,
}

/// Outcome of a committed settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    /// Created transfer
    pub transfer: Transfer,
    /// Balance before the debit
    pub credit_balance_before: i64,
    /// Balance after the debit
    pub credit_balance_after: i64,
}

/// Wallet registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRequest {
    /// Network
    pub network: Network,
    /// Address
    pub address: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Primary for (user, network)
    #[serde(default)]
    pub is_primary: bool,
}

/// Settlement engine
#[derive(Debug)]
pub struct SettlementEngine {
    /// Ledger core
    ledger: Arc<Ledger>,

    /// Audit sink
    recorder: Arc<dyn ActivityRecorder>,

    /// Transient failure policy
    retry: RetryStrategy,

    /// Configuration
    config: SettlementConfig,
}

impl SettlementEngine {
    /// Open the ledger and build an engine with the default recorder
    pub async fn open(config: &Config) -> Result<Self> {
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await?);
        let recorder = Arc::new(LedgerActivityRecorder::new(ledger.clone()));

        Ok(Self::new(ledger, recorder, config.settlement.clone()))
    }

    /// Create engine from parts
    pub fn new(
        ledger: Arc<Ledger>,
        recorder: Arc<dyn ActivityRecorder>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            retry: RetryStrategy::new(config.retry.clone()),
            ledger,
            recorder,
            config,
        }
    }

    /// Debit credits and create a pending transfer
    pub async fn initiate_settlement(
        &self,
        admin_id: &str,
        request: SettlementRequest,
    ) -> Result<SettlementResult> {
        let admin_id = require_admin(admin_id)?;

        let draft = SettlementDraft {
            transfer_id: Uuid::now_v7(),
            admin_id: admin_id.to_string(),
            user_id: request.user_id,
            credits_used: request.credits_used,
            nila_amount: request.nila_amount,
            network: request.network,
            wallet_address: request.wallet_address.trim().to_string(),
            notes: request.notes,
        };
        draft.validate()?;

        let deadline = self.deadline();
        let receipt = self
            .run_bounded("initiate_settlement", deadline, || {
                self.ledger.settle(draft.clone(), Some(deadline))
            })
            .await?;

        let result = SettlementResult {
            credit_balance_before: receipt.balance_before,
            credit_balance_after: receipt.balance_after,
            transfer: receipt.transfer,
        };

        tracing::info!(
            transfer_id = %result.transfer.id,
            user_id = %result.transfer.user_id,
            admin_id,
            credits_used = result.transfer.credits_used,
            balance_after = result.credit_balance_after,
            "Settlement initiated"
        );

        record_quietly(
            self.recorder.as_ref(),
            ActivityEntry::new(
                admin_id,
                actions::SETTLEMENT_INITIATED,
                "transfer",
                result.transfer.id.to_string(),
            )
            .with_metadata(json!({
                "user_id": result.transfer.user_id,
                "credits_used": result.transfer.credits_used,
                "nila_amount": result.transfer.nila_amount.to_string(),
                "network": result.transfer.network,
                "wallet_address": result.transfer.wallet_address,
                "credit_balance_before": result.credit_balance_before,
                "credit_balance_after": result.credit_balance_after,
            }))
            .with_values(None, serde_json::to_value(&result.transfer).ok()),
        )
        .await;

        Ok(result)
    }

    /// Apply an admin patch to a transfer
    pub async fn update_settlement(
        &self,
        admin_id: &str,
        transfer_id: Uuid,
        update: TransferUpdate,
    ) -> Result<Transfer> {
        let admin_id = require_admin(admin_id)?;
        if update.is_empty() {
            return Err(Error::Validation(
                "update must set at least one of status, transaction_hash, notes".to_string(),
            ));
        }

        let deadline = self.deadline();
        let refund = self.config.refund_on_cancel;
        let change = self
            .run_bounded("update_settlement", deadline, || {
                self.ledger
                    .update_transfer(transfer_id, update.clone(), admin_id, refund, Some(deadline))
            })
            .await?;

        record_quietly(
            self.recorder.as_ref(),
            ActivityEntry::new(
                admin_id,
                actions::SETTLEMENT_UPDATED,
                "transfer",
                transfer_id.to_string(),
            )
            .with_metadata(json!({
                "from": change.before.status,
                "to": change.after.status,
                "refund_entry_id": change.refund.as_ref().map(|e| e.id),
            }))
            .with_values(
                serde_json::to_value(&change.before).ok(),
                serde_json::to_value(&change.after).ok(),
            ),
        )
        .await;

        Ok(change.after)
    }

    /// Manual credit adjustment (positive or negative)
    pub async fn adjust_credits(
        &self,
        admin_id: &str,
        user_id: &UserId,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry> {
        let admin_id = require_admin(admin_id)?;
        if reason.trim().is_empty() {
            return Err(Error::Validation("reason must not be empty".to_string()));
        }
        if amount == 0 {
            return Err(Error::Validation("amount must not be zero".to_string()));
        }
        if amount == i64::MIN {
            return Err(Error::Validation("amount out of range".to_string()));
        }

        let draft = EntryDraft {
            user_id: user_id.clone(),
            transaction_type: EntryType::Adjustment,
            amount,
            description: reason.trim().to_string(),
            reference_id: None,
        };

        let deadline = self.deadline();
        let entry = self
            .run_bounded("adjust_credits", deadline, || {
                self.ledger.append_entry(draft.clone(), Some(deadline))
            })
            .await?;

        record_quietly(
            self.recorder.as_ref(),
            ActivityEntry::new(admin_id, actions::CREDITS_ADJUSTED, "user", user_id.as_str())
                .with_metadata(json!({
                    "amount": amount,
                    "reason": entry.description,
                    "ledger_entry_id": entry.id,
                }))
                .with_values(
                    Some(json!({ "balance": entry.balance_after - entry.amount })),
                    Some(json!({ "balance": entry.balance_after })),
                ),
        )
        .await;

        Ok(entry)
    }

    /// Record a completed credit purchase
    pub async fn complete_purchase(
        &self,
        user_id: &UserId,
        credits: i64,
        reference_id: Option<String>,
        description: Option<String>,
    ) -> Result<LedgerEntry> {
        if credits <= 0 {
            return Err(Error::Validation(
                "purchased credits must be greater than zero".to_string(),
            ));
        }

        let draft = EntryDraft {
            user_id: user_id.clone(),
            transaction_type: EntryType::CreditPurchase,
            amount: credits,
            description: description.unwrap_or_else(|| format!("Purchase of {} credits", credits)),
            reference_id,
        };

        let deadline = self.deadline();
        let entry = self
            .run_bounded("complete_purchase", deadline, || {
                self.ledger.append_entry(draft.clone(), Some(deadline))
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            credits,
            balance_after = entry.balance_after,
            "Purchase completed"
        );
        Ok(entry)
    }

    /// Open a zero-balance account
    pub async fn register_user(&self, admin_id: &str, user_id: UserId) -> Result<UserAccount> {
        let admin_id = require_admin(admin_id)?;
        user_id.validate()?;

        let deadline = self.deadline();
        let account = self
            .run_bounded("register_user", deadline, || {
                self.ledger.register_user(user_id.clone(), Some(deadline))
            })
            .await?;

        record_quietly(
            self.recorder.as_ref(),
            ActivityEntry::new(
                admin_id,
                actions::USER_REGISTERED,
                "user",
                account.user_id.as_str(),
            )
            .with_values(None, serde_json::to_value(&account).ok()),
        )
        .await;

        Ok(account)
    }

    /// Register a payout wallet
    pub async fn add_wallet(
        &self,
        admin_id: &str,
        user_id: &UserId,
        request: WalletRequest,
    ) -> Result<WalletAddress> {
        let admin_id = require_admin(admin_id)?;

        let draft = WalletDraft {
            user_id: user_id.clone(),
            network: request.network,
            address: request.address,
            label: request.label,
            is_primary: request.is_primary,
        };

        let deadline = self.deadline();
        let wallet = self
            .run_bounded("add_wallet", deadline, || {
                self.ledger.add_wallet(draft.clone(), Some(deadline))
            })
            .await?;

        record_quietly(
            self.recorder.as_ref(),
            ActivityEntry::new(admin_id, actions::WALLET_ADDED, "wallet", wallet.id.to_string())
                .with_metadata(json!({
                    "user_id": wallet.user_id,
                    "network": wallet.network,
                    "is_primary": wallet.is_primary,
                }))
                .with_values(None, serde_json::to_value(&wallet).ok()),
        )
        .await;

        Ok(wallet)
    }

    /// Current balance
    pub fn get_balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.ledger.get_balance(user_id)?)
    }

    /// A user's entries, newest first
    pub fn list_entries(&self, user_id: &UserId, page: PageRequest) -> Result<Page<LedgerEntry>> {
        Ok(self.ledger.list_entries(user_id, page)?)
    }

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        Ok(self.ledger.get_entry(entry_id)?)
    }

    /// Get transfer by ID
    pub fn get_transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        Ok(self.ledger.get_transfer(transfer_id)?)
    }

    /// Transfers matching `filter`, newest first
    pub fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: PageRequest,
    ) -> Result<Page<Transfer>> {
        Ok(self.ledger.list_transfers(filter, page)?)
    }

    /// A user's wallets
    pub fn list_wallets(&self, user_id: &UserId) -> Result<Vec<WalletAddress>> {
        Ok(self.ledger.list_wallets(user_id)?)
    }

    /// Replay check of a user's history
    pub fn verify_user(&self, user_id: &UserId) -> Result<BalanceReport> {
        Ok(self.ledger.verify_user(user_id)?)
    }

    /// Most recent audit rows
    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        if limit == 0 || limit > ledger_core::types::MAX_PAGE_LIMIT as usize {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                ledger_core::types::MAX_PAGE_LIMIT
            )));
        }
        self.recorder.list_activities(limit).await
    }

    /// Prometheus text exposition
    pub fn render_metrics(&self) -> Result<String> {
        self.ledger
            .metrics()
            .render()
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))
    }

    /// Approximate store row counts
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(self.ledger.stats()?)
    }

    /// Ledger core
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Stop the ledger writer
    pub async fn shutdown(&self) -> Result<()> {
        Ok(self.ledger.shutdown().await?)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.config.request_timeout_ms)
    }

    /// Run a ledger command with retries, bounded by `deadline`
    ///
    /// The writer rejects commands whose deadline passed before commit, so
    /// the wait extends a short grace period past it for that verdict.
    async fn run_bounded<T, F, Fut>(&self, operation: &str, deadline: Instant, command: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ledger_core::Result<T>>,
    {
        let wait = deadline.saturating_duration_since(Instant::now())
            + Duration::from_millis(self.config.deadline_grace_ms);

        match tokio::time::timeout(wait, self.retry.execute_with_retry(command, operation)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = Error::from(e);
                match &err {
                    Error::Internal(detail) => {
                        tracing::error!(operation, error = %detail, "Ledger command failed");
                    }
                    Error::Timeout(_) => {
                        tracing::warn!(operation, "Ledger command rejected after deadline");
                    }
                    other => {
                        tracing::warn!(operation, error = %other, "Ledger command rejected");
                    }
                }
                Err(err)
            }
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.config.request_timeout_ms,
                    "Ledger command timed out"
                );
                Err(Error::Timeout(operation.to_string()))
            }
        }
    }
}

fn require_admin(admin_id: &str) -> Result<&str> {
    let admin_id = admin_id.trim();
    if admin_id.is_empty() {
        return Err(Error::Validation("admin id must not be empty".to_string()));
    }
    Ok(admin_id)
}
