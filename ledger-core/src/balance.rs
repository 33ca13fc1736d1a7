//! Balance calculation
//!
//! Two calculators answer the same question. [`RunningBalance`] reads the
//! account row that every commit updates together with the entry it
//! appends; [`ReplayBalance`] re-sums the whole history. Writers only call
//! a calculator from inside the ledger actor, so the value they see cannot
//! be raced by another debit.

use crate::{
    config::BalanceMode,
    storage::Storage,
    types::{UserAccount, UserId},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Source of a user's current balance
pub trait BalanceCalculator: Send + Sync + std::fmt::Debug {
    /// Balance of a registered user; `account` is that user's current row
    fn balance(&self, storage: &Storage, account: &UserAccount) -> Result<i64>;

    /// Calculator name for logs
    fn name(&self) -> &'static str;
}

/// Authoritative running-balance field
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningBalance;

impl BalanceCalculator for RunningBalance {
    fn balance(&self, _storage: &Storage, account: &UserAccount) -> Result<i64> {
        Ok(account.balance)
    }

    fn name(&self) -> &'static str {
        "running"
    }
}

/// Full re-sum of the user's entries
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayBalance;

impl BalanceCalculator for ReplayBalance {
    fn balance(&self, storage: &Storage, account: &UserAccount) -> Result<i64> {
        storage.sum_user_entries(&account.user_id)
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

/// Build the calculator selected by configuration
pub fn calculator_for(mode: BalanceMode) -> Arc<dyn BalanceCalculator> {
    match mode {
        BalanceMode::Running => Arc::new(RunningBalance),
        BalanceMode::Replay => Arc::new(ReplayBalance),
    }
}

/// Outcome of a full history check for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// Checked user
    pub user_id: UserId,
    /// Value held in the running-balance row
    pub running_balance: i64,
    /// Sum of all entry amounts
    pub replayed_balance: i64,
    /// Entries inspected
    pub entry_count: u64,
    /// Human-readable problems; empty when consistent
    pub discrepancies: Vec<String>,
}

impl BalanceReport {
    /// True when the history and the running row agree everywhere
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Replay a user's history and check every cached value against it
pub fn verify_user(storage: &Storage, user_id: &UserId) -> Result<BalanceReport> {
    let account = storage.require_account(user_id)?;
    let entries = storage.user_entries(user_id)?;

    let mut discrepancies = Vec::new();
    let mut running = 0i64;

    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if entry.sequence != expected_sequence {
            discrepancies.push(format!(
                "entry {} has sequence {}, expected {}",
                entry.id, entry.sequence, expected_sequence
            ));
        }

        running = running.checked_add(entry.amount).ok_or_else(|| {
            Error::InvariantViolation(format!("balance overflow replaying {}", user_id))
        })?;

        if entry.balance_after != running {
            discrepancies.push(format!(
                "entry {} has balance_after {}, running sum is {}",
                entry.id, entry.balance_after, running
            ));
        }
        if running < 0 {
            discrepancies.push(format!("balance negative ({}) after entry {}", running, entry.id));
        }
    }

    if running != account.balance {
        discrepancies.push(format!(
            "running balance {} differs from replayed balance {}",
            account.balance, running
        ));
    }
    if entries.len() as u64 != account.entry_count {
        discrepancies.push(format!(
            "account lists {} entries, found {}",
            account.entry_count,
            entries.len()
        ));
    }

    if !discrepancies.is_empty() {
        tracing::warn!(
            user_id = %user_id,
            problems = discrepancies.len(),
            "Ledger verification found discrepancies"
        );
    }

    Ok(BalanceReport {
        user_id: user_id.clone(),
        running_balance: account.balance,
        replayed_balance: running,
        entry_count: entries.len() as u64,
        discrepancies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WriteSet;
    use crate::types::EntryType;
    use crate::Config;
    use chrono::Utc;

    fn test_storage() -> (Storage, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn seeded(storage: &Storage, amounts: &[i64]) -> UserAccount {
        let mut account = UserAccount::open(UserId::new("user-1"), Utc::now());
        let mut set = WriteSet::default();
        for amount in amounts {
            let balance = account.balance;
            set.entries.push(
                account
                    .next_entry(balance, EntryType::Adjustment, *amount, String::new(), None, Utc::now())
                    .unwrap(),
            );
        }
        set.accounts.push(account.clone());
        storage.commit(&set).unwrap();
        account
    }

    #[test]
    fn test_calculators_agree() {
        let (storage, _temp) = test_storage();
        let account = seeded(&storage, &[100, -40, 25]);

        assert_eq!(RunningBalance.balance(&storage, &account).unwrap(), 85);
        assert_eq!(ReplayBalance.balance(&storage, &account).unwrap(), 85);
        assert_eq!(calculator_for(BalanceMode::Replay).name(), "replay");
    }

    #[test]
    fn test_verify_consistent_history() {
        let (storage, _temp) = test_storage();
        let account = seeded(&storage, &[100, -40]);

        let report = verify_user(&storage, &account.user_id).unwrap();
        assert!(report.is_consistent(), "{:?}", report.discrepancies);
        assert_eq!(report.replayed_balance, 60);
        assert_eq!(report.entry_count, 2);
    }

    #[test]
    fn test_verify_detects_drifted_running_balance() {
        let (storage, _temp) = test_storage();
        let mut account = seeded(&storage, &[100]);

        account.balance = 90;
        storage
            .commit(&WriteSet {
                accounts: vec![account.clone()],
                ..Default::default()
            })
            .unwrap();

        let report = verify_user(&storage, &account.user_id).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.running_balance, 90);
        assert_eq!(report.replayed_balance, 100);
    }

    #[test]
    fn test_verify_unknown_user() {
        let (storage, _temp) = test_storage();
        assert!(matches!(
            verify_user(&storage, &UserId::new("ghost")),
            Err(Error::UserNotFound(_))
        ));
    }
}
