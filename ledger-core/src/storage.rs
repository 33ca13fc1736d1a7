//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Running-balance rows (key: user_id)
//! - `entries` - Append-only ledger (key: user prefix || sequence)
//! - `indices` - Entry lookup by id (key: entry_id -> entries key)
//! - `transfers` - Settlement transfers (key: transfer_id, UUIDv7 so time-ordered)
//! - `wallets` - Payout addresses (key: user prefix || wallet_id)
//! - `activity` - Admin audit trail, JSON encoded (key: activity_id)
//!
//! Every balance-affecting change goes through [`Storage::commit`], which
//! applies a [`WriteSet`] as a single RocksDB `WriteBatch`.

use crate::{
    error::{Error, Result},
    types::{
        AdminActivity, LedgerEntry, Page, PageRequest, Transfer, TransferFilter, UserAccount,
        UserId, WalletAddress,
    },
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
#[cfg(any(test, feature = "fault-injection"))]
use std::sync::atomic::{AtomicUsize, Ordering};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_TRANSFERS: &str = "transfers";
const CF_WALLETS: &str = "wallets";
const CF_ACTIVITY: &str = "activity";

const TAG_ENTRY: u8 = b'e';
const TAG_WALLET: u8 = b'w';

/// Rows committed together or not at all
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    /// Account rows (new or updated)
    pub accounts: Vec<UserAccount>,
    /// New ledger entries
    pub entries: Vec<LedgerEntry>,
    /// New or updated transfers
    pub transfers: Vec<Transfer>,
    /// New or updated wallets
    pub wallets: Vec<WalletAddress>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
    #[cfg(any(test, feature = "fault-injection"))]
    injected_failures: AtomicUsize,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ACTIVITY, Self::cf_options_cold()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
            #[cfg(any(test, feature = "fault-injection"))]
            injected_failures: AtomicUsize::new(0),
        })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Read on every command, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn user_prefix(tag: u8, user_id: &UserId) -> Vec<u8> {
        let bytes = user_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(3 + bytes.len() + 16);
        key.push(tag);
        key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }

    fn entry_key(user_id: &UserId, sequence: u64) -> Vec<u8> {
        let mut key = Self::user_prefix(TAG_ENTRY, user_id);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn wallet_key(wallet: &WalletAddress) -> Vec<u8> {
        let mut key = Self::user_prefix(TAG_WALLET, &wallet.user_id);
        key.extend_from_slice(wallet.id.as_bytes());
        key
    }

    // Accounts

    /// Get account row if the user is registered
    pub fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get account row or fail with `UserNotFound`
    pub fn require_account(&self, user_id: &UserId) -> Result<UserAccount> {
        self.get_account(user_id)?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    // Entries

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let key = self
            .db
            .get_cf(cf_indices, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf_entries, &key)?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// All entries of a user, oldest first
    pub fn user_entries(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        self.scan_user_entries(user_id, |entry| {
            entries.push(entry);
            true
        })?;
        Ok(entries)
    }

    /// Sum of all entry amounts of a user
    pub fn sum_user_entries(&self, user_id: &UserId) -> Result<i64> {
        let mut sum = 0i64;
        let mut overflow = false;
        self.scan_user_entries(user_id, |entry| match sum.checked_add(entry.amount) {
            Some(next) => {
                sum = next;
                true
            }
            None => {
                overflow = true;
                false
            }
        })?;

        if overflow {
            return Err(Error::InvariantViolation(format!(
                "balance overflow replaying {}",
                user_id
            )));
        }
        Ok(sum)
    }

    fn scan_user_entries(
        &self,
        user_id: &UserId,
        mut visit: impl FnMut(LedgerEntry) -> bool,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = Self::user_prefix(TAG_ENTRY, user_id);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if !visit(bincode::deserialize(&value)?) {
                break;
            }
        }

        Ok(())
    }

    /// Entries of a user, newest first
    pub fn user_entries_desc(
        &self,
        user_id: &UserId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = Self::user_prefix(TAG_ENTRY, user_id);
        let start = Self::entry_key(user_id, u64::MAX);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse));

        let mut entries = Vec::with_capacity(limit);
        for item in iter.skip(offset) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || entries.len() >= limit {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    // Transfers

    /// Get transfer if present
    pub fn find_transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        match self.db.get_cf(cf, transfer_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get transfer or fail with `TransferNotFound`
    pub fn get_transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.find_transfer(transfer_id)?
            .ok_or_else(|| Error::TransferNotFound(transfer_id.to_string()))
    }

    /// Transfers matching `filter`, newest first
    pub fn list_transfers(&self, filter: &TransferFilter, page: PageRequest) -> Result<Page<Transfer>> {
        page.validate()?;
        let cf = self.cf_handle(CF_TRANSFERS)?;
        let offset = page.offset();

        let mut items = Vec::with_capacity(page.limit as usize);
        let mut total = 0u64;

        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item?;
            let transfer: Transfer = bincode::deserialize(&value)?;
            if !filter.matches(&transfer) {
                continue;
            }
            if total as usize >= offset && items.len() < page.limit as usize {
                items.push(transfer);
            }
            total += 1;
        }

        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total,
        })
    }

    // Wallets

    /// Wallets of a user, in id order
    pub fn list_wallets(&self, user_id: &UserId) -> Result<Vec<WalletAddress>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let prefix = Self::user_prefix(TAG_WALLET, user_id);

        let mut wallets = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            wallets.push(bincode::deserialize(&value)?);
        }

        Ok(wallets)
    }

    // Activity

    /// Append an audit row
    pub fn put_activity(&self, activity: &AdminActivity) -> Result<()> {
        let cf = self.cf_handle(CF_ACTIVITY)?;
        let value = serde_json::to_vec(activity)?;
        self.db.put_cf(cf, activity.id.as_bytes(), value)?;
        Ok(())
    }

    /// Most recent audit rows, newest first
    pub fn recent_activities(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        let cf = self.cf_handle(CF_ACTIVITY)?;

        let mut activities = Vec::with_capacity(limit);
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            activities.push(serde_json::from_slice(&value)?);
        }

        Ok(activities)
    }

    // Batch operations (atomic)

    /// Apply every row of `set` in one atomic write
    pub fn commit(&self, set: &WriteSet) -> Result<()> {
        #[cfg(any(test, feature = "fault-injection"))]
        if self.take_injected_failure() {
            return Err(Error::Storage("injected write failure".to_string()));
        }

        let mut batch = WriteBatch::default();

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        for account in &set.accounts {
            batch.put_cf(
                cf_accounts,
                account.user_id.as_str().as_bytes(),
                bincode::serialize(account)?,
            );
        }

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for entry in &set.entries {
            let key = Self::entry_key(&entry.user_id, entry.sequence);
            batch.put_cf(cf_entries, &key, bincode::serialize(entry)?);
            batch.put_cf(cf_indices, entry.id.as_bytes(), &key);
        }

        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        for transfer in &set.transfers {
            batch.put_cf(
                cf_transfers,
                transfer.id.as_bytes(),
                bincode::serialize(transfer)?,
            );
        }

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        for wallet in &set.wallets {
            batch.put_cf(cf_wallets, Self::wallet_key(wallet), bincode::serialize(wallet)?);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(
            accounts = set.accounts.len(),
            entries = set.entries.len(),
            transfers = set.transfers.len(),
            wallets = set.wallets.len(),
            "Write set committed"
        );

        Ok(())
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Make the next `n` commits fail with a transient storage error
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn fail_next_commits(&self, n: usize) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_accounts: self.approximate_count(self.cf_handle(CF_ACCOUNTS)?)?,
            total_entries: self.approximate_count(self.cf_handle(CF_ENTRIES)?)?,
            total_transfers: self.approximate_count(self.cf_handle(CF_TRANSFERS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    /// Registered users (approximate)
    pub total_accounts: u64,
    /// Ledger entries (approximate)
    pub total_entries: u64,
    /// Transfers (approximate)
    pub total_transfers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryType, Network, TransferStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn credit(account: &mut UserAccount, amount: i64) -> LedgerEntry {
        let balance = account.balance;
        account
            .next_entry(balance, EntryType::CreditPurchase, amount, "pack".into(), None, Utc::now())
            .unwrap()
    }

    fn test_transfer(user: &str, status: TransferStatus) -> Transfer {
        let now = Utc::now();
        Transfer {
            id: Uuid::now_v7(),
            user_id: UserId::new(user),
            credits_used: 10,
            nila_amount: Decimal::ONE,
            network: Network::Polygon,
            wallet_address: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
            transaction_hash: None,
            status,
            processed_by: "admin".to_string(),
            notes: None,
            ledger_entry_id: Uuid::now_v7(),
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    #[test]
    fn test_commit_and_read_back() {
        let (storage, _temp) = test_storage();
        let user = UserId::new("user-1");
        let mut account = UserAccount::open(user.clone(), Utc::now());
        let entry = credit(&mut account, 100);

        storage
            .commit(&WriteSet {
                accounts: vec![account.clone()],
                entries: vec![entry.clone()],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(storage.require_account(&user).unwrap().balance, 100);
        assert_eq!(storage.get_entry(entry.id).unwrap(), entry);
        assert_eq!(storage.sum_user_entries(&user).unwrap(), 100);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_accounts, 1);
        assert_eq!(stats.total_transfers, 0);
    }

    #[test]
    fn test_unknown_rows() {
        let (storage, _temp) = test_storage();
        assert!(matches!(
            storage.require_account(&UserId::new("ghost")),
            Err(Error::UserNotFound(_))
        ));
        assert!(matches!(
            storage.get_entry(Uuid::now_v7()),
            Err(Error::EntryNotFound(_))
        ));
        assert!(matches!(
            storage.get_transfer(Uuid::now_v7()),
            Err(Error::TransferNotFound(_))
        ));
    }

    #[test]
    fn test_user_entries_are_isolated_and_ordered() {
        let (storage, _temp) = test_storage();
        let mut alice = UserAccount::open(UserId::new("alice"), Utc::now());
        // "alice2" shares a string prefix with "alice"
        let mut alice2 = UserAccount::open(UserId::new("alice2"), Utc::now());

        let mut set = WriteSet::default();
        for amount in 1..=5 {
            set.entries.push(credit(&mut alice, amount));
        }
        set.entries.push(credit(&mut alice2, 1000));
        set.accounts = vec![alice.clone(), alice2.clone()];
        storage.commit(&set).unwrap();

        let newest_first = storage.user_entries_desc(&alice.user_id, 0, 3).unwrap();
        let sequences: Vec<u64> = newest_first.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![5, 4, 3]);

        let second_page = storage.user_entries_desc(&alice.user_id, 3, 3).unwrap();
        let sequences: Vec<u64> = second_page.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 1]);

        assert_eq!(storage.user_entries(&alice.user_id).unwrap().len(), 5);
        assert_eq!(storage.sum_user_entries(&alice.user_id).unwrap(), 15);
        assert_eq!(storage.sum_user_entries(&alice2.user_id).unwrap(), 1000);
    }

    #[test]
    fn test_injected_failure_writes_nothing() {
        let (storage, _temp) = test_storage();
        let mut account = UserAccount::open(UserId::new("user-1"), Utc::now());
        let entry = credit(&mut account, 50);
        let set = WriteSet {
            accounts: vec![account.clone()],
            entries: vec![entry.clone()],
            ..Default::default()
        };

        storage.fail_next_commits(1);
        let err = storage.commit(&set).unwrap_err();
        assert!(err.is_transient());
        assert!(storage.get_account(&account.user_id).unwrap().is_none());

        storage.commit(&set).unwrap();
        assert_eq!(storage.require_account(&account.user_id).unwrap().balance, 50);
    }

    #[test]
    fn test_list_transfers_filters_and_pages() {
        let (storage, _temp) = test_storage();
        let mut set = WriteSet::default();
        for (user, status) in [
            ("alice", TransferStatus::Pending),
            ("alice", TransferStatus::Pending),
            ("alice", TransferStatus::Pending),
            ("bob", TransferStatus::Pending),
            ("alice", TransferStatus::Cancelled),
        ] {
            set.transfers.push(test_transfer(user, status));
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        storage.commit(&set).unwrap();

        let all = storage
            .list_transfers(&TransferFilter::default(), PageRequest::new(1, 10).unwrap())
            .unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.items[0].id, set.transfers[4].id);

        let filter = TransferFilter {
            user_id: Some(UserId::new("alice")),
            status: Some(TransferStatus::Pending),
        };
        let page = storage
            .list_transfers(&filter, PageRequest::new(2, 2).unwrap())
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, set.transfers[0].id);
    }

    #[test]
    fn test_activity_newest_first() {
        let (storage, _temp) = test_storage();
        for n in 0..3 {
            storage
                .put_activity(&AdminActivity {
                    id: Uuid::now_v7(),
                    admin_id: "admin".to_string(),
                    action_type: format!("action.{}", n),
                    entity_type: "transfer".to_string(),
                    entity_id: n.to_string(),
                    metadata: serde_json::json!({ "n": n }),
                    old_values: None,
                    new_values: None,
                    created_at: Utc::now(),
                })
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let recent = storage.recent_activities(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action_type, "action.2");
        assert_eq!(recent[1].action_type, "action.1");
    }
}
