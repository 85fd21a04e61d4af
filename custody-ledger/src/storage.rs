//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account id, big-endian)
//! - `balances` - Balance rows (key: account || asset)
//! - `deposits` - Deposit rows (key: deposit id)
//! - `withdrawals` - Withdrawal rows (key: withdrawal id)
//! - `swaps` - Swap rows (key: swap id)
//! - `processed` - Idempotency ledger (key: chain || tx_hash || index)
//! - `addresses` - Deposit address registry (key: chain || address)
//! - `meta` - Schema metadata
//!
//! Every multi-row effect goes through a single `WriteBatch` so a crash
//! never leaves a balance without its matching deposit/swap/withdrawal row.

use crate::{
    error::{Error, Result},
    types::{
        Account, AccountId, Asset, Balance, Chain, Deposit, DepositAddress, DepositStatus,
        ProcessedTransaction, Swap, TxRef, Withdrawal,
    },
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_BALANCES: &str = "balances";
const CF_DEPOSITS: &str = "deposits";
const CF_WITHDRAWALS: &str = "withdrawals";
const CF_SWAPS: &str = "swaps";
const CF_PROCESSED: &str = "processed";
const CF_ADDRESSES: &str = "addresses";
const CF_META: &str = "meta";

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const SCHEMA_VERSION: u32 = 1;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.rocksdb.level0_file_num_compaction_trigger,
        );

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_DEPOSITS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_WITHDRAWALS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_SWAPS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_PROCESSED, Self::cf_options_point_lookup()),
            ColumnFamilyDescriptor::new(CF_ADDRESSES, Self::cf_options_point_lookup()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        let storage = Self { db: Arc::new(db) };
        storage.check_schema()?;
        Ok(storage)
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read rows, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_point_lookup() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        // Written once, then hammered with existence checks
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn check_schema(&self) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(&cf, SCHEMA_VERSION_KEY)? {
            Some(raw) => {
                let version: u32 = bincode::deserialize(&raw)?;
                if version != SCHEMA_VERSION {
                    return Err(Error::Storage(format!(
                        "Unsupported schema version {} (expected {})",
                        version, SCHEMA_VERSION
                    )));
                }
            }
            None => {
                let raw = bincode::serialize(&SCHEMA_VERSION)?;
                self.db.put_cf(&cf, SCHEMA_VERSION_KEY, raw)?;
            }
        }
        Ok(())
    }

    // Key helpers

    fn balance_key(account: AccountId, asset: &Asset) -> Vec<u8> {
        let mut key = account.key_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(asset.as_str().as_bytes());
        key
    }

    fn address_key(chain: &Chain, address: &str) -> Vec<u8> {
        let mut key = chain.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(address.as_bytes());
        key
    }

    // Account operations

    /// Put account row
    pub fn put_account(&self, account: &Account) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let value = bincode::serialize(account)?;
        self.db.put_cf(&cf, account.id.key_bytes(), value)?;
        Ok(())
    }

    /// Get account row, if present
    pub fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(&cf, id.key_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    // Balance operations

    /// Get balance row; absent rows read as zero
    pub fn get_balance(&self, account: AccountId, asset: &Asset) -> Result<Balance> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(&cf, Self::balance_key(account, asset))? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(Balance::zero()),
        }
    }

    /// Put balance row (unbatched; prefer the composite writers)
    pub fn put_balance(&self, account: AccountId, asset: &Asset, balance: &Balance) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let value = bincode::serialize(balance)?;
        self.db.put_cf(&cf, Self::balance_key(account, asset), value)?;
        Ok(())
    }

    /// All balance rows for an account
    pub fn account_balances(&self, account: AccountId) -> Result<Vec<(Asset, Balance)>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let mut prefix = account.key_bytes().to_vec();
        prefix.push(b'|');

        let iter = self.db.prefix_iterator_cf(&cf, &prefix);
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let symbol = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            let balance: Balance = bincode::deserialize(&value)?;
            out.push((Asset::new(symbol), balance));
        }
        Ok(out)
    }

    // Idempotency ledger

    /// Get processed-transaction row for an idempotency key
    pub fn get_processed(&self, tx: &TxRef) -> Result<Option<ProcessedTransaction>> {
        let cf = self.cf_handle(CF_PROCESSED)?;
        match self.db.get_cf(&cf, tx.storage_key())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Record a chain event that produced no balance effect (unrecognized
    /// address, invalidated deposit)
    pub fn put_processed(&self, processed: &ProcessedTransaction) -> Result<()> {
        let cf = self.cf_handle(CF_PROCESSED)?;
        let value = bincode::serialize(processed)?;
        self.db.put_cf(&cf, processed.tx.storage_key(), value)?;
        Ok(())
    }

    // Deposit operations

    /// Put deposit row (pending observations, confirmation bumps)
    pub fn put_deposit(&self, deposit: &Deposit) -> Result<()> {
        let cf = self.cf_handle(CF_DEPOSITS)?;
        let value = bincode::serialize(deposit)?;
        self.db.put_cf(&cf, deposit.id.as_bytes(), value)?;
        Ok(())
    }

    /// Get deposit by ID
    pub fn get_deposit(&self, id: Uuid) -> Result<Deposit> {
        let cf = self.cf_handle(CF_DEPOSITS)?;
        let value = self
            .db
            .get_cf(&cf, id.as_bytes())?
            .ok_or_else(|| Error::DepositNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Credit a confirmed deposit: deposit row, idempotency row and balance
    /// row in one batch
    pub fn apply_deposit(
        &self,
        deposit: &Deposit,
        processed: &ProcessedTransaction,
        balance: &Balance,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_deposits = self.cf_handle(CF_DEPOSITS)?;
        batch.put_cf(&cf_deposits, deposit.id.as_bytes(), bincode::serialize(deposit)?);

        let cf_processed = self.cf_handle(CF_PROCESSED)?;
        batch.put_cf(
            &cf_processed,
            processed.tx.storage_key(),
            bincode::serialize(processed)?,
        );

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::balance_key(deposit.account, &deposit.asset),
            bincode::serialize(balance)?,
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Deposits still below their confirmation threshold
    pub fn pending_deposits(&self) -> Result<Vec<Deposit>> {
        let cf = self.cf_handle(CF_DEPOSITS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut out = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let deposit: Deposit = bincode::deserialize(&value)?;
            if deposit.status == DepositStatus::Pending {
                out.push(deposit);
            }
        }
        Ok(out)
    }

    // Swap operations

    /// Put swap row (phase-only updates)
    pub fn put_swap(&self, swap: &Swap) -> Result<()> {
        let cf = self.cf_handle(CF_SWAPS)?;
        let value = bincode::serialize(swap)?;
        self.db.put_cf(&cf, swap.id.as_bytes(), value)?;
        Ok(())
    }

    /// Get swap by ID
    pub fn get_swap(&self, id: Uuid) -> Result<Swap> {
        let cf = self.cf_handle(CF_SWAPS)?;
        let value = self
            .db
            .get_cf(&cf, id.as_bytes())?
            .ok_or_else(|| Error::SwapNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Reserve a swap: swap row and locked from-balance in one batch
    pub fn apply_swap_reserve(&self, swap: &Swap, from_balance: &Balance) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_swaps = self.cf_handle(CF_SWAPS)?;
        batch.put_cf(&cf_swaps, swap.id.as_bytes(), bincode::serialize(swap)?);

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::balance_key(swap.account, &swap.from_asset),
            bincode::serialize(from_balance)?,
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Commit a swap: swap row plus both balance rows in one batch
    pub fn apply_swap_commit(
        &self,
        swap: &Swap,
        from_balance: &Balance,
        to_balance: &Balance,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_swaps = self.cf_handle(CF_SWAPS)?;
        batch.put_cf(&cf_swaps, swap.id.as_bytes(), bincode::serialize(swap)?);

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::balance_key(swap.account, &swap.from_asset),
            bincode::serialize(from_balance)?,
        );
        batch.put_cf(
            &cf_balances,
            Self::balance_key(swap.account, &swap.to_asset),
            bincode::serialize(to_balance)?,
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Refund a swap: failed swap row and unlocked from-balance in one batch
    pub fn apply_swap_refund(&self, swap: &Swap, from_balance: &Balance) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_swaps = self.cf_handle(CF_SWAPS)?;
        batch.put_cf(&cf_swaps, swap.id.as_bytes(), bincode::serialize(swap)?);

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::balance_key(swap.account, &swap.from_asset),
            bincode::serialize(from_balance)?,
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Swaps that have not reached a terminal state
    pub fn swaps_in_flight(&self) -> Result<Vec<Swap>> {
        let cf = self.cf_handle(CF_SWAPS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut out = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let swap: Swap = bincode::deserialize(&value)?;
            if !swap.is_terminal() {
                out.push(swap);
            }
        }
        Ok(out)
    }

    // Withdrawal operations

    /// Put withdrawal row (status advances)
    pub fn put_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        let cf = self.cf_handle(CF_WITHDRAWALS)?;
        let value = bincode::serialize(withdrawal)?;
        self.db.put_cf(&cf, withdrawal.id.as_bytes(), value)?;
        Ok(())
    }

    /// Get withdrawal by ID
    pub fn get_withdrawal(&self, id: Uuid) -> Result<Withdrawal> {
        let cf = self.cf_handle(CF_WITHDRAWALS)?;
        let value = self
            .db
            .get_cf(&cf, id.as_bytes())?
            .ok_or_else(|| Error::WithdrawalNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Request a withdrawal: withdrawal row and debited balance in one batch
    pub fn apply_withdrawal_request(&self, withdrawal: &Withdrawal, balance: &Balance) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_withdrawals = self.cf_handle(CF_WITHDRAWALS)?;
        batch.put_cf(
            &cf_withdrawals,
            withdrawal.id.as_bytes(),
            bincode::serialize(withdrawal)?,
        );

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::balance_key(withdrawal.account, &withdrawal.asset),
            bincode::serialize(balance)?,
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Refund a withdrawal: terminal withdrawal row and re-credited balance
    /// in one batch
    pub fn apply_withdrawal_refund(&self, withdrawal: &Withdrawal, balance: &Balance) -> Result<()> {
        // Same shape as the request writer, different direction
        self.apply_withdrawal_request(withdrawal, balance)
    }

    // Address registry

    /// Register a deposit address binding
    pub fn put_address(&self, binding: &DepositAddress) -> Result<()> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        let key = Self::address_key(&binding.chain, &binding.address);
        let value = bincode::serialize(binding)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    /// Resolve a (chain, address) pair to its binding
    pub fn lookup_address(&self, chain: &Chain, address: &str) -> Result<Option<DepositAddress>> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        match self.db.get_cf(&cf, Self::address_key(chain, address))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_accounts: self.approximate_count(CF_ACCOUNTS)?,
            total_deposits: self.approximate_count(CF_DEPOSITS)?,
            total_withdrawals: self.approximate_count(CF_WITHDRAWALS)?,
            total_swaps: self.approximate_count(CF_SWAPS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(&cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_accounts: u64,
    pub total_deposits: u64,
    pub total_withdrawals: u64,
    pub total_swaps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventSource, SwapPhase, SwapStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn test_deposit(account: AccountId) -> Deposit {
        Deposit {
            id: Uuid::now_v7(),
            account,
            tx: TxRef::new(Chain::new("ETH"), "0xabc", 0),
            asset: Asset::new("ETH"),
            amount: Decimal::new(15, 1),
            to_address: "0xdeadbeef".to_string(),
            status: DepositStatus::Confirmed,
            confirmations: 12,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_swap(account: AccountId) -> Swap {
        Swap {
            id: Uuid::now_v7(),
            account,
            from_asset: Asset::new("ETH"),
            from_amount: Decimal::ONE,
            to_asset: Asset::new("USDT"),
            expected_to_amount: Decimal::from(3500),
            min_to_amount: Decimal::from(3465),
            actual_to_amount: None,
            route: None,
            order_ref: None,
            phase: SwapPhase::Reserved,
            status: SwapStatus::Pending,
            fee: Decimal::ZERO,
            fail_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_BALANCES).is_some());
        assert!(storage.db.cf_handle(CF_PROCESSED).is_some());
    }

    #[test]
    fn test_missing_balance_reads_as_zero() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let balance = storage
            .get_balance(AccountId::new(99), &Asset::new("BTC"))
            .unwrap();
        assert_eq!(balance.amount, Decimal::ZERO);
        assert_eq!(balance.locked, Decimal::ZERO);
    }

    #[test]
    fn test_apply_deposit_is_atomic_and_visible() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let account = AccountId::new(1);
        let deposit = test_deposit(account);
        let processed = ProcessedTransaction {
            tx: deposit.tx.clone(),
            source: EventSource::Webhook,
            asset: deposit.asset.clone(),
            amount: deposit.amount,
            to_address: deposit.to_address.clone(),
            deposit_id: Some(deposit.id),
            raw: "{}".to_string(),
            processed_at: Utc::now(),
        };
        let mut balance = Balance::zero();
        balance.credit(deposit.amount);

        storage.apply_deposit(&deposit, &processed, &balance).unwrap();

        let got = storage.get_deposit(deposit.id).unwrap();
        assert_eq!(got.amount, deposit.amount);

        let seen = storage.get_processed(&deposit.tx).unwrap().unwrap();
        assert_eq!(seen.deposit_id, Some(deposit.id));

        let bal = storage.get_balance(account, &deposit.asset).unwrap();
        assert_eq!(bal.amount, deposit.amount);
    }

    #[test]
    fn test_swap_reserve_then_commit() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let account = AccountId::new(2);
        let mut swap = test_swap(account);

        let mut from_balance = Balance::zero();
        from_balance.credit(Decimal::from(2));
        from_balance.lock(&swap.from_asset, swap.from_amount).unwrap();
        storage.apply_swap_reserve(&swap, &from_balance).unwrap();

        let stored = storage.get_swap(swap.id).unwrap();
        assert_eq!(stored.phase, SwapPhase::Reserved);
        assert_eq!(
            storage.get_balance(account, &swap.from_asset).unwrap().locked,
            Decimal::ONE
        );

        // Commit: unlock + debit from, credit to
        from_balance.unlock(swap.from_amount);
        from_balance.debit(&swap.from_asset, swap.from_amount).unwrap();
        let mut to_balance = Balance::zero();
        to_balance.credit(Decimal::from(3480));
        swap.actual_to_amount = Some(Decimal::from(3480));
        swap.set_phase(SwapPhase::Completed);

        storage
            .apply_swap_commit(&swap, &from_balance, &to_balance)
            .unwrap();

        let from = storage.get_balance(account, &swap.from_asset).unwrap();
        assert_eq!(from.amount, Decimal::ONE);
        assert_eq!(from.locked, Decimal::ZERO);
        let to = storage.get_balance(account, &swap.to_asset).unwrap();
        assert_eq!(to.amount, Decimal::from(3480));
    }

    #[test]
    fn test_swaps_in_flight_skips_terminal() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let mut open_swap = test_swap(AccountId::new(3));
        open_swap.set_phase(SwapPhase::DexPending);
        storage.put_swap(&open_swap).unwrap();

        let mut done_swap = test_swap(AccountId::new(3));
        done_swap.set_phase(SwapPhase::Completed);
        storage.put_swap(&done_swap).unwrap();

        let in_flight = storage.swaps_in_flight().unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].id, open_swap.id);
    }

    #[test]
    fn test_address_lookup() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let binding = DepositAddress {
            chain: Chain::new("BTC"),
            address: "bc1qxyz".to_string(),
            account: AccountId::new(7),
            asset: Asset::new("BTC"),
            created_at: Utc::now(),
        };
        storage.put_address(&binding).unwrap();

        let found = storage
            .lookup_address(&Chain::new("BTC"), "bc1qxyz")
            .unwrap()
            .unwrap();
        assert_eq!(found.account, AccountId::new(7));

        assert!(storage
            .lookup_address(&Chain::new("BTC"), "bc1qother")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_account_balances_prefix_scan() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let account = AccountId::new(5);
        let mut btc = Balance::zero();
        btc.credit(Decimal::ONE);
        storage.put_balance(account, &Asset::new("BTC"), &btc).unwrap();
        let mut eth = Balance::zero();
        eth.credit(Decimal::from(10));
        storage.put_balance(account, &Asset::new("ETH"), &eth).unwrap();

        // Neighbor account must not leak into the scan
        let mut other = Balance::zero();
        other.credit(Decimal::from(99));
        storage
            .put_balance(AccountId::new(6), &Asset::new("BTC"), &other)
            .unwrap();

        let balances = storage.account_balances(account).unwrap();
        assert_eq!(balances.len(), 2);
        assert!(balances.iter().any(|(a, b)| a.as_str() == "BTC" && b.amount == Decimal::ONE));
    }

    #[test]
    fn test_withdrawal_roundtrip() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let withdrawal = Withdrawal {
            id: Uuid::now_v7(),
            account: AccountId::new(9),
            chain: Chain::new("ETH"),
            asset: Asset::new("USDT"),
            amount: Decimal::from(100),
            fee: Decimal::from(2),
            destination: "0xfeed".to_string(),
            status: crate::types::WithdrawalStatus::Pending,
            txid: None,
            fail_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut balance = Balance::zero();
        balance.credit(Decimal::from(200));
        balance.debit(&withdrawal.asset, withdrawal.total_debit()).unwrap();

        storage.apply_withdrawal_request(&withdrawal, &balance).unwrap();

        let got = storage.get_withdrawal(withdrawal.id).unwrap();
        assert_eq!(got.total_debit(), Decimal::from(102));
        assert_eq!(
            storage
                .get_balance(withdrawal.account, &withdrawal.asset)
                .unwrap()
                .amount,
            Decimal::from(98)
        );
    }
}
