use super::locks::AccountLocks;
use crate::domain::account::{Account, AccountId};
use crate::domain::ports::{AccountGuard, DeadLetter, Delivery, LedgerStore, TransactionQueue};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Column Family for storing account states.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for storing applied transactions.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for queued, not yet acknowledged messages.
pub const CF_QUEUE: &str = "queue";
/// Column Family for messages removed from circulation.
pub const CF_DEAD_LETTERS: &str = "dead_letters";

#[derive(Serialize, Deserialize)]
struct QueuedEntry {
    body: Vec<u8>,
    attempts: u32,
}

#[derive(Default)]
struct QueueCursor {
    ready: VecDeque<u64>,
    /// delivery tag -> sequence number of the persisted entry
    unacked: HashMap<u64, u64>,
    next_seq: u64,
    next_tag: u64,
}

struct QueueIndex {
    name: String,
    cursor: Mutex<QueueCursor>,
    notify: Notify,
}

/// A persistent ledger and durable queue backed by one RocksDB instance.
///
/// Accounts, transactions, queued messages and dead letters each live in
/// their own Column Family. Queue entries are keyed by a big-endian sequence
/// number so iteration order is publish order; an entry is deleted only on
/// acknowledgement or dead-lettering, so everything unacknowledged when the
/// process stops is delivered again after `open`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    locks: AccountLocks,
    write_lock: Arc<Mutex<()>>,
    queue: Arc<QueueIndex>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist and rebuilds the
    /// queue index from the persisted entries.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    /// * `queue_name` - Name reported by the queue side of the store.
    pub fn open<P: AsRef<Path>>(path: P, queue_name: impl Into<String>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ACCOUNTS, CF_TRANSACTIONS, CF_QUEUE, CF_DEAD_LETTERS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let mut cursor = QueueCursor::default();
        {
            let cf = db.cf_handle(CF_QUEUE).ok_or_else(|| missing_cf(CF_QUEUE))?;
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item?;
                let seq = decode_seq(&key)?;
                cursor.ready.push_back(seq);
                cursor.next_seq = seq + 1;
            }
            let dead = db
                .cf_handle(CF_DEAD_LETTERS)
                .ok_or_else(|| missing_cf(CF_DEAD_LETTERS))?;
            if let Some(item) = db.iterator_cf(dead, IteratorMode::End).next() {
                let (key, _) = item?;
                cursor.next_seq = cursor.next_seq.max(decode_seq(&key)? + 1);
            }
        }

        Ok(Self {
            db: Arc::new(db),
            locks: AccountLocks::new(),
            write_lock: Arc::new(Mutex::new(())),
            queue: Arc::new(QueueIndex {
                name: queue_name.into(),
                cursor: Mutex::new(cursor),
                notify: Notify::new(),
            }),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| missing_cf(name))
    }

    fn read_entry(&self, seq: u64) -> Result<Option<QueuedEntry>> {
        let cf = self.cf(CF_QUEUE)?;
        match self.db.get_cf(cf, seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn deliver(&self, cursor: &mut QueueCursor) -> Result<Option<Delivery>> {
        while let Some(seq) = cursor.ready.pop_front() {
            let Some(mut entry) = self.read_entry(seq)? else {
                continue;
            };
            entry.attempts += 1;
            self.db
                .put_cf(self.cf(CF_QUEUE)?, seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;

            cursor.next_tag += 1;
            cursor.unacked.insert(cursor.next_tag, seq);
            return Ok(Some(Delivery {
                tag: cursor.next_tag,
                body: entry.body,
                attempt: entry.attempts,
            }));
        }
        Ok(None)
    }

    fn scan<T: for<'de> Deserialize<'de>>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }
}

fn missing_cf(name: &str) -> LedgerError {
    LedgerError::InternalError(Box::new(std::io::Error::other(format!(
        "{name} column family not found"
    ))))
}

fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        LedgerError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("queue key of {} bytes", key.len()),
        )))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn transaction_exists(&self, tx_id: &TransactionId) -> Result<bool> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        // Just check if the key exists without retrieving the value
        let result = self.db.get_pinned_cf(cf, tx_id.as_str())?;
        Ok(result.is_some())
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, account_id.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_or_create_account(&self, account_id: &AccountId) -> Result<Account> {
        let _write = self.write_lock.lock().await;
        if let Some(account) = self.get_account(account_id).await? {
            return Ok(account);
        }
        let account = Account::new(account_id.clone());
        self.db.put_cf(
            self.cf(CF_ACCOUNTS)?,
            account_id.as_str(),
            serde_json::to_vec(&account)?,
        )?;
        Ok(account)
    }

    async fn lock_account(&self, account_id: &AccountId) -> Result<AccountGuard> {
        Ok(self.locks.acquire(account_id).await)
    }

    async fn commit(&self, guard: &AccountGuard, account: Account, tx: Transaction) -> Result<()> {
        if guard.account_id() != &account.id || account.id != tx.account_id {
            return Err(LedgerError::ValidationError(format!(
                "commit for account {} does not match the held lock on {}",
                account.id,
                guard.account_id()
            )));
        }

        let _write = self.write_lock.lock().await;
        if self.transaction_exists(&tx.id).await? {
            return Err(LedgerError::DuplicateTransaction(tx.id.to_string()));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            account.id.as_str(),
            serde_json::to_vec(&account)?,
        );
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            tx.id.as_str(),
            serde_json::to_vec(&tx)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }

    /// Transactions in id order.
    async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        self.scan(CF_TRANSACTIONS)
    }

    async fn ping(&self) -> Result<()> {
        self.db.property_value("rocksdb.estimate-num-keys")?;
        Ok(())
    }
}

#[async_trait]
impl TransactionQueue for RocksDBStore {
    fn name(&self) -> &str {
        &self.queue.name
    }

    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        let mut cursor = self.queue.cursor.lock().await;
        let seq = cursor.next_seq;
        let entry = QueuedEntry { body, attempts: 0 };
        self.db
            .put_cf(self.cf(CF_QUEUE)?, seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        cursor.next_seq += 1;
        cursor.ready.push_back(seq);
        self.queue.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            {
                let mut cursor = self.queue.cursor.lock().await;
                if let Some(delivery) = self.deliver(&mut cursor)? {
                    return Ok(delivery);
                }
            }
            self.queue.notify.notified().await;
        }
    }

    async fn try_receive(&self) -> Result<Option<Delivery>> {
        let mut cursor = self.queue.cursor.lock().await;
        self.deliver(&mut cursor)
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        let mut cursor = self.queue.cursor.lock().await;
        let seq = cursor
            .unacked
            .remove(&tag)
            .ok_or(LedgerError::UnknownDelivery(tag))?;
        self.db.delete_cf(self.cf(CF_QUEUE)?, seq.to_be_bytes())?;
        Ok(())
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let mut cursor = self.queue.cursor.lock().await;
        let seq = cursor
            .unacked
            .remove(&tag)
            .ok_or(LedgerError::UnknownDelivery(tag))?;
        cursor.ready.push_front(seq);
        self.queue.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, reason: String) -> Result<()> {
        let mut cursor = self.queue.cursor.lock().await;
        let seq = *cursor
            .unacked
            .get(&tag)
            .ok_or(LedgerError::UnknownDelivery(tag))?;
        let entry = self.read_entry(seq)?.ok_or_else(|| {
            LedgerError::InternalError(Box::new(std::io::Error::other(format!(
                "queue entry {seq} vanished before dead-lettering"
            ))))
        })?;
        let dead = DeadLetter {
            body: entry.body,
            attempts: entry.attempts,
            reason,
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_QUEUE)?, seq.to_be_bytes());
        batch.put_cf(
            self.cf(CF_DEAD_LETTERS)?,
            seq.to_be_bytes(),
            serde_json::to_vec(&dead)?,
        );
        self.db.write(batch)?;
        cursor.unacked.remove(&tag);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.scan(CF_DEAD_LETTERS)
    }

    async fn pending(&self) -> Result<usize> {
        let cursor = self.queue.cursor.lock().await;
        Ok(cursor.ready.len() + cursor.unacked.len())
    }

    async fn ping(&self) -> Result<()> {
        self.cf(CF_QUEUE).map(|_| ())
    }
}
