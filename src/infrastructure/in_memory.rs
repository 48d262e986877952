use super::locks::AccountLocks;
use crate::domain::account::{Account, AccountId};
use crate::domain::ports::{AccountGuard, DeadLetter, Delivery, LedgerStore, TransactionQueue};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    applied: Vec<TransactionId>,
}

/// A thread-safe in-memory ledger.
///
/// Accounts and transactions live behind a single `RwLock` so that `commit`
/// writes both or neither. Row locks come from an [`AccountLocks`] table.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    locks: AccountLocks,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn transaction_exists(&self, tx_id: &TransactionId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.transactions.contains_key(tx_id))
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(account_id).cloned())
    }

    async fn get_or_create_account(&self, account_id: &AccountId) -> Result<Account> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .entry(account_id.clone())
            .or_insert_with(|| Account::new(account_id.clone()));
        Ok(account.clone())
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

        let mut state = self.state.write().await;
        if state.transactions.contains_key(&tx.id) {
            return Err(LedgerError::DuplicateTransaction(tx.id.to_string()));
        }
        state.accounts.insert(account.id.clone(), account);
        state.applied.push(tx.id.clone());
        state.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .applied
            .iter()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct Stored {
    body: Vec<u8>,
    attempts: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    unacked: HashMap<u64, Stored>,
    dead: Vec<DeadLetter>,
    next_tag: u64,
}

impl QueueState {
    fn deliver(&mut self) -> Option<Delivery> {
        let mut stored = self.ready.pop_front()?;
        stored.attempts += 1;
        self.next_tag += 1;
        let delivery = Delivery {
            tag: self.next_tag,
            body: stored.body.clone(),
            attempt: stored.attempts,
        };
        self.unacked.insert(delivery.tag, stored);
        Some(delivery)
    }

    fn settle(&mut self, tag: u64) -> Result<Stored> {
        self.unacked
            .remove(&tag)
            .ok_or(LedgerError::UnknownDelivery(tag))
    }
}

/// A single named in-process queue.
///
/// Survives nothing beyond the process; use the RocksDB store for a queue that
/// outlives restarts.
#[derive(Clone)]
pub struct InMemoryQueue {
    name: Arc<str>,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl TransactionQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready.push_back(Stored { body, attempts: 0 });
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            if let Some(delivery) = self.state.lock().await.deliver() {
                return Ok(delivery);
            }
            self.notify.notified().await;
        }
    }

    async fn try_receive(&self) -> Result<Option<Delivery>> {
        Ok(self.state.lock().await.deliver())
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        self.state.lock().await.settle(tag).map(|_| ())
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.settle(tag)?;
        state.ready.push_front(stored);
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, tag: u64, reason: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.settle(tag)?;
        state.dead.push(DeadLetter {
            body: stored.body,
            attempts: stored.attempts,
            reason,
        });
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead.clone())
    }

    async fn pending(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.ready.len() + state.unacked.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
