use super::account::{Account, AccountId};
use super::transaction::{Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Proof that the holder has exclusive access to one account row.
///
/// Released on drop.
#[derive(Debug)]
pub struct AccountGuard {
    account_id: AccountId,
    _permit: OwnedMutexGuard<()>,
}

impl AccountGuard {
    pub fn new(account_id: AccountId, permit: OwnedMutexGuard<()>) -> Self {
        Self {
            account_id,
            _permit: permit,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }
}

/// Persistent record of accounts and applied transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn transaction_exists(&self, tx_id: &TransactionId) -> Result<bool>;
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;
    /// Returns the account, inserting it with a zero balance when unknown.
    async fn get_or_create_account(&self, account_id: &AccountId) -> Result<Account>;
    /// Waits for exclusive access to the account row.
    async fn lock_account(&self, account_id: &AccountId) -> Result<AccountGuard>;
    /// Writes the mutated account and the new transaction as one atomic unit.
    ///
    /// Fails with `DuplicateTransaction` when the id is already recorded, in
    /// which case nothing is written.
    async fn commit(
        &self,
        guard: &AccountGuard,
        account: Account,
        tx: Transaction,
    ) -> Result<()>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;
    async fn all_transactions(&self) -> Result<Vec<Transaction>>;
    async fn ping(&self) -> Result<()>;
}

/// A message handed to a consumer and not yet settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every requeue.
    pub attempt: u32,
}

/// A message removed from circulation after it could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub body: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

/// Durable, ordered, at-least-once delivery channel.
///
/// A message stays persisted from `publish` until it is either acknowledged or
/// dead-lettered; requeued messages go back to the head of the queue.
#[async_trait]
pub trait TransactionQueue: Send + Sync {
    fn name(&self) -> &str;
    async fn publish(&self, body: Vec<u8>) -> Result<()>;
    /// Waits until a message is available.
    async fn receive(&self) -> Result<Delivery>;
    async fn try_receive(&self) -> Result<Option<Delivery>>;
    async fn ack(&self, tag: u64) -> Result<()>;
    async fn requeue(&self, tag: u64) -> Result<()>;
    async fn dead_letter(&self, tag: u64, reason: String) -> Result<()>;
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
    /// Ready plus unacknowledged messages.
    async fn pending(&self) -> Result<usize>;
    async fn ping(&self) -> Result<()>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;
pub type SharedQueue = Arc<dyn TransactionQueue>;
