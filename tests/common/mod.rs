#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use ledgerq::application::applier::TransactionApplier;
use ledgerq::application::gateway::{AdmissionGateway, SubmitRequest};
use ledgerq::config::PipelineConfig;
use ledgerq::domain::account::{Account, AccountId};
use ledgerq::domain::message::TransactionMessage;
use ledgerq::domain::ports::{
    AccountGuard, DeadLetter, Delivery, LedgerStore, SharedLedgerStore, SharedQueue,
    TransactionQueue,
};
use ledgerq::domain::transaction::{Transaction, TransactionId, TransactionType};
use ledgerq::error::{LedgerError, Result};
use ledgerq::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryQueue};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Gateway and applier wired to the same in-memory backends.
pub struct Pipeline {
    pub store: InMemoryLedgerStore,
    pub queue: InMemoryQueue,
    pub gateway: AdmissionGateway,
    pub applier: TransactionApplier,
}

pub fn pipeline() -> Pipeline {
    pipeline_with(&PipelineConfig::default())
}

pub fn pipeline_with(config: &PipelineConfig) -> Pipeline {
    let store = InMemoryLedgerStore::new();
    let queue = InMemoryQueue::new(config.queue_name.clone());
    let shared_store: SharedLedgerStore = Arc::new(store.clone());
    let shared_queue: SharedQueue = Arc::new(queue.clone());
    Pipeline {
        gateway: AdmissionGateway::new(shared_store.clone(), shared_queue.clone(), config),
        applier: TransactionApplier::new(shared_store, shared_queue, config),
        store,
        queue,
    }
}

pub fn request(id: &str, r#type: &str, amount: Decimal, account: &str) -> SubmitRequest {
    SubmitRequest {
        id: id.to_string(),
        r#type: r#type.to_string(),
        amount,
        account_id: account.to_string(),
        timestamp: None,
    }
}

pub fn message_body(id: &str, r#type: TransactionType, amount: Decimal, account: &str) -> Vec<u8> {
    TransactionMessage::new(id.into(), r#type, amount, account.into(), Utc::now())
        .to_bytes()
        .expect("message serializes")
}

/// Ledger store whose first `failures` commits fail with a storage fault.
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    failures: AtomicU32,
    unreachable: bool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryLedgerStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            unreachable: false,
        }
    }

    /// Every `ping` fails; reads and writes still go through.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn transaction_exists(&self, tx_id: &TransactionId) -> Result<bool> {
        self.inner.transaction_exists(tx_id).await
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.inner.get_account(account_id).await
    }

    async fn get_or_create_account(&self, account_id: &AccountId) -> Result<Account> {
        self.inner.get_or_create_account(account_id).await
    }

    async fn lock_account(&self, account_id: &AccountId) -> Result<AccountGuard> {
        self.inner.lock_account(account_id).await
    }

    async fn commit(&self, guard: &AccountGuard, account: Account, tx: Transaction) -> Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::StorageFault("simulated commit failure".to_string()));
        }
        self.inner.commit(guard, account, tx).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.inner.all_accounts().await
    }

    async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        self.inner.all_transactions().await
    }

    async fn ping(&self) -> Result<()> {
        if self.unreachable {
            return Err(LedgerError::StorageFault("connection refused".to_string()));
        }
        self.inner.ping().await
    }
}

/// Queue whose publishes take `delay` each.
pub struct SlowQueue {
    inner: InMemoryQueue,
    delay: Duration,
}

impl SlowQueue {
    pub fn new(inner: InMemoryQueue, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl TransactionQueue for SlowQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(body).await
    }

    async fn receive(&self) -> Result<Delivery> {
        self.inner.receive().await
    }

    async fn try_receive(&self) -> Result<Option<Delivery>> {
        self.inner.try_receive().await
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        self.inner.ack(tag).await
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        self.inner.requeue(tag).await
    }

    async fn dead_letter(&self, tag: u64, reason: String) -> Result<()> {
        self.inner.dead_letter(tag, reason).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.inner.dead_letters().await
    }

    async fn pending(&self) -> Result<usize> {
        self.inner.pending().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Writes a request CSV with `rows` deposits of 1.00 spread over `accounts` accounts.
pub fn generate_csv(path: &Path, rows: usize, accounts: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["id", "type", "amount", "account_id", "timestamp"])?;

    for i in 1..=rows {
        let id = format!("tx-{i}");
        let account = format!("acc-{}", i % accounts);
        wtr.write_record([id.as_str(), "deposit", "1.00", account.as_str(), ""])?;
    }

    wtr.flush()?;
    Ok(())
}
