use super::retry::{ApplyError, Disposition, RetryPolicy};
use crate::config::PipelineConfig;
use crate::domain::account::Account;
use crate::domain::message::TransactionMessage;
use crate::domain::ports::{Delivery, SharedLedgerStore, SharedQueue};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Result of applying one message.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The balance change and the transaction record were committed.
    Applied(Transaction),
    /// The id was already recorded; nothing changed.
    Duplicate,
}

/// The queue consumer.
///
/// Handles one delivery at a time and settles it before asking for the next,
/// so within one applier messages are applied in dequeue order. Several
/// appliers may share a store; they serialize on the per-account lock and the
/// store's id uniqueness.
pub struct TransactionApplier {
    store: SharedLedgerStore,
    queue: SharedQueue,
    retry: RetryPolicy,
}

impl TransactionApplier {
    pub fn new(store: SharedLedgerStore, queue: SharedQueue, config: &PipelineConfig) -> Self {
        Self {
            store,
            queue,
            retry: RetryPolicy::new(config.max_attempts),
        }
    }

    /// Applies one message body to the ledger, at most once per transaction id.
    ///
    /// Nothing is written unless the whole apply commits.
    pub async fn apply(&self, body: &[u8]) -> std::result::Result<ApplyOutcome, ApplyError> {
        let message = TransactionMessage::parse(body).map_err(ApplyError::Malformed)?;

        if self
            .store
            .transaction_exists(&message.id)
            .await
            .map_err(ApplyError::Storage)?
        {
            debug!(tx_id = %message.id, "already applied, skipping");
            return Ok(ApplyOutcome::Duplicate);
        }

        let guard = self
            .store
            .lock_account(&message.account_id)
            .await
            .map_err(ApplyError::Storage)?;
        // An unknown account starts at zero and is only persisted by the commit.
        let mut account = self
            .store
            .get_account(&message.account_id)
            .await
            .map_err(ApplyError::Storage)?
            .unwrap_or_else(|| Account::new(message.account_id.clone()));

        match message.r#type {
            TransactionType::Deposit => account.deposit(message.amount),
            TransactionType::WithdrawRequest => {}
            TransactionType::Withdraw => account.debit(message.amount),
        }

        let tx = message.into_transaction();
        match self.store.commit(&guard, account, tx.clone()).await {
            Ok(()) => Ok(ApplyOutcome::Applied(tx)),
            Err(LedgerError::DuplicateTransaction(_)) => Ok(ApplyOutcome::Duplicate),
            Err(e) => Err(ApplyError::Storage(e)),
        }
    }

    /// Applies a delivery and settles it with the queue.
    #[instrument(skip(self, delivery), fields(tag = delivery.tag, attempt = delivery.attempt))]
    pub async fn handle(&self, delivery: Delivery) -> Result<Disposition> {
        let disposition = match self.apply(&delivery.body).await {
            Ok(ApplyOutcome::Applied(tx)) => {
                info!(
                    tx_id = %tx.id,
                    account_id = %tx.account_id,
                    kind = %tx.r#type,
                    amount = %tx.amount,
                    "transaction applied"
                );
                Disposition::Ack
            }
            Ok(ApplyOutcome::Duplicate) => Disposition::Ack,
            Err(e) => {
                let disposition = self.retry.disposition(&e, delivery.attempt);
                match &disposition {
                    Disposition::Requeue => warn!(error = %e, "apply failed, requeueing"),
                    Disposition::DeadLetter(reason) => {
                        error!(%reason, "message dead-lettered")
                    }
                    Disposition::Ack => {}
                }
                disposition
            }
        };

        match &disposition {
            Disposition::Ack => self.queue.ack(delivery.tag).await?,
            Disposition::Requeue => self.queue.requeue(delivery.tag).await?,
            Disposition::DeadLetter(reason) => {
                self.queue.dead_letter(delivery.tag, reason.clone()).await?
            }
        }
        Ok(disposition)
    }

    /// Handles deliveries until the queue has nothing ready.
    ///
    /// Returns the number of deliveries handled, requeued ones included.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(delivery) = self.queue.try_receive().await? {
            self.handle(delivery).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Consumes until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(queue = self.queue.name(), "applier started, waiting for messages");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                delivery = self.queue.receive() => {
                    if let Err(e) = self.handle(delivery?).await {
                        error!(error = %e, "failed to settle delivery");
                    }
                }
            }
        }
        info!(queue = self.queue.name(), "applier stopped");
        Ok(())
    }
}
