use crate::config::PipelineConfig;
use crate::domain::account::{Account, AccountId, Amount};
use crate::domain::message::TransactionMessage;
use crate::domain::ports::{SharedLedgerStore, SharedQueue};
use crate::domain::transaction::{Transaction, TransactionId, TransactionType};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// A client's transaction request as received by the gateway.
///
/// `type` is kept as free text so that unknown values can be rejected as
/// invalid input rather than failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub id: String,
    pub r#type: String,
    pub amount: Decimal,
    pub account_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Successful gateway answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The id is already recorded in the ledger; nothing was enqueued.
    AlreadyProcessed,
    /// A deposit or withdraw was enqueued unmodified.
    Received,
    /// The balance covered the request; the audit record and the debit were
    /// both enqueued.
    WithdrawApproved,
}

impl SubmitOutcome {
    pub fn status(&self) -> u16 {
        match self {
            SubmitOutcome::AlreadyProcessed | SubmitOutcome::Received => 200,
            SubmitOutcome::WithdrawApproved => 201,
        }
    }

    pub fn detail(&self) -> &'static str {
        match self {
            SubmitOutcome::AlreadyProcessed => "Transaction already processed",
            SubmitOutcome::Received => "Transaction received",
            SubmitOutcome::WithdrawApproved => "withdraw_request approved",
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid transaction type")]
    InvalidType(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(LedgerError),
    #[error("Insufficient funds")]
    InsufficientFunds,
    /// Reported after the messages were already published; the debit still
    /// applies eventually.
    #[error("Withdraw_request timed out")]
    Timeout { elapsed: Duration },
    #[error("Account not found")]
    AccountNotFound,
    #[error("Internal error: {0}")]
    Ledger(#[from] LedgerError),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::InvalidType(_) | GatewayError::InvalidAmount(_) => 400,
            GatewayError::InsufficientFunds | GatewayError::Timeout { .. } => 402,
            GatewayError::AccountNotFound => 404,
            GatewayError::Ledger(_) => 500,
        }
    }
}

/// `{detail, status}` shape returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub detail: String,
    pub status: u16,
}

impl From<&Result<SubmitOutcome, GatewayError>> for Response {
    fn from(result: &Result<SubmitOutcome, GatewayError>) -> Self {
        match result {
            Ok(outcome) => Self {
                detail: outcome.detail().to_string(),
                status: outcome.status(),
            },
            Err(err) => Self {
                detail: err.to_string(),
                status: err.status(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub id: String,
    pub balance: Decimal,
}

impl From<Account> for AccountBalance {
    fn from(account: Account) -> Self {
        Self {
            id: account.id.to_string(),
            balance: account.balance.value(),
        }
    }
}

/// Liveness of each collaborator: `healthy` or `unhealthy: <reason>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub api: String,
    pub db: String,
    pub queue: String,
}

/// Synchronous entry point of the pipeline.
///
/// Decides whether a request may proceed and publishes accepted requests onto
/// the queue. It never changes a balance itself; that is left to the
/// `TransactionApplier`.
///
/// The balance read and the publishes are not atomic: concurrent
/// `withdraw_request`s on one account can all be approved against the same
/// pre-debit balance.
pub struct AdmissionGateway {
    store: SharedLedgerStore,
    queue: SharedQueue,
    withdraw_budget: Duration,
}

impl AdmissionGateway {
    pub fn new(store: SharedLedgerStore, queue: SharedQueue, config: &PipelineConfig) -> Self {
        Self {
            store,
            queue,
            withdraw_budget: config.withdraw_budget,
        }
    }

    /// Admits, rejects or short-circuits one request.
    #[instrument(
        skip(self, request),
        fields(tx_id = %request.id, account_id = %request.account_id, kind = %request.r#type)
    )]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, GatewayError> {
        let tx_id = TransactionId::new(request.id);
        let account_id = AccountId::new(request.account_id);

        if self.store.transaction_exists(&tx_id).await? {
            info!("duplicate transaction id, nothing enqueued");
            return Ok(SubmitOutcome::AlreadyProcessed);
        }

        let amount = Amount::new(request.amount).map_err(GatewayError::InvalidAmount)?;

        let account = self.store.get_or_create_account(&account_id).await?;
        let timestamp = request.timestamp.unwrap_or_else(Utc::now);

        let r#type = request
            .r#type
            .parse::<TransactionType>()
            .map_err(|_| GatewayError::InvalidType(request.r#type.clone()))?;

        let message =
            TransactionMessage::new(tx_id, r#type, amount.value(), account_id, timestamp);

        match r#type {
            TransactionType::WithdrawRequest => {
                self.admit_withdraw(&account, amount, message).await
            }
            TransactionType::Deposit | TransactionType::Withdraw => {
                self.enqueue(&message).await?;
                info!("transaction enqueued");
                Ok(SubmitOutcome::Received)
            }
        }
    }

    async fn admit_withdraw(
        &self,
        account: &Account,
        amount: Amount,
        request: TransactionMessage,
    ) -> Result<SubmitOutcome, GatewayError> {
        let started = Instant::now();

        // Checked against the unrounded amount: 10.004 is not covered by 10.00.
        if !account.balance.covers(amount.requested()) {
            info!(balance = %account.balance, amount = %amount.requested(), "withdraw_request rejected");
            return Err(GatewayError::InsufficientFunds);
        }

        let debit = TransactionMessage::new(
            TransactionId::generate(),
            TransactionType::Withdraw,
            request.amount,
            request.account_id.clone(),
            Utc::now(),
        );
        self.enqueue(&request).await?;
        self.enqueue(&debit).await?;

        let elapsed = started.elapsed();
        if elapsed > self.withdraw_budget {
            warn!(
                ?elapsed,
                withdraw_id = %debit.id,
                "withdraw_request exceeded its budget; the debit is already enqueued"
            );
            return Err(GatewayError::Timeout { elapsed });
        }

        info!(withdraw_id = %debit.id, "withdraw_request approved");
        Ok(SubmitOutcome::WithdrawApproved)
    }

    async fn enqueue(&self, message: &TransactionMessage) -> Result<(), GatewayError> {
        self.queue.publish(message.to_bytes()?).await?;
        Ok(())
    }

    /// Current balance of a known account.
    pub async fn balance(&self, account_id: &str) -> Result<AccountBalance, GatewayError> {
        self.store
            .get_account(&AccountId::new(account_id))
            .await?
            .map(AccountBalance::from)
            .ok_or(GatewayError::AccountNotFound)
    }

    /// Every account and its balance.
    pub async fn accounts(&self) -> Result<Vec<AccountBalance>, GatewayError> {
        Ok(self
            .store
            .all_accounts()
            .await?
            .into_iter()
            .map(AccountBalance::from)
            .collect())
    }

    /// Every applied transaction.
    pub async fn transactions(&self) -> Result<Vec<Transaction>, GatewayError> {
        Ok(self.store.all_transactions().await?)
    }

    pub async fn status(&self) -> ServiceStatus {
        fn describe(result: crate::error::Result<()>) -> String {
            match result {
                Ok(()) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {e}"),
            }
        }

        ServiceStatus {
            api: "healthy".to_string(),
            db: describe(self.store.ping().await),
            queue: describe(self.queue.ping().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{LedgerStore, TransactionQueue};
    use crate::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryQueue};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn gateway() -> (AdmissionGateway, InMemoryLedgerStore, InMemoryQueue) {
        let store = InMemoryLedgerStore::new();
        let queue = InMemoryQueue::new("transactions_queue");
        let gateway = AdmissionGateway::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            &PipelineConfig::default(),
        );
        (gateway, store, queue)
    }

    fn request(id: &str, r#type: &str, amount: Decimal, account: &str) -> SubmitRequest {
        SubmitRequest {
            id: id.to_string(),
            r#type: r#type.to_string(),
            amount,
            account_id: account.to_string(),
            timestamp: None,
        }
    }

    async fn seed_balance(store: &InMemoryLedgerStore, account: &str, amount: Decimal) {
        let id = AccountId::new(account);
        let guard = store.lock_account(&id).await.unwrap();
        let mut acc = store.get_or_create_account(&id).await.unwrap();
        acc.deposit(amount);
        let tx = Transaction::new(
            TransactionId::generate(),
            id,
            TransactionType::Deposit,
            amount,
            Utc::now(),
        );
        store.commit(&guard, acc, tx).await.unwrap();
    }

    async fn drain_messages(queue: &InMemoryQueue) -> Vec<TransactionMessage> {
        let mut messages = Vec::new();
        while let Some(delivery) = queue.try_receive().await.unwrap() {
            messages.push(TransactionMessage::parse(&delivery.body).unwrap());
            queue.ack(delivery.tag).await.unwrap();
        }
        messages
    }

    #[tokio::test]
    async fn test_deposit_is_enqueued_unmodified() {
        let (gateway, store, queue) = gateway();
        let outcome = gateway
            .submit(request("T1", "deposit", dec!(100), "A"))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Received);
        assert_eq!(outcome.status(), 200);

        let messages = drain_messages(&queue).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_str(), "T1");
        assert_eq!(messages[0].r#type, TransactionType::Deposit);
        assert_eq!(messages[0].amount, dec!(100));

        // gateway never changes balances
        let account = store.get_account(&"A".into()).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_approved_withdraw_request_emits_two_messages() {
        let (gateway, store, queue) = gateway();
        seed_balance(&store, "A", dec!(100)).await;

        let outcome = gateway
            .submit(request("W1", "withdraw_request", dec!(50), "A"))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::WithdrawApproved);
        assert_eq!(outcome.status(), 201);

        let messages = drain_messages(&queue).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_str(), "W1");
        assert_eq!(messages[0].r#type, TransactionType::WithdrawRequest);
        assert_eq!(messages[1].r#type, TransactionType::Withdraw);
        assert_ne!(messages[1].id.as_str(), "W1");
        assert_eq!(messages[1].amount, dec!(50));
        assert_eq!(messages[1].account_id.as_str(), "A");
    }

    #[tokio::test]
    async fn test_withdraw_request_with_exact_balance_is_approved() {
        let (gateway, store, queue) = gateway();
        seed_balance(&store, "A", dec!(100)).await;

        let outcome = gateway
            .submit(request("W1", "withdraw_request", dec!(100), "A"))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::WithdrawApproved);
        assert_eq!(queue.pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejects_without_side_effects() {
        let (gateway, store, queue) = gateway();
        seed_balance(&store, "A", dec!(100)).await;

        let err = gateway
            .submit(request("W1", "withdraw_request", dec!(200), "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds));
        assert_eq!(err.status(), 402);
        assert_eq!(queue.pending().await.unwrap(), 0);

        let account = store.get_account(&"A".into()).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), dec!(100));
    }

    #[tokio::test]
    async fn test_unknown_account_is_created_then_rejected() {
        let (gateway, store, queue) = gateway();

        let err = gateway
            .submit(request("W1", "withdraw_request", dec!(1), "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds));

        let account = store.get_account(&"B".into()).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), Decimal::ZERO);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_short_circuits() {
        let (gateway, store, queue) = gateway();
        let id = AccountId::new("A");
        let guard = store.lock_account(&id).await.unwrap();
        let account = store.get_or_create_account(&id).await.unwrap();
        let tx = Transaction::new(
            "T1".into(),
            id,
            TransactionType::Deposit,
            dec!(5),
            Utc::now(),
        );
        store.commit(&guard, account, tx).await.unwrap();

        let outcome = gateway
            .submit(request("T1", "deposit", dec!(5), "A"))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyProcessed);
        assert_eq!(
            Response::from(&Ok::<_, GatewayError>(outcome)).detail,
            "Transaction already processed"
        );
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_type_is_rejected() {
        let (gateway, _store, queue) = gateway();
        let result = gateway.submit(request("T1", "refund", dec!(5), "A")).await;
        let response = Response::from(&result);
        assert_eq!(response.status, 400);
        assert_eq!(response.detail, "Invalid transaction type");
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_rejected() {
        let (gateway, store, queue) = gateway();
        for amount in [dec!(0), dec!(-10)] {
            let err = gateway
                .submit(request("T1", "withdraw_request", amount, "A"))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidAmount(_)));
            assert_eq!(err.status(), 400);
        }
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(store.get_account(&"A".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_balance_lookup() {
        let (gateway, store, _queue) = gateway();
        seed_balance(&store, "A", dec!(42.5)).await;

        let balance = gateway.balance("A").await.unwrap();
        assert_eq!(
            balance,
            AccountBalance {
                id: "A".to_string(),
                balance: dec!(42.5)
            }
        );

        let missing = gateway.balance("nope").await.unwrap_err();
        assert!(matches!(missing, GatewayError::AccountNotFound));
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_listings_and_status() {
        let (gateway, store, _queue) = gateway();
        seed_balance(&store, "B", dec!(1)).await;
        seed_balance(&store, "A", dec!(2)).await;

        let accounts = gateway.accounts().await.unwrap();
        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(gateway.transactions().await.unwrap().len(), 2);

        let status = gateway.status().await;
        assert_eq!(status.api, "healthy");
        assert_eq!(status.db, "healthy");
        assert_eq!(status.queue, "healthy");
    }

    #[tokio::test]
    async fn test_withdraw_request_checks_unrounded_amount() {
        let (gateway, store, queue) = gateway();
        seed_balance(&store, "A", dec!(10)).await;

        let err = gateway
            .submit(request("W1", "withdraw_request", dec!(10.004), "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds));

        // Rounds up to a cent, still more than nothing.
        let err = gateway
            .submit(request("W2", "withdraw_request", dec!(0.006), "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds));
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sub_cent_amount_is_rejected_before_account_lookup() {
        let (gateway, store, queue) = gateway();
        for (id, kind) in [("W1", "withdraw_request"), ("D1", "deposit")] {
            let err = gateway
                .submit(request(id, kind, dec!(0.004), "B"))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidAmount(_)));
            assert_eq!(err.status(), 400);
        }
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(store.get_account(&"B".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recorded_id_short_circuits_before_amount_validation() {
        let (gateway, store, queue) = gateway();
        let id = AccountId::new("A");
        let guard = store.lock_account(&id).await.unwrap();
        let account = store.get_or_create_account(&id).await.unwrap();
        let tx = Transaction::new("T1".into(), id, TransactionType::Deposit, dec!(10), Utc::now());
        store.commit(&guard, account, tx).await.unwrap();

        let result = gateway.submit(request("T1", "deposit", dec!(0), "A")).await;
        let response = Response::from(&result);
        assert_eq!(response.status, 200);
        assert_eq!(response.detail, "Transaction already processed");
        assert_eq!(queue.pending().await.unwrap(), 0);
    }
}
