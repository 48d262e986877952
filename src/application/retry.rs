use crate::error::LedgerError;
use thiserror::Error;

/// Why a message could not be applied.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The body can never be applied; retrying is pointless.
    #[error("malformed message: {0}")]
    Malformed(LedgerError),
    /// Lock, read or commit failed; the same message may succeed later.
    #[error("storage failure: {0}")]
    Storage(LedgerError),
}

impl ApplyError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApplyError::Storage(_))
    }
}

/// How a delivery is settled with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter(String),
}

/// Bounded redelivery: a retriable failure is requeued until the message has
/// been delivered `max_attempts` times, then dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// `attempt` is 1-indexed: the delivery count of the failed message.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn disposition(&self, error: &ApplyError, attempt: u32) -> Disposition {
        if error.is_retriable() && self.should_retry(attempt) {
            Disposition::Requeue
        } else if error.is_retriable() {
            Disposition::DeadLetter(format!("gave up after {attempt} attempts: {error}"))
        } else {
            Disposition::DeadLetter(error.to_string())
        }
    }
}
