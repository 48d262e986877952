use crate::domain::account::AccountId;
use crate::domain::ports::AccountGuard;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Table of per-account async mutexes.
///
/// Emulates a row lock (`SELECT ... FOR UPDATE`) for backends without one.
/// Entries are created on first use and kept for the lifetime of the table.
#[derive(Default, Clone)]
pub struct AccountLocks {
    locks: Arc<Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `account_id`.
    pub async fn acquire(&self, account_id: &AccountId) -> AccountGuard {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(account_id.clone()).or_default().clone()
        };
        AccountGuard::new(account_id.clone(), lock.lock_owned().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = AccountLocks::new();
        let id = AccountId::new("A");
        let guard = locks.acquire(&id).await;

        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move { locks.acquire(&id).await.account_id().clone() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.acquire(&AccountId::new("A")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&AccountId::new("B")))
            .await
            .expect("lock on B must not wait for A");
        assert_eq!(b.account_id().as_str(), "B");
    }
}
