use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MessagingResult;

/// A unit of work opened around a gateway call.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> MessagingResult<()>;

    async fn rollback(self: Box<Self>) -> MessagingResult<()>;
}

/// Opens transactions. Gateways look factories up by reference name.
#[async_trait]
pub trait TransactionFactory: Send + Sync {
    async fn begin(&self) -> MessagingResult<Box<dyn Transaction>>;
}

/// Transactions opened for one call, finished in reverse opening order.
#[derive(Default)]
pub(crate) struct TransactionScope {
    open: Vec<Box<dyn Transaction>>,
}

impl TransactionScope {
    pub(crate) async fn begin(factories: &[Arc<dyn TransactionFactory>]) -> MessagingResult<Self> {
        let mut scope = Self::default();
        for factory in factories {
            match factory.begin().await {
                Ok(transaction) => scope.open.push(transaction),
                Err(e) => {
                    scope.rollback().await;
                    return Err(e);
                }
            }
        }
        Ok(scope)
    }

    pub(crate) async fn commit(mut self) -> MessagingResult<()> {
        while let Some(transaction) = self.open.pop() {
            if let Err(e) = transaction.commit().await {
                self.rollback().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Rolls back everything still open. Rollback failures are logged, the
    /// original error is what the caller sees.
    pub(crate) async fn rollback(mut self) {
        while let Some(transaction) = self.open.pop() {
            if let Err(e) = transaction.rollback().await {
                tracing::warn!(error = %e, "Transaction rollback failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records `begin`, `commit` and `rollback` calls as strings.
    pub(crate) struct RecordingFactory {
        pub(crate) name: &'static str,
        pub(crate) log: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingTransaction {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransactionFactory for RecordingFactory {
        async fn begin(&self) -> MessagingResult<Box<dyn Transaction>> {
            self.log.lock().push(format!("begin {}", self.name));
            Ok(Box::new(RecordingTransaction {
                name: self.name,
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[async_trait]
    impl Transaction for RecordingTransaction {
        async fn commit(self: Box<Self>) -> MessagingResult<()> {
            self.log.lock().push(format!("commit {}", self.name));
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> MessagingResult<()> {
            self.log.lock().push(format!("rollback {}", self.name));
            Ok(())
        }
    }

    fn factories(log: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn TransactionFactory>> {
        ["a", "b"]
            .into_iter()
            .map(|name| {
                Arc::new(RecordingFactory {
                    name,
                    log: Arc::clone(log),
                }) as Arc<dyn TransactionFactory>
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commit_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = TransactionScope::begin(&factories(&log)).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(*log.lock(), vec!["begin a", "begin b", "commit b", "commit a"]);
    }

    #[tokio::test]
    async fn test_rollback_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = TransactionScope::begin(&factories(&log)).await.unwrap();
        scope.rollback().await;
        assert_eq!(
            *log.lock(),
            vec!["begin a", "begin b", "rollback b", "rollback a"]
        );
    }
}
