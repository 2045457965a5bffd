//! Transaction scope for one receive/send unit of work.
//!
//! A transport attaches completion hooks to the context while it works. When
//! the bus runtime finishes the unit of work it calls [`TransactionContext::commit`]
//! or [`TransactionContext::abort`]; both consume the context, so every hook is
//! dispatched exactly once with the final [`TransactionOutcome`].

use crate::error::TransportError;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Handlers succeeded; side effects must be made durable.
    Committed,
    /// The unit of work failed; side effects must be rolled back.
    Aborted,
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Committed => write!(f, "committed"),
            TransactionOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

type CompletionHook =
    Box<dyn FnOnce(TransactionOutcome) -> BoxFuture<'static, Result<(), TransportError>> + Send>;

/// Per-transaction state shared between the bus runtime and a transport.
pub struct TransactionContext {
    id: Uuid,
    hooks: Vec<CompletionHook>,
    items: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            hooks: Vec::new(),
            items: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of hooks waiting for the outcome.
    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Register a hook that receives the transaction outcome.
    ///
    /// Hooks run in reverse registration order.
    pub fn on_completed<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce(TransactionOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        self.hooks
            .push(Box::new(move |outcome| Box::pin(hook(outcome))));
    }

    /// Get a typed item stored under `key`.
    pub fn item<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.items.get(key).and_then(|item| item.downcast_ref::<T>())
    }

    /// Store a typed item under `key`, replacing any previous one.
    pub fn insert_item<T: Any + Send + Sync>(&mut self, key: &'static str, item: T) {
        self.items.insert(key, Box::new(item));
    }

    /// Commit the transaction.
    pub async fn commit(self) -> Result<(), TransportError> {
        self.complete(TransactionOutcome::Committed).await
    }

    /// Abort the transaction.
    pub async fn abort(self) -> Result<(), TransportError> {
        self.complete(TransactionOutcome::Aborted).await
    }

    /// Dispatch `outcome` to every registered hook.
    ///
    /// When a hook fails during commit, the hooks that have not run yet are
    /// dispatched with [`TransactionOutcome::Aborted`] instead. The first error
    /// is returned after every hook has run.
    pub async fn complete(mut self, outcome: TransactionOutcome) -> Result<(), TransportError> {
        let hooks = std::mem::take(&mut self.hooks);
        debug!(
            transaction_id = %self.id,
            outcome = %outcome,
            hooks = hooks.len(),
            "Completing transaction"
        );

        let mut effective = outcome;
        let mut first_error = None;

        for hook in hooks.into_iter().rev() {
            if let Err(e) = hook(effective).await {
                if effective == TransactionOutcome::Committed {
                    warn!(
                        transaction_id = %self.id,
                        error = %e,
                        "Commit hook failed, aborting remaining hooks"
                    );
                    effective = TransactionOutcome::Aborted;
                } else {
                    warn!(transaction_id = %self.id, error = %e, "Abort hook failed");
                }
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.hooks.is_empty() {
            warn!(
                transaction_id = %self.id,
                hooks = self.hooks.len(),
                "Transaction dropped without commit or abort"
            );
        }
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("pending_hooks", &self.hooks.len())
            .field("items", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_hook(
        log: &Arc<Mutex<Vec<(String, TransactionOutcome)>>>,
        name: &str,
        fail: bool,
    ) -> impl FnOnce(TransactionOutcome) -> BoxFuture<'static, Result<(), TransportError>> {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |outcome| {
            Box::pin(async move {
                log.lock().unwrap().push((name, outcome));
                if fail {
                    Err(TransportError::Config("hook failed".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_commit_dispatches_each_hook_once_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();
        ctx.on_completed(recording_hook(&log, "receive", false));
        ctx.on_completed(recording_hook(&log, "send", false));

        ctx.commit().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                ("send".to_string(), TransactionOutcome::Committed),
                ("receive".to_string(), TransactionOutcome::Committed),
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_dispatches_aborted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();
        ctx.on_completed(recording_hook(&log, "receive", false));

        ctx.abort().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("receive".to_string(), TransactionOutcome::Aborted)]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_hook_aborts_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();
        ctx.on_completed(recording_hook(&log, "receive", false));
        ctx.on_completed(recording_hook(&log, "send", true));

        let result = ctx.commit().await;

        assert!(matches!(result, Err(TransportError::Config(_))));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("send".to_string(), TransactionOutcome::Committed),
                ("receive".to_string(), TransactionOutcome::Aborted),
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_runs_all_hooks_even_when_one_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();
        ctx.on_completed(recording_hook(&log, "first", false));
        ctx.on_completed(recording_hook(&log, "second", true));

        assert!(ctx.abort().await.is_err());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_items_are_typed() {
        let mut ctx = TransactionContext::new();
        ctx.insert_item("count", 3usize);

        assert_eq!(ctx.item::<usize>("count"), Some(&3));
        assert_eq!(ctx.item::<String>("count"), None);
        assert_eq!(ctx.item::<usize>("missing"), None);
    }
}
