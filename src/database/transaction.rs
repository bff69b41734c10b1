//! # Transaction State
//!
//! A [`Transaction`] is the per-transaction state a session carries between
//! statements:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Transaction                                          │
//! │   xid          id allocated at begin                 │
//! │   isolation    fixed at begin                        │
//! │   snapshot     SERIALIZABLE only: taken at begin     │
//! │   queue        deferred AFTER events + deferral table│
//! │   explicit     opened by BEGIN (vs. autocommit)      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The deferral table inside the queue starts as a copy of the session
//! defaults and never outlives the transaction.

use crate::deferred::{DeferredQueue, DeferredStatus};
use crate::mvcc::{IsolationLevel, Snapshot, TransactionManager, TxnId};

#[derive(Debug)]
pub struct Transaction {
    xid: TxnId,
    isolation: IsolationLevel,
    snapshot: Option<Snapshot>,
    queue: DeferredQueue,
    explicit: bool,
}

impl Transaction {
    pub fn begin(
        txns: &TransactionManager,
        isolation: IsolationLevel,
        defaults: &DeferredStatus,
        explicit: bool,
    ) -> Self {
        let xid = txns.begin();
        let snapshot = match isolation {
            IsolationLevel::Serializable => Some(txns.snapshot(xid)),
            IsolationLevel::ReadCommitted => None,
        };
        tracing::debug!(xid, ?isolation, explicit, "transaction started");
        Self {
            xid,
            isolation,
            snapshot,
            queue: DeferredQueue::begin(defaults),
            explicit,
        }
    }

    pub fn xid(&self) -> TxnId {
        self.xid
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Snapshot the next statement runs with.
    pub fn statement_snapshot(&self, txns: &TransactionManager) -> Snapshot {
        match &self.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => txns.snapshot(self.xid),
        }
    }

    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut DeferredQueue {
        &mut self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializable_keeps_one_snapshot() {
        let txns = TransactionManager::new();
        let txn = Transaction::begin(
            &txns,
            IsolationLevel::Serializable,
            &DeferredStatus::new(),
            true,
        );
        let before = txn.statement_snapshot(&txns);
        let other = txns.begin();
        txns.commit(other).unwrap();
        assert_eq!(txn.statement_snapshot(&txns).xmax(), before.xmax());
    }

    #[test]
    fn read_committed_takes_fresh_snapshots() {
        let txns = TransactionManager::new();
        let txn = Transaction::begin(
            &txns,
            IsolationLevel::ReadCommitted,
            &DeferredStatus::new(),
            true,
        );
        let before = txn.statement_snapshot(&txns);
        let other = txns.begin();
        txns.commit(other).unwrap();
        assert!(txn.statement_snapshot(&txns).xmax() > before.xmax());
    }

    #[test]
    fn deferral_table_is_copied_from_defaults() {
        let txns = TransactionManager::new();
        let mut defaults = DeferredStatus::new();
        defaults.set_all(true);
        let mut txn = Transaction::begin(&txns, IsolationLevel::ReadCommitted, &defaults, false);
        txn.queue_mut().status_mut().set_all(false);
        assert_eq!(defaults.all(), Some(true));
        assert_eq!(txn.queue().status().all(), Some(false));
    }
}
