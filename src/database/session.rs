//! # Sessions
//!
//! A [`Session`] is one client's connection to a [`Database`]. It owns the
//! session-default deferral table and at most one open [`Transaction`].
//!
//! ## Transaction Blocks
//!
//! ```text
//! execute() outside a block:  begin ─> statement ─> end_statement ─> commit
//! begin():                    opens a block; statements join it
//! commit():                   fire all remaining deferred events, commit
//! rollback():                 discard deferred events, abort
//! ```
//!
//! An error from a statement or from commit-time firing aborts the
//! transaction and leaves the session outside any block.
//!
//! ## SET CONSTRAINTS Scope
//!
//! | Issued                      | Table changed          | Lifetime              |
//! |-----------------------------|------------------------|-----------------------|
//! | outside a transaction block | session defaults       | until changed again   |
//! | inside a transaction block  | transaction's own copy | until transaction end |
//!
//! Inside a block, items that became immediate fire when the command ends.
//! Errors from name resolution leave the transaction usable.

use super::transaction::Transaction;
use super::Database;
use crate::deferred::{apply_set_constraints, ConstraintTarget, DeferredQueue, DeferredStatus};
use crate::executor::ModifyTable;
use crate::mvcc::{IsolationLevel, TxnId};
use crate::types::{RelationId, Row};
use eyre::{bail, Result};
use std::sync::Arc;

pub struct Session {
    db: Arc<Database>,
    defaults: DeferredStatus,
    txn: Option<Transaction>,
}

impl Session {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            defaults: DeferredStatus::new(),
            txn: None,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn defaults(&self) -> &DeferredStatus {
        &self.defaults
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.as_ref().is_some_and(Transaction::is_explicit)
    }

    pub fn xid(&self) -> Option<TxnId> {
        self.txn.as_ref().map(Transaction::xid)
    }

    pub fn deferred_queue(&self) -> Option<&DeferredQueue> {
        self.txn.as_ref().map(Transaction::queue)
    }

    pub fn begin(&mut self) -> Result<()> {
        let isolation = self.db.config().isolation;
        self.begin_with(isolation)
    }

    pub fn begin_with(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.txn.is_some() {
            bail!("a transaction is already in progress");
        }
        self.txn = Some(Transaction::begin(
            self.db.transactions(),
            isolation,
            &self.defaults,
            true,
        ));
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let Some(mut txn) = self.txn.take() else {
            bail!("no transaction in progress");
        };
        let fired = match txn.queue_mut().end_transaction(&self.db.fire_env()) {
            Ok(fired) => fired,
            Err(err) => {
                txn.queue_mut().abort();
                self.db.transactions().abort(txn.xid())?;
                tracing::debug!(xid = txn.xid(), "deferred trigger failed at commit");
                return Err(err);
            }
        };
        self.db.transactions().commit(txn.xid())?;
        tracing::debug!(xid = txn.xid(), fired, "transaction committed");
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let Some(mut txn) = self.txn.take() else {
            bail!("no transaction in progress");
        };
        Self::abort_txn(&self.db, &mut txn)
    }

    /// `SET CONSTRAINTS { ALL | name, ... } { DEFERRED | IMMEDIATE }`.
    pub fn set_constraints(&mut self, target: ConstraintTarget, deferred: bool) -> Result<()> {
        let db = Arc::clone(&self.db);
        let Some(txn) = self.txn.as_mut() else {
            let catalog = db.catalog().read();
            return apply_set_constraints(
                &mut self.defaults,
                &target,
                deferred,
                &catalog,
                db.functions(),
            );
        };
        {
            let catalog = db.catalog().read();
            apply_set_constraints(
                txn.queue_mut().status_mut(),
                &target,
                deferred,
                &catalog,
                db.functions(),
            )?;
        }
        let fired = txn.queue_mut().end_statement(&db.fire_env());
        if let Err(err) = fired {
            self.abort_current();
            return Err(err);
        }
        Ok(())
    }

    /// Runs one statement, in the open block or as its own transaction.
    /// Returns the number of rows written.
    pub fn execute(&mut self, stmt: ModifyTable) -> Result<usize> {
        let autocommit = self.txn.is_none();
        if autocommit {
            self.txn = Some(Transaction::begin(
                self.db.transactions(),
                self.db.config().isolation,
                &self.defaults,
                false,
            ));
        }
        match self.run_statement(stmt) {
            Ok(count) => {
                if autocommit {
                    self.commit()?;
                }
                Ok(count)
            }
            Err(err) => {
                self.abort_current();
                Err(err)
            }
        }
    }

    /// Rows of `rel` visible to the next statement of this session.
    pub fn scan(&mut self, rel: RelationId) -> Result<Vec<Row>> {
        let db = Arc::clone(&self.db);
        let rows = match &self.txn {
            Some(txn) => {
                let snapshot = txn.statement_snapshot(db.transactions());
                db.store().scan(rel, &snapshot)?
            }
            None => {
                let xid = db.transactions().begin();
                let rows = db.store().scan(rel, &db.transactions().snapshot(xid));
                db.transactions().commit(xid)?;
                rows?
            }
        };
        Ok(rows.into_iter().map(|stored| stored.row).collect())
    }

    fn run_statement(&mut self, stmt: ModifyTable) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let Some(txn) = self.txn.as_mut() else {
            bail!("no transaction in progress");
        };
        let snapshot = txn.statement_snapshot(db.transactions());
        let isolation = txn.isolation();
        let count = stmt.execute(&db.statement_env(), &snapshot, isolation, txn.queue_mut())?;
        txn.queue_mut().end_statement(&db.fire_env())?;
        Ok(count)
    }

    fn abort_current(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            if let Err(err) = Self::abort_txn(&self.db, &mut txn) {
                tracing::warn!(xid = txn.xid(), %err, "failed to abort transaction");
            }
        }
    }

    fn abort_txn(db: &Database, txn: &mut Transaction) -> Result<()> {
        txn.queue_mut().abort();
        db.transactions().abort(txn.xid())?;
        tracing::debug!(xid = txn.xid(), "transaction aborted");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_current();
    }
}
