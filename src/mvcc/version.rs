//! # Row Versions and Visibility Checks
//!
//! Every stored row version carries the transaction that created it (`xmin`),
//! the transaction that superseded, deleted or locked it (`xmax`), and, once
//! superseded by an update, a forwarding pointer to its successor.
//!
//! ## Version Chain Model
//!
//! ```text
//! ┌──────────────────┐  update by T7   ┌──────────────────┐
//! │ RowId (0,1)      │ ──────────────> │ RowId (0,2)      │
//! │ xmin: T3         │                 │ xmin: T7         │
//! │ xmax: T7         │                 │ xmax: -          │
//! │ forward: (0,2)   │                 │ forward: -       │
//! │ [id=1, qty=5]    │                 │ [id=1, qty=9]    │
//! └──────────────────┘                 └──────────────────┘
//! ```
//!
//! A deleted version has `xmax` set and no forwarding pointer. A version
//! locked for update has `xmax` set with `lock_only`; the lock evaporates
//! once the locker finishes.
//!
//! ## Checks
//!
//! - `check_snapshot`: ordinary reads
//! - `check_dirty`: resolver fetches; reports in-progress writers
//! - `check_write`: update/delete/lock; produces the write outcome a caller
//!   must act upon

use super::snapshot::Snapshot;
use super::transaction::{TransactionManager, TxnId, TxnState};
use crate::types::{Row, RowId};

#[derive(Debug, Clone, PartialEq)]
pub struct TupleVersion {
    pub xmin: TxnId,
    pub xmax: Option<TxnId>,
    pub lock_only: bool,
    pub forward: Option<RowId>,
    pub row: Row,
}

/// Outcome of attempting to write (update, delete or lock) one row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCheck {
    /// The version may be written.
    MayBeUpdated,
    /// Already modified by the writing transaction itself.
    SelfModified,
    /// Superseded by a committed transaction; `next` is absent when deleted.
    Updated { next: Option<RowId> },
    /// An in-progress transaction holds the version.
    BeingModified { writer: TxnId },
    /// The version was never visible to the writer (aborted or foreign insert).
    Invisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyCheck {
    Visible,
    BeingModified { writer: TxnId },
    /// Superseded or deleted by a committed transaction.
    Superseded { next: Option<RowId> },
    /// Removed by the fetching transaction itself, or never live.
    Gone,
}

impl TupleVersion {
    pub fn new(xmin: TxnId, row: Row) -> Self {
        Self {
            xmin,
            xmax: None,
            lock_only: false,
            forward: None,
            row,
        }
    }

    fn live_xmax(&self, mgr: &TransactionManager) -> Option<(TxnId, TxnState)> {
        let xmax = self.xmax?;
        match mgr.state(xmax) {
            TxnState::Aborted => None,
            state => Some((xmax, state)),
        }
    }

    pub fn check_snapshot(&self, snapshot: &Snapshot, mgr: &TransactionManager) -> bool {
        let own = snapshot.xid();
        let created_visible = self.xmin == own
            || (mgr.is_committed(self.xmin) && snapshot.includes_committed(self.xmin));
        if !created_visible {
            return false;
        }
        match self.live_xmax(mgr) {
            None => true,
            Some(_) if self.lock_only => true,
            Some((xmax, _)) if xmax == own => false,
            Some((xmax, TxnState::Committed)) => !snapshot.includes_committed(xmax),
            Some(_) => true,
        }
    }

    pub fn check_dirty(&self, own: TxnId, mgr: &TransactionManager) -> DirtyCheck {
        if self.xmin != own && !mgr.is_committed(self.xmin) {
            if mgr.is_in_progress(self.xmin) {
                return DirtyCheck::BeingModified { writer: self.xmin };
            }
            return DirtyCheck::Gone;
        }
        match self.live_xmax(mgr) {
            None => DirtyCheck::Visible,
            Some((xmax, _)) if xmax == own => {
                if self.lock_only {
                    DirtyCheck::Visible
                } else {
                    DirtyCheck::Gone
                }
            }
            Some((xmax, TxnState::Active)) => DirtyCheck::BeingModified { writer: xmax },
            Some(_) if self.lock_only => DirtyCheck::Visible,
            Some(_) => DirtyCheck::Superseded { next: self.forward },
        }
    }

    pub fn check_write(&self, own: TxnId, mgr: &TransactionManager) -> WriteCheck {
        if self.xmin != own && !mgr.is_committed(self.xmin) {
            return WriteCheck::Invisible;
        }
        match self.live_xmax(mgr) {
            None => WriteCheck::MayBeUpdated,
            Some((xmax, _)) if xmax == own => {
                if self.lock_only {
                    WriteCheck::MayBeUpdated
                } else {
                    WriteCheck::SelfModified
                }
            }
            Some((writer, TxnState::Active)) => WriteCheck::BeingModified { writer },
            Some(_) if self.lock_only => WriteCheck::MayBeUpdated,
            Some(_) => WriteCheck::Updated { next: self.forward },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnedValue;

    fn version(xmin: TxnId) -> TupleVersion {
        TupleVersion::new(xmin, Row::new(vec![OwnedValue::Int(1)]))
    }

    #[test]
    fn own_insert_is_visible_in_snapshot() {
        let mgr = TransactionManager::new();
        let xid = mgr.begin();
        let snap = mgr.snapshot(xid);
        assert!(version(xid).check_snapshot(&snap, &mgr));
    }

    #[test]
    fn concurrent_committed_update_stays_invisible_to_old_snapshot() {
        let mgr = TransactionManager::new();
        let reader = mgr.begin();
        let writer = mgr.begin();
        let snap = mgr.snapshot(reader);
        let mut old = version(0);
        old.xmax = Some(writer);
        old.forward = Some(RowId::new(0, 2));
        mgr.commit(writer).unwrap();
        assert!(old.check_snapshot(&snap, &mgr));
        assert!(!version(writer).check_snapshot(&snap, &mgr));
    }

    #[test]
    fn write_check_reports_committed_update_with_forward_pointer() {
        let mgr = TransactionManager::new();
        let me = mgr.begin();
        let other = mgr.begin();
        let mut old = version(0);
        old.xmax = Some(other);
        old.forward = Some(RowId::new(0, 2));
        assert_eq!(
            old.check_write(me, &mgr),
            WriteCheck::BeingModified { writer: other }
        );
        mgr.commit(other).unwrap();
        assert_eq!(
            old.check_write(me, &mgr),
            WriteCheck::Updated {
                next: Some(RowId::new(0, 2))
            }
        );
    }

    #[test]
    fn aborted_xmax_is_ignored() {
        let mgr = TransactionManager::new();
        let me = mgr.begin();
        let other = mgr.begin();
        let mut old = version(0);
        old.xmax = Some(other);
        mgr.abort(other).unwrap();
        assert_eq!(old.check_write(me, &mgr), WriteCheck::MayBeUpdated);
        assert_eq!(old.check_dirty(me, &mgr), DirtyCheck::Visible);
    }

    #[test]
    fn own_update_is_self_modified_and_gone_for_dirty_reads() {
        let mgr = TransactionManager::new();
        let me = mgr.begin();
        let mut old = version(0);
        old.xmax = Some(me);
        old.forward = Some(RowId::new(0, 3));
        assert_eq!(old.check_write(me, &mgr), WriteCheck::SelfModified);
        assert_eq!(old.check_dirty(me, &mgr), DirtyCheck::Gone);
    }

    #[test]
    fn committed_lock_does_not_block_writers() {
        let mgr = TransactionManager::new();
        let me = mgr.begin();
        let locker = mgr.begin();
        let mut v = version(0);
        v.xmax = Some(locker);
        v.lock_only = true;
        assert_eq!(
            v.check_write(me, &mgr),
            WriteCheck::BeingModified { writer: locker }
        );
        mgr.commit(locker).unwrap();
        assert_eq!(v.check_write(me, &mgr), WriteCheck::MayBeUpdated);
    }
}
