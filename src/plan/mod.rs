//! # Restartable Query Plans
//!
//! Statements that modify rows are driven by a pull-based plan tree (Volcano
//! model). The concurrent-update resolver needs three things from a plan
//! that an ordinary executor would not:
//!
//! - it can be cloned (`box_clone`), so each re-evaluation frame owns a
//!   private copy;
//! - it can be restarted (`rescan`) without being rebuilt;
//! - scan nodes consult [`EpqInputs`]: a range-table position with a
//!   substituted row yields exactly that row once per scan instead of
//!   reading the relation.
//!
//! ```text
//! Project(new values)
//!     └── Filter(id = 1)
//!             └── SeqScan(accounts, rt#0)
//!                     ├── normal:       store.scan(snapshot)
//!                     └── re-evaluate:  EpqInputs[rt#0], once
//! ```
//!
//! Every output row carries, per range-table position, the stored row version
//! it was built from. The statement driver takes the target's identifier and
//! old row from there.

pub mod nodes;

pub use nodes::{
    column_equals, Filter, NestLoop, Predicate, Project, Projection, SeqScan, Values,
};

use crate::config::INLINE_RANGE_TABLE;
use crate::mvcc::{Snapshot, TxnId};
use crate::storage::{RowStore, StoredRow};
use crate::types::{Row, RtIndex};
use eyre::Result;
use smallvec::SmallVec;

/// Execution context shared by every node of one statement.
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub store: &'a dyn RowStore,
    pub snapshot: &'a Snapshot,
}

impl<'a> ExecContext<'a> {
    pub fn new(store: &'a dyn RowStore, snapshot: &'a Snapshot) -> Self {
        Self { store, snapshot }
    }

    pub fn xid(&self) -> TxnId {
        self.snapshot.xid()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRow {
    pub values: Row,
    pub sources: SmallVec<[(RtIndex, StoredRow); INLINE_RANGE_TABLE]>,
}

impl PlanRow {
    pub fn new(values: Row) -> Self {
        Self {
            values,
            sources: SmallVec::new(),
        }
    }

    pub fn from_source(rti: RtIndex, stored: StoredRow) -> Self {
        let mut sources = SmallVec::new();
        let values = stored.row.clone();
        sources.push((rti, stored));
        Self { values, sources }
    }

    pub fn source(&self, rti: RtIndex) -> Option<&StoredRow> {
        self.sources
            .iter()
            .find(|(pos, _)| *pos == rti)
            .map(|(_, stored)| stored)
    }
}

/// Substituted input rows, one slot per range-table position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpqInputs {
    rows: SmallVec<[Option<StoredRow>; INLINE_RANGE_TABLE]>,
}

impl EpqInputs {
    pub fn new(range_table_size: usize) -> Self {
        let mut rows = SmallVec::with_capacity(range_table_size);
        rows.resize(range_table_size, None);
        Self { rows }
    }

    pub fn get(&self, rti: RtIndex) -> Option<&StoredRow> {
        self.rows.get(rti.get()).and_then(Option::as_ref)
    }

    pub fn set(&mut self, rti: RtIndex, row: StoredRow) {
        if rti.get() >= self.rows.len() {
            self.rows.resize(rti.get() + 1, None);
        }
        self.rows[rti.get()] = Some(row);
    }

    pub fn clear(&mut self) {
        self.rows.iter_mut().for_each(|slot| *slot = None);
    }
}

pub trait QueryPlan: Send {
    /// Produces the next row, or `None` when exhausted. `epq` is present
    /// only while the plan runs inside a re-evaluation frame.
    fn next(&mut self, ctx: &ExecContext<'_>, epq: Option<&EpqInputs>) -> Result<Option<PlanRow>>;

    /// Restarts the plan from the beginning.
    fn rescan(&mut self);

    /// A fresh, unstarted copy of this plan.
    fn box_clone(&self) -> Box<dyn QueryPlan>;

    /// Row slots a private copy of this plan needs.
    fn slot_count(&self) -> usize {
        1
    }
}

impl Clone for Box<dyn QueryPlan> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
