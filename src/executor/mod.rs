//! # ModifyTable Statement Driver
//!
//! Runs one INSERT, UPDATE or DELETE: pulls source rows from the statement's
//! plan, fires BEFORE ROW triggers, applies the write, resolves concurrent
//! updates and records AFTER ROW obligations in the transaction's deferred
//! queue.
//!
//! ## Per-Row Protocol
//!
//! ```text
//! source row ──lock row marks──> BEFORE triggers ──> write ──> record AFTER
//!                  │                   │               │
//!                  │             (UPDATE/DELETE:       ├─ SelfModified   skip
//!                  │              lock target first)   ├─ BeingModified  wait, retry
//!                  │                                   └─ Updated        resolve, retry
//!                  └─ Updated: resolve, restart marks
//! ```
//!
//! Resolution goes through the statement's [`Resolver`]. A resolved row
//! replaces the source row: its target version becomes the row to write and
//! its values become the new values. When resolution reports nothing left
//! to do, the source row is skipped without error.
//!
//! Under SERIALIZABLE every "Updated" outcome is a serialization failure.
//!
//! Rows produced by the resolver (continuations of suspended re-evaluation
//! frames) are drained before the main plan is pulled again.

use crate::config::{EngineConfig, INLINE_RANGE_TABLE};
use crate::deferred::DeferredQueue;
use crate::epq::{serialization_failure, Resolver};
use crate::mvcc::{IsolationLevel, Snapshot, TxnId, Visibility};
use crate::plan::{ExecContext, PlanRow, QueryPlan, Values};
use crate::storage::{FetchResult, RowStore, StoredRow, WriteOutcome};
use crate::trigger::{FunctionRegistry, TriggerCatalog, TriggerFiring, TriggerOp};
use crate::types::{RelationId, Row, RowId, RtIndex};
use eyre::{bail, eyre, Result};
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

/// Engine state a statement runs against.
#[derive(Clone, Copy)]
pub struct StatementEnv<'a> {
    pub store: &'a dyn RowStore,
    pub catalog: &'a RwLock<TriggerCatalog>,
    pub functions: &'a FunctionRegistry,
    pub config: &'a EngineConfig,
}

/// One data-modifying statement.
///
/// For UPDATE the plan's output values are the new row; for INSERT they are
/// the row to insert. The target's current version is taken from the output
/// row's source at the target position.
pub struct ModifyTable {
    op: TriggerOp,
    target: RtIndex,
    range_table: SmallVec<[RelationId; INLINE_RANGE_TABLE]>,
    plan: Box<dyn QueryPlan>,
    row_marks: SmallVec<[RtIndex; 2]>,
}

impl ModifyTable {
    pub fn insert(relation: RelationId, rows: Vec<Row>) -> Self {
        Self::insert_from(relation, Box::new(Values::new(rows)))
    }

    pub fn insert_from(relation: RelationId, plan: Box<dyn QueryPlan>) -> Self {
        Self {
            op: TriggerOp::Insert,
            target: RtIndex(0),
            range_table: smallvec![relation],
            plan,
            row_marks: SmallVec::new(),
        }
    }

    pub fn update(range_table: &[RelationId], target: RtIndex, plan: Box<dyn QueryPlan>) -> Self {
        Self {
            op: TriggerOp::Update,
            target,
            range_table: range_table.iter().copied().collect(),
            plan,
            row_marks: SmallVec::new(),
        }
    }

    pub fn delete(range_table: &[RelationId], target: RtIndex, plan: Box<dyn QueryPlan>) -> Self {
        Self {
            op: TriggerOp::Delete,
            target,
            range_table: range_table.iter().copied().collect(),
            plan,
            row_marks: SmallVec::new(),
        }
    }

    /// Locks the source row at `rti` (FOR UPDATE) before each write.
    pub fn lock_rows(mut self, rti: RtIndex) -> Self {
        if !self.row_marks.contains(&rti) {
            self.row_marks.push(rti);
        }
        self
    }

    pub fn op(&self) -> TriggerOp {
        self.op
    }

    pub fn target_relation(&self) -> Result<RelationId> {
        self.range_table
            .get(self.target.get())
            .copied()
            .ok_or_else(|| eyre!("target {} is outside the range table", self.target))
    }

    /// Runs the statement to completion and returns the number of rows
    /// written.
    pub fn execute(
        self,
        env: &StatementEnv<'_>,
        snapshot: &Snapshot,
        isolation: IsolationLevel,
        queue: &mut DeferredQueue,
    ) -> Result<usize> {
        let relation = self.target_relation()?;
        let ModifyTable {
            op,
            target,
            range_table,
            mut plan,
            row_marks,
        } = self;

        let (meta, descriptor) = {
            let catalog = env.catalog.read();
            (catalog.relation(relation)?, catalog.descriptor(relation)?)
        };
        let firing = TriggerFiring::new(env.functions, &meta, descriptor.as_deref())
            .queue_disabled(env.config.queue_disabled_triggers);
        let ctx = ExecContext::new(env.store, snapshot);
        let resolver = Resolver::new(plan.box_clone(), &range_table)
            .with_free_frames(env.config.epq_free_frames);

        let mut run = StatementRun {
            ctx,
            firing,
            resolver,
            queue,
            isolation,
            relation,
            relation_name: &meta.name,
            target,
            range_table: &range_table,
            row_marks: &row_marks,
        };

        let mut processed = 0;
        loop {
            let next = match run.resolver.next(&run.ctx)? {
                Some(row) => Some(row),
                None => plan.next(&run.ctx, None)?,
            };
            let Some(row) = next else {
                break;
            };
            let Some(row) = run.lock_row_marks(row)? else {
                continue;
            };
            let written = match op {
                TriggerOp::Insert => run.exec_insert(row)?,
                TriggerOp::Update => run.exec_update(row)?,
                TriggerOp::Delete => run.exec_delete(row)?,
            };
            if written {
                processed += 1;
            }
        }

        debug!(relation = %meta.name, %op, processed, "statement finished");
        Ok(processed)
    }
}

struct StatementRun<'s, 'q> {
    ctx: ExecContext<'s>,
    firing: TriggerFiring<'s>,
    resolver: Resolver,
    queue: &'q mut DeferredQueue,
    isolation: IsolationLevel,
    relation: RelationId,
    relation_name: &'s str,
    target: RtIndex,
    range_table: &'s [RelationId],
    row_marks: &'s [RtIndex],
}

impl<'s> StatementRun<'s, '_> {
    fn xid(&self) -> TxnId {
        self.ctx.xid()
    }

    fn store(&self) -> &'s dyn RowStore {
        self.ctx.store
    }

    fn check_reresolution(&self, relation: RelationId) -> Result<()> {
        if self.isolation.allows_reresolution() {
            return Ok(());
        }
        tracing::warn!(relation, "concurrent update under SERIALIZABLE");
        Err(serialization_failure(self.relation_name))
    }

    fn target_source(&self, row: &PlanRow) -> Result<StoredRow> {
        match row.source(self.target) {
            Some(stored) => Ok(stored.clone()),
            None => bail!(
                "plan row carries no source for target {} of '{}'",
                self.target,
                self.relation_name
            ),
        }
    }

    /// Locks every marked source row. Returns `None` when the row must be
    /// skipped; a re-evaluated row replaces the input and all marks are
    /// taken again.
    fn lock_row_marks(&mut self, row: PlanRow) -> Result<Option<PlanRow>> {
        let mut row = row;
        'restart: loop {
            for &rti in self.row_marks {
                let Some(source) = row.source(rti) else {
                    bail!("row mark {} has no source row", rti);
                };
                let Some(&rel) = self.range_table.get(rti.get()) else {
                    bail!("row mark {} is outside the range table", rti);
                };
                let id = source.id;
                loop {
                    match self.store().lock_for_update(rel, self.xid(), id)? {
                        WriteOutcome::Applied(_) => break,
                        WriteOutcome::SelfModified => return Ok(None),
                        WriteOutcome::BeingModified { writer } => {
                            self.store().wait_for_txn(writer);
                        }
                        WriteOutcome::Updated { next } => {
                            self.check_reresolution(rel)?;
                            if next.is_none() || next == Some(id) {
                                return Ok(None);
                            }
                            if self.resolver.resolve(&self.ctx, rti, id)?.is_none() {
                                return Ok(None);
                            }
                            row = self.take_reevaluated()?;
                            continue 'restart;
                        }
                    }
                }
            }
            return Ok(Some(row));
        }
    }

    /// The re-evaluated row the resolver left in its active frame.
    fn take_reevaluated(&mut self) -> Result<PlanRow> {
        match self.resolver.take_output() {
            Some(row) => Ok(row),
            None => bail!("re-evaluation of '{}' buffered no row", self.relation_name),
        }
    }

    /// Locks the target row before BEFORE UPDATE/DELETE triggers see it.
    /// Returns the locked version and whether a concurrent update forced a
    /// re-evaluation, whose row is then buffered in the resolver.
    fn lock_for_trigger(&mut self, id: RowId) -> Result<Option<(StoredRow, bool)>> {
        let mut id = id;
        let mut reevaluated = false;
        loop {
            match self.store().lock_for_update(self.relation, self.xid(), id)? {
                WriteOutcome::Applied(_) => break,
                WriteOutcome::SelfModified => return Ok(None),
                WriteOutcome::BeingModified { writer } => {
                    self.store().wait_for_txn(writer);
                }
                WriteOutcome::Updated { next } => {
                    self.check_reresolution(self.relation)?;
                    if next.is_none() || next == Some(id) {
                        return Ok(None);
                    }
                    let Some(resolved) = self.resolver.resolve(&self.ctx, self.target, id)? else {
                        return Ok(None);
                    };
                    id = resolved;
                    reevaluated = true;
                }
            }
        }
        match self.store().fetch(self.relation, id, Visibility::Any)? {
            FetchResult::Found(stored) => Ok(Some((stored, reevaluated))),
            _ => bail!("locked row {} of '{}' vanished", id, self.relation_name),
        }
    }

    /// Handles an "Updated" write outcome. Returns the re-evaluated row to
    /// retry with, or `None` to skip.
    fn reresolve(&mut self, id: RowId, next: Option<RowId>) -> Result<Option<PlanRow>> {
        self.check_reresolution(self.relation)?;
        if next.is_none() || next == Some(id) {
            debug!(%id, "target row was deleted concurrently");
            return Ok(None);
        }
        if self.resolver.resolve(&self.ctx, self.target, id)?.is_none() {
            return Ok(None);
        }
        self.take_reevaluated().map(Some)
    }

    fn exec_insert(&mut self, row: PlanRow) -> Result<bool> {
        let Some(new) = self.firing.fire_before_insert(row.values)? else {
            return Ok(false);
        };
        let id = self.store().insert(self.relation, self.xid(), new.clone())?;
        let stored = StoredRow {
            id,
            xmin: self.xid(),
            row: new,
        };
        let xid = self.xid();
        self.firing
            .record_obligation(self.queue, xid, TriggerOp::Insert, None, Some(&stored))?;
        Ok(true)
    }

    fn exec_update(&mut self, row: PlanRow) -> Result<bool> {
        let mut old = self.target_source(&row)?;
        let mut new_values = row.values;

        if self.firing.has_before(TriggerOp::Update) {
            let Some((locked, reevaluated)) = self.lock_for_trigger(old.id)? else {
                return Ok(false);
            };
            old = locked;
            if reevaluated {
                new_values = self.take_reevaluated()?.values;
            }
            let Some(candidate) = self.firing.fire_before_update(&old.row, new_values)? else {
                return Ok(false);
            };
            new_values = candidate;
        }

        let new_id = loop {
            match self
                .store()
                .update(self.relation, self.xid(), old.id, new_values.clone())?
            {
                WriteOutcome::Applied(id) => break id,
                WriteOutcome::SelfModified => return Ok(false),
                WriteOutcome::BeingModified { writer } => {
                    self.store().wait_for_txn(writer);
                }
                WriteOutcome::Updated { next } => {
                    let Some(resolved) = self.reresolve(old.id, next)? else {
                        return Ok(false);
                    };
                    old = self.target_source(&resolved)?;
                    new_values = resolved.values;
                }
            }
        };

        let new = StoredRow {
            id: new_id,
            xmin: self.xid(),
            row: new_values,
        };
        let xid = self.xid();
        self.firing
            .record_obligation(self.queue, xid, TriggerOp::Update, Some(&old), Some(&new))?;
        Ok(true)
    }

    fn exec_delete(&mut self, row: PlanRow) -> Result<bool> {
        let mut old = self.target_source(&row)?;

        if self.firing.has_before(TriggerOp::Delete) {
            let Some((locked, reevaluated)) = self.lock_for_trigger(old.id)? else {
                return Ok(false);
            };
            old = locked;
            if reevaluated {
                self.take_reevaluated()?;
            }
            if !self.firing.fire_before_delete(&old.row)? {
                return Ok(false);
            }
        }

        loop {
            match self.store().delete(self.relation, self.xid(), old.id)? {
                WriteOutcome::Applied(_) => break,
                WriteOutcome::SelfModified => return Ok(false),
                WriteOutcome::BeingModified { writer } => {
                    self.store().wait_for_txn(writer);
                }
                WriteOutcome::Updated { next } => {
                    let Some(resolved) = self.reresolve(old.id, next)? else {
                        return Ok(false);
                    };
                    old = self.target_source(&resolved)?;
                }
            }
        }

        let xid = self.xid();
        self.firing
            .record_obligation(self.queue, xid, TriggerOp::Delete, Some(&old), None)?;
        Ok(true)
    }
}
