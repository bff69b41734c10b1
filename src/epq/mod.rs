//! # Concurrent Update Resolver
//!
//! When a write finds that its target row was changed by a transaction that
//! committed after the statement's snapshot, the statement must not silently
//! overwrite the newer version. Under READ COMMITTED it instead re-derives
//! the latest version and re-runs the statement's plan with that version
//! substituted for the scan of the affected range-table position. If the
//! plan still produces a row, the write is retried against it. Otherwise the
//! source row is skipped.
//!
//! ## Frame Stack
//!
//! One frame exists per range-table position under re-evaluation. Frames live
//! in an arena addressed by index; `top` names the active frame and each frame
//! names its suspended parent.
//!
//! ```text
//!   frames: [ F0 rt#1 ] [ F1 rt#0 ] [ F2 idle ]
//!               ^            │
//!               └── parent ──┘         free: [2]
//!   top = 1
//! ```
//!
//! | Situation on `resolve(P)`            | Action                              |
//! |--------------------------------------|-------------------------------------|
//! | top frame is idle                    | adopt it for P                      |
//! | top frame serves P                   | reuse: drop buffered rows, rescan   |
//! | P is suspended lower in the stack    | pop frames above it, then reuse     |
//! | otherwise                            | push a frame (free-list first)      |
//!
//! Each frame buffers the rows its plan produces in a ring-bounded
//! [`SlotTable`] sized to the plan's slot count. `resolve` leaves the
//! re-evaluated row there and hands back the position's new identifier;
//! the caller reads the row with [`Resolver::output`] or moves it out with
//! [`Resolver::take_output`].
//!
//! A pushed frame inherits its parent's substituted rows so re-evaluating a
//! second position keeps the first one's resolved version. Retired frames keep
//! their cloned plan while the free-list is below its cap; beyond it the plan
//! is dropped and only the index is recycled.
//!
//! ## Fetching the Stable Version
//!
//! ```text
//! fetch(id, Dirty) ─┬─ Found             → substitute it
//!                   ├─ BeingModified(w)  → wait_for(w), fetch same id again
//!                   ├─ Superseded(next)  → fetch next
//!                   └─ Superseded(None)
//!                      / NotVisible      → row gone, no further action
//! ```

use crate::config::{DEFAULT_EPQ_FREE_FRAMES, INLINE_RANGE_TABLE, MAX_EPQ_FREE_FRAMES};
use crate::error::TriggerError;
use crate::mvcc::Visibility;
use crate::plan::{EpqInputs, ExecContext, PlanRow, QueryPlan};
use crate::storage::{FetchResult, StoredRow};
use crate::types::{RelationId, RowId, RtIndex};
use eyre::Result;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::debug;

/// Output rows produced by one frame since it was last (re)started.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: VecDeque<PlanRow>,
    capacity: usize,
}

impl SlotTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffers `row`, evicting the oldest row once the table is full.
    pub fn store(&mut self, row: PlanRow) {
        if self.capacity > 0 && self.slots.len() == self.capacity {
            self.slots.pop_front();
        }
        self.slots.push_back(row);
    }

    pub fn last(&self) -> Option<&PlanRow> {
        self.slots.back()
    }

    pub fn take_last(&mut self) -> Option<PlanRow> {
        self.slots.pop_back()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

struct Frame {
    rti: Option<RtIndex>,
    plan: Option<Box<dyn QueryPlan>>,
    inputs: EpqInputs,
    slots: SlotTable,
    parent: Option<usize>,
}

impl Frame {
    fn is_idle(&self) -> bool {
        self.rti.is_none()
    }
}

pub struct Resolver {
    template: Box<dyn QueryPlan>,
    range_table: SmallVec<[RelationId; INLINE_RANGE_TABLE]>,
    frames: Vec<Frame>,
    top: Option<usize>,
    free: SmallVec<[usize; DEFAULT_EPQ_FREE_FRAMES]>,
    free_cap: usize,
    slot_count: usize,
}

impl Resolver {
    pub fn new(template: Box<dyn QueryPlan>, range_table: &[RelationId]) -> Self {
        let slot_count = template.slot_count();
        Self {
            template,
            range_table: range_table.iter().copied().collect(),
            frames: Vec::new(),
            top: None,
            free: SmallVec::new(),
            free_cap: DEFAULT_EPQ_FREE_FRAMES,
            slot_count,
        }
    }

    pub fn with_free_frames(mut self, cap: usize) -> Self {
        self.free_cap = cap.min(MAX_EPQ_FREE_FRAMES);
        self
    }

    /// True while some frame has rows left to produce.
    pub fn is_active(&self) -> bool {
        self.top.is_some_and(|top| !self.frames[top].is_idle())
    }

    /// Number of frames on the stack, idle top frame excluded.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.top;
        while let Some(idx) = cursor {
            if !self.frames[idx].is_idle() {
                depth += 1;
            }
            cursor = self.frames[idx].parent;
        }
        depth
    }

    pub fn allocated_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn relation(&self, rti: RtIndex) -> Result<RelationId> {
        match self.range_table.get(rti.get()) {
            Some(rel) => Ok(*rel),
            None => eyre::bail!("range table position {} out of bounds", rti),
        }
    }

    /// Re-evaluates the statement with the latest version of the row at
    /// `id` substituted for position `rti`. The first row the plan produces
    /// stays buffered in the active frame's slot table and the identifier it
    /// carries for `rti` is returned. `None` means there is nothing left to
    /// do.
    pub fn resolve(
        &mut self,
        ctx: &ExecContext<'_>,
        rti: RtIndex,
        id: RowId,
    ) -> Result<Option<RowId>> {
        let rel = self.relation(rti)?;
        let Some(stored) = fetch_latest(ctx, rel, id)? else {
            debug!(%rti, %id, "concurrently updated row is gone");
            return self.abandon(rti);
        };

        let idx = self.activate(rti);
        let frame = &mut self.frames[idx];
        frame.slots.clear();
        frame.inputs.set(rti, stored);
        match frame.plan.as_mut() {
            Some(plan) => plan.rescan(),
            None => frame.plan = Some(self.template.box_clone()),
        }
        if !self.advance(ctx)? {
            return Ok(None);
        }
        match self.output().and_then(|row| row.source(rti)) {
            Some(source) => Ok(Some(source.id)),
            None => eyre::bail!("re-evaluated row carries no source for {}", rti),
        }
    }

    /// The row most recently buffered by the active frame.
    pub fn output(&self) -> Option<&PlanRow> {
        let top = self.top?;
        self.frames[top].slots.last()
    }

    /// Moves the most recently buffered row out of the active frame.
    pub fn take_output(&mut self) -> Option<PlanRow> {
        let top = self.top?;
        self.frames[top].slots.take_last()
    }

    /// Pulls the next row from the active frame, continuing suspended parent
    /// frames as children are exhausted.
    pub fn next(&mut self, ctx: &ExecContext<'_>) -> Result<Option<PlanRow>> {
        if !self.advance(ctx)? {
            return Ok(None);
        }
        Ok(self.take_output())
    }

    /// Runs the active frame's plan until it buffers a row. Returns false
    /// once the whole stack is exhausted.
    fn advance(&mut self, ctx: &ExecContext<'_>) -> Result<bool> {
        loop {
            let Some(idx) = self.top else {
                return Ok(false);
            };
            let frame = &mut self.frames[idx];
            if frame.is_idle() {
                return Ok(false);
            }
            let Frame {
                plan,
                inputs,
                slots,
                ..
            } = frame;
            let Some(plan) = plan.as_mut() else {
                eyre::bail!("re-evaluation frame {} has no plan", idx);
            };
            if let Some(row) = plan.next(ctx, Some(inputs))? {
                slots.store(row);
                return Ok(true);
            }
            if frame.parent.is_none() {
                debug!(frame = idx, "re-evaluation finished");
                frame.rti = None;
                frame.slots.clear();
                frame.inputs.clear();
                return Ok(false);
            }
            self.retire_top();
        }
    }

    /// Drops every frame, keeping plans within the free-list cap.
    pub fn reset(&mut self) {
        while self.top.is_some() {
            self.retire_top();
        }
    }

    /// The row vanished: unwind a frame already serving `rti`, if any, so
    /// its parent (if there is one) continues.
    fn abandon(&mut self, rti: RtIndex) -> Result<Option<RowId>> {
        if !self.on_stack(rti) {
            return Ok(None);
        }
        while let Some(top) = self.top {
            let serves = self.frames[top].rti == Some(rti);
            self.retire_top();
            if serves {
                break;
            }
        }
        Ok(None)
    }

    fn on_stack(&self, rti: RtIndex) -> bool {
        let mut cursor = self.top;
        while let Some(idx) = cursor {
            if self.frames[idx].rti == Some(rti) {
                return true;
            }
            cursor = self.frames[idx].parent;
        }
        false
    }

    fn activate(&mut self, rti: RtIndex) -> usize {
        if let Some(top) = self.top {
            if self.frames[top].is_idle() {
                debug!(frame = top, %rti, "adopting idle re-evaluation frame");
                let frame = &mut self.frames[top];
                frame.rti = Some(rti);
                frame.inputs = EpqInputs::new(self.range_table.len());
                return top;
            }
            if self.frames[top].rti == Some(rti) {
                debug!(frame = top, %rti, "reusing re-evaluation frame");
                return top;
            }
            if self.on_stack(rti) {
                while let Some(idx) = self.top {
                    if self.frames[idx].rti == Some(rti) {
                        debug!(frame = idx, %rti, "unwound to re-evaluation frame");
                        return idx;
                    }
                    self.retire_top();
                }
            }
        }

        let parent = self.top;
        let inputs = match parent {
            Some(p) => self.frames[p].inputs.clone(),
            None => EpqInputs::new(self.range_table.len()),
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                let frame = &mut self.frames[idx];
                frame.rti = Some(rti);
                frame.inputs = inputs;
                frame.parent = parent;
                frame.slots.clear();
                idx
            }
            None => {
                self.frames.push(Frame {
                    rti: Some(rti),
                    plan: Some(self.template.box_clone()),
                    inputs,
                    slots: SlotTable::with_capacity(self.slot_count),
                    parent,
                });
                self.frames.len() - 1
            }
        };
        debug!(frame = idx, %rti, ?parent, "pushed re-evaluation frame");
        self.top = Some(idx);
        idx
    }

    fn retire_top(&mut self) {
        let Some(idx) = self.top else {
            return;
        };
        let keep_plan = self.free.len() < self.free_cap;
        let frame = &mut self.frames[idx];
        let parent = frame.parent.take();
        debug!(frame = idx, rti = ?frame.rti, ?parent, "popped re-evaluation frame");
        frame.rti = None;
        frame.slots.clear();
        frame.inputs.clear();
        if !keep_plan {
            frame.plan = None;
        }
        self.free.push(idx);
        self.top = parent;
    }
}

/// Follows the version chain from `id` to the version the statement must
/// act on, waiting out in-progress writers.
pub fn fetch_latest(
    ctx: &ExecContext<'_>,
    rel: RelationId,
    id: RowId,
) -> Result<Option<StoredRow>> {
    let mut id = id;
    loop {
        match ctx.store.fetch(rel, id, Visibility::Dirty(ctx.xid()))? {
            FetchResult::Found(stored) => return Ok(Some(stored)),
            FetchResult::BeingModified { writer } => {
                debug!(%id, writer, "waiting for concurrent writer");
                ctx.store.wait_for_txn(writer);
            }
            FetchResult::Superseded { next: Some(next) } if next != id => {
                debug!(from = %id, to = %next, "following version chain");
                id = next;
            }
            FetchResult::Superseded { .. } | FetchResult::NotVisible => return Ok(None),
        }
    }
}

/// The error a SERIALIZABLE transaction raises where READ COMMITTED would
/// re-resolve.
pub fn serialization_failure(relation: &str) -> eyre::Report {
    TriggerError::SerializationFailure {
        relation: relation.to_string(),
    }
    .into()
}
