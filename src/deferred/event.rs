//! # Deferred Trigger Events
//!
//! One [`DeferredEvent`] is recorded per row mutation that has AFTER ROW
//! triggers. It carries one [`DeferredItem`] per applicable trigger.
//!
//! ## Item State Bits
//!
//! ```text
//!  bit   7   6             5            4      3   2            1             0
//!      ┌───┬─────────────┬────────────┬──────┬───┬────────────┬─────────────┬────────────┐
//!      │ - │ROW_INSERTED │KEY_CHANGED │ DONE │ - │ HAS_BEFORE │INITDEFERRED │ DEFERRABLE │
//!      └───┴─────────────┴────────────┴──────┴───┴────────────┴─────────────┴────────────┘
//! ```
//!
//! The static bits (DEFERRABLE, INITDEFERRED, HAS_BEFORE) are stamped from
//! the trigger definition at recording time. DONE is set once the item fired
//! or was found to need no firing. KEY_CHANGED and ROW_INSERTED are also kept
//! at event level, where they summarize the row's history in the current
//! transaction.
//!
//! Events are appended, mutated in place and never reordered.

use crate::config::INLINE_ITEMS_PER_EVENT;
use crate::trigger::TriggerOp;
use crate::types::{RelationId, RowId, TriggerId};
use smallvec::SmallVec;

pub mod state {
    pub const DEFERRABLE: u8 = 0b0000_0001;
    pub const INITDEFERRED: u8 = 0b0000_0010;
    pub const HAS_BEFORE: u8 = 0b0000_0100;
    pub const DONE: u8 = 0b0001_0000;
    pub const KEY_CHANGED: u8 = 0b0010_0000;
    pub const ROW_INSERTED: u8 = 0b0100_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredItem {
    pub trigger: TriggerId,
    pub state: u8,
}

impl DeferredItem {
    pub fn new(trigger: TriggerId, state: u8) -> Self {
        Self { trigger, state }
    }

    #[inline]
    pub fn has(&self, flag: u8) -> bool {
        self.state & flag != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8) {
        self.state |= flag;
    }

    pub fn is_done(&self) -> bool {
        self.has(state::DONE)
    }

    pub fn is_deferrable(&self) -> bool {
        self.has(state::DEFERRABLE)
    }

    pub fn is_initially_deferred(&self) -> bool {
        self.has(state::INITDEFERRED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredEvent {
    pub op: TriggerOp,
    pub relation: RelationId,
    pub old_row: Option<RowId>,
    pub new_row: Option<RowId>,
    pub state: u8,
    pub items: SmallVec<[DeferredItem; INLINE_ITEMS_PER_EVENT]>,
}

impl DeferredEvent {
    pub fn new(op: TriggerOp, relation: RelationId, old_row: Option<RowId>, new_row: Option<RowId>) -> Self {
        Self {
            op,
            relation,
            old_row,
            new_row,
            state: 0,
            items: SmallVec::new(),
        }
    }

    #[inline]
    pub fn has(&self, flag: u8) -> bool {
        self.state & flag != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8) {
        self.state |= flag;
    }

    pub fn is_done(&self) -> bool {
        self.has(state::DONE)
    }

    pub fn item(&self, trigger: TriggerId) -> Option<&DeferredItem> {
        self.items.iter().find(|item| item.trigger == trigger)
    }

    pub fn pending_items(&self) -> usize {
        self.items.iter().filter(|item| !item.is_done()).count()
    }
}
