//! # Trigger Definitions and Descriptors
//!
//! A trigger is persisted as a [`TriggerRecord`] and materialized as a
//! [`Trigger`] when a relation's [`TriggerDescriptor`] is built.
//!
//! ## Event Mask
//!
//! ```text
//!  bit   7   6        5   4     3        2        1        0
//!      ┌───┬────────┬───┬─────┬────────┬────────┬────────┬────────┐
//!      │ - │INSTEAD │ - │ ROW │ BEFORE │ DELETE │ UPDATE │ INSERT │
//!      └───┴────────┴───┴─────┴────────┴────────┴────────┴────────┘
//! ```
//!
//! Only row-level BEFORE and AFTER triggers are ever materialized; the
//! catalog rejects statement-level and INSTEAD OF definitions.
//!
//! ## Descriptor Layout
//!
//! ```text
//! TriggerDescriptor
//! ├── triggers: [T1, T2, T3]          stored order (creation order)
//! ├── before_row
//! │     ├── INSERT: [T1]
//! │     ├── UPDATE: [T1]
//! │     └── DELETE: []
//! └── after_row
//!       ├── INSERT: [T2]
//!       ├── UPDATE: [T2, T3]
//!       └── DELETE: [T3]
//! ```
//!
//! A trigger whose mask spans several operations appears in each of their
//! lists. Buckets hold indices into `triggers`.
//!
//! The timing x scope grid has four cells. The before-statement and
//! after-statement cells are never populated because statement-level
//! triggers are rejected at definition time, so the descriptor carries only
//! the two row buckets:
//!
//! | Timing | Row          | Statement       |
//! |--------|--------------|-----------------|
//! | BEFORE | `before_row` | (not supported) |
//! | AFTER  | `after_row`  | (not supported) |
//!
//! ## Argument Packing
//!
//! Positional arguments are stored as `nargs` plus a byte string in which
//! every argument is followed by a NUL byte.

use crate::types::{FunctionId, RelationId, TriggerId};
use eyre::{bail, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

pub mod events {
    pub const INSERT: u8 = 0b0000_0001;
    pub const UPDATE: u8 = 0b0000_0010;
    pub const DELETE: u8 = 0b0000_0100;
    pub const BEFORE: u8 = 0b0000_1000;
    pub const ROW: u8 = 0b0001_0000;
    pub const INSTEAD: u8 = 0b0100_0000;

    pub const OP_MASK: u8 = INSERT | UPDATE | DELETE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerOp {
    Insert,
    Update,
    Delete,
}

impl TriggerOp {
    pub const ALL: [TriggerOp; 3] = [TriggerOp::Insert, TriggerOp::Update, TriggerOp::Delete];

    pub fn bit(self) -> u8 {
        match self {
            TriggerOp::Insert => events::INSERT,
            TriggerOp::Update => events::UPDATE,
            TriggerOp::Delete => events::DELETE,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            TriggerOp::Insert => 0,
            TriggerOp::Update => 1,
            TriggerOp::Delete => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerOp::Insert => "INSERT",
            TriggerOp::Update => "UPDATE",
            TriggerOp::Delete => "DELETE",
        }
    }
}

impl fmt::Display for TriggerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLevel {
    Row,
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn new(timing: TriggerTiming, level: TriggerLevel, ops: &[TriggerOp]) -> Self {
        let mut bits = ops.iter().fold(0u8, |acc, op| acc | op.bit());
        match timing {
            TriggerTiming::Before => bits |= events::BEFORE,
            TriggerTiming::InsteadOf => bits |= events::INSTEAD,
            TriggerTiming::After => {}
        }
        if level == TriggerLevel::Row {
            bits |= events::ROW;
        }
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_before(&self) -> bool {
        self.0 & events::BEFORE != 0
    }

    pub fn is_row(&self) -> bool {
        self.0 & events::ROW != 0
    }

    pub fn is_instead(&self) -> bool {
        self.0 & events::INSTEAD != 0
    }

    pub fn fires_on(&self, op: TriggerOp) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn has_ops(&self) -> bool {
        self.0 & events::OP_MASK != 0
    }
}

/// Persisted form of one trigger definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    pub name: String,
    pub relation: RelationId,
    pub function: FunctionId,
    pub enabled: bool,
    pub is_constraint: bool,
    /// Empty for triggers that are not bound to a named constraint.
    pub constraint_name: String,
    pub constraint_relation: Option<RelationId>,
    pub deferrable: bool,
    pub initially_deferred: bool,
    pub events: EventMask,
    pub nargs: u16,
    pub args: Vec<u8>,
}

impl TriggerRecord {
    pub fn pack_args(args: &[String]) -> Result<(u16, Vec<u8>)> {
        let nargs = u16::try_from(args.len())
            .map_err(|_| eyre::eyre!("too many trigger arguments: {}", args.len()))?;
        let mut packed = Vec::with_capacity(args.iter().map(|a| a.len() + 1).sum());
        for arg in args {
            if arg.as_bytes().contains(&0) {
                bail!("trigger argument '{}' contains a NUL byte", arg.escape_debug());
            }
            packed.extend_from_slice(arg.as_bytes());
            packed.push(0);
        }
        Ok((nargs, packed))
    }

    pub fn unpack_args(&self) -> Result<Vec<String>> {
        if self.nargs == 0 {
            return Ok(Vec::new());
        }
        let mut args = Vec::with_capacity(self.nargs as usize);
        let mut rest = self.args.as_slice();
        for i in 0..self.nargs {
            let Some(end) = rest.iter().position(|b| *b == 0) else {
                bail!(
                    "trigger '{}': argument {} of {} is not terminated",
                    self.name,
                    i + 1,
                    self.nargs
                );
            };
            args.push(String::from_utf8(rest[..end].to_vec())?);
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            bail!(
                "trigger '{}': {} trailing bytes after {} arguments",
                self.name,
                rest.len(),
                self.nargs
            );
        }
        Ok(args)
    }
}

/// A materialized trigger, immutable for the lifetime of its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    pub relation: RelationId,
    pub function: FunctionId,
    pub events: EventMask,
    pub enabled: bool,
    pub is_constraint: bool,
    pub constraint_name: String,
    pub constraint_relation: Option<RelationId>,
    pub deferrable: bool,
    pub initially_deferred: bool,
    pub args: Vec<String>,
}

impl Trigger {
    pub fn from_record(id: TriggerId, record: &TriggerRecord) -> Result<Self> {
        Ok(Self {
            id,
            name: record.name.clone(),
            relation: record.relation,
            function: record.function,
            events: record.events,
            enabled: record.enabled,
            is_constraint: record.is_constraint,
            constraint_name: record.constraint_name.clone(),
            constraint_relation: record.constraint_relation,
            deferrable: record.deferrable,
            initially_deferred: record.initially_deferred,
            args: record.unpack_args()?,
        })
    }
}

type Bucket = SmallVec<[usize; 4]>;

/// Per-relation classification of row-level triggers by timing and operation.
#[derive(Debug, Clone, Default)]
pub struct TriggerDescriptor {
    triggers: Vec<Arc<Trigger>>,
    before_row: [Bucket; 3],
    after_row: [Bucket; 3],
}

impl TriggerDescriptor {
    pub fn build(triggers: Vec<Trigger>) -> Result<Self> {
        let mut desc = Self::default();
        for trigger in triggers {
            if !trigger.events.is_row() || trigger.events.is_instead() {
                bail!(
                    "trigger '{}' is not a row-level BEFORE or AFTER trigger",
                    trigger.name
                );
            }
            let slot = desc.triggers.len();
            for op in TriggerOp::ALL {
                if !trigger.events.fires_on(op) {
                    continue;
                }
                if trigger.events.is_before() {
                    desc.before_row[op.index()].push(slot);
                } else {
                    desc.after_row[op.index()].push(slot);
                }
            }
            desc.triggers.push(Arc::new(trigger));
        }
        Ok(desc)
    }

    pub fn triggers(&self) -> &[Arc<Trigger>] {
        &self.triggers
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Arc<Trigger>> {
        self.triggers.iter().find(|t| t.id == id)
    }

    pub fn before_row(&self, op: TriggerOp) -> impl Iterator<Item = &Arc<Trigger>> + '_ {
        self.before_row[op.index()]
            .iter()
            .map(move |&slot| &self.triggers[slot])
    }

    pub fn after_row(&self, op: TriggerOp) -> impl Iterator<Item = &Arc<Trigger>> + '_ {
        self.after_row[op.index()]
            .iter()
            .map(move |&slot| &self.triggers[slot])
    }

    pub fn has_before_row(&self, op: TriggerOp) -> bool {
        !self.before_row[op.index()].is_empty()
    }

    pub fn has_after_row(&self, op: TriggerOp) -> bool {
        !self.after_row[op.index()].is_empty()
    }

    /// Order-independent comparison of two trigger sets.
    ///
    /// Triggers are matched by id; matched triggers must agree on every
    /// field. Bucket order follows stored order and is not compared.
    pub fn equivalent(&self, other: &TriggerDescriptor) -> bool {
        if self.triggers.len() != other.triggers.len() {
            return false;
        }
        let by_id: HashMap<TriggerId, &Trigger> = other
            .triggers
            .iter()
            .map(|t| (t.id, t.as_ref()))
            .collect();
        if by_id.len() != other.triggers.len() {
            return false;
        }
        let mut seen: SmallVec<[TriggerId; 8]> = SmallVec::new();
        for t in &self.triggers {
            if seen.contains(&t.id) {
                return false;
            }
            seen.push(t.id);
        }
        self.triggers
            .iter()
            .all(|t| by_id.get(&t.id).is_some_and(|o| **o == **t))
    }
}
