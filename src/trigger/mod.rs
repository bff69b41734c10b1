//! # Trigger Registry and Firing Engine
//!
//! Row-level triggers around INSERT, UPDATE and DELETE.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ TriggerCatalog                                               │
//! │   relations, persisted TriggerRecords, cached descriptors    │
//! │   create_trigger / drop_trigger / remove_relation_triggers   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ TriggerDescriptor (per relation, immutable)                  │
//! │   before_row[INSERT|UPDATE|DELETE]                           │
//! │   after_row [INSERT|UPDATE|DELETE]                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ TriggerFiring (per relation per statement)                   │
//! │   fire_before_insert / fire_before_update / fire_before_delete│
//! │   record_obligation ──> DeferredQueue::record_event          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FunctionRegistry + TriggerFunction                           │
//! │   invoke(TriggerCall) -> Unchanged | Replaced | Suppressed   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Statement-level triggers, INSTEAD OF triggers and MATCH PARTIAL
//! referential integrity are rejected at definition time.

pub mod catalog;
pub mod definition;
pub mod fire;
pub mod function;
pub mod ri;

pub use catalog::{ConstraintSpec, RelationMeta, TriggerCatalog, TriggerDef};
pub use definition::{
    EventMask, Trigger, TriggerDescriptor, TriggerLevel, TriggerOp, TriggerRecord, TriggerTiming,
};
pub use fire::TriggerFiring;
pub use function::{FunctionRegistry, TriggerCall, TriggerFunction, TriggerOutcome};
pub use ri::{MatchType, RiAction, RiArgs, RiEvent, RiRole};
