//! # Deferred Trigger Queue
//!
//! AFTER ROW triggers never run inside the mutation that caused them. Each
//! mutation appends an event to the transaction's queue; the queue fires
//! items at statement end (immediate triggers) or at commit (deferred
//! triggers).
//!
//! ```text
//!  INSERT/UPDATE/DELETE ──record_event──> [events ...]
//!                                              │
//!       end_statement ── invoke_events(immediate_only = true)
//!       end_transaction ── invoke_events(immediate_only = false), discard
//!       abort ── discard, fire nothing
//! ```
//!
//! Deferral state comes from [`DeferredStatus`] tables (session defaults and
//! a per-transaction copy) and is changed by `SET CONSTRAINTS`.

pub mod event;
pub mod queue;
pub mod state;

pub use event::{DeferredEvent, DeferredItem};
pub use queue::{DeferredQueue, FireEnv};
pub use state::{apply_set_constraints, ConstraintTarget, DeferredStatus};
