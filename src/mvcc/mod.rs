//! # Multi-Version Concurrency Control (MVCC)
//!
//! Transaction bookkeeping and row-version visibility used by the trigger
//! layer. The storage engine proper is an external collaborator; this module
//! only provides what the trigger queue and the concurrent-update resolver
//! need to reason about versions:
//!
//! - `TransactionManager`: id allocation, outcome tracking, `wait_for`
//! - `Snapshot`: the set of writes a statement may see
//! - `Visibility`: which rule a fetch applies (`Snapshot`, `Dirty`, `Any`)
//! - `TupleVersion`: one stored row version with `xmin`/`xmax`/forward link
//!
//! ## Isolation Levels
//!
//! ```text
//! READ COMMITTED   new snapshot per statement; a row changed by a
//!                  transaction that committed after the snapshot is
//!                  re-resolved and the statement's filter re-checked
//!
//! SERIALIZABLE     one snapshot per transaction; the same situation is a
//!                  serialization failure
//! ```
//!
//! ## Version Lifecycle
//!
//! ```text
//! insert ──> live ──update──> superseded (forward -> successor)
//!              │
//!              ├──delete──> dead (no forward)
//!              └──lock────> live, xmax = locker, lock_only
//! ```

pub mod snapshot;
pub mod transaction;
pub mod version;

pub use snapshot::{Snapshot, Visibility};
pub use transaction::{
    IsolationLevel, TransactionManager, TxnId, TxnState, BOOTSTRAP_TXN_ID,
};
pub use version::{DirtyCheck, TupleVersion, WriteCheck};
