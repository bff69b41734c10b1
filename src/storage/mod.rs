//! # Row Storage Interface
//!
//! The trigger layer does not own row storage. It talks to the storage engine
//! through [`RowStore`], which exposes exactly what the firing engine, the
//! deferred queue and the concurrent-update resolver consume:
//!
//! | Operation | Consumer |
//! |-----------|----------|
//! | `fetch(.., Visibility::Any)` | deferred AFTER trigger re-fetch |
//! | `fetch(.., Visibility::Dirty)` | concurrent-update resolver |
//! | `scan` | plan scan nodes |
//! | `insert` / `update` / `delete` | statement driver |
//! | `lock_for_update` | BEFORE UPDATE/DELETE trigger row fetch |
//! | `wait_for_txn` | resolver and statement driver |
//!
//! ## Write Outcomes
//!
//! ```text
//! update/delete/lock(id)
//!     │
//!     ├── Applied(id')          written; id' is the new version (or id)
//!     ├── SelfModified          this transaction already changed the row
//!     ├── Updated { next }      a committed transaction got there first:
//!     │                           next = Some(successor) -> resolve
//!     │                           next = None (deleted)  -> skip row
//!     └── BeingModified{writer} an in-progress transaction holds the row:
//!                                 wait_for_txn(writer), then retry
//! ```
//!
//! [`MemoryStore`] is the in-memory reference implementation used by the
//! crate's tests and benches.

pub mod memory;

pub use memory::MemoryStore;

use crate::mvcc::{Snapshot, TxnId, TxnState, Visibility};
use crate::types::{RelationId, Row, RowId};
use eyre::Result;

/// A fetched row version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: RowId,
    pub xmin: TxnId,
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Found(StoredRow),
    /// Only reported by `Visibility::Dirty`.
    BeingModified { writer: TxnId },
    /// Only reported by `Visibility::Dirty`: a committed transaction updated
    /// (`Some`) or deleted (`None`) the version.
    Superseded { next: Option<RowId> },
    NotVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(RowId),
    SelfModified,
    Updated { next: Option<RowId> },
    BeingModified { writer: TxnId },
}

pub trait RowStore: Send + Sync {
    fn create_relation(&self, rel: RelationId);

    fn drop_relation(&self, rel: RelationId);

    fn fetch(&self, rel: RelationId, id: RowId, visibility: Visibility<'_>) -> Result<FetchResult>;

    fn scan(&self, rel: RelationId, snapshot: &Snapshot) -> Result<Vec<StoredRow>>;

    fn insert(&self, rel: RelationId, xid: TxnId, row: Row) -> Result<RowId>;

    fn update(&self, rel: RelationId, xid: TxnId, id: RowId, row: Row) -> Result<WriteOutcome>;

    fn delete(&self, rel: RelationId, xid: TxnId, id: RowId) -> Result<WriteOutcome>;

    fn lock_for_update(&self, rel: RelationId, xid: TxnId, id: RowId) -> Result<WriteOutcome>;

    /// Blocks until `xid` is no longer in progress.
    fn wait_for_txn(&self, xid: TxnId) -> TxnState;
}
