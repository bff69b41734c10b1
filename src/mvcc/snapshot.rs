//! # Snapshots and Visibility Modes
//!
//! Row fetches pick one of three visibility rules:
//!
//! | Mode | Used by | Sees |
//! |------|---------|------|
//! | `Snapshot` | plan scans | versions committed before the snapshot, plus own writes |
//! | `Dirty` | concurrent-update resolver | latest committed version; reports in-progress writers of other transactions |
//! | `Any` | deferred AFTER trigger re-fetch | the addressed version regardless of snapshot |

use super::transaction::TxnId;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    xid: TxnId,
    xmax: TxnId,
    in_progress: SmallVec<[TxnId; 8]>,
}

impl Snapshot {
    pub fn new(xid: TxnId, xmax: TxnId, in_progress: SmallVec<[TxnId; 8]>) -> Self {
        Self {
            xid,
            xmax,
            in_progress,
        }
    }

    /// Owning transaction.
    pub fn xid(&self) -> TxnId {
        self.xid
    }

    /// First transaction id not yet assigned when the snapshot was taken.
    pub fn xmax(&self) -> TxnId {
        self.xmax
    }

    pub fn was_in_progress(&self, xid: TxnId) -> bool {
        self.in_progress.contains(&xid)
    }

    /// Whether a committed writer's changes are inside this snapshot.
    pub fn includes_committed(&self, writer: TxnId) -> bool {
        writer < self.xmax && !self.was_in_progress(writer)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Visibility<'a> {
    Snapshot(&'a Snapshot),
    /// Own transaction id; used to hide the caller's own uncommitted writes.
    Dirty(TxnId),
    Any,
}
