//! # Transaction Status and Waiting
//!
//! The `TransactionManager` allocates transaction identifiers, records each
//! transaction's outcome and lets a writer block until a competing
//! transaction finishes.
//!
//! ## Transaction Identifiers
//!
//! Transaction IDs (`TxnId`) are 64-bit monotonically increasing integers
//! allocated from a global atomic counter:
//! - `TxnId = 0`: Reserved for bootstrapped data, always committed
//! - `TxnId >= 1`: Real transactions
//!
//! ## Transaction States
//!
//! ```text
//! ┌─────────┐     commit()     ┌───────────┐
//! │ Active  │ ───────────────> │ Committed │
//! └─────────┘                  └───────────┘
//!      │
//!      │ abort()
//!      v
//! ┌─────────┐
//! │ Aborted │
//! └─────────┘
//! ```
//!
//! ## Status Table
//!
//! Only active and aborted transactions keep an entry. A commit removes its
//! entry, and any id below the next unassigned id with no entry reads as
//! committed. Aborted entries stay because versions they wrote remain in the
//! heaps and must keep reading as dead.
//!
//! ```text
//!   next_xid = 7      states: { 3: Aborted, 5: Active, 6: Active }
//!   1, 2, 4 -> Committed (no entry, below next_xid)
//!   7..     -> never started
//! ```
//!
//! ## Waiting
//!
//! `wait_for(xid)` is the only blocking primitive in the trigger layer. It
//! parks the caller on a condition variable until `xid` leaves the `Active`
//! state. There is no timeout: the wait resumes exactly when the other
//! transaction's outcome becomes visible.
//!
//! ## Snapshots
//!
//! `snapshot(xid)` captures the next unassigned id and the set of
//! transactions in progress at that moment. A version written by `w` is
//! visible through the snapshot when `w` committed, `w < xmax` and `w` was not
//! in progress when the snapshot was taken.

use super::snapshot::Snapshot;
use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

pub type TxnId = u64;

/// Identifier reserved for bootstrapped rows.
pub const BOOTSTRAP_TXN_ID: TxnId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    /// Serializable transactions may not silently re-resolve a row that a
    /// concurrent transaction changed.
    pub fn allows_reresolution(&self) -> bool {
        matches!(self, IsolationLevel::ReadCommitted)
    }
}

pub struct TransactionManager {
    next_xid: AtomicU64,
    states: Mutex<HashMap<TxnId, TxnState>>,
    finished: Condvar,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_xid: AtomicU64::new(1),
            states: Mutex::new(HashMap::new()),
            finished: Condvar::new(),
        }
    }

    pub fn begin(&self) -> TxnId {
        let mut states = self.states.lock();
        let xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        states.insert(xid, TxnState::Active);
        xid
    }

    pub fn commit(&self, xid: TxnId) -> Result<()> {
        self.finish(xid, TxnState::Committed)
    }

    pub fn abort(&self, xid: TxnId) -> Result<()> {
        self.finish(xid, TxnState::Aborted)
    }

    fn finish(&self, xid: TxnId, outcome: TxnState) -> Result<()> {
        let mut states = self.states.lock();
        match self.lookup(&states, xid) {
            TxnState::Active => {}
            _ if xid >= self.next_xid.load(Ordering::SeqCst) => {
                bail!("transaction {} is unknown", xid)
            }
            state => bail!("transaction {} already finished as {:?}", xid, state),
        }
        match outcome {
            TxnState::Committed => {
                states.remove(&xid);
            }
            _ => {
                states.insert(xid, outcome);
            }
        }
        drop(states);
        self.finished.notify_all();
        Ok(())
    }

    /// Reads the status of `xid` from a locked status table.
    fn lookup(&self, states: &HashMap<TxnId, TxnState>, xid: TxnId) -> TxnState {
        if xid == BOOTSTRAP_TXN_ID {
            return TxnState::Committed;
        }
        match states.get(&xid) {
            Some(state) => *state,
            None if xid < self.next_xid.load(Ordering::SeqCst) => TxnState::Committed,
            // never started, so nothing it wrote can be live
            None => TxnState::Aborted,
        }
    }

    pub fn state(&self, xid: TxnId) -> TxnState {
        let states = self.states.lock();
        self.lookup(&states, xid)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_committed(&self, xid: TxnId) -> bool {
        self.state(xid) == TxnState::Committed
    }

    pub fn is_in_progress(&self, xid: TxnId) -> bool {
        self.state(xid) == TxnState::Active
    }

    pub fn snapshot(&self, xid: TxnId) -> Snapshot {
        let states = self.states.lock();
        let xmax = self.next_xid.load(Ordering::SeqCst);
        let in_progress: SmallVec<[TxnId; 8]> = states
            .iter()
            .filter(|(id, state)| **id != xid && **state == TxnState::Active)
            .map(|(id, _)| *id)
            .collect();
        Snapshot::new(xid, xmax, in_progress)
    }

    /// Blocks until `xid` commits or aborts and returns its outcome.
    pub fn wait_for(&self, xid: TxnId) -> TxnState {
        let mut states = self.states.lock();
        loop {
            match self.lookup(&states, xid) {
                TxnState::Active => {
                    tracing::debug!(xid, "waiting for concurrent transaction to finish");
                    self.finished.wait(&mut states);
                }
                outcome => return outcome,
            }
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
