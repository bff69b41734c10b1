//! # In-Memory Version Store
//!
//! A `RowStore` keeping every row version of every relation in memory.
//! Versions are append-only per relation; a version's index maps onto its
//! `RowId` as `(index / SLOTS_PER_BLOCK, index % SLOTS_PER_BLOCK)`.
//!
//! Updates append the new version and link the old one to it through
//! `forward`. Nothing is ever vacuumed; old versions remain addressable so
//! deferred AFTER triggers can re-fetch the exact version they were queued
//! for.

use super::{FetchResult, RowStore, StoredRow, WriteOutcome};
use crate::mvcc::{
    DirtyCheck, Snapshot, TransactionManager, TupleVersion, TxnId, TxnState, Visibility,
    WriteCheck, BOOTSTRAP_TXN_ID,
};
use crate::types::{RelationId, Row, RowId};
use eyre::{bail, eyre, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

const SLOTS_PER_BLOCK: usize = 256;

#[derive(Debug, Default)]
struct Heap {
    versions: Vec<TupleVersion>,
}

impl Heap {
    fn slot(id: RowId) -> usize {
        id.block as usize * SLOTS_PER_BLOCK + id.offset as usize
    }

    fn row_id(slot: usize) -> RowId {
        RowId::new(
            (slot / SLOTS_PER_BLOCK) as u32,
            (slot % SLOTS_PER_BLOCK) as u16,
        )
    }

    fn get(&self, id: RowId) -> Result<&TupleVersion> {
        self.versions
            .get(Self::slot(id))
            .ok_or_else(|| eyre!("row {} does not exist", id))
    }

    fn get_mut(&mut self, id: RowId) -> Result<&mut TupleVersion> {
        self.versions
            .get_mut(Self::slot(id))
            .ok_or_else(|| eyre!("row {} does not exist", id))
    }

    fn append(&mut self, version: TupleVersion) -> RowId {
        self.versions.push(version);
        Self::row_id(self.versions.len() - 1)
    }
}

pub struct MemoryStore {
    txns: Arc<TransactionManager>,
    heaps: RwLock<HashMap<RelationId, Heap>>,
}

impl MemoryStore {
    pub fn new(txns: Arc<TransactionManager>) -> Self {
        Self {
            txns,
            heaps: RwLock::new(HashMap::new()),
        }
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    /// Inserts a row that every transaction sees as committed.
    pub fn load(&self, rel: RelationId, row: Row) -> Result<RowId> {
        self.insert(rel, BOOTSTRAP_TXN_ID, row)
    }

    pub fn version_count(&self, rel: RelationId) -> usize {
        self.heaps
            .read()
            .get(&rel)
            .map(|heap| heap.versions.len())
            .unwrap_or(0)
    }

    fn check(&self, heap: &Heap, xid: TxnId, id: RowId) -> Result<WriteCheck> {
        let check = heap.get(id)?.check_write(xid, &self.txns);
        if check == WriteCheck::Invisible {
            bail!("row {} is not visible to transaction {}", id, xid);
        }
        Ok(check)
    }

    fn write_outcome(check: WriteCheck) -> Option<WriteOutcome> {
        match check {
            WriteCheck::MayBeUpdated | WriteCheck::Invisible => None,
            WriteCheck::SelfModified => Some(WriteOutcome::SelfModified),
            WriteCheck::Updated { next } => Some(WriteOutcome::Updated { next }),
            WriteCheck::BeingModified { writer } => Some(WriteOutcome::BeingModified { writer }),
        }
    }
}

impl RowStore for MemoryStore {
    fn create_relation(&self, rel: RelationId) {
        self.heaps.write().entry(rel).or_default();
    }

    fn drop_relation(&self, rel: RelationId) {
        self.heaps.write().remove(&rel);
    }

    fn fetch(&self, rel: RelationId, id: RowId, visibility: Visibility<'_>) -> Result<FetchResult> {
        let heaps = self.heaps.read();
        let heap = heaps
            .get(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        let version = heap.get(id)?;
        let found = || {
            FetchResult::Found(StoredRow {
                id,
                xmin: version.xmin,
                row: version.row.clone(),
            })
        };
        let result = match visibility {
            Visibility::Any => found(),
            Visibility::Snapshot(snapshot) => {
                if version.check_snapshot(snapshot, &self.txns) {
                    found()
                } else {
                    FetchResult::NotVisible
                }
            }
            Visibility::Dirty(own) => match version.check_dirty(own, &self.txns) {
                DirtyCheck::Visible => found(),
                DirtyCheck::BeingModified { writer } => FetchResult::BeingModified { writer },
                DirtyCheck::Superseded { next } => FetchResult::Superseded { next },
                DirtyCheck::Gone => FetchResult::NotVisible,
            },
        };
        Ok(result)
    }

    fn scan(&self, rel: RelationId, snapshot: &Snapshot) -> Result<Vec<StoredRow>> {
        let heaps = self.heaps.read();
        let heap = heaps
            .get(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        Ok(heap
            .versions
            .iter()
            .enumerate()
            .filter(|(_, version)| version.check_snapshot(snapshot, &self.txns))
            .map(|(slot, version)| StoredRow {
                id: Heap::row_id(slot),
                xmin: version.xmin,
                row: version.row.clone(),
            })
            .collect())
    }

    fn insert(&self, rel: RelationId, xid: TxnId, row: Row) -> Result<RowId> {
        let mut heaps = self.heaps.write();
        let heap = heaps
            .get_mut(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        Ok(heap.append(TupleVersion::new(xid, row)))
    }

    fn update(&self, rel: RelationId, xid: TxnId, id: RowId, row: Row) -> Result<WriteOutcome> {
        let mut heaps = self.heaps.write();
        let heap = heaps
            .get_mut(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        if let Some(outcome) = Self::write_outcome(self.check(heap, xid, id)?) {
            return Ok(outcome);
        }
        let new_id = heap.append(TupleVersion::new(xid, row));
        let old = heap.get_mut(id)?;
        old.xmax = Some(xid);
        old.lock_only = false;
        old.forward = Some(new_id);
        Ok(WriteOutcome::Applied(new_id))
    }

    fn delete(&self, rel: RelationId, xid: TxnId, id: RowId) -> Result<WriteOutcome> {
        let mut heaps = self.heaps.write();
        let heap = heaps
            .get_mut(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        if let Some(outcome) = Self::write_outcome(self.check(heap, xid, id)?) {
            return Ok(outcome);
        }
        let old = heap.get_mut(id)?;
        old.xmax = Some(xid);
        old.lock_only = false;
        old.forward = None;
        Ok(WriteOutcome::Applied(id))
    }

    fn lock_for_update(&self, rel: RelationId, xid: TxnId, id: RowId) -> Result<WriteOutcome> {
        let mut heaps = self.heaps.write();
        let heap = heaps
            .get_mut(&rel)
            .ok_or_else(|| eyre!("relation {} has no storage", rel))?;
        if let Some(outcome) = Self::write_outcome(self.check(heap, xid, id)?) {
            return Ok(outcome);
        }
        let version = heap.get_mut(id)?;
        if version.xmax != Some(xid) {
            version.xmax = Some(xid);
            version.lock_only = true;
        }
        Ok(WriteOutcome::Applied(id))
    }

    fn wait_for_txn(&self, xid: TxnId) -> TxnState {
        self.txns.wait_for(xid)
    }
}
