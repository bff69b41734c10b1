//! # Row Trigger Firing
//!
//! BEFORE ROW triggers run synchronously around a row mutation; AFTER ROW
//! triggers are only ever recorded as obligations in the transaction's
//! deferred queue.
//!
//! ## BEFORE ROW Chain
//!
//! ```text
//! candidate ──> T1 ──Unchanged──> T2 ──Replaced(r)──> T3(r) ──> ... ──> write(r')
//!                                  │
//!                                  └──Suppressed──> stop: no write, no AFTER
//!                                                   event, no constraint check
//! ```
//!
//! Triggers run in stored order; disabled triggers are skipped. Each trigger
//! sees the latest candidate, never the original row once an earlier trigger
//! replaced it.
//!
//! Errors returned by a trigger function propagate unchanged. Nothing fired
//! earlier in the chain is compensated here.

use super::catalog::RelationMeta;
use super::definition::{TriggerDescriptor, TriggerOp, TriggerTiming};
use super::function::{FunctionRegistry, TriggerCall, TriggerOutcome};
use crate::deferred::DeferredQueue;
use crate::mvcc::TxnId;
use crate::storage::StoredRow;
use crate::types::Row;
use eyre::Result;

/// Firing context for one relation during one statement.
pub struct TriggerFiring<'a> {
    functions: &'a FunctionRegistry,
    relation: &'a RelationMeta,
    descriptor: Option<&'a TriggerDescriptor>,
    queue_disabled: bool,
}

impl<'a> TriggerFiring<'a> {
    pub fn new(
        functions: &'a FunctionRegistry,
        relation: &'a RelationMeta,
        descriptor: Option<&'a TriggerDescriptor>,
    ) -> Self {
        Self {
            functions,
            relation,
            descriptor,
            queue_disabled: false,
        }
    }

    /// Queue AFTER events for disabled triggers as well.
    pub fn queue_disabled(mut self, enabled: bool) -> Self {
        self.queue_disabled = enabled;
        self
    }

    pub fn functions(&self) -> &'a FunctionRegistry {
        self.functions
    }

    pub fn relation(&self) -> &'a RelationMeta {
        self.relation
    }

    pub fn descriptor(&self) -> Option<&'a TriggerDescriptor> {
        self.descriptor
    }

    pub fn queues_disabled(&self) -> bool {
        self.queue_disabled
    }

    pub fn has_before(&self, op: TriggerOp) -> bool {
        self.descriptor.is_some_and(|d| d.has_before_row(op))
    }

    pub fn has_after(&self, op: TriggerOp) -> bool {
        self.descriptor.is_some_and(|d| d.has_after_row(op))
    }

    /// Runs the BEFORE chain; `None` means a trigger suppressed the
    /// mutation.
    fn run_before(
        &self,
        op: TriggerOp,
        old: Option<&Row>,
        candidate: Option<Row>,
    ) -> Result<Option<Option<Row>>> {
        let Some(desc) = self.descriptor else {
            return Ok(Some(candidate));
        };
        let mut candidate = candidate;
        for trigger in desc.before_row(op) {
            if !trigger.enabled {
                continue;
            }
            let function = self.functions.get(trigger.function)?;
            let call = TriggerCall {
                op,
                timing: TriggerTiming::Before,
                relation: self.relation,
                trigger,
                old_row: old,
                new_row: candidate.as_ref(),
            };
            match function.invoke(&call)? {
                TriggerOutcome::Unchanged => {}
                TriggerOutcome::Replaced(row) => {
                    tracing::trace!(trigger = %trigger.name, %op, "BEFORE trigger replaced row");
                    if op != TriggerOp::Delete {
                        candidate = Some(row);
                    }
                }
                TriggerOutcome::Suppressed => {
                    tracing::debug!(
                        trigger = %trigger.name,
                        relation = %self.relation.name,
                        %op,
                        "BEFORE trigger suppressed row"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(candidate))
    }

    pub fn fire_before_insert(&self, new: Row) -> Result<Option<Row>> {
        Ok(self
            .run_before(TriggerOp::Insert, None, Some(new))?
            .flatten())
    }

    pub fn fire_before_update(&self, old: &Row, new: Row) -> Result<Option<Row>> {
        Ok(self
            .run_before(TriggerOp::Update, Some(old), Some(new))?
            .flatten())
    }

    /// Returns `false` when a trigger suppressed the delete.
    pub fn fire_before_delete(&self, old: &Row) -> Result<bool> {
        Ok(self.run_before(TriggerOp::Delete, Some(old), None)?.is_some())
    }

    /// Records the AFTER ROW obligation for an applied mutation.
    pub fn record_obligation(
        &self,
        queue: &mut DeferredQueue,
        xid: TxnId,
        op: TriggerOp,
        old: Option<&StoredRow>,
        new: Option<&StoredRow>,
    ) -> Result<()> {
        if !self.has_after(op) {
            return Ok(());
        }
        queue.record_event(self, xid, op, old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::catalog::{TriggerCatalog, TriggerDef};
    use crate::trigger::function::TriggerFunction;
    use crate::types::{OwnedValue, RelationId};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct AddOne {
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl TriggerFunction for AddOne {
        fn invoke(&self, call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
            let mut row = call.new_row.cloned().unwrap_or_else(|| Row::new(vec![]));
            let v = row.get_int(0)?;
            self.seen.lock().push(v);
            row.set(0, OwnedValue::Int(v + 1))?;
            Ok(TriggerOutcome::Replaced(row))
        }
    }

    struct Suppress;

    impl TriggerFunction for Suppress {
        fn invoke(&self, _call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
            Ok(TriggerOutcome::Suppressed)
        }
    }

    struct Fail;

    impl TriggerFunction for Fail {
        fn invoke(&self, _call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
            eyre::bail!("boom")
        }
    }

    type Fixture = (TriggerCatalog, FunctionRegistry, RelationId, Arc<Mutex<Vec<i64>>>);

    fn setup(defs: impl FnOnce(RelationId) -> Vec<TriggerDef>) -> Fixture {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let functions = FunctionRegistry::new();
        functions.register("add_one", Arc::new(AddOne { seen: Arc::clone(&seen) }));
        functions.register("suppress", Arc::new(Suppress));
        functions.register("fail", Arc::new(Fail));
        let mut catalog = TriggerCatalog::new();
        let rel = catalog.create_relation("t", &["v"]).unwrap();
        for def in defs(rel) {
            catalog.create_trigger(def, &functions).unwrap();
        }
        (catalog, functions, rel, seen)
    }

    #[test]
    fn each_trigger_sees_latest_candidate() {
        let (catalog, functions, rel, seen) = setup(|rel| {
            vec![
                TriggerDef::before("a", rel, "add_one").on(TriggerOp::Insert),
                TriggerDef::before("b", rel, "add_one").on(TriggerOp::Insert),
            ]
        });
        let meta = catalog.relation(rel).unwrap();
        let desc = catalog.descriptor(rel).unwrap();
        let firing = TriggerFiring::new(&functions, &meta, desc.as_deref());
        let out = firing
            .fire_before_insert(Row::new(vec![OwnedValue::Int(1)]))
            .unwrap()
            .unwrap();
        assert_eq!(out.get_int(0).unwrap(), 3);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn suppress_stops_the_chain() {
        let (catalog, functions, rel, seen) = setup(|rel| {
            vec![
                TriggerDef::before("a", rel, "suppress").on(TriggerOp::Insert),
                TriggerDef::before("b", rel, "add_one").on(TriggerOp::Insert),
            ]
        });
        let meta = catalog.relation(rel).unwrap();
        let desc = catalog.descriptor(rel).unwrap();
        let firing = TriggerFiring::new(&functions, &meta, desc.as_deref());
        assert!(firing
            .fire_before_insert(Row::new(vec![OwnedValue::Int(1)]))
            .unwrap()
            .is_none());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn disabled_triggers_are_skipped() {
        let (catalog, functions, rel, seen) = setup(|rel| {
            vec![TriggerDef::before("a", rel, "add_one")
                .on(TriggerOp::Update)
                .enabled(false)]
        });
        let meta = catalog.relation(rel).unwrap();
        let desc = catalog.descriptor(rel).unwrap();
        let firing = TriggerFiring::new(&functions, &meta, desc.as_deref());
        let old = Row::new(vec![OwnedValue::Int(1)]);
        let out = firing
            .fire_before_update(&old, Row::new(vec![OwnedValue::Int(5)]))
            .unwrap()
            .unwrap();
        assert_eq!(out.get_int(0).unwrap(), 5);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn delete_proceeds_unless_suppressed() {
        let (catalog, functions, rel, _) = setup(|rel| {
            vec![TriggerDef::before("a", rel, "suppress").on(TriggerOp::Delete)]
        });
        let meta = catalog.relation(rel).unwrap();
        let desc = catalog.descriptor(rel).unwrap();
        let firing = TriggerFiring::new(&functions, &meta, desc.as_deref());
        let old = Row::new(vec![OwnedValue::Int(1)]);
        assert!(!firing.fire_before_delete(&old).unwrap());

        let none = TriggerFiring::new(&functions, &meta, None);
        assert!(none.fire_before_delete(&old).unwrap());
    }

    #[test]
    fn function_errors_propagate() {
        let (catalog, functions, rel, _) = setup(|rel| {
            vec![TriggerDef::before("a", rel, "fail").on(TriggerOp::Insert)]
        });
        let meta = catalog.relation(rel).unwrap();
        let desc = catalog.descriptor(rel).unwrap();
        let firing = TriggerFiring::new(&functions, &meta, desc.as_deref());
        let err = firing
            .fire_before_insert(Row::new(vec![OwnedValue::Int(1)]))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
