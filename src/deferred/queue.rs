//! # Deferred Trigger Queue
//!
//! Per-transaction log of AFTER ROW trigger obligations.
//!
//! ## Event List
//!
//! ```text
//! events: [E0 done][E1 done][E2 ....][E3 ....][E4 ....]
//!                            ^
//!                            first_pending: scans start here
//! ```
//!
//! Events are appended by `record_event` and fired in recording order by
//! `invoke_events`. An item fires when the transaction is ending or when its
//! trigger currently resolves to immediate. Fired items are marked DONE in
//! place; an event becomes DONE once none of its items are left waiting.
//!
//! ## Key-Change Tracking
//!
//! For referenced-side RI UPDATE triggers the key is compared when the event
//! is recorded:
//!
//! ```text
//! key unchanged ──> item DONE (never fires); if this transaction created the
//!                   old row version, inherit ROW_INSERTED / KEY_CHANGED from
//!                   the event that produced it
//!
//! key changed   ──> if this transaction created the old row version and the
//!                   event that produced it shows ROW_INSERTED, or the same
//!                   trigger already saw a KEY_CHANGED: triggered data change
//!                   violation. Otherwise mark KEY_CHANGED.
//! ```
//!
//! DELETE applies the same look-back: deleting a row version this
//! transaction produced through a key-changing event is a violation.
//!
//! The event that produced a row version is found by scanning the list
//! backwards for the newest event on the same relation whose new row is that
//! version.
//!
//! ## Lifecycle
//!
//! | Call | Effect |
//! |------|--------|
//! | `begin` | copy session defaults, empty event list |
//! | `end_statement` | fire every item currently resolving to immediate |
//! | `end_transaction` | fire everything left, then discard all state |
//! | `abort` | discard all state, fire nothing |

use super::event::{state, DeferredEvent, DeferredItem};
use super::state::DeferredStatus;
use crate::config::DEFAULT_EVENT_LIST_CAPACITY;
use crate::error::TriggerError;
use crate::mvcc::{TxnId, Visibility};
use crate::storage::{FetchResult, RowStore, StoredRow};
use crate::trigger::{
    FunctionRegistry, RelationMeta, Trigger, TriggerCall, TriggerCatalog, TriggerDescriptor,
    TriggerFiring, TriggerOp, TriggerTiming,
};
use crate::types::{RelationId, Row, RowId, TriggerId};
use eyre::{bail, Result};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// What firing deferred events needs from the surrounding engine.
#[derive(Clone, Copy)]
pub struct FireEnv<'a> {
    pub catalog: &'a RwLock<TriggerCatalog>,
    pub functions: &'a FunctionRegistry,
    pub store: &'a dyn RowStore,
}

#[derive(Debug)]
pub struct DeferredQueue {
    status: DeferredStatus,
    events: Vec<DeferredEvent>,
    first_pending: usize,
}

fn static_state(trigger: &Trigger, has_before: bool) -> u8 {
    let mut flags = 0;
    if trigger.deferrable {
        flags |= state::DEFERRABLE;
    }
    if trigger.initially_deferred {
        flags |= state::INITDEFERRED;
    }
    if has_before {
        flags |= state::HAS_BEFORE;
    }
    flags
}

fn fetch_event_row(
    env: &FireEnv<'_>,
    relation: RelationId,
    id: Option<RowId>,
    trigger: TriggerId,
    relation_name: &str,
) -> Result<Option<Row>> {
    let Some(id) = id else {
        return Ok(None);
    };
    match env.store.fetch(relation, id, Visibility::Any)? {
        FetchResult::Found(stored) => Ok(Some(stored.row)),
        _ => Err(TriggerError::MissingEventRow {
            trigger,
            relation: relation_name.to_string(),
        }
        .into()),
    }
}

impl DeferredQueue {
    /// Starts a transaction's queue from the session defaults.
    pub fn begin(defaults: &DeferredStatus) -> Self {
        Self {
            status: defaults.clone(),
            events: Vec::with_capacity(DEFAULT_EVENT_LIST_CAPACITY),
            first_pending: 0,
        }
    }

    pub fn status(&self) -> &DeferredStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut DeferredStatus {
        &mut self.status
    }

    pub fn events(&self) -> &[DeferredEvent] {
        &self.events
    }

    pub fn pending_events(&self) -> usize {
        self.events[self.first_pending..]
            .iter()
            .filter(|e| !e.is_done())
            .count()
    }

    pub fn resolve_deferred(&mut self, trigger: &Trigger) -> bool {
        self.status
            .check_state(trigger.id, static_state(trigger, false))
    }

    fn previous_event(&self, relation: RelationId, row: RowId) -> Option<&DeferredEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.relation == relation && e.new_row == Some(row))
    }

    /// Appends the AFTER ROW event for one applied mutation.
    ///
    /// Fails with a triggered data change violation when a referenced key
    /// is changed twice, or after insertion, within this transaction.
    pub fn record_event(
        &mut self,
        firing: &TriggerFiring<'_>,
        xid: TxnId,
        op: TriggerOp,
        old: Option<&StoredRow>,
        new: Option<&StoredRow>,
    ) -> Result<()> {
        let Some(desc) = firing.descriptor() else {
            return Ok(());
        };
        let relation = firing.relation();
        let triggers: SmallVec<[&Arc<Trigger>; 4]> = desc
            .after_row(op)
            .filter(|t| t.enabled || firing.queues_disabled())
            .collect();
        if triggers.is_empty() {
            return Ok(());
        }

        let has_before = desc.has_before_row(op);
        let mut event = DeferredEvent::new(op, relation.id, old.map(|r| r.id), new.map(|r| r.id));
        event.items.extend(
            triggers
                .iter()
                .map(|t| DeferredItem::new(t.id, static_state(t, has_before))),
        );

        let violation = || -> eyre::Report {
            TriggerError::TriggeredDataChange {
                relation: relation.name.clone(),
            }
            .into()
        };

        match op {
            TriggerOp::Insert => {
                event.set(state::ROW_INSERTED | state::KEY_CHANGED);
            }
            TriggerOp::Update => {
                let (Some(old), Some(new)) = (old, new) else {
                    bail!("UPDATE event on '{}' needs old and new rows", relation.name);
                };
                let functions = firing.functions();
                let prev = if old.xmin == xid {
                    self.previous_event(relation.id, old.id)
                } else {
                    None
                };
                for (i, trigger) in triggers.iter().enumerate() {
                    let comparator = functions
                        .ri_role(trigger.function)
                        .is_some_and(|role| role.is_key_comparator());
                    if !comparator {
                        continue;
                    }
                    let function = functions.get(trigger.function)?;
                    let prev_key_changed = prev
                        .and_then(|p| p.item(trigger.id))
                        .is_some_and(|item| item.has(state::KEY_CHANGED));
                    let prev_inserted = prev.is_some_and(|p| p.has(state::ROW_INSERTED));

                    if function.keys_equal(trigger, relation, &old.row, &new.row)? {
                        event.items[i].set(state::DONE);
                        if prev_inserted {
                            event.set(state::ROW_INSERTED | state::KEY_CHANGED);
                            event.items[i].set(state::KEY_CHANGED);
                        } else if prev_key_changed {
                            event.items[i].set(state::KEY_CHANGED);
                            event.set(state::KEY_CHANGED);
                        }
                        tracing::trace!(trigger = %trigger.name, "key unchanged, item skipped");
                    } else {
                        if prev_inserted || prev_key_changed {
                            tracing::debug!(
                                trigger = %trigger.name,
                                relation = %relation.name,
                                row = %old.id,
                                "key changed twice in one transaction"
                            );
                            return Err(violation());
                        }
                        event.items[i].set(state::KEY_CHANGED);
                        event.set(state::KEY_CHANGED);
                    }
                }
            }
            TriggerOp::Delete => {
                let Some(old) = old else {
                    bail!("DELETE event on '{}' needs the old row", relation.name);
                };
                if old.xmin == xid
                    && self
                        .previous_event(relation.id, old.id)
                        .is_some_and(|p| p.has(state::KEY_CHANGED))
                {
                    return Err(violation());
                }
            }
        }

        tracing::debug!(
            relation = %relation.name,
            %op,
            items = event.items.len(),
            seq = self.events.len(),
            "recorded deferred trigger event"
        );
        self.events.push(event);
        Ok(())
    }

    /// Fires queued items in recording order and returns how many fired.
    ///
    /// With `immediate_only`, items whose trigger resolves to deferred are
    /// left in place.
    pub fn invoke_events(&mut self, env: &FireEnv<'_>, immediate_only: bool) -> Result<usize> {
        let Self {
            status,
            events,
            first_pending,
        } = self;
        let mut fired = 0;
        let mut prefix_done = true;

        for idx in *first_pending..events.len() {
            if events[idx].is_done() {
                if prefix_done {
                    *first_pending = idx + 1;
                }
                continue;
            }

            let mut still_deferred = false;
            let mut loaded: Option<LoadedEvent> = None;
            for item_idx in 0..events[idx].items.len() {
                let item = events[idx].items[item_idx];
                if item.is_done() {
                    continue;
                }
                if immediate_only && status.check_state(item.trigger, item.state) {
                    still_deferred = true;
                    continue;
                }
                if loaded.is_none() {
                    loaded = Some(LoadedEvent::load(env, &events[idx], item.trigger)?);
                }
                let Some(ctx) = loaded.as_ref() else {
                    continue;
                };
                ctx.fire(env, events[idx].op, item.trigger)?;
                events[idx].items[item_idx].set(state::DONE);
                fired += 1;
            }

            if still_deferred {
                prefix_done = false;
            } else {
                events[idx].set(state::DONE);
                if prefix_done {
                    *first_pending = idx + 1;
                }
            }
        }

        if fired > 0 {
            tracing::debug!(fired, immediate_only, "invoked deferred triggers");
        }
        Ok(fired)
    }

    pub fn end_statement(&mut self, env: &FireEnv<'_>) -> Result<usize> {
        self.invoke_events(env, true)
    }

    pub fn end_transaction(&mut self, env: &FireEnv<'_>) -> Result<usize> {
        let fired = self.invoke_events(env, false)?;
        self.discard();
        Ok(fired)
    }

    pub fn abort(&mut self) {
        if !self.events.is_empty() {
            tracing::debug!(
                discarded = self.events.len(),
                "abort discarded deferred trigger events"
            );
        }
        self.discard();
    }

    fn discard(&mut self) {
        self.events.clear();
        self.status = DeferredStatus::new();
        self.first_pending = 0;
    }
}

/// Relation, trigger set and re-fetched rows for one event being fired.
struct LoadedEvent {
    relation: Arc<RelationMeta>,
    descriptor: Arc<TriggerDescriptor>,
    old_row: Option<Row>,
    new_row: Option<Row>,
}

impl LoadedEvent {
    fn load(env: &FireEnv<'_>, event: &DeferredEvent, trigger: TriggerId) -> Result<Self> {
        let (relation, descriptor) = {
            let catalog = env.catalog.read();
            (catalog.relation(event.relation)?, catalog.descriptor(event.relation)?)
        };
        let Some(descriptor) = descriptor else {
            bail!(
                "relation '{}' no longer has the trigger {} queued for it",
                relation.name,
                trigger
            );
        };
        let old_row = fetch_event_row(env, event.relation, event.old_row, trigger, &relation.name)?;
        let new_row = fetch_event_row(env, event.relation, event.new_row, trigger, &relation.name)?;
        Ok(Self {
            relation,
            descriptor,
            old_row,
            new_row,
        })
    }

    fn fire(&self, env: &FireEnv<'_>, op: TriggerOp, trigger_id: TriggerId) -> Result<()> {
        let Some(trigger) = self.descriptor.trigger(trigger_id) else {
            bail!(
                "deferred trigger {} on '{}' no longer exists",
                trigger_id,
                self.relation.name
            );
        };
        let function = env.functions.get(trigger.function)?;
        tracing::trace!(trigger = %trigger.name, %op, "firing AFTER trigger");
        let call = TriggerCall {
            op,
            timing: TriggerTiming::After,
            relation: &self.relation,
            trigger,
            old_row: self.old_row.as_ref(),
            new_row: self.new_row.as_ref(),
        };
        // AFTER triggers cannot rewrite or veto an applied mutation.
        let _ = function.invoke(&call)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::TransactionManager;
    use crate::storage::MemoryStore;
    use crate::trigger::{
        RiAction, RiEvent, RiRole, TriggerDef, TriggerFunction, TriggerOutcome,
    };
    use crate::types::OwnedValue;
    use parking_lot::Mutex;

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        role: Option<RiRole>,
    }

    impl TriggerFunction for Recorder {
        fn invoke(&self, call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
            let key = call
                .trigger_row()
                .and_then(|r| r.get(0))
                .map(|v| v.to_string())
                .unwrap_or_default();
            self.log.lock().push(format!("{}:{}", call.trigger.name, key));
            Ok(TriggerOutcome::Unchanged)
        }

        fn ri_role(&self) -> Option<RiRole> {
            self.role
        }
    }

    struct Fixture {
        catalog: RwLock<TriggerCatalog>,
        functions: FunctionRegistry,
        store: MemoryStore,
        rel: RelationId,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(Mutex::new(Vec::new()));
            let functions = FunctionRegistry::new();
            functions.register(
                "audit",
                Arc::new(Recorder {
                    log: Arc::clone(&log),
                    role: None,
                }),
            );
            functions.register(
                "ri_upd",
                Arc::new(Recorder {
                    log: Arc::clone(&log),
                    role: Some(RiRole::new(RiAction::NoAction, RiEvent::ReferencedUpdate)),
                }),
            );
            let mut catalog = TriggerCatalog::new();
            let rel = catalog.create_relation("customers", &["id", "name"]).unwrap();
            let store = MemoryStore::new(Arc::new(TransactionManager::new()));
            store.create_relation(rel);
            Self {
                catalog: RwLock::new(catalog),
                functions,
                store,
                rel,
                log,
            }
        }

        fn add(&self, def: TriggerDef) -> TriggerId {
            self.catalog.write().create_trigger(def, &self.functions).unwrap()
        }

        fn env(&self) -> FireEnv<'_> {
            FireEnv {
                catalog: &self.catalog,
                functions: &self.functions,
                store: &self.store,
            }
        }

        fn record(
            &self,
            queue: &mut DeferredQueue,
            xid: TxnId,
            op: TriggerOp,
            old: Option<&StoredRow>,
            new: Option<&StoredRow>,
        ) -> Result<()> {
            let catalog = self.catalog.read();
            let meta = catalog.relation(self.rel).unwrap();
            let desc = catalog.descriptor(self.rel).unwrap();
            let firing = TriggerFiring::new(&self.functions, &meta, desc.as_deref());
            firing.record_obligation(queue, xid, op, old, new)
        }

        fn stored(&self, xid: TxnId, key: i64) -> StoredRow {
            let row = Row::new(vec![OwnedValue::Int(key), OwnedValue::Null]);
            let id = self.store.insert(self.rel, xid, row.clone()).unwrap();
            StoredRow { id, xmin: xid, row }
        }

        fn ri_update_trigger(&self) -> TriggerId {
            self.add(
                TriggerDef::after("ri_upd", self.rel, "ri_upd")
                    .on(TriggerOp::Update)
                    .constraint("fk_orders", None)
                    .deferrable(true, true)
                    .args(["fk_orders", "orders", "customers", "UNSPECIFIED", "cid", "id"]),
            )
        }
    }

    #[test]
    fn immediate_items_fire_at_statement_end_and_deferred_at_commit() {
        let fx = Fixture::new();
        fx.add(TriggerDef::after("imm", fx.rel, "audit").on(TriggerOp::Insert));
        fx.add(
            TriggerDef::after("def", fx.rel, "audit")
                .on(TriggerOp::Insert)
                .constraint("c_def", None)
                .deferrable(true, true),
        );
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let row = fx.stored(1, 10);
        fx.record(&mut queue, 1, TriggerOp::Insert, None, Some(&row)).unwrap();

        assert_eq!(queue.end_statement(&fx.env()).unwrap(), 1);
        assert_eq!(*fx.log.lock(), vec!["imm:10".to_string()]);
        assert_eq!(queue.pending_events(), 1);

        assert_eq!(queue.end_transaction(&fx.env()).unwrap(), 1);
        assert_eq!(fx.log.lock().len(), 2);
        assert!(queue.events().is_empty());
    }

    #[test]
    fn events_fire_in_recording_order() {
        let fx = Fixture::new();
        fx.add(TriggerDef::after("a", fx.rel, "audit").on(TriggerOp::Insert));
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        for key in [3, 1, 2] {
            let row = fx.stored(1, key);
            fx.record(&mut queue, 1, TriggerOp::Insert, None, Some(&row)).unwrap();
        }
        queue.end_transaction(&fx.env()).unwrap();
        assert_eq!(*fx.log.lock(), vec!["a:3", "a:1", "a:2"]);
    }

    #[test]
    fn cursor_skips_fully_fired_prefix() {
        let fx = Fixture::new();
        fx.add(TriggerDef::after("a", fx.rel, "audit").on(TriggerOp::Insert));
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let row = fx.stored(1, 1);
        fx.record(&mut queue, 1, TriggerOp::Insert, None, Some(&row)).unwrap();
        queue.end_statement(&fx.env()).unwrap();
        assert_eq!(queue.first_pending, 1);
        assert_eq!(queue.end_statement(&fx.env()).unwrap(), 0);
    }

    #[test]
    fn unchanged_key_marks_item_done() {
        let fx = Fixture::new();
        fx.ri_update_trigger();
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        queue.status_mut().set_all(false);
        let old = fx.stored(0, 5);
        let new = fx.stored(1, 5);
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&old), Some(&new)).unwrap();
        assert!(queue.events()[0].items[0].is_done());
        assert_eq!(queue.end_statement(&fx.env()).unwrap(), 0);
        assert!(fx.log.lock().is_empty());
    }

    #[test]
    fn second_key_change_is_a_violation() {
        let fx = Fixture::new();
        fx.ri_update_trigger();
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let v5 = fx.stored(0, 5);
        let v7 = fx.stored(1, 7);
        let v9 = fx.stored(1, 9);
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&v5), Some(&v7)).unwrap();
        assert!(queue.events()[0].has(state::KEY_CHANGED));
        let err = fx
            .record(&mut queue, 1, TriggerOp::Update, Some(&v7), Some(&v9))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TriggerError>(),
            Some(TriggerError::TriggeredDataChange { .. })
        ));
        assert_eq!(queue.events().len(), 1);
    }

    #[test]
    fn unchanged_update_inherits_previous_key_change() {
        let fx = Fixture::new();
        fx.ri_update_trigger();
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let v5 = fx.stored(0, 5);
        let v7 = fx.stored(1, 7);
        let v7b = fx.stored(1, 7);
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&v5), Some(&v7)).unwrap();
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&v7), Some(&v7b)).unwrap();
        let second = &queue.events()[1];
        assert!(second.has(state::KEY_CHANGED));
        assert!(second.items[0].is_done());
        assert!(second.items[0].has(state::KEY_CHANGED));
    }

    #[test]
    fn key_change_on_foreign_row_version_is_allowed() {
        let fx = Fixture::new();
        fx.ri_update_trigger();
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let a = fx.stored(0, 5);
        let b = fx.stored(1, 6);
        let c = fx.stored(0, 8);
        let d = fx.stored(1, 9);
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&a), Some(&b)).unwrap();
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&c), Some(&d)).unwrap();
        assert_eq!(queue.events().len(), 2);
    }

    #[test]
    fn deleting_row_after_key_change_is_a_violation() {
        let fx = Fixture::new();
        fx.ri_update_trigger();
        fx.add(TriggerDef::after("del", fx.rel, "audit").on(TriggerOp::Delete));
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let v5 = fx.stored(0, 5);
        let v7 = fx.stored(1, 7);
        fx.record(&mut queue, 1, TriggerOp::Update, Some(&v5), Some(&v7)).unwrap();
        let err = fx
            .record(&mut queue, 1, TriggerOp::Delete, Some(&v7), None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TriggerError>(),
            Some(TriggerError::TriggeredDataChange { .. })
        ));
    }

    #[test]
    fn abort_fires_nothing() {
        let fx = Fixture::new();
        fx.add(
            TriggerDef::after("def", fx.rel, "audit")
                .on(TriggerOp::Insert)
                .constraint("c_def", None)
                .deferrable(true, true),
        );
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        for key in 0..3 {
            let row = fx.stored(1, key);
            fx.record(&mut queue, 1, TriggerOp::Insert, None, Some(&row)).unwrap();
        }
        queue.end_statement(&fx.env()).unwrap();
        queue.abort();
        assert!(queue.events().is_empty());
        assert_eq!(queue.end_transaction(&fx.env()).unwrap(), 0);
        assert!(fx.log.lock().is_empty());
    }

    #[test]
    fn disabled_after_triggers_are_not_queued() {
        let fx = Fixture::new();
        fx.add(
            TriggerDef::after("off", fx.rel, "audit")
                .on(TriggerOp::Insert)
                .enabled(false),
        );
        let mut queue = DeferredQueue::begin(&DeferredStatus::new());
        let row = fx.stored(1, 1);
        fx.record(&mut queue, 1, TriggerOp::Insert, None, Some(&row)).unwrap();
        assert!(queue.events().is_empty());
    }

    #[test]
    fn resolve_deferred_uses_transaction_copy_of_defaults() {
        let fx = Fixture::new();
        let id = fx.ri_update_trigger();
        let trigger = fx.catalog.read().triggers_by_constraint("fk_orders").unwrap().remove(0);
        assert_eq!(trigger.id, id);

        let mut defaults = DeferredStatus::new();
        defaults.set_all(false);
        let mut queue = DeferredQueue::begin(&defaults);
        assert!(!queue.resolve_deferred(&trigger));
        queue.status_mut().set_trigger(id, true);
        assert!(queue.resolve_deferred(&trigger));
        assert_eq!(defaults.get(id), None);
    }
}
