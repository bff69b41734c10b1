//! # Trigger Catalog
//!
//! The catalog owns relation metadata and persisted trigger records, and
//! hands out per-relation [`TriggerDescriptor`]s.
//!
//! ## Descriptor Lifecycle
//!
//! ```text
//! create_trigger / drop_trigger / remove_relation_triggers
//!        │
//!        ├── update persisted records
//!        ├── update the relation's trigger_count
//!        └── invalidate the cached descriptor
//!
//! descriptor(rel)
//!        │
//!        ├── trigger_count == 0  -> None (nothing is built)
//!        ├── cached              -> Arc clone
//!        └── otherwise           -> decode records in stored order,
//!                                   classify, cache, return
//! ```
//!
//! Descriptors are immutable once built. A caller holding an `Arc` keeps a
//! consistent view even if the trigger set changes underneath it.

use super::definition::{
    EventMask, Trigger, TriggerDescriptor, TriggerLevel, TriggerOp, TriggerRecord, TriggerTiming,
};
use super::function::FunctionRegistry;
use super::ri;
use crate::error::TriggerError;
use crate::types::{RelationId, TriggerId};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMeta {
    pub id: RelationId,
    pub name: String,
    pub columns: Vec<String>,
}

impl RelationMeta {
    pub fn new(id: RelationId, name: &str, columns: &[&str]) -> Self {
        Self {
            id,
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// DDL input for `create_trigger`.
#[derive(Debug, Clone)]
pub struct TriggerDef {
    pub name: String,
    pub relation: RelationId,
    pub function: String,
    pub timing: TriggerTiming,
    pub level: TriggerLevel,
    pub ops: SmallVec<[TriggerOp; 3]>,
    pub enabled: bool,
    pub constraint: Option<ConstraintSpec>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSpec {
    pub name: String,
    pub target: Option<RelationId>,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl TriggerDef {
    pub fn new(name: &str, relation: RelationId, function: &str, timing: TriggerTiming) -> Self {
        Self {
            name: name.to_string(),
            relation,
            function: function.to_string(),
            timing,
            level: TriggerLevel::Row,
            ops: SmallVec::new(),
            enabled: true,
            constraint: None,
            args: Vec::new(),
        }
    }

    pub fn before(name: &str, relation: RelationId, function: &str) -> Self {
        Self::new(name, relation, function, TriggerTiming::Before)
    }

    pub fn after(name: &str, relation: RelationId, function: &str) -> Self {
        Self::new(name, relation, function, TriggerTiming::After)
    }

    pub fn on(mut self, op: TriggerOp) -> Self {
        if !self.ops.contains(&op) {
            self.ops.push(op);
        }
        self
    }

    pub fn level(mut self, level: TriggerLevel) -> Self {
        self.level = level;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marks the trigger as a constraint trigger named `name`.
    pub fn constraint(mut self, name: &str, target: Option<RelationId>) -> Self {
        self.constraint = Some(ConstraintSpec {
            name: name.to_string(),
            target,
            deferrable: false,
            initially_deferred: false,
        });
        self
    }

    /// Has no effect on triggers that are not constraint triggers.
    pub fn deferrable(mut self, deferrable: bool, initially_deferred: bool) -> Self {
        if let Some(spec) = self.constraint.as_mut() {
            spec.deferrable = deferrable;
            spec.initially_deferred = initially_deferred;
        }
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

struct RelationEntry {
    meta: Arc<RelationMeta>,
    trigger_count: u32,
    descriptor: Mutex<Option<Arc<TriggerDescriptor>>>,
}

impl RelationEntry {
    fn invalidate(&self) {
        *self.descriptor.lock() = None;
    }
}

#[derive(Default)]
pub struct TriggerCatalog {
    relations: HashMap<RelationId, RelationEntry>,
    records: Vec<(TriggerId, TriggerRecord)>,
    next_relation_id: RelationId,
    next_trigger_id: TriggerId,
}

impl TriggerCatalog {
    pub fn new() -> Self {
        Self {
            next_relation_id: 1,
            next_trigger_id: 1,
            ..Default::default()
        }
    }

    pub fn create_relation(&mut self, name: &str, columns: &[&str]) -> Result<RelationId> {
        if self.relation_by_name(name).is_some() {
            eyre::bail!("relation '{}' already exists", name);
        }
        let id = self.next_relation_id;
        self.next_relation_id += 1;
        self.relations.insert(
            id,
            RelationEntry {
                meta: Arc::new(RelationMeta::new(id, name, columns)),
                trigger_count: 0,
                descriptor: Mutex::new(None),
            },
        );
        Ok(id)
    }

    pub fn drop_relation(&mut self, rel: RelationId) -> Result<()> {
        self.entry(rel)?;
        self.remove_relation_triggers(rel);
        self.relations.remove(&rel);
        Ok(())
    }

    pub fn relation(&self, rel: RelationId) -> Result<Arc<RelationMeta>> {
        Ok(Arc::clone(&self.entry(rel)?.meta))
    }

    pub fn relation_by_name(&self, name: &str) -> Option<Arc<RelationMeta>> {
        self.relations
            .values()
            .find(|entry| entry.meta.name == name)
            .map(|entry| Arc::clone(&entry.meta))
    }

    pub fn trigger_count(&self, rel: RelationId) -> Result<u32> {
        Ok(self.entry(rel)?.trigger_count)
    }

    fn entry(&self, rel: RelationId) -> Result<&RelationEntry> {
        self.relations
            .get(&rel)
            .ok_or_else(|| TriggerError::UndefinedRelation { id: rel }.into())
    }

    fn entry_mut(&mut self, rel: RelationId) -> Result<&mut RelationEntry> {
        self.relations
            .get_mut(&rel)
            .ok_or_else(|| TriggerError::UndefinedRelation { id: rel }.into())
    }

    pub fn descriptor(&self, rel: RelationId) -> Result<Option<Arc<TriggerDescriptor>>> {
        let entry = self.entry(rel)?;
        if entry.trigger_count == 0 {
            return Ok(None);
        }
        let mut cached = entry.descriptor.lock();
        if let Some(desc) = cached.as_ref() {
            return Ok(Some(Arc::clone(desc)));
        }
        let triggers = self
            .records
            .iter()
            .filter(|(_, record)| record.relation == rel)
            .map(|(id, record)| Trigger::from_record(*id, record))
            .collect::<Result<Vec<_>>>()?;
        if triggers.len() != entry.trigger_count as usize {
            eyre::bail!(
                "relation '{}' claims {} triggers but {} were found",
                entry.meta.name,
                entry.trigger_count,
                triggers.len()
            );
        }
        let desc = Arc::new(TriggerDescriptor::build(triggers)?);
        tracing::debug!(
            relation = %entry.meta.name,
            triggers = desc.triggers().len(),
            "built trigger descriptor"
        );
        *cached = Some(Arc::clone(&desc));
        Ok(Some(desc))
    }

    pub fn create_trigger(&mut self, def: TriggerDef, functions: &FunctionRegistry) -> Result<TriggerId> {
        if def.level == TriggerLevel::Statement {
            return Err(TriggerError::Unsupported {
                feature: "statement-level triggers",
            }
            .into());
        }
        if def.timing == TriggerTiming::InsteadOf {
            return Err(TriggerError::Unsupported {
                feature: "INSTEAD OF triggers",
            }
            .into());
        }
        let relation = self.relation(def.relation)?;
        let events = EventMask::new(def.timing, def.level, &def.ops);
        if !events.has_ops() {
            return Err(TriggerError::InvalidArguments {
                trigger: def.name,
                reason: "no triggering operation given".into(),
            }
            .into());
        }
        if self
            .records
            .iter()
            .any(|(_, r)| r.relation == def.relation && r.name == def.name)
        {
            return Err(TriggerError::DuplicateTrigger {
                name: def.name,
                relation: relation.name.clone(),
            }
            .into());
        }
        let function = functions.lookup(&def.function).ok_or_else(|| {
            eyre::Report::from(TriggerError::UndefinedFunction {
                name: def.function.clone(),
            })
        })?;
        if functions.ri_role(function).is_some() {
            ri::parse_args(&def.name, &def.args)?;
        }

        let constraint = def.constraint.unwrap_or(ConstraintSpec {
            name: String::new(),
            target: None,
            deferrable: false,
            initially_deferred: false,
        });
        if let Some(target) = constraint.target {
            self.entry(target)?;
        }
        if constraint.initially_deferred && !constraint.deferrable {
            return Err(TriggerError::InvalidArguments {
                trigger: def.name,
                reason: "INITIALLY DEFERRED requires DEFERRABLE".into(),
            }
            .into());
        }

        let (nargs, args) = TriggerRecord::pack_args(&def.args)?;
        let record = TriggerRecord {
            name: def.name,
            relation: def.relation,
            function,
            enabled: def.enabled,
            is_constraint: !constraint.name.is_empty(),
            constraint_name: constraint.name,
            constraint_relation: constraint.target,
            deferrable: constraint.deferrable,
            initially_deferred: constraint.initially_deferred,
            events,
            nargs,
            args,
        };

        let id = self.next_trigger_id;
        self.next_trigger_id += 1;
        tracing::debug!(
            trigger = %record.name,
            relation = %relation.name,
            id,
            "created trigger"
        );
        self.records.push((id, record));
        let entry = self.entry_mut(def.relation)?;
        entry.trigger_count += 1;
        entry.invalidate();
        Ok(id)
    }

    pub fn drop_trigger(&mut self, rel: RelationId, name: &str) -> Result<()> {
        let relation = self.relation(rel)?;
        let Some(pos) = self
            .records
            .iter()
            .position(|(_, r)| r.relation == rel && r.name == name)
        else {
            return Err(TriggerError::UndefinedTrigger {
                name: name.to_string(),
                relation: relation.name.clone(),
            }
            .into());
        };
        self.records.remove(pos);
        let entry = self.entry_mut(rel)?;
        entry.trigger_count -= 1;
        entry.invalidate();
        tracing::debug!(trigger = name, relation = %relation.name, "dropped trigger");
        Ok(())
    }

    /// Removes the triggers of `rel` and every constraint trigger elsewhere
    /// whose constraint target is `rel`.
    pub fn remove_relation_triggers(&mut self, rel: RelationId) {
        let mut touched: SmallVec<[RelationId; 8]> = SmallVec::new();
        self.records.retain(|(_, record)| {
            let owned = record.relation == rel;
            let referencing = record.is_constraint && record.constraint_relation == Some(rel);
            if owned || referencing {
                touched.push(record.relation);
                false
            } else {
                true
            }
        });
        for owner in touched {
            if let Some(entry) = self.relations.get_mut(&owner) {
                entry.trigger_count = entry.trigger_count.saturating_sub(1);
                entry.invalidate();
            }
        }
    }

    /// All triggers bound to the constraint called `name`.
    pub fn triggers_by_constraint(&self, name: &str) -> Result<Vec<Trigger>> {
        self.records
            .iter()
            .filter(|(_, r)| r.constraint_name == name)
            .map(|(id, r)| Trigger::from_record(*id, r))
            .collect()
    }
}
