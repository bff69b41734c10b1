//! # Deferral Status Tables
//!
//! Whether a deferrable trigger fires at the end of the statement or at the
//! end of the transaction is decided by a [`DeferredStatus`] table. Two
//! scopes exist:
//!
//! ```text
//! Session defaults   changed by SET CONSTRAINTS outside a transaction
//!      │             block; persist across transactions
//!      │ copied at transaction start
//!      v
//! Transaction table  changed by SET CONSTRAINTS inside a transaction
//!                    block; discarded when the transaction ends
//! ```
//!
//! ## Resolution Order
//!
//! 1. Not deferrable: immediate, no table is consulted.
//! 2. Per-trigger entry in the transaction table.
//! 3. Transaction-wide ALL setting (never memoized per trigger).
//! 4. The trigger's INITIALLY DEFERRED flag, memoized into the table.

use super::event::state;
use crate::error::TriggerError;
use crate::trigger::{FunctionRegistry, TriggerCatalog};
use crate::types::TriggerId;
use eyre::Result;
use hashbrown::HashMap;
use smallvec::SmallVec;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredStatus {
    all: Option<bool>,
    per_trigger: HashMap<TriggerId, bool>,
}

impl DeferredStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Option<bool> {
        self.all
    }

    pub fn get(&self, trigger: TriggerId) -> Option<bool> {
        self.per_trigger.get(&trigger).copied()
    }

    pub fn len(&self) -> usize {
        self.per_trigger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_trigger.is_empty() && self.all.is_none()
    }

    /// Drops every per-trigger entry and installs a blanket setting.
    pub fn set_all(&mut self, deferred: bool) {
        self.per_trigger.clear();
        self.all = Some(deferred);
    }

    pub fn set_trigger(&mut self, trigger: TriggerId, deferred: bool) {
        self.per_trigger.insert(trigger, deferred);
    }

    /// Resolves whether the item for `trigger` with static `item_state` is
    /// currently deferred.
    pub fn check_state(&mut self, trigger: TriggerId, item_state: u8) -> bool {
        if item_state & state::DEFERRABLE == 0 {
            return false;
        }
        if let Some(deferred) = self.per_trigger.get(&trigger) {
            return *deferred;
        }
        if let Some(deferred) = self.all {
            return deferred;
        }
        let deferred = item_state & state::INITDEFERRED != 0;
        self.per_trigger.insert(trigger, deferred);
        deferred
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintTarget {
    All,
    Named(Vec<String>),
}

impl ConstraintTarget {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConstraintTarget::Named(names.into_iter().map(Into::into).collect())
    }
}

/// Resolves constraint names to the ids of the triggers implementing them.
///
/// Fails before touching any table: an empty name, an unknown name, or a
/// request to defer a non-deferrable trigger rejects the whole request.
/// RESTRICT-action RI triggers are exempt from the deferrability check.
pub fn resolve_constraint_triggers(
    names: &[String],
    deferred: bool,
    catalog: &TriggerCatalog,
    functions: &FunctionRegistry,
) -> Result<SmallVec<[TriggerId; 8]>> {
    let mut ids = SmallVec::new();
    for name in names {
        if name.is_empty() {
            return Err(TriggerError::UnnamedConstraint.into());
        }
        let triggers = catalog.triggers_by_constraint(name)?;
        if triggers.is_empty() {
            return Err(TriggerError::UndefinedConstraint { name: name.clone() }.into());
        }
        for trigger in triggers {
            let restrict = functions
                .ri_role(trigger.function)
                .is_some_and(|role| role.is_restrict());
            if deferred && !trigger.deferrable && !restrict {
                return Err(TriggerError::NotDeferrable { name: name.clone() }.into());
            }
            ids.push(trigger.id);
        }
    }
    Ok(ids)
}

/// Applies `SET CONSTRAINTS` to `status`.
pub fn apply_set_constraints(
    status: &mut DeferredStatus,
    target: &ConstraintTarget,
    deferred: bool,
    catalog: &TriggerCatalog,
    functions: &FunctionRegistry,
) -> Result<()> {
    match target {
        ConstraintTarget::All => {
            status.set_all(deferred);
            tracing::debug!(deferred, "SET CONSTRAINTS ALL");
        }
        ConstraintTarget::Named(names) => {
            let ids = resolve_constraint_triggers(names, deferred, catalog, functions)?;
            for id in &ids {
                status.set_trigger(*id, deferred);
            }
            tracing::debug!(?names, triggers = ids.len(), deferred, "SET CONSTRAINTS");
        }
    }
    Ok(())
}
