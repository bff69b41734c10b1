//! # Trigger Function Dispatch
//!
//! Trigger bodies are implementations of [`TriggerFunction`] registered by
//! name in a [`FunctionRegistry`]. A trigger definition binds to a function
//! by [`FunctionId`].
//!
//! ## Call Protocol
//!
//! ```text
//! BEFORE ROW  invoke(call) -> Unchanged        keep the current candidate
//!                          -> Replaced(row)    row becomes the candidate
//!                          -> Suppressed       abandon the mutation
//!
//! AFTER ROW   invoke(call) -> (ignored)        the mutation is already applied
//! ```
//!
//! Any `Err` returned by a function is propagated to the caller untouched.
//!
//! ## Referential-Integrity Functions
//!
//! A function may declare an [`RiRole`]. Functions whose role is a
//! referenced-side UPDATE action are key comparators: when the update leaves
//! the referenced key unchanged, the queued item is marked done at recording
//! time and never fires. The comparison is done by
//! [`TriggerFunction::keys_equal`], which by default reads the key columns
//! from the trigger's RI argument list.

use super::definition::{Trigger, TriggerOp, TriggerTiming};
use super::ri::{self, RiRole};
use crate::error::TriggerError;
use crate::trigger::catalog::RelationMeta;
use crate::types::{FunctionId, Row};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Unchanged,
    Replaced(Row),
    Suppressed,
}

/// Structured context handed to a trigger function.
#[derive(Debug, Clone, Copy)]
pub struct TriggerCall<'a> {
    pub op: TriggerOp,
    pub timing: TriggerTiming,
    pub relation: &'a RelationMeta,
    pub trigger: &'a Trigger,
    pub old_row: Option<&'a Row>,
    pub new_row: Option<&'a Row>,
}

impl<'a> TriggerCall<'a> {
    pub fn args(&self) -> &'a [String] {
        &self.trigger.args
    }

    /// The row the trigger acts upon: the new row for INSERT and UPDATE,
    /// the old row for DELETE.
    pub fn trigger_row(&self) -> Option<&'a Row> {
        match self.op {
            TriggerOp::Insert | TriggerOp::Update => self.new_row,
            TriggerOp::Delete => self.old_row,
        }
    }
}

pub trait TriggerFunction: Send + Sync {
    fn invoke(&self, call: &TriggerCall<'_>) -> Result<TriggerOutcome>;

    fn ri_role(&self) -> Option<RiRole> {
        None
    }

    /// Whether an UPDATE left the trigger's key columns unchanged.
    fn keys_equal(
        &self,
        trigger: &Trigger,
        relation: &RelationMeta,
        old: &Row,
        new: &Row,
    ) -> Result<bool> {
        ri::keys_equal(trigger, relation, old, new)
    }
}

struct Registered {
    name: String,
    function: Arc<dyn TriggerFunction>,
}

#[derive(Default)]
pub struct FunctionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    functions: Vec<Registered>,
    by_name: HashMap<String, FunctionId>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous binding of
    /// the name. Existing triggers keep pointing at the id they were
    /// created with.
    pub fn register(&self, name: &str, function: Arc<dyn TriggerFunction>) -> FunctionId {
        let mut inner = self.inner.write();
        let id = inner.functions.len() as FunctionId;
        inner.functions.push(Registered {
            name: name.to_string(),
            function,
        });
        inner.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn get(&self, id: FunctionId) -> Result<Arc<dyn TriggerFunction>> {
        let inner = self.inner.read();
        match inner.functions.get(id as usize) {
            Some(entry) => Ok(Arc::clone(&entry.function)),
            None => Err(TriggerError::UndefinedFunction {
                name: format!("#{}", id),
            }
            .into()),
        }
    }

    pub fn name(&self, id: FunctionId) -> Option<String> {
        self.inner
            .read()
            .functions
            .get(id as usize)
            .map(|entry| entry.name.clone())
    }

    pub fn ri_role(&self, id: FunctionId) -> Option<RiRole> {
        self.inner
            .read()
            .functions
            .get(id as usize)
            .and_then(|entry| entry.function.ri_role())
    }
}
