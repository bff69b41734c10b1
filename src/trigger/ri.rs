//! # Referential-Integrity Trigger Support
//!
//! Foreign keys are enforced by constraint triggers bound to RI functions.
//! This module holds what the trigger layer needs to know about them: the
//! role a function plays, the layout of the trigger's argument list and the
//! key comparison used to skip updates that leave the key untouched.
//!
//! ## Argument Layout
//!
//! ```text
//! args[0]  constraint name
//! args[1]  referencing (foreign key) relation name
//! args[2]  referenced (primary key) relation name
//! args[3]  match type: UNSPECIFIED | FULL | PARTIAL
//! args[4]  referencing column 1     args[5]  referenced column 1
//! args[6]  referencing column 2     args[7]  referenced column 2
//! ...
//! ```
//!
//! MATCH PARTIAL is not implemented and is rejected when the trigger is
//! created.

use super::definition::Trigger;
use crate::config::{RI_FIXED_ARGS, RI_MAX_KEY_PAIRS};
use crate::error::TriggerError;
use crate::trigger::catalog::RelationMeta;
use crate::types::Row;
use eyre::Result;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiAction {
    NoAction,
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiEvent {
    /// Referencing row inserted.
    CheckInsert,
    /// Referencing row updated.
    CheckUpdate,
    /// Referenced row updated.
    ReferencedUpdate,
    /// Referenced row deleted.
    ReferencedDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiRole {
    pub action: RiAction,
    pub event: RiEvent,
}

impl RiRole {
    pub const fn new(action: RiAction, event: RiEvent) -> Self {
        Self { action, event }
    }

    /// Referenced-side UPDATE triggers are compared on their key columns
    /// when the event is recorded.
    pub fn is_key_comparator(&self) -> bool {
        self.event == RiEvent::ReferencedUpdate
    }

    pub fn is_restrict(&self) -> bool {
        self.action == RiAction::Restrict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Unspecified,
    Full,
    Partial,
}

impl MatchType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "UNSPECIFIED" => Some(MatchType::Unspecified),
            "FULL" => Some(MatchType::Full),
            "PARTIAL" => Some(MatchType::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiArgs<'a> {
    pub constraint_name: &'a str,
    pub fk_relation: &'a str,
    pub pk_relation: &'a str,
    pub match_type: MatchType,
    /// (referencing column, referenced column)
    pub key_pairs: SmallVec<[(&'a str, &'a str); 4]>,
}

fn invalid(trigger: &str, reason: String) -> eyre::Report {
    TriggerError::InvalidArguments {
        trigger: trigger.to_string(),
        reason,
    }
    .into()
}

pub fn parse_args<'a>(trigger_name: &str, args: &'a [String]) -> Result<RiArgs<'a>> {
    if args.len() < RI_FIXED_ARGS + 2 || (args.len() - RI_FIXED_ARGS) % 2 != 0 {
        return Err(invalid(
            trigger_name,
            format!(
                "expected {} fixed arguments plus column pairs, got {}",
                RI_FIXED_ARGS,
                args.len()
            ),
        ));
    }
    let pairs = (args.len() - RI_FIXED_ARGS) / 2;
    if pairs > RI_MAX_KEY_PAIRS {
        return Err(invalid(
            trigger_name,
            format!("{} key columns exceed the limit of {}", pairs, RI_MAX_KEY_PAIRS),
        ));
    }
    let match_type = MatchType::parse(&args[3]).ok_or_else(|| {
        invalid(trigger_name, format!("unknown match type '{}'", args[3]))
    })?;
    if match_type == MatchType::Partial {
        return Err(TriggerError::Unsupported {
            feature: "MATCH PARTIAL",
        }
        .into());
    }
    let key_pairs = args[RI_FIXED_ARGS..]
        .chunks_exact(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect();
    Ok(RiArgs {
        constraint_name: &args[0],
        fk_relation: &args[1],
        pk_relation: &args[2],
        match_type,
        key_pairs,
    })
}

/// Compares the key columns of `old` and `new` on `relation`.
///
/// Columns are taken from the referenced side when `relation` is the
/// constraint's referenced relation and from the referencing side otherwise.
/// A NULL on either side counts as a change.
pub fn keys_equal(trigger: &Trigger, relation: &RelationMeta, old: &Row, new: &Row) -> Result<bool> {
    let args = parse_args(&trigger.name, &trigger.args)?;
    let referenced = relation.name == args.pk_relation;
    for (fk_col, pk_col) in &args.key_pairs {
        let column = if referenced { pk_col } else { fk_col };
        let idx = relation.column_index(column).ok_or_else(|| {
            invalid(
                &trigger.name,
                format!("column '{}' not found in relation '{}'", column, relation.name),
            )
        })?;
        let (Some(a), Some(b)) = (old.get(idx), new.get(idx)) else {
            eyre::bail!("row has no column {} for relation '{}'", idx, relation.name);
        };
        if old.is_null(idx) || new.is_null(idx) {
            return Ok(false);
        }
        if a.sql_eq(b) != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}
