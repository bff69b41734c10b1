//! # Trigger Layer Errors
//!
//! Every fallible operation in this crate returns `eyre::Result`. Failures
//! that callers need to tell apart are raised as a typed [`TriggerError`]
//! inside the report, so they can be recovered with
//! `report.downcast_ref::<TriggerError>()`.
//!
//! ## Classes
//!
//! | Class | Raised by | Effect |
//! |-------|-----------|--------|
//! | Configuration | `SET CONSTRAINTS` | surfaced, transaction continues |
//! | Consistency | deferred event recording | fatal to statement/transaction |
//! | Serialization | concurrent update under SERIALIZABLE | fatal, surfaced |
//! | Definition | `create_trigger` / `drop_trigger` | surfaced, DDL rejected |
//!
//! Errors raised by trigger functions are not wrapped: they propagate as the
//! opaque report the function produced.

use crate::types::{RelationId, TriggerId};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Consistency,
    Serialization,
    Definition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    UndefinedConstraint { name: String },
    NotDeferrable { name: String },
    UnnamedConstraint,
    TriggeredDataChange { relation: String },
    SerializationFailure { relation: String },
    DuplicateTrigger { name: String, relation: String },
    UndefinedTrigger { name: String, relation: String },
    UndefinedFunction { name: String },
    UndefinedRelation { id: RelationId },
    Unsupported { feature: &'static str },
    InvalidArguments { trigger: String, reason: String },
    MissingEventRow { trigger: TriggerId, relation: String },
}

impl TriggerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TriggerError::UndefinedConstraint { .. }
            | TriggerError::NotDeferrable { .. }
            | TriggerError::UnnamedConstraint => ErrorClass::Configuration,
            TriggerError::TriggeredDataChange { .. } | TriggerError::MissingEventRow { .. } => {
                ErrorClass::Consistency
            }
            TriggerError::SerializationFailure { .. } => ErrorClass::Serialization,
            TriggerError::DuplicateTrigger { .. }
            | TriggerError::UndefinedTrigger { .. }
            | TriggerError::UndefinedFunction { .. }
            | TriggerError::UndefinedRelation { .. }
            | TriggerError::Unsupported { .. }
            | TriggerError::InvalidArguments { .. } => ErrorClass::Definition,
        }
    }

    pub fn sqlstate(&self) -> &'static str {
        match self {
            TriggerError::UndefinedConstraint { .. } => "42704", // undefined_object
            TriggerError::NotDeferrable { .. } => "55000",       // object_not_in_prerequisite_state
            TriggerError::UnnamedConstraint => "42601",          // syntax_error
            TriggerError::TriggeredDataChange { .. } => "27000", // triggered_data_change_violation
            TriggerError::SerializationFailure { .. } => "40001",
            TriggerError::DuplicateTrigger { .. } => "42710", // duplicate_object
            TriggerError::UndefinedTrigger { .. } => "42704",
            TriggerError::UndefinedFunction { .. } => "42883",
            TriggerError::UndefinedRelation { .. } => "42P01",
            TriggerError::Unsupported { .. } => "0A000",
            TriggerError::InvalidArguments { .. } => "22023", // invalid_parameter_value
            TriggerError::MissingEventRow { .. } => "XX000",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Consistency | ErrorClass::Serialization
        )
    }
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerError::UndefinedConstraint { name } => {
                write!(f, "constraint '{}' does not exist", name)
            }
            TriggerError::NotDeferrable { name } => {
                write!(f, "constraint '{}' is not deferrable", name)
            }
            TriggerError::UnnamedConstraint => {
                write!(f, "unnamed constraints cannot be set explicitly")
            }
            TriggerError::TriggeredDataChange { relation } => {
                write!(f, "triggered data change violation on relation '{}'", relation)
            }
            TriggerError::SerializationFailure { relation } => write!(
                f,
                "could not serialize access due to concurrent update on relation '{}'",
                relation
            ),
            TriggerError::DuplicateTrigger { name, relation } => write!(
                f,
                "trigger '{}' for relation '{}' already exists",
                name, relation
            ),
            TriggerError::UndefinedTrigger { name, relation } => write!(
                f,
                "trigger '{}' for relation '{}' does not exist",
                name, relation
            ),
            TriggerError::UndefinedFunction { name } => {
                write!(f, "function '{}' does not exist", name)
            }
            TriggerError::UndefinedRelation { id } => {
                write!(f, "relation with id {} does not exist", id)
            }
            TriggerError::Unsupported { feature } => write!(f, "{} is not supported", feature),
            TriggerError::InvalidArguments { trigger, reason } => {
                write!(f, "invalid arguments for trigger '{}': {}", trigger, reason)
            }
            TriggerError::MissingEventRow { trigger, relation } => write!(
                f,
                "row for deferred trigger {} on relation '{}' could not be fetched",
                trigger, relation
            ),
        }
    }
}

impl std::error::Error for TriggerError {}

/// Returns the typed error carried by `report`, if any.
pub fn trigger_error(report: &eyre::Report) -> Option<&TriggerError> {
    report.downcast_ref::<TriggerError>()
}
