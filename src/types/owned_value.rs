//! # Heap-Owned Row Values
//!
//! `OwnedValue` is the scalar carried through trigger calls and plan
//! evaluation. Equality here is *storage* equality (NULL equals NULL); SQL
//! three-valued comparison lives in `sql_eq`, which is what key comparison and
//! plan filters use.

use eyre::{bail, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum OwnedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl OwnedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, OwnedValue::Null)
    }

    /// SQL equality: `None` when either side is NULL.
    pub fn sql_eq(&self, other: &OwnedValue) -> Option<bool> {
        match (self, other) {
            (OwnedValue::Null, _) | (_, OwnedValue::Null) => None,
            (OwnedValue::Int(a), OwnedValue::Float(b)) => Some((*a as f64) == *b),
            (OwnedValue::Float(a), OwnedValue::Int(b)) => Some(*a == (*b as f64)),
            (a, b) => Some(a == b),
        }
    }
}

impl fmt::Display for OwnedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnedValue::Null => write!(f, "NULL"),
            OwnedValue::Bool(b) => write!(f, "{}", b),
            OwnedValue::Int(i) => write!(f, "{}", i),
            OwnedValue::Float(v) => write!(f, "{}", v),
            OwnedValue::Text(s) => write!(f, "'{}'", s),
            OwnedValue::Blob(b) => write!(f, "\\x{}", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl From<i64> for OwnedValue {
    fn from(v: i64) -> Self {
        OwnedValue::Int(v)
    }
}

impl From<i32> for OwnedValue {
    fn from(v: i32) -> Self {
        OwnedValue::Int(v as i64)
    }
}

impl From<&str> for OwnedValue {
    fn from(v: &str) -> Self {
        OwnedValue::Text(v.to_string())
    }
}

impl From<bool> for OwnedValue {
    fn from(v: bool) -> Self {
        OwnedValue::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<OwnedValue>,
}

impl Row {
    pub fn new(values: Vec<OwnedValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&OwnedValue> {
        self.values.get(index)
    }

    pub fn get_int(&self, index: usize) -> Result<i64> {
        match self.get(index) {
            Some(OwnedValue::Int(i)) => Ok(*i),
            Some(other) => bail!("expected INT, got {:?}", other),
            None => bail!("column {} out of bounds", index),
        }
    }

    pub fn get_text(&self, index: usize) -> Result<&str> {
        match self.get(index) {
            Some(OwnedValue::Text(s)) => Ok(s),
            Some(other) => bail!("expected TEXT, got {:?}", other),
            None => bail!("column {} out of bounds", index),
        }
    }

    pub fn set(&mut self, index: usize, value: OwnedValue) -> Result<()> {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => bail!("column {} out of bounds", index),
        }
    }

    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).is_some_and(OwnedValue::is_null)
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }
}

/// Builds a `Row` from a list of expressions convertible to `OwnedValue`.
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        $crate::types::Row::new(vec![$($crate::types::OwnedValue::from($v)),*])
    };
}
