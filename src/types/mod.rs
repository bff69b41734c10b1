//! # Identifiers and Row Values
//!
//! Shared vocabulary for the trigger, deferred-queue and re-evaluation layers.
//!
//! ## Identifiers
//!
//! | Type | Purpose |
//! |------|---------|
//! | `RelationId` | Catalog identity of a table |
//! | `TriggerId` | Catalog identity of one trigger definition |
//! | `FunctionId` | Reference to a function known to the dispatcher |
//! | `RowId` | One physical row version (block, offset) |
//! | `RtIndex` | Position of a source table within a statement's range table |
//!
//! A `RowId` names a single *version* of a row. Updating a row produces a
//! new version with a new `RowId`; the superseded version keeps a forwarding
//! pointer to its successor so a writer that lost a race can follow the chain.
//!
//! ## Row Values
//!
//! `OwnedValue` is a heap-owned scalar and `Row` an ordered list of them.
//! Rows are always owned here: candidate rows are passed between trigger
//! invocations and may be replaced wholesale by any of them.

mod owned_value;

pub use owned_value::{OwnedValue, Row};

use std::fmt;

pub type RelationId = u32;
pub type TriggerId = u32;
pub type FunctionId = u32;

/// Physical identifier of one row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub block: u32,
    pub offset: u16,
}

impl RowId {
    pub const fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// Zero-based position in a statement's range table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RtIndex(pub usize);

impl RtIndex {
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for RtIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_orders_by_block_then_offset() {
        assert!(RowId::new(1, 9) < RowId::new(2, 0));
        assert!(RowId::new(2, 0) < RowId::new(2, 1));
    }

    #[test]
    fn row_id_display() {
        assert_eq!(RowId::new(3, 4).to_string(), "(3,4)");
    }
}
