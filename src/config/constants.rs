//! # Trigger Layer Configuration Constants
//!
//! Numeric limits and inline capacities for the trigger registry, the deferred
//! trigger queue and the concurrent-update resolver. Interdependent values are
//! co-located and checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! INLINE_ITEMS_PER_EVENT (4)
//!       │
//!       └─> SmallVec capacity of DeferredEvent::items. Most relations carry
//!           one or two RI triggers per operation; larger sets spill to heap.
//!
//! DEFAULT_EPQ_FREE_FRAMES (4)
//!       │
//!       └─> MAX_EPQ_FREE_FRAMES (must be >=)
//!             Retired re-evaluation frames kept for reuse within a statement.
//!
//! DEFAULT_SLOT_TABLE_SIZE (8)
//!       │
//!       └─> Initial private row-slot table size for a re-evaluation frame when
//!           the statement does not declare its own slot count.
//! ```

// ============================================================================
// DEFERRED QUEUE
// ============================================================================

/// Inline capacity for per-event trigger items before spilling to the heap.
pub const INLINE_ITEMS_PER_EVENT: usize = 4;

/// Initial capacity reserved for a transaction's event list.
pub const DEFAULT_EVENT_LIST_CAPACITY: usize = 64;

// ============================================================================
// CONCURRENT UPDATE RESOLVER
// ============================================================================

/// Retired frames kept on the free-list by default.
pub const DEFAULT_EPQ_FREE_FRAMES: usize = 4;

/// Upper bound accepted by `EngineConfig::epq_free_frames`.
pub const MAX_EPQ_FREE_FRAMES: usize = 64;

/// Private slot-table size when a statement does not specify one.
pub const DEFAULT_SLOT_TABLE_SIZE: usize = 8;

/// Inline capacity for per-range-table-position arrays.
pub const INLINE_RANGE_TABLE: usize = 4;

const _: () = assert!(
    DEFAULT_EPQ_FREE_FRAMES <= MAX_EPQ_FREE_FRAMES,
    "DEFAULT_EPQ_FREE_FRAMES must not exceed MAX_EPQ_FREE_FRAMES"
);

const _: () = assert!(
    INLINE_ITEMS_PER_EVENT > 0,
    "INLINE_ITEMS_PER_EVENT must be non-zero"
);

// ============================================================================
// TRIGGER DEFINITIONS
// ============================================================================

/// Leading arguments of a referential-integrity trigger: constraint name,
/// referencing relation, referenced relation, match type.
pub const RI_FIXED_ARGS: usize = 4;

/// Maximum number of key column pairs in one RI constraint.
pub const RI_MAX_KEY_PAIRS: usize = 16;
