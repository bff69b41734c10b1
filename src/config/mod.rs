//! # Trigger Layer Configuration
//!
//! Compile-time constants live in [`constants`]; runtime knobs live in
//! [`EngineConfig`], built with chained setters:
//!
//! ```ignore
//! let config = EngineConfig::default()
//!     .isolation(IsolationLevel::Serializable)
//!     .epq_free_frames(8);
//! ```
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | isolation | ReadCommitted | Isolation level for new transactions |
//! | epq_free_frames | 4 | Retired re-evaluation frames kept for reuse |
//! | queue_disabled_triggers | false | Queue AFTER events for disabled triggers |

pub mod constants;
pub use constants::*;

use crate::mvcc::IsolationLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub isolation: IsolationLevel,
    pub epq_free_frames: usize,
    pub queue_disabled_triggers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            epq_free_frames: DEFAULT_EPQ_FREE_FRAMES,
            queue_disabled_triggers: false,
        }
    }
}

impl EngineConfig {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Clamped to [`MAX_EPQ_FREE_FRAMES`].
    pub fn epq_free_frames(mut self, frames: usize) -> Self {
        self.epq_free_frames = frames.min(MAX_EPQ_FREE_FRAMES);
        self
    }

    pub fn queue_disabled_triggers(mut self, enabled: bool) -> Self {
        self.queue_disabled_triggers = enabled;
        self
    }
}
