//! # Database Builder
//!
//! `DatabaseBuilder` configures a [`Database`] with chained setters before
//! `build()` creates it.
//!
//! ## Configuration Options
//!
//! | Option                  | Default        | Description                               |
//! |-------------------------|----------------|-------------------------------------------|
//! | isolation               | ReadCommitted  | Isolation level of new transactions       |
//! | epq_free_frames         | 4              | Retired re-evaluation frames kept         |
//! | queue_disabled_triggers | false          | Queue AFTER events for disabled triggers  |
//! | store                   | in-memory      | Row storage backend                       |
//!
//! ## Usage Examples
//!
//! ```ignore
//! let db = Database::builder()
//!     .isolation(IsolationLevel::Serializable)
//!     .epq_free_frames(8)
//!     .build();
//! ```
//!
//! A custom store must be built on the transaction manager it is given:
//!
//! ```ignore
//! let db = Database::builder()
//!     .store(|txns| Arc::new(MemoryStore::new(txns)))
//!     .build();
//! ```

use super::Database;
use crate::config::EngineConfig;
use crate::mvcc::{IsolationLevel, TransactionManager};
use crate::storage::{MemoryStore, RowStore};
use crate::trigger::{FunctionRegistry, TriggerCatalog};
use parking_lot::RwLock;
use std::sync::Arc;

type StoreFactory = Box<dyn FnOnce(Arc<TransactionManager>) -> Arc<dyn RowStore>>;

pub struct DatabaseBuilder {
    config: EngineConfig,
    store: Option<StoreFactory>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.config = self.config.isolation(level);
        self
    }

    pub fn epq_free_frames(mut self, frames: usize) -> Self {
        self.config = self.config.epq_free_frames(frames);
        self
    }

    pub fn queue_disabled_triggers(mut self, enabled: bool) -> Self {
        self.config = self.config.queue_disabled_triggers(enabled);
        self
    }

    pub fn store<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<TransactionManager>) -> Arc<dyn RowStore> + 'static,
    {
        self.store = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> Arc<Database> {
        let txns = Arc::new(TransactionManager::new());
        let store: Arc<dyn RowStore> = match self.store {
            Some(factory) => factory(Arc::clone(&txns)),
            None => Arc::new(MemoryStore::new(Arc::clone(&txns))),
        };
        tracing::debug!(config = ?self.config, "database built");
        Arc::new(Database {
            config: self.config,
            txns,
            store,
            catalog: RwLock::new(TriggerCatalog::new()),
            functions: FunctionRegistry::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_settings() {
        let db = DatabaseBuilder::new()
            .isolation(IsolationLevel::Serializable)
            .epq_free_frames(2)
            .queue_disabled_triggers(true)
            .build();
        assert_eq!(db.config().isolation, IsolationLevel::Serializable);
        assert_eq!(db.config().epq_free_frames, 2);
        assert!(db.config().queue_disabled_triggers);
    }

    #[test]
    fn custom_store_shares_transaction_manager() {
        let db = Database::builder()
            .store(|txns| Arc::new(MemoryStore::new(txns)))
            .build();
        let rel = db.create_relation("t", &["a"]).unwrap();
        db.load(rel, crate::row![1]).unwrap();
        let xid = db.transactions().begin();
        let rows = db.store().scan(rel, &db.transactions().snapshot(xid)).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
