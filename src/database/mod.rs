//! # Database Module
//!
//! The [`Database`] owns everything the trigger layer needs and is shared by
//! every [`Session`]:
//!
//! - `TransactionManager`: transaction ids, outcomes, snapshots, waits
//! - `RowStore`: versioned row storage (the in-memory store by default)
//! - `TriggerCatalog`: relations, trigger records, cached descriptors
//! - `FunctionRegistry`: trigger bodies addressable by name
//!
//! ## Statement Pipeline
//!
//! ```text
//! Session::execute(ModifyTable)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 1. TRANSACTION: join the open block, or autocommit  │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 2. SNAPSHOT: per statement (READ COMMITTED) or per  │
//! │    transaction (SERIALIZABLE)                       │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 3. EXECUTE: BEFORE triggers, writes, conflict       │
//! │    resolution, AFTER events queued                  │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 4. END STATEMENT: fire immediate AFTER triggers     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! A statement error aborts the transaction it ran in. Commit fires every
//! remaining deferred trigger first; an error there aborts instead.
//!
//! ## Thread Safety
//!
//! `Database` is `Send + Sync` and is shared as `Arc<Database>`. The catalog
//! sits behind a `RwLock`; DDL takes it for writing, statements read it only
//! long enough to clone the relation's descriptor.
//!
//! ## Usage Example
//!
//! ```ignore
//! let db = Database::builder().build();
//! let orders = db.create_relation("orders", &["id", "customer"])?;
//! db.register_function("audit", Arc::new(Audit));
//! db.create_trigger(TriggerDef::after("orders_audit", orders, "audit").on(TriggerOp::Insert))?;
//!
//! let mut session = db.session();
//! session.begin()?;
//! session.execute(ModifyTable::insert(orders, vec![row![1, 7]]))?;
//! session.commit()?;
//! ```

pub mod builder;
pub mod session;
pub mod transaction;

pub use builder::DatabaseBuilder;
pub use session::Session;
pub use transaction::Transaction;

use crate::config::EngineConfig;
use crate::deferred::FireEnv;
use crate::executor::StatementEnv;
use crate::mvcc::{TransactionManager, BOOTSTRAP_TXN_ID};
use crate::storage::RowStore;
use crate::trigger::{FunctionRegistry, TriggerCatalog, TriggerDef, TriggerFunction};
use crate::types::{FunctionId, RelationId, Row, RowId, TriggerId};
use eyre::{eyre, Result};
use parking_lot::RwLock;
use std::sync::Arc;

pub struct Database {
    config: EngineConfig,
    txns: Arc<TransactionManager>,
    store: Arc<dyn RowStore>,
    catalog: RwLock<TriggerCatalog>,
    functions: FunctionRegistry,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    pub fn store(&self) -> &dyn RowStore {
        self.store.as_ref()
    }

    pub fn catalog(&self) -> &RwLock<TriggerCatalog> {
        &self.catalog
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    pub fn register_function(&self, name: &str, function: Arc<dyn TriggerFunction>) -> FunctionId {
        self.functions.register(name, function)
    }

    pub fn create_relation(&self, name: &str, columns: &[&str]) -> Result<RelationId> {
        let rel = self.catalog.write().create_relation(name, columns)?;
        self.store.create_relation(rel);
        tracing::debug!(relation = name, id = rel, "created relation");
        Ok(rel)
    }

    /// Drops the relation, its triggers, and constraint triggers elsewhere
    /// that reference it.
    pub fn drop_relation(&self, rel: RelationId) -> Result<()> {
        self.catalog.write().drop_relation(rel)?;
        self.store.drop_relation(rel);
        Ok(())
    }

    pub fn relation_id(&self, name: &str) -> Result<RelationId> {
        self.catalog
            .read()
            .relation_by_name(name)
            .map(|meta| meta.id)
            .ok_or_else(|| eyre!("relation '{}' does not exist", name))
    }

    pub fn create_trigger(&self, def: TriggerDef) -> Result<TriggerId> {
        self.catalog.write().create_trigger(def, &self.functions)
    }

    pub fn drop_trigger(&self, rel: RelationId, name: &str) -> Result<()> {
        self.catalog.write().drop_trigger(rel, name)
    }

    /// Stores `row` as already committed, bypassing triggers.
    pub fn load(&self, rel: RelationId, row: Row) -> Result<RowId> {
        self.store.insert(rel, BOOTSTRAP_TXN_ID, row)
    }

    pub(crate) fn fire_env(&self) -> FireEnv<'_> {
        FireEnv {
            catalog: &self.catalog,
            functions: &self.functions,
            store: self.store.as_ref(),
        }
    }

    pub(crate) fn statement_env(&self) -> StatementEnv<'_> {
        StatementEnv {
            store: self.store.as_ref(),
            catalog: &self.catalog,
            functions: &self.functions,
            config: &self.config,
        }
    }
}
