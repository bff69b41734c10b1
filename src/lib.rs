//! # TurDB Triggers - Row Triggers, Deferred Constraints, Concurrent Updates
//!
//! The row-level consistency layer of a transactional storage engine:
//!
//! - **Firing engine**: BEFORE ROW triggers run around each INSERT, UPDATE
//!   and DELETE and may replace or suppress the row
//! - **Deferred queue**: AFTER ROW obligations are queued per transaction and
//!   fired at statement end or at commit, as `SET CONSTRAINTS` decides
//! - **Concurrent update resolver**: a write that finds its row changed by a
//!   transaction that committed after the statement's snapshot re-runs the
//!   statement's plan against the latest version
//!
//! ## Quick Start
//!
//! ```ignore
//! use turdb_triggers::{Database, ModifyTable, TriggerDef, TriggerOp, row};
//!
//! let db = Database::builder().build();
//! let orders = db.create_relation("orders", &["id", "customer"])?;
//! db.register_function("audit", Arc::new(Audit::default()));
//! db.create_trigger(
//!     TriggerDef::after("orders_audit", orders, "audit")
//!         .on(TriggerOp::Insert)
//!         .constraint("orders_audit", None)
//!         .deferrable(true, true),
//! )?;
//!
//! let mut session = db.session();
//! session.begin()?;
//! session.execute(ModifyTable::insert(orders, vec![row![1, 7]]))?;
//! session.commit()?; // orders_audit fires here
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Database / Session / Transaction │
//! ├─────────────────────────────────────┤
//! │     ModifyTable statement driver     │
//! ├──────────────┬──────────────────────┤
//! │ Firing engine│ Concurrent update     │
//! │  (trigger)   │ resolver (epq, plan)  │
//! ├──────────────┴──────────────────────┤
//! │   Deferred trigger queue (deferred)  │
//! ├─────────────────────────────────────┤
//! │   Row storage + MVCC (storage, mvcc) │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`trigger`]: trigger records, descriptors, catalog, function registry,
//!   RI roles, BEFORE ROW firing
//! - [`deferred`]: event queue, deferral status tables, `SET CONSTRAINTS`
//! - [`epq`]: re-evaluation frame stack for concurrently updated rows
//! - [`plan`]: restartable plan nodes the resolver re-runs
//! - [`executor`]: INSERT/UPDATE/DELETE driver
//! - [`database`]: engine handle, sessions, transactions
//! - [`mvcc`], [`storage`]: transaction bookkeeping and versioned rows
//! - [`config`], [`error`], [`types`]: shared infrastructure

pub mod config;
pub mod database;
pub mod deferred;
pub mod epq;
pub mod error;
pub mod executor;
pub mod mvcc;
pub mod plan;
pub mod storage;
pub mod trigger;
pub mod types;

pub use config::EngineConfig;
pub use database::{Database, DatabaseBuilder, Session, Transaction};
pub use deferred::{ConstraintTarget, DeferredQueue, DeferredStatus};
pub use epq::Resolver;
pub use error::{trigger_error, ErrorClass, TriggerError};
pub use executor::ModifyTable;
pub use mvcc::{IsolationLevel, Snapshot, TransactionManager, TxnId};
pub use storage::{MemoryStore, RowStore, StoredRow};
pub use trigger::{
    RelationMeta, RiAction, RiEvent, RiRole, Trigger, TriggerCall, TriggerDef, TriggerFunction,
    TriggerOp, TriggerOutcome, TriggerTiming,
};
pub use types::{OwnedValue, RelationId, Row, RowId, RtIndex, TriggerId};
