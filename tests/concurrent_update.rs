//! Concurrent update resolution between sessions on separate threads.
//!
//! Each test lets a writer session change a row and hold its transaction
//! open, starts a statement in a second session, then commits the writer.
//! The second statement waits on the writer, finds the row updated and
//! re-evaluates its plan against the committed version.

use eyre::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use turdb_triggers::plan::{column_equals, Filter, NestLoop, Project, SeqScan};
use turdb_triggers::{
    row, trigger_error, Database, IsolationLevel, ModifyTable, OwnedValue, RelationId, Row,
    RtIndex, Session, TriggerCall, TriggerDef, TriggerError, TriggerFunction, TriggerOp,
    TriggerOutcome,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Logs `timing old->new` using column 1 of each row.
struct BalanceLog {
    log: Log,
}

impl TriggerFunction for BalanceLog {
    fn invoke(&self, call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
        let old = match call.old_row {
            Some(row) => row.get_int(1)?,
            None => -1,
        };
        let new = match call.new_row {
            Some(row) => row.get_int(1)?,
            None => -1,
        };
        self.log
            .lock()
            .push(format!("{:?} {}->{}", call.timing, old, new));
        Ok(TriggerOutcome::Unchanged)
    }
}

struct Bank {
    db: Arc<Database>,
    accounts: RelationId,
    log: Log,
}

fn bank() -> Bank {
    let db = Database::builder().build();
    let log: Log = Arc::default();
    db.register_function("balance_log", Arc::new(BalanceLog { log: Arc::clone(&log) }));
    let accounts = db.create_relation("accounts", &["id", "balance"]).unwrap();
    db.load(accounts, row![1, 100]).unwrap();
    Bank { db, accounts, log }
}

fn credit(accounts: RelationId, id: i64, amount: i64) -> ModifyTable {
    let scan = Filter::with_predicate(
        Box::new(SeqScan::new(accounts, RtIndex(0))),
        column_equals(0, OwnedValue::Int(id)),
    );
    let plan = Project::new(Box::new(scan), move |row: &Row| {
        Ok(Row::new(vec![
            row.values[0].clone(),
            OwnedValue::Int(row.get_int(1)? + amount),
        ]))
    });
    ModifyTable::update(&[accounts], RtIndex(0), Box::new(plan))
}

fn renumber(accounts: RelationId, from: i64, to: i64) -> ModifyTable {
    let scan = Filter::with_predicate(
        Box::new(SeqScan::new(accounts, RtIndex(0))),
        column_equals(0, OwnedValue::Int(from)),
    );
    let plan = Project::new(Box::new(scan), move |row: &Row| {
        Ok(Row::new(vec![OwnedValue::Int(to), row.values[1].clone()]))
    });
    ModifyTable::update(&[accounts], RtIndex(0), Box::new(plan))
}

/// Runs `write` in a transaction on another thread and returns once it has
/// written; the transaction commits shortly afterwards.
fn concurrently<F>(db: &Arc<Database>, write: F) -> thread::JoinHandle<()>
where
    F: FnOnce(&mut Session) + Send + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let handle = {
        let db = Arc::clone(db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut session = db.session();
            session.begin().unwrap();
            write(&mut session);
            barrier.wait();
            thread::sleep(Duration::from_millis(100));
            session.commit().unwrap();
        })
    };
    barrier.wait();
    handle
}

fn balances(session: &mut Session, rel: RelationId) -> Vec<(i64, i64)> {
    let mut rows: Vec<(i64, i64)> = session
        .scan(rel)
        .unwrap()
        .iter()
        .map(|r| (r.get_int(0).unwrap(), r.get_int(1).unwrap()))
        .collect();
    rows.sort_unstable();
    rows
}

#[test]
fn matching_row_is_updated_from_the_committed_version() {
    let bank = bank();
    bank.db
        .create_trigger(
            TriggerDef::after("audit", bank.accounts, "balance_log").on(TriggerOp::Update),
        )
        .unwrap();
    let accounts = bank.accounts;
    let writer = concurrently(&bank.db, move |s| {
        assert_eq!(s.execute(credit(accounts, 1, 50)).unwrap(), 1);
    });

    let mut session = bank.db.session();
    assert_eq!(session.execute(credit(accounts, 1, 10)).unwrap(), 1);
    writer.join().unwrap();

    assert_eq!(balances(&mut session, accounts), vec![(1, 160)]);
    assert_eq!(*bank.log.lock(), vec!["After 100->150", "After 150->160"]);
}

#[test]
fn row_no_longer_matching_filter_is_skipped() {
    let bank = bank();
    let accounts = bank.accounts;
    let writer = concurrently(&bank.db, move |s| {
        s.execute(renumber(accounts, 1, 2)).unwrap();
    });

    let mut session = bank.db.session();
    assert_eq!(session.execute(credit(accounts, 1, 10)).unwrap(), 0);
    writer.join().unwrap();

    assert_eq!(balances(&mut session, accounts), vec![(2, 100)]);
}

#[test]
fn concurrently_deleted_row_is_skipped() {
    let bank = bank();
    let accounts = bank.accounts;
    let writer = concurrently(&bank.db, move |s| {
        let scan = SeqScan::new(accounts, RtIndex(0));
        s.execute(ModifyTable::delete(&[accounts], RtIndex(0), Box::new(scan)))
            .unwrap();
    });

    let mut session = bank.db.session();
    assert_eq!(session.execute(credit(accounts, 1, 10)).unwrap(), 0);
    writer.join().unwrap();
    assert!(balances(&mut session, accounts).is_empty());
}

#[test]
fn before_trigger_sees_the_resolved_row() {
    let bank = bank();
    bank.db
        .create_trigger(
            TriggerDef::before("check", bank.accounts, "balance_log").on(TriggerOp::Update),
        )
        .unwrap();
    let accounts = bank.accounts;
    let writer = concurrently(&bank.db, move |s| {
        s.execute(credit(accounts, 1, 50)).unwrap();
    });

    let mut session = bank.db.session();
    assert_eq!(session.execute(credit(accounts, 1, 10)).unwrap(), 1);
    writer.join().unwrap();

    assert_eq!(*bank.log.lock(), vec!["Before 100->150", "Before 150->160"]);
    assert_eq!(balances(&mut session, accounts), vec![(1, 160)]);
}

#[test]
fn aborted_writer_leaves_original_row_to_update() {
    let bank = bank();
    let accounts = bank.accounts;
    let barrier = Arc::new(Barrier::new(2));
    let writer = {
        let db = Arc::clone(&bank.db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut session = db.session();
            session.begin().unwrap();
            session.execute(credit(accounts, 1, 50)).unwrap();
            barrier.wait();
            thread::sleep(Duration::from_millis(100));
            session.rollback().unwrap();
        })
    };
    barrier.wait();

    let mut session = bank.db.session();
    assert_eq!(session.execute(credit(accounts, 1, 10)).unwrap(), 1);
    writer.join().unwrap();
    assert_eq!(balances(&mut session, accounts), vec![(1, 110)]);
}

#[test]
fn serializable_transaction_fails_instead_of_resolving() {
    let bank = bank();
    let accounts = bank.accounts;
    let mut serial = bank.db.session();
    serial.begin_with(IsolationLevel::Serializable).unwrap();

    let mut other = bank.db.session();
    other.execute(credit(accounts, 1, 50)).unwrap();

    let err = serial.execute(credit(accounts, 1, 10)).unwrap_err();
    assert!(matches!(
        trigger_error(&err),
        Some(TriggerError::SerializationFailure { .. })
    ));
    assert!(!serial.in_transaction());
    assert_eq!(balances(&mut other, accounts), vec![(1, 150)]);
}

struct Ledger {
    db: Arc<Database>,
    orders: RelationId,
    customers: RelationId,
}

fn ledger() -> Ledger {
    let db = Database::builder().build();
    let orders = db.create_relation("orders", &["id", "cid", "total"]).unwrap();
    let customers = db.create_relation("customers", &["id", "name"]).unwrap();
    db.load(orders, row![10, 1, 0]).unwrap();
    db.load(customers, row![1, "acme"]).unwrap();
    Ledger {
        db,
        orders,
        customers,
    }
}

/// UPDATE orders SET total = total + 1 FROM customers
/// WHERE orders.cid = customers.id FOR UPDATE OF customers
fn bump_orders_of_customers(ledger: &Ledger) -> ModifyTable {
    let join = NestLoop::new(
        Box::new(SeqScan::new(ledger.orders, RtIndex(0))),
        Box::new(SeqScan::new(ledger.customers, RtIndex(1))),
    )
    .on(|r| Ok(r.get(1) == r.get(3)));
    let plan = Project::new(Box::new(join), |r: &Row| {
        Ok(Row::new(vec![
            r.values[0].clone(),
            r.values[1].clone(),
            OwnedValue::Int(r.get_int(2)? + 1),
        ]))
    });
    ModifyTable::update(&[ledger.orders, ledger.customers], RtIndex(0), Box::new(plan))
        .lock_rows(RtIndex(1))
}

fn customer_update(customers: RelationId, to: Row) -> ModifyTable {
    let plan = Project::new(Box::new(SeqScan::new(customers, RtIndex(0))), move |_r: &Row| {
        Ok(to.clone())
    });
    ModifyTable::update(&[customers], RtIndex(0), Box::new(plan))
}

#[test]
fn locked_join_row_is_re_evaluated_and_still_matches() {
    let ledger = ledger();
    let customers = ledger.customers;
    let writer = concurrently(&ledger.db, move |s| {
        s.execute(customer_update(customers, row![1, "acme corp"]))
            .unwrap();
    });

    let mut session = ledger.db.session();
    assert_eq!(session.execute(bump_orders_of_customers(&ledger)).unwrap(), 1);
    writer.join().unwrap();

    let orders = session.scan(ledger.orders).unwrap();
    assert_eq!(orders[0].get_int(2).unwrap(), 1);
}

#[test]
fn locked_join_row_that_no_longer_joins_is_skipped() {
    let ledger = ledger();
    let customers = ledger.customers;
    let writer = concurrently(&ledger.db, move |s| {
        s.execute(customer_update(customers, row![2, "acme"])).unwrap();
    });

    let mut session = ledger.db.session();
    assert_eq!(session.execute(bump_orders_of_customers(&ledger)).unwrap(), 0);
    writer.join().unwrap();

    let orders = session.scan(ledger.orders).unwrap();
    assert_eq!(orders[0].get_int(2).unwrap(), 0);
}
