//! # Deferred Queue Benchmarks
//!
//! Measures the cost of recording AFTER ROW events and firing them, with the
//! trigger immediate (fires at each statement end) and deferred (fires once at
//! commit), plus the key comparison done for referenced-key UPDATE triggers.
//!
//! ## Benchmark Parameters
//!
//! | Benchmark          | Rows per transaction | Trigger                    |
//! |--------------------|----------------------|----------------------------|
//! | insert/immediate   | 1,000                | AFTER INSERT, immediate    |
//! | insert/deferred    | 1,000                | AFTER INSERT, deferred     |
//! | update/key_compare | 1,000                | AFTER UPDATE, RI role      |
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench --bench deferred_queue
//! cargo bench --bench deferred_queue -- insert
//! ```

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use eyre::Result;
use std::sync::Arc;
use turdb_triggers::plan::{Project, SeqScan};
use turdb_triggers::{
    row, ConstraintTarget, Database, ModifyTable, OwnedValue, RelationId, RiAction, RiEvent,
    RiRole, Row, RtIndex, TriggerCall, TriggerDef, TriggerFunction, TriggerOp, TriggerOutcome,
};

const ROWS: u64 = 1_000;

struct Noop {
    role: Option<RiRole>,
}

impl TriggerFunction for Noop {
    fn invoke(&self, call: &TriggerCall<'_>) -> Result<TriggerOutcome> {
        black_box(call.new_row);
        Ok(TriggerOutcome::Unchanged)
    }

    fn ri_role(&self) -> Option<RiRole> {
        self.role
    }
}

fn setup() -> (Arc<Database>, RelationId, RelationId) {
    let db = Database::builder().build();
    db.register_function("noop", Arc::new(Noop { role: None }));
    db.register_function(
        "ri_upd",
        Arc::new(Noop {
            role: Some(RiRole::new(RiAction::NoAction, RiEvent::ReferencedUpdate)),
        }),
    );
    let parents = db.create_relation("parents", &["id", "label"]).unwrap();
    let children = db.create_relation("children", &["id", "pid"]).unwrap();
    db.create_trigger(
        TriggerDef::after("children_check", children, "noop")
            .on(TriggerOp::Insert)
            .constraint("children_check", None)
            .deferrable(true, false),
    )
    .unwrap();
    db.create_trigger(
        TriggerDef::after("parents_key", parents, "ri_upd")
            .on(TriggerOp::Update)
            .constraint("fk_children", Some(children))
            .deferrable(true, false)
            .args(["fk_children", "children", "parents", "UNSPECIFIED", "pid", "id"]),
    )
    .unwrap();
    for id in 0..ROWS as i64 {
        db.load(parents, row![id, "p"]).unwrap();
    }
    (db, parents, children)
}

fn child_rows() -> Vec<Row> {
    (0..ROWS as i64).map(|id| row![id, id]).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(ROWS));

    for deferred in [false, true] {
        let name = if deferred { "deferred" } else { "immediate" };
        group.bench_function(BenchmarkId::new("after_row", name), |b| {
            b.iter_batched(
                || {
                    let (db, _, children) = setup();
                    (db, children, child_rows())
                },
                |(db, children, rows)| {
                    let mut session = db.session();
                    session.begin().unwrap();
                    session
                        .set_constraints(ConstraintTarget::All, deferred)
                        .unwrap();
                    for row in rows {
                        session
                            .execute(ModifyTable::insert(children, vec![row]))
                            .unwrap();
                    }
                    session.commit().unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

fn bench_key_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    group.throughput(Throughput::Elements(ROWS));

    group.bench_function(BenchmarkId::new("key_compare", "unchanged"), |b| {
        b.iter_batched(
            setup,
            |(db, parents, _)| {
                let plan = Project::new(Box::new(SeqScan::new(parents, RtIndex(0))), |r: &Row| {
                    Ok(Row::new(vec![
                        r.values[0].clone(),
                        OwnedValue::Text("q".into()),
                    ]))
                });
                let mut session = db.session();
                let n = session
                    .execute(ModifyTable::update(&[parents], RtIndex(0), Box::new(plan)))
                    .unwrap();
                black_box(n);
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_key_compare);
criterion_main!(benches);
