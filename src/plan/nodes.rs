//! Plan nodes: `SeqScan`, `Values`, `Filter`, `Project`, `NestLoop`.

use super::{EpqInputs, ExecContext, PlanRow, QueryPlan};
use crate::storage::StoredRow;
use crate::types::{OwnedValue, RelationId, Row, RtIndex};
use eyre::Result;
use std::sync::Arc;

pub type Predicate = Arc<dyn Fn(&Row) -> Result<bool> + Send + Sync>;
pub type Projection = Arc<dyn Fn(&Row) -> Result<Row> + Send + Sync>;

/// `row[column] = value` under SQL equality (NULL never matches).
pub fn column_equals(column: usize, value: OwnedValue) -> Predicate {
    Arc::new(move |row: &Row| {
        Ok(row
            .get(column)
            .and_then(|v| v.sql_eq(&value))
            .unwrap_or(false))
    })
}

/// Sequential scan of one relation at one range-table position.
pub struct SeqScan {
    relation: RelationId,
    rti: RtIndex,
    rows: Option<Vec<StoredRow>>,
    pos: usize,
    substitute_returned: bool,
}

impl SeqScan {
    pub fn new(relation: RelationId, rti: RtIndex) -> Self {
        Self {
            relation,
            rti,
            rows: None,
            pos: 0,
            substitute_returned: false,
        }
    }
}

impl QueryPlan for SeqScan {
    fn next(&mut self, ctx: &ExecContext<'_>, epq: Option<&EpqInputs>) -> Result<Option<PlanRow>> {
        if let Some(sub) = epq.and_then(|inputs| inputs.get(self.rti)) {
            if self.substitute_returned {
                return Ok(None);
            }
            self.substitute_returned = true;
            return Ok(Some(PlanRow::from_source(self.rti, sub.clone())));
        }
        if self.rows.is_none() {
            self.rows = Some(ctx.store.scan(self.relation, ctx.snapshot)?);
        }
        let Some(stored) = self.rows.as_ref().and_then(|rows| rows.get(self.pos)) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(PlanRow::from_source(self.rti, stored.clone())))
    }

    fn rescan(&mut self) {
        self.pos = 0;
        self.substitute_returned = false;
    }

    fn box_clone(&self) -> Box<dyn QueryPlan> {
        Box::new(SeqScan::new(self.relation, self.rti))
    }
}

/// Literal rows, as produced by `INSERT ... VALUES`.
#[derive(Clone)]
pub struct Values {
    rows: Vec<Row>,
    pos: usize,
}

impl Values {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl QueryPlan for Values {
    fn next(&mut self, _ctx: &ExecContext<'_>, _epq: Option<&EpqInputs>) -> Result<Option<PlanRow>> {
        let Some(row) = self.rows.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(PlanRow::new(row.clone())))
    }

    fn rescan(&mut self) {
        self.pos = 0;
    }

    fn box_clone(&self) -> Box<dyn QueryPlan> {
        Box::new(Values::new(self.rows.clone()))
    }
}

pub struct Filter {
    input: Box<dyn QueryPlan>,
    predicate: Predicate,
}

impl Filter {
    pub fn new<F>(input: Box<dyn QueryPlan>, predicate: F) -> Self
    where
        F: Fn(&Row) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            input,
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_predicate(input: Box<dyn QueryPlan>, predicate: Predicate) -> Self {
        Self { input, predicate }
    }
}

impl QueryPlan for Filter {
    fn next(&mut self, ctx: &ExecContext<'_>, epq: Option<&EpqInputs>) -> Result<Option<PlanRow>> {
        while let Some(row) = self.input.next(ctx, epq)? {
            if (self.predicate)(&row.values)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn rescan(&mut self) {
        self.input.rescan();
    }

    fn box_clone(&self) -> Box<dyn QueryPlan> {
        Box::new(Filter::with_predicate(
            self.input.box_clone(),
            Arc::clone(&self.predicate),
        ))
    }

    fn slot_count(&self) -> usize {
        self.input.slot_count()
    }
}

/// Replaces a row's values; sources are kept.
pub struct Project {
    input: Box<dyn QueryPlan>,
    projection: Projection,
}

impl Project {
    pub fn new<F>(input: Box<dyn QueryPlan>, projection: F) -> Self
    where
        F: Fn(&Row) -> Result<Row> + Send + Sync + 'static,
    {
        Self {
            input,
            projection: Arc::new(projection),
        }
    }

    pub fn with_projection(input: Box<dyn QueryPlan>, projection: Projection) -> Self {
        Self { input, projection }
    }
}

impl QueryPlan for Project {
    fn next(&mut self, ctx: &ExecContext<'_>, epq: Option<&EpqInputs>) -> Result<Option<PlanRow>> {
        let Some(mut row) = self.input.next(ctx, epq)? else {
            return Ok(None);
        };
        row.values = (self.projection)(&row.values)?;
        Ok(Some(row))
    }

    fn rescan(&mut self) {
        self.input.rescan();
    }

    fn box_clone(&self) -> Box<dyn QueryPlan> {
        Box::new(Project::with_projection(
            self.input.box_clone(),
            Arc::clone(&self.projection),
        ))
    }

    fn slot_count(&self) -> usize {
        self.input.slot_count() + 1
    }
}

/// Nested-loop join: the inner plan is rescanned for every outer row.
/// Output values are outer columns followed by inner columns.
pub struct NestLoop {
    outer: Box<dyn QueryPlan>,
    inner: Box<dyn QueryPlan>,
    predicate: Option<Predicate>,
    current: Option<PlanRow>,
}

impl NestLoop {
    pub fn new(outer: Box<dyn QueryPlan>, inner: Box<dyn QueryPlan>) -> Self {
        Self {
            outer,
            inner,
            predicate: None,
            current: None,
        }
    }

    /// Join condition evaluated on the combined row.
    pub fn on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Row) -> Result<bool> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl QueryPlan for NestLoop {
    fn next(&mut self, ctx: &ExecContext<'_>, epq: Option<&EpqInputs>) -> Result<Option<PlanRow>> {
        loop {
            if self.current.is_none() {
                match self.outer.next(ctx, epq)? {
                    Some(row) => {
                        self.current = Some(row);
                        self.inner.rescan();
                    }
                    None => return Ok(None),
                }
            }
            let Some(inner) = self.inner.next(ctx, epq)? else {
                self.current = None;
                continue;
            };
            let Some(outer) = self.current.as_ref() else {
                continue;
            };
            let mut values = outer.values.values.clone();
            values.extend(inner.values.values);
            let mut joined = PlanRow::new(Row::new(values));
            joined.sources.extend(outer.sources.iter().cloned());
            joined.sources.extend(inner.sources);
            match &self.predicate {
                Some(predicate) if !predicate(&joined.values)? => continue,
                _ => return Ok(Some(joined)),
            }
        }
    }

    fn rescan(&mut self) {
        self.outer.rescan();
        self.inner.rescan();
        self.current = None;
    }

    fn box_clone(&self) -> Box<dyn QueryPlan> {
        Box::new(NestLoop {
            outer: self.outer.box_clone(),
            inner: self.inner.box_clone(),
            predicate: self.predicate.clone(),
            current: None,
        })
    }

    fn slot_count(&self) -> usize {
        self.outer.slot_count() + self.inner.slot_count() + 1
    }
}
