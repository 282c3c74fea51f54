//! Aggregation operator (spec.md section 4.8 `Aggregation`): whole-
//! relation aggregates, no grouping. Stands in for the spec's "three
//! catalog-looked-up functions per aggregate" (init/accumulate/finalize)
//! with inline match arms over a closed `AggregateKind` enum, the same
//! stand-in shape `expr::function::BuiltinCatalog` uses for scalar
//! functions.

use crate::common::datum::{Datum, DatumRef};
use crate::common::schema::FieldType;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;

use super::{Operator, Position};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

pub struct AggregateSpec {
    pub kind: AggregateKind,
    /// `None` only for `Count(*)`.
    pub input: Option<Expr>,
    pub return_type: FieldType,
}

enum AggState {
    Count(i64),
    Sum(i64),
    Avg { sum: i64, count: i64 },
    Min(Option<Datum>),
    Max(Option<Datum>),
}

impl AggState {
    fn new(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::Count => AggState::Count(0),
            AggregateKind::Sum => AggState::Sum(0),
            AggregateKind::Avg => AggState::Avg { sum: 0, count: 0 },
            AggregateKind::Min => AggState::Min(None),
            AggregateKind::Max => AggState::Max(None),
        }
    }

    fn accumulate(&mut self, value: &Datum) {
        if value.is_null() {
            return;
        }
        match self {
            AggState::Count(c) => *c += 1,
            AggState::Sum(s) => *s += value.as_i64().unwrap_or(0),
            AggState::Avg { sum, count } => {
                *sum += value.as_i64().unwrap_or(0);
                *count += 1;
            }
            AggState::Min(cur) => {
                if cur.as_ref().map_or(true, |c| datum_lt_owned(value, c)) {
                    *cur = Some(value.clone());
                }
            }
            AggState::Max(cur) => {
                if cur.as_ref().map_or(true, |c| datum_lt_owned(c, value)) {
                    *cur = Some(value.clone());
                }
            }
        }
    }

    fn finalize(&self) -> Datum {
        match self {
            AggState::Count(c) => Datum::from_i64(*c),
            AggState::Sum(s) => Datum::from_i64(*s),
            AggState::Avg { sum, count } => {
                if *count == 0 {
                    Datum::Null
                } else {
                    Datum::from_i64(sum / count)
                }
            }
            AggState::Min(v) => v.clone().unwrap_or(Datum::Null),
            AggState::Max(v) => v.clone().unwrap_or(Datum::Null),
        }
    }
}

fn datum_lt_owned(a: &Datum, b: &Datum) -> bool {
    crate::index::key::datum_lt(&a.as_ref(), &b.as_ref())
}

fn eval_row(exprs_input: &Option<Expr>, tuple: &[Datum]) -> Datum {
    match exprs_input {
        None => Datum::from_i64(1), // count(*) marker: never null, value unused
        Some(expr) => {
            let refs: Vec<DatumRef> = tuple.iter().map(|d| d.as_ref()).collect();
            expr.eval(&refs)
        }
    }
}

pub struct Aggregation {
    child: Box<dyn Operator>,
    specs: Vec<AggregateSpec>,
    result: Option<Vec<Datum>>,
    done: bool,
    initialized: bool,
}

impl Aggregation {
    pub fn new(child: Box<dyn Operator>, specs: Vec<AggregateSpec>) -> Self {
        Aggregation {
            child,
            specs,
            result: None,
            done: false,
            initialized: false,
        }
    }

    fn run(&mut self) -> DbResult<Vec<Datum>> {
        self.child.init()?;
        let mut states: Vec<AggState> = self.specs.iter().map(|s| AggState::new(s.kind)).collect();
        while self.child.next_tuple()? {
            let tuple = self.child.get_record()?;
            for (spec, state) in self.specs.iter().zip(states.iter_mut()) {
                state.accumulate(&eval_row(&spec.input, tuple));
            }
        }
        self.child.close()?;
        Ok(states.iter().map(|s| s.finalize()).collect())
    }
}

impl Operator for Aggregation {
    fn init(&mut self) -> DbResult<()> {
        self.result = None;
        self.done = false;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        if self.done {
            return Ok(false);
        }
        if self.result.is_none() {
            let computed = self.run()?;
            self.result = Some(computed);
            Ok(true)
        } else {
            self.done = true;
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.result
            .as_deref()
            .ok_or_else(|| DbError::precondition("get_record before next_tuple returned true"))
    }

    fn close(&mut self) -> DbResult<()> {
        self.result = None;
        self.done = false;
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(vec![if self.done { 1 } else { 0 }])
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        if pos.len() != 1 {
            return Err(DbError::precondition("malformed aggregation position"));
        }
        match pos[0] {
            0 => {
                let computed = self.run()?;
                self.result = Some(computed);
                self.done = false;
                self.initialized = true;
                Ok(true)
            }
            1 => {
                self.result = None;
                self.done = true;
                self.initialized = true;
                Ok(false)
            }
            _ => Err(DbError::precondition("malformed aggregation position tag")),
        }
    }
}
