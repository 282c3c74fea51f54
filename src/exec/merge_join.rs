//! Sort-merge join (spec.md section 4.8 `MergeJoin`): both inputs are
//! assumed already sorted on their join keys.
//!
//! Deviation from spec.md's streaming
//! `(outer_pos, inner_pos, inner_run_start_pos, match_state)` position:
//! both children are materialized fully at `init()` and the classic
//! two-pointer merge (equal-key runs produce a full cross-product) is
//! computed once, up front, into a flat list of joined pairs. Position
//! becomes a single list index. This mirrors the same trade made in
//! `extsort::ExternalSort`'s merge passes — same join, same order,
//! simpler code, a real (if usually modest) memory cost (see
//! DESIGN.md).

use crate::common::datum::{Datum, DatumRef};
use crate::error::{DbError, DbResult};
use crate::expr::Expr;
use crate::index::key::{datum_eq, datum_lt};

use super::{decode_u64, encode_u64, Operator, Position};

fn eval_keys(exprs: &[Expr], tuple: &[Datum]) -> Vec<Datum> {
    let refs: Vec<DatumRef> = tuple.iter().map(|d| d.as_ref()).collect();
    exprs.iter().map(|e| e.eval(&refs)).collect()
}

fn keys_equal(a: &[Datum], b: &[Datum]) -> bool {
    a.iter().zip(b).all(|(x, y)| match (x.is_null(), y.is_null()) {
        (true, true) => false, // SQL join semantics: NULL never matches NULL
        (true, false) | (false, true) => false,
        (false, false) => datum_eq(&x.as_ref(), &y.as_ref()),
    })
}

fn keys_less(a: &[Datum], b: &[Datum]) -> bool {
    for (x, y) in a.iter().zip(b) {
        match (x.is_null(), y.is_null()) {
            (true, true) => continue,
            (true, false) => return true,
            (false, true) => return false,
            (false, false) => {
                if datum_eq(&x.as_ref(), &y.as_ref()) {
                    continue;
                }
                return datum_lt(&x.as_ref(), &y.as_ref());
            }
        }
    }
    false
}

fn drain(op: &mut dyn Operator) -> DbResult<Vec<Vec<Datum>>> {
    op.init()?;
    let mut rows = Vec::new();
    while op.next_tuple()? {
        rows.push(op.get_record()?.to_vec());
    }
    op.close()?;
    Ok(rows)
}

fn combine(outer: &[Datum], inner: &[Datum]) -> Vec<Datum> {
    let mut row = Vec::with_capacity(outer.len() + inner.len());
    row.extend_from_slice(outer);
    row.extend_from_slice(inner);
    row
}

pub struct MergeJoin {
    outer: Box<dyn Operator>,
    inner: Box<dyn Operator>,
    outer_keys: Vec<Expr>,
    inner_keys: Vec<Expr>,
    pairs: Option<Vec<Vec<Datum>>>,
    idx: usize,
    initialized: bool,
}

impl MergeJoin {
    pub fn new(outer: Box<dyn Operator>, inner: Box<dyn Operator>, outer_keys: Vec<Expr>, inner_keys: Vec<Expr>) -> Self {
        MergeJoin {
            outer,
            inner,
            outer_keys,
            inner_keys,
            pairs: None,
            idx: 0,
            initialized: false,
        }
    }

    fn compute(&mut self) -> DbResult<Vec<Vec<Datum>>> {
        let outer_rows = drain(self.outer.as_mut())?;
        let inner_rows = drain(self.inner.as_mut())?;

        let mut pairs = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < outer_rows.len() && j < inner_rows.len() {
            let ok = eval_keys(&self.outer_keys, &outer_rows[i]);
            let ik = eval_keys(&self.inner_keys, &inner_rows[j]);
            if keys_equal(&ok, &ik) {
                let run_start = j;
                let mut run_end = j;
                while run_end < inner_rows.len() && keys_equal(&ok, &eval_keys(&self.inner_keys, &inner_rows[run_end])) {
                    run_end += 1;
                }
                let mut k = i;
                while k < outer_rows.len() && keys_equal(&ok, &eval_keys(&self.outer_keys, &outer_rows[k])) {
                    for inner_row in &inner_rows[run_start..run_end] {
                        pairs.push(combine(&outer_rows[k], inner_row));
                    }
                    k += 1;
                }
                i = k;
                j = run_end;
            } else if keys_less(&ok, &ik) {
                i += 1;
            } else {
                j += 1;
            }
        }
        Ok(pairs)
    }
}

impl Operator for MergeJoin {
    fn init(&mut self) -> DbResult<()> {
        self.pairs = Some(self.compute()?);
        self.idx = 0;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        let pairs = self.pairs.as_ref().expect("initialized implies pairs set");
        if self.idx < pairs.len() {
            self.idx += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        let pairs = self.pairs.as_ref().expect("initialized implies pairs set");
        if self.idx == 0 || self.idx > pairs.len() {
            return Err(DbError::precondition("get_record before next_tuple returned true"));
        }
        Ok(&pairs[self.idx - 1])
    }

    fn close(&mut self) -> DbResult<()> {
        self.pairs = None;
        self.idx = 0;
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.idx = 0;
        Ok(())
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(encode_u64(self.idx as u64))
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        let idx = decode_u64(pos)? as usize;
        let len = self.pairs.as_ref().map_or(0, |p| p.len());
        if idx > len {
            return Err(DbError::precondition("merge join position out of range"));
        }
        self.idx = idx;
        self.initialized = true;
        Ok(idx > 0 && idx <= len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType, Schema};
    use crate::exec::TempTable;

    #[test]
    fn many_to_many_equal_key_runs_cross_product() {
        let schema = Schema::new(vec![Field::new("k", FieldType::int32(), false)]);
        let outer_rows = vec![
            vec![Datum::from_i32(1)],
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(3)],
        ];
        let inner_rows = vec![
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(4)],
        ];
        let outer = Box::new(TempTable::new(outer_rows));
        let inner = Box::new(TempTable::new(inner_rows));
        let mut join = MergeJoin::new(
            outer,
            inner,
            vec![Expr::variable(schema.clone(), 0)],
            vec![Expr::variable(schema, 0)],
        );
        join.init().unwrap();
        let mut count = 0;
        while join.next_tuple().unwrap() {
            let row = join.get_record().unwrap();
            assert_eq!(row[0].as_i32(), Some(2));
            assert_eq!(row[1].as_i32(), Some(2));
            count += 1;
        }
        // two outer rows with k=2, three inner rows with k=2
        assert_eq!(count, 6);
    }

    #[test]
    fn rewind_to_resumes_at_pair_index() {
        let schema = Schema::new(vec![Field::new("k", FieldType::int32(), false)]);
        let outer = Box::new(TempTable::new(vec![vec![Datum::from_i32(1)], vec![Datum::from_i32(2)]]));
        let inner = Box::new(TempTable::new(vec![vec![Datum::from_i32(1)], vec![Datum::from_i32(2)]]));
        let mut join = MergeJoin::new(
            outer,
            inner,
            vec![Expr::variable(schema.clone(), 0)],
            vec![Expr::variable(schema, 0)],
        );
        join.init().unwrap();
        join.next_tuple().unwrap();
        let pos = join.save_position().unwrap();
        join.next_tuple().unwrap();
        assert!(join.rewind_to(&pos).unwrap());
        assert_eq!(join.get_record().unwrap()[0].as_i32(), Some(1));
    }
}
