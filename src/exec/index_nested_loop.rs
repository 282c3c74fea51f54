//! Index nested-loop join (spec.md section 4.8 `IndexNestedLoop`): for
//! each outer tuple, evaluates lower/upper bound expressions against it
//! and opens an index range scan over the inner table, emitting
//! outer x every inner match in index order.

use crate::common::datum::{Datum, DatumRef};
use crate::common::ids::PageNumber;
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;
use crate::index::{BTreeRangeIter, IndexHandle};
use crate::storage::heap_table::TableHandle;

use super::{decode_composite, decode_u64, encode_composite, encode_u64, Operator, Position};

fn eval_bounds(exprs: &[Expr], tuple: &[Datum]) -> Vec<Datum> {
    let refs: Vec<DatumRef> = tuple.iter().map(|d| d.as_ref()).collect();
    exprs.iter().map(|e| e.eval(&refs)).collect()
}

pub struct IndexNestedLoop {
    outer: Box<dyn Operator>,
    index: IndexHandle,
    inner_table: TableHandle,
    inner_schema: Schema,
    lower_exprs: Vec<Expr>,
    lower_strict: bool,
    upper_exprs: Option<Vec<Expr>>,
    upper_strict: bool,
    inner_iter: Option<BTreeRangeIter>,
    current: Option<Vec<Datum>>,
    last_outer_pos: Position,
    last_inner_pos: (PageNumber, usize),
    initialized: bool,
}

impl IndexNestedLoop {
    pub fn new(
        outer: Box<dyn Operator>,
        index: IndexHandle,
        inner_table: TableHandle,
        inner_schema: Schema,
        lower_exprs: Vec<Expr>,
        lower_strict: bool,
        upper_exprs: Option<Vec<Expr>>,
        upper_strict: bool,
    ) -> Self {
        IndexNestedLoop {
            outer,
            index,
            inner_table,
            inner_schema,
            lower_exprs,
            lower_strict,
            upper_exprs,
            upper_strict,
            inner_iter: None,
            current: None,
            last_outer_pos: Vec::new(),
            last_inner_pos: (0, 0),
            initialized: false,
        }
    }

    fn open_inner_for_current_outer(&self) -> DbResult<BTreeRangeIter> {
        let outer_tuple = self.outer.get_record()?;
        let lower = eval_bounds(&self.lower_exprs, outer_tuple);
        let upper = self.upper_exprs.as_ref().map(|e| eval_bounds(e, outer_tuple));
        self.index.range_scan(Some(lower), self.lower_strict, upper, self.upper_strict)
    }

    fn combine(&self, outer_tuple: &[Datum], inner_tuple: Vec<Datum>) -> Vec<Datum> {
        let mut row = Vec::with_capacity(outer_tuple.len() + inner_tuple.len());
        row.extend_from_slice(outer_tuple);
        row.extend(inner_tuple);
        row
    }

    /// Advances the inner iterator for the current outer tuple, opening
    /// a fresh one for each new outer tuple encountered; returns `false`
    /// only once the outer side itself is exhausted.
    fn advance(&mut self) -> DbResult<bool> {
        loop {
            if self.inner_iter.is_none() {
                if !self.outer.next_tuple()? {
                    return Ok(false);
                }
                self.last_outer_pos = self.outer.save_position()?;
                self.inner_iter = Some(self.open_inner_for_current_outer()?);
            }
            let iter = self.inner_iter.as_mut().unwrap();
            let pos_before = iter.save_position();
            match iter.next()? {
                Some((_key, rid)) => {
                    let bytes = self
                        .inner_table
                        .read_record(rid)?
                        .ok_or_else(|| DbError::fatal("index points at a missing heap record"))?;
                    let inner_tuple = self.inner_schema.dissemble_payload(&bytes);
                    let outer_tuple = self.outer.get_record()?.to_vec();
                    self.current = Some(self.combine(&outer_tuple, inner_tuple));
                    self.last_inner_pos = pos_before;
                    return Ok(true);
                }
                None => {
                    self.inner_iter = None;
                }
            }
        }
    }
}

impl Operator for IndexNestedLoop {
    fn init(&mut self) -> DbResult<()> {
        self.outer.init()?;
        self.inner_iter = None;
        self.current = None;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        if self.advance()? {
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.current
            .as_deref()
            .ok_or_else(|| DbError::precondition("get_record before next_tuple returned true"))
    }

    fn close(&mut self) -> DbResult<()> {
        self.inner_iter = None;
        self.current = None;
        self.initialized = false;
        self.outer.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        if self.current.is_none() {
            return Ok(encode_composite(&[self.last_outer_pos.clone(), vec![0]]));
        }
        let packed = ((self.last_inner_pos.0 as u64) << 32) | self.last_inner_pos.1 as u64;
        Ok(encode_composite(&[self.last_outer_pos.clone(), {
            let mut v = vec![1];
            v.extend_from_slice(&encode_u64(packed));
            v
        }]))
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        let parts = decode_composite(pos)?;
        if parts.len() != 2 || parts[1].is_empty() {
            return Err(DbError::precondition("malformed index nested loop position"));
        }
        if !self.outer.rewind_to(&parts[0])? {
            self.inner_iter = None;
            self.current = None;
            self.initialized = true;
            return Ok(false);
        }
        self.last_outer_pos = parts[0].clone();
        match parts[1][0] {
            0 => {
                self.inner_iter = None;
                self.current = None;
                self.initialized = true;
                Ok(false)
            }
            1 => {
                let packed = decode_u64(&parts[1][1..].to_vec())?;
                let pn = (packed >> 32) as PageNumber;
                let idx = (packed & 0xFFFF_FFFF) as usize;
                let mut iter = self.open_inner_for_current_outer()?;
                iter.rewind((pn, idx));
                let pos_before = iter.save_position();
                match iter.next()? {
                    Some((_key, rid)) => {
                        let bytes = self
                            .inner_table
                            .read_record(rid)?
                            .ok_or_else(|| DbError::fatal("index points at a missing heap record"))?;
                        let inner_tuple = self.inner_schema.dissemble_payload(&bytes);
                        let outer_tuple = self.outer.get_record()?.to_vec();
                        self.current = Some(self.combine(&outer_tuple, inner_tuple));
                        self.last_inner_pos = pos_before;
                        self.inner_iter = Some(iter);
                        self.initialized = true;
                        Ok(true)
                    }
                    None => Err(DbError::precondition("rewind position does not name a live record")),
                }
            }
            _ => Err(DbError::precondition("malformed index nested loop position tag")),
        }
    }
}
