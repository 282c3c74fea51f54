//! In-memory materialized relation (spec.md section 4.8 `TempTable`),
//! produced by a planner step (e.g. a hash-build side) rather than read
//! from a table.

use std::rc::Rc;

use crate::common::datum::Datum;
use crate::error::{DbError, DbResult};

use super::{Operator, Position};

pub struct TempTable {
    rows: Rc<Vec<Vec<Datum>>>,
    /// -1 is "before first"; `rows.len()` is "after last".
    pos: i64,
    initialized: bool,
}

impl TempTable {
    pub fn new(rows: Vec<Vec<Datum>>) -> Self {
        TempTable {
            rows: Rc::new(rows),
            pos: -1,
            initialized: false,
        }
    }
}

impl Operator for TempTable {
    fn init(&mut self) -> DbResult<()> {
        self.pos = -1;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        if self.pos + 1 < self.rows.len() as i64 {
            self.pos += 1;
            Ok(true)
        } else {
            self.pos = self.rows.len() as i64;
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        if self.pos >= 0 && (self.pos as usize) < self.rows.len() {
            Ok(&self.rows[self.pos as usize])
        } else {
            Err(DbError::precondition("get_record before next_tuple returned true"))
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(self.pos.to_be_bytes().to_vec())
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        let arr: [u8; 8] = pos
            .as_slice()
            .try_into()
            .map_err(|_| DbError::precondition("malformed temp table position"))?;
        let v = i64::from_be_bytes(arr);
        self.pos = v;
        self.initialized = true;
        Ok(v >= 0 && (v as usize) < self.rows.len())
    }
}
