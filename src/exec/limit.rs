//! Limit operator (spec.md section 4.8 `Limit`): passes through at most
//! `n` child tuples.

use crate::common::datum::Datum;
use crate::error::{DbError, DbResult};

use super::{decode_composite, decode_u64, encode_composite, encode_u64, Operator, Position};

pub struct Limit {
    child: Box<dyn Operator>,
    n: usize,
    count: usize,
    initialized: bool,
}

impl Limit {
    pub fn new(child: Box<dyn Operator>, n: usize) -> Self {
        Limit {
            child,
            n,
            count: 0,
            initialized: false,
        }
    }
}

impl Operator for Limit {
    fn init(&mut self) -> DbResult<()> {
        self.child.init()?;
        self.count = 0;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        if self.count >= self.n {
            return Ok(false);
        }
        if self.child.next_tuple()? {
            self.count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.child.get_record()
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(encode_composite(&[encode_u64(self.count as u64), self.child.save_position()?]))
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        let parts = decode_composite(pos)?;
        if parts.len() != 2 {
            return Err(DbError::precondition("malformed limit position"));
        }
        let count = decode_u64(&parts[0])? as usize;
        if count > self.n {
            return Err(DbError::precondition("limit position exceeds the configured bound"));
        }
        let resumed = self.child.rewind_to(&parts[1])?;
        self.count = count;
        self.initialized = true;
        Ok(resumed)
    }
}
