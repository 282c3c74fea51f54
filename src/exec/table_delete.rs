//! Delete operator (spec.md section 4.8 `TableDelete`): scans its own
//! target table directly (no child), erasing rows matching a predicate
//! and pulling them out of every secondary index. Not rewindable in any
//! sense — see `crate::exec`'s module doc.

use crate::common::datum::{Datum, DatumRef};
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;
use crate::storage::heap_table::TableHandle;

use super::{fatal_not_rewindable, table_insert::IndexBinding, Operator, Position};

pub struct TableDelete {
    table: TableHandle,
    table_schema: Schema,
    indexes: Vec<IndexBinding>,
    predicate: Expr,
    count: i64,
    done: bool,
    result: Option<Vec<Datum>>,
    initialized: bool,
}

impl TableDelete {
    pub fn new(table: TableHandle, table_schema: Schema, indexes: Vec<IndexBinding>, predicate: Expr) -> Self {
        TableDelete {
            table,
            table_schema,
            indexes,
            predicate,
            count: 0,
            done: false,
            result: None,
            initialized: false,
        }
    }
}

impl Operator for TableDelete {
    fn init(&mut self) -> DbResult<()> {
        self.count = 0;
        self.done = false;
        self.result = None;
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

        let mut iter = self.table.start_scan()?;
        let mut matched = Vec::new();
        while let Some((rid, bytes)) = iter.next()? {
            let tuple = self.table_schema.dissemble_payload(&bytes);
            let refs: Vec<DatumRef> = tuple.iter().map(|d| d.as_ref()).collect();
            if self.predicate.eval(&refs).as_bool().unwrap_or(false) {
                matched.push((rid, tuple));
            }
        }

        for (rid, tuple) in matched {
            for binding in &self.indexes {
                let key: Vec<Datum> = binding.key_fields.iter().map(|&f| tuple[f].clone()).collect();
                binding.index.delete(&key, rid)?;
            }
            self.table.erase_record(rid)?;
            self.count += 1;
        }

        self.result = Some(vec![Datum::from_i64(self.count)]);
        self.done = true;
        Ok(true)
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.result
            .as_deref()
            .ok_or_else(|| DbError::precondition("get_record before next_tuple returned true"))
    }

    fn close(&mut self) -> DbResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        Err(fatal_not_rewindable("TableDelete"))
    }

    fn save_position(&self) -> DbResult<Position> {
        Err(fatal_not_rewindable("TableDelete"))
    }

    fn rewind_to(&mut self, _pos: &Position) -> DbResult<bool> {
        Err(fatal_not_rewindable("TableDelete"))
    }
}
