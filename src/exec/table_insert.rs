//! Insert operator (spec.md section 4.8 `TableInsert`): writes every
//! child tuple into a table and keeps its secondary indexes current.
//! Not rewindable in any sense — see `crate::exec`'s module doc.

use crate::common::datum::Datum;
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::index::IndexHandle;
use crate::storage::heap_table::TableHandle;

use super::{fatal_not_rewindable, Operator, Position};

/// One secondary index plus the child-tuple column positions that make
/// up its key, in key order.
pub struct IndexBinding {
    pub index: IndexHandle,
    pub key_fields: Vec<usize>,
}

pub struct TableInsert {
    child: Box<dyn Operator>,
    table: TableHandle,
    table_schema: Schema,
    indexes: Vec<IndexBinding>,
    count: i64,
    done: bool,
    result: Option<Vec<Datum>>,
    initialized: bool,
}

impl TableInsert {
    pub fn new(child: Box<dyn Operator>, table: TableHandle, table_schema: Schema, indexes: Vec<IndexBinding>) -> Self {
        TableInsert {
            child,
            table,
            table_schema,
            indexes,
            count: 0,
            done: false,
            result: None,
            initialized: false,
        }
    }
}

impl Operator for TableInsert {
    fn init(&mut self) -> DbResult<()> {
        self.child.init()?;
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
        while self.child.next_tuple()? {
            let tuple = self.child.get_record()?;
            let bytes = self.table_schema.write_payload(tuple);
            let rid = self.table.insert_record(&bytes)?;
            for binding in &self.indexes {
                let key: Vec<Datum> = binding.key_fields.iter().map(|&f| tuple[f].clone()).collect();
                binding.index.insert(&key, rid)?;
            }
            self.count += 1;
        }
        self.child.close()?;
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
        Err(fatal_not_rewindable("TableInsert"))
    }

    fn save_position(&self) -> DbResult<Position> {
        Err(fatal_not_rewindable("TableInsert"))
    }

    fn rewind_to(&mut self, _pos: &Position) -> DbResult<bool> {
        Err(fatal_not_rewindable("TableInsert"))
    }
}
