//! Full-table heap scan (spec.md section 4.8 `TableScan`).

use crate::common::datum::Datum;
use crate::common::ids::{RecordId, INVALID_PID, RESERVED_PID};
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::storage::heap_table::{HeapIter, TableHandle};

use super::{decode_pn_slot, encode_pn_slot, Operator, Position};

enum Cursor {
    BeforeFirst,
    At(RecordId, Vec<Datum>),
    AfterLast,
}

pub struct TableScan {
    table: TableHandle,
    schema: Schema,
    iter: Option<HeapIter>,
    cursor: Cursor,
    initialized: bool,
}

impl TableScan {
    pub fn new(table: TableHandle, schema: Schema) -> Self {
        TableScan {
            table,
            schema,
            iter: None,
            cursor: Cursor::BeforeFirst,
            initialized: false,
        }
    }
}

impl Operator for TableScan {
    fn init(&mut self) -> DbResult<()> {
        self.iter = Some(self.table.start_scan()?);
        self.cursor = Cursor::BeforeFirst;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        let Some(iter) = self.iter.as_mut() else {
            return Ok(false);
        };
        match iter.next()? {
            Some((rid, bytes)) => {
                self.cursor = Cursor::At(rid, self.schema.dissemble_payload(&bytes));
                Ok(true)
            }
            None => {
                self.iter = None;
                self.cursor = Cursor::AfterLast;
                Ok(false)
            }
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        match &self.cursor {
            Cursor::At(_, values) => Ok(values),
            _ => Err(DbError::precondition("get_record before next_tuple returned true")),
        }
    }

    fn close(&mut self) -> DbResult<()> {
        self.iter = None;
        self.cursor = Cursor::BeforeFirst;
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(match &self.cursor {
            Cursor::BeforeFirst => encode_pn_slot(INVALID_PID, 0),
            Cursor::At(rid, _) => encode_pn_slot(rid.page_number, rid.slot_id),
            Cursor::AfterLast => encode_pn_slot(RESERVED_PID, 0),
        })
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        let (pn, slot) = decode_pn_slot(pos)?;
        if pn == INVALID_PID {
            self.iter = Some(self.table.start_scan()?);
            self.cursor = Cursor::BeforeFirst;
            self.initialized = true;
            return Ok(false);
        }
        if pn == RESERVED_PID {
            self.iter = None;
            self.cursor = Cursor::AfterLast;
            self.initialized = true;
            return Ok(false);
        }
        let mut it = self.table.start_scan_from(RecordId::new(pn, slot))?;
        match it.next()? {
            Some((rid, bytes)) => {
                self.cursor = Cursor::At(rid, self.schema.dissemble_payload(&bytes));
                self.iter = Some(it);
                self.initialized = true;
                Ok(true)
            }
            None => Err(DbError::precondition("rewind position does not name a live record")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};
    use crate::config::DbConfig;
    use crate::storage::buffer_manager::BufferManager;
    use crate::storage::file_manager::FileManager;
    use crate::storage::heap_table::HeapTable;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (tempfile::TempDir, TableHandle, Schema) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        let schema = Schema::new(vec![Field::new("k", FieldType::int32(), false)]);
        let file = fm.create_regular_file().unwrap();
        let table = HeapTable::initialize(file, bufman).unwrap();
        for i in 0..300 {
            table.insert_record(&schema.write_payload(&[Datum::from_i32(i)])).unwrap();
        }
        (dir, table, schema)
    }

    #[test]
    fn scans_all_rows_in_order() {
        let (_dir, table, schema) = setup();
        let mut scan = TableScan::new(table, schema);
        scan.init().unwrap();
        let mut seen = Vec::new();
        while scan.next_tuple().unwrap() {
            seen.push(scan.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn rewind_to_resumes_without_extra_next_tuple() {
        let (_dir, table, schema) = setup();
        let mut scan = TableScan::new(table, schema);
        scan.init().unwrap();
        for _ in 0..7 {
            assert!(scan.next_tuple().unwrap());
        }
        let saved = scan.save_position().unwrap();
        let expected = scan.get_record().unwrap().to_vec();
        assert!(scan.next_tuple().unwrap());
        assert!(scan.rewind_to(&saved).unwrap());
        assert_eq!(scan.get_record().unwrap(), expected.as_slice());
    }

    #[test]
    fn rewind_to_before_first_restarts_scan() {
        let (_dir, table, schema) = setup();
        let mut scan = TableScan::new(table, schema);
        scan.init().unwrap();
        let before_first = scan.save_position().unwrap();
        for _ in 0..3 {
            assert!(scan.next_tuple().unwrap());
        }
        assert!(!scan.rewind_to(&before_first).unwrap());
        assert!(scan.next_tuple().unwrap());
        assert_eq!(scan.get_record().unwrap()[0].as_i32().unwrap(), 0);
    }
}
