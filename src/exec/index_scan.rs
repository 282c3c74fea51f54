//! Index scan (spec.md section 4.8 `IndexScan`): fetches the table's
//! full schema by locating each match through an index iterator, then
//! reading the heap record it points at.

use crate::common::datum::Datum;
use crate::common::ids::{PageNumber, RecordId, INVALID_PID};
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::index::{BTreeRangeIter, IndexHandle};
use crate::storage::heap_table::TableHandle;

use super::{decode_u64, encode_u64, Operator, Position};

const TAG_BEFORE_FIRST: u8 = 0;
const TAG_AT: u8 = 1;
const TAG_AFTER_LAST: u8 = 2;

pub struct IndexScan {
    index: IndexHandle,
    table: TableHandle,
    table_schema: Schema,
    lower: Option<Vec<Datum>>,
    lower_strict: bool,
    upper: Option<Vec<Datum>>,
    upper_strict: bool,
    iter: Option<BTreeRangeIter>,
    current: Option<Vec<Datum>>,
    last_iter_pos: (PageNumber, usize),
    exhausted: bool,
    initialized: bool,
}

impl IndexScan {
    pub fn new(
        index: IndexHandle,
        table: TableHandle,
        table_schema: Schema,
        lower: Option<Vec<Datum>>,
        lower_strict: bool,
        upper: Option<Vec<Datum>>,
        upper_strict: bool,
    ) -> Self {
        IndexScan {
            index,
            table,
            table_schema,
            lower,
            lower_strict,
            upper,
            upper_strict,
            iter: None,
            current: None,
            last_iter_pos: (INVALID_PID, 0),
            exhausted: false,
            initialized: false,
        }
    }

    fn open_iter(&self) -> DbResult<BTreeRangeIter> {
        self.index
            .range_scan(self.lower.clone(), self.lower_strict, self.upper.clone(), self.upper_strict)
    }

    fn fetch(&self, rid: RecordId) -> DbResult<Vec<Datum>> {
        let bytes = self
            .table
            .read_record(rid)?
            .ok_or_else(|| DbError::fatal("index points at a missing heap record"))?;
        Ok(self.table_schema.dissemble_payload(&bytes))
    }
}

impl Operator for IndexScan {
    fn init(&mut self) -> DbResult<()> {
        self.iter = Some(self.open_iter()?);
        self.current = None;
        self.exhausted = false;
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
        let pos_before = iter.save_position();
        match iter.next()? {
            Some((_key, rid)) => {
                self.current = Some(self.fetch(rid)?);
                self.last_iter_pos = pos_before;
                Ok(true)
            }
            None => {
                self.current = None;
                self.exhausted = true;
                self.iter = None;
                Ok(false)
            }
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.current
            .as_deref()
            .ok_or_else(|| DbError::precondition("get_record before next_tuple returned true"))
    }

    fn close(&mut self) -> DbResult<()> {
        self.iter = None;
        self.current = None;
        self.initialized = false;
        Ok(())
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        if self.current.is_some() {
            let packed = ((self.last_iter_pos.0 as u64) << 32) | self.last_iter_pos.1 as u64;
            let mut v = vec![TAG_AT];
            v.extend_from_slice(&encode_u64(packed));
            Ok(v)
        } else if self.exhausted {
            Ok(vec![TAG_AFTER_LAST])
        } else {
            Ok(vec![TAG_BEFORE_FIRST])
        }
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        if pos.is_empty() {
            return Err(DbError::precondition("malformed index scan position"));
        }
        match pos[0] {
            TAG_BEFORE_FIRST => {
                self.iter = Some(self.open_iter()?);
                self.current = None;
                self.exhausted = false;
                self.initialized = true;
                Ok(false)
            }
            TAG_AFTER_LAST => {
                self.iter = None;
                self.current = None;
                self.exhausted = true;
                self.initialized = true;
                Ok(false)
            }
            TAG_AT => {
                let packed = decode_u64(&pos[1..].to_vec())?;
                let pn = (packed >> 32) as PageNumber;
                let idx = (packed & 0xFFFF_FFFF) as usize;
                let mut iter = self.open_iter()?;
                iter.rewind((pn, idx));
                let pos_before = iter.save_position();
                match iter.next()? {
                    Some((_key, rid)) => {
                        self.current = Some(self.fetch(rid)?);
                        self.last_iter_pos = pos_before;
                        self.iter = Some(iter);
                        self.exhausted = false;
                        self.initialized = true;
                        Ok(true)
                    }
                    None => Err(DbError::precondition("rewind position does not name a live record")),
                }
            }
            _ => Err(DbError::precondition("malformed index scan position tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};
    use crate::config::DbConfig;
    use crate::index::{BTree, IndexDescriptor};
    use crate::storage::buffer_manager::BufferManager;
    use crate::storage::file_manager::FileManager;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (tempfile::TempDir, TableHandle, IndexHandle, Schema) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        let schema = Schema::new(vec![Field::new("k", FieldType::int32(), false)]);
        let file = fm.create_regular_file().unwrap();
        let table = crate::storage::heap_table::HeapTable::initialize(file, Rc::clone(&bufman)).unwrap();
        let desc = IndexDescriptor { key_schema: schema.clone(), unique: false };
        let index = BTree::initialize(Rc::clone(&fm), bufman, desc, config.min_page_usage).unwrap();
        for i in 0..100 {
            let rid = table.insert_record(&schema.write_payload(&[Datum::from_i32(i)])).unwrap();
            index.insert(&[Datum::from_i32(i)], rid).unwrap();
        }
        (dir, table, index, schema)
    }

    #[test]
    fn scans_range_through_the_index_into_the_heap() {
        let (_dir, table, index, schema) = setup();
        let mut scan = IndexScan::new(index, table, schema, Some(vec![Datum::from_i32(10)]), false, Some(vec![Datum::from_i32(20)]), true);
        scan.init().unwrap();
        let mut seen = Vec::new();
        while scan.next_tuple().unwrap() {
            seen.push(scan.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn rewind_to_resumes_without_extra_next_tuple() {
        let (_dir, table, index, schema) = setup();
        let mut scan = IndexScan::new(index, table, schema, None, false, None, false);
        scan.init().unwrap();
        for _ in 0..5 {
            assert!(scan.next_tuple().unwrap());
        }
        let saved = scan.save_position().unwrap();
        let expected = scan.get_record().unwrap().to_vec();
        assert!(scan.next_tuple().unwrap());
        assert!(scan.rewind_to(&saved).unwrap());
        assert_eq!(scan.get_record().unwrap(), expected.as_slice());
    }
}
