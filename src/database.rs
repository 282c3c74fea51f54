//! Top-level handle a caller opens once per on-disk directory: owns the
//! `FileManager`, buffer pool, and catalog explicitly instead of behind
//! process-wide globals (spec.md section 9's "Global state" design
//! note).

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::catalog::Catalog;
use crate::common::schema::Schema;
use crate::config::DbConfig;
use crate::error::DbResult;
use crate::extsort::ExternalSort;
use crate::index::IndexHandle;
use crate::storage::buffer_manager::{BufferManager, BufferManagerHandle};
use crate::storage::file_manager::FileManager;
use crate::storage::heap_table::TableHandle;

pub struct Database {
    fm: Rc<FileManager>,
    bufman: BufferManagerHandle,
    config: DbConfig,
    catalog: RefCell<Catalog>,
}

impl Database {
    pub fn open(base_dir: impl AsRef<Path>, config: DbConfig) -> DbResult<Self> {
        crate::log::init_log();
        let fm = FileManager::open(base_dir, &config)?;
        log::info!("database opened at {:?}", fm.base_dir());
        let bufman: BufferManagerHandle = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        Ok(Database {
            fm,
            bufman,
            config,
            catalog: RefCell::new(Catalog::new()),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn buffer_manager(&self) -> &BufferManagerHandle {
        &self.bufman
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<TableHandle> {
        self.catalog.borrow_mut().create_table(&self.fm, &self.bufman, name, schema)
    }

    pub fn create_index(&self, name: &str, table_name: &str, key_fields: Vec<usize>, unique: bool) -> DbResult<IndexHandle> {
        self.catalog
            .borrow_mut()
            .create_index(&self.fm, &self.bufman, self.config.min_page_usage, name, table_name, key_fields, unique)
    }

    pub fn table(&self, name: &str) -> Option<TableHandle> {
        self.catalog.borrow().table(name).map(|t| Rc::clone(&t.table))
    }

    pub fn table_schema(&self, name: &str) -> Option<Schema> {
        self.catalog.borrow().table(name).map(|t| t.schema.clone())
    }

    pub fn index(&self, name: &str) -> Option<IndexHandle> {
        self.catalog.borrow().index(name).map(|i| Rc::clone(&i.index))
    }

    /// `(index handle, key field positions)` for every index registered
    /// on `table_name`, in creation order — exactly the shape
    /// `exec::TableInsert`/`exec::TableDelete` want for their
    /// `IndexBinding` list.
    pub fn indexes_for_table(&self, table_name: &str) -> Vec<(IndexHandle, Vec<usize>)> {
        self.catalog
            .borrow()
            .indexes_for_table(table_name)
            .into_iter()
            .map(|e| (Rc::clone(&e.index), e.key_fields.clone()))
            .collect()
    }

    pub fn new_external_sort(&self) -> ExternalSort {
        ExternalSort::new(Rc::clone(&self.fm), Rc::clone(&self.bufman), self.config.merge_ways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::datum::Datum;
    use crate::common::schema::{Field, FieldType};
    use crate::exec::{IndexBinding, Operator, TableInsert, TableScan};

    #[test]
    fn create_table_insert_rows_then_scan() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), DbConfig::small_for_tests()).unwrap();
        let schema = Schema::new(vec![Field::new("id", FieldType::int32(), false)]);
        let table = db.create_table("widgets", schema.clone()).unwrap();
        db.create_index("widgets_by_id", "widgets", vec![0], true).unwrap();

        let bindings: Vec<IndexBinding> = db
            .indexes_for_table("widgets")
            .into_iter()
            .map(|(index, key_fields)| IndexBinding { index, key_fields })
            .collect();

        let rows = vec![vec![Datum::from_i32(1)], vec![Datum::from_i32(2)]];
        let child = Box::new(crate::exec::TempTable::new(rows));
        let mut insert = TableInsert::new(child, Rc::clone(&table), schema.clone(), bindings);
        insert.init().unwrap();
        assert!(insert.next_tuple().unwrap());
        assert_eq!(insert.get_record().unwrap()[0].as_i64(), Some(2));

        let mut scan = TableScan::new(table, schema);
        scan.init().unwrap();
        let mut seen = Vec::new();
        while scan.next_tuple().unwrap() {
            seen.push(scan.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, vec![1, 2]);
    }
}
