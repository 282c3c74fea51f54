//! Table and index catalog (spec.md section 9's "no global state" design
//! note): every table and index handle a query plan touches is looked up
//! through a `Catalog` owned by a `Database`, rather than a process-wide
//! singleton.

use std::collections::HashMap;
use std::rc::Rc;

use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::index::{BTree, IndexDescriptor, IndexHandle};
use crate::storage::buffer_manager::BufferManagerHandle;
use crate::storage::file_manager::FileManager;
use crate::storage::heap_table::{HeapTable, TableHandle};

pub struct TableEntry {
    pub name: String,
    pub schema: Schema,
    pub table: TableHandle,
    pub file_id: u32,
    pub indexes: Vec<String>,
}

pub struct IndexEntry {
    pub name: String,
    pub table_name: String,
    /// Column positions (into the table's schema) that make up the
    /// index key, in key order.
    pub key_fields: Vec<usize>,
    pub index: IndexHandle,
    pub file_id: u32,
}

#[derive(Default)]
pub struct Catalog {
    tables: HashMap<String, TableEntry>,
    indexes: HashMap<String, IndexEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn create_table(&mut self, fm: &Rc<FileManager>, bufman: &BufferManagerHandle, name: &str, schema: Schema) -> DbResult<TableHandle> {
        if self.tables.contains_key(name) {
            return Err(DbError::schema(format!("table '{}' already exists", name)));
        }
        let file = fm.create_regular_file()?;
        let file_id = file.file_id;
        let table = HeapTable::initialize(file, Rc::clone(bufman))?;
        self.tables.insert(
            name.to_string(),
            TableEntry {
                name: name.to_string(),
                schema,
                table: Rc::clone(&table),
                file_id,
                indexes: Vec::new(),
            },
        );
        Ok(table)
    }

    pub fn create_index(
        &mut self,
        fm: &Rc<FileManager>,
        bufman: &BufferManagerHandle,
        min_page_usage: f64,
        name: &str,
        table_name: &str,
        key_fields: Vec<usize>,
        unique: bool,
    ) -> DbResult<IndexHandle> {
        if self.indexes.contains_key(name) {
            return Err(DbError::schema(format!("index '{}' already exists", name)));
        }
        let table_schema = self
            .table(table_name)
            .ok_or_else(|| DbError::schema(format!("unknown table '{}'", table_name)))?
            .schema
            .clone();
        let key_schema = Schema::new(key_fields.iter().map(|&f| table_schema.fields[f].clone()).collect());
        let desc = IndexDescriptor { key_schema, unique };
        let index = BTree::initialize(Rc::clone(fm), Rc::clone(bufman), desc, min_page_usage)?;
        let file_id = index.file_id();
        self.indexes.insert(
            name.to_string(),
            IndexEntry {
                name: name.to_string(),
                table_name: table_name.to_string(),
                key_fields,
                index: Rc::clone(&index),
                file_id,
            },
        );
        if let Some(entry) = self.tables.get_mut(table_name) {
            entry.indexes.push(name.to_string());
        }
        Ok(index)
    }

    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexEntry> {
        self.indexes.get(name)
    }

    /// Every index registered against `table_name`, in creation order.
    pub fn indexes_for_table(&self, table_name: &str) -> Vec<&IndexEntry> {
        self.tables
            .get(table_name)
            .map(|t| t.indexes.iter().filter_map(|n| self.indexes.get(n)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};
    use crate::config::DbConfig;
    use crate::storage::buffer_manager::BufferManager;
    use std::cell::RefCell;

    fn setup() -> (tempfile::TempDir, Rc<FileManager>, BufferManagerHandle, DbConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        (dir, fm, bufman, config)
    }

    #[test]
    fn create_table_then_index_links_them() {
        let (_dir, fm, bufman, config) = setup();
        let mut catalog = Catalog::new();
        let schema = Schema::new(vec![
            Field::new("id", FieldType::int32(), false),
            Field::new("name", FieldType::varchar(64), true),
        ]);
        catalog.create_table(&fm, &bufman, "people", schema).unwrap();
        catalog
            .create_index(&fm, &bufman, config.min_page_usage, "people_by_id", "people", vec![0], true)
            .unwrap();

        assert_eq!(catalog.indexes_for_table("people").len(), 1);
        assert_eq!(catalog.indexes_for_table("people")[0].name, "people_by_id");
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let (_dir, fm, bufman, _config) = setup();
        let mut catalog = Catalog::new();
        let schema = Schema::new(vec![Field::new("id", FieldType::int32(), false)]);
        catalog.create_table(&fm, &bufman, "t", schema.clone()).unwrap();
        assert!(catalog.create_table(&fm, &bufman, "t", schema).is_err());
    }
}
