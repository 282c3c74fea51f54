//! End-to-end scenarios, one per named case in spec.md section 8.
//! Scenario C (B+Tree mixed unique/range/delete/reinsert) is already
//! exercised exhaustively by `index::btree`'s own unit tests and is not
//! repeated here.

use std::cell::RefCell;
use std::rc::Rc;

use relkit::common::datum::Datum;
use relkit::common::schema::{Field, FieldType, Schema};
use relkit::config::DbConfig;
use relkit::database::Database;
use relkit::exec::{IndexBinding, IndexNestedLoop, IndexScan, MergeJoin, Operator, TableInsert, TableScan, TempTable};
use relkit::expr::Expr;
use relkit::storage::buffer_manager::BufferManager;
use relkit::storage::file_manager::FileManager;

/// Deterministic xorshift64 generator so scenario D doesn't depend on
/// an external `rand` crate.
struct Xorshift64(u64);

impl Xorshift64 {
    fn next_i64(&mut self) -> i64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x as i64
    }
}

// ---- Scenario A: buffer pool size 1 sweeps 64 pages, read-only -----------

#[test]
fn scenario_a_buffer_pool_size_one_sweep() {
    const MAGIC: u64 = 0x1234_5678_9abc_def0;
    const N: u32 = 64;

    let dir = tempfile::tempdir().unwrap();
    let mut config = DbConfig::small_for_tests();
    config.buffer_pool_frames = 1;
    let fm = FileManager::open(dir.path(), &config).unwrap();
    let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
    let file = fm.create_regular_file().unwrap();

    let mut pages = Vec::new();
    for _ in 0..N {
        pages.push(file.allocate_page().unwrap());
    }

    for (i, &pn) in pages.iter().enumerate() {
        let id = bufman.borrow_mut().pin_page(pn).unwrap();
        {
            let mut bm = bufman.borrow_mut();
            let buf = bm.get_buffer_mut(id).unwrap();
            let value = MAGIC.wrapping_add((i as u32 ^ 0x31) as u64);
            buf[16..24].copy_from_slice(&value.to_be_bytes());
            bm.mark_dirty(id).unwrap();
        }
        bufman.borrow_mut().unpin_page(id).unwrap();
    }
    bufman.borrow_mut().flush().unwrap();

    for i in 0..N as usize {
        let sweep_i = i ^ 0x2d;
        let pn = pages[sweep_i];
        let id = bufman.borrow_mut().pin_page(pn).unwrap();
        let got = {
            let bm = bufman.borrow();
            let buf = bm.get_buffer(id).unwrap();
            u64::from_be_bytes(buf[16..24].try_into().unwrap())
        };
        bufman.borrow_mut().unpin_page(id).unwrap();
        let expected = MAGIC.wrapping_add((sweep_i as u32 ^ 0x31) as u64);
        assert_eq!(got, expected, "page {} carried the wrong magic", sweep_i);
    }
}

// ---- Scenario B: heap with holes -----------------------------------------

fn widget_schema() -> Schema {
    Schema::new(vec![Field::new("f0", FieldType::int32(), false), Field::new("f1", FieldType::varchar(32), false)])
}

fn widget_row(i: i32) -> Vec<u8> {
    let schema = widget_schema();
    schema.write_payload(&[Datum::from_i32(i), Datum::from_bytes((i * 10).to_string().into_bytes())])
}

#[test]
fn scenario_b_heap_with_holes() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::small_for_tests();
    let fm = FileManager::open(dir.path(), &config).unwrap();
    let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
    let file = fm.create_regular_file().unwrap();
    let table = relkit::storage::heap_table::HeapTable::initialize(file, bufman).unwrap();

    let n = 5000;
    let mut rids = Vec::with_capacity(n);
    for i in 0..n as i32 {
        rids.push(table.insert_record(&widget_row(i)).unwrap());
    }

    let mut page_order: Vec<relkit::common::ids::PageNumber> = Vec::new();
    for rid in &rids {
        if !page_order.contains(&rid.page_number) {
            page_order.push(rid.page_number);
        }
    }
    assert!(page_order.len() > 5, "test needs at least 6 distinct pages of data");

    let hole_pages = [page_order[1], page_order[5]];
    let mut erased: Vec<bool> = vec![false; n];
    for (idx, rid) in rids.iter().enumerate() {
        if hole_pages.contains(&rid.page_number) {
            table.erase_record(*rid).unwrap();
            erased[idx] = true;
        }
    }
    // A few slots erased on every other page: first record of each
    // remaining page.
    let mut seen_pages = std::collections::HashSet::new();
    for (idx, rid) in rids.iter().enumerate() {
        if erased[idx] {
            continue;
        }
        if seen_pages.insert(rid.page_number) {
            table.erase_record(*rid).unwrap();
            erased[idx] = true;
        }
    }

    let expected: Vec<i32> = (0..n as i32).filter(|&i| !erased[i as usize]).collect();

    let mut scan = table.start_scan().unwrap();
    let mut seen = Vec::new();
    while let Some((_rid, bytes)) = scan.next().unwrap() {
        let row = widget_schema().dissemble_payload(&bytes);
        let f0 = row[0].as_i32().unwrap();
        assert_eq!(row[1].as_bytes().unwrap(), (f0 * 10).to_string().as_bytes());
        seen.push(f0);
    }
    assert_eq!(seen, expected);
}

// ---- Scenario D: external sort of 100,000 pseudo-random i64 --------------

#[test]
fn scenario_d_external_sort_100k_with_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::small_for_tests();
    let fm = FileManager::open(dir.path(), &config).unwrap();
    let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
    let sorter = relkit::extsort::ExternalSort::new(Rc::clone(&fm), Rc::clone(&bufman), 8);

    let mut gen = Xorshift64(0x9e3779b97f4a7c15);
    let mut values = Vec::with_capacity(100_000);
    for _ in 0..100_000 {
        values.push(gen.next_i64());
    }
    let mut reference = values.clone();
    reference.sort();

    let items = values.iter().map(|v| v.to_be_bytes().to_vec());
    let cmp = |a: &[u8], b: &[u8]| i64::from_be_bytes(a.try_into().unwrap()).cmp(&i64::from_be_bytes(b.try_into().unwrap()));
    let mut output = sorter.sort(items, cmp).unwrap();

    let mut produced = Vec::with_capacity(100_000);
    let mut pos_at_50000 = None;
    for i in 0..100_000 {
        let bytes = output.next().unwrap().expect("sort output shorter than input");
        produced.push(i64::from_be_bytes(bytes.try_into().unwrap()));
        if i == 49_999 {
            pos_at_50000 = Some(output.save_position().unwrap());
        }
    }
    assert!(output.next().unwrap().is_none(), "sort output longer than input");
    assert_eq!(produced, reference);

    output.rewind(pos_at_50000.unwrap()).unwrap();
    let resumed = output.next().unwrap().expect("rewind position should still be live");
    assert_eq!(i64::from_be_bytes(resumed.try_into().unwrap()), reference[50_000]);
}

// ---- Scenario E: merge join, many-to-many --------------------------------

fn int_schema() -> Schema {
    Schema::new(vec![Field::new("k", FieldType::int32(), false)])
}

fn temp_table_of(values: &[i32]) -> TempTable {
    TempTable::new(values.iter().map(|&v| vec![Datum::from_i32(v)]).collect())
}

#[test]
fn scenario_e_merge_join_many_to_many() {
    let outer = vec![2, 2, 3, 4, 4, 8, 10, 150, 150, 200];
    let inner = vec![1, 2, 2, 4, 4, 7, 100, 100, 150, 150];

    let schema = int_schema();
    let outer_key = Expr::variable(schema.clone(), 0);
    let inner_key = Expr::variable(schema, 0);

    let mut join = MergeJoin::new(Box::new(temp_table_of(&outer)), Box::new(temp_table_of(&inner)), vec![outer_key], vec![inner_key]);
    join.init().unwrap();
    let mut rows = Vec::new();
    while join.next_tuple().unwrap() {
        let rec = join.get_record().unwrap();
        rows.push((rec[0].as_i32().unwrap(), rec[1].as_i32().unwrap()));
    }

    let expected = vec![
        (2, 2),
        (2, 2),
        (2, 2),
        (2, 2),
        (4, 4),
        (4, 4),
        (4, 4),
        (4, 4),
        (150, 150),
        (150, 150),
        (150, 150),
        (150, 150),
    ];
    assert_eq!(rows, expected);
}

#[test]
fn scenario_e_merge_join_rewind_mid_block() {
    let outer = vec![2, 2, 3, 4, 4, 8, 10, 150, 150, 200];
    let inner = vec![1, 2, 2, 4, 4, 7, 100, 100, 150, 150];
    let schema = int_schema();

    let mut join = MergeJoin::new(
        Box::new(temp_table_of(&outer)),
        Box::new(temp_table_of(&inner)),
        vec![Expr::variable(schema.clone(), 0)],
        vec![Expr::variable(schema, 0)],
    );
    join.init().unwrap();

    for _ in 0..5 {
        assert!(join.next_tuple().unwrap());
    }
    let mid_row = join.get_record().unwrap().to_vec();
    let pos = join.save_position().unwrap();

    assert!(join.next_tuple().unwrap());
    assert!(join.next_tuple().unwrap());

    assert!(join.rewind_to(&pos).unwrap());
    assert_eq!(join.get_record().unwrap(), mid_row.as_slice());
}

// ---- Scenario F: index nested-loop join with a range predicate ----------

#[test]
fn scenario_f_index_nested_loop() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), DbConfig::small_for_tests()).unwrap();
    let schema = int_schema();
    let inner_table = db.create_table("inner_t", schema.clone()).unwrap();
    db.create_index("inner_by_k", "inner_t", vec![0], true).unwrap();

    for k in [2, 3, 4, 7, 100, 150] {
        let bindings: Vec<IndexBinding> = db
            .indexes_for_table("inner_t")
            .into_iter()
            .map(|(index, key_fields)| IndexBinding { index, key_fields })
            .collect();
        let mut insert = TableInsert::new(Box::new(temp_table_of(&[k])), Rc::clone(&inner_table), schema.clone(), bindings);
        insert.init().unwrap();
        assert!(insert.next_tuple().unwrap());
    }

    let outer_values = vec![2, 2, 3, 4, 4, 8, 10, 100, 100];
    let outer = Box::new(temp_table_of(&outer_values));
    let index = db.index("inner_by_k").unwrap();
    let bound = vec![Expr::variable(schema.clone(), 0)];

    let mut nlj = IndexNestedLoop::new(outer, index, inner_table, schema, bound.clone(), false, Some(bound), false);
    nlj.init().unwrap();
    let mut rows = Vec::new();
    while nlj.next_tuple().unwrap() {
        let rec = nlj.get_record().unwrap();
        rows.push((rec[0].as_i32().unwrap(), rec[1].as_i32().unwrap()));
    }

    let expected = vec![(2, 2), (2, 2), (4, 4), (4, 4), (100, 100), (100, 100)];
    assert_eq!(rows, expected);
}

// ---- Coverage for TableScan / IndexScan save-restore over real tables ---

#[test]
fn table_scan_and_index_scan_agree_after_rewind() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), DbConfig::small_for_tests()).unwrap();
    let schema = int_schema();
    let table = db.create_table("t", schema.clone()).unwrap();
    db.create_index("t_by_k", "t", vec![0], false).unwrap();

    let values: Vec<i32> = (0..200).collect();
    let bindings: Vec<IndexBinding> = db
        .indexes_for_table("t")
        .into_iter()
        .map(|(index, key_fields)| IndexBinding { index, key_fields })
        .collect();
    let mut insert = TableInsert::new(Box::new(temp_table_of(&values)), Rc::clone(&table), schema.clone(), bindings);
    insert.init().unwrap();
    assert!(insert.next_tuple().unwrap());

    let mut scan = TableScan::new(Rc::clone(&table), schema.clone());
    scan.init().unwrap();
    for _ in 0..10 {
        assert!(scan.next_tuple().unwrap());
    }
    let saved = scan.save_position().unwrap();
    let expected = scan.get_record().unwrap().to_vec();
    assert!(scan.next_tuple().unwrap());
    assert!(scan.rewind_to(&saved).unwrap());
    assert_eq!(scan.get_record().unwrap(), expected.as_slice());

    let index = db.index("t_by_k").unwrap();
    let mut iscan = IndexScan::new(
        index,
        table,
        schema.clone(),
        Some(vec![Datum::from_i32(50)]),
        false,
        Some(vec![Datum::from_i32(60)]),
        true,
    );
    iscan.init().unwrap();
    let mut seen = Vec::new();
    while iscan.next_tuple().unwrap() {
        seen.push(iscan.get_record().unwrap()[0].as_i32().unwrap());
    }
    assert_eq!(seen, (50..60).collect::<Vec<_>>());
}
