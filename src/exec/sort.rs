//! Sort operator (spec.md section 4.8 `Sort`): drains its child fully
//! into the external merge sort (`crate::extsort`), then replays the
//! sorted output.

use std::cmp::Ordering;

use crate::common::datum::Datum;
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;
use crate::extsort::{ExternalSort, SortOutput};
use crate::index::key::{datum_eq, datum_lt};

use super::{decode_u64, encode_u64, Operator, Position};

pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

fn compare_rows(keys: &[SortKey], schema: &Schema, a: &[u8], b: &[u8]) -> Ordering {
    for key in keys {
        let va = key.expr.eval_bytes(schema, a);
        let vb = key.expr.eval_bytes(schema, b);
        let (ra, rb) = (va.as_ref(), vb.as_ref());
        let ord = match (ra.is_null(), rb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                if datum_eq(&ra, &rb) {
                    Ordering::Equal
                } else if datum_lt(&ra, &rb) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        };
        let ord = if key.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

enum State {
    BeforeFirst,
    At(u64),
    AfterLast,
}

pub struct Sort {
    child: Box<dyn Operator>,
    keys: Vec<SortKey>,
    schema: Schema,
    sorter: ExternalSort,
    output: Option<SortOutput>,
    current: Option<Vec<Datum>>,
    state: State,
    initialized: bool,
}

impl Sort {
    pub fn new(child: Box<dyn Operator>, keys: Vec<SortKey>, schema: Schema, sorter: ExternalSort) -> Self {
        Sort {
            child,
            keys,
            schema,
            sorter,
            output: None,
            current: None,
            state: State::BeforeFirst,
            initialized: false,
        }
    }

    fn drain_and_sort(&mut self) -> DbResult<()> {
        self.child.init()?;
        let mut items = Vec::new();
        while self.child.next_tuple()? {
            items.push(self.schema.write_payload(self.child.get_record()?));
        }
        let keys = &self.keys;
        let schema = &self.schema;
        let output = self.sorter.sort(items.into_iter(), |a, b| compare_rows(keys, schema, a, b))?;
        self.output = Some(output);
        self.current = None;
        self.state = State::BeforeFirst;
        Ok(())
    }
}

impl Operator for Sort {
    fn init(&mut self) -> DbResult<()> {
        self.drain_and_sort()?;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        let output = self.output.as_mut().expect("initialized implies output set");
        match output.next()? {
            Some(bytes) => {
                self.current = Some(self.schema.dissemble_payload(&bytes));
                self.state = State::At(output.save_position()?);
                Ok(true)
            }
            None => {
                self.current = None;
                self.state = State::AfterLast;
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
        self.output = None;
        self.current = None;
        self.initialized = false;
        self.child.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        Ok(match self.state {
            State::BeforeFirst => vec![0],
            State::At(p) => {
                let mut v = vec![1];
                v.extend_from_slice(&encode_u64(p));
                v
            }
            State::AfterLast => vec![2],
        })
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        if pos.is_empty() {
            return Err(DbError::precondition("malformed sort position"));
        }
        match pos[0] {
            0 => {
                // Re-running the sort is wasteful but simple and correct:
                // "rewind to before the first row" is rare on a hot path.
                self.drain_and_sort()?;
                self.initialized = true;
                Ok(false)
            }
            1 => {
                let p = decode_u64(&pos[1..].to_vec())?;
                let output = self.output.as_mut().expect("rewind_to requires a prior init");
                output.rewind(p)?;
                match output.next()? {
                    Some(bytes) => {
                        self.current = Some(self.schema.dissemble_payload(&bytes));
                        self.state = State::At(output.save_position()?);
                        Ok(true)
                    }
                    None => Err(DbError::precondition("rewind position does not name a live row")),
                }
            }
            2 => {
                self.current = None;
                self.state = State::AfterLast;
                Ok(false)
            }
            _ => Err(DbError::precondition("malformed sort position tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};
    use crate::config::DbConfig;
    use crate::exec::TempTable;
    use crate::storage::buffer_manager::BufferManager;
    use crate::storage::file_manager::FileManager;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn schema() -> Schema {
        Schema::new(vec![Field::new("a", FieldType::int32(), false)])
    }

    fn sorter() -> (tempfile::TempDir, ExternalSort) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        (dir, ExternalSort::new(fm, bufman, config.merge_ways))
    }

    #[test]
    fn sorts_rows_ascending() {
        let (_dir, sorter) = sorter();
        let schema = schema();
        let rows = vec![
            vec![Datum::from_i32(3)],
            vec![Datum::from_i32(1)],
            vec![Datum::from_i32(2)],
        ];
        let child = Box::new(TempTable::new(rows));
        let keys = vec![SortKey {
            expr: Expr::variable(schema.clone(), 0),
            ascending: true,
        }];
        let mut sort = Sort::new(child, keys, schema, sorter);
        sort.init().unwrap();
        let mut seen = Vec::new();
        while sort.next_tuple().unwrap() {
            seen.push(sort.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn rewind_to_resumes_without_extra_next_tuple() {
        let (_dir, sorter) = sorter();
        let schema = schema();
        let rows = (0..10).rev().map(|v| vec![Datum::from_i32(v)]).collect();
        let child = Box::new(TempTable::new(rows));
        let keys = vec![SortKey {
            expr: Expr::variable(schema.clone(), 0),
            ascending: true,
        }];
        let mut sort = Sort::new(child, keys, schema, sorter);
        sort.init().unwrap();
        for _ in 0..4 {
            sort.next_tuple().unwrap();
        }
        let pos = sort.save_position().unwrap();
        let checkpoint = sort.get_record().unwrap()[0].as_i32();
        sort.next_tuple().unwrap();
        assert!(sort.rewind_to(&pos).unwrap());
        assert_eq!(sort.get_record().unwrap()[0].as_i32(), checkpoint);
    }
}
