//! Projection operator (spec.md section 4.8 `Projection`): evaluates a
//! fixed list of expressions against each child tuple.

use crate::common::datum::Datum;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;

use super::{Operator, Position};

fn project(exprs: &[Expr], tuple: &[Datum]) -> Vec<Datum> {
    let refs: Vec<_> = tuple.iter().map(|d| d.as_ref()).collect();
    exprs.iter().map(|e| e.eval(&refs)).collect()
}

pub struct Projection {
    child: Box<dyn Operator>,
    exprs: Vec<Expr>,
    current: Option<Vec<Datum>>,
    initialized: bool,
}

impl Projection {
    pub fn new(child: Box<dyn Operator>, exprs: Vec<Expr>) -> Self {
        Projection {
            child,
            exprs,
            current: None,
            initialized: false,
        }
    }
}

impl Operator for Projection {
    fn init(&mut self) -> DbResult<()> {
        self.child.init()?;
        self.current = None;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        if self.child.next_tuple()? {
            self.current = Some(project(&self.exprs, self.child.get_record()?));
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.current
            .as_deref()
            .ok_or_else(|| DbError::precondition("get_record before next_tuple returned true"))
    }

    fn close(&mut self) -> DbResult<()> {
        self.current = None;
        self.child.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.init()
    }

    fn save_position(&self) -> DbResult<Position> {
        self.child.save_position()
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        // Unlike `Selection`, the exposed tuple here is derived from the
        // child's, not equal to it, so it must be recomputed after the
        // child restores its own cursor.
        if self.child.rewind_to(pos)? {
            self.current = Some(project(&self.exprs, self.child.get_record()?));
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType, Schema};
    use crate::exec::TempTable;
    use crate::expr::{BinaryOpcode, BuiltinCatalog};

    #[test]
    fn projects_computed_expression() {
        let schema = Schema::new(vec![Field::new("a", FieldType::int32(), false)]);
        let rows = vec![vec![Datum::from_i32(1)], vec![Datum::from_i32(2)]];
        let child = Box::new(TempTable::new(rows));
        let catalog = BuiltinCatalog;
        let expr = Expr::binary_operator(
            BinaryOpcode::Add,
            Expr::variable(schema, 0),
            Expr::literal(Datum::from_i32(10), FieldType::int32()),
            &catalog,
        )
        .unwrap();
        let mut proj = Projection::new(child, vec![expr]);
        proj.init().unwrap();
        let mut seen = Vec::new();
        while proj.next_tuple().unwrap() {
            seen.push(proj.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, vec![11, 12]);
    }

    #[test]
    fn rewind_to_recomputes_projection() {
        let schema = Schema::new(vec![Field::new("a", FieldType::int32(), false)]);
        let rows = vec![vec![Datum::from_i32(1)], vec![Datum::from_i32(2)]];
        let child = Box::new(TempTable::new(rows));
        let catalog = BuiltinCatalog;
        let expr = Expr::binary_operator(
            BinaryOpcode::Add,
            Expr::variable(schema, 0),
            Expr::literal(Datum::from_i32(100), FieldType::int32()),
            &catalog,
        )
        .unwrap();
        let mut proj = Projection::new(child, vec![expr]);
        proj.init().unwrap();
        proj.next_tuple().unwrap();
        let pos = proj.save_position().unwrap();
        proj.next_tuple().unwrap();
        assert!(proj.rewind_to(&pos).unwrap());
        assert_eq!(proj.get_record().unwrap()[0].as_i32(), Some(101));
    }
}
