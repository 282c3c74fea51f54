//! Filter operator (spec.md section 4.8 `Selection`): passes through
//! child tuples for which a predicate evaluates true.

use crate::common::datum::Datum;
use crate::error::{DbError, DbResult};
use crate::expr::Expr;

use super::{Operator, Position};

fn eval_bool(expr: &Expr, tuple: &[Datum]) -> bool {
    let refs: Vec<_> = tuple.iter().map(|d| d.as_ref()).collect();
    expr.eval(&refs).as_bool().unwrap_or(false)
}

pub struct Selection {
    child: Box<dyn Operator>,
    predicate: Expr,
    initialized: bool,
}

impl Selection {
    pub fn new(child: Box<dyn Operator>, predicate: Expr) -> Self {
        Selection {
            child,
            predicate,
            initialized: false,
        }
    }
}

impl Operator for Selection {
    fn init(&mut self) -> DbResult<()> {
        self.child.init()?;
        self.initialized = true;
        Ok(())
    }

    fn next_tuple(&mut self) -> DbResult<bool> {
        if !self.initialized {
            return Err(DbError::precondition("next_tuple before init"));
        }
        loop {
            if !self.child.next_tuple()? {
                return Ok(false);
            }
            if eval_bool(&self.predicate, self.child.get_record()?) {
                return Ok(true);
            }
        }
    }

    fn get_record(&self) -> DbResult<&[Datum]> {
        self.child.get_record()
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()
    }

    fn save_position(&self) -> DbResult<Position> {
        self.child.save_position()
    }

    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool> {
        self.child.rewind_to(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType, Schema};
    use crate::exec::TempTable;
    use crate::expr::{BinaryOpcode, BuiltinCatalog};

    #[test]
    fn passes_through_only_matching_rows() {
        let schema = Schema::new(vec![Field::new("a", FieldType::int32(), false)]);
        let rows = vec![
            vec![Datum::from_i32(1)],
            vec![Datum::from_i32(2)],
            vec![Datum::from_i32(3)],
        ];
        let child = Box::new(TempTable::new(rows));
        let catalog = BuiltinCatalog;
        let pred = Expr::binary_operator(
            BinaryOpcode::Gt,
            Expr::variable(schema, 0),
            Expr::literal(Datum::from_i32(1), FieldType::int32()),
            &catalog,
        )
        .unwrap();
        let mut sel = Selection::new(child, pred);
        sel.init().unwrap();
        let mut seen = Vec::new();
        while sel.next_tuple().unwrap() {
            seen.push(sel.get_record().unwrap()[0].as_i32().unwrap());
        }
        assert_eq!(seen, vec![2, 3]);
    }
}
