//! Expression trees (spec.md section 4.7): a polymorphic `Expr` with
//! children and a cached return-type descriptor, evaluated against
//! either a nullable-ref-vector tuple or a serialized tuple's raw bytes.
//!
//! Every variant that calls a scalar function resolves it once, at
//! construction, against a `FunctionCatalog` and keeps the resulting
//! `FunctionInfo` — `eval` never repeats that lookup, since it runs once
//! per tuple in a scan.

pub mod function;
pub mod opcode;

pub use function::{BuiltinCatalog, FunctionCatalog, FunctionInfo};
pub use opcode::{BinaryOpcode, UnaryOpcode};

use crate::common::datum::{Datum, DatumRef};
use crate::common::schema::{FieldType, Schema, TypeId};
use crate::error::{DbError, DbResult};

pub enum Expr {
    Literal {
        value: Datum,
        ty: FieldType,
    },
    Variable {
        schema: Schema,
        field_id: usize,
        ty: FieldType,
    },
    Cast {
        target: FieldType,
        child: Box<Expr>,
        implicit: bool,
        func: FunctionInfo,
    },
    UnaryOperator {
        op: UnaryOpcode,
        child: Box<Expr>,
        func: FunctionInfo,
    },
    BinaryOperator {
        op: BinaryOpcode,
        left: Box<Expr>,
        right: Box<Expr>,
        func: FunctionInfo,
    },
    FuncCallOperator {
        function_id: String,
        args: Vec<Expr>,
        func: FunctionInfo,
    },
    AndOperator {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    OrOperator {
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn literal(value: Datum, ty: FieldType) -> Self {
        Expr::Literal { value, ty }
    }

    pub fn variable(schema: Schema, field_id: usize) -> Self {
        let ty = schema.fields[field_id].ty;
        Expr::Variable { schema, field_id, ty }
    }

    pub fn cast(target: FieldType, child: Expr, implicit: bool, catalog: &dyn FunctionCatalog) -> DbResult<Self> {
        let func = catalog.resolve_cast(child.return_type(), target)?;
        Ok(Expr::Cast {
            target,
            child: Box::new(child),
            implicit,
            func,
        })
    }

    pub fn unary_operator(op: UnaryOpcode, child: Expr, catalog: &dyn FunctionCatalog) -> DbResult<Self> {
        let func = catalog.resolve_unary(op, child.return_type())?;
        Ok(Expr::UnaryOperator {
            op,
            child: Box::new(child),
            func,
        })
    }

    pub fn binary_operator(op: BinaryOpcode, left: Expr, right: Expr, catalog: &dyn FunctionCatalog) -> DbResult<Self> {
        let func = catalog.resolve_binary(op, left.return_type(), right.return_type())?;
        Ok(Expr::BinaryOperator {
            op,
            left: Box::new(left),
            right: Box::new(right),
            func,
        })
    }

    pub fn func_call(function_id: impl Into<String>, args: Vec<Expr>, catalog: &dyn FunctionCatalog) -> DbResult<Self> {
        let function_id = function_id.into();
        let arg_types: Vec<FieldType> = args.iter().map(|a| a.return_type()).collect();
        let func = catalog.resolve_function(&function_id, &arg_types)?;
        Ok(Expr::FuncCallOperator { function_id, args, func })
    }

    pub fn and_operator(left: Expr, right: Expr) -> DbResult<Self> {
        require_boolean(&left)?;
        require_boolean(&right)?;
        Ok(Expr::AndOperator {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn or_operator(left: Expr, right: Expr) -> DbResult<Self> {
        require_boolean(&left)?;
        require_boolean(&right)?;
        Ok(Expr::OrOperator {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn return_type(&self) -> FieldType {
        match self {
            Expr::Literal { ty, .. } => *ty,
            Expr::Variable { ty, .. } => *ty,
            Expr::Cast { target, .. } => *target,
            Expr::UnaryOperator { func, .. } => func.return_type,
            Expr::BinaryOperator { func, .. } => func.return_type,
            Expr::FuncCallOperator { func, .. } => func.return_type,
            Expr::AndOperator { .. } | Expr::OrOperator { .. } => FieldType::boolean(),
        }
    }

    /// Evaluates against a tuple already split into per-field datums
    /// (the shape a join or projection operator holds its current rows
    /// in).
    pub fn eval(&self, tuple: &[DatumRef]) -> Datum {
        match self {
            Expr::Literal { value, .. } => value.clone(),
            Expr::Variable { field_id, .. } => tuple[*field_id].to_owned_datum(),
            Expr::Cast { child, func, .. } => func.call(&[child.eval(tuple).as_ref()]),
            Expr::UnaryOperator { child, func, .. } => func.call(&[child.eval(tuple).as_ref()]),
            Expr::BinaryOperator { left, right, func, .. } => {
                let l = left.eval(tuple);
                let r = right.eval(tuple);
                func.call(&[l.as_ref(), r.as_ref()])
            }
            Expr::FuncCallOperator { args, func, .. } => {
                let vals: Vec<Datum> = args.iter().map(|a| a.eval(tuple)).collect();
                let refs: Vec<DatumRef> = vals.iter().map(|v| v.as_ref()).collect();
                func.call(&refs)
            }
            Expr::AndOperator { left, right } => match left.eval(tuple).as_bool() {
                Some(false) => Datum::from_bool(false),
                _ => right.eval(tuple),
            },
            Expr::OrOperator { left, right } => match left.eval(tuple).as_bool() {
                Some(true) => Datum::from_bool(true),
                _ => right.eval(tuple),
            },
        }
    }

    /// Evaluates directly against a serialized tuple's bytes, reading
    /// only the fields it actually touches (spec.md section 4.7's
    /// second `eval` overload) — the path `TableScan`/`Selection` use
    /// so a predicate that only inspects one field never pays for
    /// deserializing the whole row.
    pub fn eval_bytes(&self, schema: &Schema, bytes: &[u8]) -> Datum {
        match self {
            Expr::Literal { value, .. } => value.clone(),
            Expr::Variable { field_id, .. } => schema.read_field(bytes, *field_id).to_owned_datum(),
            Expr::Cast { child, func, .. } => func.call(&[child.eval_bytes(schema, bytes).as_ref()]),
            Expr::UnaryOperator { child, func, .. } => func.call(&[child.eval_bytes(schema, bytes).as_ref()]),
            Expr::BinaryOperator { left, right, func, .. } => {
                let l = left.eval_bytes(schema, bytes);
                let r = right.eval_bytes(schema, bytes);
                func.call(&[l.as_ref(), r.as_ref()])
            }
            Expr::FuncCallOperator { args, func, .. } => {
                let vals: Vec<Datum> = args.iter().map(|a| a.eval_bytes(schema, bytes)).collect();
                let refs: Vec<DatumRef> = vals.iter().map(|v| v.as_ref()).collect();
                func.call(&refs)
            }
            Expr::AndOperator { left, right } => match left.eval_bytes(schema, bytes).as_bool() {
                Some(false) => Datum::from_bool(false),
                _ => right.eval_bytes(schema, bytes),
            },
            Expr::OrOperator { left, right } => match left.eval_bytes(schema, bytes).as_bool() {
                Some(true) => Datum::from_bool(true),
                _ => right.eval_bytes(schema, bytes),
            },
        }
    }
}

fn require_boolean(expr: &Expr) -> DbResult<()> {
    if expr.return_type().type_id != TypeId::Bool {
        return Err(DbError::schema("and/or operands must be boolean"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", FieldType::int32(), false),
            Field::new("b", FieldType::int32(), true),
        ])
    }

    #[test]
    fn binary_add_on_variables() {
        let catalog = BuiltinCatalog;
        let schema = schema();
        let expr = Expr::binary_operator(
            BinaryOpcode::Add,
            Expr::variable(schema.clone(), 0),
            Expr::variable(schema.clone(), 1),
            &catalog,
        )
        .unwrap();

        let bytes = schema.write_payload(&[Datum::from_i32(10), Datum::from_i32(32)]);
        assert_eq!(expr.eval_bytes(&schema, &bytes).as_i32(), Some(42));

        let tuple = schema.dissemble_payload(&bytes);
        let refs: Vec<DatumRef> = tuple.iter().map(|d| d.as_ref()).collect();
        assert_eq!(expr.eval(&refs).as_i32(), Some(42));
    }

    #[test]
    fn and_short_circuits_on_false_left() {
        let schema = schema();
        let always_false = Expr::literal(Datum::from_bool(false), FieldType::boolean());
        let panics_if_evaluated = Expr::literal(Datum::Null, FieldType::boolean());
        let expr = Expr::and_operator(always_false, panics_if_evaluated).unwrap();
        let bytes = schema.write_payload(&[Datum::from_i32(1), Datum::Null]);
        assert_eq!(expr.eval_bytes(&schema, &bytes).as_bool(), Some(false));
    }

    #[test]
    fn cast_widens_int32_to_int64() {
        let catalog = BuiltinCatalog;
        let schema = schema();
        let expr = Expr::cast(FieldType::int64(), Expr::variable(schema.clone(), 0), true, &catalog).unwrap();
        let bytes = schema.write_payload(&[Datum::from_i32(-5), Datum::Null]);
        assert_eq!(expr.eval_bytes(&schema, &bytes).as_i64(), Some(-5));
    }

    #[test]
    fn and_or_reject_non_boolean_operands() {
        let schema = schema();
        let non_bool = Expr::variable(schema, 0);
        let also_non_bool = Expr::literal(Datum::from_i32(1), FieldType::int32());
        assert!(Expr::and_operator(non_bool, also_non_bool).is_err());
    }
}
