//! Scalar function resolution (spec.md section 4.7's "the function
//! registry (external) returns a callable `FunctionInfo`").
//!
//! A full catalog-backed function registry is out of scope (as
//! `index::key`'s `datum_eq`/`datum_lt` already stand in for the
//! per-column comparison functions a real catalog would resolve); this
//! gives `Expr` construction a concrete, resolvable registry for the
//! kernel's four built-in column types, reusing `index::key`'s
//! comparators for `Eq`/`Ne`/`Lt`/`Le`/`Gt`/`Ge` so both modules agree
//! on what "equal" and "less than" mean for a given `Datum`.

use std::rc::Rc;

use crate::common::datum::{Datum, DatumRef};
use crate::common::schema::{FieldType, TypeId};
use crate::error::{DbError, DbResult};
use crate::index::key::{datum_eq, datum_lt};

use super::opcode::{BinaryOpcode, UnaryOpcode};

/// A resolved, callable scalar function. Cheap to clone (`Rc`) so an
/// `Expr` node can hold its own copy without re-resolving on every eval.
#[derive(Clone)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub return_type: FieldType,
    func: Rc<dyn Fn(&[DatumRef]) -> Datum>,
}

impl FunctionInfo {
    pub fn call(&self, args: &[DatumRef]) -> Datum {
        (self.func)(args)
    }
}

/// Resolves opcodes and function ids to callables, given the static
/// types of their operands. Consulted once, at `Expr` construction.
pub trait FunctionCatalog {
    fn resolve_unary(&self, op: UnaryOpcode, operand: FieldType) -> DbResult<FunctionInfo>;
    fn resolve_binary(&self, op: BinaryOpcode, left: FieldType, right: FieldType) -> DbResult<FunctionInfo>;
    fn resolve_cast(&self, from: FieldType, to: FieldType) -> DbResult<FunctionInfo>;
    fn resolve_function(&self, function_id: &str, arg_types: &[FieldType]) -> DbResult<FunctionInfo>;
}

/// The kernel's built-in scalar functions over `Bool`/`Int32`/`Int64`/`Varchar`.
pub struct BuiltinCatalog;

impl FunctionCatalog for BuiltinCatalog {
    fn resolve_unary(&self, op: UnaryOpcode, operand: FieldType) -> DbResult<FunctionInfo> {
        match (op, operand.type_id) {
            (UnaryOpcode::Neg, TypeId::Int32) => Ok(FunctionInfo {
                name: "neg_i32",
                return_type: FieldType::int32(),
                func: Rc::new(|args| match args[0].as_i32() {
                    Some(v) => Datum::from_i32(v.wrapping_neg()),
                    None => Datum::Null,
                }),
            }),
            (UnaryOpcode::Neg, TypeId::Int64) => Ok(FunctionInfo {
                name: "neg_i64",
                return_type: FieldType::int64(),
                func: Rc::new(|args| match args[0].as_i64() {
                    Some(v) => Datum::from_i64(v.wrapping_neg()),
                    None => Datum::Null,
                }),
            }),
            (UnaryOpcode::Not, TypeId::Bool) => Ok(FunctionInfo {
                name: "not",
                return_type: FieldType::boolean(),
                func: Rc::new(|args| match args[0].as_bool() {
                    Some(v) => Datum::from_bool(!v),
                    None => Datum::Null,
                }),
            }),
            _ => Err(DbError::schema(format!("no unary function for {:?} on {:?}", op, operand.type_id))),
        }
    }

    fn resolve_binary(&self, op: BinaryOpcode, left: FieldType, right: FieldType) -> DbResult<FunctionInfo> {
        use BinaryOpcode::*;
        if left.type_id != right.type_id {
            return Err(DbError::schema(format!(
                "{:?} requires matching operand types, got {:?} and {:?}",
                op, left.type_id, right.type_id
            )));
        }
        match op {
            Add | Sub | Mul | Div => match left.type_id {
                TypeId::Int32 => Ok(arith_i32(op)),
                TypeId::Int64 => Ok(arith_i64(op)),
                other => Err(DbError::schema(format!("{:?} is not defined for {:?}", op, other))),
            },
            Eq | Ne | Lt | Le | Gt | Ge => Ok(cmp_fn(op)),
        }
    }

    fn resolve_cast(&self, from: FieldType, to: FieldType) -> DbResult<FunctionInfo> {
        if from.type_id == to.type_id {
            return Ok(FunctionInfo {
                name: "cast_identity",
                return_type: to,
                func: Rc::new(|args| args[0].to_owned_datum()),
            });
        }
        match (from.type_id, to.type_id) {
            (TypeId::Int32, TypeId::Int64) => Ok(FunctionInfo {
                name: "cast_i32_i64",
                return_type: to,
                func: Rc::new(|args| match args[0].as_i32() {
                    Some(v) => Datum::from_i64(v as i64),
                    None => Datum::Null,
                }),
            }),
            (TypeId::Int64, TypeId::Int32) => Ok(FunctionInfo {
                name: "cast_i64_i32",
                return_type: to,
                func: Rc::new(|args| match args[0].as_i64() {
                    Some(v) => Datum::from_i32(v as i32),
                    None => Datum::Null,
                }),
            }),
            _ => Err(DbError::schema(format!("no cast from {:?} to {:?}", from.type_id, to.type_id))),
        }
    }

    fn resolve_function(&self, function_id: &str, arg_types: &[FieldType]) -> DbResult<FunctionInfo> {
        match function_id {
            "abs" => {
                if arg_types.len() != 1 {
                    return Err(DbError::schema("abs takes exactly one argument"));
                }
                match arg_types[0].type_id {
                    TypeId::Int32 => Ok(FunctionInfo {
                        name: "abs_i32",
                        return_type: FieldType::int32(),
                        func: Rc::new(|args| match args[0].as_i32() {
                            Some(v) => Datum::from_i32(v.wrapping_abs()),
                            None => Datum::Null,
                        }),
                    }),
                    TypeId::Int64 => Ok(FunctionInfo {
                        name: "abs_i64",
                        return_type: FieldType::int64(),
                        func: Rc::new(|args| match args[0].as_i64() {
                            Some(v) => Datum::from_i64(v.wrapping_abs()),
                            None => Datum::Null,
                        }),
                    }),
                    other => Err(DbError::schema(format!("abs is not defined for {:?}", other))),
                }
            }
            "length" => {
                if arg_types.len() != 1 || arg_types[0].type_id != TypeId::Varchar {
                    return Err(DbError::schema("length takes exactly one varchar argument"));
                }
                Ok(FunctionInfo {
                    name: "length",
                    return_type: FieldType::int32(),
                    func: Rc::new(|args| match args[0].as_bytes() {
                        Some(b) => Datum::from_i32(b.len() as i32),
                        None => Datum::Null,
                    }),
                })
            }
            "concat" => {
                if arg_types.len() != 2 || arg_types.iter().any(|t| t.type_id != TypeId::Varchar) {
                    return Err(DbError::schema("concat takes exactly two varchar arguments"));
                }
                let max_len = arg_types[0].max_len.saturating_add(arg_types[1].max_len);
                Ok(FunctionInfo {
                    name: "concat",
                    return_type: FieldType::varchar(max_len),
                    func: Rc::new(|args| match (args[0].as_bytes(), args[1].as_bytes()) {
                        (Some(a), Some(b)) => {
                            let mut v = a.to_vec();
                            v.extend_from_slice(b);
                            Datum::from_bytes(v)
                        }
                        _ => Datum::Null,
                    }),
                })
            }
            other => Err(DbError::schema(format!("unknown function {:?}", other))),
        }
    }
}

fn arith_i32(op: BinaryOpcode) -> FunctionInfo {
    let (name, f): (&'static str, fn(i32, i32) -> i32) = match op {
        BinaryOpcode::Add => ("add_i32", |a, b| a.wrapping_add(b)),
        BinaryOpcode::Sub => ("sub_i32", |a, b| a.wrapping_sub(b)),
        BinaryOpcode::Mul => ("mul_i32", |a, b| a.wrapping_mul(b)),
        BinaryOpcode::Div => ("div_i32", |a, b| if b == 0 { 0 } else { a / b }),
        _ => unreachable!(),
    };
    FunctionInfo {
        name,
        return_type: FieldType::int32(),
        func: Rc::new(move |args| match (args[0].as_i32(), args[1].as_i32()) {
            (Some(a), Some(b)) => Datum::from_i32(f(a, b)),
            _ => Datum::Null,
        }),
    }
}

fn arith_i64(op: BinaryOpcode) -> FunctionInfo {
    let (name, f): (&'static str, fn(i64, i64) -> i64) = match op {
        BinaryOpcode::Add => ("add_i64", |a, b| a.wrapping_add(b)),
        BinaryOpcode::Sub => ("sub_i64", |a, b| a.wrapping_sub(b)),
        BinaryOpcode::Mul => ("mul_i64", |a, b| a.wrapping_mul(b)),
        BinaryOpcode::Div => ("div_i64", |a, b| if b == 0 { 0 } else { a / b }),
        _ => unreachable!(),
    };
    FunctionInfo {
        name,
        return_type: FieldType::int64(),
        func: Rc::new(move |args| match (args[0].as_i64(), args[1].as_i64()) {
            (Some(a), Some(b)) => Datum::from_i64(f(a, b)),
            _ => Datum::Null,
        }),
    }
}

fn cmp_fn(op: BinaryOpcode) -> FunctionInfo {
    let name = match op {
        BinaryOpcode::Eq => "eq",
        BinaryOpcode::Ne => "ne",
        BinaryOpcode::Lt => "lt",
        BinaryOpcode::Le => "le",
        BinaryOpcode::Gt => "gt",
        BinaryOpcode::Ge => "ge",
        _ => unreachable!(),
    };
    FunctionInfo {
        name,
        return_type: FieldType::boolean(),
        func: Rc::new(move |args| {
            if args[0].is_null() || args[1].is_null() {
                return Datum::Null;
            }
            let eq = datum_eq(&args[0], &args[1]);
            let lt = datum_lt(&args[0], &args[1]);
            let result = match op {
                BinaryOpcode::Eq => eq,
                BinaryOpcode::Ne => !eq,
                BinaryOpcode::Lt => lt,
                BinaryOpcode::Le => eq || lt,
                BinaryOpcode::Gt => !eq && !lt,
                BinaryOpcode::Ge => !lt,
                _ => unreachable!(),
            };
            Datum::from_bool(result)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_binary_rejects_mismatched_types() {
        let catalog = BuiltinCatalog;
        let err = catalog.resolve_binary(BinaryOpcode::Add, FieldType::int32(), FieldType::int64());
        assert!(err.is_err());
    }

    #[test]
    fn add_i32_function_computes_sum() {
        let catalog = BuiltinCatalog;
        let info = catalog.resolve_binary(BinaryOpcode::Add, FieldType::int32(), FieldType::int32()).unwrap();
        let a = Datum::from_i32(3);
        let b = Datum::from_i32(4);
        assert_eq!(info.call(&[a.as_ref(), b.as_ref()]).as_i32(), Some(7));
    }

    #[test]
    fn comparison_propagates_null() {
        let catalog = BuiltinCatalog;
        let info = catalog.resolve_binary(BinaryOpcode::Eq, FieldType::int32(), FieldType::int32()).unwrap();
        assert!(info.call(&[Datum::Null.as_ref(), Datum::from_i32(1).as_ref()]).is_null());
    }
}
