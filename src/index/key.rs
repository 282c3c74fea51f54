//! Index keys and schema-driven lexicographic tuple comparison
//! (spec.md section 4.4).
//!
//! spec.md describes `IndexKey` as a hand-packed
//! `(field-count, null-bitmap, padding, array of DatumRef)` buffer built
//! in a caller-supplied aligned allocation. That packing exists in the
//! original C++ to avoid an allocation per comparison; in Rust a plain
//! `Vec<Datum>` gives the same logical shape (field count is the
//! length, nulls are `Datum::Null`, deep copy is `Clone`) without manual
//! alignment arithmetic, so that's what `IndexKey` is here — see
//! DESIGN.md.

use std::cmp::Ordering;

use crate::common::datum::{Datum, DatumRef};
use crate::common::schema::Schema;

/// An index key, possibly a prefix of the index's full key schema.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexKey {
    pub values: Vec<Datum>,
}

impl IndexKey {
    pub fn new(values: Vec<Datum>) -> Self {
        IndexKey { values }
    }

    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_prefix_of(&self, full_field_count: usize) -> bool {
        self.values.len() < full_field_count
    }
}

/// Per-column `<`/`=` comparisons. The full scalar function registry
/// (spec.md section 1's "built-in scalar/type/function registry") is an
/// out-of-scope external collaborator; this supplies the same call
/// shape directly for the kernel's built-in column types so the B+Tree
/// and tuple comparator have something concrete to call in tests.
pub fn datum_eq(a: &DatumRef, b: &DatumRef) -> bool {
    match (a, b) {
        (DatumRef::Fixed { bits: b1, .. }, DatumRef::Fixed { bits: b2, .. }) => b1 == b2,
        (DatumRef::Var(x), DatumRef::Var(y)) => x == y,
        _ => false,
    }
}

/// Only meaningful once `datum_eq` has returned `false`; signed
/// interpretation for fixed-width values (matching `Datum`'s stored bit
/// widths), byte-lexicographic for variable-length values.
pub fn datum_lt(a: &DatumRef, b: &DatumRef) -> bool {
    match (a, b) {
        (DatumRef::Fixed { width, bits: b1 }, DatumRef::Fixed { bits: b2, .. }) => {
            sign_extend(*b1, *width) < sign_extend(*b2, *width)
        }
        (DatumRef::Var(x), DatumRef::Var(y)) => x.as_ref() < y.as_ref(),
        _ => false,
    }
}

fn sign_extend(bits: u64, width: u8) -> i64 {
    match width {
        1 => bits as u8 as i8 as i64,
        2 => bits as u16 as i16 as i64,
        4 => bits as u32 as i32 as i64,
        _ => bits as i64,
    }
}

/// Lexicographic comparison of `key` against the fields of a serialized
/// tuple, field 0 upward. Two nulls compare equal; null is smaller than
/// non-null. If `key` has fewer fields than `schema`, comparison stops
/// after the shared prefix and reports `Equal` — callers that want
/// "prefix < full key" (the B+Tree) apply that convention themselves
/// (spec.md section 4.4).
pub fn tuple_compare(key: &[Datum], schema: &Schema, tuple_bytes: &[u8]) -> Ordering {
    let n = key.len().min(schema.field_count());
    for i in 0..n {
        let k = key[i].as_ref();
        let t = schema.read_field(tuple_bytes, i);
        match (k.is_null(), t.is_null()) {
            (true, true) => continue,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {
                if datum_eq(&k, &t) {
                    continue;
                }
                return if datum_lt(&k, &t) { Ordering::Less } else { Ordering::Greater };
            }
        }
    }
    Ordering::Equal
}

/// Whole-key equality (not tied to a tuple schema): used by unique-index
/// duplicate detection.
pub fn tuple_equal(a: &[Datum], b: &[Datum]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(x, y)| match (x.is_null(), y.is_null()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => datum_eq(&x.as_ref(), &y.as_ref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("f0", FieldType::int32(), false)])
    }

    #[test]
    fn null_is_smaller_than_non_null() {
        let schema = schema();
        let tuple = schema.write_payload(&[Datum::from_i32(5)]);
        assert_eq!(tuple_compare(&[Datum::Null], &schema, &tuple), Ordering::Less);
    }

    #[test]
    fn prefix_key_compares_equal_on_shared_fields() {
        let schema = Schema::new(vec![
            Field::new("f0", FieldType::int32(), false),
            Field::new("f1", FieldType::int32(), false),
        ]);
        let tuple = schema.write_payload(&[Datum::from_i32(3), Datum::from_i32(99)]);
        assert_eq!(tuple_compare(&[Datum::from_i32(3)], &schema, &tuple), Ordering::Equal);
    }

    #[test]
    fn tuple_equal_treats_null_equals_null_as_equal() {
        assert!(tuple_equal(&[Datum::Null], &[Datum::Null]));
        // documented distinction: tuple_equal treats NULL==NULL as equal
        // (used for whole-key equality); uniqueness enforcement at the
        // B+Tree layer special-cases NULL separately instead of relying
        // on this function.
        assert!(tuple_equal(&[Datum::from_i32(1)], &[Datum::from_i32(1)]));
        assert!(!tuple_equal(&[Datum::from_i32(1)], &[Datum::from_i32(2)]));
    }
}
