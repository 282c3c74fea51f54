//! Schema-driven tuple (de)serialization (spec.md section 3 "Record").
//!
//! Layout of a serialized record:
//! `[null-bitmap][fixed-field slots in schema order][variable-field bytes]`
//! Variable fields reserve a fixed-size `(offset: u16, length: u16)`
//! slot among the "fixed" slots, pointing into the trailing area; this
//! mirrors the teacher's `TupleScheme`/`FieldItem` pair generalized from
//! its single `INT` type to fixed- and variable-width fields per
//! spec.md's "alignment, byref flag, length" per-field descriptor.

use super::datum::{Datum, DatumRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeId {
    Bool,
    Int32,
    Int64,
    Varchar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldType {
    pub type_id: TypeId,
    /// For `Varchar`, the maximum byte length a value may take; ignored
    /// for fixed-width types.
    pub max_len: u16,
}

impl FieldType {
    pub const fn int32() -> Self {
        FieldType {
            type_id: TypeId::Int32,
            max_len: 0,
        }
    }
    pub const fn int64() -> Self {
        FieldType {
            type_id: TypeId::Int64,
            max_len: 0,
        }
    }
    pub const fn boolean() -> Self {
        FieldType {
            type_id: TypeId::Bool,
            max_len: 0,
        }
    }
    pub const fn varchar(max_len: u16) -> Self {
        FieldType {
            type_id: TypeId::Varchar,
            max_len,
        }
    }

    pub fn is_byref(&self) -> bool {
        self.type_id == TypeId::Varchar
    }

    /// `None` for byref types: they occupy a fixed `(offset, length)`
    /// pointer slot inline but their payload lives in the variable area.
    pub fn fixed_width(&self) -> Option<usize> {
        match self.type_id {
            TypeId::Bool => Some(1),
            TypeId::Int32 => Some(4),
            TypeId::Int64 => Some(8),
            TypeId::Varchar => None,
        }
    }

    /// Width of the inline slot, whether it holds the value itself or a
    /// pointer into the variable area.
    fn inline_width(&self) -> usize {
        self.fixed_width().unwrap_or(4) // (u16 offset, u16 length)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType, nullable: bool) -> Self {
        Field {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn bitmap_bytes(&self) -> usize {
        (self.fields.len() + 7) / 8
    }

    fn fixed_area_len(&self) -> usize {
        self.fields.iter().map(|f| f.ty.inline_width()).sum()
    }

    fn fixed_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut pos = self.bitmap_bytes();
        for f in &self.fields {
            offsets.push(pos);
            pos += f.ty.inline_width();
        }
        offsets
    }

    /// Serializes `values` (one per field, in schema order) into a byte
    /// payload. Panics (a schema mismatch is a construction-time bug,
    /// not a runtime condition) if the value count disagrees with the
    /// field count.
    pub fn write_payload(&self, values: &[Datum]) -> Vec<u8> {
        assert_eq!(values.len(), self.fields.len(), "value/field count mismatch");

        let bitmap_len = self.bitmap_bytes();
        let fixed_len = self.fixed_area_len();
        let offsets = self.fixed_offsets();

        let mut var_bytes: Vec<u8> = Vec::new();
        let mut var_slots: Vec<(u16, u16)> = vec![(0, 0); self.fields.len()];

        for (i, (field, value)) in self.fields.iter().zip(values).enumerate() {
            if field.ty.is_byref() && !value.is_null() {
                let bytes = value.as_bytes().unwrap_or(&[]);
                let start = var_bytes.len() as u16;
                var_bytes.extend_from_slice(bytes);
                var_slots[i] = (start, bytes.len() as u16);
            }
        }

        let mut out = vec![0u8; bitmap_len + fixed_len];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                out[i / 8] |= 1 << (i % 8);
            }
        }

        for (i, (field, value)) in self.fields.iter().zip(values).enumerate() {
            let off = offsets[i];
            if field.ty.is_byref() {
                let (var_off, var_len) = var_slots[i];
                out[off..off + 2].copy_from_slice(&var_off.to_be_bytes());
                out[off + 2..off + 4].copy_from_slice(&var_len.to_be_bytes());
            } else if !value.is_null() {
                let width = field.ty.fixed_width().unwrap();
                if let Datum::Fixed { bits, .. } = value {
                    let be = bits.to_be_bytes();
                    out[off..off + width].copy_from_slice(&be[8 - width..]);
                }
            }
        }

        out.extend_from_slice(&var_bytes);
        out
    }

    /// Inverse of `write_payload`: `dissemble_payload(write_payload(v)) == v`.
    pub fn dissemble_payload(&self, bytes: &[u8]) -> Vec<Datum> {
        let bitmap_len = self.bitmap_bytes();
        let fixed_len = self.fixed_area_len();
        let offsets = self.fixed_offsets();
        let var_area = &bytes[bitmap_len + fixed_len..];

        let mut values = Vec::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            let is_null = (bytes[i / 8] & (1 << (i % 8))) != 0;
            if is_null {
                values.push(Datum::Null);
                continue;
            }
            let off = offsets[i];
            if field.ty.is_byref() {
                let var_off = u16::from_be_bytes([bytes[off], bytes[off + 1]]) as usize;
                let var_len = u16::from_be_bytes([bytes[off + 2], bytes[off + 3]]) as usize;
                values.push(Datum::from_bytes(var_area[var_off..var_off + var_len].to_vec()));
            } else {
                let width = field.ty.fixed_width().unwrap();
                let mut be = [0u8; 8];
                be[8 - width..].copy_from_slice(&bytes[off..off + width]);
                values.push(Datum::Fixed {
                    width: width as u8,
                    bits: u64::from_be_bytes(be),
                });
            }
        }
        values
    }

    /// Reads a single field directly out of a serialized payload without
    /// deserializing the whole tuple, used by index key extraction and
    /// `Expr::Variable`.
    pub fn read_field<'a>(&self, bytes: &'a [u8], field_id: usize) -> DatumRef<'a> {
        let is_null = (bytes[field_id / 8] & (1 << (field_id % 8))) != 0;
        if is_null {
            return DatumRef::Null;
        }
        let offsets = self.fixed_offsets();
        let bitmap_len = self.bitmap_bytes();
        let fixed_len = self.fixed_area_len();
        let field = &self.fields[field_id];
        let off = offsets[field_id];
        if field.ty.is_byref() {
            let var_off = u16::from_be_bytes([bytes[off], bytes[off + 1]]) as usize;
            let var_len = u16::from_be_bytes([bytes[off + 2], bytes[off + 3]]) as usize;
            let var_area = &bytes[bitmap_len + fixed_len..];
            DatumRef::Var(std::borrow::Cow::Borrowed(&var_area[var_off..var_off + var_len]))
        } else {
            let width = field.ty.fixed_width().unwrap();
            let mut be = [0u8; 8];
            be[8 - width..].copy_from_slice(&bytes[off..off + width]);
            DatumRef::Fixed {
                width: width as u8,
                bits: u64::from_be_bytes(be),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("f0", FieldType::int32(), false),
            Field::new("f1", FieldType::varchar(32), true),
        ])
    }

    #[test]
    fn write_then_dissemble_roundtrips() {
        let schema = test_schema();
        let values = vec![Datum::from_i32(42), Datum::from_bytes(b"hello".to_vec())];
        let bytes = schema.write_payload(&values);
        assert_eq!(schema.dissemble_payload(&bytes), values);
    }

    #[test]
    fn null_varchar_roundtrips() {
        let schema = test_schema();
        let values = vec![Datum::from_i32(1), Datum::Null];
        let bytes = schema.write_payload(&values);
        assert_eq!(schema.dissemble_payload(&bytes), values);
    }

    #[test]
    fn read_field_matches_dissemble() {
        let schema = test_schema();
        let values = vec![Datum::from_i32(7), Datum::from_bytes(b"x".to_vec())];
        let bytes = schema.write_payload(&values);
        assert_eq!(schema.read_field(&bytes, 0).as_i32(), Some(7));
        assert_eq!(schema.read_field(&bytes, 1).as_bytes(), Some(&b"x"[..]));
    }
}
