//! Tagged value type shared by tuples, index keys, and expression
//! evaluation (spec.md section 3 "Datum").

use std::borrow::Cow;

/// An owned, possibly-null scalar or variable-length value.
///
/// `Fixed` covers the widths spec.md names (1/2/4/8 bytes); the bit
/// pattern is stored little-endian in a `u64` and reinterpreted by width
/// at comparison/cast time, the same trick the teacher's `IntField`
/// uses for its single width, generalized to four.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Fixed { width: u8, bits: u64 },
    Var(Vec<u8>),
}

impl Datum {
    pub fn from_i32(v: i32) -> Self {
        Datum::Fixed {
            width: 4,
            bits: (v as u32) as u64,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        Datum::Fixed {
            width: 8,
            bits: v as u64,
        }
    }

    pub fn from_bool(v: bool) -> Self {
        Datum::Fixed {
            width: 1,
            bits: v as u64,
        }
    }

    pub fn from_bytes(v: Vec<u8>) -> Self {
        Datum::Var(v)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Datum::Fixed { width: 4, bits } => Some(*bits as u32 as i32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Fixed { width: 8, bits } => Some(*bits as i64),
            Datum::Fixed { width: 4, bits } => Some(*bits as u32 as i32 as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Fixed { width: 1, bits } => Some(*bits != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Var(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Cheap reference form: no copy for fixed-width values, a borrow
    /// for variable-length ones.
    pub fn as_ref(&self) -> DatumRef<'_> {
        match self {
            Datum::Null => DatumRef::Null,
            Datum::Fixed { width, bits } => DatumRef::Fixed {
                width: *width,
                bits: *bits,
            },
            Datum::Var(v) => DatumRef::Var(Cow::Borrowed(v.as_slice())),
        }
    }
}

/// A non-owning (or cheaply-owning, for bytes assembled on the fly)
/// view of a `Datum`. Doubles as `NullableDatumRef`: `Null` is just
/// another variant, so evaluators never juggle a separate `Option`
/// wrapper on top of this type.
#[derive(Clone, Debug)]
pub enum DatumRef<'a> {
    Null,
    Fixed { width: u8, bits: u64 },
    Var(Cow<'a, [u8]>),
}

pub type NullableDatumRef<'a> = DatumRef<'a>;

impl<'a> DatumRef<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, DatumRef::Null)
    }

    pub fn to_owned_datum(&self) -> Datum {
        match self {
            DatumRef::Null => Datum::Null,
            DatumRef::Fixed { width, bits } => Datum::Fixed {
                width: *width,
                bits: *bits,
            },
            DatumRef::Var(v) => Datum::Var(v.clone().into_owned()),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            DatumRef::Fixed { width: 4, bits } => Some(*bits as u32 as i32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatumRef::Fixed { width: 8, bits } => Some(*bits as i64),
            DatumRef::Fixed { width: 4, bits } => Some(*bits as u32 as i32 as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatumRef::Fixed { width: 1, bits } => Some(*bits != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatumRef::Var(v) => Some(v.as_ref()),
            _ => None,
        }
    }
}

impl<'a> PartialEq for DatumRef<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DatumRef::Null, DatumRef::Null) => true,
            (DatumRef::Fixed { width: w1, bits: b1 }, DatumRef::Fixed { width: w2, bits: b2 }) => {
                w1 == w2 && b1 == b2
            }
            (DatumRef::Var(a), DatumRef::Var(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_ref() {
        let d = Datum::from_i32(-7);
        assert_eq!(d.as_ref().to_owned_datum(), d);

        let d = Datum::from_bytes(b"hello".to_vec());
        assert_eq!(d.as_ref().to_owned_datum(), d);

        assert!(Datum::Null.as_ref().is_null());
    }
}
