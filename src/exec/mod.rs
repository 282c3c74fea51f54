//! Iterator-model ("Volcano") query execution operators (spec.md
//! section 4.8): `init`/`next_tuple`/`get_record`/`close`, plus
//! `rewind`/`save_position`/`rewind_to` for cursor save-restore.
//!
//! Every operator implements the same `Operator` trait, including
//! `TableInsert`/`TableDelete`, which report `DbError::fatal` from the
//! position-related methods instead of the spec's narrower "fatal only
//! on `rewind(pos)`" — a naive `rewind()` on either would re-run a
//! side-effecting write, which is never sound, so both reject the whole
//! family of resume operations rather than just the opaque-position one.

pub mod aggregation;
pub mod index_nested_loop;
pub mod index_scan;
pub mod limit;
pub mod merge_join;
pub mod projection;
pub mod selection;
pub mod sort;
pub mod table_delete;
pub mod table_insert;
pub mod table_scan;
pub mod temp_table;

pub use aggregation::{AggregateKind, AggregateSpec, Aggregation};
pub use index_nested_loop::IndexNestedLoop;
pub use index_scan::IndexScan;
pub use limit::Limit;
pub use merge_join::MergeJoin;
pub use projection::Projection;
pub use selection::Selection;
pub use sort::Sort;
pub use table_delete::TableDelete;
pub use table_insert::{IndexBinding, TableInsert};
pub use table_scan::TableScan;
pub use temp_table::TempTable;

use crate::common::ids::{PageNumber, SlotId};
use crate::common::datum::Datum;
use crate::error::{DbError, DbResult};

/// An opaque cursor bookmark. Each operator chooses its own encoding;
/// nothing outside the operator that produced it interprets the bytes
/// (spec.md section 9's "Design Notes" recommends exactly this over a
/// shared tagged enum).
pub type Position = Vec<u8>;

pub trait Operator {
    fn init(&mut self) -> DbResult<()>;

    /// Advances to the next tuple. The current tuple is observable via
    /// `get_record()` until the next call to `next_tuple()`, `close()`,
    /// or a successful `rewind`/`rewind_to`. Once `false` is returned,
    /// later calls also return `false` until a rewind.
    fn next_tuple(&mut self) -> DbResult<bool>;

    fn get_record(&self) -> DbResult<&[Datum]>;

    fn close(&mut self) -> DbResult<()>;

    /// Equivalent in effect to `close()` followed by `init()`.
    fn rewind(&mut self) -> DbResult<()>;

    fn save_position(&self) -> DbResult<Position>;

    /// Restores a cursor saved by `save_position`, such that the very
    /// next `get_record()` (no intervening `next_tuple()` required)
    /// returns the same logical record. `false` means the position
    /// names "before first" or "after last" rather than a live tuple;
    /// that is a normal outcome, not an error.
    fn rewind_to(&mut self, pos: &Position) -> DbResult<bool>;
}

pub(crate) fn encode_pn_slot(pn: PageNumber, slot: SlotId) -> Position {
    let mut v = Vec::with_capacity(6);
    v.extend_from_slice(&pn.to_be_bytes());
    v.extend_from_slice(&slot.to_be_bytes());
    v
}

pub(crate) fn decode_pn_slot(pos: &Position) -> DbResult<(PageNumber, SlotId)> {
    if pos.len() != 6 {
        return Err(DbError::precondition("malformed page/slot position"));
    }
    let pn = u32::from_be_bytes(pos[0..4].try_into().unwrap());
    let slot = u16::from_be_bytes(pos[4..6].try_into().unwrap());
    Ok((pn, slot))
}

pub(crate) fn encode_u64(v: u64) -> Position {
    v.to_be_bytes().to_vec()
}

pub(crate) fn decode_u64(pos: &Position) -> DbResult<u64> {
    let arr: [u8; 8] = pos
        .as_slice()
        .try_into()
        .map_err(|_| DbError::precondition("malformed position"))?;
    Ok(u64::from_be_bytes(arr))
}

pub(crate) fn encode_i64(v: i64) -> Position {
    v.to_be_bytes().to_vec()
}

pub(crate) fn decode_i64(pos: &Position) -> DbResult<i64> {
    let arr: [u8; 8] = pos
        .as_slice()
        .try_into()
        .map_err(|_| DbError::precondition("malformed position"))?;
    Ok(i64::from_be_bytes(arr))
}

/// Length-prefixed concatenation, for operators whose position is made
/// of several independently-opaque sub-positions (`Limit`, `MergeJoin`,
/// `IndexNestedLoop`).
pub(crate) fn encode_composite(parts: &[Position]) -> Position {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(&(p.len() as u32).to_be_bytes());
        out.extend_from_slice(p);
    }
    out
}

pub(crate) fn decode_composite(pos: &Position) -> DbResult<Vec<Position>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < pos.len() {
        if i + 4 > pos.len() {
            return Err(DbError::precondition("malformed composite position"));
        }
        let len = u32::from_be_bytes(pos[i..i + 4].try_into().unwrap()) as usize;
        i += 4;
        if i + len > pos.len() {
            return Err(DbError::precondition("malformed composite position"));
        }
        out.push(pos[i..i + len].to_vec());
        i += len;
    }
    Ok(out)
}

fn not_rewindable(what: &str) -> DbError {
    DbError::fatal(format!("{} does not support rewind", what))
}

pub(crate) use not_rewindable as fatal_not_rewindable;
