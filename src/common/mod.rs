pub mod datum;
pub mod ids;
pub mod schema;

pub use datum::{Datum, DatumRef, NullableDatumRef};
pub use ids::{PageNumber, RecordId, SlotId, INVALID_PID, INVALID_SID, MIN_SLOT_ID, RESERVED_PID};
pub use schema::{Field, FieldType, Schema, TypeId};
