//! Crate-wide error type.
//!
//! The teacher prototype grew two near-identical error structs
//! (`SimpleError` in `src/error.rs`, `SmallError` in the orphaned
//! `btree/table/*` files) as the storage layer and the executor were
//! built up independently. This collapses both into one variant-carrying
//! enum so every subsystem returns the same `DbResult<T>`.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum DbError {
    /// A programming-contract violation: unpinning an unpinned frame,
    /// pinning when every frame is pinned, corrupt on-disk metadata,
    /// calling an operator method out of its allowed state sequence.
    /// Unrecoverable within this database instance.
    Fatal(String),
    /// An OS-level I/O failure, tagged with whatever file/page context
    /// was available at the call site.
    Io(String, io::Error),
    /// A construction-time type or arity mismatch (expression/plan
    /// factories, schema descriptors).
    Schema(String),
    /// Calling an operator out of protocol: `get_record` before the
    /// first successful `next_tuple`, `rewind(pos)` with a position this
    /// operator never produced, `rewind(pos)` on a non-rewindable
    /// operator.
    Precondition(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn fatal<S: Into<String>>(msg: S) -> DbError {
        DbError::Fatal(msg.into())
    }

    pub fn schema<S: Into<String>>(msg: S) -> DbError {
        DbError::Schema(msg.into())
    }

    pub fn precondition<S: Into<String>>(msg: S) -> DbError {
        DbError::Precondition(msg.into())
    }

    pub fn io<S: Into<String>>(context: S, err: io::Error) -> DbError {
        DbError::Io(context.into(), err)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DbError::Fatal(msg) => write!(f, "fatal: {}", msg),
            DbError::Io(ctx, err) => write!(f, "io error ({}): {}", ctx, err),
            DbError::Schema(msg) => write!(f, "schema error: {}", msg),
            DbError::Precondition(msg) => write!(f, "precondition violated: {}", msg),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Io(_, err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io(String::new(), err)
    }
}
