pub mod btree;
pub mod key;

pub use btree::{BTree, BTreeRangeIter, IndexDescriptor, IndexHandle};
pub use key::{datum_eq, datum_lt, tuple_compare, tuple_equal, IndexKey};
