pub mod external_sort;

pub use external_sort::{ExternalSort, SortOutput};
