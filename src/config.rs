//! Typed configuration surface for the constants the kernel is
//! parameterized by. There is no parsed file format here: the CLI and
//! init tooling that would produce a `DbConfig` are out of scope (see
//! `spec.md` section 1), so callers build one directly, the way the
//! teacher crate's tests build a `BTreeTable`/`BufferPool` with literal
//! sizes rather than reading a config file.

#[derive(Clone, Copy, Debug)]
pub struct DbConfig {
    /// Size in bytes of every page, including the 16-byte page header.
    pub page_size: usize,
    /// Number of frames in the buffer pool.
    pub buffer_pool_frames: usize,
    /// Number of pages per physical on-disk page group / backing file.
    pub pages_per_group: u32,
    /// External sort merge fan-in (`N` in spec section 4.6).
    pub merge_ways: usize,
    /// Minimum fraction of a non-root B+Tree page's user area that must
    /// stay occupied outside of an in-progress mutation.
    pub min_page_usage: f64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            page_size: 4096,
            buffer_pool_frames: 64,
            pages_per_group: 64,
            merge_ways: 8,
            min_page_usage: 0.4,
        }
    }
}

impl DbConfig {
    pub fn small_for_tests() -> Self {
        DbConfig {
            page_size: 4096,
            buffer_pool_frames: 8,
            pages_per_group: 8,
            merge_ways: 4,
            min_page_usage: 0.4,
        }
    }
}
