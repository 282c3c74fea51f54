//! Persistent B+Tree secondary index (spec.md section 4.5).
//!
//! Tree pages are slotted pages (shared code with `storage::slotted_page`)
//! whose page-header flags carry leaf/root bits and whose `prev_pid`/
//! `next_pid` thread the leaf-level sibling list — the same header
//! fields `storage::file_manager` uses for its page chains, reused here
//! for a tree shape instead of a sequential one. Grounded on the
//! teacher's orphaned `src/btree/page/leaf_page.rs` (sibling pointers,
//! root/leaf flags in the page header) and `src/btree/table/insert.rs`
//! (split-then-propagate-upward structure), reworked because those
//! files reference types (`SmallError`, `Transaction`, `HandyRwLock`)
//! that do not exist elsewhere in the teacher tree — see DESIGN.md.
//!
//! Record layout on a page:
//! - leaf: `key_bytes ++ rid.page_number(4) ++ rid.slot_id(2)`
//! - internal: `key_bytes ++ rid.page_number(4) ++ rid.slot_id(2) ++ child_pid(4)`
//!   (an internal record's leading `key+rid` is byte-identical in shape
//!   to a leaf record, so `btree_tuple_compare` serves both). Slot 0 of
//!   every internal page is a sentinel with an empty `key_bytes` and an
//!   unused rid, standing for "smaller than anything".
//!
//! Page mutation is done by reading every live record off the page into
//! a `Vec<Vec<u8>>`, editing that vector, and rewriting the whole page
//! from it (`rebuild_page`) rather than shifting slot bytes in place.
//! Simpler to get right than in-place slot-shift arithmetic, at the cost
//! of an O(page record count) rebuild per mutation — acceptable for a
//! teaching kernel's page sizes.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::common::datum::Datum;
use crate::common::ids::{PageNumber, RecordId, INVALID_PID};
use crate::common::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::index::key;
use crate::storage::buffer_manager::{BufferId, BufferManagerHandle, ScopedPin};
use crate::storage::file_manager::FileManager;
use crate::storage::page::{PageHeader, FLAG_META_PAGE, FLAG_VFILE_PAGE, PAGE_HEADER_SIZE};
use crate::storage::slotted_page::SlottedPage;

const BTREE_META_MAGIC: u64 = 0xb7ee_1dea_5eed_0001;
const BTREE_LEAF: u16 = 0b0100;
const BTREE_ROOT: u16 = 0b1000;
const RID_BYTES: usize = 6;
const CHILD_BYTES: usize = 4;

/// What a column contributes to the index: its type and whether the
/// index enforces uniqueness. The `<`/`=` function ids spec.md's
/// descriptor names are resolved by the (out-of-scope) scalar function
/// registry; `key::datum_lt`/`key::datum_eq` stand in for that
/// resolution here (see DESIGN.md).
#[derive(Clone, Debug)]
pub struct IndexDescriptor {
    pub key_schema: Schema,
    pub unique: bool,
}

#[derive(Clone, Copy, Debug)]
struct BTreeMeta {
    root_pid: PageNumber,
}

pub struct BTree {
    fm: Rc<FileManager>,
    bufman: BufferManagerHandle,
    file_id: u32,
    meta_pid: PageNumber,
    desc: IndexDescriptor,
    min_page_usage: f64,
}

pub type IndexHandle = Rc<BTree>;

impl BTree {
    pub fn initialize(
        fm: Rc<FileManager>,
        bufman: BufferManagerHandle,
        desc: IndexDescriptor,
        min_page_usage: f64,
    ) -> DbResult<IndexHandle> {
        let (file_id, meta_pid) = fm.create_index_file()?;
        let root_pid = fm.allocate_tagged_page(file_id)?;

        let id = bufman.borrow_mut().pin_page(root_pid)?;
        {
            let mut bm = bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            SlottedPage::initialize(&mut body[PAGE_HEADER_SIZE..]);
            let mut header = PageHeader::empty();
            header.flags = FLAG_VFILE_PAGE | BTREE_LEAF | BTREE_ROOT;
            header.file_id = file_id;
            header.write_to(body);
            bm.mark_dirty(id)?;
        }
        bufman.borrow_mut().unpin_page(id)?;

        let tree = BTree {
            fm,
            bufman,
            file_id,
            meta_pid,
            desc,
            min_page_usage,
        };
        tree.write_meta(&BTreeMeta { root_pid })?;
        Ok(Rc::new(tree))
    }

    pub fn open(
        fm: Rc<FileManager>,
        bufman: BufferManagerHandle,
        file_id: u32,
        desc: IndexDescriptor,
        min_page_usage: f64,
    ) -> DbResult<IndexHandle> {
        let meta_pid = fm.open_index_file(file_id)?;
        let tree = BTree {
            fm,
            bufman,
            file_id,
            meta_pid,
            desc,
            min_page_usage,
        };
        tree.read_meta()?; // validates the magic eagerly
        Ok(Rc::new(tree))
    }

    /// Builds a tree directly from `pairs`, which must already be sorted
    /// by `(key, rid)` per `btree_tuple_compare` (unlike `insert`, bulk
    /// load does not sort its input and does not check for duplicates).
    /// Leaf pages are packed greedily until full rather than
    /// split-balanced, then the internal levels above them are built
    /// directly from the leaf boundaries, one level at a time, until a
    /// single root page remains.
    pub fn bulk_load(
        fm: Rc<FileManager>,
        bufman: BufferManagerHandle,
        desc: IndexDescriptor,
        min_page_usage: f64,
        pairs: impl IntoIterator<Item = (Vec<Datum>, RecordId)>,
    ) -> DbResult<IndexHandle> {
        let (file_id, meta_pid) = fm.create_index_file()?;
        let tree = BTree {
            fm: Rc::clone(&fm),
            bufman: Rc::clone(&bufman),
            file_id,
            meta_pid,
            desc,
            min_page_usage,
        };
        let capacity = tree.page_capacity();

        let mut leaf_pages: Vec<(PageNumber, Vec<Vec<u8>>)> = Vec::new();
        let mut current: Vec<Vec<u8>> = Vec::new();
        for (key, rid) in pairs {
            let rec = Self::encode_leaf_record(&tree.desc.key_schema, &key, rid);
            let mut candidate = current.clone();
            candidate.push(rec.clone());
            let mut scratch = vec![0u8; capacity];
            if Self::rebuild_page(&mut scratch, &candidate) {
                current = candidate;
            } else {
                if current.is_empty() {
                    return Err(DbError::fatal("bulk load record does not fit on an empty page"));
                }
                let pn = fm.allocate_tagged_page(file_id)?;
                leaf_pages.push((pn, current));
                current = vec![rec];
            }
        }
        let last_pn = fm.allocate_tagged_page(file_id)?;
        leaf_pages.push((last_pn, current));

        for (i, (pn, records)) in leaf_pages.iter().enumerate() {
            let id = bufman.borrow_mut().pin_page(*pn)?;
            {
                let mut bm = bufman.borrow_mut();
                let body = bm.get_buffer_mut(id)?;
                Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], records);
                let mut header = PageHeader::empty();
                header.flags = FLAG_VFILE_PAGE | BTREE_LEAF;
                header.file_id = file_id;
                header.prev_pid = if i > 0 { leaf_pages[i - 1].0 } else { INVALID_PID };
                header.next_pid = if i + 1 < leaf_pages.len() { leaf_pages[i + 1].0 } else { INVALID_PID };
                header.write_to(body);
                bm.mark_dirty(id)?;
            }
            bufman.borrow_mut().unpin_page(id)?;
        }
        log::info!("b+tree bulk load built {} leaf page(s) for file {}", leaf_pages.len(), file_id);

        if leaf_pages.len() == 1 {
            let (pn, _) = leaf_pages[0];
            let id = bufman.borrow_mut().pin_page(pn)?;
            {
                let mut bm = bufman.borrow_mut();
                let body = bm.get_buffer_mut(id)?;
                let mut header = PageHeader::read_from(body);
                header.flags |= BTREE_ROOT;
                header.write_to(body);
                bm.mark_dirty(id)?;
            }
            bufman.borrow_mut().unpin_page(id)?;
            tree.write_meta(&BTreeMeta { root_pid: pn })?;
            return Ok(Rc::new(tree));
        }

        let mut entries: Vec<(PageNumber, Option<(Vec<u8>, RecordId)>)> = Vec::with_capacity(leaf_pages.len());
        entries.push((leaf_pages[0].0, None));
        for (pn, records) in leaf_pages.iter().skip(1) {
            let first = records.first().expect("bulk load never produces an empty non-final leaf page");
            entries.push((*pn, Some((Self::leaf_key_bytes(first).to_vec(), Self::decode_rid_suffix(first)))));
        }

        let mut level = Self::pack_internal_level(&fm, &bufman, file_id, capacity, &entries)?;
        while level.len() > 1 {
            level = Self::pack_internal_level(&fm, &bufman, file_id, capacity, &level)?;
        }
        let root_pn = level[0].0;
        let id = bufman.borrow_mut().pin_page(root_pn)?;
        {
            let mut bm = bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            let mut header = PageHeader::read_from(body);
            header.flags |= BTREE_ROOT;
            header.write_to(body);
            bm.mark_dirty(id)?;
        }
        bufman.borrow_mut().unpin_page(id)?;
        tree.write_meta(&BTreeMeta { root_pid: root_pn })?;
        Ok(Rc::new(tree))
    }

    /// Packs `entries` (each a child page paired with the separator key
    /// that routes to it, `None` for the very first child overall) into
    /// as few parent pages as fit, writing each page directly and
    /// returning the next level's entries in the same shape so the
    /// caller can call this again to build the level above.
    fn pack_internal_level(
        fm: &Rc<FileManager>,
        bufman: &BufferManagerHandle,
        file_id: u32,
        capacity: usize,
        entries: &[(PageNumber, Option<(Vec<u8>, RecordId)>)],
    ) -> DbResult<Vec<(PageNumber, Option<(Vec<u8>, RecordId)>)>> {
        let mut next_level = Vec::new();
        let mut start = 0usize;
        while start < entries.len() {
            let mut records = vec![Self::encode_internal_record(&[], RecordId::new(0, 0), entries[start].0)];
            let mut end = start + 1;
            while end < entries.len() {
                let (key, rid) = entries[end].1.as_ref().expect("non-first bulk load entry always carries a separator");
                let rec = Self::encode_internal_record(key, *rid, entries[end].0);
                let mut candidate = records.clone();
                candidate.push(rec);
                let mut scratch = vec![0u8; capacity];
                if Self::rebuild_page(&mut scratch, &candidate) {
                    records = candidate;
                    end += 1;
                } else {
                    break;
                }
            }

            let pn = fm.allocate_tagged_page(file_id)?;
            let id = bufman.borrow_mut().pin_page(pn)?;
            {
                let mut bm = bufman.borrow_mut();
                let body = bm.get_buffer_mut(id)?;
                Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &records);
                let mut header = PageHeader::empty();
                header.flags = FLAG_VFILE_PAGE;
                header.file_id = file_id;
                header.write_to(body);
                bm.mark_dirty(id)?;
            }
            bufman.borrow_mut().unpin_page(id)?;

            let separator = if start == 0 { None } else { entries[start].1.clone() };
            next_level.push((pn, separator));
            start = end;
        }
        Ok(next_level)
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    fn page_capacity(&self) -> usize {
        self.fm.page_size() - PAGE_HEADER_SIZE
    }

    fn read_meta(&self) -> DbResult<BTreeMeta> {
        let page = self.fm.read_raw_page(self.meta_pid)?;
        let b = page.body();
        let magic = u64::from_be_bytes(b[0..8].try_into().unwrap());
        if magic != BTREE_META_MAGIC {
            return Err(DbError::fatal("corrupt b+tree meta page: bad magic"));
        }
        Ok(BTreeMeta {
            root_pid: u32::from_be_bytes(b[8..12].try_into().unwrap()),
        })
    }

    fn write_meta(&self, meta: &BTreeMeta) -> DbResult<()> {
        let mut page = self.fm.read_raw_page(self.meta_pid)?;
        let mut header = PageHeader::empty();
        header.flags = FLAG_META_PAGE | FLAG_VFILE_PAGE;
        header.file_id = self.file_id;
        page.set_header(&header);
        let b = page.body_mut();
        b[0..8].copy_from_slice(&BTREE_META_MAGIC.to_be_bytes());
        b[8..12].copy_from_slice(&meta.root_pid.to_be_bytes());
        self.fm.write_raw_page(&page)
    }

    // ---- record encode/decode --------------------------------------

    fn encode_leaf_record(schema: &Schema, key: &[Datum], rid: RecordId) -> Vec<u8> {
        let mut v = schema.write_payload(key);
        v.extend_from_slice(&rid.page_number.to_be_bytes());
        v.extend_from_slice(&rid.slot_id.to_be_bytes());
        v
    }

    fn encode_internal_record(key_bytes: &[u8], rid: RecordId, child: PageNumber) -> Vec<u8> {
        let mut v = key_bytes.to_vec();
        v.extend_from_slice(&rid.page_number.to_be_bytes());
        v.extend_from_slice(&rid.slot_id.to_be_bytes());
        v.extend_from_slice(&child.to_be_bytes());
        v
    }

    fn leaf_key_bytes(rec: &[u8]) -> &[u8] {
        &rec[..rec.len() - RID_BYTES]
    }

    fn internal_key_bytes(rec: &[u8]) -> &[u8] {
        &rec[..rec.len() - RID_BYTES - CHILD_BYTES]
    }

    /// An internal record's leading `key+rid` bytes, identical in shape
    /// to a leaf record.
    fn internal_record_without_child(rec: &[u8]) -> &[u8] {
        &rec[..rec.len() - CHILD_BYTES]
    }

    fn decode_rid_suffix(rec: &[u8]) -> RecordId {
        let n = rec.len();
        RecordId::new(
            u32::from_be_bytes(rec[n - RID_BYTES..n - 2].try_into().unwrap()),
            u16::from_be_bytes(rec[n - 2..n].try_into().unwrap()),
        )
    }

    fn decode_internal_child(rec: &[u8]) -> PageNumber {
        let n = rec.len();
        u32::from_be_bytes(rec[n - CHILD_BYTES..n].try_into().unwrap())
    }

    /// Compares `(probe_key, probe_rid)` against the `(key, rid)` carried
    /// by `stored` (a leaf record, or an internal record with its
    /// trailing child pointer stripped). `probe_rid = None` compares by
    /// key only, stopping at the prefix rule.
    fn btree_tuple_compare(probe_key: &[Datum], probe_rid: Option<RecordId>, schema: &Schema, stored: &[u8]) -> Ordering {
        let key_region = &stored[..stored.len() - RID_BYTES];
        let cmp = key::tuple_compare(probe_key, schema, key_region);
        if cmp != Ordering::Equal {
            return cmp;
        }
        if probe_key.len() < schema.field_count() {
            return Ordering::Less;
        }
        match probe_rid {
            None => Ordering::Equal,
            Some(prid) => prid.cmp(&Self::decode_rid_suffix(stored)),
        }
    }

    // ---- page-local record list helpers ------------------------------

    fn page_records(body: &[u8]) -> Vec<Vec<u8>> {
        let max = SlottedPage::max_slot_id(body);
        (crate::common::ids::MIN_SLOT_ID..=max)
            .filter_map(|s| SlottedPage::get_record(body, s).map(|r| r.to_vec()))
            .collect()
    }

    /// Reinitializes `body` and reinserts every record in order.
    /// `records` end up at consecutive slot ids starting at `MIN_SLOT_ID`
    /// as long as the page had no pre-existing holes, which holds
    /// immediately after this call. Returns `false` if they don't all
    /// fit (caller must split).
    fn rebuild_page(body: &mut [u8], records: &[Vec<u8>]) -> bool {
        SlottedPage::initialize(body);
        for r in records {
            if SlottedPage::insert_record(body, r) == crate::common::ids::INVALID_SID {
                return false;
            }
        }
        true
    }

    /// Last index `i` with `records[i] <= (probe_key, probe_rid)`, or
    /// `None`. When `skip_first_as_sentinel` is set, index 0 always
    /// qualifies (an internal page's sentinel) and the search range
    /// starts at index 1, stripping each record's trailing child pointer
    /// before comparing.
    ///
    /// Binary search over the page's slot order: `records` is kept
    /// sorted by `btree_tuple_compare`, so the predicate "record <=
    /// probe" is true on a prefix and false after, and the answer is the
    /// last index of that prefix.
    fn search_records(
        records: &[Vec<u8>],
        schema: &Schema,
        probe_key: &[Datum],
        probe_rid: Option<RecordId>,
        skip_first_as_sentinel: bool,
    ) -> Option<usize> {
        let start = if skip_first_as_sentinel { 1 } else { 0 };
        if start >= records.len() {
            return if skip_first_as_sentinel && !records.is_empty() { Some(0) } else { None };
        }

        let cmp_at = |i: usize| -> Ordering {
            let cmp_bytes = if skip_first_as_sentinel {
                Self::internal_record_without_child(&records[i])
            } else {
                records[i].as_slice()
            };
            Self::btree_tuple_compare(probe_key, probe_rid, schema, cmp_bytes)
        };

        let mut lo = start;
        let mut hi = records.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp_at(mid) == Ordering::Less {
                hi = mid; // record[mid] > probe: too far right
            } else {
                lo = mid + 1; // record[mid] <= probe: still in the prefix
            }
        }

        if lo > start {
            Some(lo - 1)
        } else if skip_first_as_sentinel {
            Some(0)
        } else {
            None
        }
    }

    /// Split point minimizing `|bytes_left - bytes_right|`, counting a
    /// fixed per-record directory overhead alongside payload length.
    fn choose_split(records: &[Vec<u8>]) -> usize {
        const ENTRY_OVERHEAD: usize = 4;
        let total: usize = records.iter().map(|r| r.len() + ENTRY_OVERHEAD).sum();
        let mut left = 0usize;
        let mut best_i = 1;
        let mut best_diff = usize::MAX;
        for i in 1..records.len() {
            left += records[i - 1].len() + ENTRY_OVERHEAD;
            let right = total - left;
            let diff = left.abs_diff(right);
            if diff < best_diff {
                best_diff = diff;
                best_i = i;
            }
        }
        best_i
    }

    fn records_usage_fraction(records: &[Vec<u8>], capacity: usize) -> f64 {
        const ENTRY_OVERHEAD: usize = 4;
        const PAGE_OVERHEAD: usize = 6; // slotted-page free-ptr/slot-count/record-count
        let used: usize = records.iter().map(|r| r.len() + ENTRY_OVERHEAD).sum::<usize>() + PAGE_OVERHEAD;
        used as f64 / capacity as f64
    }

    // ---- navigation ---------------------------------------------------

    /// Descends from the root to the covering leaf. `rid = None` means a
    /// key-only probe. An empty `key` (or one whose fields are all
    /// null) represents a "null search key" and always lands on the
    /// leftmost leaf. Every ancestor visited is unpinned before
    /// descending further; only the returned leaf buffer stays pinned.
    fn find_leaf_page(&self, key: &[Datum], rid: Option<RecordId>, path: &mut Vec<(PageNumber, usize)>) -> DbResult<(BufferId, PageNumber)> {
        let meta = self.read_meta()?;
        let mut pn = meta.root_pid;
        loop {
            let id = self.bufman.borrow_mut().pin_page(pn)?;
            let (flags, records) = {
                let bm = self.bufman.borrow();
                let buf = bm.get_buffer(id)?;
                (PageHeader::read_from(buf).flags, Self::page_records(&buf[PAGE_HEADER_SIZE..]))
            };
            if flags & BTREE_LEAF != 0 {
                return Ok((id, pn));
            }
            let idx = Self::search_records(&records, &self.desc.key_schema, key, rid, true)
                .ok_or_else(|| DbError::fatal("internal b+tree page missing its sentinel"))?;
            let child = Self::decode_internal_child(&records[idx]);
            path.push((pn, idx));
            self.bufman.borrow_mut().unpin_page(id)?;
            pn = child;
        }
    }

    // ---- insert ---------------------------------------------------------

    /// Returns `false` without mutating the tree if `desc.unique` and an
    /// equal, all-non-null key already exists.
    pub fn insert(&self, key: &[Datum], rid: RecordId) -> DbResult<bool> {
        let mut path = Vec::new();
        let (leaf_id, leaf_pn) = self.find_leaf_page(key, Some(rid), &mut path)?;
        let scoped = ScopedPin::new(Rc::clone(&self.bufman), leaf_id);

        let mut records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(leaf_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };

        if self.desc.unique && !key.iter().any(Datum::is_null) {
            for rec in &records {
                let stored = self.desc.key_schema.dissemble_payload(Self::leaf_key_bytes(rec));
                if key::tuple_equal(key, &stored) {
                    return Ok(false);
                }
            }
        }

        let insert_idx = Self::search_records(&records, &self.desc.key_schema, key, Some(rid), false).map_or(0, |i| i + 1);
        records.insert(insert_idx, Self::encode_leaf_record(&self.desc.key_schema, key, rid));

        let fits = {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(leaf_id)?;
            let ok = Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &records);
            if ok {
                bm.mark_dirty(leaf_id)?;
            }
            ok
        };

        if fits {
            drop(scoped);
            return Ok(true);
        }

        let split_at = Self::choose_split(&records);
        let left_records = records[..split_at].to_vec();
        let right_records = records[split_at..].to_vec();
        let (sep_key, sep_rid) = {
            let first_right = &right_records[0];
            (Self::leaf_key_bytes(first_right).to_vec(), Self::decode_rid_suffix(first_right))
        };

        let right_pn = self.fm.allocate_tagged_page(self.file_id)?;
        let right_id = self.bufman.borrow_mut().pin_page(right_pn)?;
        let old_next = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(leaf_id)?;
            PageHeader::read_from(buf).next_pid
        };

        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(leaf_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &left_records);
            let mut header = PageHeader::read_from(body);
            header.flags = FLAG_VFILE_PAGE | BTREE_LEAF;
            header.next_pid = right_pn;
            header.write_to(body);
            bm.mark_dirty(leaf_id)?;
        }
        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(right_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &right_records);
            let mut header = PageHeader::empty();
            header.flags = FLAG_VFILE_PAGE | BTREE_LEAF;
            header.file_id = self.file_id;
            header.prev_pid = leaf_pn;
            header.next_pid = old_next;
            header.write_to(body);
            bm.mark_dirty(right_id)?;
        }
        if old_next != INVALID_PID {
            let next_id = self.bufman.borrow_mut().pin_page(old_next)?;
            {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(next_id)?;
                let mut header = PageHeader::read_from(body);
                header.prev_pid = right_pn;
                header.write_to(body);
                bm.mark_dirty(next_id)?;
            }
            self.bufman.borrow_mut().unpin_page(next_id)?;
        }
        self.bufman.borrow_mut().unpin_page(right_id)?;
        drop(scoped);
        log::debug!("insert: split leaf page {} into {{{}, {}}}", leaf_pn, leaf_pn, right_pn);

        self.propagate_split(leaf_pn, path, sep_key, sep_rid, right_pn)?;
        Ok(true)
    }

    /// Inserts the pending `(sep_key, sep_rid) -> right_pn` separator
    /// into each ancestor up `path`, splitting internal pages and
    /// growing a new root as needed. `left_pn` is the page that remains
    /// in place at the current level (the just-split leaf on the first
    /// call, or an internal page's retained left half on later ones).
    fn propagate_split(
        &self,
        mut left_pn: PageNumber,
        mut path: Vec<(PageNumber, usize)>,
        mut sep_key: Vec<u8>,
        mut sep_rid: RecordId,
        mut right_pn: PageNumber,
    ) -> DbResult<()> {
        loop {
            let Some((parent_pn, idx)) = path.pop() else {
                let new_root_pn = self.fm.allocate_tagged_page(self.file_id)?;
                let sentinel = Self::encode_internal_record(&[], RecordId::new(0, 0), left_pn);
                let sep_rec = Self::encode_internal_record(&sep_key, sep_rid, right_pn);
                let id = self.bufman.borrow_mut().pin_page(new_root_pn)?;
                {
                    let mut bm = self.bufman.borrow_mut();
                    let body = bm.get_buffer_mut(id)?;
                    Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &[sentinel, sep_rec]);
                    let mut header = PageHeader::empty();
                    header.flags = FLAG_VFILE_PAGE | BTREE_ROOT;
                    header.file_id = self.file_id;
                    header.write_to(body);
                    bm.mark_dirty(id)?;
                }
                self.bufman.borrow_mut().unpin_page(id)?;
                self.write_meta(&BTreeMeta { root_pid: new_root_pn })?;
                log::debug!("propagate_split: grew tree height, new root page {}", new_root_pn);
                return Ok(());
            };

            let parent_id = self.bufman.borrow_mut().pin_page(parent_pn)?;
            let mut records = {
                let bm = self.bufman.borrow();
                let buf = bm.get_buffer(parent_id)?;
                Self::page_records(&buf[PAGE_HEADER_SIZE..])
            };
            records.insert(idx + 1, Self::encode_internal_record(&sep_key, sep_rid, right_pn));

            let fits = {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(parent_id)?;
                let ok = Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &records);
                if ok {
                    bm.mark_dirty(parent_id)?;
                }
                ok
            };
            if fits {
                self.bufman.borrow_mut().unpin_page(parent_id)?;
                return Ok(());
            }

            let split_at = Self::choose_split(&records);
            let left_records = records[..split_at].to_vec();
            let mut right_records = records[split_at..].to_vec();
            let promoted = right_records.remove(0);
            let promoted_child = Self::decode_internal_child(&promoted);
            let promoted_key = Self::internal_key_bytes(&promoted).to_vec();
            let promoted_rid = Self::decode_rid_suffix(Self::internal_record_without_child(&promoted));
            right_records.insert(0, Self::encode_internal_record(&[], RecordId::new(0, 0), promoted_child));

            let new_right_pn = self.fm.allocate_tagged_page(self.file_id)?;
            let new_right_id = self.bufman.borrow_mut().pin_page(new_right_pn)?;
            {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(parent_id)?;
                Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &left_records);
                let mut header = PageHeader::read_from(body);
                header.flags &= !BTREE_ROOT;
                header.write_to(body);
                bm.mark_dirty(parent_id)?;
            }
            {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(new_right_id)?;
                Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &right_records);
                let mut header = PageHeader::empty();
                header.flags = FLAG_VFILE_PAGE;
                header.file_id = self.file_id;
                header.write_to(body);
                bm.mark_dirty(new_right_id)?;
            }
            self.bufman.borrow_mut().unpin_page(new_right_id)?;
            self.bufman.borrow_mut().unpin_page(parent_id)?;
            log::debug!("propagate_split: split internal page {} into {{{}, {}}}", parent_pn, parent_pn, new_right_pn);

            left_pn = parent_pn;
            sep_key = promoted_key;
            sep_rid = promoted_rid;
            right_pn = new_right_pn;
        }
    }

    // ---- delete ---------------------------------------------------------

    /// Removes the exact `(key, rid)` pair. Returns `false` (no error)
    /// if it isn't present.
    pub fn delete(&self, key: &[Datum], rid: RecordId) -> DbResult<bool> {
        let mut path = Vec::new();
        let (leaf_id, leaf_pn) = self.find_leaf_page(key, Some(rid), &mut path)?;
        let mut records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(leaf_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };

        let found = records
            .iter()
            .position(|r| Self::btree_tuple_compare(key, Some(rid), &self.desc.key_schema, r) == Ordering::Equal);
        let idx = match found {
            Some(i) => i,
            None => {
                self.bufman.borrow_mut().unpin_page(leaf_id)?;
                return Ok(false);
            }
        };
        records.remove(idx);

        let is_root = {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(leaf_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &records);
            bm.mark_dirty(leaf_id)?;
            PageHeader::read_from(body).flags & BTREE_ROOT != 0
        };
        let usage = Self::records_usage_fraction(&records, self.page_capacity());
        self.bufman.borrow_mut().unpin_page(leaf_id)?;

        if !is_root && usage < self.min_page_usage {
            self.handle_min_page_usage(path, true)?;
        }
        Ok(true)
    }

    /// Tries to merge the page at the end of `path`'s last entry with a
    /// sibling sharing the same parent, preferring the right sibling. If
    /// the two pages' combined records don't fit on one page, falls back
    /// to rebalancing: re-splitting the combined records evenly across
    /// both pages and updating the parent's separator so both end near
    /// equal usage, instead of collapsing into a single page.
    fn handle_min_page_usage(&self, mut path: Vec<(PageNumber, usize)>, is_leaf: bool) -> DbResult<()> {
        let Some((parent_pn, idx)) = path.pop() else {
            return Ok(()); // the underfull page is the root; nothing to merge with.
        };

        let parent_id = self.bufman.borrow_mut().pin_page(parent_pn)?;
        let parent_records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(parent_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };

        let sibling_idx = if idx + 1 < parent_records.len() {
            Some(idx + 1)
        } else if idx > 0 {
            Some(idx - 1)
        } else {
            None
        };
        let Some(sib_idx) = sibling_idx else {
            self.bufman.borrow_mut().unpin_page(parent_id)?;
            return Ok(());
        };
        let (left_idx, right_idx) = if sib_idx > idx { (idx, sib_idx) } else { (sib_idx, idx) };
        let left_pn = Self::decode_internal_child(&parent_records[left_idx]);
        let right_pn = Self::decode_internal_child(&parent_records[right_idx]);

        let left_id = self.bufman.borrow_mut().pin_page(left_pn)?;
        let right_id = self.bufman.borrow_mut().pin_page(right_pn)?;
        let left_records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(left_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };
        let right_records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(right_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };

        let mut combined = left_records;
        if is_leaf {
            combined.extend(right_records);
        } else {
            let pulled_key = Self::internal_key_bytes(&parent_records[right_idx]).to_vec();
            let pulled_rid = Self::decode_rid_suffix(Self::internal_record_without_child(&parent_records[right_idx]));
            let right_sentinel_child = Self::decode_internal_child(&right_records[0]);
            combined.push(Self::encode_internal_record(&pulled_key, pulled_rid, right_sentinel_child));
            combined.extend(right_records[1..].to_vec());
        }

        let mut scratch = vec![0u8; self.page_capacity()];
        let merged_fits = Self::rebuild_page(&mut scratch, &combined);

        if !merged_fits {
            log::debug!(
                "b+tree merge of pages {} and {} does not fit on one page ({} combined records); rebalancing instead",
                left_pn,
                right_pn,
                combined.len()
            );
            self.rebalance_siblings(left_id, right_id, parent_id, right_idx, parent_records, combined, is_leaf)?;
            return Ok(());
        }

        let right_next = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(right_id)?;
            PageHeader::read_from(buf).next_pid
        };
        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(left_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &combined);
            let mut header = PageHeader::read_from(body);
            if is_leaf {
                header.next_pid = right_next;
            }
            header.write_to(body);
            bm.mark_dirty(left_id)?;
        }
        self.bufman.borrow_mut().unpin_page(right_id)?;
        self.fm.free_tagged_page(right_pn)?;

        if is_leaf && right_next != INVALID_PID {
            let nxt_id = self.bufman.borrow_mut().pin_page(right_next)?;
            {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(nxt_id)?;
                let mut header = PageHeader::read_from(body);
                header.prev_pid = left_pn;
                header.write_to(body);
                bm.mark_dirty(nxt_id)?;
            }
            self.bufman.borrow_mut().unpin_page(nxt_id)?;
        }

        let mut new_parent_records = parent_records;
        new_parent_records.remove(right_idx);
        let parent_is_root = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(parent_id)?;
            PageHeader::read_from(buf).flags & BTREE_ROOT != 0
        };

        if parent_is_root && new_parent_records.len() == 1 {
            self.write_meta(&BTreeMeta { root_pid: left_pn })?;
            {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(left_id)?;
                let mut header = PageHeader::read_from(body);
                header.flags |= BTREE_ROOT;
                header.write_to(body);
                bm.mark_dirty(left_id)?;
            }
            self.bufman.borrow_mut().unpin_page(left_id)?;
            self.bufman.borrow_mut().unpin_page(parent_id)?;
            self.fm.free_tagged_page(parent_pn)?;
            return Ok(());
        }

        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(parent_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &new_parent_records);
            bm.mark_dirty(parent_id)?;
        }
        let parent_usage = Self::records_usage_fraction(&new_parent_records, self.page_capacity());
        self.bufman.borrow_mut().unpin_page(left_id)?;
        self.bufman.borrow_mut().unpin_page(parent_id)?;

        if !parent_is_root && parent_usage < self.min_page_usage {
            self.handle_min_page_usage(path, false)?;
        }
        Ok(())
    }

    /// Re-splits `combined` (the concatenation of `left_id`'s and
    /// `right_id`'s records that didn't fit merged onto one page) evenly
    /// across the same two pages via `choose_split`, the same balancing
    /// rule a normal insert-triggered split uses, and rewrites the
    /// parent's separator at `right_idx` to match. Leaves both pages'
    /// page numbers and the parent's child count unchanged; only page
    /// contents and one separator key move.
    fn rebalance_siblings(
        &self,
        left_id: BufferId,
        right_id: BufferId,
        parent_id: BufferId,
        right_idx: usize,
        mut parent_records: Vec<Vec<u8>>,
        combined: Vec<Vec<u8>>,
        is_leaf: bool,
    ) -> DbResult<()> {
        let split_at = Self::choose_split(&combined);
        let new_left = combined[..split_at].to_vec();
        let mut new_right = combined[split_at..].to_vec();

        let (sep_key, sep_rid) = if is_leaf {
            let first_right = &new_right[0];
            (Self::leaf_key_bytes(first_right).to_vec(), Self::decode_rid_suffix(first_right))
        } else {
            let promoted = new_right.remove(0);
            let promoted_child = Self::decode_internal_child(&promoted);
            let promoted_key = Self::internal_key_bytes(&promoted).to_vec();
            let promoted_rid = Self::decode_rid_suffix(Self::internal_record_without_child(&promoted));
            new_right.insert(0, Self::encode_internal_record(&[], RecordId::new(0, 0), promoted_child));
            (promoted_key, promoted_rid)
        };

        let (left_pn, right_pn) = {
            let bm = self.bufman.borrow();
            (bm.get_page_number(left_id)?, bm.get_page_number(right_id)?)
        };

        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(left_id)?;
            if !Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &new_left) {
                return Err(DbError::fatal("b+tree rebalance: redistributed left half does not fit"));
            }
            bm.mark_dirty(left_id)?;
        }
        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(right_id)?;
            if !Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &new_right) {
                return Err(DbError::fatal("b+tree rebalance: redistributed right half does not fit"));
            }
            bm.mark_dirty(right_id)?;
        }

        parent_records[right_idx] = Self::encode_internal_record(&sep_key, sep_rid, right_pn);
        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(parent_id)?;
            Self::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &parent_records);
            bm.mark_dirty(parent_id)?;
        }

        log::debug!(
            "b+tree rebalance left page {} with {} records, right page {} with {} records",
            left_pn,
            new_left.len(),
            right_pn,
            new_right.len()
        );

        self.bufman.borrow_mut().unpin_page(left_id)?;
        self.bufman.borrow_mut().unpin_page(right_id)?;
        self.bufman.borrow_mut().unpin_page(parent_id)?;
        Ok(())
    }

    // ---- range scan -----------------------------------------------------

    /// `lower`/`upper` of `None` leave that side unbounded. A present
    /// bound with fewer fields than the key schema is a prefix bound.
    pub fn range_scan(
        self: &IndexHandle,
        lower: Option<Vec<Datum>>,
        lower_strict: bool,
        upper: Option<Vec<Datum>>,
        upper_strict: bool,
    ) -> DbResult<BTreeRangeIter> {
        let mut path = Vec::new();
        let probe_key: Vec<Datum> = lower.clone().unwrap_or_default();
        let (leaf_id, leaf_pn) = self.find_leaf_page(&probe_key, None, &mut path)?;

        let records = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(leaf_id)?;
            Self::page_records(&buf[PAGE_HEADER_SIZE..])
        };
        let mut idx = 0usize;
        if let Some(lo) = &lower {
            idx = records
                .iter()
                .position(|r| {
                    let cmp = Self::btree_tuple_compare(lo, None, &self.desc.key_schema, r);
                    if lower_strict {
                        cmp == Ordering::Less
                    } else {
                        cmp != Ordering::Greater
                    }
                })
                .unwrap_or(records.len());
        }
        self.bufman.borrow_mut().unpin_page(leaf_id)?;

        Ok(BTreeRangeIter {
            tree: Rc::clone(self),
            current_pn: Some(leaf_pn),
            idx,
            upper,
            upper_strict,
            done: false,
        })
    }
}

/// Forward iterator over `(key, rid)` pairs produced by
/// `BTree::range_scan`. Keeps an owned copy of the upper bound so the
/// caller may drop the original (spec.md section 4.5).
pub struct BTreeRangeIter {
    tree: IndexHandle,
    current_pn: Option<PageNumber>,
    idx: usize,
    upper: Option<Vec<Datum>>,
    upper_strict: bool,
    done: bool,
}

impl BTreeRangeIter {
    /// Position immediately before whatever `next()` would currently
    /// return; combined with `rewind`, lets a caller (`IndexScan`,
    /// `IndexNestedLoop`) snapshot a cursor and later re-derive the same
    /// `(key, rid)` pair via a single `next()` call.
    pub fn save_position(&self) -> (PageNumber, usize) {
        (self.current_pn.unwrap_or(INVALID_PID), self.idx)
    }

    pub fn rewind(&mut self, pos: (PageNumber, usize)) {
        self.current_pn = if pos.0 == INVALID_PID { None } else { Some(pos.0) };
        self.idx = pos.1;
        self.done = false;
    }

    pub fn next(&mut self) -> DbResult<Option<(Vec<Datum>, RecordId)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let pn = match self.current_pn {
                Some(pn) => pn,
                None => return Ok(None),
            };

            let id = self.tree.bufman.borrow_mut().pin_page(pn)?;
            let (records, next_pid) = {
                let bm = self.tree.bufman.borrow();
                let buf = bm.get_buffer(id)?;
                (BTree::page_records(&buf[PAGE_HEADER_SIZE..]), PageHeader::read_from(buf).next_pid)
            };
            self.tree.bufman.borrow_mut().unpin_page(id)?;

            if self.idx < records.len() {
                let rec = &records[self.idx];
                if let Some(hi) = &self.upper {
                    let cmp = BTree::btree_tuple_compare(hi, None, &self.tree.desc.key_schema, rec);
                    let in_bounds = if self.upper_strict { cmp == Ordering::Greater } else { cmp != Ordering::Less };
                    if !in_bounds {
                        self.done = true;
                        return Ok(None);
                    }
                }
                let key_values = self.tree.desc.key_schema.dissemble_payload(BTree::leaf_key_bytes(rec));
                let rid = BTree::decode_rid_suffix(rec);
                self.idx += 1;
                return Ok(Some((key_values, rid)));
            }

            if next_pid == INVALID_PID {
                self.current_pn = None;
            } else {
                self.current_pn = Some(next_pid);
                self.idx = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Field, FieldType};
    use crate::config::DbConfig;
    use crate::storage::buffer_manager::BufferManager;
    use std::cell::RefCell;

    fn setup(unique: bool) -> (tempfile::TempDir, IndexHandle) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        let desc = IndexDescriptor {
            key_schema: Schema::new(vec![Field::new("k", FieldType::int32(), false)]),
            unique,
        };
        let tree = BTree::initialize(fm, bufman, desc, config.min_page_usage).unwrap();
        (dir, tree)
    }

    fn raw_parts() -> (tempfile::TempDir, Rc<FileManager>, BufferManagerHandle, DbConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        (dir, fm, bufman, config)
    }

    fn scan_all(tree: &IndexHandle) -> Vec<i32> {
        let mut iter = tree.range_scan(None, false, None, false).unwrap();
        let mut out = Vec::new();
        while let Some((k, _rid)) = iter.next().unwrap() {
            out.push(k[0].as_i32().unwrap());
        }
        out
    }

    #[test]
    fn insert_and_range_scan_many_keys_forces_splits() {
        let (_dir, tree) = setup(false);
        for i in 0..400 {
            assert!(tree.insert(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap());
        }
        let scanned = scan_all(&tree);
        assert_eq!(scanned, (0..400).collect::<Vec<_>>());
    }

    #[test]
    fn unique_index_rejects_duplicate_nonnull_key() {
        let (_dir, tree) = setup(true);
        assert!(tree.insert(&[Datum::from_i32(7)], RecordId::new(1, 1)).unwrap());
        assert!(!tree.insert(&[Datum::from_i32(7)], RecordId::new(2, 1)).unwrap());
    }

    #[test]
    fn bounded_range_scan_respects_strictness() {
        let (_dir, tree) = setup(false);
        for i in 0..100 {
            tree.insert(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap();
        }
        let mut iter = tree
            .range_scan(Some(vec![Datum::from_i32(10)]), false, Some(vec![Datum::from_i32(90)]), true)
            .unwrap();
        let mut out = Vec::new();
        while let Some((k, _)) = iter.next().unwrap() {
            out.push(k[0].as_i32().unwrap());
        }
        assert_eq!(out, (10..90).collect::<Vec<_>>());
    }

    #[test]
    fn delete_then_reinsert_round_trips() {
        let (_dir, tree) = setup(false);
        for i in 0..100 {
            tree.insert(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap();
        }
        assert!(tree.delete(&[Datum::from_i32(42)], RecordId::new(42, 1)).unwrap());
        assert!(!tree.delete(&[Datum::from_i32(42)], RecordId::new(42, 1)).unwrap());

        let scanned = scan_all(&tree);
        assert!(!scanned.contains(&42));
        assert_eq!(scanned.len(), 99);

        assert!(tree.insert(&[Datum::from_i32(42)], RecordId::new(42, 1)).unwrap());
        let scanned = scan_all(&tree);
        assert_eq!(scanned, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn merge_infeasible_sibling_pair_rebalances_instead_of_merging() {
        // A tiny page size (112-byte body) holds at most 7 of these
        // 11-byte leaf records, so a 2-record left leaf and a 6-record
        // right leaf (8 combined) cannot merge onto one page but can
        // still redistribute evenly across the same two pages.
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig {
            page_size: 128,
            buffer_pool_frames: 16,
            pages_per_group: 16,
            merge_ways: 4,
            min_page_usage: 0.4,
        };
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        let schema = Schema::new(vec![Field::new("k", FieldType::int32(), false)]);
        let desc = IndexDescriptor { key_schema: schema.clone(), unique: false };
        let tree = BTree::initialize(Rc::clone(&fm), Rc::clone(&bufman), desc, config.min_page_usage).unwrap();

        let left_pn = fm.allocate_tagged_page(tree.file_id()).unwrap();
        let right_pn = fm.allocate_tagged_page(tree.file_id()).unwrap();
        let root_pn = fm.allocate_tagged_page(tree.file_id()).unwrap();

        let rec = |k: i32| BTree::encode_leaf_record(&schema, &[Datum::from_i32(k)], RecordId::new(k as u32, 1));
        let left_records: Vec<Vec<u8>> = (0..2).map(rec).collect();
        let right_records: Vec<Vec<u8>> = (2..8).map(rec).collect();

        let write_leaf = |pn: PageNumber, records: &[Vec<u8>], prev: PageNumber, next: PageNumber| {
            let id = bufman.borrow_mut().pin_page(pn).unwrap();
            {
                let mut bm = bufman.borrow_mut();
                let body = bm.get_buffer_mut(id).unwrap();
                assert!(BTree::rebuild_page(&mut body[PAGE_HEADER_SIZE..], records));
                let mut header = PageHeader::empty();
                header.flags = FLAG_VFILE_PAGE | BTREE_LEAF;
                header.file_id = tree.file_id();
                header.prev_pid = prev;
                header.next_pid = next;
                header.write_to(body);
                bm.mark_dirty(id).unwrap();
            }
            bufman.borrow_mut().unpin_page(id).unwrap();
        };
        write_leaf(left_pn, &left_records, INVALID_PID, right_pn);
        write_leaf(right_pn, &right_records, left_pn, INVALID_PID);

        let sep_key = schema.write_payload(&[Datum::from_i32(2)]);
        let sentinel = BTree::encode_internal_record(&[], RecordId::new(0, 0), left_pn);
        let sep_rec = BTree::encode_internal_record(&sep_key, RecordId::new(2, 1), right_pn);
        {
            let id = bufman.borrow_mut().pin_page(root_pn).unwrap();
            {
                let mut bm = bufman.borrow_mut();
                let body = bm.get_buffer_mut(id).unwrap();
                assert!(BTree::rebuild_page(&mut body[PAGE_HEADER_SIZE..], &[sentinel, sep_rec]));
                let mut header = PageHeader::empty();
                header.flags = FLAG_VFILE_PAGE | BTREE_ROOT;
                header.file_id = tree.file_id();
                header.write_to(body);
                bm.mark_dirty(id).unwrap();
            }
            bufman.borrow_mut().unpin_page(id).unwrap();
        }
        tree.write_meta(&BTreeMeta { root_pid: root_pn }).unwrap();

        let before = scan_all(&tree);
        assert_eq!(before, (0..8).collect::<Vec<_>>());

        tree.handle_min_page_usage(vec![(root_pn, 0)], true).unwrap();

        // no merge happened: the root still has both children.
        let root_records = {
            let id = bufman.borrow_mut().pin_page(root_pn).unwrap();
            let bm = bufman.borrow();
            let buf = bm.get_buffer(id).unwrap();
            let recs = BTree::page_records(&buf[PAGE_HEADER_SIZE..]);
            drop(bm);
            bufman.borrow_mut().unpin_page(id).unwrap();
            recs
        };
        assert_eq!(root_records.len(), 2);

        // both leaves now hold a near-even share instead of 2/6.
        let leaf_len = |pn: PageNumber| -> usize {
            let id = bufman.borrow_mut().pin_page(pn).unwrap();
            let bm = bufman.borrow();
            let buf = bm.get_buffer(id).unwrap();
            let n = BTree::page_records(&buf[PAGE_HEADER_SIZE..]).len();
            drop(bm);
            bufman.borrow_mut().unpin_page(id).unwrap();
            n
        };
        let left_len = leaf_len(left_pn);
        let right_len = leaf_len(right_pn);
        assert_eq!(left_len + right_len, 8);
        assert!(left_len >= 3 && right_len >= 3, "expected a near-even redistribution, got {}/{}", left_len, right_len);

        let after = scan_all(&tree);
        assert_eq!(after, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn heavy_delete_triggers_merge_and_scan_stays_consistent() {
        let (_dir, tree) = setup(false);
        for i in 0..500 {
            tree.insert(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap();
        }
        for i in (0..500).step_by(2) {
            assert!(tree.delete(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap());
        }
        let scanned = scan_all(&tree);
        let expected: Vec<i32> = (0..500).filter(|i| i % 2 != 0).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn bulk_load_from_sorted_iterator_round_trips() {
        let (_dir, fm, bufman, config) = raw_parts();
        let desc = IndexDescriptor {
            key_schema: Schema::new(vec![Field::new("k", FieldType::int32(), false)]),
            unique: true,
        };
        let pairs: Vec<(Vec<Datum>, RecordId)> =
            (0..3000).map(|i| (vec![Datum::from_i32(i)], RecordId::new(i as u32, 1))).collect();
        let tree = BTree::bulk_load(fm, bufman, desc, config.min_page_usage, pairs).unwrap();

        let scanned = scan_all(&tree);
        assert_eq!(scanned, (0..3000).collect::<Vec<_>>());
    }

    #[test]
    fn bulk_load_of_empty_iterator_produces_empty_tree() {
        let (_dir, fm, bufman, config) = raw_parts();
        let desc = IndexDescriptor {
            key_schema: Schema::new(vec![Field::new("k", FieldType::int32(), false)]),
            unique: false,
        };
        let tree = BTree::bulk_load(fm, bufman, desc, config.min_page_usage, std::iter::empty()).unwrap();
        assert_eq!(scan_all(&tree), Vec::<i32>::new());
        assert!(tree.insert(&[Datum::from_i32(1)], RecordId::new(1, 1)).unwrap());
        assert_eq!(scan_all(&tree), vec![1]);
    }

    #[test]
    fn bulk_loaded_tree_supports_insert_and_delete_afterward() {
        let (_dir, fm, bufman, config) = raw_parts();
        let desc = IndexDescriptor {
            key_schema: Schema::new(vec![Field::new("k", FieldType::int32(), false)]),
            unique: true,
        };
        let pairs: Vec<(Vec<Datum>, RecordId)> =
            (0..1000).filter(|i| i % 2 == 0).map(|i| (vec![Datum::from_i32(i)], RecordId::new(i as u32, 1))).collect();
        let tree = BTree::bulk_load(fm, bufman, desc, config.min_page_usage, pairs).unwrap();

        for i in (1..1000).step_by(2) {
            assert!(tree.insert(&[Datum::from_i32(i)], RecordId::new(i as u32, 1)).unwrap());
        }
        assert_eq!(scan_all(&tree), (0..1000).collect::<Vec<_>>());

        assert!(tree.delete(&[Datum::from_i32(500)], RecordId::new(500, 1)).unwrap());
        let scanned = scan_all(&tree);
        assert!(!scanned.contains(&500));
        assert_eq!(scanned.len(), 999);
    }
}
