//! Heap table: a virtual file whose pages are slotted pages holding
//! schema-serialized records (spec.md section 4.3 "Heap Table").

use std::cell::Cell;
use std::rc::Rc;

use crate::common::ids::{PageNumber, RecordId, SlotId, INVALID_PID, MIN_SLOT_ID};
use crate::error::{DbError, DbResult};
use crate::storage::buffer_manager::{BufferManagerHandle, ScopedPin};
use crate::storage::file_manager::VirtualFile;
use crate::storage::page::PAGE_HEADER_SIZE;
use crate::storage::slotted_page::SlottedPage;

pub struct HeapTable {
    file: VirtualFile,
    bufman: BufferManagerHandle,
    last_insert_page: Cell<PageNumber>,
}

pub type TableHandle = Rc<HeapTable>;

impl HeapTable {
    /// Called once on a fresh file: the file manager already gives the
    /// new file one zeroed data page (spec.md section 4.1's
    /// `create_regular_file`); this installs a proper empty slotted
    /// page layout on it.
    pub fn initialize(file: VirtualFile, bufman: BufferManagerHandle) -> DbResult<TableHandle> {
        let first = file.first_page_number()?;
        let id = bufman.borrow_mut().pin_page(first)?;
        {
            let mut bm = bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            SlottedPage::initialize(&mut body[PAGE_HEADER_SIZE..]);
            bm.mark_dirty(id)?;
        }
        bufman.borrow_mut().unpin_page(id)?;

        Ok(Rc::new(HeapTable {
            file,
            bufman,
            last_insert_page: Cell::new(first),
        }))
    }

    pub fn open(file: VirtualFile, bufman: BufferManagerHandle) -> DbResult<TableHandle> {
        let first = file.first_page_number()?;
        Ok(Rc::new(HeapTable {
            file,
            bufman,
            last_insert_page: Cell::new(first),
        }))
    }

    pub fn file_id(&self) -> u32 {
        self.file.file_id
    }

    fn page_body_len(&self) -> usize {
        self.file.page_size() - PAGE_HEADER_SIZE
    }

    fn new_blank_page(&self) -> DbResult<PageNumber> {
        let pn = self.file.allocate_page()?;
        let id = self.bufman.borrow_mut().pin_page(pn)?;
        {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            SlottedPage::initialize(&mut body[PAGE_HEADER_SIZE..]);
            bm.mark_dirty(id)?;
        }
        self.bufman.borrow_mut().unpin_page(id)?;
        Ok(pn)
    }

    /// Fatal if `rec.len()` can never fit on any page; fatal if
    /// insertion into a freshly-initialized blank page still fails
    /// (spec.md section 4.3).
    pub fn insert_record(&self, rec: &[u8]) -> DbResult<RecordId> {
        if rec.len() > self.page_body_len() {
            return Err(DbError::fatal("record larger than a page"));
        }

        let mut pn = self.last_insert_page.get();
        loop {
            let id = self.bufman.borrow_mut().pin_page(pn)?;
            let slot = {
                let mut bm = self.bufman.borrow_mut();
                let body = bm.get_buffer_mut(id)?;
                let sid = SlottedPage::insert_record(&mut body[PAGE_HEADER_SIZE..], rec);
                if sid != crate::common::ids::INVALID_SID {
                    bm.mark_dirty(id)?;
                }
                sid
            };
            if slot != crate::common::ids::INVALID_SID {
                self.bufman.borrow_mut().unpin_page(id)?;
                self.last_insert_page.set(pn);
                return Ok(RecordId::new(pn, slot));
            }

            let next = {
                let bm = self.bufman.borrow();
                let buf = bm.get_buffer(id)?;
                crate::storage::page::PageHeader::read_from(buf).next_pid
            };
            self.bufman.borrow_mut().unpin_page(id)?;

            if next == INVALID_PID {
                let fresh = self.new_blank_page()?;
                pn = fresh;
            } else {
                pn = next;
            }
        }
    }

    /// Direct random-access read by record id, bypassing `start_scan`.
    /// Returns `None` if the slot has since been erased.
    pub fn read_record(&self, rid: RecordId) -> DbResult<Option<Vec<u8>>> {
        let id = self.bufman.borrow_mut().pin_page(rid.page_number)?;
        let rec = {
            let bm = self.bufman.borrow();
            let buf = bm.get_buffer(id)?;
            SlottedPage::get_record(&buf[PAGE_HEADER_SIZE..], rid.slot_id).map(|r| r.to_vec())
        };
        self.bufman.borrow_mut().unpin_page(id)?;
        Ok(rec)
    }

    pub fn erase_record(&self, rid: RecordId) -> DbResult<()> {
        let id = self.bufman.borrow_mut().pin_page(rid.page_number)?;
        let now_empty = {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            SlottedPage::erase(&mut body[PAGE_HEADER_SIZE..], rid.slot_id);
            bm.mark_dirty(id)?;
            let b = bm.get_buffer(id)?;
            SlottedPage::record_count(&b[PAGE_HEADER_SIZE..]) == 0
        };
        self.bufman.borrow_mut().unpin_page(id)?;

        if now_empty {
            let first = self.file.first_page_number()?;
            let last = self.file.true_last_page_number()?;
            if !(rid.page_number == first && first == last) {
                self.file.free_page(rid.page_number)?;
                if self.last_insert_page.get() == rid.page_number {
                    self.last_insert_page.set(first);
                }
            }
        }
        Ok(())
    }

    /// In-place when possible; otherwise erases the old slot and
    /// reinserts, updating the caller's record id.
    pub fn update_record(&self, rid: RecordId, rec: &[u8]) -> DbResult<RecordId> {
        let id = self.bufman.borrow_mut().pin_page(rid.page_number)?;
        let updated_in_place = {
            let mut bm = self.bufman.borrow_mut();
            let body = bm.get_buffer_mut(id)?;
            let ok = SlottedPage::update(&mut body[PAGE_HEADER_SIZE..], rid.slot_id, rec);
            if ok {
                bm.mark_dirty(id)?;
            }
            ok
        };
        self.bufman.borrow_mut().unpin_page(id)?;

        if updated_in_place {
            Ok(rid)
        } else {
            self.insert_record(rec)
        }
    }

    pub fn start_scan(self: &TableHandle) -> DbResult<HeapIter> {
        let first = self.file.first_page_number()?;
        self.start_scan_from_page(first, MIN_SLOT_ID)
    }

    pub fn start_scan_from(self: &TableHandle, rid: RecordId) -> DbResult<HeapIter> {
        self.start_scan_from_page(rid.page_number, rid.slot_id)
    }

    fn start_scan_from_page(self: &TableHandle, pn: PageNumber, slot: SlotId) -> DbResult<HeapIter> {
        let snapshot_last = self.file.true_last_page_number()?;
        Ok(HeapIter {
            table: Rc::clone(self),
            current_pn: Some(pn),
            next_slot: slot,
            snapshot_last,
        })
    }
}

/// Forward iterator over a heap table's live records. Captures the
/// file's last page at construction time, so concurrent appends after
/// the scan starts are ignored (spec.md section 4.3).
pub struct HeapIter {
    table: TableHandle,
    current_pn: Option<PageNumber>,
    next_slot: SlotId,
    snapshot_last: PageNumber,
}

impl HeapIter {
    pub fn next(&mut self) -> DbResult<Option<(RecordId, Vec<u8>)>> {
        loop {
            let pn = match self.current_pn {
                Some(pn) => pn,
                None => return Ok(None),
            };

            let id = self.table.bufman.borrow_mut().pin_page(pn)?;
            let scoped = ScopedPin::new(Rc::clone(&self.table.bufman), id);
            let (max_slot, next_pn) = {
                let bm = self.table.bufman.borrow();
                let buf = bm.get_buffer(id)?;
                let max = SlottedPage::max_slot_id(&buf[PAGE_HEADER_SIZE..]);
                let next = crate::storage::page::PageHeader::read_from(buf).next_pid;
                (max, next)
            };

            while self.next_slot <= max_slot {
                let slot = self.next_slot;
                self.next_slot += 1;
                let bm = self.table.bufman.borrow();
                let buf = bm.get_buffer(id)?;
                if let Some(rec) = SlottedPage::get_record(&buf[PAGE_HEADER_SIZE..], slot) {
                    let owned = rec.to_vec();
                    drop(bm);
                    return Ok(Some((RecordId::new(pn, slot), owned)));
                }
            }

            drop(scoped);
            if pn == self.snapshot_last || next_pn == INVALID_PID {
                self.current_pn = None;
            } else {
                self.current_pn = Some(next_pn);
                self.next_slot = MIN_SLOT_ID;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::storage::buffer_manager::BufferManager;
    use crate::storage::file_manager::FileManager;
    use std::cell::RefCell;

    fn setup() -> (tempfile::TempDir, TableHandle) {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::small_for_tests();
        let fm = FileManager::open(dir.path(), &config).unwrap();
        let bufman = Rc::new(RefCell::new(BufferManager::new(Rc::clone(&fm), config.buffer_pool_frames)));
        let file = fm.create_regular_file().unwrap();
        let table = HeapTable::initialize(file, bufman).unwrap();
        (dir, table)
    }

    #[test]
    fn insert_and_scan_round_trips() {
        let (_dir, table) = setup();
        let mut rids = Vec::new();
        for i in 0..500 {
            let rec = format!("row-{}", i).into_bytes();
            rids.push(table.insert_record(&rec).unwrap());
        }
        let mut scan = table.start_scan().unwrap();
        let mut count = 0;
        while let Some((_rid, bytes)) = scan.next().unwrap() {
            assert_eq!(bytes, format!("row-{}", count).into_bytes());
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[test]
    fn erase_holes_are_skipped_by_scan() {
        let (_dir, table) = setup();
        let mut rids = Vec::new();
        for i in 0..200 {
            rids.push(table.insert_record(format!("v{}", i).as_bytes()).unwrap());
        }
        for rid in rids.iter().step_by(3) {
            table.erase_record(*rid).unwrap();
        }
        let mut scan = table.start_scan().unwrap();
        let mut seen = 0;
        while scan.next().unwrap().is_some() {
            seen += 1;
        }
        let expected = rids.len() - rids.iter().step_by(3).count();
        assert_eq!(seen, expected);
    }

    #[test]
    fn update_in_place_and_relocated() {
        let (_dir, table) = setup();
        let rid = table.insert_record(b"0123456789").unwrap();
        let rid2 = table.update_record(rid, b"short").unwrap();
        assert_eq!(rid2, rid);

        let rid3 = table.update_record(rid2, b"now this is a much longer replacement value").unwrap();
        let mut scan = table.start_scan().unwrap();
        let mut found = false;
        while let Some((r, bytes)) = scan.next().unwrap() {
            if r == rid3 {
                assert_eq!(bytes, b"now this is a much longer replacement value");
                found = true;
            }
        }
        assert!(found);
    }
}
