//! Virtual file manager (spec.md section 4.1): page groups backed by OS
//! files, a two-level file directory mapping file ids to their meta
//! pages, and regular/temporary virtual files built from doubly-linked
//! page chains.
//!
//! Grounded on the teacher's `BufferPool::read_page` physical-offset
//! arithmetic (`src/btree/buffer_pool.rs`) generalized from "one fixed
//! file" to page groups, and on `src/btree/page/page_id.rs`'s
//! `PageCategory`/id conventions generalized into the file-id kind bits
//! spec.md section 6 names.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::common::ids::{PageNumber, INVALID_PID};
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::storage::page::{PageHeader, RawPage, FLAG_META_PAGE, FLAG_VFILE_PAGE, PAGE_HEADER_SIZE};

pub const FM_META_MAGIC: u64 = 0xdefa_bc12_21cb_afed;

pub const FILE_ID_KIND_MASK: u32 = 0xC000_0000;
pub const FILE_ID_REGULAR: u32 = 0x0000_0000;
pub const FILE_ID_TEMP: u32 = 0x4000_0000;
pub const FILE_ID_WAL: u32 = 0x8000_0000;
pub const FILE_ID_VALUE_MASK: u32 = 0x3FFF_FFFF;

#[derive(Clone, Copy, Debug)]
struct FmMeta {
    first_dir_pid: PageNumber,
    free_head: PageNumber,
    last_group: u32,
    next_in_group: u32,
    last_file_id_hint: u32,
}

#[derive(Clone, Copy, Debug)]
struct RegularFileMeta {
    first_pid: PageNumber,
    last_pid: PageNumber,
    free_head: PageNumber,
}

pub struct FileManager {
    base_dir: PathBuf,
    page_size: usize,
    pages_per_group: u32,
    entries_per_dir_page: usize,
    groups: RefCell<HashMap<u32, File>>,
    /// Meta page number for each live temporary file; temp files are
    /// never registered in the persistent directory.
    temp_files: RefCell<HashMap<u32, PageNumber>>,
    next_temp_id: RefCell<u32>,
}

impl FileManager {
    pub fn open(base_dir: impl AsRef<Path>, config: &DbConfig) -> DbResult<Rc<FileManager>> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|e| DbError::io("create_dir_all", e))?;

        let entries_per_dir_page = (config.page_size - PAGE_HEADER_SIZE) / 4;
        let fm = FileManager {
            base_dir,
            page_size: config.page_size,
            pages_per_group: config.pages_per_group,
            entries_per_dir_page,
            groups: RefCell::new(HashMap::new()),
            temp_files: RefCell::new(HashMap::new()),
            next_temp_id: RefCell::new(1),
        };

        let fresh = !fm.group_path(0).exists();
        fm.ensure_group_file(0)?;

        if fresh {
            fm.bootstrap()?;
        } else {
            fm.validate_magic()?;
        }

        Ok(Rc::new(fm))
    }

    fn group_path(&self, group: u32) -> PathBuf {
        self.base_dir.join(format!("db.{}", group))
    }

    fn ensure_group_file(&self, group: u32) -> DbResult<()> {
        if self.groups.borrow().contains_key(&group) {
            return Ok(());
        }
        let path = self.group_path(group);
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| DbError::io(format!("open group {}", group), e))?;
        if is_new {
            let len = self.pages_per_group as u64 * self.page_size as u64;
            file.set_len(len)
                .map_err(|e| DbError::io(format!("extend group {}", group), e))?;
        }
        self.groups.borrow_mut().insert(group, file);
        Ok(())
    }

    fn bootstrap(&self) -> DbResult<()> {
        // Page 0 of group 0 is the FM meta page; page 1 is the
        // first-level directory page, both installed directly (the
        // normal allocate_global_page path needs a readable meta page
        // to exist already).
        let meta = FmMeta {
            first_dir_pid: 1,
            free_head: INVALID_PID,
            last_group: 0,
            next_in_group: 2,
            last_file_id_hint: 0,
        };
        self.write_fm_meta(&meta)?;

        let mut dir_page = RawPage::new_zeroed(1, self.page_size);
        let mut header = PageHeader::empty();
        header.flags = FLAG_META_PAGE;
        dir_page.set_header(&header);
        self.write_raw_page(&dir_page)?;
        Ok(())
    }

    fn validate_magic(&self) -> DbResult<()> {
        let page = self.read_raw_page(0)?;
        let magic = u64::from_be_bytes(page.body()[0..8].try_into().unwrap());
        if magic != FM_META_MAGIC {
            return Err(DbError::fatal("corrupt file manager meta page: bad magic"));
        }
        Ok(())
    }

    fn read_fm_meta(&self) -> DbResult<FmMeta> {
        let page = self.read_raw_page(0)?;
        let b = page.body();
        Ok(FmMeta {
            first_dir_pid: u32::from_be_bytes(b[8..12].try_into().unwrap()),
            free_head: u32::from_be_bytes(b[12..16].try_into().unwrap()),
            last_group: u32::from_be_bytes(b[16..20].try_into().unwrap()),
            next_in_group: u32::from_be_bytes(b[20..24].try_into().unwrap()),
            last_file_id_hint: u32::from_be_bytes(b[24..28].try_into().unwrap()),
        })
    }

    fn write_fm_meta(&self, meta: &FmMeta) -> DbResult<()> {
        let mut page = RawPage::new_zeroed(0, self.page_size);
        let mut header = PageHeader::empty();
        header.flags = FLAG_META_PAGE;
        page.set_header(&header);
        let b = page.body_mut();
        b[0..8].copy_from_slice(&FM_META_MAGIC.to_be_bytes());
        b[8..12].copy_from_slice(&meta.first_dir_pid.to_be_bytes());
        b[12..16].copy_from_slice(&meta.free_head.to_be_bytes());
        b[16..20].copy_from_slice(&meta.last_group.to_be_bytes());
        b[20..24].copy_from_slice(&meta.next_in_group.to_be_bytes());
        b[24..28].copy_from_slice(&meta.last_file_id_hint.to_be_bytes());
        self.write_raw_page(&page)
    }

    // ---- raw page I/O -----------------------------------------------

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn read_raw_page(&self, pn: PageNumber) -> DbResult<RawPage> {
        let group = pn / self.pages_per_group;
        let offset = (pn % self.pages_per_group) as u64 * self.page_size as u64;
        self.ensure_group_file(group)?;
        let mut groups = self.groups.borrow_mut();
        let file = groups.get_mut(&group).unwrap();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| DbError::io(format!("seek page {}", pn), e))?;
        let mut buf = vec![0u8; self.page_size];
        file.read_exact(&mut buf)
            .map_err(|e| DbError::io(format!("read page {}", pn), e))?;
        Ok(RawPage::from_bytes(pn, buf))
    }

    pub fn write_raw_page(&self, page: &RawPage) -> DbResult<()> {
        let group = page.number / self.pages_per_group;
        let offset = (page.number % self.pages_per_group) as u64 * self.page_size as u64;
        self.ensure_group_file(group)?;
        let mut groups = self.groups.borrow_mut();
        let file = groups.get_mut(&group).unwrap();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| DbError::io(format!("seek page {}", page.number), e))?;
        file.write_all(&page.buf)
            .map_err(|e| DbError::io(format!("write page {}", page.number), e))?;
        Ok(())
    }

    // ---- global page allocation --------------------------------------

    fn allocate_global_page(&self) -> DbResult<PageNumber> {
        let mut meta = self.read_fm_meta()?;

        if meta.free_head != INVALID_PID {
            let pn = meta.free_head;
            let page = self.read_raw_page(pn)?;
            meta.free_head = page.header().next_pid;
            self.write_fm_meta(&meta)?;
            log::debug!("allocate_global_page: reused freed page {}", pn);
            return Ok(pn);
        }

        if meta.next_in_group >= self.pages_per_group {
            meta.last_group += 1;
            meta.next_in_group = 0;
        }
        self.ensure_group_file(meta.last_group)?;
        let pn = meta.last_group * self.pages_per_group + meta.next_in_group;
        meta.next_in_group += 1;
        self.write_fm_meta(&meta)?;

        let page = RawPage::new_zeroed(pn, self.page_size);
        self.write_raw_page(&page)?;
        log::debug!("allocate_global_page: grew group {} to page {}", meta.last_group, pn);
        Ok(pn)
    }

    fn free_global_page(&self, pn: PageNumber) -> DbResult<()> {
        let mut meta = self.read_fm_meta()?;
        let mut page = RawPage::new_zeroed(pn, self.page_size);
        let mut header = PageHeader::empty();
        header.next_pid = meta.free_head;
        page.set_header(&header);
        self.write_raw_page(&page)?;
        meta.free_head = pn;
        self.write_fm_meta(&meta)?;
        log::debug!("free_global_page: returned page {} to free list", pn);
        Ok(())
    }

    // ---- file directory ------------------------------------------------

    fn dir_indices(&self, file_id: u32) -> (usize, usize) {
        let value = (file_id & FILE_ID_VALUE_MASK) as usize;
        (value / self.entries_per_dir_page, value % self.entries_per_dir_page)
    }

    fn dir_entry_offset(&self, index: usize) -> usize {
        PAGE_HEADER_SIZE + index * 4
    }

    fn read_dir_entry(&self, dir_pid: PageNumber, index: usize) -> DbResult<u32> {
        let page = self.read_raw_page(dir_pid)?;
        let off = self.dir_entry_offset(index) - PAGE_HEADER_SIZE;
        Ok(u32::from_be_bytes(page.body()[off..off + 4].try_into().unwrap()))
    }

    fn write_dir_entry(&self, dir_pid: PageNumber, index: usize, value: u32) -> DbResult<()> {
        let mut page = self.read_raw_page(dir_pid)?;
        let off = self.dir_entry_offset(index) - PAGE_HEADER_SIZE;
        page.body_mut()[off..off + 4].copy_from_slice(&value.to_be_bytes());
        self.write_raw_page(&page)
    }

    fn meta_pid_for(&self, file_id: u32) -> DbResult<PageNumber> {
        let meta = self.read_fm_meta()?;
        let (top, bottom) = self.dir_indices(file_id);
        let second_level = self.read_dir_entry(meta.first_dir_pid, top)?;
        if second_level == 0 {
            return Err(DbError::fatal(format!("file {} does not exist", file_id)));
        }
        self.read_dir_entry(second_level, bottom)
    }

    fn register_file(&self, file_id: u32, meta_pid: PageNumber) -> DbResult<()> {
        let meta = self.read_fm_meta()?;
        let (top, bottom) = self.dir_indices(file_id);
        let mut second_level = self.read_dir_entry(meta.first_dir_pid, top)?;
        if second_level == 0 {
            second_level = self.allocate_global_page()?;
            let mut page = self.read_raw_page(second_level)?;
            let mut header = PageHeader::empty();
            header.flags = FLAG_META_PAGE;
            page.set_header(&header);
            self.write_raw_page(&page)?;
            self.write_dir_entry(meta.first_dir_pid, top, second_level)?;
        }
        self.write_dir_entry(second_level, bottom, meta_pid)
    }

    // ---- regular file meta ------------------------------------------

    fn read_file_meta(&self, meta_pid: PageNumber) -> DbResult<RegularFileMeta> {
        let page = self.read_raw_page(meta_pid)?;
        let b = page.body();
        Ok(RegularFileMeta {
            first_pid: u32::from_be_bytes(b[0..4].try_into().unwrap()),
            last_pid: u32::from_be_bytes(b[4..8].try_into().unwrap()),
            free_head: u32::from_be_bytes(b[8..12].try_into().unwrap()),
        })
    }

    fn write_file_meta(&self, meta_pid: PageNumber, file_id: u32, meta: &RegularFileMeta) -> DbResult<()> {
        let mut page = RawPage::new_zeroed(meta_pid, self.page_size);
        let mut header = PageHeader::empty();
        header.flags = FLAG_META_PAGE | FLAG_VFILE_PAGE;
        header.file_id = file_id;
        page.set_header(&header);
        let b = page.body_mut();
        b[0..4].copy_from_slice(&meta.first_pid.to_be_bytes());
        b[4..8].copy_from_slice(&meta.last_pid.to_be_bytes());
        b[8..12].copy_from_slice(&meta.free_head.to_be_bytes());
        self.write_raw_page(&page)
    }

    // ---- public: create/open/close virtual files ---------------------

    pub fn create_regular_file(self: &Rc<Self>) -> DbResult<VirtualFile> {
        let mut meta = self.read_fm_meta()?;
        let file_id = meta.last_file_id_hint + 1;
        if file_id & FILE_ID_VALUE_MASK != file_id {
            return Err(DbError::schema("regular file id space exhausted"));
        }
        meta.last_file_id_hint = file_id;
        self.write_fm_meta(&meta)?;

        let meta_pid = self.allocate_global_page()?;
        let data_pid = self.allocate_global_page()?;
        self.install_data_page(data_pid, file_id, INVALID_PID, INVALID_PID)?;

        let file_meta = RegularFileMeta {
            first_pid: data_pid,
            last_pid: data_pid,
            free_head: INVALID_PID,
        };
        self.write_file_meta(meta_pid, file_id, &file_meta)?;
        self.register_file(file_id, meta_pid)?;
        log::info!("created regular file {}", file_id);

        Ok(VirtualFile {
            file_id,
            meta_pid,
            temporary: false,
            fm: Rc::clone(self),
        })
    }

    pub fn open_regular_file(self: &Rc<Self>, file_id: u32) -> DbResult<VirtualFile> {
        let meta_pid = self.meta_pid_for(file_id)?;
        let page = self.read_raw_page(meta_pid)?;
        if page.header().file_id != file_id || !page.header().is_vfile() {
            return Err(DbError::fatal(format!("file {} meta page mismatch", file_id)));
        }
        Ok(VirtualFile {
            file_id,
            meta_pid,
            temporary: false,
            fm: Rc::clone(self),
        })
    }

    pub fn create_temp_file(self: &Rc<Self>) -> DbResult<VirtualFile> {
        let mut counter = self.next_temp_id.borrow_mut();
        let file_id = FILE_ID_TEMP | *counter;
        *counter += 1;
        drop(counter);

        let meta_pid = self.allocate_global_page()?;
        let data_pid = self.allocate_global_page()?;
        self.install_data_page(data_pid, file_id, INVALID_PID, INVALID_PID)?;

        let file_meta = RegularFileMeta {
            first_pid: data_pid,
            last_pid: data_pid,
            free_head: INVALID_PID,
        };
        self.write_file_meta(meta_pid, file_id, &file_meta)?;
        self.temp_files.borrow_mut().insert(file_id, meta_pid);

        Ok(VirtualFile {
            file_id,
            meta_pid,
            temporary: true,
            fm: Rc::clone(self),
        })
    }

    /// Allocates a fresh global page tagged with `file_id` but *not*
    /// linked into any prev/next chain — for callers whose pages relate
    /// to each other by a tree shape rather than a sequential chain
    /// (the B+Tree; spec.md section 4.5).
    pub fn allocate_tagged_page(&self, file_id: u32) -> DbResult<PageNumber> {
        let pn = self.allocate_global_page()?;
        let mut page = self.read_raw_page(pn)?;
        let mut header = PageHeader::empty();
        header.flags = FLAG_VFILE_PAGE;
        header.file_id = file_id;
        page.set_header(&header);
        for b in page.body_mut().iter_mut() {
            *b = 0;
        }
        self.write_raw_page(&page)?;
        log::debug!("allocate_tagged_page: page {} tagged for file {:#x}", pn, file_id);
        Ok(pn)
    }

    pub fn free_tagged_page(&self, pn: PageNumber) -> DbResult<()> {
        log::debug!("free_tagged_page: releasing page {}", pn);
        self.free_global_page(pn)
    }

    /// Reserves a fresh file id and a single meta page registered in the
    /// directory, without creating the chained data-page structure
    /// `create_regular_file` does. Callers (the B+Tree) own the
    /// interpretation of that meta page's body and the shape of the
    /// pages reachable from it.
    pub fn create_index_file(self: &Rc<Self>) -> DbResult<(u32, PageNumber)> {
        let mut meta = self.read_fm_meta()?;
        let file_id = meta.last_file_id_hint + 1;
        if file_id & FILE_ID_VALUE_MASK != file_id {
            return Err(DbError::schema("index file id space exhausted"));
        }
        meta.last_file_id_hint = file_id;
        self.write_fm_meta(&meta)?;

        let meta_pid = self.allocate_global_page()?;
        self.register_file(file_id, meta_pid)?;
        Ok((file_id, meta_pid))
    }

    pub fn open_index_file(&self, file_id: u32) -> DbResult<PageNumber> {
        self.meta_pid_for(file_id)
    }

    fn install_data_page(&self, pn: PageNumber, file_id: u32, prev: PageNumber, next: PageNumber) -> DbResult<()> {
        let mut page = self.read_raw_page(pn)?;
        let mut header = PageHeader::empty();
        header.flags = FLAG_VFILE_PAGE;
        header.file_id = file_id;
        header.prev_pid = prev;
        header.next_pid = next;
        page.set_header(&header);
        // zero the body so a fresh page reads as an empty slotted page.
        for b in page.body_mut().iter_mut() {
            *b = 0;
        }
        self.write_raw_page(&page)
    }
}

/// A doubly-linked list of pages sharing a file id (spec.md section 3
/// "Virtual File").
pub struct VirtualFile {
    pub file_id: u32,
    meta_pid: PageNumber,
    temporary: bool,
    fm: Rc<FileManager>,
}

impl VirtualFile {
    pub fn page_size(&self) -> usize {
        self.fm.page_size
    }

    pub fn read_page(&self, pn: PageNumber) -> DbResult<RawPage> {
        self.fm.read_raw_page(pn)
    }

    pub fn write_page(&self, page: &RawPage) -> DbResult<()> {
        self.fm.write_raw_page(page)
    }

    pub fn first_page_number(&self) -> DbResult<PageNumber> {
        Ok(self.fm.read_file_meta(self.meta_pid)?.first_pid)
    }

    /// A hint; callers iterate `next_pid` to reach the true tail when
    /// they need the exact last page (spec.md section 4.1).
    pub fn last_page_number_hint(&self) -> DbResult<PageNumber> {
        Ok(self.fm.read_file_meta(self.meta_pid)?.last_pid)
    }

    pub fn true_last_page_number(&self) -> DbResult<PageNumber> {
        let mut pn = self.last_page_number_hint()?;
        loop {
            let page = self.fm.read_raw_page(pn)?;
            let next = page.header().next_pid;
            if next == INVALID_PID {
                return Ok(pn);
            }
            pn = next;
        }
    }

    /// Allocates a new page at the tail of this file's data-page list,
    /// reusing a page from this file's own free list when one is
    /// available.
    pub fn allocate_page(&self) -> DbResult<PageNumber> {
        let mut meta = self.fm.read_file_meta(self.meta_pid)?;

        let pn = if meta.free_head != INVALID_PID {
            let freed = self.fm.read_raw_page(meta.free_head)?;
            let reused = meta.free_head;
            meta.free_head = freed.header().next_pid;
            reused
        } else {
            self.fm.allocate_global_page()?
        };

        let tail_pid = self.true_last_page_number()?;
        self.fm.install_data_page(pn, self.file_id, tail_pid, INVALID_PID)?;

        let mut tail = self.fm.read_raw_page(tail_pid)?;
        let mut header = tail.header();
        header.next_pid = pn;
        tail.set_header(&header);
        self.fm.write_raw_page(&tail)?;

        meta.last_pid = pn;
        self.fm.write_file_meta(self.meta_pid, self.file_id, &meta)?;
        Ok(pn)
    }

    /// Unlinks `pn` from the data-page list and prepends it (zeroed) to
    /// this file's free list.
    pub fn free_page(&self, pn: PageNumber) -> DbResult<()> {
        let mut meta = self.fm.read_file_meta(self.meta_pid)?;
        let page = self.fm.read_raw_page(pn)?;
        let header = page.header();

        if header.prev_pid != INVALID_PID {
            let mut prev = self.fm.read_raw_page(header.prev_pid)?;
            let mut prev_header = prev.header();
            prev_header.next_pid = header.next_pid;
            prev.set_header(&prev_header);
            self.fm.write_raw_page(&prev)?;
        } else {
            meta.first_pid = header.next_pid;
        }
        if header.next_pid != INVALID_PID {
            let mut next = self.fm.read_raw_page(header.next_pid)?;
            let mut next_header = next.header();
            next_header.prev_pid = header.prev_pid;
            next.set_header(&next_header);
            self.fm.write_raw_page(&next)?;
        } else {
            meta.last_pid = header.prev_pid;
        }

        let mut freed = RawPage::new_zeroed(pn, self.fm.page_size);
        let mut freed_header = PageHeader::empty();
        freed_header.flags = FLAG_VFILE_PAGE;
        freed_header.file_id = self.file_id;
        freed_header.next_pid = meta.free_head;
        freed.set_header(&freed_header);
        self.fm.write_raw_page(&freed)?;
        meta.free_head = pn;

        self.fm.write_file_meta(self.meta_pid, self.file_id, &meta)
    }

    /// Idempotent; temporary files release every page (data and free
    /// list) plus their meta page back to the global free list.
    pub fn close(&self) -> DbResult<()> {
        if !self.temporary {
            return Ok(());
        }
        if !self.fm.temp_files.borrow().contains_key(&self.file_id) {
            return Ok(()); // already closed
        }

        let meta = self.fm.read_file_meta(self.meta_pid)?;
        let mut pn = meta.first_pid;
        while pn != INVALID_PID {
            let page = self.fm.read_raw_page(pn)?;
            let next = page.header().next_pid;
            self.fm.free_global_page(pn)?;
            pn = next;
        }
        let mut pn = meta.free_head;
        while pn != INVALID_PID {
            let page = self.fm.read_raw_page(pn)?;
            let next = page.header().next_pid;
            self.fm.free_global_page(pn)?;
            pn = next;
        }
        self.fm.free_global_page(self.meta_pid)?;
        self.fm.temp_files.borrow_mut().remove(&self.file_id);
        Ok(())
    }
}

impl Drop for VirtualFile {
    fn drop(&mut self) {
        if self.temporary {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    fn open_fm() -> (tempfile::TempDir, Rc<FileManager>) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::open(dir.path(), &DbConfig::small_for_tests()).unwrap();
        (dir, fm)
    }

    #[test]
    fn create_and_reopen_regular_file() {
        let (_dir, fm) = open_fm();
        let file = fm.create_regular_file().unwrap();
        let file_id = file.file_id;
        let first = file.first_page_number().unwrap();
        drop(file);

        let reopened = fm.open_regular_file(file_id).unwrap();
        assert_eq!(reopened.first_page_number().unwrap(), first);
    }

    #[test]
    fn allocate_and_free_pages_round_trips() {
        let (_dir, fm) = open_fm();
        let file = fm.create_regular_file().unwrap();
        let p1 = file.allocate_page().unwrap();
        let p2 = file.allocate_page().unwrap();
        assert_eq!(file.true_last_page_number().unwrap(), p2);

        file.free_page(p1).unwrap();
        let p3 = file.allocate_page().unwrap();
        // freed page should be reused rather than growing storage.
        assert_eq!(p3, p1);
    }

    #[test]
    fn temp_file_pages_are_released_on_close() {
        let (_dir, fm) = open_fm();
        let temp = fm.create_temp_file().unwrap();
        let _ = temp.allocate_page().unwrap();
        let file_id = temp.file_id;
        temp.close().unwrap();
        assert!(!fm.temp_files.borrow().contains_key(&file_id));
    }

    #[test]
    fn many_files_span_second_level_directory_pages() {
        let (_dir, fm) = open_fm();
        let entries_per_page = fm.entries_per_dir_page;
        let mut ids = Vec::new();
        for _ in 0..(entries_per_page + 5) {
            let f = fm.create_regular_file().unwrap();
            ids.push(f.file_id);
        }
        for id in ids {
            assert!(fm.open_regular_file(id).is_ok());
        }
    }
}
