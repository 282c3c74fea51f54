//! Variable-length slotted page layout (spec.md section 3 "Slotted
//! Variable-Length Data Page" and section 4.3).
//!
//! Body layout (the `page_size - 16` bytes after the page header):
//! `[free_space_ptr: u16][slot_count: u16][occupied_count: u16][slot directory][... free ...][record payloads]`
//! The slot directory grows upward from offset 6; record payloads grow
//! downward from the end of the body. Each directory entry is
//! `(offset: u16, length: u16)`; `length == 0` marks an unoccupied slot.
//!
//! Operates directly on the byte slice borrowed from a pinned buffer
//! frame so no extra copy is needed, the way the teacher's page types
//! read fields straight out of a `Vec<u8>` rather than materializing a
//! parsed struct up front.

use crate::common::ids::{SlotId, INVALID_SID, MIN_SLOT_ID};
use crate::error::{DbError, DbResult};

const DIR_START: usize = 6;
const ENTRY_SIZE: usize = 4;

pub struct SlottedPage;

impl SlottedPage {
    pub fn initialize(body: &mut [u8]) {
        let len = body.len() as u16;
        body[0..2].copy_from_slice(&len.to_be_bytes());
        body[2..4].copy_from_slice(&0u16.to_be_bytes());
        body[4..6].copy_from_slice(&0u16.to_be_bytes());
    }

    fn free_space_ptr(body: &[u8]) -> u16 {
        u16::from_be_bytes([body[0], body[1]])
    }

    fn set_free_space_ptr(body: &mut [u8], v: u16) {
        body[0..2].copy_from_slice(&v.to_be_bytes());
    }

    pub fn slot_count(body: &[u8]) -> u16 {
        u16::from_be_bytes([body[2], body[3]])
    }

    fn set_slot_count(body: &mut [u8], v: u16) {
        body[2..4].copy_from_slice(&v.to_be_bytes());
    }

    pub fn record_count(body: &[u8]) -> u16 {
        u16::from_be_bytes([body[4], body[5]])
    }

    fn set_record_count(body: &mut [u8], v: u16) {
        body[4..6].copy_from_slice(&v.to_be_bytes());
    }

    pub fn min_slot_id(_body: &[u8]) -> SlotId {
        MIN_SLOT_ID
    }

    pub fn max_slot_id(body: &[u8]) -> SlotId {
        Self::slot_count(body)
    }

    fn entry_offset(slot_id: SlotId) -> usize {
        DIR_START + (slot_id - MIN_SLOT_ID) as usize * ENTRY_SIZE
    }

    fn read_entry(body: &[u8], slot_id: SlotId) -> (u16, u16) {
        let off = Self::entry_offset(slot_id);
        (
            u16::from_be_bytes([body[off], body[off + 1]]),
            u16::from_be_bytes([body[off + 2], body[off + 3]]),
        )
    }

    fn write_entry(body: &mut [u8], slot_id: SlotId, offset: u16, length: u16) {
        let off = Self::entry_offset(slot_id);
        body[off..off + 2].copy_from_slice(&offset.to_be_bytes());
        body[off + 2..off + 4].copy_from_slice(&length.to_be_bytes());
    }

    pub fn is_occupied(body: &[u8], slot_id: SlotId) -> bool {
        if slot_id < MIN_SLOT_ID || slot_id > Self::slot_count(body) {
            return false;
        }
        Self::read_entry(body, slot_id).1 > 0
    }

    pub fn get_record<'a>(body: &'a [u8], slot_id: SlotId) -> Option<&'a [u8]> {
        if !Self::is_occupied(body, slot_id) {
            return None;
        }
        let (offset, length) = Self::read_entry(body, slot_id);
        Some(&body[offset as usize..offset as usize + length as usize])
    }

    pub fn get_record_buffer<'a>(body: &'a [u8], slot_id: SlotId) -> DbResult<&'a [u8]> {
        Self::get_record(body, slot_id)
            .ok_or_else(|| DbError::precondition(format!("slot {} is not occupied", slot_id)))
    }

    fn directory_end(body: &[u8]) -> usize {
        DIR_START + Self::slot_count(body) as usize * ENTRY_SIZE
    }

    /// Bytes still reachable for new payload + a fresh directory entry,
    /// assuming no compaction. `extra_slot` is `true` when a brand new
    /// directory entry (not an existing empty one) would be needed.
    fn contiguous_free(body: &[u8]) -> usize {
        (Self::free_space_ptr(body) as usize).saturating_sub(Self::directory_end(body))
    }

    /// Rewrites every occupied record tightly against the high end of
    /// the body, in slot-id order, to reclaim space fragmented by
    /// earlier erases. Offsets in the slot directory are updated in
    /// place.
    fn compact(body: &mut [u8]) {
        let slot_count = Self::slot_count(body);
        let mut entries: Vec<(SlotId, u16, u16)> = Vec::new();
        for sid in MIN_SLOT_ID..=slot_count {
            let (offset, length) = Self::read_entry(body, sid);
            if length > 0 {
                entries.push((sid, offset, length));
            }
        }
        // Farthest-from-start (largest offset) payloads get placed
        // first so the rewrite never overlaps source and destination
        // ranges in a way that corrupts data still to be copied.
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        let mut write_ptr = body.len() as u16;
        let mut rewritten: Vec<(SlotId, u16, u16)> = Vec::new();
        for (sid, offset, length) in entries {
            write_ptr -= length;
            // Copy via a temporary since source and destination regions
            // may overlap.
            let payload: Vec<u8> = body[offset as usize..offset as usize + length as usize].to_vec();
            body[write_ptr as usize..write_ptr as usize + length as usize].copy_from_slice(&payload);
            rewritten.push((sid, write_ptr, length));
        }
        for (sid, offset, length) in rewritten {
            Self::write_entry(body, sid, offset, length);
        }
        Self::set_free_space_ptr(body, write_ptr);
    }

    fn find_empty_slot(body: &[u8]) -> Option<SlotId> {
        let slot_count = Self::slot_count(body);
        (MIN_SLOT_ID..=slot_count).find(|&sid| Self::read_entry(body, sid).1 == 0)
    }

    /// Returns `INVALID_SID` when the record does not fit on this page.
    pub fn insert_record(body: &mut [u8], rec: &[u8]) -> SlotId {
        let needed = rec.len() as u16;
        let reuse = Self::find_empty_slot(body);
        let extra_for_new_entry = if reuse.is_none() { ENTRY_SIZE } else { 0 };

        if Self::contiguous_free(body) < needed as usize + extra_for_new_entry {
            Self::compact(body);
            if Self::contiguous_free(body) < needed as usize + extra_for_new_entry {
                return INVALID_SID;
            }
        }

        let slot_id = match reuse {
            Some(sid) => sid,
            None => {
                let new_count = Self::slot_count(body) + 1;
                Self::set_slot_count(body, new_count);
                new_count
            }
        };

        let new_free = Self::free_space_ptr(body) - needed;
        body[new_free as usize..new_free as usize + needed as usize].copy_from_slice(rec);
        Self::set_free_space_ptr(body, new_free);
        Self::write_entry(body, slot_id, new_free, needed);
        Self::set_record_count(body, Self::record_count(body) + 1);
        slot_id
    }

    /// Places `rec` at exactly `slot_id`, extending the directory with
    /// empty slots as needed. `slot_id` must currently be unoccupied.
    /// Returns `false` if the record does not fit.
    pub fn insert_at(body: &mut [u8], slot_id: SlotId, rec: &[u8]) -> bool {
        let slot_count = Self::slot_count(body);
        if slot_id > slot_count {
            for sid in (slot_count + 1)..slot_id {
                Self::write_entry(body, sid, 0, 0);
            }
            Self::set_slot_count(body, slot_id);
        } else if Self::read_entry(body, slot_id).1 > 0 {
            return false;
        }

        let needed = rec.len() as u16;
        if Self::contiguous_free(body) < needed as usize {
            Self::compact(body);
            if Self::contiguous_free(body) < needed as usize {
                return false;
            }
        }
        let new_free = Self::free_space_ptr(body) - needed;
        body[new_free as usize..new_free as usize + needed as usize].copy_from_slice(rec);
        Self::set_free_space_ptr(body, new_free);
        Self::write_entry(body, slot_id, new_free, needed);
        Self::set_record_count(body, Self::record_count(body) + 1);
        true
    }

    pub fn erase(body: &mut [u8], slot_id: SlotId) -> bool {
        if !Self::is_occupied(body, slot_id) {
            return false;
        }
        Self::write_entry(body, slot_id, 0, 0);
        Self::set_record_count(body, Self::record_count(body) - 1);
        true
    }

    /// In-place update when `new_rec` fits within the old slot's
    /// allocated length; otherwise erases the slot and returns `false`
    /// ("does not fit" — the caller, `HeapTable::update_record`,
    /// reinserts elsewhere).
    pub fn update(body: &mut [u8], slot_id: SlotId, new_rec: &[u8]) -> bool {
        if !Self::is_occupied(body, slot_id) {
            return false;
        }
        let (offset, old_len) = Self::read_entry(body, slot_id);
        if new_rec.len() as u16 <= old_len {
            let off = offset as usize;
            body[off..off + new_rec.len()].copy_from_slice(new_rec);
            Self::write_entry(body, slot_id, offset, new_rec.len() as u16);
            true
        } else {
            Self::erase(body, slot_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_body() -> Vec<u8> {
        let mut body = vec![0u8; 4080];
        SlottedPage::initialize(&mut body);
        body
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut body = new_body();
        let sid = SlottedPage::insert_record(&mut body, b"hello world");
        assert_ne!(sid, INVALID_SID);
        assert_eq!(SlottedPage::get_record(&body, sid), Some(&b"hello world"[..]));
    }

    #[test]
    fn erase_then_reuse_slot() {
        let mut body = new_body();
        let s1 = SlottedPage::insert_record(&mut body, b"aaaa");
        let s2 = SlottedPage::insert_record(&mut body, b"bbbb");
        assert!(SlottedPage::erase(&mut body, s1));
        assert!(!SlottedPage::is_occupied(&body, s1));
        let s3 = SlottedPage::insert_record(&mut body, b"cccc");
        assert_eq!(s3, s1, "erased slot id should be reused");
        assert_eq!(SlottedPage::get_record(&body, s2), Some(&b"bbbb"[..]));
    }

    #[test]
    fn update_in_place_vs_relocate() {
        let mut body = new_body();
        let sid = SlottedPage::insert_record(&mut body, b"0123456789");
        assert!(SlottedPage::update(&mut body, sid, b"short"));
        assert_eq!(SlottedPage::get_record(&body, sid), Some(&b"short"[..]));

        assert!(!SlottedPage::update(&mut body, sid, b"this is way too long now"));
        assert!(!SlottedPage::is_occupied(&body, sid));
    }

    #[test]
    fn compaction_reclaims_fragmented_space() {
        let mut body = vec![0u8; 64]; // tiny page to force fragmentation quickly
        SlottedPage::initialize(&mut body);
        let s1 = SlottedPage::insert_record(&mut body, &[1u8; 20]);
        let _s2 = SlottedPage::insert_record(&mut body, &[2u8; 20]);
        assert!(SlottedPage::erase(&mut body, s1));
        // a 20-byte insert now needs compaction to find contiguous space.
        let s3 = SlottedPage::insert_record(&mut body, &[3u8; 20]);
        assert_ne!(s3, INVALID_SID);
        assert_eq!(SlottedPage::get_record(&body, s3), Some(&[3u8; 20][..]));
    }

    #[test]
    fn full_page_insert_fails_with_invalid_sid() {
        let mut body = vec![0u8; 32];
        SlottedPage::initialize(&mut body);
        let _ = SlottedPage::insert_record(&mut body, &[9u8; 20]);
        assert_eq!(SlottedPage::insert_record(&mut body, &[9u8; 20]), INVALID_SID);
    }
}
