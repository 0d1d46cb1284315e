//! Slotted document heap.
//!
//! Variable-length records live on Heap (or Catalog) pages: a slot directory
//! grows up from the header, payloads grow down from the end. Insert places
//! first-fit via the super-page free-space map; replace overwrites in place
//! when the new payload fits the existing slot and relocates otherwise;
//! delete zeroes the slot entry. Dead payload space is reclaimed lazily,
//! when a write that would otherwise fit is blocked by fragmentation.
//!
//! Payloads larger than an inline slot (or longer than 0x7FFF bytes) spill
//! into a chain of Overflow pages; the slot then holds an 8-byte stub with
//! the overflow flag set in its slot-table length.

use byteorder::{BigEndian, ByteOrder};

use crate::storage::constants::*;
use crate::storage::freespace::FreeSpaceMap;
use crate::storage::page::{read_slot, write_slot, HeapPageHeader};
use crate::storage::page_types::PageKind;
use crate::storage::{DocumentLocation, PageRead, PageWrite};
use crate::{GdbxError, Result};

/// Usable bytes on a page (everything except the trailing CRC).
fn usable(page_size: u32) -> usize {
    page_size as usize - SIZE_PAGE_CRC
}

/// Largest payload stored inline on a page of this size.
pub fn inline_max(page_size: u32) -> usize {
    let fit = usable(page_size) - HEAP_SLOT_TABLE - HEAP_SLOT_SIZE;
    fit.min(HEAP_SLOT_LEN_MASK as usize)
}

/// Payload bytes one overflow page can carry.
fn overflow_chunk_max(page_size: u32) -> usize {
    usable(page_size) - OVERFLOW_DATA
}

/// Contiguous free bytes between the slot table and the payload area.
fn free_contiguous(page: &[u8], hdr: &HeapPageHeader) -> usize {
    let table_end = HEAP_SLOT_TABLE + hdr.slot_count as usize * HEAP_SLOT_SIZE;
    (hdr.free_low as usize).saturating_sub(table_end)
}

/// Free bytes recoverable by compaction (contiguous plus dead payload space).
fn free_total(page: &[u8], hdr: &HeapPageHeader) -> usize {
    let mut live = 0usize;
    let mut live_slots = 0usize;
    for i in 0..hdr.slot_count {
        let (off, raw) = read_slot(page, i);
        if off != 0 || raw != 0 {
            live += (raw & HEAP_SLOT_LEN_MASK) as usize;
            live_slots += 1;
        }
    }
    usable(page.len() as u32) - HEAP_SLOT_TABLE - live_slots * HEAP_SLOT_SIZE - live
}

/// Rewrite the page with live payloads packed against the end, keeping slot
/// indexes stable.
fn compact(page: &mut Vec<u8>, hdr: &mut HeapPageHeader) {
    let ps = page.len() as u32;
    let mut packed = vec![0u8; page.len()];
    hdr.write_to(&mut packed);
    let mut cursor = usable(ps);
    for i in 0..hdr.slot_count {
        let (off, raw) = read_slot(page, i);
        if off == 0 && raw == 0 {
            write_slot(&mut packed, i, 0, 0);
            continue;
        }
        let len = (raw & HEAP_SLOT_LEN_MASK) as usize;
        cursor -= len;
        packed[cursor..cursor + len].copy_from_slice(&page[off as usize..off as usize + len]);
        write_slot(&mut packed, i, cursor as u16, raw);
    }
    hdr.free_low = cursor as u16;
    hdr.write_to(&mut packed);
    *page = packed;
}

/// The bucket a page should advertise, based on compactable free space.
fn bucket_of(page: &[u8], hdr: &HeapPageHeader) -> u8 {
    FreeSpaceMap::bucket_for(free_total(page, hdr), usable(page.len() as u32))
}

fn place(
    page: &mut Vec<u8>,
    hdr: &mut HeapPageHeader,
    payload: &[u8],
    raw_len: u16,
) -> Result<u16> {
    // Reuse the first zeroed slot, else append one.
    let mut slot = None;
    for i in 0..hdr.slot_count {
        let (off, raw) = read_slot(page, i);
        if off == 0 && raw == 0 {
            slot = Some(i);
            break;
        }
    }
    let (slot, appending) = match slot {
        Some(i) => (i, false),
        None => (hdr.slot_count, true),
    };
    let needed = payload.len() + if appending { HEAP_SLOT_SIZE } else { 0 };
    if free_contiguous(page, hdr) < needed {
        compact(page, hdr);
        if free_contiguous(page, hdr) < needed {
            return Err(GdbxError::IoError(
                "heap page accepted a payload it cannot hold".into(),
            ));
        }
    }
    let start = hdr.free_low as usize - payload.len();
    page[start..start + payload.len()].copy_from_slice(payload);
    hdr.free_low = start as u16;
    if appending {
        hdr.slot_count += 1;
    }
    hdr.write_to(page);
    write_slot(page, slot, start as u16, raw_len);
    Ok(slot)
}

/// Write a payload into an overflow chain; returns the 8-byte stub.
fn write_overflow<S: PageWrite + ?Sized>(store: &mut S, payload: &[u8]) -> Result<[u8; 8]> {
    let chunk_max = overflow_chunk_max(store.page_size());
    let chunks: Vec<&[u8]> = payload.chunks(chunk_max).collect();
    let mut page_ids = Vec::with_capacity(chunks.len());
    for _ in 0..chunks.len() {
        page_ids.push(store.allocate()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let mut page = vec![0u8; store.page_size() as usize];
        page[OVERFLOW_KIND] = PageKind::Overflow.as_u8();
        page[OVERFLOW_FLAGS] = 0;
        let next = page_ids.get(i + 1).copied().unwrap_or(PAGE_NONE);
        BigEndian::write_u32(&mut page[OVERFLOW_NEXT..], next);
        BigEndian::write_u16(&mut page[OVERFLOW_CHUNK_LEN..], chunk.len() as u16);
        page[OVERFLOW_DATA..OVERFLOW_DATA + chunk.len()].copy_from_slice(chunk);
        store.write(page_ids[i], page)?;
    }
    let mut stub = [0u8; 8];
    BigEndian::write_u32(&mut stub[..4], page_ids[0]);
    BigEndian::write_u32(&mut stub[4..], payload.len() as u32);
    Ok(stub)
}

fn read_overflow<S: PageRead + ?Sized>(store: &mut S, stub: &[u8]) -> Result<Vec<u8>> {
    let mut page_id = BigEndian::read_u32(&stub[..4]);
    let total = BigEndian::read_u32(&stub[4..]) as usize;
    let mut out = Vec::with_capacity(total);
    while page_id != PAGE_NONE {
        let page = store.read(page_id)?;
        if PageKind::from_u8(page[OVERFLOW_KIND]) != PageKind::Overflow {
            return Err(GdbxError::FileCorrupt(format!(
                "overflow chain reached a {} page",
                PageKind::from_u8(page[OVERFLOW_KIND])
            )));
        }
        let len = BigEndian::read_u16(&page[OVERFLOW_CHUNK_LEN..]) as usize;
        out.extend_from_slice(&page[OVERFLOW_DATA..OVERFLOW_DATA + len]);
        page_id = BigEndian::read_u32(&page[OVERFLOW_NEXT..]);
    }
    if out.len() != total {
        return Err(GdbxError::FileCorrupt(format!(
            "overflow chain yielded {} bytes, stub promised {}",
            out.len(),
            total
        )));
    }
    Ok(out)
}

fn free_overflow<S: PageWrite + ?Sized>(store: &mut S, stub: &[u8]) -> Result<()> {
    let mut page_id = BigEndian::read_u32(&stub[..4]);
    while page_id != PAGE_NONE {
        let page = store.read(page_id)?;
        let next = BigEndian::read_u32(&page[OVERFLOW_NEXT..]);
        store.free_page(page_id)?;
        page_id = next;
    }
    Ok(())
}

/// Insert a record; returns its location.
pub fn insert<S: PageWrite + ?Sized>(
    store: &mut S,
    fsmap: &mut FreeSpaceMap,
    kind: PageKind,
    payload: &[u8],
) -> Result<DocumentLocation> {
    let (inline, raw_len): (Vec<u8>, u16) = if payload.len() > inline_max(store.page_size()) {
        let stub = write_overflow(store, payload)?;
        (
            stub.to_vec(),
            HEAP_SLOT_OVERFLOW_FLAG | HEAP_OVERFLOW_STUB_LEN as u16,
        )
    } else {
        (payload.to_vec(), payload.len() as u16)
    };

    // First fit among pages the map says could take it, re-checked against
    // the real directory (the map is advisory).
    let needed = inline.len() + HEAP_SLOT_SIZE;
    // Bucket 0 also covers untracked and full pages; never scan those.
    let min_bucket = FreeSpaceMap::bucket_for(needed, usable(store.page_size())).max(1);
    let candidates: Vec<u32> = fsmap.candidates(min_bucket, store.page_count()).collect();
    for page_id in candidates {
        let mut page = match store.read(page_id) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if PageKind::from_u8(page[HEAP_KIND]) != kind {
            continue;
        }
        let mut hdr = HeapPageHeader::parse(&page)?;
        if free_total(&page, &hdr) < needed {
            fsmap.set(page_id, bucket_of(&page, &hdr));
            continue;
        }
        let slot = place(&mut page, &mut hdr, &inline, raw_len)?;
        fsmap.set(page_id, bucket_of(&page, &hdr));
        store.write(page_id, page)?;
        return Ok(DocumentLocation::new(page_id, slot));
    }

    // No tracked page fits; start a fresh one.
    let page_id = store.allocate()?;
    let mut page = vec![0u8; store.page_size() as usize];
    HeapPageHeader::init_page(&mut page, kind);
    let mut hdr = HeapPageHeader::parse(&page)?;
    let slot = place(&mut page, &mut hdr, &inline, raw_len)?;
    fsmap.set(page_id, bucket_of(&page, &hdr));
    store.write(page_id, page)?;
    Ok(DocumentLocation::new(page_id, slot))
}

/// Fetch a record's payload, following any overflow chain.
pub fn get<S: PageRead + ?Sized>(store: &mut S, loc: DocumentLocation) -> Result<Vec<u8>> {
    let page = store.read(loc.page_id)?;
    let hdr = HeapPageHeader::parse(&page)?;
    if loc.slot >= hdr.slot_count {
        return Err(GdbxError::FileCorrupt(format!(
            "slot {} out of range on page {}",
            loc.slot, loc.page_id
        )));
    }
    let (off, raw) = read_slot(&page, loc.slot);
    if off == 0 && raw == 0 {
        return Err(GdbxError::FileCorrupt(format!(
            "dangling location: page {} slot {} is empty",
            loc.page_id, loc.slot
        )));
    }
    let len = (raw & HEAP_SLOT_LEN_MASK) as usize;
    let body = &page[off as usize..off as usize + len];
    if raw & HEAP_SLOT_OVERFLOW_FLAG != 0 {
        let stub = body.to_vec();
        read_overflow(store, &stub)
    } else {
        Ok(body.to_vec())
    }
}

/// Page ids of the overflow chain behind a record, if any. Reads only;
/// used when whole pages are released without touching their slots.
pub fn overflow_pages<S: PageRead + ?Sized>(
    store: &mut S,
    loc: DocumentLocation,
) -> Result<Vec<u32>> {
    let page = store.read(loc.page_id)?;
    let (off, raw) = read_slot(&page, loc.slot);
    if off == 0 && raw == 0 || raw & HEAP_SLOT_OVERFLOW_FLAG == 0 {
        return Ok(Vec::new());
    }
    let len = (raw & HEAP_SLOT_LEN_MASK) as usize;
    let stub = page[off as usize..off as usize + len].to_vec();
    let mut chain = Vec::new();
    let mut page_id = BigEndian::read_u32(&stub[..4]);
    while page_id != PAGE_NONE {
        chain.push(page_id);
        let page = store.read(page_id)?;
        page_id = BigEndian::read_u32(&page[OVERFLOW_NEXT..]);
    }
    Ok(chain)
}

/// Replace a record. Overwrites in place when the new payload fits the
/// existing slot; otherwise relocates and returns the new location.
pub fn replace<S: PageWrite + ?Sized>(
    store: &mut S,
    fsmap: &mut FreeSpaceMap,
    loc: DocumentLocation,
    payload: &[u8],
) -> Result<DocumentLocation> {
    let mut page = store.read(loc.page_id)?;
    let hdr = HeapPageHeader::parse(&page)?;
    let (off, raw) = read_slot(&page, loc.slot);
    if off == 0 && raw == 0 {
        return Err(GdbxError::FileCorrupt(format!(
            "dangling location: page {} slot {} is empty",
            loc.page_id, loc.slot
        )));
    }
    let old_len = (raw & HEAP_SLOT_LEN_MASK) as usize;
    let was_overflow = raw & HEAP_SLOT_OVERFLOW_FLAG != 0;

    if !was_overflow
        && payload.len() <= old_len
        && payload.len() <= inline_max(store.page_size())
    {
        page[off as usize..off as usize + payload.len()].copy_from_slice(payload);
        write_slot(&mut page, loc.slot, off, payload.len() as u16);
        let hdr2 = HeapPageHeader::parse(&page)?;
        fsmap.set(loc.page_id, bucket_of(&page, &hdr2));
        store.write(loc.page_id, page)?;
        return Ok(loc);
    }

    // Release the old slot (and chain), then insert fresh.
    if was_overflow {
        let stub = page[off as usize..off as usize + old_len].to_vec();
        free_overflow(store, &stub)?;
    }
    write_slot(&mut page, loc.slot, 0, 0);
    fsmap.set(loc.page_id, bucket_of(&page, &hdr));
    store.write(loc.page_id, page)?;
    insert(store, fsmap, hdr.kind, payload)
}

/// Delete a record: zero its slot and release any overflow chain.
pub fn delete<S: PageWrite + ?Sized>(
    store: &mut S,
    fsmap: &mut FreeSpaceMap,
    loc: DocumentLocation,
) -> Result<()> {
    let mut page = store.read(loc.page_id)?;
    let hdr = HeapPageHeader::parse(&page)?;
    let (off, raw) = read_slot(&page, loc.slot);
    if off == 0 && raw == 0 {
        return Err(GdbxError::FileCorrupt(format!(
            "dangling location: page {} slot {} is empty",
            loc.page_id, loc.slot
        )));
    }
    if raw & HEAP_SLOT_OVERFLOW_FLAG != 0 {
        let len = (raw & HEAP_SLOT_LEN_MASK) as usize;
        let stub = page[off as usize..off as usize + len].to_vec();
        free_overflow(store, &stub)?;
    }
    write_slot(&mut page, loc.slot, 0, 0);
    fsmap.set(loc.page_id, bucket_of(&page, &hdr));
    store.write(loc.page_id, page)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::MemStore;

    const PS: u32 = SIZE_PAGE_DEFAULT;

    fn setup() -> (MemStore, FreeSpaceMap) {
        (MemStore::new(PS), FreeSpaceMap::new(PS))
    }

    #[test]
    fn test_insert_get_round_trip() {
        let (mut store, mut fsmap) = setup();
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, b"hello world").unwrap();
        assert_eq!(get(&mut store, loc).unwrap(), b"hello world");
    }

    #[test]
    fn test_small_records_share_a_page() {
        let (mut store, mut fsmap) = setup();
        let a = insert(&mut store, &mut fsmap, PageKind::Heap, b"aaa").unwrap();
        let b = insert(&mut store, &mut fsmap, PageKind::Heap, b"bbbb").unwrap();
        assert_eq!(a.page_id, b.page_id);
        assert_ne!(a.slot, b.slot);
        assert_eq!(get(&mut store, a).unwrap(), b"aaa");
        assert_eq!(get(&mut store, b).unwrap(), b"bbbb");
    }

    #[test]
    fn test_full_page_spills_to_next() {
        let (mut store, mut fsmap) = setup();
        let big = vec![7u8; 3000];
        let a = insert(&mut store, &mut fsmap, PageKind::Heap, &big).unwrap();
        let b = insert(&mut store, &mut fsmap, PageKind::Heap, &big).unwrap();
        let c = insert(&mut store, &mut fsmap, PageKind::Heap, &big).unwrap();
        assert_eq!(a.page_id, b.page_id);
        assert_ne!(a.page_id, c.page_id);
    }

    #[test]
    fn test_replace_in_place_when_it_fits() {
        let (mut store, mut fsmap) = setup();
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, b"0123456789").unwrap();
        let new_loc = replace(&mut store, &mut fsmap, loc, b"abcde").unwrap();
        assert_eq!(new_loc, loc);
        assert_eq!(get(&mut store, new_loc).unwrap(), b"abcde");
    }

    #[test]
    fn test_replace_relocates_when_grown() {
        let (mut store, mut fsmap) = setup();
        // Fill most of the page so the grown payload cannot stay.
        let filler = vec![1u8; 7000];
        let _pin = insert(&mut store, &mut fsmap, PageKind::Heap, &filler).unwrap();
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, b"short").unwrap();
        let grown = vec![2u8; 4000];
        let new_loc = replace(&mut store, &mut fsmap, loc, &grown).unwrap();
        assert_ne!(new_loc.page_id, loc.page_id);
        assert_eq!(get(&mut store, new_loc).unwrap(), grown);
    }

    #[test]
    fn test_delete_then_dangling_get_fails() {
        let (mut store, mut fsmap) = setup();
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, b"gone").unwrap();
        delete(&mut store, &mut fsmap, loc).unwrap();
        assert!(get(&mut store, loc).is_err());
    }

    #[test]
    fn test_deleted_space_is_reused_via_compaction() {
        let (mut store, mut fsmap) = setup();
        let chunk = vec![3u8; 2500];
        let a = insert(&mut store, &mut fsmap, PageKind::Heap, &chunk).unwrap();
        let b = insert(&mut store, &mut fsmap, PageKind::Heap, &chunk).unwrap();
        let c = insert(&mut store, &mut fsmap, PageKind::Heap, &chunk).unwrap();
        assert_eq!(a.page_id, c.page_id);
        // Free the middle record, leaving a hole the next insert must
        // compact to use.
        delete(&mut store, &mut fsmap, b).unwrap();
        let d = insert(&mut store, &mut fsmap, PageKind::Heap, &chunk).unwrap();
        assert_eq!(d.page_id, a.page_id);
        assert_eq!(get(&mut store, a).unwrap(), chunk);
        assert_eq!(get(&mut store, c).unwrap(), chunk);
        assert_eq!(get(&mut store, d).unwrap(), chunk);
    }

    #[test]
    fn test_overflow_round_trip() {
        let (mut store, mut fsmap) = setup();
        let huge: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, &huge).unwrap();
        assert_eq!(get(&mut store, loc).unwrap(), huge);
    }

    #[test]
    fn test_overflow_chain_freed_on_delete() {
        let (mut store, mut fsmap) = setup();
        let huge = vec![9u8; 40_000];
        let loc = insert(&mut store, &mut fsmap, PageKind::Heap, &huge).unwrap();
        let pages_before = store.pages.len();
        delete(&mut store, &mut fsmap, loc).unwrap();
        assert!(store.freed.len() >= 4);
        assert!(store.pages.len() < pages_before);
    }

    #[test]
    fn test_kinds_do_not_mix_pages() {
        let (mut store, mut fsmap) = setup();
        let a = insert(&mut store, &mut fsmap, PageKind::Heap, b"doc").unwrap();
        let b = insert(&mut store, &mut fsmap, PageKind::Catalog, b"meta").unwrap();
        assert_ne!(a.page_id, b.page_id);
        let c = insert(&mut store, &mut fsmap, PageKind::Catalog, b"meta2").unwrap();
        assert_eq!(b.page_id, c.page_id);
    }
}
