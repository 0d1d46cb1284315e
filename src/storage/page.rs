//! Page header parsing and writing.
//!
//! Three fixed layouts live here: the super-page (page 0) holding the file
//! identity and root pointers, the 16-byte tree node header present on every
//! B+tree page, and the slotted header on heap and catalog pages. Bodies are
//! managed by their owning modules ([`crate::storage::btree`],
//! [`crate::storage::heap`]).

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::storage::checksum;
use crate::storage::constants::*;
use crate::storage::page_types::PageKind;
use crate::util::hex::format_hex32;
use crate::{GdbxError, Result};

/// Parsed super-page header (page 0, first 64 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuperPage {
    /// Format version. Bytes 4-7.
    pub version: u32,
    /// Page size in bytes. Bytes 8-11.
    pub page_size: u32,
    /// Root page of the free-page bitmap chain. Bytes 12-15.
    pub bitmap_root: u32,
    /// Root page of the catalog tree. Bytes 16-19.
    pub catalog_root: u32,
    /// Total number of pages in the file. Bytes 20-23.
    pub page_count: u32,
    /// Durable WAL tail offset at the last checkpoint. Bytes 24-31.
    pub wal_offset: u64,
}

impl SuperPage {
    /// Parse and validate the super-page from a raw page 0 buffer.
    pub fn parse(page: &[u8]) -> Result<Self> {
        if page.len() < SUPER_HEADER_SIZE {
            return Err(GdbxError::FileCorrupt(format!(
                "super-page truncated: {} bytes",
                page.len()
            )));
        }
        if page[SUPER_MAGIC..SUPER_MAGIC + 4] != MAGIC {
            return Err(GdbxError::FileCorrupt(
                "bad magic, not a gdbx database".into(),
            ));
        }
        let version = BigEndian::read_u32(&page[SUPER_VERSION..]);
        if version != FORMAT_VERSION {
            return Err(GdbxError::FormatVersionMismatch {
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        let stored = BigEndian::read_u32(&page[SUPER_CRC..]);
        let computed = checksum::super_header_crc(page);
        if stored != computed {
            return Err(GdbxError::FileCorrupt(format!(
                "super-page checksum mismatch: stored {}, computed {}",
                format_hex32(stored),
                format_hex32(computed)
            )));
        }
        let page_size = BigEndian::read_u32(&page[SUPER_PAGE_SIZE..]);
        if !(SIZE_PAGE_MIN..=SIZE_PAGE_MAX).contains(&page_size) || !page_size.is_power_of_two() {
            return Err(GdbxError::FileCorrupt(format!(
                "unsupported page size {}",
                page_size
            )));
        }
        Ok(SuperPage {
            version,
            page_size,
            bitmap_root: BigEndian::read_u32(&page[SUPER_BITMAP_ROOT..]),
            catalog_root: BigEndian::read_u32(&page[SUPER_CATALOG_ROOT..]),
            page_count: BigEndian::read_u32(&page[SUPER_PAGE_COUNT..]),
            wal_offset: BigEndian::read_u64(&page[SUPER_WAL_OFFSET..]),
        })
    }

    /// Write the header fields and header CRC into a page 0 buffer.
    ///
    /// Bytes past [`SUPER_HEADER_SIZE`] (the free-space map) are left as the
    /// caller set them; the trailing page CRC is not stamped here.
    pub fn write_to(&self, page: &mut [u8]) {
        page[SUPER_MAGIC..SUPER_MAGIC + 4].copy_from_slice(&MAGIC);
        BigEndian::write_u32(&mut page[SUPER_VERSION..], self.version);
        BigEndian::write_u32(&mut page[SUPER_PAGE_SIZE..], self.page_size);
        BigEndian::write_u32(&mut page[SUPER_BITMAP_ROOT..], self.bitmap_root);
        BigEndian::write_u32(&mut page[SUPER_CATALOG_ROOT..], self.catalog_root);
        BigEndian::write_u32(&mut page[SUPER_PAGE_COUNT..], self.page_count);
        BigEndian::write_u64(&mut page[SUPER_WAL_OFFSET..], self.wal_offset);
        let crc = checksum::super_header_crc(page);
        BigEndian::write_u32(&mut page[SUPER_CRC..], crc);
        // Reserved tail of the fixed header stays zero.
        for b in &mut page[SUPER_CRC + 4..SUPER_HEADER_SIZE] {
            *b = 0;
        }
    }
}

/// Parsed tree node header (16 bytes, on every TreeInternal/TreeLeaf page).
#[derive(Debug, Clone, Serialize)]
pub struct TreeNodeHeader {
    /// Page kind. Byte 0.
    pub kind: PageKind,
    /// Reserved flags. Byte 1.
    pub flags: u8,
    /// Number of keys in the node. Bytes 2-3.
    pub key_count: u16,
    /// Next leaf in the left-to-right chain (leaves only, 0 = none). Bytes 4-7.
    pub next_leaf: u32,
    /// Transaction id of the latest writer. Bytes 8-15.
    pub txn_id: u64,
}

impl TreeNodeHeader {
    /// Parse a tree node header from a page buffer.
    pub fn parse(page: &[u8]) -> Result<Self> {
        if page.len() < NODE_HEADER_SIZE {
            return Err(GdbxError::FileCorrupt("tree page truncated".into()));
        }
        let kind = PageKind::from_u8(page[NODE_KIND]);
        if !kind.is_tree() {
            return Err(GdbxError::FileCorrupt(format!(
                "expected tree page, found {}",
                kind
            )));
        }
        Ok(TreeNodeHeader {
            kind,
            flags: page[NODE_FLAGS],
            key_count: BigEndian::read_u16(&page[NODE_KEY_COUNT..]),
            next_leaf: BigEndian::read_u32(&page[NODE_NEXT_LEAF..]),
            txn_id: BigEndian::read_u64(&page[NODE_TXN_ID..]),
        })
    }

    /// Write the header into a page buffer.
    pub fn write_to(&self, page: &mut [u8]) {
        page[NODE_KIND] = self.kind.as_u8();
        page[NODE_FLAGS] = self.flags;
        BigEndian::write_u16(&mut page[NODE_KEY_COUNT..], self.key_count);
        BigEndian::write_u32(&mut page[NODE_NEXT_LEAF..], self.next_leaf);
        BigEndian::write_u64(&mut page[NODE_TXN_ID..], self.txn_id);
    }
}

/// Parsed slotted page header (heap and catalog pages).
#[derive(Debug, Clone, Serialize)]
pub struct HeapPageHeader {
    /// Page kind. Byte 0.
    pub kind: PageKind,
    /// Number of slot table entries (including zeroed ones). Bytes 1-2.
    pub slot_count: u16,
    /// Lowest payload start; payloads grow down toward the slot table. Bytes 3-4.
    pub free_low: u16,
}

impl HeapPageHeader {
    /// Parse a slotted page header from a page buffer.
    pub fn parse(page: &[u8]) -> Result<Self> {
        let kind = PageKind::from_u8(page[HEAP_KIND]);
        if !kind.is_slotted() {
            return Err(GdbxError::FileCorrupt(format!(
                "expected slotted page, found {}",
                kind
            )));
        }
        Ok(HeapPageHeader {
            kind,
            slot_count: BigEndian::read_u16(&page[HEAP_SLOT_COUNT..]),
            free_low: BigEndian::read_u16(&page[HEAP_FREE_LOW..]),
        })
    }

    /// Write the header into a page buffer.
    pub fn write_to(&self, page: &mut [u8]) {
        page[HEAP_KIND] = self.kind.as_u8();
        BigEndian::write_u16(&mut page[HEAP_SLOT_COUNT..], self.slot_count);
        BigEndian::write_u16(&mut page[HEAP_FREE_LOW..], self.free_low);
    }

    /// Initialize an empty slotted page of the given kind.
    pub fn init_page(page: &mut [u8], kind: PageKind) {
        let hdr = HeapPageHeader {
            kind,
            slot_count: 0,
            free_low: (page.len() - SIZE_PAGE_CRC) as u16,
        };
        hdr.write_to(page);
    }
}

/// Read slot `i` from a slotted page: `(offset, raw_length)`.
///
/// The raw length keeps the overflow flag bit; a zeroed pair marks a deleted
/// slot.
pub fn read_slot(page: &[u8], i: u16) -> (u16, u16) {
    let at = HEAP_SLOT_TABLE + i as usize * HEAP_SLOT_SIZE;
    (
        BigEndian::read_u16(&page[at..]),
        BigEndian::read_u16(&page[at + 2..]),
    )
}

/// Write slot `i` on a slotted page.
pub fn write_slot(page: &mut [u8], i: u16, offset: u16, raw_len: u16) {
    let at = HEAP_SLOT_TABLE + i as usize * HEAP_SLOT_SIZE;
    BigEndian::write_u16(&mut page[at..], offset);
    BigEndian::write_u16(&mut page[at + 2..], raw_len);
}
