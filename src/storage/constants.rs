//! On-disk layout constants for the gdbx file format.
//!
//! All multi-byte integers on disk are big-endian so that raw byte order
//! matches key order. Offsets below are byte positions within a page unless
//! noted otherwise.

// ── Page sizes ──────────────────────────────────────────────────────

/// Default page size (8 KiB).
pub const SIZE_PAGE_DEFAULT: u32 = 8192;
/// Smallest supported page size.
pub const SIZE_PAGE_MIN: u32 = 4096;
/// Largest supported page size.
pub const SIZE_PAGE_MAX: u32 = 32768;

/// Every page ends with a CRC-32C over the rest of the page.
pub const SIZE_PAGE_CRC: usize = 4;

/// Sentinel page id meaning "no page". Page 0 is the super-page and is never
/// the target of a tree, heap, or chain pointer.
pub const PAGE_NONE: u32 = 0;

// ── Super-page (page 0, first 64 bytes) ─────────────────────────────

/// File magic, `"GDBX"`.
pub const MAGIC: [u8; 4] = *b"GDBX";
/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Offset of the magic. 4 bytes.
pub const SUPER_MAGIC: usize = 0;
/// Offset of the format version. 4 bytes.
pub const SUPER_VERSION: usize = 4;
/// Offset of the page size. 4 bytes.
pub const SUPER_PAGE_SIZE: usize = 8;
/// Offset of the free-page bitmap root page id. 4 bytes.
pub const SUPER_BITMAP_ROOT: usize = 12;
/// Offset of the catalog root page id. 4 bytes.
pub const SUPER_CATALOG_ROOT: usize = 16;
/// Offset of the total page count. 4 bytes.
pub const SUPER_PAGE_COUNT: usize = 20;
/// Offset of the durable WAL offset. 8 bytes.
pub const SUPER_WAL_OFFSET: usize = 24;
/// Offset of the CRC-32C over the preceding 32 bytes. 4 bytes.
pub const SUPER_CRC: usize = 32;
/// Size of the fixed super-page header.
pub const SUPER_HEADER_SIZE: usize = 64;
/// Offset where the heap free-space map begins (4-bit bucket per page).
pub const SUPER_FREE_MAP: usize = SUPER_HEADER_SIZE;

// ── Tree node pages (TreeInternal / TreeLeaf) ───────────────────────

/// Offset of the page kind. 1 byte.
pub const NODE_KIND: usize = 0;
/// Offset of the node flags. 1 byte (reserved, written as 0).
pub const NODE_FLAGS: usize = 1;
/// Offset of the key count. 2 bytes.
pub const NODE_KEY_COUNT: usize = 2;
/// Offset of the next-leaf page id (leaves only; 0 on internal nodes). 4 bytes.
pub const NODE_NEXT_LEAF: usize = 4;
/// Offset of the transaction id of the latest writer. 8 bytes.
pub const NODE_TXN_ID: usize = 8;
/// Size of the tree node header.
pub const NODE_HEADER_SIZE: usize = 16;

/// Internal nodes store the leftmost child pointer right after the header.
pub const NODE_LEFTMOST_CHILD: usize = NODE_HEADER_SIZE;

/// An index key may not exceed a quarter page; this keeps a node able to
/// hold at least a handful of separators.
pub fn max_key_len(page_size: u32) -> usize {
    page_size as usize / 4
}

// ── Heap pages (Heap / Catalog) ─────────────────────────────────────

/// Offset of the page kind. 1 byte.
pub const HEAP_KIND: usize = 0;
/// Offset of the slot count. 2 bytes.
pub const HEAP_SLOT_COUNT: usize = 1;
/// Offset of the free-space low-water mark (lowest payload start). 2 bytes.
pub const HEAP_FREE_LOW: usize = 3;
/// Offset where the slot table begins, growing upward.
pub const HEAP_SLOT_TABLE: usize = 5;
/// Size of one slot table entry: offset u16 + length u16.
pub const HEAP_SLOT_SIZE: usize = 4;

/// High bit of a slot length marks an overflow stub instead of an inline
/// payload. Inline payloads are therefore capped at 0x7FFF bytes.
pub const HEAP_SLOT_OVERFLOW_FLAG: u16 = 0x8000;
/// Mask extracting the stored length from a slot length field.
pub const HEAP_SLOT_LEN_MASK: u16 = 0x7FFF;
/// An overflow stub payload: first overflow page u32 + total length u32.
pub const HEAP_OVERFLOW_STUB_LEN: usize = 8;

// ── Overflow pages ──────────────────────────────────────────────────

/// Offset of the page kind. 1 byte.
pub const OVERFLOW_KIND: usize = 0;
/// Offset of the flags byte (reserved, written as 0).
pub const OVERFLOW_FLAGS: usize = 1;
/// Offset of the next overflow page id (0 terminates the chain). 4 bytes.
pub const OVERFLOW_NEXT: usize = 2;
/// Offset of the chunk length held by this page. 2 bytes.
pub const OVERFLOW_CHUNK_LEN: usize = 6;
/// Offset where chunk data begins.
pub const OVERFLOW_DATA: usize = 8;

// ── Bitmap pages ────────────────────────────────────────────────────

/// Offset of the page kind. 1 byte.
pub const BITMAP_KIND: usize = 0;
/// Offset of the flags byte (reserved, written as 0).
pub const BITMAP_FLAGS: usize = 1;
/// Offset of the next bitmap page id (0 terminates the chain). 4 bytes.
pub const BITMAP_NEXT: usize = 2;
/// Offset where allocation bits begin.
pub const BITMAP_BITS: usize = 6;

// ── WAL records (sidecar `<db>.wal` file) ───────────────────────────

/// Root update tag: catalog tree root.
pub const WAL_TAG_CATALOG: u8 = 0;
/// Root update tag: free-page bitmap root.
pub const WAL_TAG_BITMAP: u8 = 1;
/// Root update tag: a collection's primary tree root (name = collection).
pub const WAL_TAG_PRIMARY: u8 = 2;
/// Root update tag: a secondary index root (name = `collection/index`).
pub const WAL_TAG_INDEX: u8 = 3;

/// Bounded retry budget for transient I/O failures.
pub const IO_RETRY_LIMIT: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_header_is_16_bytes() {
        assert_eq!(NODE_TXN_ID + 8, NODE_HEADER_SIZE);
    }

    #[test]
    fn test_heap_slot_table_follows_header() {
        assert_eq!(HEAP_FREE_LOW + 2, HEAP_SLOT_TABLE);
    }

    #[test]
    fn test_super_crc_follows_fields() {
        assert_eq!(SUPER_WAL_OFFSET + 8, SUPER_CRC);
        assert!(SUPER_CRC + 4 <= SUPER_HEADER_SIZE);
    }

    #[test]
    fn test_max_key_len_leaves_room_for_separators() {
        let ps = SIZE_PAGE_DEFAULT;
        assert!(4 * max_key_len(ps) <= ps as usize);
    }
}
