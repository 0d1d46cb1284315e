//! Paged single-file storage engine.
//!
//! This module owns everything below the query layer: the pager and buffer
//! pool, the free-page bitmap, the slotted document heap, the shared B+tree
//! node engine, the write-ahead log, the transaction working set with its
//! commit/recovery protocol, and the persistent catalog.
//!
//! Start with [`pager::Pager`] to open a file, [`txn`] for the read/write
//! seams every structure operates through, and [`catalog`] for what lives
//! where.

pub mod bitmap;
pub mod btree;
pub mod catalog;
pub mod checksum;
pub mod constants;
pub mod freespace;
pub mod heap;
pub mod page;
pub mod page_types;
pub mod pager;
pub mod pool;
pub mod txn;
pub mod wal;

use serde::Serialize;

use crate::Result;

/// Location of a stored record: page id plus slot index.
///
/// Immutable for the life of a heap entry; an update that no longer fits its
/// slot relocates and yields a new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentLocation {
    /// Heap page holding the record.
    pub page_id: u32,
    /// Slot index within that page's directory.
    pub slot: u16,
}

impl DocumentLocation {
    /// Construct a location.
    pub fn new(page_id: u32, slot: u16) -> Self {
        DocumentLocation { page_id, slot }
    }
}

/// Read access to pages, either the committed file or a transaction's
/// working set layered over it.
pub trait PageRead {
    /// Page size of the underlying file.
    fn page_size(&self) -> u32;

    /// Total pages in the file (including staged growth in a write set).
    fn page_count(&self) -> u32;

    /// Read a full page into an owned buffer.
    fn read(&mut self, page_id: u32) -> Result<Vec<u8>>;
}

/// In-memory page store used by the unit tests of the structures that
/// operate over [`PageRead`]/[`PageWrite`].
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::collections::HashMap;

    pub(crate) struct MemStore {
        pub page_size: u32,
        pub pages: HashMap<u32, Vec<u8>>,
        pub next_id: u32,
        pub freed: Vec<u32>,
    }

    impl MemStore {
        pub fn new(page_size: u32) -> Self {
            MemStore {
                page_size,
                pages: HashMap::new(),
                next_id: 1,
                freed: Vec::new(),
            }
        }
    }

    impl PageRead for MemStore {
        fn page_size(&self) -> u32 {
            self.page_size
        }

        fn page_count(&self) -> u32 {
            self.next_id
        }

        fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
            self.pages
                .get(&page_id)
                .cloned()
                .ok_or_else(|| crate::GdbxError::FileCorrupt(format!("no page {}", page_id)))
        }
    }

    impl PageWrite for MemStore {
        fn txn_id(&self) -> u64 {
            1
        }

        fn write(&mut self, page_id: u32, data: Vec<u8>) -> Result<()> {
            self.pages.insert(page_id, data);
            Ok(())
        }

        fn allocate(&mut self) -> Result<u32> {
            let id = self.next_id;
            self.next_id += 1;
            self.pages.insert(id, vec![0u8; self.page_size as usize]);
            Ok(id)
        }

        // Every MemStore page is created within the test, so in-place
        // rewrites are always safe.
        fn is_shadow(&self, _page_id: u32) -> bool {
            true
        }

        fn free_page(&mut self, page_id: u32) -> Result<()> {
            self.pages.remove(&page_id);
            self.freed.push(page_id);
            Ok(())
        }
    }
}

/// Mutating page access available inside a write transaction.
///
/// Structural pages follow shadow paging: a committed page is never
/// overwritten in place. Writers relocate modified tree nodes to pages
/// freshly allocated this transaction ([`is_shadow`] distinguishes them) so
/// that on a discarded commit the previously committed structure is still
/// intact on disk. Frees of committed pages take effect only at commit.
///
/// [`is_shadow`]: PageWrite::is_shadow
pub trait PageWrite: PageRead {
    /// Id of the transaction performing the writes.
    fn txn_id(&self) -> u64;

    /// Stage a full page write in the working set.
    fn write(&mut self, page_id: u32, data: Vec<u8>) -> Result<()>;

    /// Allocate a page: first free bit in the bitmap, else grow the file.
    fn allocate(&mut self) -> Result<u32>;

    /// Whether the page was allocated by this transaction (safe to rewrite
    /// in place).
    fn is_shadow(&self, page_id: u32) -> bool;

    /// Return a page to the free bitmap. For committed pages the free is
    /// deferred to commit, so the page's current content survives an abort
    /// or crash.
    fn free_page(&mut self, page_id: u32) -> Result<()>;
}
