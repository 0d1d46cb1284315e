//! Transactions: read views, the writer's working set, commit, recovery.
//!
//! Writers stage every page mutation in an in-memory shadow set and record
//! pending root swaps; nothing touches the file until commit. Structural
//! pages (tree nodes, the bitmap chain, catalog storage) follow shadow
//! paging: committed pages are never overwritten, so a discarded commit
//! leaves the previous state fully intact on disk. Document heap pages are
//! the deliberate exception: they rewrite in place, preserving committed
//! slots within the page.
//!
//! Allocation works against an in-memory copy of the free-page bitmap.
//! Frees of committed pages are deferred: the page keeps its bit (and its
//! bytes) until commit, and is excluded from reuse within the freeing
//! transaction. At commit the whole bitmap chain is rewritten into freshly
//! allocated pages and published through the super-page root swap.
//!
//! The commit protocol:
//!
//! 1. flush every dirty page (CRC-stamped) through the pager;
//! 2. append a WAL record `{txn, roots, page CRCs}` and fsync the WAL;
//! 3. rewrite the super-page with the new roots, page count, and free-space
//!    map;
//! 4. fsync the data file;
//! 5. truncate the WAL.
//!
//! Abort simply drops the working set. Recovery on open replays the root
//! swap when a complete WAL record's page CRCs all match the data file, and
//! discards the WAL otherwise.

use std::collections::{HashMap, HashSet};

use crate::storage::bitmap;
use crate::storage::checksum;
use crate::storage::constants::*;
use crate::storage::freespace::FreeSpaceMap;
use crate::storage::page::SuperPage;
use crate::storage::pager::Pager;
use crate::storage::wal::{RootTag, RootUpdate, WalFile, WalRecord};
use crate::storage::{PageRead, PageWrite};
use crate::{GdbxError, Result};

/// The durable state a transaction starts from and commit advances.
#[derive(Debug, Clone)]
pub struct CommittedState {
    /// Super-page fields as last made durable.
    pub super_page: SuperPage,
    /// Heap free-space map as last made durable.
    pub free_map: FreeSpaceMap,
    /// Id the next write transaction will use (session-monotonic).
    pub next_txn_id: u64,
}

/// Pending root swaps accumulated by a write transaction.
#[derive(Debug, Clone, Default)]
pub struct PendingRootUpdates {
    /// New catalog tree root, if it moved.
    pub catalog_root: Option<u32>,
    /// New bitmap chain root, if it moved.
    pub bitmap_root: Option<u32>,
    /// `collection → new primary root` for moved primary trees.
    pub collection_roots: Vec<(String, u32)>,
    /// `collection/index → new root` for moved secondary trees.
    pub index_roots: Vec<(String, u32)>,
}

impl PendingRootUpdates {
    fn upsert(list: &mut Vec<(String, u32)>, name: &str, root: u32) {
        match list.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = root,
            None => list.push((name.to_string(), root)),
        }
    }

    /// Record a primary-tree root move.
    pub fn set_collection_root(&mut self, collection: &str, root: u32) {
        Self::upsert(&mut self.collection_roots, collection, root);
    }

    /// Record a secondary-index root move.
    pub fn set_index_root(&mut self, collection: &str, index: &str, root: u32) {
        Self::upsert(
            &mut self.index_roots,
            &format!("{}/{}", collection, index),
            root,
        );
    }

    fn to_wal_roots(&self) -> Vec<RootUpdate> {
        let mut roots = Vec::new();
        if let Some(r) = self.catalog_root {
            roots.push(RootUpdate {
                tag: RootTag::Catalog,
                name: String::new(),
                new_root: r,
            });
        }
        if let Some(r) = self.bitmap_root {
            roots.push(RootUpdate {
                tag: RootTag::Bitmap,
                name: String::new(),
                new_root: r,
            });
        }
        for (name, r) in &self.collection_roots {
            roots.push(RootUpdate {
                tag: RootTag::Primary,
                name: name.clone(),
                new_root: *r,
            });
        }
        for (name, r) in &self.index_roots {
            roots.push(RootUpdate {
                tag: RootTag::Index,
                name: name.clone(),
                new_root: *r,
            });
        }
        roots
    }
}

/// Read-only page access against the committed file.
pub struct ReadStore<'p> {
    pager: &'p Pager,
    page_count: u32,
}

impl<'p> ReadStore<'p> {
    /// A view over the pages the given committed state can reach.
    pub fn new(pager: &'p Pager, state: &CommittedState) -> Self {
        ReadStore {
            pager,
            page_count: state.super_page.page_count,
        }
    }
}

impl PageRead for ReadStore<'_> {
    fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        Ok(self.pager.read_page(page_id)?.to_vec())
    }
}

/// Flat in-memory copy of the allocation bitmap, one bit per page.
struct BitmapModel {
    bits: Vec<u8>,
    /// Chain page ids the copy was loaded from; excluded from reuse and
    /// freed by the commit that replaces them.
    old_chain: Vec<u32>,
}

impl BitmapModel {
    fn get(&self, id: u32) -> bool {
        let byte = (id / 8) as usize;
        byte < self.bits.len() && self.bits[byte] & (0x80 >> (id % 8)) != 0
    }

    fn set(&mut self, id: u32, allocated: bool) {
        let byte = (id / 8) as usize;
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        let mask = 0x80 >> (id % 8);
        if allocated {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
    }

    /// First clear bit below `limit` that is not excluded.
    fn first_clear(&self, limit: u32, excluded: &HashSet<u32>) -> Option<u32> {
        (0..limit).find(|id| !self.get(*id) && !excluded.contains(id))
    }
}

/// A write transaction's shadow set over the committed file.
pub struct WorkingSet<'p> {
    pager: &'p Pager,
    txn_id: u64,
    dirty: HashMap<u32, Vec<u8>>,
    /// File pages as of transaction start; reads past this see zeroes.
    base_pages: u32,
    page_count: u32,
    bitmap_root: u32,
    bitmap_model: Option<BitmapModel>,
    /// Pages allocated by this transaction (safe to rewrite in place).
    allocated: HashSet<u32>,
    /// Committed pages freed by this transaction; bits clear at commit.
    deferred_free: HashSet<u32>,
    /// Free-space map copy, committed with the super-page.
    pub free_map: FreeSpaceMap,
    /// Root swaps to publish at commit.
    pub pending_roots: PendingRootUpdates,
}

impl<'p> WorkingSet<'p> {
    /// Begin a working set over the current committed state.
    pub fn new(pager: &'p Pager, state: &CommittedState) -> Self {
        WorkingSet {
            pager,
            txn_id: state.next_txn_id,
            dirty: HashMap::new(),
            base_pages: state.super_page.page_count,
            page_count: state.super_page.page_count,
            bitmap_root: state.super_page.bitmap_root,
            bitmap_model: None,
            allocated: HashSet::new(),
            deferred_free: HashSet::new(),
            free_map: state.free_map.clone(),
            pending_roots: PendingRootUpdates::default(),
        }
    }

    /// Load the bitmap chain into the flat model on first use.
    fn model(&mut self) -> Result<&mut BitmapModel> {
        if self.bitmap_model.is_none() {
            let mut bits = Vec::new();
            let mut old_chain = Vec::new();
            let mut chain = self.bitmap_root;
            while chain != PAGE_NONE {
                let page = self.pager.read_page(chain)?;
                let end = page.len() - SIZE_PAGE_CRC;
                bits.extend_from_slice(&page[BITMAP_BITS..end]);
                old_chain.push(chain);
                chain = bitmap::next_page(&page);
            }
            self.bitmap_model = Some(BitmapModel { bits, old_chain });
        }
        Ok(self.bitmap_model.as_mut().unwrap())
    }

    /// Pages this transaction must not reuse: deferred frees plus the old
    /// bitmap chain, all still referenced by the committed state.
    fn excluded(&self) -> HashSet<u32> {
        let mut excluded = self.deferred_free.clone();
        if let Some(model) = &self.bitmap_model {
            excluded.extend(model.old_chain.iter().copied());
        }
        excluded
    }

    /// Rewrite the bitmap chain into fresh pages and stage them dirty.
    /// Returns the new chain root.
    fn materialize_bitmap(&mut self) -> Result<u32> {
        // Clear deferred frees and the old chain itself; both become free
        // in the committed successor state.
        self.model()?;
        let excluded = self.excluded();
        let model = self.bitmap_model.as_mut().unwrap();
        for id in &excluded {
            model.set(*id, false);
        }

        let bpp = bitmap::bits_per_page(self.pager.page_size());
        let mut chain_ids: Vec<u32> = Vec::new();
        loop {
            let needed = (self.page_count + bpp - 1) / bpp;
            while (chain_ids.len() as u32) < needed {
                let model = self.bitmap_model.as_mut().unwrap();
                let id = match model.first_clear(self.page_count, &excluded) {
                    Some(id) => id,
                    None => {
                        let id = self.page_count;
                        self.page_count += 1;
                        id
                    }
                };
                self.bitmap_model.as_mut().unwrap().set(id, true);
                chain_ids.push(id);
            }
            // Growth while allocating the chain may demand one more page.
            if (self.page_count + bpp - 1) / bpp == chain_ids.len() as u32 {
                break;
            }
        }

        let page_size = self.pager.page_size() as usize;
        let model = self.bitmap_model.as_ref().unwrap();
        let per_page_bytes = (bpp / 8) as usize;
        let mut staged = Vec::with_capacity(chain_ids.len());
        for (i, &chain_id) in chain_ids.iter().enumerate() {
            let mut page = vec![0u8; page_size];
            bitmap::init_page(&mut page);
            let next = chain_ids.get(i + 1).copied().unwrap_or(PAGE_NONE);
            bitmap::set_next_page(&mut page, next);
            let from = i * per_page_bytes;
            if from < model.bits.len() {
                let to = (from + per_page_bytes).min(model.bits.len());
                page[BITMAP_BITS..BITMAP_BITS + (to - from)]
                    .copy_from_slice(&model.bits[from..to]);
            }
            staged.push((chain_id, page));
        }
        for (chain_id, page) in staged {
            self.dirty.insert(chain_id, page);
        }

        // The replaced chain pages are free in the successor state, which
        // the rewritten bits above already record.
        Ok(chain_ids[0])
    }

    /// Turn the working set into a WAL record plus stamped dirty pages.
    fn into_commit_parts(mut self) -> Result<(WalRecord, Vec<(u32, Vec<u8>)>, SuperPageDelta)> {
        let bitmap_root = if self.bitmap_model.is_some() || !self.deferred_free.is_empty() {
            let root = self.materialize_bitmap()?;
            self.pending_roots.bitmap_root = Some(root);
            Some(root)
        } else {
            None
        };

        let mut pages: Vec<(u32, Vec<u8>)> = self.dirty.drain().collect();
        pages.sort_by_key(|(id, _)| *id);
        let mut crcs = Vec::with_capacity(pages.len());
        for (id, page) in &mut pages {
            checksum::stamp_page_crc(page);
            crcs.push((*id, checksum::stored_page_crc(page)));
        }
        let record = WalRecord {
            txn_id: self.txn_id,
            roots: self.pending_roots.to_wal_roots(),
            pages: crcs,
        };
        let delta = SuperPageDelta {
            catalog_root: self.pending_roots.catalog_root,
            bitmap_root,
            page_count: self.page_count,
            free_map: self.free_map,
        };
        Ok((record, pages, delta))
    }
}

/// What commit folds into the super-page.
struct SuperPageDelta {
    catalog_root: Option<u32>,
    bitmap_root: Option<u32>,
    page_count: u32,
    free_map: FreeSpaceMap,
}

impl PageRead for WorkingSet<'_> {
    fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(page.clone());
        }
        if page_id >= self.base_pages {
            // Allocated this transaction but never written.
            return Ok(vec![0u8; self.page_size() as usize]);
        }
        Ok(self.pager.read_page(page_id)?.to_vec())
    }
}

impl PageWrite for WorkingSet<'_> {
    fn txn_id(&self) -> u64 {
        self.txn_id
    }

    fn write(&mut self, page_id: u32, data: Vec<u8>) -> Result<()> {
        if data.len() != self.page_size() as usize {
            return Err(GdbxError::IoError(format!(
                "staged page buffer is {} bytes, expected {}",
                data.len(),
                self.page_size()
            )));
        }
        self.dirty.insert(page_id, data);
        Ok(())
    }

    fn allocate(&mut self) -> Result<u32> {
        let excluded = self.excluded();
        let page_count = self.page_count;
        let model = self.model()?;
        let id = match model.first_clear(page_count, &excluded) {
            Some(id) => id,
            None => {
                let id = self.page_count;
                self.page_count += 1;
                id
            }
        };
        self.bitmap_model.as_mut().unwrap().set(id, true);
        self.allocated.insert(id);
        Ok(id)
    }

    fn is_shadow(&self, page_id: u32) -> bool {
        self.allocated.contains(&page_id)
    }

    fn free_page(&mut self, page_id: u32) -> Result<()> {
        self.dirty.remove(&page_id);
        self.free_map.set(page_id, 0);
        if self.allocated.remove(&page_id) {
            // Never left this transaction; reusable immediately.
            self.model()?.set(page_id, false);
        } else {
            // Still referenced by the committed state until the root swap.
            self.deferred_free.insert(page_id);
        }
        Ok(())
    }
}

/// Run the commit protocol for a working set, advancing `state` on success.
pub fn commit(ws: WorkingSet<'_>, wal: &WalFile, state: &mut CommittedState) -> Result<()> {
    let pager = ws.pager;
    let (record, pages, delta) = ws.into_commit_parts()?;

    if delta.page_count > state.super_page.page_count {
        pager.grow_to(delta.page_count)?;
    }
    for (id, page) in &pages {
        pager.write_page(*id, page)?;
    }

    wal.append_and_sync(&record)?;

    let mut super_buf = vec![0u8; pager.page_size() as usize];
    let new_super = SuperPage {
        version: state.super_page.version,
        page_size: state.super_page.page_size,
        bitmap_root: delta.bitmap_root.unwrap_or(state.super_page.bitmap_root),
        catalog_root: delta.catalog_root.unwrap_or(state.super_page.catalog_root),
        page_count: delta.page_count,
        wal_offset: 0,
    };
    delta.free_map.write_to(&mut super_buf);
    new_super.write_to(&mut super_buf);
    checksum::stamp_page_crc(&mut super_buf);
    pager.write_page(0, &super_buf)?;

    pager.sync()?;
    wal.truncate()?;

    state.super_page = new_super;
    state.free_map = delta.free_map;
    state.next_txn_id += 1;
    Ok(())
}

/// Recovery outcome from [`recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No WAL, or a torn/mismatching record was discarded.
    Clean,
    /// A complete record was found and its root swap was replayed.
    Replayed,
}

/// Inspect the WAL on open and finish or discard an interrupted commit.
///
/// With `read_only`, the replayed state is applied to the returned super-page
/// in memory only; nothing is written.
pub fn recover(
    pager: &Pager,
    wal: &WalFile,
    mut sp: SuperPage,
    read_only: bool,
) -> Result<(SuperPage, RecoveryAction)> {
    let record = match wal.read_record() {
        Ok(rec) => rec,
        // An unreadable record is treated like a torn one; the previous
        // committed state is intact.
        Err(_) => None,
    };
    let record = match record {
        None => {
            if !read_only {
                wal.truncate()?;
            }
            return Ok((sp, RecoveryAction::Clean));
        }
        Some(rec) => rec,
    };

    let file_pages = pager.file_pages()?;
    let mut all_match = true;
    for &(page_id, crc) in &record.pages {
        if page_id >= file_pages {
            all_match = false;
            break;
        }
        let raw = pager.read_page_raw(page_id)?;
        if checksum::page_crc(&raw) != crc {
            all_match = false;
            break;
        }
    }

    if !all_match {
        if !read_only {
            wal.truncate()?;
        }
        return Ok((sp, RecoveryAction::Clean));
    }

    // Every flushed page landed: replay the root swap.
    for root in &record.roots {
        match root.tag {
            RootTag::Catalog => sp.catalog_root = root.new_root,
            RootTag::Bitmap => sp.bitmap_root = root.new_root,
            // Collection and index roots live inside catalog pages, which
            // are among the flushed pages; nothing to do at this level.
            RootTag::Primary | RootTag::Index => {}
        }
    }
    sp.page_count = file_pages;

    if !read_only {
        let mut super_buf = pager.read_page_raw(0)?.to_vec();
        sp.write_to(&mut super_buf);
        checksum::stamp_page_crc(&mut super_buf);
        pager.write_page(0, &super_buf)?;
        pager.sync()?;
        wal.truncate()?;
    }
    Ok((sp, RecoveryAction::Replayed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::BTree;
    use crate::storage::page_types::PageKind;
    use crate::storage::{heap, DocumentLocation};
    use tempfile::TempDir;

    const PS: u32 = SIZE_PAGE_DEFAULT;

    /// Build a minimal database file: super-page + bitmap root on page 1.
    fn bootstrap(dir: &TempDir) -> (Pager, WalFile, CommittedState) {
        let path = dir.path().join("txn.gdbx");
        let pager = Pager::create(&path, PS).unwrap();
        pager.grow_to(2).unwrap();

        let mut bitmap_page = vec![0u8; PS as usize];
        bitmap::init_page(&mut bitmap_page);
        bitmap::set_bit(&mut bitmap_page, 0, true);
        bitmap::set_bit(&mut bitmap_page, 1, true);
        checksum::stamp_page_crc(&mut bitmap_page);
        pager.write_page(1, &bitmap_page).unwrap();

        let sp = SuperPage {
            version: FORMAT_VERSION,
            page_size: PS,
            bitmap_root: 1,
            catalog_root: PAGE_NONE,
            page_count: 2,
            wal_offset: 0,
        };
        let mut super_buf = vec![0u8; PS as usize];
        sp.write_to(&mut super_buf);
        checksum::stamp_page_crc(&mut super_buf);
        pager.write_page(0, &super_buf).unwrap();
        pager.sync().unwrap();

        let wal = WalFile::new(&path);
        let state = CommittedState {
            super_page: sp,
            free_map: FreeSpaceMap::new(PS),
            next_txn_id: 1,
        };
        (pager, wal, state)
    }

    #[test]
    fn test_allocate_grows_and_reuses_shadow_pages() {
        let dir = TempDir::new().unwrap();
        let (pager, _wal, state) = bootstrap(&dir);
        let mut ws = WorkingSet::new(&pager, &state);
        let a = ws.allocate().unwrap();
        let b = ws.allocate().unwrap();
        assert_eq!(a, 2);
        assert_eq!(b, 3);
        assert!(ws.is_shadow(a));
        // A page allocated this transaction is reusable immediately.
        ws.free_page(a).unwrap();
        let c = ws.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_committed_page_free_is_deferred() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, mut state) = bootstrap(&dir);

        // Commit a transaction that owns page 2.
        let mut ws = WorkingSet::new(&pager, &state);
        let a = ws.allocate().unwrap();
        ws.write(a, vec![1u8; PS as usize]).unwrap();
        commit(ws, &wal, &mut state).unwrap();

        // A later transaction frees it; the id must not be recycled within
        // the same transaction.
        let mut ws = WorkingSet::new(&pager, &state);
        assert!(!ws.is_shadow(a));
        ws.free_page(a).unwrap();
        let b = ws.allocate().unwrap();
        assert_ne!(b, a);
        commit(ws, &wal, &mut state).unwrap();

        // After the commit the page is free for the next transaction.
        let mut ws = WorkingSet::new(&pager, &state);
        let c = ws.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_commit_persists_tree_across_reopen() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, mut state) = bootstrap(&dir);

        let mut ws = WorkingSet::new(&pager, &state);
        let mut tree = BTree::create(&mut ws).unwrap();
        for n in 0..200u32 {
            tree.insert(&mut ws, &n.to_be_bytes(), DocumentLocation::new(n, 0))
                .unwrap();
        }
        ws.pending_roots.set_collection_root("t", tree.root);
        let root = tree.root;
        commit(ws, &wal, &mut state).unwrap();
        assert_eq!(state.next_txn_id, 2);

        // Reopen from disk and read through a fresh view.
        let path = pager.path().to_path_buf();
        drop(pager);
        let (pager, sp) = Pager::open(&path, false).unwrap();
        assert!(sp.page_count > 2);
        let state = CommittedState {
            super_page: sp,
            free_map: FreeSpaceMap::new(PS),
            next_txn_id: 1,
        };
        let mut view = ReadStore::new(&pager, &state);
        let tree = BTree { root };
        for n in 0..200u32 {
            assert_eq!(
                tree.search(&mut view, &n.to_be_bytes()).unwrap(),
                Some(DocumentLocation::new(n, 0))
            );
        }
    }

    #[test]
    fn test_abort_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let (pager, _wal, state) = bootstrap(&dir);
        let before = pager.file_pages().unwrap();
        {
            let mut ws = WorkingSet::new(&pager, &state);
            let mut tree = BTree::create(&mut ws).unwrap();
            tree.insert(&mut ws, b"key", DocumentLocation::new(1, 1))
                .unwrap();
            // Dropped without commit.
        }
        assert_eq!(pager.file_pages().unwrap(), before);
        let raw = pager.read_page(1).unwrap();
        assert!(!bitmap::get_bit(&raw, 2));
    }

    #[test]
    fn test_shadow_paging_preserves_committed_tree() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, mut state) = bootstrap(&dir);

        // Commit a small tree.
        let mut ws = WorkingSet::new(&pager, &state);
        let mut tree = BTree::create(&mut ws).unwrap();
        tree.insert(&mut ws, b"alpha", DocumentLocation::new(7, 7))
            .unwrap();
        let committed_root = tree.root;
        commit(ws, &wal, &mut state).unwrap();

        // Mutate it in a second transaction and flush the pages, but stop
        // before the super-page swap (a mid-commit crash).
        let mut ws = WorkingSet::new(&pager, &state);
        let mut tree = BTree { root: committed_root };
        tree.insert(&mut ws, b"beta", DocumentLocation::new(8, 8))
            .unwrap();
        assert_ne!(tree.root, committed_root);
        let (_, pages, delta) = ws.into_commit_parts().unwrap();
        pager.grow_to(delta.page_count).unwrap();
        for (id, page) in &pages {
            // The committed root page must not be among the flushed pages.
            assert_ne!(*id, committed_root);
            pager.write_page(*id, page).unwrap();
        }

        // The committed tree is untouched: the old root still holds
        // exactly its old contents.
        let mut view = ReadStore::new(&pager, &state);
        let old_tree = BTree {
            root: committed_root,
        };
        assert!(old_tree.search(&mut view, b"alpha").unwrap().is_some());
        assert!(old_tree.search(&mut view, b"beta").unwrap().is_none());
    }

    #[test]
    fn test_commit_then_clean_recovery() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, mut state) = bootstrap(&dir);
        let mut ws = WorkingSet::new(&pager, &state);
        let mut fsmap = ws.free_map.clone();
        let loc = heap::insert(&mut ws, &mut fsmap, PageKind::Heap, b"payload").unwrap();
        ws.free_map = fsmap;
        commit(ws, &wal, &mut state).unwrap();

        let (sp2, action) = recover(&pager, &wal, state.super_page.clone(), false).unwrap();
        assert_eq!(action, RecoveryAction::Clean);
        assert_eq!(sp2, state.super_page);

        let mut view = ReadStore::new(&pager, &state);
        assert_eq!(heap::get(&mut view, loc).unwrap(), b"payload");
    }

    #[test]
    fn test_recovery_replays_root_swap() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, state) = bootstrap(&dir);

        // Simulate a crash between WAL fsync and the super-page swap: run
        // the flush + WAL steps by hand, leaving the super-page stale.
        let mut ws = WorkingSet::new(&pager, &state);
        let mut tree = BTree::create(&mut ws).unwrap();
        tree.insert(&mut ws, b"k", DocumentLocation::new(9, 9))
            .unwrap();
        ws.pending_roots.catalog_root = Some(tree.root);
        let (record, pages, delta) = ws.into_commit_parts().unwrap();
        pager.grow_to(delta.page_count).unwrap();
        for (id, page) in &pages {
            pager.write_page(*id, page).unwrap();
        }
        wal.append_and_sync(&record).unwrap();
        // Crash here: super-page still has catalog_root = none.

        let (pager, sp) = Pager::open(pager.path().to_path_buf(), false).unwrap();
        assert_eq!(sp.catalog_root, PAGE_NONE);
        let (sp, action) = recover(&pager, &wal, sp, false).unwrap();
        assert_eq!(action, RecoveryAction::Replayed);
        assert_ne!(sp.catalog_root, PAGE_NONE);
        assert!(wal.read_record().unwrap().is_none());

        // The replay is durable: a fresh open sees the new root.
        let (_pager2, sp2) = Pager::open(pager.path().to_path_buf(), false).unwrap();
        assert_eq!(sp2.catalog_root, sp.catalog_root);
    }

    #[test]
    fn test_recovery_discards_mismatching_wal() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, state) = bootstrap(&dir);

        // A WAL record promising a page CRC the file does not have.
        let record = WalRecord {
            txn_id: 5,
            roots: vec![RootUpdate {
                tag: RootTag::Catalog,
                name: String::new(),
                new_root: 42,
            }],
            pages: vec![(1, 0xDEADBEEF)],
        };
        wal.append_and_sync(&record).unwrap();

        let (sp, action) = recover(&pager, &wal, state.super_page.clone(), false).unwrap();
        assert_eq!(action, RecoveryAction::Clean);
        assert_eq!(sp.catalog_root, PAGE_NONE);
        assert!(wal.read_record().unwrap().is_none());
    }

    #[test]
    fn test_read_only_recovery_does_not_write() {
        let dir = TempDir::new().unwrap();
        let (pager, wal, state) = bootstrap(&dir);
        let record = WalRecord {
            txn_id: 5,
            roots: vec![RootUpdate {
                tag: RootTag::Bitmap,
                name: String::new(),
                new_root: 1,
            }],
            pages: vec![],
        };
        wal.append_and_sync(&record).unwrap();

        let (_sp, action) = recover(&pager, &wal, state.super_page.clone(), true).unwrap();
        assert_eq!(action, RecoveryAction::Replayed);
        // The WAL is left in place for a future writable open.
        assert!(wal.read_record().unwrap().is_some());
    }
}
