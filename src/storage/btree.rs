//! B+tree node engine.
//!
//! One engine backs the primary tree (4-byte order-preserved DocId keys),
//! secondary indexes (variable-length encoded keys with a DocId suffix), and
//! the catalog tree (encoded collection names). Keys are raw bytes compared
//! lexicographically; leaf values are [`DocumentLocation`]s.
//!
//! All values live in leaves; a node holds as many cells as fit its page,
//! splitting at the midpoint when an insert overflows. Mutations are
//! copy-on-write: every modified node relocates to a page freshly allocated
//! this transaction (in-place only when already relocated), parents re-point
//! on the way back up, and the root that emerges is published at commit,
//! so the previously committed tree stays intact on disk until the root
//! swap. Delete removes the entry and performs no underflow rebalancing;
//! sparse and even empty leaves are tolerated and reclaimed only when the
//! whole tree is dropped.
//!
//! Range scans walk root-to-leaf with a parent-path cursor. The next-leaf
//! header field is stamped at split time for inspection tooling, but under
//! copy-on-write a sibling may relocate without its predecessor being
//! rewritten, so traversal never relies on it.

use byteorder::{BigEndian, ByteOrder};

use crate::storage::constants::*;
use crate::storage::page::TreeNodeHeader;
use crate::storage::page_types::PageKind;
use crate::storage::{DocumentLocation, PageRead, PageWrite};
use crate::{GdbxError, Result};

/// A B+tree handle: just the root page id. Structure state lives on pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    /// Root page of the tree.
    pub root: u32,
}

/// Parsed node, held in memory only while an operation touches it.
#[derive(Debug, Clone)]
enum Node {
    Leaf {
        next_leaf: u32,
        entries: Vec<(Vec<u8>, DocumentLocation)>,
    },
    Internal {
        leftmost: u32,
        entries: Vec<(Vec<u8>, u32)>,
    },
}

impl Node {
    fn serialized_size(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => {
                NODE_HEADER_SIZE + entries.iter().map(|(k, _)| 2 + k.len() + 6).sum::<usize>()
            }
            Node::Internal { entries, .. } => {
                NODE_HEADER_SIZE + 4 + entries.iter().map(|(k, _)| 2 + k.len() + 4).sum::<usize>()
            }
        }
    }

    fn fits(&self, page_size: u32) -> bool {
        self.serialized_size() <= page_size as usize - SIZE_PAGE_CRC
    }
}

fn parse_node(page: &[u8]) -> Result<Node> {
    let hdr = TreeNodeHeader::parse(page)?;
    match hdr.kind {
        PageKind::TreeLeaf => {
            let mut entries = Vec::with_capacity(hdr.key_count as usize);
            let mut at = NODE_HEADER_SIZE;
            for _ in 0..hdr.key_count {
                let klen = BigEndian::read_u16(&page[at..]) as usize;
                at += 2;
                let key = page[at..at + klen].to_vec();
                at += klen;
                let loc = DocumentLocation {
                    page_id: BigEndian::read_u32(&page[at..]),
                    slot: BigEndian::read_u16(&page[at + 4..]),
                };
                at += 6;
                entries.push((key, loc));
            }
            Ok(Node::Leaf {
                next_leaf: hdr.next_leaf,
                entries,
            })
        }
        PageKind::TreeInternal => {
            let leftmost = BigEndian::read_u32(&page[NODE_LEFTMOST_CHILD..]);
            let mut entries = Vec::with_capacity(hdr.key_count as usize);
            let mut at = NODE_LEFTMOST_CHILD + 4;
            for _ in 0..hdr.key_count {
                let klen = BigEndian::read_u16(&page[at..]) as usize;
                at += 2;
                let key = page[at..at + klen].to_vec();
                at += klen;
                let child = BigEndian::read_u32(&page[at..]);
                at += 4;
                entries.push((key, child));
            }
            Ok(Node::Internal { leftmost, entries })
        }
        other => Err(GdbxError::FileCorrupt(format!(
            "expected tree page, found {}",
            other
        ))),
    }
}

fn serialize_node(node: &Node, page_size: u32, txn_id: u64) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    match node {
        Node::Leaf { next_leaf, entries } => {
            TreeNodeHeader {
                kind: PageKind::TreeLeaf,
                flags: 0,
                key_count: entries.len() as u16,
                next_leaf: *next_leaf,
                txn_id,
            }
            .write_to(&mut page);
            let mut at = NODE_HEADER_SIZE;
            for (key, loc) in entries {
                BigEndian::write_u16(&mut page[at..], key.len() as u16);
                at += 2;
                page[at..at + key.len()].copy_from_slice(key);
                at += key.len();
                BigEndian::write_u32(&mut page[at..], loc.page_id);
                BigEndian::write_u16(&mut page[at + 4..], loc.slot);
                at += 6;
            }
        }
        Node::Internal { leftmost, entries } => {
            TreeNodeHeader {
                kind: PageKind::TreeInternal,
                flags: 0,
                key_count: entries.len() as u16,
                next_leaf: PAGE_NONE,
                txn_id,
            }
            .write_to(&mut page);
            BigEndian::write_u32(&mut page[NODE_LEFTMOST_CHILD..], *leftmost);
            let mut at = NODE_LEFTMOST_CHILD + 4;
            for (key, child) in entries {
                BigEndian::write_u16(&mut page[at..], key.len() as u16);
                at += 2;
                page[at..at + key.len()].copy_from_slice(key);
                at += key.len();
                BigEndian::write_u32(&mut page[at..], *child);
                at += 4;
            }
        }
    }
    page
}

fn write_node<S: PageWrite + ?Sized>(store: &mut S, page_id: u32, node: &Node) -> Result<()> {
    let txn = store.txn_id();
    let page = serialize_node(node, store.page_size(), txn);
    store.write(page_id, page)
}

/// Write a modified node copy-on-write: shadow pages are rewritten in
/// place, committed pages relocate to a fresh page (the old one is freed at
/// commit). Returns the page id the node now lives on.
fn place_node<S: PageWrite + ?Sized>(store: &mut S, page_id: u32, node: &Node) -> Result<u32> {
    if store.is_shadow(page_id) {
        write_node(store, page_id, node)?;
        return Ok(page_id);
    }
    let new_id = store.allocate()?;
    write_node(store, new_id, node)?;
    store.free_page(page_id)?;
    Ok(new_id)
}

/// Index of the child to descend into for `key` (0 is the leftmost child).
fn child_index(entries: &[(Vec<u8>, u32)], key: &[u8]) -> usize {
    entries.partition_point(|(k, _)| k.as_slice() <= key)
}

fn child_at(leftmost: u32, entries: &[(Vec<u8>, u32)], idx: usize) -> u32 {
    if idx == 0 {
        leftmost
    } else {
        entries[idx - 1].1
    }
}

fn set_child_at(leftmost: &mut u32, entries: &mut [(Vec<u8>, u32)], idx: usize, child: u32) {
    if idx == 0 {
        *leftmost = child;
    } else {
        entries[idx - 1].1 = child;
    }
}

struct Split {
    sep: Vec<u8>,
    right: u32,
}

impl BTree {
    /// Create an empty tree: a single empty leaf.
    pub fn create<S: PageWrite + ?Sized>(store: &mut S) -> Result<BTree> {
        let root = store.allocate()?;
        let leaf = Node::Leaf {
            next_leaf: PAGE_NONE,
            entries: Vec::new(),
        };
        write_node(store, root, &leaf)?;
        Ok(BTree { root })
    }

    /// Insert or replace the value for `key`. The root may relocate.
    pub fn insert<S: PageWrite + ?Sized>(
        &mut self,
        store: &mut S,
        key: &[u8],
        loc: DocumentLocation,
    ) -> Result<()> {
        if key.len() > max_key_len(store.page_size()) {
            return Err(GdbxError::EncodeUnsupported(format!(
                "index key of {} bytes exceeds the {}-byte limit",
                key.len(),
                max_key_len(store.page_size())
            )));
        }
        let (new_root, split) = self.insert_rec(store, self.root, key, loc)?;
        self.root = match split {
            None => new_root,
            Some(split) => {
                let root_page = store.allocate()?;
                let node = Node::Internal {
                    leftmost: new_root,
                    entries: vec![(split.sep, split.right)],
                };
                write_node(store, root_page, &node)?;
                root_page
            }
        };
        Ok(())
    }

    fn insert_rec<S: PageWrite + ?Sized>(
        &self,
        store: &mut S,
        page_id: u32,
        key: &[u8],
        loc: DocumentLocation,
    ) -> Result<(u32, Option<Split>)> {
        let page = store.read(page_id)?;
        match parse_node(&page)? {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(i) => entries[i].1 = loc,
                    Err(i) => entries.insert(i, (key.to_vec(), loc)),
                }
                let node = Node::Leaf { next_leaf, entries };
                if node.fits(store.page_size()) {
                    let new_id = place_node(store, page_id, &node)?;
                    return Ok((new_id, None));
                }
                let (mut entries, next_leaf) = match node {
                    Node::Leaf { entries, next_leaf } => (entries, next_leaf),
                    Node::Internal { .. } => unreachable!(),
                };
                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let sep = right_entries[0].0.clone();
                let right_page = store.allocate()?;
                write_node(
                    store,
                    right_page,
                    &Node::Leaf {
                        next_leaf,
                        entries: right_entries,
                    },
                )?;
                let new_id = place_node(
                    store,
                    page_id,
                    &Node::Leaf {
                        next_leaf: right_page,
                        entries,
                    },
                )?;
                Ok((
                    new_id,
                    Some(Split {
                        sep,
                        right: right_page,
                    }),
                ))
            }
            Node::Internal {
                mut leftmost,
                mut entries,
            } => {
                let idx = child_index(&entries, key);
                let child = child_at(leftmost, &entries, idx);
                let (new_child, child_split) = self.insert_rec(store, child, key, loc)?;
                set_child_at(&mut leftmost, &mut entries, idx, new_child);
                if let Some(split) = child_split {
                    let at = entries.partition_point(|(k, _)| k.as_slice() <= split.sep.as_slice());
                    entries.insert(at, (split.sep, split.right));
                }
                let node = Node::Internal { leftmost, entries };
                if node.fits(store.page_size()) {
                    let new_id = place_node(store, page_id, &node)?;
                    return Ok((new_id, None));
                }
                let (leftmost, mut entries) = match node {
                    Node::Internal { leftmost, entries } => (leftmost, entries),
                    Node::Leaf { .. } => unreachable!(),
                };
                let mid = entries.len() / 2;
                let mut right_entries = entries.split_off(mid);
                let (sep, right_leftmost) = right_entries.remove(0);
                let right_page = store.allocate()?;
                write_node(
                    store,
                    right_page,
                    &Node::Internal {
                        leftmost: right_leftmost,
                        entries: right_entries,
                    },
                )?;
                let new_id = place_node(store, page_id, &Node::Internal { leftmost, entries })?;
                Ok((
                    new_id,
                    Some(Split {
                        sep,
                        right: right_page,
                    }),
                ))
            }
        }
    }

    /// Point lookup.
    pub fn search<S: PageRead + ?Sized>(
        &self,
        store: &mut S,
        key: &[u8],
    ) -> Result<Option<DocumentLocation>> {
        let mut page_id = self.root;
        loop {
            let page = store.read(page_id)?;
            match parse_node(&page)? {
                Node::Internal { leftmost, entries } => {
                    let idx = child_index(&entries, key);
                    page_id = child_at(leftmost, &entries, idx);
                }
                Node::Leaf { entries, .. } => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].1));
                }
            }
        }
    }

    /// Remove the entry for `key`. Returns whether it existed; the root may
    /// relocate. No underflow rebalancing is performed.
    pub fn delete<S: PageWrite + ?Sized>(&mut self, store: &mut S, key: &[u8]) -> Result<bool> {
        let (new_root, found) = self.delete_rec(store, self.root, key)?;
        self.root = new_root;
        Ok(found)
    }

    fn delete_rec<S: PageWrite + ?Sized>(
        &self,
        store: &mut S,
        page_id: u32,
        key: &[u8],
    ) -> Result<(u32, bool)> {
        let page = store.read(page_id)?;
        match parse_node(&page)? {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                Ok(i) => {
                    entries.remove(i);
                    let new_id = place_node(store, page_id, &Node::Leaf { next_leaf, entries })?;
                    Ok((new_id, true))
                }
                Err(_) => Ok((page_id, false)),
            },
            Node::Internal {
                mut leftmost,
                mut entries,
            } => {
                let idx = child_index(&entries, key);
                let child = child_at(leftmost, &entries, idx);
                let (new_child, found) = self.delete_rec(store, child, key)?;
                if !found {
                    return Ok((page_id, false));
                }
                if new_child == child {
                    return Ok((page_id, true));
                }
                set_child_at(&mut leftmost, &mut entries, idx, new_child);
                let new_id = place_node(store, page_id, &Node::Internal { leftmost, entries })?;
                Ok((new_id, true))
            }
        }
    }

    /// Open a cursor over `[lo, hi]` with per-bound inclusivity. `None`
    /// bounds are unbounded on that side.
    ///
    /// The cursor keeps the root-to-leaf path and must not outlive
    /// mutations of the tree.
    pub fn range<S: PageRead + ?Sized>(
        &self,
        store: &mut S,
        lo: Option<&[u8]>,
        inc_lo: bool,
        hi: Option<Vec<u8>>,
        inc_hi: bool,
    ) -> Result<RangeCursor> {
        let mut stack = Vec::new();
        let mut page_id = self.root;
        loop {
            let page = store.read(page_id)?;
            match parse_node(&page)? {
                Node::Internal { leftmost, entries } => {
                    let idx = match lo {
                        None => 0,
                        Some(lo) => child_index(&entries, lo),
                    };
                    let child = child_at(leftmost, &entries, idx);
                    stack.push(PathFrame {
                        leftmost,
                        entries,
                        child_idx: idx,
                    });
                    page_id = child;
                }
                Node::Leaf { entries, .. } => {
                    let start = match lo {
                        None => 0,
                        Some(lo) => {
                            if inc_lo {
                                entries.partition_point(|(k, _)| k.as_slice() < lo)
                            } else {
                                entries.partition_point(|(k, _)| k.as_slice() <= lo)
                            }
                        }
                    };
                    return Ok(RangeCursor {
                        stack,
                        entries,
                        idx: start,
                        hi,
                        inc_hi,
                        finished: false,
                    });
                }
            }
        }
    }

    /// Collect every page id owned by the tree (internal + leaf), for bulk
    /// release on drop.
    pub fn collect_pages<S: PageRead + ?Sized>(&self, store: &mut S) -> Result<Vec<u32>> {
        let mut pages = Vec::new();
        let mut stack = vec![self.root];
        while let Some(page_id) = stack.pop() {
            pages.push(page_id);
            let page = store.read(page_id)?;
            if let Node::Internal { leftmost, entries } = parse_node(&page)? {
                stack.push(leftmost);
                for (_, child) in entries {
                    stack.push(child);
                }
            }
        }
        Ok(pages)
    }
}

/// One internal level of a cursor's root-to-leaf path.
struct PathFrame {
    leftmost: u32,
    entries: Vec<(Vec<u8>, u32)>,
    child_idx: usize,
}

impl PathFrame {
    fn child_count(&self) -> usize {
        self.entries.len() + 1
    }
}

/// Streaming cursor over a key range, traversing leaves via the parent
/// path.
pub struct RangeCursor {
    stack: Vec<PathFrame>,
    entries: Vec<(Vec<u8>, DocumentLocation)>,
    idx: usize,
    hi: Option<Vec<u8>>,
    inc_hi: bool,
    finished: bool,
}

impl RangeCursor {
    /// Move to the next leaf in key order; false when the tree is
    /// exhausted.
    fn advance_leaf<S: PageRead + ?Sized>(&mut self, store: &mut S) -> Result<bool> {
        loop {
            // Climb to the nearest ancestor with an unvisited child.
            let mut next_child = None;
            while let Some(frame) = self.stack.last_mut() {
                if frame.child_idx + 1 < frame.child_count() {
                    frame.child_idx += 1;
                    next_child = Some(child_at(frame.leftmost, &frame.entries, frame.child_idx));
                    break;
                }
                self.stack.pop();
            }
            let mut page_id = match next_child {
                Some(id) => id,
                None => return Ok(false),
            };
            // Descend leftmost into that subtree.
            loop {
                let page = store.read(page_id)?;
                match parse_node(&page)? {
                    Node::Internal { leftmost, entries } => {
                        let child = leftmost;
                        self.stack.push(PathFrame {
                            leftmost,
                            entries,
                            child_idx: 0,
                        });
                        page_id = child;
                    }
                    Node::Leaf { entries, .. } => {
                        self.entries = entries;
                        self.idx = 0;
                        if self.entries.is_empty() {
                            // A delete-hollowed leaf; keep walking.
                            break;
                        }
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Advance to the next entry within bounds.
    pub fn next<S: PageRead + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<Option<(Vec<u8>, DocumentLocation)>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.idx < self.entries.len() {
                let (key, loc) = self.entries[self.idx].clone();
                self.idx += 1;
                if let Some(hi) = &self.hi {
                    let beyond = if self.inc_hi {
                        key.as_slice() > hi.as_slice()
                    } else {
                        key.as_slice() >= hi.as_slice()
                    };
                    if beyond {
                        self.finished = true;
                        return Ok(None);
                    }
                }
                return Ok(Some((key, loc)));
            }
            if !self.advance_leaf(store)? {
                self.finished = true;
                return Ok(None);
            }
        }
    }

    /// Drain the cursor into a vector (tests and small scans).
    pub fn collect_all<S: PageRead + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<Vec<(Vec<u8>, DocumentLocation)>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next(store)? {
            out.push(entry);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::MemStore;

    fn loc(n: u32) -> DocumentLocation {
        DocumentLocation::new(n, (n % 7) as u16)
    }

    fn key(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    #[test]
    fn test_insert_and_search_small() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in [5u32, 1, 9, 3, 7] {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        for n in [1u32, 3, 5, 7, 9] {
            assert_eq!(tree.search(&mut store, &key(n)).unwrap(), Some(loc(n)));
        }
        assert_eq!(tree.search(&mut store, &key(2)).unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_value() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut tree = BTree::create(&mut store).unwrap();
        tree.insert(&mut store, &key(1), loc(10)).unwrap();
        tree.insert(&mut store, &key(1), loc(20)).unwrap();
        assert_eq!(tree.search(&mut store, &key(1)).unwrap(), Some(loc(20)));
    }

    #[test]
    fn test_many_inserts_split_and_stay_ordered() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        // Insert in a scrambled order large enough to force several levels.
        let mut ids: Vec<u32> = (0..5000).collect();
        ids.reverse();
        for chunk in ids.chunks(3) {
            for &n in chunk {
                tree.insert(&mut store, &key(n), loc(n)).unwrap();
            }
        }
        for n in (0..5000).step_by(97) {
            assert_eq!(tree.search(&mut store, &key(n)).unwrap(), Some(loc(n)));
        }
        // Full scan comes back sorted and complete.
        let mut cursor = tree.range(&mut store, None, true, None, true).unwrap();
        let all = cursor.collect_all(&mut store).unwrap();
        assert_eq!(all.len(), 5000);
        for (i, (k, _)) in all.iter().enumerate() {
            assert_eq!(k, &key(i as u32));
        }
    }

    #[test]
    fn test_range_bounds_inclusive_exclusive() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in 0..100u32 {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        let collect = |store: &mut MemStore,
                       lo: Option<u32>,
                       inc_lo: bool,
                       hi: Option<u32>,
                       inc_hi: bool| {
            let lo_k = lo.map(key);
            let mut cursor = tree
                .range(store, lo_k.as_deref(), inc_lo, hi.map(key), inc_hi)
                .unwrap();
            cursor
                .collect_all(store)
                .unwrap()
                .into_iter()
                .map(|(k, _)| u32::from_be_bytes(k.try_into().unwrap()))
                .collect::<Vec<u32>>()
        };
        assert_eq!(
            collect(&mut store, Some(10), true, Some(12), true),
            vec![10, 11, 12]
        );
        assert_eq!(
            collect(&mut store, Some(10), false, Some(12), false),
            vec![11]
        );
        assert_eq!(collect(&mut store, None, true, Some(2), true), vec![0, 1, 2]);
        assert_eq!(
            collect(&mut store, Some(97), true, None, true),
            vec![97, 98, 99]
        );
    }

    #[test]
    fn test_range_spans_leaves() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in 0..2000u32 {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        let mut cursor = tree
            .range(&mut store, Some(&key(500)), true, Some(key(1499)), true)
            .unwrap();
        let hits = cursor.collect_all(&mut store).unwrap();
        assert_eq!(hits.len(), 1000);
        assert_eq!(hits[0].0, key(500));
        assert_eq!(hits[999].0, key(1499));
    }

    #[test]
    fn test_delete_no_rebalance() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in 0..1000u32 {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        for n in (0..1000).step_by(2) {
            assert!(tree.delete(&mut store, &key(n)).unwrap());
        }
        assert!(!tree.delete(&mut store, &key(0)).unwrap());
        for n in 0..1000u32 {
            let expect = if n % 2 == 0 { None } else { Some(loc(n)) };
            assert_eq!(tree.search(&mut store, &key(n)).unwrap(), expect);
        }
        let mut cursor = tree.range(&mut store, None, true, None, true).unwrap();
        assert_eq!(cursor.collect_all(&mut store).unwrap().len(), 500);
    }

    #[test]
    fn test_scan_skips_hollow_leaves() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in 0..1200u32 {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        // Empty out a middle run of keys, hollowing whole leaves.
        for n in 300..900u32 {
            tree.delete(&mut store, &key(n)).unwrap();
        }
        let mut cursor = tree
            .range(&mut store, Some(&key(250)), true, Some(key(950)), true)
            .unwrap();
        let seen: Vec<u32> = cursor
            .collect_all(&mut store)
            .unwrap()
            .into_iter()
            .map(|(k, _)| u32::from_be_bytes(k.try_into().unwrap()))
            .collect();
        let expected: Vec<u32> = (250..300).chain(900..=950).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_variable_length_keys_sort_lexicographically() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut tree = BTree::create(&mut store).unwrap();
        let keys: Vec<&[u8]> = vec![b"b", b"aa", b"a", b"ab", b"ba", b"", b"abc"];
        for (i, k) in keys.iter().enumerate() {
            tree.insert(&mut store, k, loc(i as u32)).unwrap();
        }
        let mut cursor = tree.range(&mut store, None, true, None, true).unwrap();
        let seen: Vec<Vec<u8>> = cursor
            .collect_all(&mut store)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_oversized_key_rejected() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        let big = vec![7u8; max_key_len(SIZE_PAGE_MIN) + 1];
        assert!(matches!(
            tree.insert(&mut store, &big, loc(1)),
            Err(GdbxError::EncodeUnsupported(_))
        ));
    }

    #[test]
    fn test_collect_pages_sees_whole_tree() {
        let mut store = MemStore::new(SIZE_PAGE_MIN);
        let mut tree = BTree::create(&mut store).unwrap();
        for n in 0..3000u32 {
            tree.insert(&mut store, &key(n), loc(n)).unwrap();
        }
        let pages = tree.collect_pages(&mut store).unwrap();
        // Every allocated page belongs to the tree in this store.
        assert_eq!(pages.len(), store.pages.len());
        assert!(pages.contains(&tree.root));
    }
}
