//! Persistent catalog of collections and indexes.
//!
//! Each collection has one entry: primary tree root, next-DocId counter, and
//! its index definitions. Entries are serialized binary records kept in
//! [`PageKind::Catalog`] slotted pages and located through a B+tree keyed by
//! the order-preserving encoding of the collection name. Catalog mutations
//! ride the same transaction as the data mutations they accompany, so an
//! index creation swaps the catalog root and the index root together.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::Serialize;

use crate::keycodec;
use crate::storage::btree::BTree;
use crate::storage::freespace::FreeSpaceMap;
use crate::storage::heap;
use crate::storage::page_types::PageKind;
use crate::storage::{PageRead, PageWrite};
use crate::types::{FieldType, Value};
use crate::{GdbxError, Result};

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    /// Field name, or the joined field names for a compound index.
    pub name: String,
    /// Ordered indexed fields with their types.
    pub fields: Vec<(String, FieldType)>,
    /// Whether duplicate values are rejected.
    pub is_unique: bool,
    /// Whether the key is composed from multiple fields.
    pub is_compound: bool,
    /// Root page of the index tree.
    pub root_page_id: u32,
}

impl IndexDefinition {
    /// The conventional name for a field list: the field itself, or the
    /// fields joined with `_`.
    pub fn name_for(fields: &[(String, FieldType)]) -> String {
        fields
            .iter()
            .map(|(f, _)| f.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// One collection's persistent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionEntry {
    /// Collection name.
    pub name: String,
    /// Root page of the primary tree.
    pub primary_root: u32,
    /// Next DocId to assign.
    pub next_doc_id: i32,
    /// Secondary indexes.
    pub indexes: Vec<IndexDefinition>,
}

impl CollectionEntry {
    /// Find an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|ix| ix.name == name)
    }

    /// Find the first index whose leading field is `field`.
    pub fn index_on_field(&self, field: &str) -> Option<&IndexDefinition> {
        self.indexes
            .iter()
            .find(|ix| ix.fields.first().map(|(f, _)| f.as_str()) == Some(field))
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.write_u16::<BigEndian>(self.name.len() as u16).unwrap();
        out.extend_from_slice(self.name.as_bytes());
        out.write_u32::<BigEndian>(self.primary_root).unwrap();
        out.write_u32::<BigEndian>(self.next_doc_id as u32).unwrap();
        out.write_u16::<BigEndian>(self.indexes.len() as u16).unwrap();
        for ix in &self.indexes {
            out.write_u16::<BigEndian>(ix.name.len() as u16).unwrap();
            out.extend_from_slice(ix.name.as_bytes());
            let flags = (ix.is_unique as u8) | ((ix.is_compound as u8) << 1);
            out.push(flags);
            out.write_u32::<BigEndian>(ix.root_page_id).unwrap();
            out.write_u16::<BigEndian>(ix.fields.len() as u16).unwrap();
            for (field, ty) in &ix.fields {
                out.write_u16::<BigEndian>(field.len() as u16).unwrap();
                out.extend_from_slice(field.as_bytes());
                out.push(ty.as_u8());
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<CollectionEntry> {
        let corrupt = || GdbxError::FileCorrupt("truncated catalog entry".into());
        let mut at = 0usize;
        let read_u16 = |at: &mut usize| -> Result<u16> {
            if *at + 2 > bytes.len() {
                return Err(corrupt());
            }
            let v = BigEndian::read_u16(&bytes[*at..]);
            *at += 2;
            Ok(v)
        };
        let read_u32 = |at: &mut usize| -> Result<u32> {
            if *at + 4 > bytes.len() {
                return Err(corrupt());
            }
            let v = BigEndian::read_u32(&bytes[*at..]);
            *at += 4;
            Ok(v)
        };
        let read_str = |at: &mut usize, len: usize| -> Result<String> {
            if *at + len > bytes.len() {
                return Err(corrupt());
            }
            let s = std::str::from_utf8(&bytes[*at..*at + len])
                .map_err(|_| GdbxError::FileCorrupt("catalog entry name is not UTF-8".into()))?
                .to_string();
            *at += len;
            Ok(s)
        };

        let name_len = read_u16(&mut at)? as usize;
        let name = read_str(&mut at, name_len)?;
        let primary_root = read_u32(&mut at)?;
        let next_doc_id = read_u32(&mut at)? as i32;
        let index_count = read_u16(&mut at)? as usize;
        let mut indexes = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let name_len = read_u16(&mut at)? as usize;
            let ix_name = read_str(&mut at, name_len)?;
            if at >= bytes.len() {
                return Err(corrupt());
            }
            let flags = bytes[at];
            at += 1;
            let root_page_id = read_u32(&mut at)?;
            let field_count = read_u16(&mut at)? as usize;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                let flen = read_u16(&mut at)? as usize;
                let fname = read_str(&mut at, flen)?;
                if at >= bytes.len() {
                    return Err(corrupt());
                }
                let ty = FieldType::from_u8(bytes[at]).ok_or_else(|| {
                    GdbxError::FileCorrupt(format!("unknown field type tag {}", bytes[at]))
                })?;
                at += 1;
                fields.push((fname, ty));
            }
            indexes.push(IndexDefinition {
                name: ix_name,
                fields,
                is_unique: flags & 1 != 0,
                is_compound: flags & 2 != 0,
                root_page_id,
            });
        }
        Ok(CollectionEntry {
            name,
            primary_root,
            next_doc_id,
            indexes,
        })
    }
}

/// Handle on the catalog tree. The root moves with copy-on-write growth;
/// callers publish the new root through the transaction's pending set.
pub struct Catalog {
    /// Name-keyed locator tree.
    pub tree: BTree,
}

impl Catalog {
    /// Open the catalog at a known root.
    pub fn open(root: u32) -> Catalog {
        Catalog {
            tree: BTree { root },
        }
    }

    /// Create an empty catalog tree.
    pub fn create<S: PageWrite + ?Sized>(store: &mut S) -> Result<Catalog> {
        Ok(Catalog {
            tree: BTree::create(store)?,
        })
    }

    fn key_for(name: &str) -> Result<Vec<u8>> {
        keycodec::encode_key(&Value::Str(name.to_string()), FieldType::String)
    }

    /// Look up one collection entry.
    pub fn get<S: PageRead + ?Sized>(
        &self,
        store: &mut S,
        name: &str,
    ) -> Result<Option<CollectionEntry>> {
        let key = Self::key_for(name)?;
        match self.tree.search(store, &key)? {
            None => Ok(None),
            Some(loc) => {
                let bytes = heap::get(store, loc)?;
                Ok(Some(CollectionEntry::decode(&bytes)?))
            }
        }
    }

    /// Insert or replace a collection entry.
    ///
    /// The catalog is rebuilt into freshly allocated pages on every change,
    /// so the previously committed catalog stays intact on disk until the
    /// root swap (catalog entries carry tree roots; updating them in place
    /// would leak uncommitted roots into the committed view).
    pub fn put<S: PageWrite + ?Sized>(
        &mut self,
        store: &mut S,
        fsmap: &mut FreeSpaceMap,
        entry: &CollectionEntry,
    ) -> Result<()> {
        let mut entries = self.list(store)?;
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        self.rebuild(store, fsmap, entries)
    }

    /// Remove a collection entry. Returns whether it existed.
    pub fn remove<S: PageWrite + ?Sized>(
        &mut self,
        store: &mut S,
        fsmap: &mut FreeSpaceMap,
        name: &str,
    ) -> Result<bool> {
        let mut entries = self.list(store)?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Ok(false);
        }
        self.rebuild(store, fsmap, entries)?;
        Ok(true)
    }

    /// Write all entries into a fresh tree and fresh record pages, then
    /// release every page the old catalog owned.
    fn rebuild<S: PageWrite + ?Sized>(
        &mut self,
        store: &mut S,
        fsmap: &mut FreeSpaceMap,
        entries: Vec<CollectionEntry>,
    ) -> Result<()> {
        // Pages the old catalog owns: its record pages (plus any overflow
        // chains) and its tree pages. None of them may be rewritten, so
        // placement must not pick them as candidates.
        let mut old_pages: Vec<u32> = Vec::new();
        {
            let mut cursor = self.tree.range(store, None, true, None, true)?;
            while let Some((_, loc)) = cursor.next(store)? {
                if !old_pages.contains(&loc.page_id) {
                    old_pages.push(loc.page_id);
                }
                old_pages.extend(heap::overflow_pages(store, loc)?);
            }
        }
        old_pages.extend(self.tree.collect_pages(store)?);
        for page in &old_pages {
            fsmap.set(*page, 0);
        }

        let mut new_tree = BTree::create(store)?;
        for entry in &entries {
            let key = Self::key_for(&entry.name)?;
            let bytes = entry.encode();
            let loc = heap::insert(store, fsmap, PageKind::Catalog, &bytes)?;
            new_tree.insert(store, &key, loc)?;
        }

        for page in old_pages {
            store.free_page(page)?;
        }
        self.tree = new_tree;
        Ok(())
    }

    /// All collection entries in name order.
    pub fn list<S: PageRead + ?Sized>(&self, store: &mut S) -> Result<Vec<CollectionEntry>> {
        let mut cursor = self.tree.range(store, None, true, None, true)?;
        let mut out = Vec::new();
        while let Some((_, loc)) = cursor.next(store)? {
            let bytes = heap::get(store, loc)?;
            out.push(CollectionEntry::decode(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::constants::SIZE_PAGE_DEFAULT;
    use crate::storage::testutil::MemStore;

    fn sample_entry(name: &str) -> CollectionEntry {
        CollectionEntry {
            name: name.into(),
            primary_root: 7,
            next_doc_id: 42,
            indexes: vec![
                IndexDefinition {
                    name: "email".into(),
                    fields: vec![("email".into(), FieldType::String)],
                    is_unique: true,
                    is_compound: false,
                    root_page_id: 9,
                },
                IndexDefinition {
                    name: "last_first".into(),
                    fields: vec![
                        ("last".into(), FieldType::String),
                        ("first".into(), FieldType::String),
                    ],
                    is_unique: false,
                    is_compound: true,
                    root_page_id: 11,
                },
            ],
        }
    }

    #[test]
    fn test_entry_codec_round_trip() {
        let entry = sample_entry("users");
        let decoded = CollectionEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_entry_decode_rejects_truncation() {
        let bytes = sample_entry("users").encode();
        for cut in [0, 1, 5, bytes.len() - 1] {
            assert!(CollectionEntry::decode(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_put_get_remove() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut fsmap = FreeSpaceMap::new(SIZE_PAGE_DEFAULT);
        let mut catalog = Catalog::create(&mut store).unwrap();

        assert!(catalog.get(&mut store, "users").unwrap().is_none());
        catalog
            .put(&mut store, &mut fsmap, &sample_entry("users"))
            .unwrap();
        let got = catalog.get(&mut store, "users").unwrap().unwrap();
        assert_eq!(got.next_doc_id, 42);
        assert_eq!(got.indexes.len(), 2);

        assert!(catalog.remove(&mut store, &mut fsmap, "users").unwrap());
        assert!(catalog.get(&mut store, "users").unwrap().is_none());
        assert!(!catalog.remove(&mut store, &mut fsmap, "users").unwrap());
    }

    #[test]
    fn test_put_updates_existing_entry() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut fsmap = FreeSpaceMap::new(SIZE_PAGE_DEFAULT);
        let mut catalog = Catalog::create(&mut store).unwrap();

        let mut entry = sample_entry("users");
        catalog.put(&mut store, &mut fsmap, &entry).unwrap();
        entry.next_doc_id = 100;
        entry.primary_root = 55;
        catalog.put(&mut store, &mut fsmap, &entry).unwrap();

        let got = catalog.get(&mut store, "users").unwrap().unwrap();
        assert_eq!(got.next_doc_id, 100);
        assert_eq!(got.primary_root, 55);
        assert_eq!(catalog.list(&mut store).unwrap().len(), 1);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let mut store = MemStore::new(SIZE_PAGE_DEFAULT);
        let mut fsmap = FreeSpaceMap::new(SIZE_PAGE_DEFAULT);
        let mut catalog = Catalog::create(&mut store).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            catalog
                .put(&mut store, &mut fsmap, &sample_entry(name))
                .unwrap();
        }
        let names: Vec<String> = catalog
            .list(&mut store)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_index_lookups() {
        let entry = sample_entry("users");
        assert!(entry.index("email").is_some());
        assert!(entry.index("missing").is_none());
        assert_eq!(entry.index_on_field("last").unwrap().name, "last_first");
        assert!(entry.index_on_field("first").is_none());
        assert_eq!(
            IndexDefinition::name_for(&[
                ("last".into(), FieldType::String),
                ("first".into(), FieldType::String)
            ]),
            "last_first"
        );
    }
}
