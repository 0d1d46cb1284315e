//! The user-facing database handle.
//!
//! [`Database`] owns the pager, the WAL, and the committed-state snapshot
//! behind a reader/writer lock. Queries hold the read guard for their whole
//! execution and therefore observe strictly pre- or post-commit state;
//! commit takes the write guard and swaps roots atomically. Writer mutual
//! exclusion is a separate mutex held from [`Database::begin_transaction`]
//! through commit or abort; a second concurrent writer gets
//! [`GdbxError::TransactionConflict`] instead of queueing.
//!
//! Single-document operations (`insert`, `replace`, `delete_by_id`) are
//! auto-commit: each opens a transaction, performs the mutation pipeline
//! (heap, primary tree, every secondary index, catalog counters), and
//! commits. A failed commit is treated as fatal: the handle degrades to
//! read-only and further writes fail fast.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::document::{
    DefaultJsonCodec, Document, IndexKeyWriter, JsonCodec, TypeInfo, ID_FIELD,
};
use crate::keycodec;
use crate::query::executor;
use crate::query::filter::Filter;
use crate::query::planner::{self, QueryPlan};
use crate::query::{OrderBy, QueryOptions};
use crate::storage::btree::BTree;
use crate::storage::catalog::{Catalog, CollectionEntry, IndexDefinition};
use crate::storage::checksum;
use crate::storage::constants::{FORMAT_VERSION, PAGE_NONE, SIZE_PAGE_DEFAULT};
use crate::storage::freespace::FreeSpaceMap;
use crate::storage::heap;
use crate::storage::page::{SuperPage, TreeNodeHeader};
use crate::storage::page_types::PageKind;
use crate::storage::pager::Pager;
use crate::storage::txn::{self, CommittedState, ReadStore, WorkingSet};
use crate::storage::wal::WalFile;
use crate::storage::{bitmap, PageWrite};
use crate::types::FieldType;
use crate::{GdbxError, Result};

#[cfg(feature = "async")]
use crate::query::CancelToken;

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Writable; the file is created when missing.
    ReadWrite,
    /// Read-only; the file must exist. Pending WAL replay is applied in
    /// memory without writing.
    ReadOnly,
}

/// An open database handle.
pub struct Database {
    pager: Pager,
    wal: WalFile,
    state: RwLock<CommittedState>,
    writer: Mutex<()>,
    codec: Box<dyn JsonCodec>,
    type_infos: RwLock<HashMap<String, Arc<TypeInfo>>>,
    open: AtomicBool,
    fatal: AtomicBool,
    read_only: bool,
}

impl Database {
    /// Open (or create, in [`OpenMode::ReadWrite`]) a database file with the
    /// bundled JSON codec.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Database> {
        Database::open_with_codec(path, mode, Box::new(DefaultJsonCodec))
    }

    /// Open with a caller-supplied codec.
    pub fn open_with_codec<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        codec: Box<dyn JsonCodec>,
    ) -> Result<Database> {
        let path = path.as_ref();
        let read_only = mode == OpenMode::ReadOnly;
        let wal = WalFile::new(path);

        let (pager, super_page) = if !path.exists() {
            if read_only {
                return Err(GdbxError::FileNotFound(path.display().to_string()));
            }
            Self::bootstrap(path)?
        } else {
            let (pager, sp) = Pager::open(path, read_only)?;
            let (sp, _action) = txn::recover(&pager, &wal, sp, read_only)?;
            (pager, sp)
        };

        let free_map = {
            let page0 = pager.read_page_raw(0)?;
            FreeSpaceMap::from_super_page(&page0)
        };

        Ok(Database {
            pager,
            wal,
            state: RwLock::new(CommittedState {
                super_page,
                free_map,
                next_txn_id: 1,
            }),
            writer: Mutex::new(()),
            codec,
            type_infos: RwLock::new(HashMap::new()),
            open: AtomicBool::new(true),
            fatal: AtomicBool::new(false),
            read_only,
        })
    }

    /// Lay out a fresh file: super-page, bitmap root (page 1), empty catalog
    /// tree (page 2).
    fn bootstrap(path: &Path) -> Result<(Pager, SuperPage)> {
        let page_size = SIZE_PAGE_DEFAULT;
        let pager = Pager::create(path, page_size)?;
        pager.grow_to(3)?;

        let mut bitmap_page = vec![0u8; page_size as usize];
        bitmap::init_page(&mut bitmap_page);
        for page in 0..3 {
            bitmap::set_bit(&mut bitmap_page, page, true);
        }
        checksum::stamp_page_crc(&mut bitmap_page);
        pager.write_page(1, &bitmap_page)?;

        let mut catalog_page = vec![0u8; page_size as usize];
        TreeNodeHeader {
            kind: PageKind::TreeLeaf,
            flags: 0,
            key_count: 0,
            next_leaf: PAGE_NONE,
            txn_id: 0,
        }
        .write_to(&mut catalog_page);
        checksum::stamp_page_crc(&mut catalog_page);
        pager.write_page(2, &catalog_page)?;

        let super_page = SuperPage {
            version: FORMAT_VERSION,
            page_size,
            bitmap_root: 1,
            catalog_root: 2,
            page_count: 3,
            wal_offset: 0,
        };
        let mut super_buf = vec![0u8; page_size as usize];
        super_page.write_to(&mut super_buf);
        checksum::stamp_page_crc(&mut super_buf);
        pager.write_page(0, &super_buf)?;
        pager.sync()?;
        Ok((pager, super_page))
    }

    fn check_open(&self) -> Result<()> {
        if !self.open.load(AtomicOrdering::Relaxed) {
            return Err(GdbxError::NotOpen);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only || self.fatal.load(AtomicOrdering::Relaxed) {
            return Err(GdbxError::NotOpen);
        }
        Ok(())
    }

    /// Whether the handle degraded to read-only after a failed commit.
    pub fn is_poisoned(&self) -> bool {
        self.fatal.load(AtomicOrdering::Relaxed)
    }

    /// Close the handle. Subsequent operations fail with
    /// [`GdbxError::NotOpen`].
    pub fn close(&self) -> Result<()> {
        if self.open.swap(false, AtomicOrdering::Relaxed) && !self.read_only {
            self.pager.sync()?;
        }
        Ok(())
    }

    fn type_info(&self, collection: &str) -> Arc<TypeInfo> {
        let infos = self.type_infos.read().unwrap();
        infos
            .get(collection)
            .cloned()
            .unwrap_or_else(|| Arc::new(TypeInfo::new(collection)))
    }

    /// Register a collection: remember its descriptor and make sure the
    /// collection and every declared index exist.
    pub fn ensure_collection(&self, info: TypeInfo) -> Result<()> {
        self.check_open()?;
        let name = info.collection_name.clone();
        let specs = info.indexes.clone();
        self.type_infos
            .write()
            .unwrap()
            .insert(name.clone(), Arc::new(info));

        // Peek at the catalog without a write transaction first.
        let missing_anything = {
            let state = self.state.read().unwrap();
            let mut store = ReadStore::new(&self.pager, &state);
            let catalog = Catalog::open(state.super_page.catalog_root);
            match catalog.get(&mut store, &name)? {
                None => true,
                Some(entry) => specs.iter().any(|spec| {
                    let ix_name = IndexDefinition::name_for(
                        &spec
                            .fields
                            .iter()
                            .map(|(f, t)| (f.clone(), *t))
                            .collect::<Vec<_>>(),
                    );
                    entry.index(&ix_name).is_none()
                }),
            }
        };
        if !missing_anything {
            return Ok(());
        }

        let mut tx = self.begin_transaction()?;
        tx.ensure_collection_inner(&name, &specs)?;
        tx.commit()
    }

    /// Begin an explicit write transaction.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        self.check_writable()?;
        let guard = self.writer.try_lock().map_err(|_| {
            GdbxError::TransactionConflict("another write transaction is active".into())
        })?;
        let snapshot = self.state.read().unwrap().clone();
        let ws = WorkingSet::new(&self.pager, &snapshot);
        Ok(Transaction {
            db: self,
            _writer: guard,
            fsmap: snapshot.free_map.clone(),
            catalog_root: snapshot.super_page.catalog_root,
            ws: Some(ws),
        })
    }

    /// Insert a document; assigns and writes the id when absent. Returns
    /// the DocId.
    pub fn insert(&self, collection: &str, doc: &mut Document) -> Result<i32> {
        let mut tx = self.begin_transaction()?;
        let id = tx.insert(collection, doc)?;
        tx.commit()?;
        Ok(id)
    }

    /// Replace a document by its embedded id.
    pub fn replace(&self, collection: &str, doc: &Document) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        tx.replace(collection, doc)?;
        tx.commit()
    }

    /// Delete a document by id.
    pub fn delete_by_id(&self, collection: &str, id: i32) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        tx.delete_by_id(collection, id)?;
        tx.commit()
    }

    /// Fetch a document by id.
    pub fn get_by_id(&self, collection: &str, id: i32) -> Result<Option<Document>> {
        self.check_open()?;
        let state = self.state.read().unwrap();
        let mut store = ReadStore::new(&self.pager, &state);
        let catalog = Catalog::open(state.super_page.catalog_root);
        let entry = match catalog.get(&mut store, collection)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let primary = BTree {
            root: entry.primary_root,
        };
        match primary.search(&mut store, &keycodec::doc_id_key(id))? {
            None => Ok(None),
            Some(loc) => {
                let bytes = heap::get(&mut store, loc)?;
                Ok(Some(self.codec.deserialize(&bytes)?))
            }
        }
    }

    /// Create a secondary index over the given fields, backfilling existing
    /// documents.
    pub fn create_index(
        &self,
        collection: &str,
        fields: &[(&str, FieldType)],
        unique: bool,
    ) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        tx.create_index(collection, fields, unique)?;
        tx.commit()
    }

    /// Drop a secondary index and free its pages.
    pub fn drop_index(&self, collection: &str, index_name: &str) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        tx.drop_index(collection, index_name)?;
        tx.commit()
    }

    /// Drop a collection: its documents, trees, and catalog entry.
    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        tx.drop_collection(collection)?;
        tx.commit()?;
        self.type_infos.write().unwrap().remove(collection);
        Ok(())
    }

    /// Names of all collections.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.check_open()?;
        let state = self.state.read().unwrap();
        let mut store = ReadStore::new(&self.pager, &state);
        let catalog = Catalog::open(state.super_page.catalog_root);
        Ok(catalog
            .list(&mut store)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Start building a query against a collection.
    pub fn query(&self, collection: &str) -> QueryBuilder<'_> {
        QueryBuilder {
            db: self,
            collection: collection.to_string(),
            filters: Vec::new(),
            opts: QueryOptions::default(),
        }
    }

    fn entry_for_query(
        &self,
        store: &mut ReadStore<'_>,
        catalog_root: u32,
        collection: &str,
    ) -> Result<CollectionEntry> {
        let catalog = Catalog::open(catalog_root);
        catalog.get(store, collection)?.ok_or_else(|| {
            GdbxError::InvalidFilter(format!("unknown collection '{}'", collection))
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// An explicit write transaction. Dropped without [`commit`] it aborts: the
/// working set is discarded and no disk state changes.
///
/// [`commit`]: Transaction::commit
pub struct Transaction<'db> {
    db: &'db Database,
    _writer: MutexGuard<'db, ()>,
    fsmap: FreeSpaceMap,
    catalog_root: u32,
    ws: Option<WorkingSet<'db>>,
}

impl<'db> Transaction<'db> {
    fn ws(&mut self) -> &mut WorkingSet<'db> {
        self.ws.as_mut().expect("transaction already finished")
    }

    fn catalog(&self) -> Catalog {
        Catalog::open(self.catalog_root)
    }

    fn entry(&mut self, collection: &str) -> Result<CollectionEntry> {
        let catalog = self.catalog();
        let ws = self.ws.as_mut().expect("transaction already finished");
        catalog.get(ws, collection)?.ok_or_else(|| {
            GdbxError::InvalidFilter(format!("unknown collection '{}'", collection))
        })
    }

    fn put_entry(&mut self, entry: &CollectionEntry) -> Result<()> {
        let mut catalog = self.catalog();
        let Transaction { ws, fsmap, .. } = self;
        catalog.put(ws.as_mut().unwrap(), fsmap, entry)?;
        if catalog.tree.root != self.catalog_root {
            self.catalog_root = catalog.tree.root;
        }
        self.ws().pending_roots.catalog_root = Some(self.catalog_root);
        Ok(())
    }

    fn index_key(&self, info: &TypeInfo, doc: &Document, ix: &IndexDefinition) -> Result<Vec<u8>> {
        let mut writer = IndexKeyWriter::new();
        info.extract_indexed_fields(doc, self.db.codec.as_ref(), &ix.fields, &mut writer)?;
        Ok(writer.take_key())
    }

    /// Whether an index holds the exact key for any document other than
    /// `exclude_id`.
    fn index_contains_other(
        &mut self,
        root: u32,
        key: &[u8],
        exclude_id: Option<i32>,
    ) -> Result<bool> {
        let tree = BTree { root };
        let hi = keycodec::upper_bound_for_prefix(key);
        let ws = self.ws();
        let mut cursor = tree.range(ws, Some(key), true, hi, false)?;
        while let Some((k, _)) = cursor.next(ws)? {
            let id = keycodec::doc_id_from_suffix(&k)?;
            if exclude_id != Some(id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Insert a document inside this transaction.
    pub fn insert(&mut self, collection: &str, doc: &mut Document) -> Result<i32> {
        let info = self.db.type_info(collection);
        let mut entry = self.entry(collection)?;

        let id = match info.get_id(doc) {
            Some(id) => {
                let primary = BTree {
                    root: entry.primary_root,
                };
                if primary.search(self.ws(), &keycodec::doc_id_key(id))?.is_some() {
                    return Err(GdbxError::UniqueConstraintViolation {
                        index: ID_FIELD.to_string(),
                    });
                }
                if id >= entry.next_doc_id {
                    entry.next_doc_id = id + 1;
                }
                id
            }
            None => {
                let id = entry.next_doc_id;
                entry.next_doc_id += 1;
                info.set_id(doc, id);
                id
            }
        };

        // Unique enforcement before any mutation.
        for ix in &entry.indexes {
            if !ix.is_unique {
                continue;
            }
            let key = self.index_key(&info, doc, ix)?;
            if self.index_contains_other(ix.root_page_id, &key, None)? {
                return Err(GdbxError::UniqueConstraintViolation {
                    index: ix.name.clone(),
                });
            }
        }

        let bytes = self.db.codec.serialize(doc)?;
        let loc = {
            let Transaction { ws, fsmap, .. } = self;
            heap::insert(ws.as_mut().unwrap(), fsmap, PageKind::Heap, &bytes)?
        };

        let mut primary = BTree {
            root: entry.primary_root,
        };
        primary.insert(self.ws(), &keycodec::doc_id_key(id), loc)?;
        entry.primary_root = primary.root;

        for ix in &mut entry.indexes {
            let mut key = {
                let mut writer = IndexKeyWriter::new();
                info.extract_indexed_fields(doc, self.db.codec.as_ref(), &ix.fields, &mut writer)?;
                writer.take_key()
            };
            keycodec::append_doc_id(&mut key, id);
            let mut tree = BTree {
                root: ix.root_page_id,
            };
            tree.insert(self.ws(), &key, loc)?;
            ix.root_page_id = tree.root;
        }

        self.publish_roots(&entry);
        self.put_entry(&entry)?;
        Ok(id)
    }

    /// Replace a document (by its embedded id) inside this transaction.
    pub fn replace(&mut self, collection: &str, doc: &Document) -> Result<()> {
        let info = self.db.type_info(collection);
        let mut entry = self.entry(collection)?;
        let id = info.get_id(doc).ok_or_else(|| {
            GdbxError::InvalidFilter("replace requires a document with an Id".into())
        })?;

        let primary = BTree {
            root: entry.primary_root,
        };
        let old_loc = primary
            .search(self.ws(), &keycodec::doc_id_key(id))?
            .ok_or_else(|| GdbxError::DocumentNotFound {
                collection: collection.to_string(),
                id,
            })?;
        let old_doc = {
            let bytes = heap::get(self.ws(), old_loc)?;
            self.db.codec.deserialize(&bytes)?
        };

        // Collect per-index old/new keys, and enforce uniqueness on the
        // values that changed.
        let mut key_pairs = Vec::with_capacity(entry.indexes.len());
        for ix in &entry.indexes {
            let old_key = self.index_key(&info, &old_doc, ix)?;
            let new_key = self.index_key(&info, doc, ix)?;
            if ix.is_unique
                && new_key != old_key
                && self.index_contains_other(ix.root_page_id, &new_key, Some(id))?
            {
                return Err(GdbxError::UniqueConstraintViolation {
                    index: ix.name.clone(),
                });
            }
            key_pairs.push((old_key, new_key));
        }

        let bytes = self.db.codec.serialize(doc)?;
        let new_loc = {
            let Transaction { ws, fsmap, .. } = self;
            heap::replace(ws.as_mut().unwrap(), fsmap, old_loc, &bytes)?
        };

        let mut primary = BTree {
            root: entry.primary_root,
        };
        if new_loc != old_loc {
            primary.insert(self.ws(), &keycodec::doc_id_key(id), new_loc)?;
            entry.primary_root = primary.root;
        }

        for (ix, (old_key, new_key)) in entry.indexes.iter_mut().zip(key_pairs) {
            let mut tree = BTree {
                root: ix.root_page_id,
            };
            let mut old_full = old_key;
            keycodec::append_doc_id(&mut old_full, id);
            let mut new_full = new_key;
            keycodec::append_doc_id(&mut new_full, id);
            if old_full != new_full {
                tree.delete(self.ws(), &old_full)?;
                tree.insert(self.ws(), &new_full, new_loc)?;
            } else if new_loc != old_loc {
                tree.insert(self.ws(), &new_full, new_loc)?;
            }
            ix.root_page_id = tree.root;
        }

        self.publish_roots(&entry);
        self.put_entry(&entry)
    }

    /// Delete a document by id inside this transaction.
    pub fn delete_by_id(&mut self, collection: &str, id: i32) -> Result<()> {
        let info = self.db.type_info(collection);
        let entry = self.entry(collection)?;

        let mut primary = BTree {
            root: entry.primary_root,
        };
        let loc = primary
            .search(self.ws(), &keycodec::doc_id_key(id))?
            .ok_or_else(|| GdbxError::DocumentNotFound {
                collection: collection.to_string(),
                id,
            })?;
        let doc = {
            let bytes = heap::get(self.ws(), loc)?;
            self.db.codec.deserialize(&bytes)?
        };

        {
            let Transaction { ws, fsmap, .. } = self;
            heap::delete(ws.as_mut().unwrap(), fsmap, loc)?;
        }
        let mut entry = entry;
        primary.delete(self.ws(), &keycodec::doc_id_key(id))?;
        entry.primary_root = primary.root;

        for ix in &mut entry.indexes {
            let mut key = {
                let mut writer = IndexKeyWriter::new();
                info.extract_indexed_fields(&doc, self.db.codec.as_ref(), &ix.fields, &mut writer)?;
                writer.take_key()
            };
            keycodec::append_doc_id(&mut key, id);
            let mut tree = BTree {
                root: ix.root_page_id,
            };
            tree.delete(self.ws(), &key)?;
            ix.root_page_id = tree.root;
        }

        // Copy-on-write relocates the touched nodes, so the roots moved
        // even though nothing split.
        self.publish_roots(&entry);
        self.put_entry(&entry)
    }

    fn publish_roots(&mut self, entry: &CollectionEntry) {
        let name = entry.name.clone();
        let primary_root = entry.primary_root;
        let roots: Vec<(String, u32)> = entry
            .indexes
            .iter()
            .map(|ix| (ix.name.clone(), ix.root_page_id))
            .collect();
        let ws = self.ws();
        ws.pending_roots.set_collection_root(&name, primary_root);
        for (ix_name, root) in roots {
            ws.pending_roots.set_index_root(&name, &ix_name, root);
        }
    }

    fn ensure_collection_inner(
        &mut self,
        name: &str,
        specs: &[crate::document::IndexSpec],
    ) -> Result<()> {
        let catalog = self.catalog();
        let existing = {
            let ws = self.ws.as_mut().unwrap();
            catalog.get(ws, name)?
        };
        let mut entry = match existing {
            Some(entry) => entry,
            None => {
                let primary = BTree::create(self.ws())?;
                let entry = CollectionEntry {
                    name: name.to_string(),
                    primary_root: primary.root,
                    next_doc_id: 1,
                    indexes: Vec::new(),
                };
                self.publish_roots(&entry);
                self.put_entry(&entry)?;
                entry
            }
        };
        for spec in specs {
            let fields: Vec<(String, FieldType)> = spec.fields.clone();
            let ix_name = IndexDefinition::name_for(&fields);
            if entry.index(&ix_name).is_some() {
                continue;
            }
            let borrowed: Vec<(&str, FieldType)> =
                fields.iter().map(|(f, t)| (f.as_str(), *t)).collect();
            self.create_index(name, &borrowed, spec.unique)?;
            entry = self.entry(name)?;
        }
        Ok(())
    }

    /// Create an index inside this transaction, backfilling existing
    /// documents through the primary tree.
    pub fn create_index(
        &mut self,
        collection: &str,
        fields: &[(&str, FieldType)],
        unique: bool,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(GdbxError::InvalidFilter(
                "an index requires at least one field".into(),
            ));
        }
        for (field, ty) in fields {
            if !ty.is_indexable() {
                return Err(GdbxError::EncodeUnsupported(format!(
                    "field '{}' has unindexable type {:?}",
                    field, ty
                )));
            }
        }
        let info = self.db.type_info(collection);
        let mut entry = self.entry(collection)?;
        let owned_fields: Vec<(String, FieldType)> = fields
            .iter()
            .map(|(f, t)| (f.to_string(), *t))
            .collect();
        let name = IndexDefinition::name_for(&owned_fields);
        if let Some(existing) = entry.index(&name) {
            if existing.is_unique == unique {
                return Ok(());
            }
            return Err(GdbxError::InvalidFilter(format!(
                "index '{}' already exists with different uniqueness",
                name
            )));
        }

        let mut tree = BTree::create(self.ws())?;
        let mut ix = IndexDefinition {
            name: name.clone(),
            is_compound: owned_fields.len() > 1,
            fields: owned_fields,
            is_unique: unique,
            root_page_id: tree.root,
        };

        // Backfill from the primary tree.
        let primary = BTree {
            root: entry.primary_root,
        };
        let entries = {
            let ws = self.ws();
            let mut cursor = primary.range(ws, None, true, None, true)?;
            cursor.collect_all(ws)?
        };
        for (pkey, loc) in entries {
            let raw = u32::from_be_bytes([pkey[0], pkey[1], pkey[2], pkey[3]]);
            let id = (raw ^ 0x8000_0000) as i32;
            let doc = {
                let bytes = heap::get(self.ws(), loc)?;
                self.db.codec.deserialize(&bytes)?
            };
            let mut key = self.index_key(&info, &doc, &ix)?;
            if unique && self.index_contains_other(tree.root, &key, None)? {
                return Err(GdbxError::UniqueConstraintViolation {
                    index: name.clone(),
                });
            }
            keycodec::append_doc_id(&mut key, id);
            tree.insert(self.ws(), &key, loc)?;
        }
        ix.root_page_id = tree.root;
        entry.indexes.push(ix);

        self.publish_roots(&entry);
        self.put_entry(&entry)
    }

    /// Drop an index inside this transaction, freeing its pages.
    pub fn drop_index(&mut self, collection: &str, index_name: &str) -> Result<()> {
        let mut entry = self.entry(collection)?;
        let pos = entry
            .indexes
            .iter()
            .position(|ix| ix.name == index_name)
            .ok_or_else(|| {
                GdbxError::InvalidFilter(format!(
                    "unknown index '{}' on collection '{}'",
                    index_name, collection
                ))
            })?;
        let ix = entry.indexes.remove(pos);
        let tree = BTree {
            root: ix.root_page_id,
        };
        let pages = {
            let ws = self.ws();
            tree.collect_pages(ws)?
        };
        for page in pages {
            self.ws().free_page(page)?;
        }
        self.publish_roots(&entry);
        self.put_entry(&entry)
    }

    /// Drop a collection inside this transaction: every document slot, the
    /// primary and index trees, and the catalog entry.
    pub fn drop_collection(&mut self, collection: &str) -> Result<()> {
        let entry = self.entry(collection)?;

        // Release document payloads (and overflow chains) first.
        let primary = BTree {
            root: entry.primary_root,
        };
        let docs = {
            let ws = self.ws();
            let mut cursor = primary.range(ws, None, true, None, true)?;
            cursor.collect_all(ws)?
        };
        for (_, loc) in docs {
            let Transaction { ws, fsmap, .. } = self;
            heap::delete(ws.as_mut().unwrap(), fsmap, loc)?;
        }

        // Then the trees.
        let mut owned_pages = {
            let ws = self.ws();
            primary.collect_pages(ws)?
        };
        for ix in &entry.indexes {
            let tree = BTree {
                root: ix.root_page_id,
            };
            let ws = self.ws();
            owned_pages.extend(tree.collect_pages(ws)?);
        }
        for page in owned_pages {
            self.ws().free_page(page)?;
        }

        let mut catalog = self.catalog();
        {
            let Transaction { ws, fsmap, .. } = self;
            catalog.remove(ws.as_mut().unwrap(), fsmap, collection)?;
        }
        if catalog.tree.root != self.catalog_root {
            self.catalog_root = catalog.tree.root;
        }
        self.ws().pending_roots.catalog_root = Some(self.catalog_root);
        Ok(())
    }

    /// Commit: flush dirty pages, land the WAL record, swap roots, sync.
    pub fn commit(mut self) -> Result<()> {
        let mut ws = self.ws.take().expect("transaction already finished");
        ws.free_map = self.fsmap.clone();
        let mut state = self.db.state.write().unwrap();
        match txn::commit(ws, &self.db.wal, &mut state) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The protocol failed midway; the handle can no longer
                // trust its in-memory roots against the file.
                self.db.fatal.store(true, AtomicOrdering::Relaxed);
                Err(e)
            }
        }
    }

    /// Abort: drop the working set; no disk state changed.
    pub fn abort(mut self) {
        self.ws.take();
    }
}

/// Fluent query builder returned by [`Database::query`].
pub struct QueryBuilder<'db> {
    db: &'db Database,
    collection: String,
    filters: Vec<Filter>,
    opts: QueryOptions,
}

impl<'db> QueryBuilder<'db> {
    /// Add a filter; filters combine with AND in the order given.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Order ascending by a field.
    pub fn order_by(mut self, field: &str, ty: FieldType) -> Self {
        self.opts.order_by.push(OrderBy {
            field: field.to_string(),
            field_type: ty,
            descending: false,
        });
        self
    }

    /// Order descending by a field.
    pub fn order_by_descending(mut self, field: &str, ty: FieldType) -> Self {
        self.opts.order_by.push(OrderBy {
            field: field.to_string(),
            field_type: ty,
            descending: true,
        });
        self
    }

    /// Skip the first `n` results.
    pub fn skip(mut self, n: usize) -> Self {
        self.opts.skip = n;
        self
    }

    /// Return at most `n` results.
    pub fn limit(mut self, n: usize) -> Self {
        self.opts.limit = Some(n);
        self
    }

    fn prepare(
        &self,
        store: &mut ReadStore<'_>,
        catalog_root: u32,
    ) -> Result<(CollectionEntry, Vec<Filter>, QueryPlan)> {
        let entry = self
            .db
            .entry_for_query(store, catalog_root, &self.collection)?;
        let mut filters = self.filters.clone();
        for f in &mut filters {
            let has_index = entry.index_on_field(&f.field_name).is_some();
            f.mark_indexed(has_index);
        }
        let plan = planner::plan(&filters, &entry);
        Ok((entry, filters, plan))
    }

    /// Run the query and return matching documents.
    pub fn to_list(self) -> Result<Vec<Document>> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (entry, filters, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        let hits = executor::execute(
            &mut store,
            self.db.codec.as_ref(),
            &entry,
            &filters,
            &plan,
            &self.opts,
        )?;
        Ok(hits.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Run the query and return matching DocIds.
    pub fn ids(self) -> Result<Vec<i32>> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (entry, filters, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        let hits = executor::execute(
            &mut store,
            self.db.codec.as_ref(),
            &entry,
            &filters,
            &plan,
            &self.opts,
        )?;
        Ok(hits.into_iter().map(|(id, _)| id).collect())
    }

    /// Run the query and return the first match, if any.
    pub fn first(mut self) -> Result<Option<Document>> {
        self.opts.limit = Some(1);
        Ok(self.to_list()?.into_iter().next())
    }

    /// Count matches without materializing documents when possible.
    pub fn count(self) -> Result<usize> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (entry, filters, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        executor::count(&mut store, self.db.codec.as_ref(), &entry, &filters, &plan)
    }

    /// The strategy this query would run with, e.g. `SecondaryIndex/Between`.
    pub fn explain(&self) -> Result<String> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (_, _, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        Ok(plan.describe())
    }

    /// Cooperative variant of [`to_list`](QueryBuilder::to_list); honors the
    /// cancellation token between candidate documents and index pages.
    #[cfg(feature = "async")]
    pub async fn to_list_async(self, cancel: &CancelToken) -> Result<Vec<Document>> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (entry, filters, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        let hits = executor::execute_async(
            &mut store,
            self.db.codec.as_ref(),
            &entry,
            &filters,
            &plan,
            &self.opts,
            cancel,
        )
        .await?;
        Ok(hits.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Cooperative variant of [`count`](QueryBuilder::count).
    #[cfg(feature = "async")]
    pub async fn count_async(self, cancel: &CancelToken) -> Result<usize> {
        self.db.check_open()?;
        let state = self.db.state.read().unwrap();
        let mut store = ReadStore::new(&self.db.pager, &state);
        let (entry, filters, plan) = self.prepare(&mut store, state.super_page.catalog_root)?;
        executor::count_async(
            &mut store,
            self.db.codec.as_ref(),
            &entry,
            &filters,
            &plan,
            cancel,
        )
        .await
    }
}
