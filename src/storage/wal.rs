//! Write-ahead log.
//!
//! The WAL is a sidecar file (`<db-path>.wal`) holding at most one commit
//! record at a time: the record is appended and fsynced before the
//! super-page root swap, and truncated away once the data file is durable.
//! On open, a complete record whose page CRCs all match the data file means
//! the commit landed and only the root swap may be missing; a torn or
//! mismatching record is discarded, because the previously committed state
//! is still intact on disk.
//!
//! Record layout (all integers big-endian):
//!
//! ```text
//! len u32 | txn_id u64 | root_count u16
//!         | root_count * (tree_tag u8, name_len u16, name_utf8, new_root u32)
//!         | page_count u32 | page_count * (page_id u32, page_crc u32)
//!         | crc u32
//! ```
//!
//! `len` counts everything after itself, including the trailing CRC, which
//! covers the body between the two.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::storage::checksum;
use crate::storage::constants::*;
use crate::{GdbxError, Result};

/// Which root pointer a [`RootUpdate`] replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootTag {
    /// The catalog tree root (name is empty).
    Catalog,
    /// The free-page bitmap root (name is empty).
    Bitmap,
    /// A collection's primary tree root (name = collection).
    Primary,
    /// A secondary index root (name = `collection/index`).
    Index,
}

impl RootTag {
    fn as_u8(self) -> u8 {
        match self {
            RootTag::Catalog => WAL_TAG_CATALOG,
            RootTag::Bitmap => WAL_TAG_BITMAP,
            RootTag::Primary => WAL_TAG_PRIMARY,
            RootTag::Index => WAL_TAG_INDEX,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            WAL_TAG_CATALOG => Some(RootTag::Catalog),
            WAL_TAG_BITMAP => Some(RootTag::Bitmap),
            WAL_TAG_PRIMARY => Some(RootTag::Primary),
            WAL_TAG_INDEX => Some(RootTag::Index),
            _ => None,
        }
    }
}

/// One root pointer replacement carried by a commit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootUpdate {
    /// Which tree family the root belongs to.
    pub tag: RootTag,
    /// Collection (or `collection/index`) name; empty for catalog/bitmap.
    pub name: String,
    /// The new root page id.
    pub new_root: u32,
}

/// A complete commit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Id of the committing transaction.
    pub txn_id: u64,
    /// Root swaps to apply at step 4 of the commit protocol.
    pub roots: Vec<RootUpdate>,
    /// `(page_id, crc)` for every page the transaction flushed.
    pub pages: Vec<(u32, u32)>,
}

impl WalRecord {
    /// Serialize the record, length-prefixed and CRC-terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.pages.len() * 8);
        body.write_u64::<BigEndian>(self.txn_id).unwrap();
        body.write_u16::<BigEndian>(self.roots.len() as u16).unwrap();
        for root in &self.roots {
            body.write_u8(root.tag.as_u8()).unwrap();
            body.write_u16::<BigEndian>(root.name.len() as u16).unwrap();
            body.extend_from_slice(root.name.as_bytes());
            body.write_u32::<BigEndian>(root.new_root).unwrap();
        }
        body.write_u32::<BigEndian>(self.pages.len() as u32).unwrap();
        for &(page_id, crc) in &self.pages {
            body.write_u32::<BigEndian>(page_id).unwrap();
            body.write_u32::<BigEndian>(crc).unwrap();
        }
        let crc = checksum::wal_crc(&body);

        let mut out = Vec::with_capacity(body.len() + 8);
        out.write_u32::<BigEndian>(body.len() as u32 + 4).unwrap();
        out.extend_from_slice(&body);
        out.write_u32::<BigEndian>(crc).unwrap();
        out
    }

    /// Decode a record from raw WAL bytes.
    ///
    /// Returns `Ok(None)` when the bytes do not form one complete, CRC-valid
    /// record (a torn write, which recovery discards).
    pub fn decode(bytes: &[u8]) -> Result<Option<WalRecord>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let len = BigEndian::read_u32(bytes) as usize;
        if len < 4 + 8 + 2 + 4 || bytes.len() < 4 + len {
            return Ok(None);
        }
        let body = &bytes[4..4 + len - 4];
        let stored_crc = BigEndian::read_u32(&bytes[4 + len - 4..]);
        if checksum::wal_crc(body) != stored_crc {
            return Ok(None);
        }

        let mut at = 0usize;
        let txn_id = BigEndian::read_u64(&body[at..]);
        at += 8;
        let root_count = BigEndian::read_u16(&body[at..]) as usize;
        at += 2;
        let mut roots = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            if at + 3 > body.len() {
                return Ok(None);
            }
            let tag = match RootTag::from_u8(body[at]) {
                Some(t) => t,
                None => {
                    return Err(GdbxError::FileCorrupt(format!(
                        "unknown WAL root tag {}",
                        body[at]
                    )))
                }
            };
            at += 1;
            let name_len = BigEndian::read_u16(&body[at..]) as usize;
            at += 2;
            if at + name_len + 4 > body.len() {
                return Ok(None);
            }
            let name = String::from_utf8(body[at..at + name_len].to_vec())
                .map_err(|_| GdbxError::FileCorrupt("WAL root name is not UTF-8".into()))?;
            at += name_len;
            let new_root = BigEndian::read_u32(&body[at..]);
            at += 4;
            roots.push(RootUpdate {
                tag,
                name,
                new_root,
            });
        }
        if at + 4 > body.len() {
            return Ok(None);
        }
        let page_count = BigEndian::read_u32(&body[at..]) as usize;
        at += 4;
        if at + page_count * 8 != body.len() {
            return Ok(None);
        }
        let mut pages = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            let page_id = BigEndian::read_u32(&body[at..]);
            let crc = BigEndian::read_u32(&body[at + 4..]);
            at += 8;
            pages.push((page_id, crc));
        }
        Ok(Some(WalRecord {
            txn_id,
            roots,
            pages,
        }))
    }
}

/// Handle on the sidecar WAL file.
pub struct WalFile {
    path: PathBuf,
}

impl WalFile {
    /// The WAL path for a database path.
    pub fn sidecar_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".wal");
        PathBuf::from(name)
    }

    /// Create a handle (the file itself may not exist yet).
    pub fn new(db_path: &Path) -> WalFile {
        WalFile {
            path: Self::sidecar_path(db_path),
        }
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a commit record and force it to durable storage.
    pub fn append_and_sync(&self, record: &WalRecord) -> Result<()> {
        let bytes = record.encode();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| GdbxError::IoError(format!("cannot open WAL: {}", e)))?;
        file.write_all(&bytes)
            .map_err(|e| GdbxError::IoError(format!("cannot write WAL: {}", e)))?;
        file.sync_all()
            .map_err(|e| GdbxError::IoError(format!("cannot sync WAL: {}", e)))?;
        Ok(())
    }

    /// Read the pending commit record, if a complete one is present.
    pub fn read_record(&self) -> Result<Option<WalRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GdbxError::IoError(format!("cannot open WAL: {}", e))),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| GdbxError::IoError(format!("cannot read WAL: {}", e)))?;
        WalRecord::decode(&bytes)
    }

    /// Discard the WAL after a durable commit (or a torn record).
    pub fn truncate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GdbxError::IoError(format!("cannot truncate WAL: {}", e))),
        }
    }
}
