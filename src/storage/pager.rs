//! Paged file I/O.
//!
//! [`Pager`] is the only component that touches the data file. It opens or
//! creates the backing file, loads and rewrites the super-page, reads and
//! writes whole pages through the buffer pool, grows the file, and forces
//! durability with `sync_all`. Page reads verify the trailing CRC; transient
//! I/O errors are retried a bounded number of times before surfacing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};

use crate::storage::checksum;
use crate::storage::constants::*;
use crate::storage::page::SuperPage;
use crate::storage::pool::{BufferPool, PageBuf};
use crate::util::hex::format_hex32;
use crate::{GdbxError, Result};

/// Manages all file access for one open database.
pub struct Pager {
    file: Mutex<File>,
    path: PathBuf,
    page_size: u32,
    pool: Arc<BufferPool>,
    read_only: bool,
}

impl Pager {
    /// Create a new database file with an empty super-page.
    ///
    /// The caller initializes roots and writes the real super-page afterward;
    /// this only reserves page 0.
    pub fn create<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Pager> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| GdbxError::IoError(format!("cannot create {}: {}", path.display(), e)))?;
        let zero = vec![0u8; page_size as usize];
        file.write_all(&zero)
            .map_err(|e| GdbxError::IoError(format!("cannot reserve super-page: {}", e)))?;
        Ok(Pager {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
            pool: BufferPool::new(page_size as usize),
            read_only: false,
        })
    }

    /// Open an existing database file and parse its super-page.
    ///
    /// Returns the pager together with the parsed super-page; recovery
    /// decisions belong to the caller.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<(Pager, SuperPage)> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GdbxError::FileNotFound(path.display().to_string()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| GdbxError::IoError(format!("cannot open {}: {}", path.display(), e)))?;

        // The page size lives in the super-page; probe with the smallest
        // supported size first, then re-read at the real size.
        let mut probe = vec![0u8; SIZE_PAGE_MIN as usize];
        file.read_exact(&mut probe)
            .map_err(|e| GdbxError::FileCorrupt(format!("cannot read super-page: {}", e)))?;
        if probe[SUPER_MAGIC..SUPER_MAGIC + 4] != MAGIC {
            return Err(GdbxError::FileCorrupt(
                "bad magic, not a gdbx database".into(),
            ));
        }
        let page_size = BigEndian::read_u32(&probe[SUPER_PAGE_SIZE..]);
        if !(SIZE_PAGE_MIN..=SIZE_PAGE_MAX).contains(&page_size) || !page_size.is_power_of_two() {
            return Err(GdbxError::FileCorrupt(format!(
                "unsupported page size {}",
                page_size
            )));
        }
        file.seek(SeekFrom::Start(0))
            .map_err(|e| GdbxError::IoError(format!("cannot seek: {}", e)))?;
        let mut page0 = vec![0u8; page_size as usize];
        file.read_exact(&mut page0)
            .map_err(|e| GdbxError::FileCorrupt(format!("cannot read super-page: {}", e)))?;
        let sp = SuperPage::parse(&page0)?;

        let pager = Pager {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
            pool: BufferPool::new(page_size as usize),
            read_only,
        };
        Ok((pager, sp))
    }

    /// The page size of this file.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file was opened without write access.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Current file length in pages (rounded down).
    pub fn file_pages(&self) -> Result<u32> {
        let file = self.file.lock().unwrap();
        let len = file
            .metadata()
            .map_err(|e| GdbxError::IoError(format!("cannot stat {}: {}", self.path.display(), e)))?
            .len();
        Ok((len / self.page_size as u64) as u32)
    }

    fn read_at(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        let offset = page_id as u64 * self.page_size as u64;
        let mut last_err = None;
        for _ in 0..IO_RETRY_LIMIT {
            let mut file = self.file.lock().unwrap();
            let attempt = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(buf));
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(GdbxError::IoError(format!(
            "cannot read page {}: {}",
            page_id,
            last_err.unwrap()
        )))
    }

    /// Read a page and verify its trailing CRC.
    pub fn read_page(&self, page_id: u32) -> Result<PageBuf> {
        let mut buf = self.pool.rent();
        self.read_at(page_id, &mut buf)?;
        if !checksum::verify_page_crc(&buf) {
            return Err(GdbxError::FileCorrupt(format!(
                "page {} checksum mismatch: stored {}, computed {}",
                page_id,
                format_hex32(checksum::stored_page_crc(&buf)),
                format_hex32(checksum::page_crc(&buf))
            )));
        }
        Ok(buf)
    }

    /// Read a page without checksum verification (recovery paths).
    pub fn read_page_raw(&self, page_id: u32) -> Result<PageBuf> {
        let mut buf = self.pool.rent();
        self.read_at(page_id, &mut buf)?;
        Ok(buf)
    }

    /// Write a full page at its offset. The buffer must already carry its
    /// trailing CRC; the pager does not stamp.
    pub fn write_page(&self, page_id: u32, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(GdbxError::NotOpen);
        }
        if data.len() != self.page_size as usize {
            return Err(GdbxError::IoError(format!(
                "page buffer is {} bytes, expected {}",
                data.len(),
                self.page_size
            )));
        }
        let offset = page_id as u64 * self.page_size as u64;
        let mut last_err = None;
        for _ in 0..IO_RETRY_LIMIT {
            let mut file = self.file.lock().unwrap();
            let attempt = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(data));
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(GdbxError::IoError(format!(
            "cannot write page {}: {}",
            page_id,
            last_err.unwrap()
        )))
    }

    /// Extend the file with zero pages up to `page_count` pages.
    pub fn grow_to(&self, page_count: u32) -> Result<()> {
        if self.read_only {
            return Err(GdbxError::NotOpen);
        }
        let file = self.file.lock().unwrap();
        file.set_len(page_count as u64 * self.page_size as u64)
            .map_err(|e| GdbxError::IoError(format!("cannot grow file: {}", e)))
    }

    /// Force all written pages to durable storage.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_all()
            .map_err(|e| GdbxError::IoError(format!("sync failed: {}", e)))
    }
}
