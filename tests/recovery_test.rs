//! Crash recovery tests.
//!
//! These fabricate mid-commit crash states byte-by-byte: the data file as a
//! finished transaction left it, the super-page rolled back to the previous
//! commit, and the WAL either complete (crash after the WAL fsync, before
//! the root swap) or torn (crash before the fsync). Reopening must finish
//! the commit in the first case and fall back to the prior state in the
//! second.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use gdbx::database::{Database, OpenMode};
use gdbx::document::{Document, TypeInfo};
use gdbx::storage::checksum;
use gdbx::storage::constants::SIZE_PAGE_DEFAULT;
use gdbx::storage::page::SuperPage;
use gdbx::storage::wal::{RootTag, RootUpdate, WalFile, WalRecord};
use gdbx::types::FieldType;
use gdbx::GdbxError;

const PS: usize = SIZE_PAGE_DEFAULT as usize;

struct CrashFixture {
    path: PathBuf,
    /// Full file bytes before the interrupted transaction.
    pre: Vec<u8>,
    /// Full file bytes after it committed.
    post: Vec<u8>,
}

/// Build the pre/post states around one transaction inserting 5 documents.
fn build_fixture(dir: &TempDir) -> CrashFixture {
    let path = dir.path().join("crash.gdbx");
    {
        let db = Database::open(&path, OpenMode::ReadWrite).unwrap();
        db.ensure_collection(
            TypeInfo::new("u").with_index("email", FieldType::String, true),
        )
        .unwrap();
        db.close().unwrap();
    }
    let pre = fs::read(&path).unwrap();

    {
        let db = Database::open(&path, OpenMode::ReadWrite).unwrap();
        let mut tx = db.begin_transaction().unwrap();
        for i in 0..5 {
            let mut doc =
                Document::parse(&format!(r#"{{"email":"user{}@x"}}"#, i)).unwrap();
            tx.insert("u", &mut doc).unwrap();
        }
        tx.commit().unwrap();
        db.close().unwrap();
    }
    let post = fs::read(&path).unwrap();
    assert!(post.len() > pre.len());

    CrashFixture { path, pre, post }
}

/// Write the data file as the transaction flushed it, but with the
/// super-page still pointing at the previous commit.
fn write_file_with_stale_super(fixture: &CrashFixture) {
    fs::write(&fixture.path, &fixture.post).unwrap();
    let mut f = OpenOptions::new()
        .write(true)
        .open(&fixture.path)
        .unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write_all(&fixture.pre[..PS]).unwrap();
    f.sync_all().unwrap();
}

/// The commit record the interrupted transaction would have fsynced.
fn fabricate_wal_record(fixture: &CrashFixture) -> WalRecord {
    let post_super = SuperPage::parse(&fixture.post[..PS]).unwrap();
    let mut pages = Vec::new();
    for id in 1..post_super.page_count as usize {
        let post_page = &fixture.post[id * PS..(id + 1) * PS];
        let pre_page = fixture.pre.get(id * PS..(id + 1) * PS);
        if pre_page != Some(post_page) {
            pages.push((id as u32, checksum::page_crc(post_page)));
        }
    }
    WalRecord {
        txn_id: 1,
        roots: vec![
            RootUpdate {
                tag: RootTag::Catalog,
                name: String::new(),
                new_root: post_super.catalog_root,
            },
            RootUpdate {
                tag: RootTag::Bitmap,
                name: String::new(),
                new_root: post_super.bitmap_root,
            },
        ],
        pages,
    }
}

fn count_u(path: &Path) -> usize {
    let db = Database::open(path, OpenMode::ReadWrite).unwrap();
    db.query("u").count().unwrap()
}

#[test]
fn test_crash_after_wal_fsync_replays_the_commit() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);

    write_file_with_stale_super(&fixture);
    let wal = WalFile::new(&fixture.path);
    wal.append_and_sync(&fabricate_wal_record(&fixture)).unwrap();

    // Restart: the WAL is complete and every page CRC matches, so the root
    // swap replays and all 5 documents are present.
    {
        let db = Database::open(&fixture.path, OpenMode::ReadWrite).unwrap();
        assert_eq!(db.query("u").count().unwrap(), 5);
        for id in 1..=5 {
            assert!(db.get_by_id("u", id).unwrap().is_some());
        }
        db.close().unwrap();
    }
    // The WAL was consumed and the replay is durable.
    assert!(wal.read_record().unwrap().is_none());
    assert_eq!(count_u(&fixture.path), 5);
}

#[test]
fn test_crash_before_wal_fsync_discards_the_commit() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);

    // No WAL at all: the transaction died before its record reached disk.
    write_file_with_stale_super(&fixture);

    let db = Database::open(&fixture.path, OpenMode::ReadWrite).unwrap();
    assert_eq!(db.query("u").count().unwrap(), 0);

    // The database stays fully usable afterward.
    let mut doc = Document::parse(r#"{"email":"fresh@x"}"#).unwrap();
    db.insert("u", &mut doc).unwrap();
    assert_eq!(db.query("u").count().unwrap(), 1);
}

#[test]
fn test_torn_wal_is_discarded() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);

    write_file_with_stale_super(&fixture);
    let record_bytes = fabricate_wal_record(&fixture).encode();
    let wal_path = WalFile::sidecar_path(&fixture.path);
    fs::write(&wal_path, &record_bytes[..record_bytes.len() / 2]).unwrap();

    let db = Database::open(&fixture.path, OpenMode::ReadWrite).unwrap();
    assert_eq!(db.query("u").count().unwrap(), 0);
    db.close().unwrap();
    // The torn record was removed on open.
    assert!(!wal_path.exists());
}

#[test]
fn test_wal_with_mismatching_page_crcs_is_discarded() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);

    write_file_with_stale_super(&fixture);
    let mut record = fabricate_wal_record(&fixture);
    // Claim a CRC the file does not have: the flush never finished.
    record.pages[0].1 ^= 0xFFFF_FFFF;
    WalFile::new(&fixture.path)
        .append_and_sync(&record)
        .unwrap();

    assert_eq!(count_u(&fixture.path), 0);
}

#[test]
fn test_read_only_open_replays_in_memory_only() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);

    write_file_with_stale_super(&fixture);
    let wal = WalFile::new(&fixture.path);
    wal.append_and_sync(&fabricate_wal_record(&fixture)).unwrap();

    {
        let db = Database::open(&fixture.path, OpenMode::ReadOnly).unwrap();
        assert_eq!(db.query("u").count().unwrap(), 5);
    }
    // Nothing was written: the WAL is still pending and the on-disk
    // super-page is still the stale one.
    assert!(wal.read_record().unwrap().is_some());
    let raw = fs::read(&fixture.path).unwrap();
    assert_eq!(&raw[..PS], &fixture.pre[..PS]);

    // A later writable open finishes the job.
    assert_eq!(count_u(&fixture.path), 5);
    assert!(wal.read_record().unwrap().is_none());
}

#[test]
fn test_corrupt_page_is_detected() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);
    // Healthy committed file; damage one byte of a non-super page.
    fs::write(&fixture.path, &fixture.post).unwrap();
    let mut f = OpenOptions::new()
        .write(true)
        .open(&fixture.path)
        .unwrap();
    let sp = SuperPage::parse(&fixture.post[..PS]).unwrap();
    let victim = sp.catalog_root as usize;
    let original = fixture.post[victim * PS + 100];
    f.seek(SeekFrom::Start((victim * PS + 100) as u64)).unwrap();
    f.write_all(&[!original]).unwrap();
    f.sync_all().unwrap();

    let db = Database::open(&fixture.path, OpenMode::ReadWrite).unwrap();
    assert!(matches!(
        db.query("u").count(),
        Err(GdbxError::FileCorrupt(_))
    ));
}

#[test]
fn test_version_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let fixture = build_fixture(&dir);
    fs::write(&fixture.path, &fixture.post).unwrap();

    let mut page0 = fixture.post[..PS].to_vec();
    let mut sp = SuperPage::parse(&page0).unwrap();
    sp.version = 99;
    sp.write_to(&mut page0);
    checksum::stamp_page_crc(&mut page0);
    let mut f = OpenOptions::new()
        .write(true)
        .open(&fixture.path)
        .unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write_all(&page0).unwrap();
    f.sync_all().unwrap();

    assert!(matches!(
        Database::open(&fixture.path, OpenMode::ReadWrite),
        Err(GdbxError::FormatVersionMismatch { found: 99, .. })
    ));
}

#[test]
fn test_not_a_database_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.gdbx");
    fs::write(&path, vec![0x5Au8; PS]).unwrap();
    assert!(matches!(
        Database::open(&path, OpenMode::ReadWrite),
        Err(GdbxError::FileCorrupt(_))
    ));
}
