//! Embedded single-file JSON document database core.
//!
//! The `gdbx-core` crate (library name `gdbx`) is a storage and query engine
//! linked directly into a host process. It keeps schema-lite JSON documents
//! in named collections inside one paged file, maintains B+tree indexes over
//! chosen fields, and serves point, range, and predicate queries through a
//! cost-aware planner.
//!
//! # Quick example
//!
//! ```no_run
//! use gdbx::database::{Database, OpenMode};
//! use gdbx::document::{Document, TypeInfo};
//! use gdbx::query::filter::Filter;
//! use gdbx::types::{FieldType, Value};
//!
//! let db = Database::open("people.gdbx", OpenMode::ReadWrite).unwrap();
//! db.ensure_collection(
//!     TypeInfo::new("people").with_index("age", FieldType::Int32, false),
//! )
//! .unwrap();
//!
//! let mut doc = Document::parse(r#"{"name":"Ada","age":36}"#).unwrap();
//! let id = db.insert("people", &mut doc).unwrap();
//!
//! let adults = db
//!     .query("people")
//!     .filter(
//!         Filter::greater_than_or_equal("age", FieldType::Int32, Value::Int32(18)).unwrap(),
//!     )
//!     .to_list()
//!     .unwrap();
//! assert_eq!(adults.len(), 1);
//! let _ = id;
//! ```
//!
//! ## Key entry points
//!
//! | Type / Function | Purpose |
//! |-----------------|---------|
//! | [`Database`](database::Database) | Open/create a database file, CRUD, transactions, queries |
//! | [`TypeInfo`](document::TypeInfo) | Collection registration: indexed fields, id accessors |
//! | [`Filter`](query::filter::Filter) | Typed predicate over a document field |
//! | [`Document`](document::Document) | A JSON document as seen by the engine |
//! | [`FieldType`](types::FieldType) | Closed enumeration of indexable scalar types |
//! | [`encode_key`](keycodec::encode_key) | Order-preserving key encoding for one value |
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`storage`] | Paged file format: pager, bitmap, heap, B+tree, WAL, transactions, catalog |
//! | [`keycodec`] | Order-preserving binary encoding of typed keys |
//! | [`types`] | Field types and runtime values (including `Decimal` and `Guid`) |
//! | [`query`] | Filters, the query planner, and the plan executor |
//! | [`document`] | JSON codec seam and collection descriptors |
//! | [`database`] | The user-facing handle and transaction API |
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `async` | off | Cooperative executor variants (`to_list_async`, …) driven by `tokio`, with cancellation honored between pages and candidate documents. |

pub mod database;
pub mod document;
pub mod keycodec;
pub mod query;
pub mod storage;
pub mod types;
pub mod util;

use thiserror::Error;

/// Errors returned by `gdbx` operations.
///
/// Every failure carries a stable kind; messages are advisory and may change
/// between releases.
#[derive(Error, Debug)]
pub enum GdbxError {
    /// The database file does not exist (read-only open of a missing path).
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The file exists but is not a valid database, or a page failed its
    /// checksum with no usable recovery record.
    #[error("file corrupt: {0}")]
    FileCorrupt(String),

    /// The file was written by an incompatible format version.
    #[error("format version mismatch: file has v{found}, this build supports v{supported}")]
    FormatVersionMismatch { found: u32, supported: u32 },

    /// The handle has been closed, or the database entered a fatal read-only
    /// state and the operation requires writing.
    #[error("database is not open for this operation")]
    NotOpen,

    /// An insert or replace would duplicate a value on a unique index.
    #[error("unique constraint violation on index '{index}'")]
    UniqueConstraintViolation { index: String },

    /// No document with the given id exists in the collection.
    #[error("document {id} not found in collection '{collection}'")]
    DocumentNotFound { collection: String, id: i32 },

    /// A filter was constructed with an operation its field type does not
    /// support, or a query referenced an unknown collection or index.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A value cannot be encoded as an index key (e.g. a `Complex` field).
    #[error("cannot encode value: {0}")]
    EncodeUnsupported(String),

    /// A second writer attempted to start while a write transaction was
    /// already active on this handle.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// An I/O error after the bounded retry budget was exhausted.
    #[error("I/O error: {0}")]
    IoError(String),

    /// An async operation observed its cancellation token at a suspension
    /// point.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GdbxError>;
