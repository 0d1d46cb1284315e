//! Documents, the JSON codec seam, and collection descriptors.
//!
//! The engine stores opaque byte payloads; a [`JsonCodec`] turns them into
//! [`Document`]s and resolves typed field values by name. The bundled
//! [`DefaultJsonCodec`] is `serde_json`-backed; hosts with their own wire
//! format plug in an alternative implementation.
//!
//! [`TypeInfo`] is the registration descriptor for a collection: which
//! fields are indexed (with types and uniqueness), optional compiled field
//! accessors that bypass by-name resolution, and the id accessors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::keycodec;
use crate::types::{Decimal, FieldType, Guid, Value};
use crate::{GdbxError, Result};

/// A JSON document as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(serde_json::Value);

impl Document {
    /// Parse a document from JSON text.
    pub fn parse(text: &str) -> Result<Document> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| GdbxError::InvalidFilter(format!("invalid document JSON: {}", e)))?;
        Ok(Document(value))
    }

    /// Wrap an already-built JSON value.
    pub fn from_value(value: serde_json::Value) -> Document {
        Document(value)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Resolve a dot-separated path to a JSON node.
    pub fn get_path(&self, path: &str) -> Option<&serde_json::Value> {
        let mut node = &self.0;
        for part in path.split('.') {
            node = node.as_object()?.get(part)?;
        }
        Some(node)
    }

    /// Set a top-level field.
    pub fn set_field(&mut self, field: &str, value: serde_json::Value) {
        if let Some(map) = self.0.as_object_mut() {
            map.insert(field.to_string(), value);
        }
    }
}

/// Byte codec plus typed field resolution over documents.
pub trait JsonCodec: Send + Sync {
    /// Decode stored bytes into a document.
    fn deserialize(&self, bytes: &[u8]) -> Result<Document>;

    /// Encode a document for storage.
    fn serialize(&self, doc: &Document) -> Result<Vec<u8>>;

    /// Resolve `field` (dot-separated path) as `ty`. Missing fields and
    /// uncoercible values resolve to [`Value::Null`]; JSON arrays resolve to
    /// [`Value::Array`] with each element coerced.
    fn try_get_value(&self, doc: &Document, field: &str, ty: FieldType) -> Value;
}

/// The bundled `serde_json` codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultJsonCodec;

fn coerce_scalar(node: &serde_json::Value, ty: FieldType) -> Value {
    use serde_json::Value as J;
    match (ty, node) {
        (_, J::Null) => Value::Null,
        (FieldType::Int8, v) => v
            .as_i64()
            .and_then(|n| i8::try_from(n).ok())
            .map_or(Value::Null, Value::Int8),
        (FieldType::Int16, v) => v
            .as_i64()
            .and_then(|n| i16::try_from(n).ok())
            .map_or(Value::Null, Value::Int16),
        (FieldType::Int32, v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map_or(Value::Null, Value::Int32),
        (FieldType::Int64, v) => v.as_i64().map_or(Value::Null, Value::Int64),
        (FieldType::UInt8, v) => v
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .map_or(Value::Null, Value::UInt8),
        (FieldType::UInt16, v) => v
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .map_or(Value::Null, Value::UInt16),
        (FieldType::UInt32, v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map_or(Value::Null, Value::UInt32),
        (FieldType::UInt64, v) => v.as_u64().map_or(Value::Null, Value::UInt64),
        (FieldType::Single, v) => v.as_f64().map_or(Value::Null, |f| Value::Single(f as f32)),
        (FieldType::Double, v) => v.as_f64().map_or(Value::Null, Value::Double),
        (FieldType::Decimal, J::String(s)) => {
            Decimal::parse(s).map_or(Value::Null, Value::Decimal)
        }
        (FieldType::Decimal, J::Number(n)) => {
            Decimal::parse(&n.to_string()).map_or(Value::Null, Value::Decimal)
        }
        (FieldType::Bool, J::Bool(b)) => Value::Bool(*b),
        (FieldType::Char, J::String(s)) => {
            let mut units = s.encode_utf16();
            match (units.next(), units.next()) {
                (Some(u), None) => Value::Char(u),
                _ => Value::Null,
            }
        }
        (FieldType::Char, J::Number(n)) => n
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .map_or(Value::Null, Value::Char),
        (FieldType::String, J::String(s)) => Value::Str(s.clone()),
        (FieldType::DateTime, v) => v.as_i64().map_or(Value::Null, Value::DateTime),
        (FieldType::DateTimeOffset, J::Object(map)) => {
            match (
                map.get("utc_ticks").and_then(|v| v.as_i64()),
                map.get("offset_ticks").and_then(|v| v.as_i64()),
            ) {
                (Some(utc_ticks), Some(offset_ticks)) => Value::DateTimeOffset {
                    utc_ticks,
                    offset_ticks,
                },
                _ => Value::Null,
            }
        }
        (FieldType::DateTimeOffset, J::Array(parts)) if parts.len() == 2 => {
            match (parts[0].as_i64(), parts[1].as_i64()) {
                (Some(utc_ticks), Some(offset_ticks)) => Value::DateTimeOffset {
                    utc_ticks,
                    offset_ticks,
                },
                _ => Value::Null,
            }
        }
        (FieldType::DateOnly, v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map_or(Value::Null, Value::DateOnly),
        (FieldType::TimeOnly, v) => v.as_i64().map_or(Value::Null, Value::TimeOnly),
        (FieldType::TimeSpan, v) => v.as_i64().map_or(Value::Null, Value::TimeSpan),
        (FieldType::Guid, J::String(s)) => Guid::parse(s).map_or(Value::Null, Value::Guid),
        _ => Value::Null,
    }
}

impl JsonCodec for DefaultJsonCodec {
    fn deserialize(&self, bytes: &[u8]) -> Result<Document> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| GdbxError::FileCorrupt(format!("stored document is not JSON: {}", e)))?;
        Ok(Document(value))
    }

    fn serialize(&self, doc: &Document) -> Result<Vec<u8>> {
        serde_json::to_vec(&doc.0)
            .map_err(|e| GdbxError::IoError(format!("cannot serialize document: {}", e)))
    }

    fn try_get_value(&self, doc: &Document, field: &str, ty: FieldType) -> Value {
        let node = match doc.get_path(field) {
            Some(n) => n,
            None => return Value::Null,
        };
        match node {
            serde_json::Value::Array(items) if ty != FieldType::Complex => {
                Value::Array(items.iter().map(|item| coerce_scalar(item, ty)).collect())
            }
            node => coerce_scalar(node, ty),
        }
    }
}

/// A compiled field accessor, bypassing by-name JSON resolution.
pub type FieldAccessor = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// One index requested at collection registration.
#[derive(Clone)]
pub struct IndexSpec {
    /// Ordered fields with their types.
    pub fields: Vec<(String, FieldType)>,
    /// Whether duplicate values are rejected.
    pub unique: bool,
}

/// Collection registration descriptor.
///
/// Built by hand or by a host-side generator; the engine only calls through
/// the surface here.
#[derive(Clone)]
pub struct TypeInfo {
    /// Collection name.
    pub collection_name: String,
    /// Indexes to ensure at registration.
    pub indexes: Vec<IndexSpec>,
    accessors: HashMap<String, FieldAccessor>,
}

/// The document id field every collection keys on.
pub const ID_FIELD: &str = "Id";

impl TypeInfo {
    /// A descriptor with no indexes.
    pub fn new(collection_name: &str) -> TypeInfo {
        TypeInfo {
            collection_name: collection_name.to_string(),
            indexes: Vec::new(),
            accessors: HashMap::new(),
        }
    }

    /// Add a single-field index.
    pub fn with_index(mut self, field: &str, ty: FieldType, unique: bool) -> TypeInfo {
        self.indexes.push(IndexSpec {
            fields: vec![(field.to_string(), ty)],
            unique,
        });
        self
    }

    /// Add a compound index over the given fields, in order.
    pub fn with_compound_index(mut self, fields: &[(&str, FieldType)], unique: bool) -> TypeInfo {
        self.indexes.push(IndexSpec {
            fields: fields
                .iter()
                .map(|(f, ty)| (f.to_string(), *ty))
                .collect(),
            unique,
        });
        self
    }

    /// Register a compiled accessor for a field.
    pub fn with_accessor(
        mut self,
        field: &str,
        accessor: impl Fn(&Document) -> Value + Send + Sync + 'static,
    ) -> TypeInfo {
        self.accessors.insert(field.to_string(), Arc::new(accessor));
        self
    }

    /// The compiled accessor for a field, if registered.
    pub fn accessor(&self, field: &str) -> Option<&FieldAccessor> {
        self.accessors.get(field)
    }

    /// Resolve one field: compiled accessor first, then the codec.
    pub fn field_value(
        &self,
        doc: &Document,
        codec: &dyn JsonCodec,
        field: &str,
        ty: FieldType,
    ) -> Value {
        match self.accessors.get(field) {
            Some(accessor) => accessor(doc),
            None => codec.try_get_value(doc, field, ty),
        }
    }

    /// Read the document id, if present and in range.
    pub fn get_id(&self, doc: &Document) -> Option<i32> {
        let id = doc.get_path(ID_FIELD)?.as_i64()?;
        i32::try_from(id).ok().filter(|id| *id >= 1)
    }

    /// Write the document id.
    pub fn set_id(&self, doc: &mut Document, id: i32) {
        doc.set_field(ID_FIELD, serde_json::Value::from(id));
    }

    /// Encode the index keys for a document into `writer`, one entry per
    /// index. A missing field contributes its null encoding.
    pub fn extract_indexed_fields(
        &self,
        doc: &Document,
        codec: &dyn JsonCodec,
        fields: &[(String, FieldType)],
        writer: &mut IndexKeyWriter,
    ) -> Result<()> {
        writer.begin();
        for (field, ty) in fields {
            let value = self.field_value(doc, codec, field, *ty);
            let value = match value {
                // A collection-valued field cannot feed a scalar index key.
                Value::Array(_) => Value::Null,
                v => v,
            };
            keycodec::encode_value(&value, *ty, writer.buf())?;
        }
        Ok(())
    }
}

/// Reusable key-building buffer handed to index extraction.
#[derive(Default)]
pub struct IndexKeyWriter {
    buf: Vec<u8>,
}

impl IndexKeyWriter {
    /// A fresh writer.
    pub fn new() -> IndexKeyWriter {
        IndexKeyWriter::default()
    }

    fn begin(&mut self) {
        self.buf.clear();
    }

    fn buf(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// The encoded key bytes for the most recent extraction.
    pub fn key(&self) -> &[u8] {
        &self.buf
    }

    /// Take the key, leaving the writer reusable.
    pub fn take_key(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
