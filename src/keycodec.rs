//! Order-preserving key encoding.
//!
//! For any two values `a`, `b` of the same [`FieldType`], `encode(a)` sorts
//! before `encode(b)` lexicographically exactly when `a < b` under the
//! type's natural order, with null strictly least. Encoding is deterministic
//! and injective per type, so encoded keys compare with plain `memcmp`.
//!
//! Rules (all integers big-endian):
//!
//! - null is the single byte `0x00`; every non-null value starts `0x01`.
//! - signed integers are biased by flipping the sign bit;
//! - floats flip the sign bit when non-negative and all bits when negative;
//! - decimals are sign-flag, scale, 12-byte mantissa (two's complement when
//!   negative), two pad bytes;
//! - strings are UTF-8 with `0x00` escaped to `0x00 0xFF` and a `0x00`
//!   terminator, so codepoint order equals byte order and more fields may
//!   follow in a compound key.
//!
//! Secondary index keys append a 4-byte big-endian DocId so duplicate field
//! values stay ordered and distinct.

use byteorder::{BigEndian, ByteOrder};

use crate::types::{FieldType, Value};
use crate::{GdbxError, Result};

/// Tag byte for a null value.
pub const NULL_TAG: u8 = 0x00;
/// Tag byte preceding every non-null body.
pub const VALUE_TAG: u8 = 0x01;

/// The smallest key any non-null value can encode to. Range scans that skip
/// nulls start here.
pub fn minimum_non_null_key() -> Vec<u8> {
    vec![VALUE_TAG]
}

fn mismatch(ty: FieldType, v: &Value) -> GdbxError {
    GdbxError::EncodeUnsupported(format!("value {:?} does not match field type {:?}", v, ty))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_i64_biased(out: &mut Vec<u8>, v: i64) {
    put_u64(out, (v as u64) ^ 0x8000_0000_0000_0000);
}

fn put_i32_biased(out: &mut Vec<u8>, v: i32) {
    put_u32(out, (v as u32) ^ 0x8000_0000);
}

/// Append escaped string bytes: `0x00` becomes `0x00 0xFF`.
fn put_escaped(out: &mut Vec<u8>, s: &str) {
    for &b in s.as_bytes() {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
}

/// Encode one value with its null/value tag into `out`.
pub fn encode_value(v: &Value, ty: FieldType, out: &mut Vec<u8>) -> Result<()> {
    if ty == FieldType::Complex {
        return Err(GdbxError::EncodeUnsupported(
            "Complex fields cannot be index keys".into(),
        ));
    }
    if v.is_null() {
        out.push(NULL_TAG);
        return Ok(());
    }
    out.push(VALUE_TAG);
    match (ty, v) {
        (FieldType::Int8, Value::Int8(n)) => out.push((*n as u8) ^ 0x80),
        (FieldType::Int16, Value::Int16(n)) => put_u16(out, (*n as u16) ^ 0x8000),
        (FieldType::Int32, Value::Int32(n)) => put_i32_biased(out, *n),
        (FieldType::Int64, Value::Int64(n)) => put_i64_biased(out, *n),
        (FieldType::UInt8, Value::UInt8(n)) => out.push(*n),
        (FieldType::UInt16, Value::UInt16(n)) => put_u16(out, *n),
        (FieldType::UInt32, Value::UInt32(n)) => put_u32(out, *n),
        (FieldType::UInt64, Value::UInt64(n)) => put_u64(out, *n),
        (FieldType::Single, Value::Single(f)) => {
            let bits = f.to_bits();
            let mapped = if bits & 0x8000_0000 != 0 {
                !bits
            } else {
                bits | 0x8000_0000
            };
            put_u32(out, mapped);
        }
        (FieldType::Double, Value::Double(f)) => {
            let bits = f.to_bits();
            let mapped = if bits & 0x8000_0000_0000_0000 != 0 {
                !bits
            } else {
                bits | 0x8000_0000_0000_0000
            };
            put_u64(out, mapped);
        }
        (FieldType::Decimal, Value::Decimal(d)) => {
            out.push(if d.is_negative() { 0x00 } else { 0x80 });
            out.push(d.scale());
            let mantissa = d.mantissa_be();
            if d.is_negative() {
                // Two's complement over the 12-byte mantissa: larger
                // magnitudes encode smaller.
                let mut carry = true;
                let mut neg = [0u8; 12];
                for i in (0..12).rev() {
                    let (b, c) = (!mantissa[i]).overflowing_add(carry as u8);
                    neg[i] = b;
                    carry = c;
                }
                out.extend_from_slice(&neg);
            } else {
                out.extend_from_slice(&mantissa);
            }
            out.extend_from_slice(&[0x00, 0x00]);
        }
        (FieldType::Bool, Value::Bool(b)) => out.push(*b as u8),
        (FieldType::Char, Value::Char(c)) => put_u16(out, *c),
        (FieldType::String, Value::Str(s)) => {
            put_escaped(out, s);
            out.push(0x00);
        }
        (FieldType::DateTime, Value::DateTime(t)) => put_i64_biased(out, *t),
        (
            FieldType::DateTimeOffset,
            Value::DateTimeOffset {
                utc_ticks,
                offset_ticks,
            },
        ) => {
            put_i64_biased(out, *utc_ticks);
            put_i64_biased(out, *offset_ticks);
        }
        (FieldType::DateOnly, Value::DateOnly(d)) => put_i32_biased(out, *d),
        (FieldType::TimeOnly, Value::TimeOnly(t)) => put_i64_biased(out, *t),
        (FieldType::TimeSpan, Value::TimeSpan(t)) => put_i64_biased(out, *t),
        (FieldType::Guid, Value::Guid(g)) => out.extend_from_slice(&g.0),
        (ty, v) => return Err(mismatch(ty, v)),
    }
    Ok(())
}

/// Encode one value as a standalone key.
pub fn encode_key(v: &Value, ty: FieldType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_size(v, ty).unwrap_or(16));
    encode_value(v, ty, &mut out)?;
    Ok(out)
}

/// Encode a compound key by concatenating per-field encodings, each keeping
/// its own null/value tag.
pub fn encode_compound(values: &[(Value, FieldType)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (v, ty) in values {
        encode_value(v, *ty, &mut out)?;
    }
    Ok(out)
}

/// Exact encoded size of a value, tag included.
pub fn encoded_size(v: &Value, ty: FieldType) -> Option<usize> {
    if v.is_null() {
        return Some(1);
    }
    match ty {
        FieldType::Int8 | FieldType::UInt8 | FieldType::Bool => Some(2),
        FieldType::Int16 | FieldType::UInt16 | FieldType::Char => Some(3),
        FieldType::Int32 | FieldType::UInt32 | FieldType::Single | FieldType::DateOnly => Some(5),
        FieldType::Int64
        | FieldType::UInt64
        | FieldType::Double
        | FieldType::DateTime
        | FieldType::TimeOnly
        | FieldType::TimeSpan => Some(9),
        FieldType::Decimal => Some(17),
        FieldType::Guid => Some(17),
        FieldType::DateTimeOffset => Some(17),
        FieldType::String => match v {
            Value::Str(s) => {
                let zeros = s.as_bytes().iter().filter(|&&b| b == 0).count();
                Some(1 + s.len() + zeros + 1)
            }
            _ => None,
        },
        FieldType::Complex => None,
    }
}

/// Largest encoded size any value of the type can take; `None` for strings,
/// whose size is unbounded.
pub fn encoded_size_max(ty: FieldType) -> Option<usize> {
    match ty {
        FieldType::String | FieldType::Complex => None,
        FieldType::Int8 | FieldType::UInt8 | FieldType::Bool => Some(2),
        FieldType::Int16 | FieldType::UInt16 | FieldType::Char => Some(3),
        FieldType::Int32 | FieldType::UInt32 | FieldType::Single | FieldType::DateOnly => Some(5),
        FieldType::Int64
        | FieldType::UInt64
        | FieldType::Double
        | FieldType::DateTime
        | FieldType::TimeOnly
        | FieldType::TimeSpan => Some(9),
        FieldType::Decimal | FieldType::Guid | FieldType::DateTimeOffset => Some(17),
    }
}

/// Encode a string prefix for `StartsWith`: tag and escaped bytes, no
/// terminator, so every completion of the prefix sorts at or after it.
pub fn encode_string_prefix(prefix: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_size_for_prefix(prefix));
    out.push(VALUE_TAG);
    put_escaped(&mut out, prefix);
    out
}

/// Exact size [`encode_string_prefix`] produces for a prefix.
pub fn encoded_size_for_prefix(prefix: &str) -> usize {
    let zeros = prefix.as_bytes().iter().filter(|&&b| b == 0).count();
    1 + prefix.len() + zeros
}

/// Exclusive upper bound for all keys starting with `prefix_key`: increment
/// the last non-`0xFF` byte and drop everything after it. `None` when every
/// byte is `0xFF` (the range is unbounded above).
pub fn upper_bound_for_prefix(prefix_key: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix_key.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xFF {
            end.pop();
        } else {
            *end.last_mut().unwrap() = last + 1;
            return Some(end);
        }
    }
    None
}

/// The prefix-end key for a `StartsWith` predicate.
pub fn string_prefix_end(prefix: &str) -> Option<Vec<u8>> {
    upper_bound_for_prefix(&encode_string_prefix(prefix))
}

/// Primary-tree key for a DocId: sign-biased big-endian Int32 body.
pub fn doc_id_key(id: i32) -> [u8; 4] {
    ((id as u32) ^ 0x8000_0000).to_be_bytes()
}

/// Append the 4-byte big-endian DocId suffix used by secondary index keys.
pub fn append_doc_id(key: &mut Vec<u8>, id: i32) {
    key.extend_from_slice(&(id as u32).to_be_bytes());
}

/// Read back the DocId suffix of a secondary index key.
pub fn doc_id_from_suffix(key: &[u8]) -> Result<i32> {
    if key.len() < 4 {
        return Err(GdbxError::FileCorrupt(format!(
            "index key {} is too short to carry a DocId suffix",
            crate::util::hex::format_bytes(key)
        )));
    }
    Ok(BigEndian::read_u32(&key[key.len() - 4..]) as i32)
}
