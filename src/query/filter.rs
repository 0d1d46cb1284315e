//! Typed predicates over document fields.
//!
//! A [`Filter`] is one tagged record: field name, field type, operation, and
//! payload. Field values resolve through a compiled accessor when one was
//! registered (the typed family) or by name through the codec (the dynamic
//! family); it is the same record either way. [`Filter::any_element`] mirrors a
//! filter over a collection-valued field: it matches when any element
//! satisfies the predicate and never claims index backing.
//!
//! Validation happens at construction, before any query runs: string-only
//! operations reject non-string fields, `Complex` fields reject everything,
//! and payload types must match the field type.

use std::cmp::Ordering;
use std::fmt;

use crate::document::{Document, FieldAccessor, JsonCodec};
use crate::keycodec;
use crate::types::{FieldType, Value};
use crate::{GdbxError, Result};

/// Filter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FilterOp {
    /// Equal to the payload value (null compares as a value).
    Equals,
    /// Not equal to the payload value.
    NotEquals,
    /// Strictly greater; never matches null.
    GreaterThan,
    /// Greater or equal; never matches null.
    GreaterThanOrEqual,
    /// Strictly less; never matches null.
    LessThan,
    /// Less or equal; never matches null.
    LessThanOrEqual,
    /// String starts with the payload.
    StartsWith,
    /// String ends with the payload.
    EndsWith,
    /// String contains the payload.
    Contains,
    /// Between two payload values, inclusive on both ends.
    Between,
    /// Equal to any of the payload values.
    In,
    /// Equal to none of the payload values.
    NotIn,
}

impl FilterOp {
    /// Planner priority: lower is better; `None` is never index-driven.
    pub fn index_priority(self) -> Option<u8> {
        match self {
            FilterOp::Equals => Some(1),
            FilterOp::In => Some(2),
            FilterOp::StartsWith => Some(3),
            FilterOp::Between => Some(4),
            FilterOp::GreaterThan
            | FilterOp::GreaterThanOrEqual
            | FilterOp::LessThan
            | FilterOp::LessThanOrEqual => Some(5),
            FilterOp::NotEquals | FilterOp::EndsWith | FilterOp::Contains | FilterOp::NotIn => None,
        }
    }

    /// Stable name used in plan descriptions.
    pub fn name(self) -> &'static str {
        match self {
            FilterOp::Equals => "Equals",
            FilterOp::NotEquals => "NotEquals",
            FilterOp::GreaterThan => "GreaterThan",
            FilterOp::GreaterThanOrEqual => "GreaterThanOrEqual",
            FilterOp::LessThan => "LessThan",
            FilterOp::LessThanOrEqual => "LessThanOrEqual",
            FilterOp::StartsWith => "StartsWith",
            FilterOp::EndsWith => "EndsWith",
            FilterOp::Contains => "Contains",
            FilterOp::Between => "Between",
            FilterOp::In => "In",
            FilterOp::NotIn => "NotIn",
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    One(Value),
    Range(Value, Value),
    Many(Vec<Value>),
}

/// One predicate over one field.
#[derive(Clone)]
pub struct Filter {
    /// Field name (dot-separated path).
    pub field_name: String,
    /// Type the field is compared as.
    pub field_type: FieldType,
    /// Whether the query layer found a usable index for this filter.
    pub is_indexed: bool,
    /// The operation.
    pub op: FilterOp,
    payload: Payload,
    collection: bool,
    accessor: Option<FieldAccessor>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("field_name", &self.field_name)
            .field("field_type", &self.field_type)
            .field("op", &self.op)
            .field("payload", &self.payload)
            .field("is_indexed", &self.is_indexed)
            .field("collection", &self.collection)
            .finish()
    }
}

fn check_payload(field: &str, ty: FieldType, v: &Value) -> Result<()> {
    if ty == FieldType::Complex {
        return Err(GdbxError::InvalidFilter(format!(
            "field '{}' is Complex and cannot be filtered",
            field
        )));
    }
    if v.is_null() {
        return Ok(());
    }
    match v.field_type() {
        Some(actual) if actual == ty => Ok(()),
        _ => Err(GdbxError::InvalidFilter(format!(
            "payload {:?} does not match field '{}' of type {:?}",
            v, field, ty
        ))),
    }
}

fn check_string_op(field: &str, ty: FieldType, op: FilterOp) -> Result<()> {
    if ty != FieldType::String {
        return Err(GdbxError::InvalidFilter(format!(
            "{} applies only to String fields, '{}' is {:?}",
            op.name(),
            field,
            ty
        )));
    }
    Ok(())
}

impl Filter {
    fn new(field: &str, ty: FieldType, op: FilterOp, payload: Payload) -> Filter {
        Filter {
            field_name: field.to_string(),
            field_type: ty,
            is_indexed: false,
            op,
            payload,
            collection: false,
            accessor: None,
        }
    }

    fn single(field: &str, ty: FieldType, op: FilterOp, value: Value) -> Result<Filter> {
        check_payload(field, ty, &value)?;
        Ok(Filter::new(field, ty, op, Payload::One(value)))
    }

    /// `field == value`.
    pub fn equals(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::Equals, value)
    }

    /// `field != value`.
    pub fn not_equals(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::NotEquals, value)
    }

    /// `field > value`.
    pub fn greater_than(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::GreaterThan, value)
    }

    /// `field >= value`.
    pub fn greater_than_or_equal(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::GreaterThanOrEqual, value)
    }

    /// `field < value`.
    pub fn less_than(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::LessThan, value)
    }

    /// `field <= value`.
    pub fn less_than_or_equal(field: &str, ty: FieldType, value: Value) -> Result<Filter> {
        Filter::single(field, ty, FilterOp::LessThanOrEqual, value)
    }

    /// String prefix match.
    pub fn starts_with(field: &str, ty: FieldType, prefix: &str) -> Result<Filter> {
        check_string_op(field, ty, FilterOp::StartsWith)?;
        Ok(Filter::new(
            field,
            ty,
            FilterOp::StartsWith,
            Payload::One(Value::Str(prefix.to_string())),
        ))
    }

    /// String suffix match.
    pub fn ends_with(field: &str, ty: FieldType, suffix: &str) -> Result<Filter> {
        check_string_op(field, ty, FilterOp::EndsWith)?;
        Ok(Filter::new(
            field,
            ty,
            FilterOp::EndsWith,
            Payload::One(Value::Str(suffix.to_string())),
        ))
    }

    /// Substring match.
    pub fn contains(field: &str, ty: FieldType, needle: &str) -> Result<Filter> {
        check_string_op(field, ty, FilterOp::Contains)?;
        Ok(Filter::new(
            field,
            ty,
            FilterOp::Contains,
            Payload::One(Value::Str(needle.to_string())),
        ))
    }

    /// `min <= field <= max`.
    pub fn between(field: &str, ty: FieldType, min: Value, max: Value) -> Result<Filter> {
        check_payload(field, ty, &min)?;
        check_payload(field, ty, &max)?;
        Ok(Filter::new(field, ty, FilterOp::Between, Payload::Range(min, max)))
    }

    /// `field` equals any of `values`.
    pub fn in_values(field: &str, ty: FieldType, values: Vec<Value>) -> Result<Filter> {
        if values.is_empty() {
            return Err(GdbxError::InvalidFilter(format!(
                "In over field '{}' requires at least one value",
                field
            )));
        }
        for v in &values {
            check_payload(field, ty, v)?;
        }
        Ok(Filter::new(field, ty, FilterOp::In, Payload::Many(values)))
    }

    /// `field` equals none of `values`.
    pub fn not_in(field: &str, ty: FieldType, values: Vec<Value>) -> Result<Filter> {
        for v in &values {
            check_payload(field, ty, v)?;
        }
        Ok(Filter::new(field, ty, FilterOp::NotIn, Payload::Many(values)))
    }

    /// Mirror this filter over a collection-valued field: it matches when
    /// any element satisfies the predicate. Collection filters are never
    /// index-backed.
    pub fn any_element(mut self) -> Filter {
        self.collection = true;
        self.is_indexed = false;
        self
    }

    /// Attach a compiled accessor (the typed filter family).
    pub fn with_accessor(
        mut self,
        accessor: impl Fn(&Document) -> Value + Send + Sync + 'static,
    ) -> Filter {
        self.accessor = Some(std::sync::Arc::new(accessor));
        self
    }

    /// True for the any-element mirror.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Mark whether the query layer found a usable index. Collection filters
    /// stay unindexed.
    pub(crate) fn mark_indexed(&mut self, indexed: bool) {
        self.is_indexed = indexed && !self.collection;
    }

    /// The payload value for single-payload operations.
    pub(crate) fn payload_value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::One(v) => Some(v),
            _ => None,
        }
    }

    /// The payload bounds for `Between`.
    pub(crate) fn payload_range(&self) -> Option<(&Value, &Value)> {
        match &self.payload {
            Payload::Range(lo, hi) => Some((lo, hi)),
            _ => None,
        }
    }

    /// The payload set for `In`/`NotIn`.
    pub(crate) fn payload_values(&self) -> Option<&[Value]> {
        match &self.payload {
            Payload::Many(vs) => Some(vs),
            _ => None,
        }
    }

    /// Resolve this filter's field from a document.
    fn resolve(&self, doc: &Document, codec: &dyn JsonCodec) -> Value {
        match &self.accessor {
            Some(accessor) => accessor(doc),
            None => codec.try_get_value(doc, &self.field_name, self.field_type),
        }
    }

    /// Evaluate against a document.
    pub fn evaluate(&self, doc: &Document, codec: &dyn JsonCodec) -> bool {
        let value = self.resolve(doc, codec);
        match (&value, self.collection) {
            (Value::Array(items), true) => items.iter().any(|v| self.matches_scalar(v)),
            (Value::Array(_), false) => false,
            (v, _) => self.matches_scalar(v),
        }
    }

    /// The scalar predicate shared by the plain and any-element forms.
    pub fn matches_scalar(&self, v: &Value) -> bool {
        match self.op {
            FilterOp::Equals => self.eq_payload(v),
            FilterOp::NotEquals => !self.eq_payload(v),
            FilterOp::GreaterThan => self.ordered(v, |o| o == Ordering::Greater),
            FilterOp::GreaterThanOrEqual => self.ordered(v, |o| o != Ordering::Less),
            FilterOp::LessThan => self.ordered(v, |o| o == Ordering::Less),
            FilterOp::LessThanOrEqual => self.ordered(v, |o| o != Ordering::Greater),
            FilterOp::StartsWith => self.str_op(v, |s, p| s.starts_with(p)),
            FilterOp::EndsWith => self.str_op(v, |s, p| s.ends_with(p)),
            FilterOp::Contains => self.str_op(v, |s, p| s.contains(p)),
            FilterOp::Between => {
                let (lo, hi) = match self.payload_range() {
                    Some(pair) => pair,
                    None => return false,
                };
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return false;
                }
                matches!(v.cmp_natural(lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(v.cmp_natural(hi), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOp::In => self
                .payload_values()
                .is_some_and(|vs| vs.iter().any(|p| values_equal(v, p))),
            FilterOp::NotIn => self
                .payload_values()
                .is_none_or(|vs| !vs.iter().any(|p| values_equal(v, p))),
        }
    }

    fn eq_payload(&self, v: &Value) -> bool {
        self.payload_value().is_some_and(|p| values_equal(v, p))
    }

    /// Ordered comparison with the single payload; null never matches.
    fn ordered(&self, v: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        let p = match self.payload_value() {
            Some(p) => p,
            None => return false,
        };
        if v.is_null() || p.is_null() {
            return false;
        }
        v.cmp_natural(p).is_some_and(accept)
    }

    fn str_op(&self, v: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
        let p = match self.payload_value() {
            Some(Value::Str(p)) => p,
            _ => return false,
        };
        match v {
            Value::Str(s) => test(s, p),
            _ => false,
        }
    }

    /// Low index key for planner-driven lookups, when this operation has
    /// one. `Equals` → the exact key; `StartsWith` → the prefix key;
    /// `Between`/`GTE` → the low bound; `GT` → just past the low bound;
    /// `LT`/`LTE` → the minimum non-null key.
    pub fn index_key_bytes(&self) -> Result<Option<Vec<u8>>> {
        let key = match self.op {
            FilterOp::Equals => match self.payload_value() {
                Some(v) => Some(keycodec::encode_key(v, self.field_type)?),
                None => None,
            },
            FilterOp::StartsWith => match self.payload_value() {
                Some(Value::Str(p)) => Some(keycodec::encode_string_prefix(p)),
                _ => None,
            },
            FilterOp::Between => match self.payload_range() {
                Some((lo, _)) => Some(keycodec::encode_key(lo, self.field_type)?),
                None => None,
            },
            FilterOp::GreaterThanOrEqual => match self.payload_value() {
                Some(v) => Some(keycodec::encode_key(v, self.field_type)?),
                None => None,
            },
            FilterOp::GreaterThan => match self.payload_value() {
                Some(v) => keycodec::upper_bound_for_prefix(&keycodec::encode_key(
                    v,
                    self.field_type,
                )?),
                None => None,
            },
            FilterOp::LessThan | FilterOp::LessThanOrEqual => {
                Some(keycodec::minimum_non_null_key())
            }
            _ => None,
        };
        Ok(key)
    }

    /// Exclusive high index key, when this operation bounds the scan above.
    /// `None` with an indexable operation means unbounded.
    pub fn index_key_end_bytes(&self) -> Result<Option<Vec<u8>>> {
        let end = match self.op {
            FilterOp::Equals => match self.payload_value() {
                Some(v) => {
                    keycodec::upper_bound_for_prefix(&keycodec::encode_key(v, self.field_type)?)
                }
                None => None,
            },
            FilterOp::StartsWith => match self.payload_value() {
                Some(Value::Str(p)) => keycodec::string_prefix_end(p),
                _ => None,
            },
            FilterOp::Between => match self.payload_range() {
                Some((_, hi)) => {
                    keycodec::upper_bound_for_prefix(&keycodec::encode_key(hi, self.field_type)?)
                }
                None => None,
            },
            FilterOp::LessThan => match self.payload_value() {
                Some(v) => Some(keycodec::encode_key(v, self.field_type)?),
                None => None,
            },
            FilterOp::LessThanOrEqual => match self.payload_value() {
                Some(v) => {
                    keycodec::upper_bound_for_prefix(&keycodec::encode_key(v, self.field_type)?)
                }
                None => None,
            },
            _ => None,
        };
        Ok(end)
    }

    /// All exact keys for `In`, preserving input order.
    pub fn all_index_key_bytes(&self) -> Result<Option<Vec<Vec<u8>>>> {
        if self.op != FilterOp::In {
            return Ok(None);
        }
        let values = match self.payload_values() {
            Some(vs) => vs,
            None => return Ok(None),
        };
        let mut keys = Vec::with_capacity(values.len());
        for v in values {
            keys.push(keycodec::encode_key(v, self.field_type)?);
        }
        Ok(Some(keys))
    }
}

/// Equality with null as a first-class value; incomparable types are not
/// equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => a.cmp_natural(b) == Some(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DefaultJsonCodec;
    use crate::types::Decimal;

    fn codec() -> DefaultJsonCodec {
        DefaultJsonCodec
    }

    fn doc(json: &str) -> Document {
        Document::parse(json).unwrap()
    }

    #[test]
    fn test_equals_and_not_equals() {
        let f = Filter::equals("age", FieldType::Int32, Value::Int32(36)).unwrap();
        assert!(f.evaluate(&doc(r#"{"age":36}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"age":35}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{}"#), &codec()));

        let nf = Filter::not_equals("age", FieldType::Int32, Value::Int32(36)).unwrap();
        assert!(!nf.evaluate(&doc(r#"{"age":36}"#), &codec()));
        assert!(nf.evaluate(&doc(r#"{"age":35}"#), &codec()));
        // A missing field is null, which differs from 36.
        assert!(nf.evaluate(&doc(r#"{}"#), &codec()));
    }

    #[test]
    fn test_null_payload_equals_matches_missing() {
        let f = Filter::equals("age", FieldType::Int32, Value::Null).unwrap();
        assert!(f.evaluate(&doc(r#"{}"#), &codec()));
        assert!(f.evaluate(&doc(r#"{"age":null}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"age":1}"#), &codec()));
    }

    #[test]
    fn test_ordered_comparisons_never_match_null() {
        for make in [
            Filter::greater_than,
            Filter::greater_than_or_equal,
            Filter::less_than,
            Filter::less_than_or_equal,
        ] {
            let f = make("age", FieldType::Int32, Value::Int32(10)).unwrap();
            assert!(!f.evaluate(&doc(r#"{}"#), &codec()), "{:?}", f.op);
            assert!(!f.evaluate(&doc(r#"{"age":null}"#), &codec()), "{:?}", f.op);
        }
        let gt = Filter::greater_than("age", FieldType::Int32, Value::Int32(10)).unwrap();
        assert!(gt.evaluate(&doc(r#"{"age":11}"#), &codec()));
        assert!(!gt.evaluate(&doc(r#"{"age":10}"#), &codec()));
        let lte = Filter::less_than_or_equal("age", FieldType::Int32, Value::Int32(10)).unwrap();
        assert!(lte.evaluate(&doc(r#"{"age":10}"#), &codec()));
        assert!(!lte.evaluate(&doc(r#"{"age":11}"#), &codec()));
    }

    #[test]
    fn test_between_inclusive_both_ends() {
        let f = Filter::between(
            "age",
            FieldType::Int32,
            Value::Int32(100),
            Value::Int32(300),
        )
        .unwrap();
        assert!(f.evaluate(&doc(r#"{"age":100}"#), &codec()));
        assert!(f.evaluate(&doc(r#"{"age":200}"#), &codec()));
        assert!(f.evaluate(&doc(r#"{"age":300}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"age":99}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"age":301}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{}"#), &codec()));
    }

    #[test]
    fn test_string_ops() {
        let sw = Filter::starts_with("name", FieldType::String, "Ali").unwrap();
        assert!(sw.evaluate(&doc(r#"{"name":"Alice"}"#), &codec()));
        assert!(!sw.evaluate(&doc(r#"{"name":"Bob"}"#), &codec()));
        let ew = Filter::ends_with("name", FieldType::String, "ce").unwrap();
        assert!(ew.evaluate(&doc(r#"{"name":"Alice"}"#), &codec()));
        let ct = Filter::contains("name", FieldType::String, "lic").unwrap();
        assert!(ct.evaluate(&doc(r#"{"name":"Alice"}"#), &codec()));
        assert!(!ct.evaluate(&doc(r#"{"name":"Bob"}"#), &codec()));
    }

    #[test]
    fn test_string_ops_reject_non_string_fields() {
        assert!(matches!(
            Filter::starts_with("age", FieldType::Int32, "1"),
            Err(GdbxError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::ends_with("age", FieldType::Int64, "1"),
            Err(GdbxError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::contains("age", FieldType::Double, "1"),
            Err(GdbxError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_payload_type_mismatch_rejected() {
        assert!(matches!(
            Filter::equals("age", FieldType::Int32, Value::Str("x".into())),
            Err(GdbxError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::equals("any", FieldType::Complex, Value::Int32(1)),
            Err(GdbxError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::in_values("age", FieldType::Int32, vec![]),
            Err(GdbxError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_in_and_not_in() {
        let f = Filter::in_values(
            "age",
            FieldType::Int32,
            vec![Value::Int32(1), Value::Int32(3), Value::Null],
        )
        .unwrap();
        assert!(f.evaluate(&doc(r#"{"age":3}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"age":2}"#), &codec()));
        assert!(f.evaluate(&doc(r#"{}"#), &codec())); // null in the list

        let nf = Filter::not_in("age", FieldType::Int32, vec![Value::Int32(1)]).unwrap();
        assert!(nf.evaluate(&doc(r#"{"age":2}"#), &codec()));
        assert!(!nf.evaluate(&doc(r#"{"age":1}"#), &codec()));
    }

    #[test]
    fn test_any_element_collection_filter() {
        let f = Filter::equals("tags", FieldType::String, Value::Str("red".into()))
            .unwrap()
            .any_element();
        assert!(f.evaluate(&doc(r#"{"tags":["blue","red"]}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"tags":["blue","green"]}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"tags":[]}"#), &codec()));
        // Scalar filters do not match array fields.
        let scalar = Filter::equals("tags", FieldType::String, Value::Str("red".into())).unwrap();
        assert!(!scalar.evaluate(&doc(r#"{"tags":["red"]}"#), &codec()));
    }

    #[test]
    fn test_collection_filter_never_indexed() {
        let mut f = Filter::equals("tags", FieldType::String, Value::Str("x".into()))
            .unwrap()
            .any_element();
        f.mark_indexed(true);
        assert!(!f.is_indexed);
    }

    #[test]
    fn test_compiled_accessor_path() {
        let f = Filter::equals("score", FieldType::Int32, Value::Int32(5))
            .unwrap()
            .with_accessor(|_doc| Value::Int32(5));
        assert!(f.evaluate(&doc(r#"{}"#), &codec()));
    }

    #[test]
    fn test_index_key_hints() {
        let eq = Filter::equals("age", FieldType::Int32, Value::Int32(7)).unwrap();
        let lo = eq.index_key_bytes().unwrap().unwrap();
        let hi = eq.index_key_end_bytes().unwrap().unwrap();
        assert_eq!(lo, keycodec::encode_key(&Value::Int32(7), FieldType::Int32).unwrap());
        assert!(lo < hi);

        let sw = Filter::starts_with("name", FieldType::String, "Ali").unwrap();
        assert_eq!(
            sw.index_key_bytes().unwrap().unwrap(),
            keycodec::encode_string_prefix("Ali")
        );
        assert_eq!(
            sw.index_key_end_bytes().unwrap().unwrap(),
            keycodec::string_prefix_end("Ali").unwrap()
        );

        let lt = Filter::less_than("age", FieldType::Int32, Value::Int32(7)).unwrap();
        assert_eq!(
            lt.index_key_bytes().unwrap().unwrap(),
            keycodec::minimum_non_null_key()
        );

        let inf = Filter::in_values(
            "age",
            FieldType::Int32,
            vec![Value::Int32(9), Value::Int32(2)],
        )
        .unwrap();
        let keys = inf.all_index_key_bytes().unwrap().unwrap();
        assert_eq!(keys.len(), 2);
        // Input order is preserved, not key order.
        assert!(keys[0] > keys[1]);

        let ne = Filter::not_equals("age", FieldType::Int32, Value::Int32(7)).unwrap();
        assert!(ne.index_key_bytes().unwrap().is_none());
        assert!(ne.all_index_key_bytes().unwrap().is_none());
    }

    #[test]
    fn test_decimal_filter() {
        let f = Filter::greater_than(
            "price",
            FieldType::Decimal,
            Value::Decimal(Decimal::parse("10.50").unwrap()),
        )
        .unwrap();
        assert!(f.evaluate(&doc(r#"{"price":"10.51"}"#), &codec()));
        assert!(!f.evaluate(&doc(r#"{"price":"10.50"}"#), &codec()));
    }
}
