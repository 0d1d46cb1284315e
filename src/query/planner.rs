//! Query planning.
//!
//! Strategy selection is a two-pass scan over the ordered filter list:
//! first a usable predicate on the primary-key field (`Id`) wins outright,
//! mapped to a DocId range; otherwise the best index-backed filter is
//! chosen by operation priority (equality first, ranges last), position
//! breaking ties; otherwise the query full-scans the primary tree.

use serde::Serialize;

use crate::document::ID_FIELD;
use crate::query::filter::{Filter, FilterOp};
use crate::storage::catalog::CollectionEntry;
use crate::types::Value;

/// The strategy the executor will run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryPlan {
    /// Walk the whole primary tree, evaluating every filter.
    FullScan,
    /// Walk a DocId range on the primary tree.
    PrimaryKeyRange {
        /// Low DocId bound.
        lo: i32,
        /// High DocId bound.
        hi: i32,
        /// Whether `lo` itself is included.
        inc_lo: bool,
        /// Whether `hi` itself is included.
        inc_hi: bool,
        /// Position of the filter the range consumed.
        consumed: usize,
    },
    /// Drive one secondary index from a filter's key hints.
    SecondaryIndex {
        /// Name of the chosen index.
        index_name: String,
        /// The driving operation (for plan descriptions).
        op: FilterOp,
        /// Position of the consumed filter.
        consumed: usize,
    },
}

impl QueryPlan {
    /// Stable one-line description, e.g. `SecondaryIndex/Between`.
    pub fn describe(&self) -> String {
        match self {
            QueryPlan::FullScan => "FullScan".to_string(),
            QueryPlan::PrimaryKeyRange { .. } => "PrimaryKeyRange".to_string(),
            QueryPlan::SecondaryIndex { op, .. } => format!("SecondaryIndex/{}", op.name()),
        }
    }

    /// Position of the filter the plan consumed, if any.
    pub fn consumed(&self) -> Option<usize> {
        match self {
            QueryPlan::FullScan => None,
            QueryPlan::PrimaryKeyRange { consumed, .. }
            | QueryPlan::SecondaryIndex { consumed, .. } => Some(*consumed),
        }
    }
}

fn id_payload(v: &Value) -> Option<i32> {
    match v {
        Value::Int32(n) => Some(*n),
        _ => None,
    }
}

/// Map a primary-key filter to a DocId range, when its operation allows.
fn primary_range(filter: &Filter, position: usize) -> Option<QueryPlan> {
    let plan = |lo, hi, inc_lo, inc_hi| QueryPlan::PrimaryKeyRange {
        lo,
        hi,
        inc_lo,
        inc_hi,
        consumed: position,
    };
    match filter.op {
        FilterOp::Equals => {
            let v = id_payload(filter.payload_value()?)?;
            Some(plan(v, v, true, true))
        }
        FilterOp::GreaterThan => {
            let v = id_payload(filter.payload_value()?)?;
            Some(plan(v, i32::MAX, false, true))
        }
        FilterOp::GreaterThanOrEqual => {
            let v = id_payload(filter.payload_value()?)?;
            Some(plan(v, i32::MAX, true, true))
        }
        FilterOp::LessThan => {
            let v = id_payload(filter.payload_value()?)?;
            Some(plan(i32::MIN, v, true, false))
        }
        FilterOp::LessThanOrEqual => {
            let v = id_payload(filter.payload_value()?)?;
            Some(plan(i32::MIN, v, true, true))
        }
        FilterOp::Between => {
            let (lo, hi) = filter.payload_range()?;
            Some(plan(id_payload(lo)?, id_payload(hi)?, true, true))
        }
        _ => None,
    }
}

/// Choose the strategy for an ordered filter list against a collection.
pub fn plan(filters: &[Filter], entry: &CollectionEntry) -> QueryPlan {
    // The first usable primary-key filter wins.
    for (i, filter) in filters.iter().enumerate() {
        if filter.field_name != ID_FIELD || filter.is_collection() {
            continue;
        }
        if let Some(plan) = primary_range(filter, i) {
            return plan;
        }
    }

    // Best indexed filter by (priority, position).
    let mut best: Option<(u8, usize, String, FilterOp)> = None;
    for (i, filter) in filters.iter().enumerate() {
        if !filter.is_indexed {
            continue;
        }
        let priority = match filter.op.index_priority() {
            Some(p) => p,
            None => continue,
        };
        // Decimal keys order exactly only within one scale, so equality
        // lookups are safe but range scans are not.
        if filter.field_type == crate::types::FieldType::Decimal && priority > 2 {
            continue;
        }
        let index = match entry.index_on_field(&filter.field_name) {
            Some(ix) => ix,
            None => continue,
        };
        let better = match &best {
            None => true,
            Some((bp, bi, _, _)) => priority < *bp || (priority == *bp && i < *bi),
        };
        if better {
            best = Some((priority, i, index.name.clone(), filter.op));
        }
    }
    match best {
        Some((_, consumed, index_name, op)) => QueryPlan::SecondaryIndex {
            index_name,
            op,
            consumed,
        },
        None => QueryPlan::FullScan,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::catalog::IndexDefinition;
    use crate::types::FieldType;

    fn entry() -> CollectionEntry {
        CollectionEntry {
            name: "users".into(),
            primary_root: 1,
            next_doc_id: 1,
            indexes: vec![
                IndexDefinition {
                    name: "age".into(),
                    fields: vec![("age".into(), FieldType::Int32)],
                    is_unique: false,
                    is_compound: false,
                    root_page_id: 2,
                },
                IndexDefinition {
                    name: "name".into(),
                    fields: vec![("name".into(), FieldType::String)],
                    is_unique: false,
                    is_compound: false,
                    root_page_id: 3,
                },
            ],
        }
    }

    fn indexed(mut f: Filter) -> Filter {
        f.mark_indexed(true);
        f
    }

    #[test]
    fn test_no_filters_full_scan() {
        let p = plan(&[], &entry());
        assert_eq!(p, QueryPlan::FullScan);
        assert_eq!(p.describe(), "FullScan");
    }

    #[test]
    fn test_primary_key_ops_map_to_ranges() {
        let cases: Vec<(Filter, (i32, i32, bool, bool))> = vec![
            (
                Filter::equals(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
                (5, 5, true, true),
            ),
            (
                Filter::greater_than(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
                (5, i32::MAX, false, true),
            ),
            (
                Filter::greater_than_or_equal(ID_FIELD, FieldType::Int32, Value::Int32(5))
                    .unwrap(),
                (5, i32::MAX, true, true),
            ),
            (
                Filter::less_than(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
                (i32::MIN, 5, true, false),
            ),
            (
                Filter::less_than_or_equal(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
                (i32::MIN, 5, true, true),
            ),
            (
                Filter::between(
                    ID_FIELD,
                    FieldType::Int32,
                    Value::Int32(10),
                    Value::Int32(12),
                )
                .unwrap(),
                (10, 12, true, true),
            ),
        ];
        for (f, (lo, hi, inc_lo, inc_hi)) in cases {
            let op = f.op;
            match plan(&[f], &entry()) {
                QueryPlan::PrimaryKeyRange {
                    lo: l,
                    hi: h,
                    inc_lo: il,
                    inc_hi: ih,
                    consumed,
                } => {
                    assert_eq!((l, h, il, ih), (lo, hi, inc_lo, inc_hi), "{:?}", op);
                    assert_eq!(consumed, 0);
                }
                other => panic!("{:?} planned {:?}", op, other),
            }
        }
    }

    #[test]
    fn test_primary_key_beats_secondary() {
        let filters = vec![
            indexed(Filter::equals("age", FieldType::Int32, Value::Int32(30)).unwrap()),
            Filter::equals(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
        ];
        assert!(matches!(
            plan(&filters, &entry()),
            QueryPlan::PrimaryKeyRange { consumed: 1, .. }
        ));
    }

    #[test]
    fn test_unusable_primary_op_falls_through() {
        let filters = vec![
            Filter::not_equals(ID_FIELD, FieldType::Int32, Value::Int32(5)).unwrap(),
            indexed(Filter::equals("age", FieldType::Int32, Value::Int32(30)).unwrap()),
        ];
        match plan(&filters, &entry()) {
            QueryPlan::SecondaryIndex {
                index_name,
                consumed,
                ..
            } => {
                assert_eq!(index_name, "age");
                assert_eq!(consumed, 1);
            }
            other => panic!("planned {:?}", other),
        }
    }

    #[test]
    fn test_priority_table_prefers_equality() {
        let filters = vec![
            indexed(
                Filter::between("age", FieldType::Int32, Value::Int32(1), Value::Int32(9))
                    .unwrap(),
            ),
            indexed(Filter::equals("name", FieldType::String, Value::Str("x".into())).unwrap()),
        ];
        match plan(&filters, &entry()) {
            QueryPlan::SecondaryIndex {
                index_name, op, ..
            } => {
                assert_eq!(index_name, "name");
                assert_eq!(op, FilterOp::Equals);
            }
            other => panic!("planned {:?}", other),
        }
    }

    #[test]
    fn test_position_breaks_priority_ties() {
        let filters = vec![
            indexed(Filter::equals("name", FieldType::String, Value::Str("x".into())).unwrap()),
            indexed(Filter::equals("age", FieldType::Int32, Value::Int32(1)).unwrap()),
        ];
        match plan(&filters, &entry()) {
            QueryPlan::SecondaryIndex { consumed, .. } => assert_eq!(consumed, 0),
            other => panic!("planned {:?}", other),
        }
    }

    #[test]
    fn test_never_indexed_ops_full_scan() {
        let filters = vec![
            indexed(Filter::not_equals("age", FieldType::Int32, Value::Int32(1)).unwrap()),
            indexed(Filter::ends_with("name", FieldType::String, "x").unwrap()),
            indexed(Filter::contains("name", FieldType::String, "x").unwrap()),
            indexed(Filter::not_in("age", FieldType::Int32, vec![Value::Int32(1)]).unwrap()),
        ];
        assert_eq!(plan(&filters, &entry()), QueryPlan::FullScan);
    }

    #[test]
    fn test_unindexed_filter_full_scans() {
        // Indexable op, but the filter was not marked indexed.
        let filters =
            vec![Filter::equals("age", FieldType::Int32, Value::Int32(1)).unwrap()];
        assert_eq!(plan(&filters, &entry()), QueryPlan::FullScan);
    }

    #[test]
    fn test_decimal_ranges_never_drive_an_index() {
        use crate::types::Decimal;
        let mut e = entry();
        e.indexes.push(IndexDefinition {
            name: "price".into(),
            fields: vec![("price".into(), FieldType::Decimal)],
            is_unique: false,
            is_compound: false,
            root_page_id: 4,
        });
        let d = |s: &str| Value::Decimal(Decimal::parse(s).unwrap());
        let between = vec![indexed(
            Filter::between("price", FieldType::Decimal, d("1.5"), d("20")).unwrap(),
        )];
        assert_eq!(plan(&between, &e), QueryPlan::FullScan);
        let gt = vec![indexed(
            Filter::greater_than("price", FieldType::Decimal, d("1.5")).unwrap(),
        )];
        assert_eq!(plan(&gt, &e), QueryPlan::FullScan);
        // Equality is scale-exact and stays index-driven.
        let eq = vec![indexed(
            Filter::equals("price", FieldType::Decimal, d("1.5")).unwrap(),
        )];
        assert!(matches!(plan(&eq, &e), QueryPlan::SecondaryIndex { .. }));
    }

    #[test]
    fn test_describe_includes_driving_op() {
        let filters = vec![indexed(
            Filter::between("age", FieldType::Int32, Value::Int32(1), Value::Int32(2)).unwrap(),
        )];
        assert_eq!(plan(&filters, &entry()).describe(), "SecondaryIndex/Between");
    }
}
