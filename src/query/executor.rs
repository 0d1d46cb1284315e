//! Plan execution.
//!
//! The executor resolves candidate DocIds through the primary tree or a
//! secondary index, fetches payloads from the heap, applies residual
//! filters, then orders and paginates. Without order-by terms it streams
//! with an early exit once the limit fills; with ordering it collects the
//! matching set first, sorts (null-last ascending, null-first descending,
//! DocId breaking ties), then applies skip/limit. `count` skips payload
//! fetches entirely when no residual filters remain.
//!
//! The async variants share the candidate and finalize helpers and differ
//! only in the drive loop, which yields between candidate documents and
//! between index pages and honors a [`CancelToken`] at those points.

use crate::document::{Document, JsonCodec};
use crate::keycodec;
use crate::query::filter::{Filter, FilterOp};
use crate::query::planner::QueryPlan;
use crate::query::{OrderBy, QueryOptions};
use crate::storage::btree::{BTree, RangeCursor};
use crate::storage::catalog::CollectionEntry;
use crate::storage::heap;
use crate::storage::{DocumentLocation, PageRead};
use crate::{GdbxError, Result};

use std::cmp::Ordering;

/// Decode the DocId from a primary-tree key (sign-biased big-endian).
fn doc_id_from_primary_key(key: &[u8]) -> Result<i32> {
    if key.len() != 4 {
        return Err(GdbxError::FileCorrupt(format!(
            "primary key of {} bytes",
            key.len()
        )));
    }
    let raw = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    Ok((raw ^ 0x8000_0000) as i32)
}

/// Candidate (DocId, location) stream for one plan.
enum Source {
    /// Primary-tree cursor; DocIds decode from the keys.
    Primary(RangeCursor),
    /// One secondary-index cursor; DocIds decode from the key suffix.
    Index(RangeCursor),
    /// Per-value index lookups for `In`, concatenated in input order.
    IndexMulti {
        tree: BTree,
        ranges: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        at: usize,
        current: Option<RangeCursor>,
    },
}

impl Source {
    fn next<S: PageRead + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<Option<(i32, DocumentLocation)>> {
        match self {
            Source::Primary(cursor) => match cursor.next(store)? {
                None => Ok(None),
                Some((key, loc)) => Ok(Some((doc_id_from_primary_key(&key)?, loc))),
            },
            Source::Index(cursor) => match cursor.next(store)? {
                None => Ok(None),
                Some((key, loc)) => Ok(Some((keycodec::doc_id_from_suffix(&key)?, loc))),
            },
            Source::IndexMulti {
                tree,
                ranges,
                at,
                current,
            } => loop {
                if let Some(cursor) = current {
                    if let Some((key, loc)) = cursor.next(store)? {
                        return Ok(Some((keycodec::doc_id_from_suffix(&key)?, loc)));
                    }
                    *current = None;
                }
                if *at >= ranges.len() {
                    return Ok(None);
                }
                let (lo, hi) = ranges[*at].clone();
                *at += 1;
                *current = Some(tree.range(store, Some(&lo), true, hi, false)?);
            },
        }
    }
}

/// Build the candidate source for a plan. Also reports which filter the
/// source fully answers, if any; the rest are applied residually.
fn open_source<S: PageRead + ?Sized>(
    store: &mut S,
    entry: &CollectionEntry,
    filters: &[Filter],
    plan: &QueryPlan,
) -> Result<(Source, Option<usize>)> {
    let primary = BTree {
        root: entry.primary_root,
    };
    match plan {
        QueryPlan::FullScan => Ok((
            Source::Primary(primary.range(store, None, true, None, true)?),
            None,
        )),
        QueryPlan::PrimaryKeyRange {
            lo,
            hi,
            inc_lo,
            inc_hi,
            consumed,
        } => {
            let lo_key = keycodec::doc_id_key(*lo);
            let hi_key = keycodec::doc_id_key(*hi);
            Ok((
                Source::Primary(primary.range(
                    store,
                    Some(&lo_key),
                    *inc_lo,
                    Some(hi_key.to_vec()),
                    *inc_hi,
                )?),
                Some(*consumed),
            ))
        }
        QueryPlan::SecondaryIndex {
            index_name,
            consumed,
            ..
        } => {
            let index = entry.index(index_name).ok_or_else(|| {
                GdbxError::InvalidFilter(format!("unknown index '{}'", index_name))
            })?;
            let tree = BTree {
                root: index.root_page_id,
            };
            let filter = &filters[*consumed];
            if filter.op == FilterOp::In {
                let keys = filter.all_index_key_bytes()?.unwrap_or_default();
                let ranges = keys
                    .into_iter()
                    .map(|k| {
                        let hi = keycodec::upper_bound_for_prefix(&k);
                        (k, hi)
                    })
                    .collect();
                return Ok((
                    Source::IndexMulti {
                        tree,
                        ranges,
                        at: 0,
                        current: None,
                    },
                    Some(*consumed),
                ));
            }
            match filter.index_key_bytes()? {
                Some(lo) => {
                    let hi = filter.index_key_end_bytes()?;
                    Ok((
                        Source::Index(tree.range(store, Some(&lo), true, hi, false)?),
                        Some(*consumed),
                    ))
                }
                // No usable key hint: scan the index entirely and keep the
                // filter residual.
                None => Ok((
                    Source::Index(tree.range(store, None, true, None, true)?),
                    None,
                )),
            }
        }
    }
}

/// Indices of the filters the source did not answer.
fn residual_indices(filters: &[Filter], consumed: Option<usize>) -> Vec<usize> {
    (0..filters.len())
        .filter(|i| Some(*i) != consumed)
        .collect()
}

/// Fetch and residually filter one candidate.
fn admit_candidate<S: PageRead + ?Sized>(
    store: &mut S,
    codec: &dyn JsonCodec,
    filters: &[Filter],
    residual: &[usize],
    doc_id: i32,
    loc: DocumentLocation,
) -> Result<Option<(i32, Document)>> {
    let bytes = heap::get(store, loc)?;
    let doc = codec.deserialize(&bytes)?;
    for &i in residual {
        if !filters[i].evaluate(&doc, codec) {
            return Ok(None);
        }
    }
    Ok(Some((doc_id, doc)))
}

fn order_cmp(
    codec: &dyn JsonCodec,
    order_by: &[OrderBy],
    a: &(i32, Document),
    b: &(i32, Document),
) -> Ordering {
    for term in order_by {
        let av = codec.try_get_value(&a.1, &term.field, term.field_type);
        let bv = codec.try_get_value(&b.1, &term.field, term.field_type);
        let cmp = match (av.is_null(), bv.is_null()) {
            // Null sorts last ascending, first descending.
            (true, true) => Ordering::Equal,
            (true, false) => {
                if term.descending {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if term.descending {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => match av.cmp_natural(&bv) {
                Some(c) => {
                    if term.descending {
                        c.reverse()
                    } else {
                        c
                    }
                }
                None => Ordering::Equal,
            },
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.0.cmp(&b.0)
}

/// Sort (if ordered) and paginate a collected result set.
fn finalize(
    codec: &dyn JsonCodec,
    opts: &QueryOptions,
    mut results: Vec<(i32, Document)>,
) -> Vec<(i32, Document)> {
    if !opts.order_by.is_empty() {
        results.sort_by(|a, b| order_cmp(codec, &opts.order_by, a, b));
    }
    let skipped = results.into_iter().skip(opts.skip);
    match opts.limit {
        Some(limit) => skipped.take(limit).collect(),
        None => skipped.collect(),
    }
}

/// Run a plan to completion.
pub fn execute<S: PageRead + ?Sized>(
    store: &mut S,
    codec: &dyn JsonCodec,
    entry: &CollectionEntry,
    filters: &[Filter],
    plan: &QueryPlan,
    opts: &QueryOptions,
) -> Result<Vec<(i32, Document)>> {
    let (mut source, consumed) = open_source(store, entry, filters, plan)?;
    let residual = residual_indices(filters, consumed);
    let streaming = opts.order_by.is_empty();
    let mut results = Vec::new();
    let mut skipped = 0usize;

    while let Some((doc_id, loc)) = source.next(store)? {
        let admitted = admit_candidate(store, codec, filters, &residual, doc_id, loc)?;
        let Some(hit) = admitted else { continue };
        if streaming {
            if skipped < opts.skip {
                skipped += 1;
                continue;
            }
            results.push(hit);
            if opts.limit.is_some_and(|l| results.len() >= l) {
                return Ok(results);
            }
        } else {
            results.push(hit);
        }
    }

    if streaming {
        Ok(results)
    } else {
        Ok(finalize(codec, opts, results))
    }
}

/// Count matches. Skips payload fetches when no residual filters remain.
pub fn count<S: PageRead + ?Sized>(
    store: &mut S,
    codec: &dyn JsonCodec,
    entry: &CollectionEntry,
    filters: &[Filter],
    plan: &QueryPlan,
) -> Result<usize> {
    let (mut source, consumed) = open_source(store, entry, filters, plan)?;
    let residual = residual_indices(filters, consumed);
    let mut n = 0usize;
    while let Some((doc_id, loc)) = source.next(store)? {
        if residual.is_empty() {
            n += 1;
            continue;
        }
        if admit_candidate(store, codec, filters, &residual, doc_id, loc)?.is_some() {
            n += 1;
        }
    }
    Ok(n)
}

/// Cooperative variants, compiled with the `async` feature.
#[cfg(feature = "async")]
mod cooperative {
    use super::*;
    use crate::query::CancelToken;

    /// How many candidates are processed between yields.
    const YIELD_EVERY: usize = 16;

    /// Run a plan, yielding between candidate documents and honoring the
    /// cancellation token at every suspension point.
    pub async fn execute_async<S: PageRead + ?Sized>(
        store: &mut S,
        codec: &dyn JsonCodec,
        entry: &CollectionEntry,
        filters: &[Filter],
        plan: &QueryPlan,
        opts: &QueryOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<(i32, Document)>> {
        let (mut source, consumed) = open_source(store, entry, filters, plan)?;
        let residual = residual_indices(filters, consumed);
        let streaming = opts.order_by.is_empty();
        let mut results = Vec::new();
        let mut skipped = 0usize;
        let mut seen = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(GdbxError::Cancelled);
            }
            let Some((doc_id, loc)) = source.next(store)? else {
                break;
            };
            seen += 1;
            if seen % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
                if cancel.is_cancelled() {
                    return Err(GdbxError::Cancelled);
                }
            }
            let admitted = admit_candidate(store, codec, filters, &residual, doc_id, loc)?;
            let Some(hit) = admitted else { continue };
            if streaming {
                if skipped < opts.skip {
                    skipped += 1;
                    continue;
                }
                results.push(hit);
                if opts.limit.is_some_and(|l| results.len() >= l) {
                    return Ok(results);
                }
            } else {
                results.push(hit);
            }
        }

        if streaming {
            Ok(results)
        } else {
            Ok(finalize(codec, opts, results))
        }
    }

    /// Count matches cooperatively.
    pub async fn count_async<S: PageRead + ?Sized>(
        store: &mut S,
        codec: &dyn JsonCodec,
        entry: &CollectionEntry,
        filters: &[Filter],
        plan: &QueryPlan,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let (mut source, consumed) = open_source(store, entry, filters, plan)?;
        let residual = residual_indices(filters, consumed);
        let mut n = 0usize;
        let mut seen = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(GdbxError::Cancelled);
            }
            let Some((doc_id, loc)) = source.next(store)? else {
                break;
            };
            seen += 1;
            if seen % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            if residual.is_empty()
                || admit_candidate(store, codec, filters, &residual, doc_id, loc)?.is_some()
            {
                n += 1;
            }
        }
        Ok(n)
    }
}

#[cfg(feature = "async")]
pub use cooperative::{count_async, execute_async};
