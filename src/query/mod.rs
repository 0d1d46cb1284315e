//! Filters, planning, and execution.
//!
//! A query is an ordered list of [`filter::Filter`]s plus ordering and
//! pagination options. The [`planner`] picks a strategy (full scan, primary
//! key range, or one secondary index) and the [`executor`] runs it, applying
//! the remaining filters residually.

pub mod executor;
pub mod filter;
pub mod planner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::FieldType;

/// Cooperative cancellation signal for the async executor variants.
///
/// Cancellation is observed between candidate documents and between index
/// pages; an in-flight write transaction that observes it aborts with no
/// partial state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that never fires unless [`cancel`](CancelToken::cancel)ed.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One order-by term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// Field to order on (dot-separated path).
    pub field: String,
    /// Type the field is compared as.
    pub field_type: FieldType,
    /// Descending instead of ascending.
    pub descending: bool,
}

/// Ordering and pagination options for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Order-by terms, applied in sequence; ties break by DocId.
    pub order_by: Vec<OrderBy>,
    /// Candidates to skip after filtering (and ordering, if any).
    pub skip: usize,
    /// Maximum results to return.
    pub limit: Option<usize>,
}
