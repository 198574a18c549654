//! Canonical form for order-insensitive comparison.
//!
//! Collections are sorted with a per-collection key extractor and then
//! encoded as JSON; two values are equivalent when their encodings are
//! byte-identical. Sort keys follow the backend's natural identity:
//!
//! - metric usages by `(metric, increment)`
//! - operations by `(method, metric count)`
//! - endpoints by `(path, operation count)`
//! - limits by `(metric, max)`
//! - plans by `(name, limit count)`
//!
//! Ties on the key fall back to the element's own canonical encoding, so
//! the order is total and the result does not depend on input order.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Endpoint, Endpoints, OperationId, Plan, Plans};

/// A value that can be put into canonical order.
pub trait Canonical: Serialize + Clone {
    /// Sort every nested collection into canonical order, innermost first.
    fn canonicalize(&mut self);

    /// Return a canonicalized copy.
    #[must_use]
    fn canonicalized(&self) -> Self {
        let mut copy = self.clone();
        copy.canonicalize();
        copy
    }
}

/// Sort `items` by `key`, breaking ties with each item's JSON encoding.
///
/// Items must already be canonical themselves so their encodings are stable.
pub fn sort_canonical<T, K, F>(items: &mut [T], key: F)
where
    T: Serialize,
    K: Ord,
    F: Fn(&T) -> K,
{
    // Encoding of these types cannot fail; an empty tie-break would only
    // leave equal-key items in their input order.
    items.sort_by_cached_key(|item| (key(item), serde_json::to_vec(item).unwrap_or_default()));
}

impl Canonical for OperationId {
    fn canonicalize(&mut self) {
        sort_canonical(&mut self.metrics, |m| (m.metric.clone(), m.increment));
    }
}

impl Canonical for Endpoint {
    fn canonicalize(&mut self) {
        self.operations.iter_mut().for_each(Canonical::canonicalize);
        sort_canonical(&mut self.operations, |op| (op.method.clone(), op.metrics.len()));
    }
}

impl Canonical for Endpoints {
    fn canonicalize(&mut self) {
        self.endpoints.iter_mut().for_each(Canonical::canonicalize);
        sort_canonical(&mut self.endpoints, |ep| (ep.path.clone(), ep.operations.len()));
    }
}

impl Canonical for Plan {
    fn canonicalize(&mut self) {
        sort_canonical(&mut self.limits, |limit| (limit.metric.clone(), limit.max));
    }
}

impl Canonical for Plans {
    fn canonicalize(&mut self) {
        self.plans.iter_mut().for_each(Canonical::canonicalize);
        sort_canonical(&mut self.plans, |plan| (plan.name.clone(), plan.limits.len()));
    }
}

/// Encode the canonical form of `value`.
pub fn canonical_form<T: Canonical>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&value.canonicalized()).map_err(|e| Error::json_encode_failed(e.to_string()))
}

/// Check whether two values have the same canonical form.
///
/// A value that cannot be encoded is never equivalent to anything.
pub fn equivalent<T: Canonical>(a: &T, b: &T) -> bool {
    match (canonical_form(a), canonical_form(b)) {
        (Ok(a), Ok(b)) => a == b,
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Canonical encoding failed");
            false
        }
    }
}
