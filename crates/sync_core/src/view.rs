use std::collections::BTreeMap;

use shared::domain::{StatusBucket, StatusKeyed};

/// Narrows a materialized list without reordering it. Projection never
/// mutates the source, and projecting an already projected list again with
/// the same predicate returns the same list.
pub fn project<R: Clone>(records: &[R], predicate: impl Fn(&R) -> bool) -> Vec<R> {
    records
        .iter()
        .filter(|record| predicate(record))
        .cloned()
        .collect()
}

/// Splits records into the recognized status buckets. Every bucket is
/// present in the result even when empty; records with an unrecognized
/// status appear in no bucket.
pub fn group_by_status<R: StatusKeyed + Clone>(records: &[R]) -> BTreeMap<StatusBucket, Vec<R>> {
    let mut buckets: BTreeMap<StatusBucket, Vec<R>> = BTreeMap::new();
    for bucket in StatusBucket::ALL {
        buckets.insert(bucket, Vec::new());
    }
    for record in records {
        if let Some(bucket) = StatusBucket::from_status(record.status()) {
            buckets.entry(bucket).or_default().push(record.clone());
        }
    }
    buckets
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
