//! Batch planning under the remote API's per-call ceiling.

use crate::types::MAX_BATCH_SIZE;

/// Clamp a requested batch size into `1..=MAX_BATCH_SIZE`.
pub fn effective_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_SIZE)
}

/// Split `items` into consecutive batches of at most
/// `effective_batch_size(batch_size)` elements.
pub fn plan_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(effective_batch_size(batch_size))
        .map(|chunk| chunk.to_vec())
        .collect()
}
