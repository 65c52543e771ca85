use std::sync::atomic::{AtomicUsize, Ordering};

// Default tuning values. Both can be changed at runtime for benchmarking.
const DEFAULT_LEAF_CAPACITY: usize = 4;
const DEFAULT_MIN_PARALLEL_LEN: usize = 64;

static LEAF_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_LEAF_CAPACITY);
static MIN_PARALLEL_LEN: AtomicUsize = AtomicUsize::new(DEFAULT_MIN_PARALLEL_LEN);

/// Maximum number of points stored in one leaf of an [`AabbTree`](crate::AabbTree).
pub fn leaf_capacity() -> usize {
    LEAF_CAPACITY.load(Ordering::Relaxed)
}

/// Set the leaf capacity used by trees built after this call. Clamped to at least 1.
pub fn set_leaf_capacity(val: usize) {
    LEAF_CAPACITY.store(val.max(1), Ordering::Relaxed);
}

/// Smallest number of points handed to one rayon task in per-point loops.
pub fn min_parallel_len() -> usize {
    MIN_PARALLEL_LEN.load(Ordering::Relaxed)
}

pub fn set_min_parallel_len(val: usize) {
    MIN_PARALLEL_LEN.store(val.max(1), Ordering::Relaxed);
}
