//! Process-wide BLAS thread-count state
//!
//! The underlying vendor BLAS thread setting is process-global. Tile
//! kernels must run single-threaded — the engine parallelizes across
//! tiles, not inside them — so every top-level driver call clamps the
//! count to one and restores the caller's setting on the way out, on every
//! exit path. A vendor BLAS binding would forward [`set_blas_thread_count`]
//! to its `*_set_num_threads` entry point.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};

static BLAS_THREADS: Lazy<AtomicUsize> = Lazy::new(|| {
    let n = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    AtomicUsize::new(n)
});

/// Current BLAS thread-count setting.
pub fn blas_thread_count() -> usize {
    BLAS_THREADS.load(Ordering::Acquire)
}

/// Set the BLAS thread count.
pub fn set_blas_thread_count(n: usize) {
    BLAS_THREADS.store(n.max(1), Ordering::Release);
}

/// Scoped clamp of the BLAS thread count to one.
///
/// Saves the current setting on construction and restores it on drop, so
/// error returns and panics inside a driver call cannot leak the clamp.
pub struct BlasThreadGuard {
    saved: usize,
}

impl BlasThreadGuard {
    /// Clamp to a single thread, remembering the previous setting.
    pub fn clamp_single() -> Self {
        let saved = BLAS_THREADS.swap(1, Ordering::AcqRel);
        Self { saved }
    }
}

impl Drop for BlasThreadGuard {
    fn drop(&mut self) {
        BLAS_THREADS.store(self.saved, Ordering::Release);
    }
}
