//! Tile kernels and their target adapters
//!
//! The math lives in `blas` and `factor`: reference per-tile kernels
//! (gemm, trsm, getrf without pivoting, potrf) generic over the engine's
//! scalar types. The `adapters` module wraps them in the uniform
//! `kernel(inputs.., target)` shape the drivers consume: residency on the
//! target device, batched/nested execution variants, and origin/modified
//! bookkeeping on outputs. `threads` holds the process-wide BLAS
//! thread-count state the drivers clamp around every top-level call.

pub mod adapters;
pub mod blas;
pub mod factor;
pub mod threads;

pub use adapters::KernelExec;
pub use blas::{gemm, trsm, Side};
pub use factor::{getrf_nopiv, potrf};
pub use threads::{blas_thread_count, set_blas_thread_count, BlasThreadGuard};
