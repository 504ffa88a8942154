//! Target-dispatched kernel adapters
//!
//! Drivers never call the tile kernels directly. Adapters give every
//! kernel the same shape — tile coordinates in, target-dependent execution
//! — and enforce the residency contract: inputs and outputs are pulled to
//! the target's memory space before the kernel runs, outputs are marked
//! modified there and the origin moves to the target.
//!
//! Four variants:
//! - `HostTask`: sequential host execution;
//! - `HostNest`: nested parallelism over the tile list through a rayon
//!   pool capped at the driver's panel-thread limit;
//! - `HostBatch`: arguments marshaled through the matrix's preallocated
//!   batch arrays, then executed as one host batch;
//! - `Devices`: batch round-robined over the configured device arenas.

use crate::blas::{self, Side};
use crate::factor;
use mosaic_core::{Error, PivotVector, Result, Scalar, Target};
use mosaic_matrix::{DiagKind, Matrix, Op, TileRef, Uplo};
use mosaic_tile::DeviceId;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::trace;

/// Execution context for kernel adapters: the target plus the nested
/// thread pool used by `HostNest`.
#[derive(Clone)]
pub struct KernelExec {
    target: Target,
    nest: Option<Arc<rayon::ThreadPool>>,
}

impl KernelExec {
    /// Context without nested parallelism (the pool is only built for
    /// `HostNest`).
    pub fn new(target: Target) -> Self {
        Self { target, nest: None }
    }

    /// Context with a dedicated pool of `threads` workers for nested
    /// parallelism. Only `HostNest` uses the pool.
    pub fn with_panel_threads(target: Target, threads: usize) -> Result<Self> {
        let nest = if target == Target::HostNest {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads.max(1))
                .thread_name(|i| format!("mosaic-nest-{}", i))
                .build()
                .map_err(|e| Error::internal(format!("nested pool build failed: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self { target, nest })
    }

    /// The execution target.
    pub fn target(&self) -> Target {
        self.target
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.nest {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

fn device_for<S: Scalar>(m: &Matrix<S>, target: Target, slot: usize) -> Result<DeviceId> {
    match target {
        Target::HostTask | Target::HostNest | Target::HostBatch => Ok(DeviceId::HOST),
        Target::Devices => {
            let n = m.num_devices();
            if n == 0 {
                return Err(Error::invalid_argument(
                    "Devices target requested but no device arenas are configured".to_string(),
                ));
            }
            Ok(DeviceId::device(slot % n))
        }
    }
}

fn resolve<S: Scalar>(m: &Matrix<S>, i: usize, j: usize, dev: DeviceId) -> Result<TileRef<S>> {
    if dev.is_host() {
        m.tile(i, j)
    } else {
        m.tile_on(i, j, dev)
    }
}

/// Factor diagonal tile (k, k) in place with inner blocking `ib`.
///
/// The panel always runs in host memory — its output feeds broadcasts
/// immediately — but under `HostNest` it executes inside the nested pool
/// so the panel-thread cap applies. Returns the tile-local columns whose
/// diagonal was exactly zero.
pub fn getrf_panel<S: Scalar>(
    m: &Matrix<S>,
    k: usize,
    ib: usize,
    exec: &KernelExec,
) -> Result<Vec<usize>> {
    // A trailing update on a device may hold the tile's origin; the panel
    // factors the authoritative host bytes.
    m.tile_update_origin(k, k)?;
    let tile_ref = m.tile(k, k)?;
    let mut pivots = PivotVector::new();
    let mut singular = Vec::new();
    exec.install(|| -> Result<()> {
        let mut tile = tile_ref.write();
        factor::getrf_nopiv(&mut tile, ib, &mut pivots, &mut singular)?;
        tile.mark_modified();
        Ok(())
    })?;
    m.tile_set_origin(k, k, DeviceId::HOST)?;
    Ok(singular)
}

/// Triangular solves of tiles `bs` against factor tile `a`, dispatched on
/// the target.
pub fn trsm_tiles<S: Scalar>(
    side: Side,
    uplo: Uplo,
    transa: Op,
    diag: DiagKind,
    alpha: S,
    m: &Matrix<S>,
    a: (usize, usize),
    bs: &[(usize, usize)],
    exec: &KernelExec,
) -> Result<()> {
    if bs.is_empty() {
        return Ok(());
    }
    let run_one = |slot: usize, b: (usize, usize)| -> Result<()> {
        let dev = device_for(m, exec.target(), slot)?;
        let a_ref = resolve(m, a.0, a.1, dev)?;
        let b_ref = resolve(m, b.0, b.1, dev)?;
        {
            let a_tile = a_ref.read();
            let mut b_tile = b_ref.write();
            blas::trsm(side, uplo, transa, diag, alpha, &a_tile, &mut b_tile)?;
            b_tile.mark_modified();
        }
        m.tile_set_origin(b.0, b.1, dev)
    };

    match exec.target() {
        Target::HostTask | Target::HostBatch | Target::Devices => {
            for (slot, &b) in bs.iter().enumerate() {
                run_one(slot, b)?;
            }
            Ok(())
        }
        Target::HostNest => exec.install(|| {
            bs.par_iter()
                .enumerate()
                .try_for_each(|(slot, &b)| run_one(slot, b))
        }),
    }
}

/// Batched tile multiply-accumulate
/// `C <- alpha * A * B + beta * C` over `(a, b, c)` coordinate triples.
pub fn gemm_tiles<S: Scalar>(
    alpha: S,
    m: &Matrix<S>,
    items: &[((usize, usize), (usize, usize), (usize, usize))],
    beta: S,
    exec: &KernelExec,
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    trace!(items = items.len(), target = %exec.target(), "gemm tile batch");
    let run_one = |slot: usize,
                   a: (usize, usize),
                   b: (usize, usize),
                   c: (usize, usize)|
     -> Result<()> {
        let dev = device_for(m, exec.target(), slot)?;
        let a_ref = resolve(m, a.0, a.1, dev)?;
        let b_ref = resolve(m, b.0, b.1, dev)?;
        let c_ref = resolve(m, c.0, c.1, dev)?;
        {
            let a_tile = a_ref.read();
            let b_tile = b_ref.read();
            let mut c_tile = c_ref.write();
            blas::gemm(Op::NoTrans, Op::NoTrans, alpha, &a_tile, &b_tile, beta, &mut c_tile)?;
            c_tile.mark_modified();
        }
        m.tile_set_origin(c.0, c.1, dev)
    };

    match exec.target() {
        Target::HostTask => {
            for (slot, &(a, b, c)) in items.iter().enumerate() {
                run_one(slot, a, b, c)?;
            }
            Ok(())
        }
        Target::HostNest => exec.install(|| {
            items
                .par_iter()
                .enumerate()
                .try_for_each(|(slot, &(a, b, c))| run_one(slot, a, b, c))
        }),
        // The batched variants marshal arguments through the matrix's
        // preallocated batch arrays, then execute the batch in one sweep.
        Target::HostBatch | Target::Devices => m.with_batch(|batch| {
            batch.clear();
            for &(a, b, c) in items {
                batch.a.push(a);
                batch.b.push(b);
                batch.c.push(c);
            }
            for slot in 0..batch.c.len() {
                run_one(slot, batch.a[slot], batch.b[slot], batch.c[slot])?;
            }
            Ok(())
        }),
    }
}
