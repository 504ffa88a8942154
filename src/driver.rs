//! Right-looking LU without pivoting
//!
//! The driver walks panel columns left to right. For each column `k` it
//! submits a pipeline of tasks against two per-column token arrays plus a
//! bandwidth token:
//!
//! - `diag[k]` gates "A(k,k) is ready to be consumed as a triangular
//!   factor";
//! - `column[k]` gates "panel column k is settled";
//! - `mpi_bandwidth` serializes the bulk broadcasts so the wire never
//!   carries two iterations' row traffic interleaved.
//!
//! The split lets lookahead triangular solves (which only need `diag[k]`)
//! overlap the panel-row broadcast. Lookahead columns run at high
//! priority; the remaining trailing update runs at normal priority and is
//! overtaken by the next panel.
//!
//! Every rank submits the same task graph; tile locality decides who
//! computes and the broadcast layer runs send- or receive-side per rank.

use mosaic_comm::tags;
use mosaic_core::{
    DiagEvent, Diagnostics, Error, Options, Result, Scalar, Target,
};
use mosaic_kernels::adapters::{self, KernelExec};
use mosaic_kernels::blas::Side;
use mosaic_kernels::BlasThreadGuard;
use mosaic_matrix::{BcastEntry, DiagKind, Matrix, Op, Uplo};
use mosaic_scheduler::{Dep, Scheduler, TaskPriority};
use num_traits::One;
use tracing::{debug, info_span};

/// Factor `A = L * U` in place, without pivoting.
///
/// On return the strictly-lower tiles of `a` hold the unit-lower factor
/// and the upper tiles (diagonal included) hold U. A zero diagonal does
/// not fail the call: the affected global column is recorded in `diag`
/// and the factorization continues against the singular factor.
///
/// # Errors
///
/// `InvalidArgument` for bad options (validated before any work is
/// submitted), `OutOfMemory`/`CommunicationFailure`/`KernelFailure` from
/// the pipeline — in-flight tasks drain before the error surfaces.
pub fn getrf_nopiv<S: Scalar>(a: &Matrix<S>, opts: &Options, diag: &Diagnostics) -> Result<()> {
    let runtime_max = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let resolved = opts.resolve(runtime_max)?;
    if resolved.target == Target::Devices && a.num_devices() == 0 {
        return Err(Error::invalid_argument(
            "Devices target requested but the matrix has no device arenas".to_string(),
        ));
    }
    if a.op() != Op::NoTrans {
        return Err(Error::invalid_argument(
            "getrf_nopiv expects an untransposed view".to_string(),
        ));
    }

    let _span = info_span!(
        "getrf_nopiv",
        mt = a.mt(),
        nt = a.nt(),
        lookahead = resolved.lookahead,
        target = %resolved.target,
    )
    .entered();

    // Tile kernels run single-threaded; restore the caller's BLAS setting
    // on every exit path.
    let _blas = BlasThreadGuard::clamp_single();

    let exec = KernelExec::with_panel_threads(resolved.target, resolved.max_panel_threads)?;
    if matches!(resolved.target, Target::HostBatch | Target::Devices) {
        a.allocate_batch_arrays(a.mt().max(a.nt()), 3);
        a.reserve_device_workspace()?;
    }

    let (mt, nt) = (a.mt(), a.nt());
    let lookahead = resolved.lookahead;
    let ib = resolved.inner_blocking;
    let layout = a.layout();

    // Blocking broadcasts and kernel waits park worker threads; the pool
    // must outnumber the deepest simultaneously-blocking chain.
    let sched = Scheduler::new(lookahead + 2);
    let column = sched.token_array(nt.max(1));
    let diag_tok = sched.token_array(nt.max(1));
    let bandwidth = sched.token();

    for k in 0..mt.min(nt) {
        // ---- 1. Panel factor of A(k,k), then broadcast it down the
        //         column and across the row.
        {
            let a0 = a.clone();
            let diag_ch = diag.clone();
            let exec0 = exec.clone();
            let mut dests = Vec::new();
            if k + 1 < mt {
                dests.push(a.sub(k + 1, mt - 1, k, k)?);
            }
            if k + 1 < nt {
                dests.push(a.sub(k, k, k + 1, nt - 1)?);
            }
            sched.submit(
                TaskPriority::High,
                &[Dep::write(diag_tok[k]), Dep::write(column[k])],
                move || {
                    if a0.tile_is_local(k, k) {
                        let singular = adapters::getrf_panel(&a0, k, ib, &exec0)?;
                        for col in singular {
                            diag_ch.record(DiagEvent::SingularDiagonal {
                                column: k * a0.nb() + col,
                            });
                        }
                    }
                    if !dests.is_empty() {
                        a0.list_bcast(
                            vec![BcastEntry {
                                i: k,
                                j: k,
                                dests,
                                tag: tags::lookahead_col(k),
                            }],
                            layout,
                        )?;
                    }
                    Ok(())
                },
            );
        }

        // ---- 2. Solve the panel column below the diagonal against U.
        let below: Vec<(usize, usize)> = (k + 1..mt)
            .filter(|&i| a.tile_is_local(i, k))
            .map(|i| (i, k))
            .collect();
        if !below.is_empty() {
            let a1 = a.clone();
            let exec1 = exec.clone();
            sched.submit(
                TaskPriority::High,
                &[Dep::read(diag_tok[k]), Dep::write(column[k])],
                move || {
                    adapters::trsm_tiles(
                        Side::Right,
                        Uplo::Upper,
                        Op::NoTrans,
                        DiagKind::NonUnit,
                        S::one(),
                        &a1,
                        (k, k),
                        &below,
                        &exec1,
                    )
                },
            );
        }

        // ---- 3. Broadcast the solved panel tiles across their rows.
        if k + 1 < mt && k + 1 < nt {
            let a2 = a.clone();
            let mut list = Vec::with_capacity(mt - k - 1);
            for i in k + 1..mt {
                list.push(BcastEntry {
                    i,
                    j: k,
                    dests: vec![a.sub(i, i, k + 1, nt - 1)?],
                    tag: tags::panel_row(i),
                });
            }
            sched.submit(
                TaskPriority::High,
                &[Dep::write(column[k]), Dep::write(bandwidth)],
                move || a2.list_bcast_mt(list, layout),
            );
        }

        // ---- 4. Lookahead columns: eager solve, broadcast, update.
        // Empty when lookahead is 0 or the window runs off the matrix.
        let la_end = (k + lookahead).min(nt.saturating_sub(1));
        #[allow(clippy::reversed_empty_ranges)]
        for j in k + 1..=la_end {
            // 4a. A(k,j) <- L^-1 A(k,j), then send it down column j.
            {
                let a3 = a.clone();
                let exec3 = exec.clone();
                let dest = if k + 1 < mt {
                    Some(a.sub(k + 1, mt - 1, j, j)?)
                } else {
                    None
                };
                sched.submit(
                    TaskPriority::High,
                    &[Dep::read(diag_tok[k]), Dep::write(column[j])],
                    move || {
                        if a3.tile_is_local(k, j) {
                            adapters::trsm_tiles(
                                Side::Left,
                                Uplo::Lower,
                                Op::NoTrans,
                                DiagKind::Unit,
                                S::one(),
                                &a3,
                                (k, k),
                                &[(k, j)],
                                &exec3,
                            )?;
                        }
                        if let Some(dest) = dest {
                            a3.tile_bcast(k, j, dest, layout, tags::lookahead_col(j))?;
                        }
                        Ok(())
                    },
                );
            }
            // 4b. Rank-mb update of column j.
            let items: Vec<_> = (k + 1..mt)
                .filter(|&i| a.tile_is_local(i, j))
                .map(|i| ((i, k), (k, j), (i, j)))
                .collect();
            if !items.is_empty() {
                let a4 = a.clone();
                let exec4 = exec.clone();
                sched.submit(
                    TaskPriority::High,
                    &[Dep::read(column[k]), Dep::write(column[j])],
                    move || {
                        adapters::gemm_tiles(
                            -S::one(),
                            &a4,
                            &items,
                            S::one(),
                            &exec4,
                        )
                    },
                );
            }
        }

        // ---- 5. Trailing block beyond the lookahead window.
        let jt0 = k + 1 + lookahead;
        if jt0 < nt {
            let trailing_deps_rw = [
                Dep::write(column[jt0]),
                Dep::write(column[nt - 1]),
            ];

            // 5a. Solve the whole trailing row strip at once.
            let strip: Vec<(usize, usize)> = (jt0..nt)
                .filter(|&j| a.tile_is_local(k, j))
                .map(|j| (k, j))
                .collect();
            if !strip.is_empty() {
                let a5 = a.clone();
                let exec5 = exec.clone();
                sched.submit(
                    TaskPriority::Normal,
                    &[
                        Dep::read(diag_tok[k]),
                        trailing_deps_rw[0],
                        trailing_deps_rw[1],
                    ],
                    move || {
                        adapters::trsm_tiles(
                            Side::Left,
                            Uplo::Lower,
                            Op::NoTrans,
                            DiagKind::Unit,
                            S::one(),
                            &a5,
                            (k, k),
                            &strip,
                            &exec5,
                        )
                    },
                );
            }

            // 5b. Send the solved strip down its columns.
            if k + 1 < mt {
                let a6 = a.clone();
                let mut list = Vec::with_capacity(nt - jt0);
                for j in jt0..nt {
                    list.push(BcastEntry {
                        i: k,
                        j,
                        dests: vec![a.sub(k + 1, mt - 1, j, j)?],
                        tag: tags::trailing_col(j, mt),
                    });
                }
                sched.submit(
                    TaskPriority::Normal,
                    &[
                        trailing_deps_rw[0],
                        trailing_deps_rw[1],
                        Dep::write(bandwidth),
                    ],
                    move || a6.list_bcast_mt(list, layout),
                );
            }

            // 5c. Rank-mb update of the trailing block.
            let mut items = Vec::new();
            for j in jt0..nt {
                for i in k + 1..mt {
                    if a.tile_is_local(i, j) {
                        items.push(((i, k), (k, j), (i, j)));
                    }
                }
            }
            if !items.is_empty() {
                let a7 = a.clone();
                let exec7 = exec.clone();
                sched.submit(
                    TaskPriority::Normal,
                    &[
                        Dep::read(column[k]),
                        trailing_deps_rw[0],
                        trailing_deps_rw[1],
                    ],
                    move || {
                        adapters::gemm_tiles(
                            -S::one(),
                            &a7,
                            &items,
                            S::one(),
                            &exec7,
                        )
                    },
                );
            }
        }

        // ---- 6. Drop device replicas of the settled panel column.
        if resolved.target == Target::Devices {
            let panel: Vec<(usize, usize)> = (k..mt)
                .filter(|&i| a.tile_is_local(i, k))
                .map(|i| (i, k))
                .collect();
            if !panel.is_empty() {
                let a8 = a.clone();
                sched.submit(TaskPriority::Normal, &[Dep::write(column[k])], move || {
                    for (i, j) in &panel {
                        a8.tile_release_device(*i, *j)?;
                    }
                    Ok(())
                });
            }
        }
    }

    sched.wait()?;
    a.tile_update_all_origin()?;
    a.clear_workspace();
    debug!("factorization drained");
    Ok(())
}
