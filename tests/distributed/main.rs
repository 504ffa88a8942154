//! Multi-rank factorization over the in-process mesh.
//!
//! Each rank runs the full driver in its own thread against a shared mesh
//! communicator; local tiles are then compared against a single-rank
//! reference factorization of the same input.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use mosaic::{
    getrf_nopiv, mesh, Diagnostics, Matrix, MatrixConfig, OptionKey, OptionValue, Options,
    ProcessGrid, SingleRank, Target,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Identity plus a small random perturbation, deterministic across ranks.
fn perturbed_identity(n: usize, scale: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0.0; n * n];
    for j in 0..n {
        for i in 0..n {
            let noise: f64 = rng.gen_range(-1.0..1.0) * scale;
            data[i + j * n] = if i == j { 1.0 + noise } else { noise };
        }
    }
    data
}

fn reference_factor(data: &[f64], n: usize, mb: usize, opts: &Options) -> Matrix<f64> {
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = Matrix::from_elements(n, n, mb, mb, grid, Arc::new(SingleRank), data).unwrap();
    getrf_nopiv(&a, opts, &Diagnostics::new()).unwrap();
    a
}

/// Run the driver on every rank of a `p` x `q` mesh and compare each
/// rank's local tiles against the single-rank reference.
fn factor_on_mesh_and_check(
    p: usize,
    q: usize,
    n: usize,
    mb: usize,
    data: &[f64],
    opts: Options,
    num_devices: usize,
    tol: f64,
) {
    init_tracing();
    let reference = reference_factor(data, n, mb, &Options::new());
    let reference = Arc::new(reference);

    let grid = ProcessGrid::new(p, q).unwrap();
    let comms = mesh(p * q);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let data = data.to_vec();
            let opts = opts.clone();
            let reference = Arc::clone(&reference);
            std::thread::spawn(move || {
                let config = MatrixConfig {
                    num_devices,
                    ..MatrixConfig::default()
                };
                let a: Matrix<f64> =
                    Matrix::with_config(n, n, mb, mb, grid, Arc::new(comm), config).unwrap();
                for (ti, tj) in a.local_stored_tiles() {
                    let tile = a.tile(ti, tj).unwrap();
                    let mut tile = tile.write();
                    for jj in 0..tile.nb() {
                        for ii in 0..tile.mb() {
                            tile.set(ii, jj, data[(ti * mb + ii) + (tj * mb + jj) * n]);
                        }
                    }
                }
                let diag = Diagnostics::new();
                getrf_nopiv(&a, &opts, &diag).unwrap();
                assert!(diag.is_clean());

                for (ti, tj) in a.local_stored_tiles() {
                    let tile = a.tile(ti, tj).unwrap();
                    let tile = tile.read();
                    for jj in 0..tile.nb() {
                        for ii in 0..tile.mb() {
                            let got = tile.get(ii, jj);
                            let want = reference.get(ti * mb + ii, tj * mb + jj).unwrap();
                            assert!(
                                (got - want).abs() <= tol,
                                "rank {} tile ({}, {}) element ({}, {}): {} vs {}",
                                a.comm().rank(),
                                ti,
                                tj,
                                ii,
                                jj,
                                got,
                                want
                            );
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

// Scenario C: two-process block-cyclic over columns.
#[test]
fn test_two_rank_column_cyclic() {
    let n = 32;
    let mb = 8;
    let data = perturbed_identity(n, 1e-3, 42);
    let tol = tolerance::<f64>(32.0, 1, norm1(&data, n));
    factor_on_mesh_and_check(1, 2, n, mb, &data, Options::new(), 0, tol);
}

// The same pipeline over a 2x2 grid with both row and column traffic.
#[test]
fn test_two_by_two_grid() {
    let n = 16;
    let mb = 4;
    let data = diag_dominant::<f64>(n);
    let tol = tolerance::<f64>(16.0, n, norm1(&data, n));
    factor_on_mesh_and_check(2, 2, n, mb, &data, Options::new(), 0, tol);
}

// Deep lookahead across ranks still matches the reference.
#[test]
fn test_two_rank_with_lookahead() {
    let n = 24;
    let mb = 4;
    let data = diag_dominant::<f64>(n);
    let opts = Options::new().with(OptionKey::Lookahead, OptionValue::Int(3));
    let tol = tolerance::<f64>(16.0, n, norm1(&data, n));
    factor_on_mesh_and_check(1, 2, n, mb, &data, opts, 0, tol);
}

// Lookahead 0 forces the pure trailing-update path across ranks.
#[test]
fn test_two_rank_without_lookahead() {
    let n = 16;
    let mb = 4;
    let data = diag_dominant::<f64>(n);
    let opts = Options::new().with(OptionKey::Lookahead, OptionValue::Int(0));
    let tol = tolerance::<f64>(16.0, n, norm1(&data, n));
    factor_on_mesh_and_check(1, 2, n, mb, &data, opts, 0, tol);
}

// Scenario E: device and host targets agree on the distributed input.
#[test]
fn test_device_vs_host_agreement() {
    let n = 32;
    let mb = 8;
    let data = perturbed_identity(n, 1e-3, 7);
    let tol = tolerance::<f64>(64.0, 1, norm1(&data, n));
    let opts = Options::new().with(OptionKey::Target, OptionValue::Target(Target::Devices));
    factor_on_mesh_and_check(1, 2, n, mb, &data, opts, 1, tol);
}
