//! End-to-end factorization scenarios on a single rank.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use mosaic::{
    getrf_nopiv, C32, C64, DiagEvent, Diagnostics, Error, Matrix, MatrixConfig, MatrixKind,
    OptionKey, OptionValue, Options, ProcessGrid, Scalar, SingleRank, Target, Uplo,
};
use std::sync::Arc;

fn factor_dense<S: Scalar>(
    data: &[S],
    n: usize,
    mb: usize,
    opts: &Options,
) -> (Matrix<S>, Diagnostics) {
    init_tracing();
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = Matrix::from_elements(n, n, mb, mb, grid, Arc::new(SingleRank), data).unwrap();
    let diag = Diagnostics::new();
    getrf_nopiv(&a, opts, &diag).unwrap();
    (a, diag)
}

fn factor_dense_target<S: Scalar>(
    data: &[S],
    n: usize,
    mb: usize,
    target: Target,
    num_devices: usize,
) -> Matrix<S> {
    let grid = ProcessGrid::new(1, 1).unwrap();
    let config = MatrixConfig {
        num_devices,
        ..MatrixConfig::default()
    };
    let a: Matrix<S> =
        Matrix::with_config(n, n, mb, mb, grid, Arc::new(SingleRank), config).unwrap();
    for j in 0..n {
        for i in 0..n {
            a.set(i, j, data[i + j * n]).unwrap();
        }
    }
    let opts = Options::new().with(OptionKey::Target, OptionValue::Target(target));
    getrf_nopiv(&a, &opts, &Diagnostics::new()).unwrap();
    a
}

// Scenario A: a single 4x4 tile.
#[test]
fn test_trivial_single_tile() {
    let data = vec![
        4.0, 2.0, 1.0, 0.0, 2.0, 5.0, 0.0, 1.0, 1.0, 0.0, 3.0, 0.0, 0.0, 1.0, 0.0, 2.0,
    ];
    let (a, diag) = factor_dense(&data, 4, 4, &Options::new());
    assert!(diag.is_clean());
    let residual = lu_residual_norm1(&a, &data, 4);
    assert!(residual <= tolerance::<f64>(4.0, 4, norm1(&data, 4)));
}

// Scenario B: 2x2 tile grid, lookahead 0 and 1 agree.
#[test]
fn test_two_by_two_lookahead_agreement() {
    let data = vec![
        10.0, 1.0, 2.0, 0.0, 1.0, 8.0, 0.0, 1.0, 2.0, 0.0, 7.0, 1.0, 0.0, 1.0, 1.0, 6.0,
    ];
    let l0 = Options::new().with(OptionKey::Lookahead, OptionValue::Int(0));
    let l1 = Options::new().with(OptionKey::Lookahead, OptionValue::Int(1));
    let (a0, d0) = factor_dense(&data, 4, 2, &l0);
    let (a1, d1) = factor_dense(&data, 4, 2, &l1);
    assert!(d0.is_clean() && d1.is_clean());

    let a_norm = norm1(&data, 4);
    assert!(lu_residual_norm1(&a0, &data, 4) <= tolerance::<f64>(4.0, 1, a_norm));
    assert!(max_abs_diff(&a0, &a1, 4) <= tolerance::<f64>(4.0, 1, a_norm));
}

// Scenario D: exactly singular input completes and reports column 1.
#[test]
fn test_singular_input_completes_with_diagnostic() {
    let data: Vec<f64> = vec![
        1.0, 2.0, 0.0, 0.0, 2.0, 4.0, 0.0, 0.0, 3.0, 6.0, 1.0, 0.0, 4.0, 8.0, 0.0, 1.0,
    ];
    let (a, diag) = factor_dense(&data, 4, 2, &Options::new());
    assert_eq!(diag.singular_columns(), vec![1]);
    assert_eq!(
        diag.events(),
        vec![DiagEvent::SingularDiagonal { column: 1 }]
    );
    // Subsequent tiles were computed against the singular factor, and the
    // factor still reproduces the input.
    for j in 0..4 {
        for i in 0..4 {
            assert!(a.get(i, j).unwrap().is_finite());
        }
    }
    let residual = lu_residual_norm1(&a, &data, 4);
    assert!(residual <= tolerance::<f64>(8.0, 4, norm1(&data, 4)));
}

// Scenario F: conjugate-transpose composition over a Hermitian wrapper.
#[test]
fn test_hermitian_conj_transpose_composition() {
    let grid = ProcessGrid::new(1, 1).unwrap();
    let config = MatrixConfig {
        kind: MatrixKind::Hermitian { uplo: Uplo::Lower },
        ..MatrixConfig::default()
    };
    let a: Matrix<C64> =
        Matrix::with_config(4, 4, 2, 2, grid, Arc::new(SingleRank), config).unwrap();
    for j in 0..4 {
        for i in j..4 {
            let v = if i == j {
                C64::new(1.0 + i as f64, 0.0)
            } else {
                C64::new((i * j) as f64 * 0.25 + 0.5, (i as f64 - j as f64) * 0.125)
            };
            a.set(i, j, v).unwrap();
        }
    }
    let cc = a.conj_transpose().conj_transpose();
    for j in 0..4 {
        for i in 0..4 {
            assert_eq!(cc.get(i, j).unwrap(), a.get(i, j).unwrap());
        }
    }
}

// Law 6: factorization correctness across all supported scalar types.
#[test]
fn test_factorization_correctness_f32() {
    scalar_correctness::<f32>(8.0);
}

#[test]
fn test_factorization_correctness_f64() {
    scalar_correctness::<f64>(6.0);
}

#[test]
fn test_factorization_correctness_c32() {
    scalar_correctness::<C32>(8.0);
}

#[test]
fn test_factorization_correctness_c64() {
    scalar_correctness::<C64>(6.0);
}

fn scalar_correctness<S: Scalar>(c: f64) {
    let n = 6;
    let data = diag_dominant::<S>(n);
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = Matrix::from_elements(n, n, 2, 2, grid, Arc::new(SingleRank), &data).unwrap();
    let diag = Diagnostics::new();
    getrf_nopiv(&a, &Options::new(), &diag).unwrap();
    assert!(diag.is_clean());
    let residual = lu_residual_norm1(&a, &data, n);
    assert!(
        residual <= tolerance::<S>(c, n, norm1(&data, n)),
        "residual {} over tolerance",
        residual
    );
}

// Law 7: lookahead depth does not change the numbers.
#[test]
fn test_lookahead_invariance() {
    let n = 8;
    let data = diag_dominant::<f64>(n);
    let reference = factor_dense(&data, n, 2, &Options::new()).0;
    for lookahead in [0_i64, 2, 5] {
        let opts = Options::new().with(OptionKey::Lookahead, OptionValue::Int(lookahead));
        let (a, _) = factor_dense(&data, n, 2, &opts);
        let diff = max_abs_diff(&a, &reference, n);
        assert!(
            diff <= tolerance::<f64>(1.0, n, norm1(&data, n)),
            "lookahead {} diverged by {}",
            lookahead,
            diff
        );
    }
}

// Law 8: all targets produce the same factors.
#[test]
fn test_target_invariance() {
    let n = 8;
    let data = diag_dominant::<f64>(n);
    let reference = factor_dense_target(&data, n, 2, Target::HostTask, 0);
    let a_norm = norm1(&data, n);
    for (target, devices) in [
        (Target::HostNest, 0),
        (Target::HostBatch, 0),
        (Target::Devices, 2),
    ] {
        let a = factor_dense_target(&data, n, 2, target, devices);
        let diff = max_abs_diff(&a, &reference, n);
        assert!(
            diff <= tolerance::<f64>(64.0, n, a_norm),
            "{:?} diverged by {}",
            target,
            diff
        );
    }
}

// Uneven edge tiles exercise the short-tile paths.
#[test]
fn test_non_multiple_tile_size() {
    let n = 7;
    let data = diag_dominant::<f64>(n);
    let (a, diag) = factor_dense(&data, n, 3, &Options::new());
    assert!(diag.is_clean());
    assert!(lu_residual_norm1(&a, &data, n) <= tolerance::<f64>(8.0, n, norm1(&data, n)));
}

// Options are validated before any work is submitted.
#[test]
fn test_invalid_options_rejected_at_entry() {
    let data = diag_dominant::<f64>(4);
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = Matrix::from_elements(4, 4, 2, 2, grid, Arc::new(SingleRank), &data).unwrap();

    let bad = Options::new().with(OptionKey::Lookahead, OptionValue::Int(-2));
    let err = getrf_nopiv(&a, &bad, &Diagnostics::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));

    let bad = Options::new().with(OptionKey::InnerBlocking, OptionValue::Int(0));
    assert!(getrf_nopiv(&a, &bad, &Diagnostics::new()).is_err());

    // The matrix was left untouched.
    for j in 0..4 {
        for i in 0..4 {
            assert_eq!(a.get(i, j).unwrap(), data[i + j * 4]);
        }
    }
}

#[test]
fn test_devices_target_needs_device_arenas() {
    let data = diag_dominant::<f64>(4);
    let grid = ProcessGrid::new(1, 1).unwrap();
    let a = Matrix::from_elements(4, 4, 2, 2, grid, Arc::new(SingleRank), &data).unwrap();
    let opts = Options::new().with(OptionKey::Target, OptionValue::Target(Target::Devices));
    let err = getrf_nopiv(&a, &opts, &Diagnostics::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

// Inner blocking width changes the schedule inside the panel kernel, not
// the factors.
#[test]
fn test_inner_blocking_invariance() {
    let n = 8;
    let data = diag_dominant::<f64>(n);
    let reference = factor_dense(&data, n, 4, &Options::new()).0;
    for ib in [1_i64, 2, 8, 64] {
        let opts = Options::new().with(OptionKey::InnerBlocking, OptionValue::Int(ib));
        let (a, _) = factor_dense(&data, n, 4, &opts);
        let diff = max_abs_diff(&a, &reference, n);
        assert!(
            diff <= tolerance::<f64>(8.0, n, norm1(&data, n)),
            "ib {} diverged by {}",
            ib,
            diff
        );
    }
}
