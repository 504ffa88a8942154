//! Shared helpers for the integration suites.
#![allow(dead_code)]

use mosaic::{Matrix, Scalar};
use num_traits::{One, Zero};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a warn-level subscriber once per test binary so driver
/// diagnostics are visible when a scenario fails.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .try_init();
    });
}

/// Read element (i, j) of the unit-lower factor packed into a factored
/// matrix.
pub fn l_entry<S: Scalar>(a: &Matrix<S>, i: usize, j: usize) -> S {
    if i > j {
        a.get(i, j).unwrap()
    } else if i == j {
        S::one()
    } else {
        S::zero()
    }
}

/// Read element (i, j) of the upper factor packed into a factored matrix.
pub fn u_entry<S: Scalar>(a: &Matrix<S>, i: usize, j: usize) -> S {
    if i <= j {
        a.get(i, j).unwrap()
    } else {
        S::zero()
    }
}

/// `‖L·U − A₀‖₁` over the factored matrix against the original dense
/// column-major input.
pub fn lu_residual_norm1<S: Scalar>(a: &Matrix<S>, original: &[S], n: usize) -> S::Real {
    let mut worst = <S::Real as Zero>::zero();
    for j in 0..n {
        let mut col_sum = <S::Real as Zero>::zero();
        for i in 0..n {
            let mut acc = S::zero();
            for k in 0..n {
                acc += l_entry(a, i, k) * u_entry(a, k, j);
            }
            let diff = acc - original[i + j * n];
            col_sum = col_sum + diff.abs();
        }
        if col_sum > worst {
            worst = col_sum;
        }
    }
    worst
}

/// 1-norm of a dense column-major matrix.
pub fn norm1<S: Scalar>(data: &[S], n: usize) -> S::Real {
    let mut worst = <S::Real as Zero>::zero();
    for j in 0..n {
        let mut col_sum = <S::Real as Zero>::zero();
        for i in 0..n {
            col_sum = col_sum + data[i + j * n].abs();
        }
        if col_sum > worst {
            worst = col_sum;
        }
    }
    worst
}

/// Largest elementwise difference between two factored matrices.
pub fn max_abs_diff<S: Scalar>(a: &Matrix<S>, b: &Matrix<S>, n: usize) -> S::Real {
    let mut worst = <S::Real as Zero>::zero();
    for j in 0..n {
        for i in 0..n {
            let d = (a.get(i, j).unwrap() - b.get(i, j).unwrap()).abs();
            if d > worst {
                worst = d;
            }
        }
    }
    worst
}

/// A diagonally dominant dense test matrix with deterministic entries.
pub fn diag_dominant<S: Scalar>(n: usize) -> Vec<S> {
    let mut data = vec![S::zero(); n * n];
    for j in 0..n {
        for i in 0..n {
            let v = if i == j {
                2.0 * n as f64 + (i % 3) as f64
            } else {
                (((i * 7 + j * 3) % 5) as f64 - 2.0) / 2.0
            };
            data[i + j * n] = S::from_f64(v);
        }
    }
    data
}

/// Factorization tolerance `c * n * eps * ||A||_1`.
pub fn tolerance<S: Scalar>(c: f64, n: usize, a_norm: S::Real) -> S::Real {
    <S::Real as Scalar>::from_f64(c * n as f64) * S::epsilon() * a_norm
}
