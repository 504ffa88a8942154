//! Reference Level-3 tile kernels
//!
//! Straightforward strided loops over single tiles, generic over the
//! engine's scalar types. These are correctness references with the exact
//! contracts a vendor BLAS adapter would satisfy; the engine gets its
//! parallelism from tiling, not from inside these kernels.

use mosaic_core::{Error, Result, Scalar};
use mosaic_matrix::{DiagKind, Op, Uplo};
use mosaic_tile::Tile;
use num_traits::Zero;

/// Which side a triangular factor is applied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// op(A) * X = alpha * B
    Left,
    /// X * op(A) = alpha * B
    Right,
}

#[inline]
fn elem<S: Scalar>(t: &Tile<S>, op: Op, i: usize, j: usize) -> S {
    match op {
        Op::NoTrans => t.get(i, j),
        Op::Trans => t.get(j, i),
        Op::ConjTrans => t.get(j, i).conj(),
    }
}

fn op_dims<S: Scalar>(t: &Tile<S>, op: Op) -> (usize, usize) {
    match op {
        Op::NoTrans => (t.mb(), t.nb()),
        Op::Trans | Op::ConjTrans => (t.nb(), t.mb()),
    }
}

/// General tile multiply-accumulate:
/// `C <- alpha * op(A) * op(B) + beta * C`.
///
/// # Errors
///
/// `KernelFailure` on incompatible shapes.
pub fn gemm<S: Scalar>(
    transa: Op,
    transb: Op,
    alpha: S,
    a: &Tile<S>,
    b: &Tile<S>,
    beta: S,
    c: &mut Tile<S>,
) -> Result<()> {
    let (m, ka) = op_dims(a, transa);
    let (kb, n) = op_dims(b, transb);
    if ka != kb || m != c.mb() || n != c.nb() {
        return Err(Error::kernel(
            "gemm",
            format!(
                "shape mismatch: op(A) {}x{}, op(B) {}x{}, C {}x{}",
                m,
                ka,
                kb,
                n,
                c.mb(),
                c.nb()
            ),
        ));
    }
    for j in 0..n {
        for i in 0..m {
            let mut acc = S::zero();
            for l in 0..ka {
                acc += elem(a, transa, i, l) * elem(b, transb, l, j);
            }
            let v = alpha * acc + beta * c.get(i, j);
            c.set(i, j, v);
        }
    }
    Ok(())
}

/// Triangular solve with multiple right-hand sides, in place:
/// `op(A) * X = alpha * B` (left) or `X * op(A) = alpha * B` (right),
/// overwriting B with X.
///
/// An exactly-zero diagonal element leaves its row or column unscaled so a
/// singular factor propagates finite values; the factorization level is
/// responsible for reporting the singularity.
///
/// # Errors
///
/// `KernelFailure` on a non-square A or incompatible shapes.
pub fn trsm<S: Scalar>(
    side: Side,
    uplo: Uplo,
    transa: Op,
    diag: DiagKind,
    alpha: S,
    a: &Tile<S>,
    b: &mut Tile<S>,
) -> Result<()> {
    if a.mb() != a.nb() {
        return Err(Error::kernel(
            "trsm",
            format!("triangular factor must be square, got {}x{}", a.mb(), a.nb()),
        ));
    }
    let (m, n) = (b.mb(), b.nb());
    let need = match side {
        Side::Left => m,
        Side::Right => n,
    };
    if a.mb() != need {
        return Err(Error::kernel(
            "trsm",
            format!("factor of order {} against {}x{} rhs on {:?}", a.mb(), m, n, side),
        ));
    }

    // The effective triangle of op(A): transposition flips it.
    let eff_uplo = match (uplo, transa) {
        (u, Op::NoTrans) => u,
        (Uplo::Lower, _) => Uplo::Upper,
        (Uplo::Upper, _) => Uplo::Lower,
    };

    match (side, eff_uplo) {
        (Side::Left, Uplo::Lower) => {
            // Forward substitution over rows.
            for j in 0..n {
                for i in 0..m {
                    let mut v = alpha * b.get(i, j);
                    for l in 0..i {
                        v -= elem(a, transa, i, l) * b.get(l, j);
                    }
                    b.set(i, j, scale_by_diag(v, a, transa, diag, i));
                }
            }
        }
        (Side::Left, Uplo::Upper) => {
            // Backward substitution over rows.
            for j in 0..n {
                for i in (0..m).rev() {
                    let mut v = alpha * b.get(i, j);
                    for l in i + 1..m {
                        v -= elem(a, transa, i, l) * b.get(l, j);
                    }
                    b.set(i, j, scale_by_diag(v, a, transa, diag, i));
                }
            }
        }
        (Side::Right, Uplo::Upper) => {
            // Forward over columns.
            for j in 0..n {
                for i in 0..m {
                    let mut v = alpha * b.get(i, j);
                    for l in 0..j {
                        v -= b.get(i, l) * elem(a, transa, l, j);
                    }
                    b.set(i, j, scale_by_diag(v, a, transa, diag, j));
                }
            }
        }
        (Side::Right, Uplo::Lower) => {
            // Backward over columns.
            for j in (0..n).rev() {
                for i in 0..m {
                    let mut v = alpha * b.get(i, j);
                    for l in j + 1..n {
                        v -= b.get(i, l) * elem(a, transa, l, j);
                    }
                    b.set(i, j, scale_by_diag(v, a, transa, diag, j));
                }
            }
        }
    }
    Ok(())
}

#[inline]
fn scale_by_diag<S: Scalar>(v: S, a: &Tile<S>, transa: Op, diag: DiagKind, k: usize) -> S {
    match diag {
        DiagKind::Unit => v,
        DiagKind::NonUnit => {
            let d = elem(a, transa, k, k);
            if d.is_zero() {
                v
            } else {
                v / d
            }
        }
    }
}
