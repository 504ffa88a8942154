//! Panel factorization kernels
//!
//! `getrf_nopiv` is the workhorse: a blocked, right-looking LU of one tile
//! with no row interchanges. It takes a pivot vector anyway so the pivoted
//! and unpivoted panel contracts have the same shape; the unpivoted kernel
//! leaves it untouched. `potrf` (Cholesky) rounds out the panel-kernel
//! family with the same tile-level calling convention.

use mosaic_core::{Error, PivotVector, Result, Scalar};
use mosaic_tile::Tile;
use num_traits::{Float, Zero};

/// Blocked LU factorization of one tile without pivoting, in place.
///
/// On return the strictly-lower part of the tile holds the unit-lower
/// factor's multipliers and the upper part (diagonal included) holds U.
/// Inner blocking `ib` controls the sub-panel width.
///
/// An exactly-zero diagonal is recorded in `singular` (tile-local column
/// index) and its column scaling is skipped, so the singular factor stays
/// finite; the factorization continues.
pub fn getrf_nopiv<S: Scalar>(
    a: &mut Tile<S>,
    ib: usize,
    _pivots: &mut PivotVector,
    singular: &mut Vec<usize>,
) -> Result<()> {
    if ib == 0 {
        return Err(Error::kernel("getrf_nopiv", "inner blocking must be positive"));
    }
    let mb = a.mb();
    let nb = a.nb();
    let mn = mb.min(nb);

    let mut k0 = 0;
    while k0 < mn {
        let kend = (k0 + ib).min(mn);

        // Unblocked factorization of the sub-panel columns k0..kend over
        // the full remaining height.
        for k in k0..kend {
            let piv = a.get(k, k);
            if piv.is_zero() {
                singular.push(k);
            } else {
                for i in k + 1..mb {
                    let v = a.get(i, k) / piv;
                    a.set(i, k, v);
                }
            }
            for j in k + 1..kend {
                let akj = a.get(k, j);
                for i in k + 1..mb {
                    let v = a.get(i, j) - a.get(i, k) * akj;
                    a.set(i, j, v);
                }
            }
        }

        if kend < nb {
            // Unit-lower solve of rows k0..kend against the trailing
            // columns.
            for j in kend..nb {
                for k in k0..kend {
                    let akj = a.get(k, j);
                    for i in k + 1..kend {
                        let v = a.get(i, j) - a.get(i, k) * akj;
                        a.set(i, j, v);
                    }
                }
            }
            // Rank-ib update of the trailing block.
            for j in kend..nb {
                for i in kend..mb {
                    let mut acc = S::zero();
                    for l in k0..kend {
                        acc += a.get(i, l) * a.get(l, j);
                    }
                    let v = a.get(i, j) - acc;
                    a.set(i, j, v);
                }
            }
        }

        k0 = kend;
    }
    Ok(())
}

/// Cholesky factorization of one Hermitian positive-definite tile, lower
/// variant, in place. Only the lower triangle is referenced or written.
///
/// # Errors
///
/// `KernelFailure` when a leading minor is not positive definite.
pub fn potrf<S: Scalar>(a: &mut Tile<S>) -> Result<()> {
    if a.mb() != a.nb() {
        return Err(Error::kernel(
            "potrf",
            format!("tile must be square, got {}x{}", a.mb(), a.nb()),
        ));
    }
    let n = a.mb();
    for j in 0..n {
        let mut d = a.get(j, j);
        for k in 0..j {
            let v = a.get(j, k);
            d -= v * v.conj();
        }
        let dre = d.re();
        if dre <= <S::Real as Zero>::zero() {
            return Err(Error::kernel(
                "potrf",
                format!("leading minor of order {} is not positive definite", j + 1),
            ));
        }
        let root = S::from_real(Float::sqrt(dre));
        a.set(j, j, root);
        for i in j + 1..n {
            let mut v = a.get(i, j);
            for k in 0..j {
                v -= a.get(i, k) * a.get(j, k).conj();
            }
            a.set(i, j, v / root);
        }
    }
    Ok(())
}
