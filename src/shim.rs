//! Descriptor-based compatibility surface
//!
//! The legacy dense-linear-algebra ABI describes a distributed matrix with
//! a nine-slot integer descriptor plus grid-info callbacks. This shim
//! decodes the descriptor, wraps the caller's local block-cyclic buffer
//! without copying, takes the sub-matrix at the requested offset, and runs
//! the core driver with the one-entry option map the ABI promises
//! (`{Target: configured, Lookahead: 1}`). The result is reported through
//! a diagnostic integer: zero on success.
//!
//! The process grid is assumed column-major, the ambient convention of the
//! numerical ecosystem.

use crate::driver;
use mosaic_comm::Communicator;
use mosaic_core::{
    Diagnostics, Error, OptionKey, OptionValue, Options, Result, Scalar, Target,
};
use mosaic_matrix::{Matrix, MatrixConfig, ProcessGrid};
use std::sync::Arc;
use tracing::warn;

/// Decoded nine-slot matrix descriptor.
///
/// Slot order follows the ABI: descriptor type, context handle, global
/// rows, global columns, tile rows, tile columns, source grid row, source
/// grid column, local leading dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Descriptor type tag; 1 means block-cyclic.
    pub dtype: i64,
    /// Opaque context handle resolved through [`GridInfo`].
    pub context: i64,
    /// Global rows.
    pub m: usize,
    /// Global columns.
    pub n: usize,
    /// Tile rows.
    pub mb: usize,
    /// Tile columns.
    pub nb: usize,
    /// Grid row holding the first tile row.
    pub rsrc: usize,
    /// Grid column holding the first tile column.
    pub csrc: usize,
    /// Local leading dimension.
    pub lld: usize,
}

/// The block-cyclic descriptor type tag.
pub const DTYPE_BLOCK_CYCLIC: i64 = 1;

impl Descriptor {
    /// Decode a raw descriptor array.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown descriptor type, non-positive
    /// dimensions, or a shifted source (unsupported).
    pub fn from_raw(raw: &[i64; 9]) -> Result<Self> {
        let desc = Descriptor {
            dtype: raw[0],
            context: raw[1],
            m: usize::try_from(raw[2]).map_err(|_| bad_dim("m", raw[2]))?,
            n: usize::try_from(raw[3]).map_err(|_| bad_dim("n", raw[3]))?,
            mb: usize::try_from(raw[4]).map_err(|_| bad_dim("mb", raw[4]))?,
            nb: usize::try_from(raw[5]).map_err(|_| bad_dim("nb", raw[5]))?,
            rsrc: usize::try_from(raw[6]).map_err(|_| bad_dim("rsrc", raw[6]))?,
            csrc: usize::try_from(raw[7]).map_err(|_| bad_dim("csrc", raw[7]))?,
            lld: usize::try_from(raw[8]).map_err(|_| bad_dim("lld", raw[8]))?,
        };
        if desc.dtype != DTYPE_BLOCK_CYCLIC {
            return Err(Error::invalid_argument(format!(
                "unsupported descriptor type {}",
                desc.dtype
            )));
        }
        if desc.mb == 0 || desc.nb == 0 {
            return Err(Error::invalid_argument(
                "descriptor tile dimensions must be positive".to_string(),
            ));
        }
        if desc.rsrc != 0 || desc.csrc != 0 {
            return Err(Error::invalid_argument(
                "shifted source grids are not supported".to_string(),
            ));
        }
        Ok(desc)
    }
}

fn bad_dim(name: &str, value: i64) -> Error {
    Error::invalid_argument(format!("descriptor field {} out of range: {}", name, value))
}

/// Resolves an opaque descriptor context to process-grid facts.
pub trait GridInfo {
    /// Grid shape and this rank's coordinates for `context`:
    /// `(p, q, my_row, my_col)`.
    fn grid(&self, context: i64) -> (usize, usize, usize, usize);
}

/// Factor the sub-matrix at tile-aligned element offset (`ia`, `ja`)
/// (1-based, ABI convention) of the described matrix, in place.
///
/// On return `*info` is 0 on success or a negative engine-failure code
/// (-1 invalid argument, -2 out of memory, -3 communication failure,
/// -4 kernel failure, -5 internal). Singular inputs are *not* failures:
/// they complete with `*info == 0` and warn through the observability
/// hook.
///
/// # Safety
///
/// `local` must point to this rank's block-cyclic buffer as described by
/// `desc`, valid and unaliased for the duration of the call.
pub unsafe fn getrf_nopiv_from_desc<S: Scalar>(
    raw_desc: &[i64; 9],
    local: *mut S,
    ia: usize,
    ja: usize,
    grid_info: &dyn GridInfo,
    comm: Arc<dyn Communicator>,
    target: Target,
    info: &mut i32,
) {
    *info = match shim_call(raw_desc, local, ia, ja, grid_info, comm, target) {
        Ok(()) => 0,
        Err(e) => {
            warn!(error = %e, "descriptor driver call failed");
            match e {
                Error::InvalidArgument { .. } => -1,
                Error::OutOfMemory { .. } => -2,
                Error::CommunicationFailure { .. } => -3,
                Error::KernelFailure { .. } | Error::NumericSingular { .. } => -4,
                Error::Internal { .. } => -5,
            }
        }
    };
}

unsafe fn shim_call<S: Scalar>(
    raw_desc: &[i64; 9],
    local: *mut S,
    ia: usize,
    ja: usize,
    grid_info: &dyn GridInfo,
    comm: Arc<dyn Communicator>,
    target: Target,
) -> Result<()> {
    let desc = Descriptor::from_raw(raw_desc)?;
    let (p, q, _my_row, _my_col) = grid_info.grid(desc.context);
    let grid = ProcessGrid::new(p, q)?;

    if ia == 0 || ja == 0 {
        return Err(Error::invalid_argument(
            "ia/ja are 1-based element offsets".to_string(),
        ));
    }
    if (ia - 1) % desc.mb != 0 || (ja - 1) % desc.nb != 0 {
        return Err(Error::invalid_argument(format!(
            "offset ({}, {}) is not tile-aligned for {}x{} tiles",
            ia, ja, desc.mb, desc.nb
        )));
    }

    let a = Matrix::<S>::from_user_layout(
        local,
        desc.m,
        desc.n,
        desc.mb,
        desc.nb,
        desc.lld,
        grid,
        comm,
        MatrixConfig::default(),
    )?;
    let i0 = (ia - 1) / desc.mb;
    let j0 = (ja - 1) / desc.nb;
    let view = a.sub(i0, a.mt().saturating_sub(1), j0, a.nt().saturating_sub(1))?;

    let opts = Options::new()
        .with(OptionKey::Target, OptionValue::Target(target))
        .with(OptionKey::Lookahead, OptionValue::Int(1));
    let diag = Diagnostics::new();
    driver::getrf_nopiv(&view, &opts, &diag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_comm::SingleRank;

    struct OneByOne;

    impl GridInfo for OneByOne {
        fn grid(&self, _context: i64) -> (usize, usize, usize, usize) {
            (1, 1, 0, 0)
        }
    }

    fn desc_4x4() -> [i64; 9] {
        [DTYPE_BLOCK_CYCLIC, 0, 4, 4, 2, 2, 0, 0, 4]
    }

    #[test]
    fn test_shim_factors_in_place() {
        let mut local = vec![
            10.0, 1.0, 2.0, 0.0, 1.0, 8.0, 0.0, 1.0, 2.0, 0.0, 7.0, 1.0, 0.0, 1.0, 1.0, 6.0,
        ];
        let original = local.clone();
        let mut info = -99;
        unsafe {
            getrf_nopiv_from_desc::<f64>(
                &desc_4x4(),
                local.as_mut_ptr(),
                1,
                1,
                &OneByOne,
                Arc::new(SingleRank),
                Target::HostTask,
                &mut info,
            );
        }
        assert_eq!(info, 0);
        // Rebuild L*U from the overwritten buffer and compare.
        let n = 4;
        for j in 0..n {
            for i in 0..n {
                let mut acc = 0.0;
                for k in 0..n {
                    let l = if i > k {
                        local[i + k * n]
                    } else if i == k {
                        1.0
                    } else {
                        0.0
                    };
                    let u = if k <= j { local[k + j * n] } else { 0.0 };
                    acc += l * u;
                }
                assert!((acc - original[i + j * n]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_shim_rejects_bad_descriptor() {
        let mut local = vec![0.0_f64; 16];
        let mut bad = desc_4x4();
        bad[0] = 7; // unknown descriptor type
        let mut info = 0;
        unsafe {
            getrf_nopiv_from_desc::<f64>(
                &bad,
                local.as_mut_ptr(),
                1,
                1,
                &OneByOne,
                Arc::new(SingleRank),
                Target::HostTask,
                &mut info,
            );
        }
        assert_eq!(info, -1);
    }

    #[test]
    fn test_shim_rejects_unaligned_offset() {
        let mut local = vec![0.0_f64; 16];
        let mut info = 0;
        unsafe {
            getrf_nopiv_from_desc::<f64>(
                &desc_4x4(),
                local.as_mut_ptr(),
                2,
                1,
                &OneByOne,
                Arc::new(SingleRank),
                Target::HostTask,
                &mut info,
            );
        }
        assert_eq!(info, -1);
    }
}
