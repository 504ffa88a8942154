//! User-layout import
//!
//! Wraps an externally allocated column-major block-cyclic buffer as a
//! distributed matrix without copying. Element (r, c) of the global matrix
//! lives on rank ((r/mb) mod P, (c/nb) mod Q) at local offset
//! ((r/mb/P)*mb + r%mb, (c/nb/Q)*nb + c%nb) with the caller's local
//! leading dimension. The matrix neither owns nor frees the buffer.

use crate::grid::ProcessGrid;
use crate::matrix::{stored, tile_dim, Matrix, MatrixConfig, TileNode};
use mosaic_comm::Communicator;
use mosaic_core::{Error, Result, Scalar};
use mosaic_tile::{DeviceId, Layout, Tile};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

impl<S: Scalar> Matrix<S> {
    /// Wrap a user-provided column-major block-cyclic local buffer.
    ///
    /// `lld` is the local leading dimension; `config.kind` selects which
    /// tiles are materialized (triangular and Hermitian wrappers only
    /// touch tiles on the stored side of the diagonal).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `lld` is below the local row count implied by
    /// the block-cyclic distribution.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid and unaliased for the lifetime of the matrix
    /// and every view derived from it. The engine reads and writes tile
    /// regions of the buffer but never frees it.
    pub unsafe fn from_user_layout(
        buf: *mut S,
        mg: usize,
        ng: usize,
        mb: usize,
        nb: usize,
        lld: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Result<Self> {
        if config.layout != Layout::ColumnMajor {
            return Err(Error::invalid_argument(
                "user-layout import is defined for column-major storage".to_string(),
            ));
        }
        let inner = Self::build_inner(mg, ng, mb, nb, grid, comm, config)?;
        let me = inner.comm.rank();
        let (my_row, _my_col) = inner.grid.coords_of(me);
        let p = inner.grid.p();
        let q = inner.grid.q();

        // Rows this rank stores: every tile row i with i mod P == my grid
        // row contributes its height.
        let local_rows: usize = (0..inner.mt)
            .filter(|i| i % p == my_row)
            .map(|i| tile_dim(mg, mb, i))
            .sum();
        if lld < local_rows.max(1) {
            return Err(Error::invalid_argument(format!(
                "local leading dimension {} below local row count {}",
                lld, local_rows
            )));
        }

        for i in 0..inner.mt {
            for j in 0..inner.nt {
                if !stored(inner.kind, i, j) {
                    continue;
                }
                let (pr, pc) = inner.owner.owner(i, j);
                if inner.grid.rank_of(pr, pc) != me {
                    continue;
                }
                // Local tile coordinates under block-cyclic wrapping.
                let il = i / p;
                let jl = j / q;
                let offset = jl * nb * lld + il * mb;
                let tile = Tile::from_raw_parts(
                    buf.add(offset),
                    tile_dim(mg, mb, i),
                    tile_dim(ng, nb, j),
                    lld,
                    DeviceId::HOST,
                    Layout::ColumnMajor,
                );
                inner.tiles.insert(
                    (i, j),
                    TileNode {
                        replicas: SmallVec::from_iter([(
                            DeviceId::HOST,
                            Arc::new(RwLock::new(tile)),
                        )]),
                    },
                );
            }
        }

        Ok(Self::root(inner))
    }
}
