//! # Mosaic
//!
//! A tiled distributed dense linear-algebra engine: matrices are grids of
//! tiles spread block-cyclically over a process grid, drivers express
//! factorizations as token-dataflow task graphs, and a tag-disciplined
//! broadcast layer feeds trailing updates while panels are still being
//! factored.
//!
//! # Quick start
//!
//! ```
//! use mosaic::{Diagnostics, Matrix, Options, ProcessGrid, SingleRank};
//! use std::sync::Arc;
//!
//! fn main() -> mosaic::Result<()> {
//!     let grid = ProcessGrid::new(1, 1)?;
//!     let data = vec![4.0, 2.0, 1.0, 0.0,
//!                     2.0, 5.0, 0.0, 1.0,
//!                     1.0, 0.0, 3.0, 0.0,
//!                     0.0, 1.0, 0.0, 2.0];
//!     let a = Matrix::from_elements(4, 4, 2, 2, grid, Arc::new(SingleRank), &data)?;
//!
//!     let diag = Diagnostics::new();
//!     mosaic::getrf_nopiv(&a, &Options::new(), &diag)?;
//!     assert!(diag.is_clean());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The engine is layered as workspace crates: `mosaic-tile` (tiles and
//! per-device arenas), `mosaic-matrix` (the distributed substrate and
//! views), `mosaic-comm` (rank transport and broadcast tags),
//! `mosaic-kernels` (tile kernels and target adapters), and
//! `mosaic-scheduler` (the token-dataflow pool). This crate holds the
//! drivers and the descriptor-based compatibility surface; it re-exports
//! everything a caller needs.

pub mod driver;
pub mod shim;

pub use driver::getrf_nopiv;
pub use mosaic_comm::{mesh, Communicator, MeshComm, SingleRank};
pub use mosaic_core::{
    DiagEvent, Diagnostics, Error, OptionKey, OptionValue, Options, PivotVector, Result, Scalar,
    Target, C32, C64,
};
pub use mosaic_matrix::{
    BcastEntry, BcastList, DiagKind, Matrix, MatrixConfig, MatrixKind, Op, ProcessGrid, Uplo,
};
pub use mosaic_tile::{Arena, DeviceId, Layout, Tile};
pub use shim::{getrf_nopiv_from_desc, Descriptor, GridInfo};
