//! Distributed tiled matrices
//!
//! This crate provides the matrix substrate of the engine:
//! - `ProcessGrid` and pluggable block-cyclic tile ownership
//! - `Matrix<S>`: the distributed tile grid with a per-tile replica table
//! - O(1) sub-matrix, transpose, and conjugate-transpose views
//! - storage specializations (general, triangular, Hermitian/symmetric,
//!   band)
//! - tile broadcast keyed by destination views and 64-bit tags
//! - user-layout import (wrap a block-cyclic buffer without copying)

pub mod bcast;
pub mod grid;
pub mod import;
pub mod matrix;
pub mod ownership;

pub use bcast::{BcastEntry, BcastList};
pub use grid::ProcessGrid;
pub use matrix::{
    BatchArrays, DiagKind, Matrix, MatrixConfig, MatrixKind, Op, TileRef, Uplo,
};
pub use ownership::{BlockCyclic, TileOwner};
