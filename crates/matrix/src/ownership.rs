//! Tile ownership maps
//!
//! The owner function decides which grid coordinates own tile (i, j). It
//! is pluggable per matrix instance and fixed after construction; the
//! default is the classic 2-D block-cyclic map.

/// Maps a tile index to the grid coordinates of its owner.
pub trait TileOwner: Send + Sync {
    /// Owner of tile (i, j) as (grid row, grid column).
    fn owner(&self, i: usize, j: usize) -> (usize, usize);
}

/// 2-D block-cyclic ownership: tile (i, j) belongs to (i mod P, j mod Q).
#[derive(Debug, Clone, Copy)]
pub struct BlockCyclic {
    p: usize,
    q: usize,
}

impl BlockCyclic {
    /// Block-cyclic map over a P x Q grid.
    pub fn new(p: usize, q: usize) -> Self {
        Self { p, q }
    }
}

impl TileOwner for BlockCyclic {
    fn owner(&self, i: usize, j: usize) -> (usize, usize) {
        (i % self.p, j % self.q)
    }
}
