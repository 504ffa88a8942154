//! Broadcast tag spaces
//!
//! Within one driver iteration, broadcasts that could collide on identical
//! (source, destination) pairs must use disjoint tags. The factorization
//! drivers carve the 64-bit tag space as follows:
//!
//! - panel-row broadcasts are tagged by their source row index `i`;
//! - trailing-column broadcasts are tagged `j + mt`, which cannot meet the
//!   panel-row space because every row index is below `mt`;
//! - lookahead-column broadcasts are tagged by their destination column
//!   `j`. These never collide with panel-row tags: a panel-row broadcast
//!   with tag `i` originates from tile (i, k), a lookahead broadcast with
//!   the same numeric tag originates from tile (k, j = i) — different
//!   source tiles, different (source, destination) pairs.

/// Tag for broadcasting panel tile (i, k) across row `i`.
pub fn panel_row(i: usize) -> u64 {
    i as u64
}

/// Tag for broadcasting trailing tile (k, j) down column `j`, offset out of
/// the panel-row space by the matrix row-tile count.
pub fn trailing_col(j: usize, mt: usize) -> u64 {
    (j + mt) as u64
}

/// Tag for broadcasting lookahead tile (k, j) down column `j`.
pub fn lookahead_col(j: usize) -> u64 {
    j as u64
}
