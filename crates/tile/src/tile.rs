//! Tile: a strided rectangular block of scalars
//!
//! Tiles either own their buffer (allocated through an [`Arena`]) or borrow
//! it from a user-provided block-cyclic layout, in which case the engine
//! never frees the memory. Each tile carries its coherence state: the
//! origin flag (this replica is the canonical copy), the modified flag, and
//! a hold count that pins the replica against reclamation.
//!
//! [`Arena`]: crate::arena::Arena

use crate::device::DeviceId;
use mosaic_core::{Error, Result, Scalar};
use num_traits::Zero;

/// Element order within a tile buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Fortran order: element (i, j) at `i + j * lld`.
    ColumnMajor,
    /// C order: element (i, j) at `i * lld + j`.
    RowMajor,
}

#[derive(Debug)]
enum TileBuf<S> {
    Owned(Vec<S>),
    Borrowed { ptr: *mut S, len: usize },
}

// Borrowed buffers point into a user layout that the caller promised (via
// the unsafe constructor) outlives the matrix and is not aliased by another
// tile. With that contract upheld, moving or sharing the wrapper across
// threads is sound.
unsafe impl<S: Send> Send for TileBuf<S> {}
unsafe impl<S: Sync> Sync for TileBuf<S> {}

impl<S: Scalar> TileBuf<S> {
    fn as_slice(&self) -> &[S] {
        match self {
            TileBuf::Owned(v) => v,
            TileBuf::Borrowed { ptr, len } => unsafe {
                std::slice::from_raw_parts(*ptr, *len)
            },
        }
    }

    fn as_mut_slice(&mut self) -> &mut [S] {
        match self {
            TileBuf::Owned(v) => v,
            TileBuf::Borrowed { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(*ptr, *len)
            },
        }
    }
}

/// A contiguous (up to a stride) rectangular block of scalars.
#[derive(Debug)]
pub struct Tile<S: Scalar> {
    mb: usize,
    nb: usize,
    lld: usize,
    layout: Layout,
    device: DeviceId,
    origin: bool,
    modified: bool,
    hold: u32,
    buf: TileBuf<S>,
}

impl<S: Scalar> Tile<S> {
    /// Allocate a zero-filled tile with the natural leading dimension.
    pub fn new(mb: usize, nb: usize, device: DeviceId, layout: Layout) -> Self {
        let buf = vec![S::zero(); mb * nb];
        Self::from_buffer(buf, mb, nb, device, layout)
    }

    /// Wrap an owned buffer of exactly `mb * nb` elements.
    ///
    /// The leading dimension is the natural one for `layout` (`mb` for
    /// column-major, `nb` for row-major).
    pub fn from_buffer(buf: Vec<S>, mb: usize, nb: usize, device: DeviceId, layout: Layout) -> Self {
        assert_eq!(buf.len(), mb * nb, "tile buffer length mismatch");
        let lld = match layout {
            Layout::ColumnMajor => mb,
            Layout::RowMajor => nb,
        };
        Self {
            mb,
            nb,
            lld,
            layout,
            device,
            origin: true,
            modified: false,
            hold: 0,
            buf: TileBuf::Owned(buf),
        }
    }

    /// Wrap external storage without copying or taking ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a buffer valid for reads and writes over the
    /// strided span of this tile (`lld * (nb - 1) + mb` elements for
    /// column-major), must outlive the tile, and must not be aliased by any
    /// other tile or live Rust reference while the tile exists.
    pub unsafe fn from_raw_parts(
        ptr: *mut S,
        mb: usize,
        nb: usize,
        lld: usize,
        device: DeviceId,
        layout: Layout,
    ) -> Self {
        let len = match layout {
            Layout::ColumnMajor => {
                assert!(lld >= mb, "leading dimension below tile rows");
                if nb == 0 {
                    0
                } else {
                    lld * (nb - 1) + mb
                }
            }
            Layout::RowMajor => {
                assert!(lld >= nb, "leading dimension below tile cols");
                if mb == 0 {
                    0
                } else {
                    lld * (mb - 1) + nb
                }
            }
        };
        Self {
            mb,
            nb,
            lld,
            layout,
            device,
            origin: true,
            modified: false,
            hold: 0,
            buf: TileBuf::Borrowed { ptr, len },
        }
    }

    /// Rows in this tile.
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Columns in this tile.
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Leading dimension.
    pub fn lld(&self) -> usize {
        self.lld
    }

    /// Element order.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Memory space this replica lives in.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// True if this replica is the canonical copy.
    pub fn is_origin(&self) -> bool {
        self.origin
    }

    /// Mark this replica as the canonical copy. Idempotent.
    pub fn set_origin(&mut self, origin: bool) {
        self.origin = origin;
    }

    /// True if this replica has local modifications.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Flag local modification of this replica.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// Clear the modified flag (after the bytes were propagated).
    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    /// Current hold count.
    pub fn hold(&self) -> u32 {
        self.hold
    }

    /// Pin this replica against reclamation. Holds stack.
    pub fn acquire_hold(&mut self) {
        self.hold += 1;
    }

    /// Release one hold.
    pub fn release_hold(&mut self) {
        self.hold = self.hold.saturating_sub(1);
    }

    fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.mb && j < self.nb);
        match self.layout {
            Layout::ColumnMajor => i + j * self.lld,
            Layout::RowMajor => i * self.lld + j,
        }
    }

    /// Read element (i, j).
    pub fn get(&self, i: usize, j: usize) -> S {
        self.buf.as_slice()[self.idx(i, j)]
    }

    /// Write element (i, j).
    pub fn set(&mut self, i: usize, j: usize, value: S) {
        let idx = self.idx(i, j);
        self.buf.as_mut_slice()[idx] = value;
    }

    /// Raw strided storage.
    pub fn data(&self) -> &[S] {
        self.buf.as_slice()
    }

    /// Raw strided storage, mutable.
    pub fn data_mut(&mut self) -> &mut [S] {
        self.buf.as_mut_slice()
    }

    /// True when the tile owns its buffer (arena-allocated).
    pub fn owns_buffer(&self) -> bool {
        matches!(self.buf, TileBuf::Owned(_))
    }

    /// Take the owned buffer out for arena reclamation.
    ///
    /// Returns `None` for borrowed (user-layout) storage.
    pub fn into_buffer(self) -> Option<Vec<S>> {
        match self.buf {
            TileBuf::Owned(v) => Some(v),
            TileBuf::Borrowed { .. } => None,
        }
    }

    /// Copy all elements from `src`, which must have the same shape.
    ///
    /// Leading dimensions and layouts may differ; strided runs are copied
    /// contiguously when both sides share the layout.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a shape mismatch.
    pub fn copy_from(&mut self, src: &Tile<S>) -> Result<()> {
        if self.mb != src.mb || self.nb != src.nb {
            return Err(Error::invalid_argument(format!(
                "tile copy shape mismatch: {}x{} vs {}x{}",
                self.mb, self.nb, src.mb, src.nb
            )));
        }
        if self.layout == src.layout {
            let (runs, run_len, dst_ld, src_ld) = match self.layout {
                Layout::ColumnMajor => (self.nb, self.mb, self.lld, src.lld),
                Layout::RowMajor => (self.mb, self.nb, self.lld, src.lld),
            };
            let src_data = src.data();
            let dst_data = self.buf.as_mut_slice();
            for r in 0..runs {
                let d = r * dst_ld;
                let s = r * src_ld;
                dst_data[d..d + run_len].copy_from_slice(&src_data[s..s + run_len]);
            }
        } else {
            for j in 0..self.nb {
                for i in 0..self.mb {
                    let v = src.get(i, j);
                    self.set(i, j, v);
                }
            }
        }
        Ok(())
    }

    /// Pack the tile into a dense column-major vector of `mb * nb`
    /// elements, independent of stride and layout. Used for wire framing.
    pub fn to_contiguous(&self) -> Vec<S> {
        let mut out = Vec::with_capacity(self.mb * self.nb);
        for j in 0..self.nb {
            for i in 0..self.mb {
                out.push(self.get(i, j));
            }
        }
        out
    }

    /// Fill the tile from a dense column-major vector of `mb * nb`
    /// elements.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a length mismatch.
    pub fn fill_from_contiguous(&mut self, data: &[S]) -> Result<()> {
        if data.len() != self.mb * self.nb {
            return Err(Error::invalid_argument(format!(
                "contiguous fill length {} does not match {}x{} tile",
                data.len(),
                self.mb,
                self.nb
            )));
        }
        for j in 0..self.nb {
            for i in 0..self.mb {
                self.set(i, j, data[i + j * self.mb]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_column_major() {
        let mut t: Tile<f64> = Tile::new(3, 2, DeviceId::HOST, Layout::ColumnMajor);
        t.set(2, 1, 7.0);
        assert_eq!(t.get(2, 1), 7.0);
        assert_eq!(t.data()[2 + 1 * 3], 7.0);
    }

    #[test]
    fn test_indexing_row_major() {
        let mut t: Tile<f64> = Tile::new(3, 2, DeviceId::HOST, Layout::RowMajor);
        t.set(2, 1, 7.0);
        assert_eq!(t.data()[2 * 2 + 1], 7.0);
    }

    #[test]
    fn test_holds_stack() {
        let mut t: Tile<f32> = Tile::new(2, 2, DeviceId::HOST, Layout::ColumnMajor);
        t.acquire_hold();
        t.acquire_hold();
        t.release_hold();
        assert_eq!(t.hold(), 1);
        t.release_hold();
        t.release_hold(); // extra release must not underflow
        assert_eq!(t.hold(), 0);
    }

    #[test]
    fn test_copy_from_different_lld() {
        // Source tile borrowed from a padded 4x2 buffer with lld 4.
        let mut backing = vec![0.0_f64; 8];
        for j in 0..2 {
            for i in 0..3 {
                backing[i + j * 4] = (i * 10 + j) as f64;
            }
        }
        let src = unsafe {
            Tile::from_raw_parts(backing.as_mut_ptr(), 3, 2, 4, DeviceId::HOST, Layout::ColumnMajor)
        };
        let mut dst: Tile<f64> = Tile::new(3, 2, DeviceId::HOST, Layout::ColumnMajor);
        dst.copy_from(&src).unwrap();
        for j in 0..2 {
            for i in 0..3 {
                assert_eq!(dst.get(i, j), (i * 10 + j) as f64);
            }
        }
    }

    #[test]
    fn test_copy_shape_mismatch_rejected() {
        let src: Tile<f64> = Tile::new(2, 2, DeviceId::HOST, Layout::ColumnMajor);
        let mut dst: Tile<f64> = Tile::new(3, 2, DeviceId::HOST, Layout::ColumnMajor);
        assert!(dst.copy_from(&src).is_err());
    }

    #[test]
    fn test_contiguous_round_trip() {
        let mut t: Tile<f64> = Tile::new(2, 3, DeviceId::HOST, Layout::RowMajor);
        for j in 0..3 {
            for i in 0..2 {
                t.set(i, j, (i + 10 * j) as f64);
            }
        }
        let packed = t.to_contiguous();
        let mut u: Tile<f64> = Tile::new(2, 3, DeviceId::HOST, Layout::ColumnMajor);
        u.fill_from_contiguous(&packed).unwrap();
        for j in 0..3 {
            for i in 0..2 {
                assert_eq!(u.get(i, j), t.get(i, j));
            }
        }
    }

    #[test]
    fn test_borrowed_buffer_is_not_reclaimable() {
        let mut backing = vec![1.0_f64; 4];
        let t = unsafe {
            Tile::from_raw_parts(backing.as_mut_ptr(), 2, 2, 2, DeviceId::HOST, Layout::ColumnMajor)
        };
        assert!(!t.owns_buffer());
        assert!(t.into_buffer().is_none());
    }
}
