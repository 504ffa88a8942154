//! Per-device tile memory arena
//!
//! Each device (host included) gets one arena. The arena vends zeroed,
//! exactly-sized tile buffers against a byte capacity and keeps released
//! buffers on per-size free lists for reuse. Allocation fails with
//! `OutOfMemory` only when the capacity is exhausted and purging the free
//! lists does not make room.

use crate::device::DeviceId;
use crate::tile::{Layout, Tile};
use mosaic_core::{Error, Result, Scalar};
use num_traits::Zero;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

struct ArenaInner<S> {
    /// Bytes in live (vended, not yet released) buffers.
    used: usize,
    /// Bytes parked on the free lists.
    cached: usize,
    free: FxHashMap<usize, Vec<Vec<S>>>,
}

/// Pool of tile buffers for one device.
pub struct Arena<S: Scalar> {
    device: DeviceId,
    capacity: usize,
    inner: Mutex<ArenaInner<S>>,
}

impl<S: Scalar> Arena<S> {
    /// Create an arena with a byte capacity. `usize::MAX` means unbounded.
    pub fn new(device: DeviceId, capacity: usize) -> Self {
        Self {
            device,
            capacity,
            inner: Mutex::new(ArenaInner {
                used: 0,
                cached: 0,
                free: FxHashMap::default(),
            }),
        }
    }

    /// Device this arena serves.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Byte capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently vended.
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    /// Allocate a zeroed `mb` x `nb` tile on this arena's device.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the request cannot be satisfied even after
    /// purging the free lists.
    pub fn allocate(&self, mb: usize, nb: usize, layout: Layout) -> Result<Tile<S>> {
        let len = mb * nb;
        let bytes = len * std::mem::size_of::<S>();
        let mut inner = self.inner.lock();

        let buf = if let Some(list) = inner.free.get_mut(&len) {
            let buf = list.pop();
            if let Some(mut buf) = buf {
                inner.cached -= bytes;
                buf.fill(S::zero());
                Some(buf)
            } else {
                None
            }
        } else {
            None
        };

        let buf = match buf {
            Some(buf) => buf,
            None => {
                if inner.used + inner.cached + bytes > self.capacity {
                    // Purge cached buffers before giving up.
                    let freed = inner.cached;
                    inner.free.clear();
                    inner.cached = 0;
                    if freed > 0 {
                        debug!(device = %self.device, freed, "arena purged free lists under pressure");
                    }
                }
                if inner.used + bytes > self.capacity {
                    return Err(Error::out_of_memory(self.device.0, bytes, self.capacity));
                }
                vec![S::zero(); len]
            }
        };

        inner.used += bytes;
        drop(inner);
        Ok(Tile::from_buffer(buf, mb, nb, self.device, layout))
    }

    /// Return a tile's buffer to the pool.
    ///
    /// A held tile is not reclaimed — it is handed back to the caller, and
    /// the release is a no-op. Borrowed (user-layout) tiles release their
    /// accounting without parking a buffer.
    pub fn release(&self, tile: Tile<S>) -> Option<Tile<S>> {
        if tile.hold() > 0 {
            return Some(tile);
        }
        let len = tile.mb() * tile.nb();
        let bytes = len * std::mem::size_of::<S>();
        match tile.into_buffer() {
            Some(buf) => {
                let mut inner = self.inner.lock();
                inner.used -= bytes;
                inner.cached += bytes;
                inner.free.entry(len).or_default().push(buf);
            }
            None => {
                // Borrowed storage: nothing to park.
            }
        }
        None
    }
}
