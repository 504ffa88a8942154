//! Tiles and tile memory
//!
//! A tile is the unit of ownership, placement, and communication in the
//! engine: a contiguous rectangular block of scalars with a leading
//! dimension, a device placement, and origin/modified/hold state. The arena
//! is the per-device pool that vends and reclaims tile buffers.

pub mod arena;
pub mod device;
pub mod tile;

pub use arena::Arena;
pub use device::DeviceId;
pub use tile::{Layout, Tile};
