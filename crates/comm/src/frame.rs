//! Tile wire framing
//!
//! Tiles travel between ranks as a small header plus a dense column-major
//! payload, independent of the sender's stride or layout. Framing errors
//! surface as `CommunicationFailure` — a frame that cannot be decoded means
//! the transport delivered garbage.

use mosaic_core::{Error, Result, Scalar};
use mosaic_tile::Tile;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct TileFrame<S> {
    mb: usize,
    nb: usize,
    data: Vec<S>,
}

/// Encode a tile for the wire.
pub fn encode_tile<S: Scalar>(tile: &Tile<S>) -> Result<Vec<u8>> {
    let frame = TileFrame {
        mb: tile.mb(),
        nb: tile.nb(),
        data: tile.to_contiguous(),
    };
    bincode::serialize(&frame).map_err(|e| Error::comm(format!("tile encode failed: {}", e)))
}

/// Decode a wire frame into an existing tile of matching shape.
///
/// # Errors
///
/// `CommunicationFailure` on a malformed frame or a shape mismatch.
pub fn decode_into<S: Scalar>(bytes: &[u8], tile: &mut Tile<S>) -> Result<()> {
    let frame: TileFrame<S> =
        bincode::deserialize(bytes).map_err(|e| Error::comm(format!("tile decode failed: {}", e)))?;
    if frame.mb != tile.mb() || frame.nb != tile.nb() {
        return Err(Error::comm(format!(
            "tile frame shape {}x{} does not match destination {}x{}",
            frame.mb,
            frame.nb,
            tile.mb(),
            tile.nb()
        )));
    }
    tile.fill_from_contiguous(&frame.data)
}
