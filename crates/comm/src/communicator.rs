//! The communicator trait and the single-rank degenerate case

use mosaic_core::{Error, Result};

/// Ranked point-to-point transport with (source, tag) receive matching.
///
/// Semantics the engine relies on:
/// - sends are asynchronous and never block on the receiver;
/// - messages between one (source, destination) pair are delivered in send
///   order;
/// - `recv` blocks until a message from `source` with exactly `tag`
///   arrives, buffering non-matching traffic for later calls.
///
/// During a driver call the communicator must not carry unrelated traffic;
/// tag discipline inside one driver iteration keeps concurrent broadcasts
/// from colliding.
pub trait Communicator: Send + Sync {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Send `payload` to `dest` under `tag`.
    ///
    /// # Errors
    ///
    /// `CommunicationFailure` on transport failure.
    fn send(&self, dest: usize, tag: u64, payload: Vec<u8>) -> Result<()>;

    /// Receive the next payload from `source` with `tag`.
    ///
    /// # Errors
    ///
    /// `CommunicationFailure` on transport failure.
    fn recv(&self, source: usize, tag: u64) -> Result<Vec<u8>>;
}

/// Communicator for a 1x1 process grid. There are no peers; any attempt to
/// actually transfer bytes is an error, but broadcasts whose destination
/// set is the local rank never reach this point.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleRank;

impl Communicator for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: u64, _payload: Vec<u8>) -> Result<()> {
        Err(Error::comm(format!(
            "send to rank {} on a single-rank communicator",
            dest
        )))
    }

    fn recv(&self, source: usize, _tag: u64) -> Result<Vec<u8>> {
        Err(Error::comm(format!(
            "recv from rank {} on a single-rank communicator",
            source
        )))
    }
}
