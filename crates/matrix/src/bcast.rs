//! Tile broadcast
//!
//! A broadcast sends one tile from its owner to every rank owning at least
//! one stored tile of a destination view. All ranks of the grid execute
//! the same broadcast call: the owner sends, recipients receive into
//! non-origin workspace replicas, everyone else falls straight through. A
//! broadcast whose destination views touch no rank is a no-op.
//!
//! Tags come from the caller; within one driver iteration the engine keeps
//! (source tile, tag) pairs collision-free (see `mosaic_comm::tags`).

use crate::matrix::Matrix;
use mosaic_comm::{decode_into, encode_tile};
use mosaic_core::{Result, Scalar};
use mosaic_tile::Layout;
use rustc_hash::FxHashSet;
use tracing::trace;

/// One broadcast: source tile (i, j) of the matrix the list is applied to,
/// a set of destination views, and a tag.
pub struct BcastEntry<S: Scalar> {
    /// Source tile row (view coordinates).
    pub i: usize,
    /// Source tile column (view coordinates).
    pub j: usize,
    /// Destination views; the recipient set is every rank owning a stored
    /// tile of any of them.
    pub dests: Vec<Matrix<S>>,
    /// Broadcast tag.
    pub tag: u64,
}

/// A sequence of broadcasts issued as one operation.
pub type BcastList<S> = Vec<BcastEntry<S>>;

impl<S: Scalar> Matrix<S> {
    /// Broadcast view tile (i, j) from its owner to every rank touched by
    /// `dest`.
    pub fn tile_bcast(&self, i: usize, j: usize, dest: Matrix<S>, layout: Layout, tag: u64) -> Result<()> {
        self.list_bcast(
            vec![BcastEntry {
                i,
                j,
                dests: vec![dest],
                tag,
            }],
            layout,
        )
    }

    /// Issue a list of broadcasts in order.
    pub fn list_bcast(&self, list: BcastList<S>, layout: Layout) -> Result<()> {
        for entry in &list {
            self.bcast_one(entry, layout)?;
        }
        Ok(())
    }

    /// Multithreaded list broadcast: entries may be reordered or
    /// overlapped, but each tile is delivered intact. Tag matching on the
    /// receive side makes the overlap safe.
    pub fn list_bcast_mt(&self, list: BcastList<S>, layout: Layout) -> Result<()> {
        if list.len() <= 1 {
            return self.list_bcast(list, layout);
        }
        let mut first_err = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = list
                .iter()
                .map(|entry| scope.spawn(move || self.bcast_one(entry, layout)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                    Err(_) => {
                        if first_err.is_none() {
                            first_err =
                                Some(mosaic_core::Error::internal("broadcast thread panicked"));
                        }
                    }
                }
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn bcast_one(&self, entry: &BcastEntry<S>, layout: Layout) -> Result<()> {
        let mut recipients: FxHashSet<usize> = FxHashSet::default();
        for dest in &entry.dests {
            for i in 0..dest.mt() {
                for j in 0..dest.nt() {
                    if dest.tile_is_stored(i, j) {
                        recipients.insert(dest.tile_owner(i, j));
                    }
                }
            }
        }
        if recipients.is_empty() {
            return Ok(());
        }

        let me = self.inner.comm.rank();
        let owner = self.tile_owner(entry.i, entry.j);
        if me == owner {
            let needs_wire = recipients.iter().any(|r| *r != me);
            if needs_wire {
                // A device kernel may have promoted the origin off-host;
                // the wire always carries the authoritative bytes.
                self.tile_update_origin(entry.i, entry.j)?;
                let tile_ref = self.tile(entry.i, entry.j)?;
                let bytes = encode_tile(&*tile_ref.read())?;
                for &rank in &recipients {
                    if rank == me {
                        continue;
                    }
                    trace!(i = entry.i, j = entry.j, to = rank, tag = entry.tag, "tile bcast send");
                    self.inner.comm.send(rank, entry.tag, bytes.clone())?;
                }
            }
        } else if recipients.contains(&me) {
            let bytes = self.inner.comm.recv(owner, entry.tag)?;
            let tile_ref = self.workspace_tile(entry.i, entry.j, layout)?;
            decode_into(&bytes, &mut tile_ref.write())?;
            trace!(i = entry.i, j = entry.j, from = owner, tag = entry.tag, "tile bcast recv");
        }
        Ok(())
    }
}
