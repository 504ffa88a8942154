//! In-process rank mesh
//!
//! `mesh(n)` builds `n` fully connected ranks over unbounded channels. Each
//! rank's receive side implements MPI-style matching: a receive names a
//! (source, tag) pair, and traffic that does not match is stashed until a
//! later receive claims it. Multiple worker threads may receive on the same
//! rank concurrently — exactly one of them pumps the channel at a time, the
//! rest park on a condvar until the stash changes.
//!
//! This is the transport the multi-rank tests run on; an MPI binding would
//! implement [`Communicator`] the same way against a real fabric.

use crate::communicator::Communicator;
use crossbeam_channel::{unbounded, Receiver, Sender};
use mosaic_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

struct Packet {
    source: usize,
    tag: u64,
    payload: Vec<u8>,
}

/// One rank of an in-process mesh.
pub struct MeshComm {
    rank: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    stash: Mutex<Vec<Packet>>,
    stash_changed: Condvar,
    pumping: AtomicBool,
}

/// Build a fully connected mesh of `size` ranks.
///
/// Element `r` of the returned vector is rank `r`'s communicator; hand each
/// one to its own thread.
pub fn mesh(size: usize) -> Vec<MeshComm> {
    let mut senders = Vec::with_capacity(size);
    let mut receivers = Vec::with_capacity(size);
    for _ in 0..size {
        let (tx, rx) = unbounded();
        senders.push(tx);
        receivers.push(rx);
    }
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| MeshComm {
            rank,
            peers: senders.clone(),
            inbox,
            stash: Mutex::new(Vec::new()),
            stash_changed: Condvar::new(),
            pumping: AtomicBool::new(false),
        })
        .collect()
}

impl Communicator for MeshComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: u64, payload: Vec<u8>) -> Result<()> {
        let sender = self.peers.get(dest).ok_or_else(|| {
            Error::comm(format!("rank {} out of range for mesh of {}", dest, self.peers.len()))
        })?;
        trace!(from = self.rank, to = dest, tag, bytes = payload.len(), "mesh send");
        sender
            .send(Packet {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::comm(format!("rank {} is gone", dest)))
    }

    fn recv(&self, source: usize, tag: u64) -> Result<Vec<u8>> {
        loop {
            {
                let mut stash = self.stash.lock();
                loop {
                    if let Some(pos) = stash
                        .iter()
                        .position(|p| p.source == source && p.tag == tag)
                    {
                        let pkt = stash.remove(pos);
                        trace!(at = self.rank, from = source, tag, "mesh recv matched");
                        return Ok(pkt.payload);
                    }
                    // One thread pumps the channel; the rest wait for the
                    // stash to change.
                    if self
                        .pumping
                        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        break;
                    }
                    self.stash_changed.wait(&mut stash);
                }
            }

            let pkt = self.inbox.recv();
            match pkt {
                Ok(pkt) => {
                    // The pumping flag stays set until the packet is
                    // visible in the stash; releasing it earlier would let
                    // another thread start pumping and park on the channel
                    // while its match sits here unseen.
                    let mut stash = self.stash.lock();
                    stash.push(pkt);
                    self.pumping.store(false, Ordering::Release);
                    self.stash_changed.notify_all();
                }
                Err(_) => {
                    // Wake waiters so they observe the failure too instead
                    // of parking forever.
                    let _stash = self.stash.lock();
                    self.pumping.store(false, Ordering::Release);
                    self.stash_changed.notify_all();
                    return Err(Error::comm(format!(
                        "mesh rank {} lost all peers while waiting for ({}, {})",
                        self.rank, source, tag
                    )));
                }
            }
        }
    }
}
