//! Inter-rank communication
//!
//! The engine talks to peers through the [`Communicator`] trait: ranked
//! point-to-point sends and receives matched on (source, tag), the model
//! MPI provides. This crate ships two implementations — [`SingleRank`] for
//! the degenerate one-process grid and [`MeshComm`] for an in-process mesh
//! of ranks connected by channels, which is what the multi-rank tests run
//! on. A real MPI binding is an external collaborator implementing the
//! same trait.
//!
//! Also here: the tile wire framing and the broadcast tag-space helpers
//! whose disjointness the drivers rely on.

pub mod communicator;
pub mod frame;
pub mod mesh;
pub mod tags;

pub use communicator::{Communicator, SingleRank};
pub use frame::{decode_into, encode_tile};
pub use mesh::{mesh, MeshComm};
