//! The distributed tiled matrix
//!
//! A `Matrix<S>` is a view onto a shared storage plane: an (Mt x Nt) grid
//! of tiles distributed over a process grid, with a per-tile replica table
//! holding the host origin and any device copies. Views are cheap — `sub`,
//! `transpose` and `conj_transpose` adjust offsets and an op flag on a
//! reference-counted handle, so a view can never outlive its parent's
//! storage.
//!
//! Coherence is explicit. Mutating a replica marks it modified; moving the
//! origin between devices copies the modified bytes synchronously; nothing
//! else keeps replicas in sync behind the caller's back.

use crate::grid::ProcessGrid;
use crate::ownership::{BlockCyclic, TileOwner};
use dashmap::DashMap;
use mosaic_comm::Communicator;
use mosaic_core::{Error, Result, Scalar};
use mosaic_tile::{Arena, DeviceId, Layout, Tile};
use num_traits::Zero;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::Arc;

/// Transposition state of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// As stored.
    NoTrans,
    /// Transposed.
    Trans,
    /// Conjugate-transposed.
    ConjTrans,
}

/// Which triangle of a structured matrix is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uplo {
    /// Upper triangle.
    Upper,
    /// Lower triangle.
    Lower,
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    /// Diagonal elements are implicitly one.
    Unit,
    /// Diagonal elements are stored.
    NonUnit,
}

/// Storage specialization of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// Dense: every tile is stored.
    General,
    /// Triangular: tiles strictly on the wrong side of the diagonal are
    /// not materialized.
    Triangular {
        /// Stored triangle
        uplo: Uplo,
        /// Unit-diagonal flag
        diag: DiagKind,
    },
    /// Hermitian: one triangle stored, the other implied by conjugate
    /// symmetry.
    Hermitian {
        /// Stored triangle
        uplo: Uplo,
    },
    /// Symmetric: one triangle stored, the other implied by symmetry.
    Symmetric {
        /// Stored triangle
        uplo: Uplo,
    },
    /// Banded: tiles outside the band (in tile units) are not stored.
    Band {
        /// Sub-diagonal bandwidth in tiles
        kl: usize,
        /// Super-diagonal bandwidth in tiles
        ku: usize,
    },
}

/// Construction-time knobs.
pub struct MatrixConfig {
    /// Storage specialization.
    pub kind: MatrixKind,
    /// Element order inside tiles.
    pub layout: Layout,
    /// Number of simulated accelerator devices (arenas).
    pub num_devices: usize,
    /// Host arena capacity in bytes.
    pub host_capacity: usize,
    /// Per-device arena capacity in bytes.
    pub device_capacity: usize,
    /// Ownership map; block-cyclic over the process grid when `None`.
    pub owner: Option<Arc<dyn TileOwner>>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            kind: MatrixKind::General,
            layout: Layout::ColumnMajor,
            num_devices: 0,
            host_capacity: usize::MAX,
            device_capacity: usize::MAX,
            owner: None,
        }
    }
}

/// Shared handle to one tile replica.
pub type TileRef<S> = Arc<RwLock<Tile<S>>>;

pub(crate) struct TileNode<S: Scalar> {
    pub(crate) replicas: SmallVec<[(DeviceId, TileRef<S>); 2]>,
}

impl<S: Scalar> TileNode<S> {
    fn replica(&self, device: DeviceId) -> Option<&TileRef<S>> {
        self.replicas
            .iter()
            .find(|(d, _)| *d == device)
            .map(|(_, t)| t)
    }

    fn origin(&self) -> Option<(DeviceId, &TileRef<S>)> {
        self.replicas
            .iter()
            .find(|(_, t)| t.read().is_origin())
            .map(|(d, t)| (*d, t))
    }
}

/// Per-target batched-kernel argument arrays, preallocated so task bodies
/// never grow them.
#[derive(Debug, Default)]
pub struct BatchArrays {
    /// First-operand tile indices.
    pub a: Vec<(usize, usize)>,
    /// Second-operand tile indices.
    pub b: Vec<(usize, usize)>,
    /// Output tile indices.
    pub c: Vec<(usize, usize)>,
}

impl BatchArrays {
    /// Empty the arrays, keeping capacity.
    pub fn clear(&mut self) {
        self.a.clear();
        self.b.clear();
        self.c.clear();
    }
}

pub(crate) struct MatrixInner<S: Scalar> {
    pub(crate) mg: usize,
    pub(crate) ng: usize,
    pub(crate) mb: usize,
    pub(crate) nb: usize,
    pub(crate) mt: usize,
    pub(crate) nt: usize,
    pub(crate) kind: MatrixKind,
    pub(crate) layout: Layout,
    pub(crate) grid: ProcessGrid,
    pub(crate) owner: Arc<dyn TileOwner>,
    pub(crate) comm: Arc<dyn Communicator>,
    pub(crate) tiles: DashMap<(usize, usize), TileNode<S>>,
    pub(crate) host_arena: Arena<S>,
    pub(crate) device_arenas: Vec<Arena<S>>,
    pub(crate) batch: Mutex<BatchArrays>,
}

/// A distributed tiled matrix, or a view of one.
///
/// Cloning clones the view, not the data.
#[derive(Clone)]
pub struct Matrix<S: Scalar> {
    pub(crate) inner: Arc<MatrixInner<S>>,
    /// View origin in parent tile coordinates.
    pub(crate) io: usize,
    pub(crate) jo: usize,
    /// View extent in tiles (post-op orientation).
    pub(crate) mt: usize,
    pub(crate) nt: usize,
    pub(crate) op: Op,
}

impl<S: Scalar> Matrix<S> {
    /// Create a dense distributed matrix with zeroed local tiles.
    pub fn new(
        mg: usize,
        ng: usize,
        mb: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        Self::with_config(mg, ng, mb, nb, grid, comm, MatrixConfig::default())
    }

    /// Create a distributed matrix with explicit configuration.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero tile dimensions or a communicator whose
    /// size does not match the grid; `OutOfMemory` if the host arena
    /// cannot hold the local tiles.
    pub fn with_config(
        mg: usize,
        ng: usize,
        mb: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Result<Self> {
        let inner = Self::build_inner(mg, ng, mb, nb, grid, comm, config)?;

        // Materialize local stored tiles as zeroed host origins.
        let me = inner.comm.rank();
        for i in 0..inner.mt {
            for j in 0..inner.nt {
                if !stored(inner.kind, i, j) {
                    continue;
                }
                let (pr, pc) = inner.owner.owner(i, j);
                if inner.grid.rank_of(pr, pc) != me {
                    continue;
                }
                let tile = inner.host_arena.allocate(
                    tile_dim(inner.mg, inner.mb, i),
                    tile_dim(inner.ng, inner.nb, j),
                    inner.layout,
                )?;
                inner.tiles.insert(
                    (i, j),
                    TileNode {
                        replicas: SmallVec::from_iter([(
                            DeviceId::HOST,
                            Arc::new(RwLock::new(tile)),
                        )]),
                    },
                );
            }
        }

        Ok(Self::root(inner))
    }

    pub(crate) fn build_inner(
        mg: usize,
        ng: usize,
        mb: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Result<Arc<MatrixInner<S>>> {
        if mb == 0 || nb == 0 {
            return Err(Error::invalid_argument(format!(
                "tile dimensions must be positive, got {}x{}",
                mb, nb
            )));
        }
        if comm.size() != grid.size() {
            return Err(Error::invalid_argument(format!(
                "communicator of {} ranks does not cover a {}x{} grid",
                comm.size(),
                grid.p(),
                grid.q()
            )));
        }
        let owner = config
            .owner
            .unwrap_or_else(|| Arc::new(BlockCyclic::new(grid.p(), grid.q())));
        let device_arenas = (0..config.num_devices)
            .map(|d| Arena::new(DeviceId::device(d), config.device_capacity))
            .collect();
        Ok(Arc::new(MatrixInner {
            mg,
            ng,
            mb,
            nb,
            mt: div_ceil(mg, mb),
            nt: div_ceil(ng, nb),
            kind: config.kind,
            layout: config.layout,
            grid,
            owner,
            comm,
            tiles: DashMap::new(),
            host_arena: Arena::new(DeviceId::HOST, config.host_capacity),
            device_arenas,
            batch: Mutex::new(BatchArrays::default()),
        }))
    }

    pub(crate) fn root(inner: Arc<MatrixInner<S>>) -> Self {
        let (mt, nt) = (inner.mt, inner.nt);
        Self {
            inner,
            io: 0,
            jo: 0,
            mt,
            nt,
            op: Op::NoTrans,
        }
    }

    /// Create a matrix and fill local tiles from a dense column-major
    /// global array of `mg * ng` elements. Every rank passes the full
    /// array; each keeps only its local tiles.
    pub fn from_elements(
        mg: usize,
        ng: usize,
        mb: usize,
        nb: usize,
        grid: ProcessGrid,
        comm: Arc<dyn Communicator>,
        data: &[S],
    ) -> Result<Self> {
        if data.len() != mg * ng {
            return Err(Error::invalid_argument(format!(
                "dense input of {} elements does not match {}x{}",
                data.len(),
                mg,
                ng
            )));
        }
        let m = Self::new(mg, ng, mb, nb, grid, comm)?;
        for (i, j) in m.local_stored_tiles() {
            let tile_ref = m.tile(i, j)?;
            let mut tile = tile_ref.write();
            for jj in 0..tile.nb() {
                for ii in 0..tile.mb() {
                    tile.set(ii, jj, data[(i * mb + ii) + (j * nb + jj) * mg]);
                }
            }
        }
        Ok(m)
    }

    // =====================================================================
    // Geometry
    // =====================================================================

    /// Row tiles in this view.
    pub fn mt(&self) -> usize {
        self.mt
    }

    /// Column tiles in this view.
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// Nominal tile rows (parent orientation).
    pub fn mb(&self) -> usize {
        self.inner.mb
    }

    /// Nominal tile columns (parent orientation).
    pub fn nb(&self) -> usize {
        self.inner.nb
    }

    /// Global rows of this view.
    pub fn m(&self) -> usize {
        match self.op {
            Op::NoTrans => self.extent_rows(),
            Op::Trans | Op::ConjTrans => self.extent_cols(),
        }
    }

    /// Global columns of this view.
    pub fn n(&self) -> usize {
        match self.op {
            Op::NoTrans => self.extent_cols(),
            Op::Trans | Op::ConjTrans => self.extent_rows(),
        }
    }

    fn extent_rows(&self) -> usize {
        let (tiles, off) = match self.op {
            Op::NoTrans => (self.mt, self.io),
            Op::Trans | Op::ConjTrans => (self.nt, self.io),
        };
        (0..tiles)
            .map(|i| tile_dim(self.inner.mg, self.inner.mb, off + i))
            .sum()
    }

    fn extent_cols(&self) -> usize {
        let (tiles, off) = match self.op {
            Op::NoTrans => (self.nt, self.jo),
            Op::Trans | Op::ConjTrans => (self.mt, self.jo),
        };
        (0..tiles)
            .map(|j| tile_dim(self.inner.ng, self.inner.nb, off + j))
            .sum()
    }

    /// Transposition state.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Storage specialization.
    pub fn kind(&self) -> MatrixKind {
        self.inner.kind
    }

    /// Element order inside tiles.
    pub fn layout(&self) -> Layout {
        self.inner.layout
    }

    /// The process grid.
    pub fn grid(&self) -> ProcessGrid {
        self.inner.grid
    }

    /// The communicator.
    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.inner.comm
    }

    /// Number of configured device arenas.
    pub fn num_devices(&self) -> usize {
        self.inner.device_arenas.len()
    }

    /// Rows of view tile row `i` (edge tiles are short).
    pub fn tile_rows(&self, i: usize) -> usize {
        let (pi, _) = self.map_tile(i, 0);
        match self.op {
            Op::NoTrans => tile_dim(self.inner.mg, self.inner.mb, pi),
            Op::Trans | Op::ConjTrans => tile_dim(self.inner.ng, self.inner.nb, pi),
        }
    }

    /// Columns of view tile column `j`.
    pub fn tile_cols(&self, j: usize) -> usize {
        let (_, pj) = self.map_tile(0, j);
        match self.op {
            Op::NoTrans => tile_dim(self.inner.ng, self.inner.nb, pj),
            Op::Trans | Op::ConjTrans => tile_dim(self.inner.mg, self.inner.mb, pj),
        }
    }

    /// Map view tile coordinates to parent tile coordinates.
    pub(crate) fn map_tile(&self, i: usize, j: usize) -> (usize, usize) {
        match self.op {
            Op::NoTrans => (self.io + i, self.jo + j),
            Op::Trans | Op::ConjTrans => (self.io + j, self.jo + i),
        }
    }

    // =====================================================================
    // Views
    // =====================================================================

    /// Constant-time sub-matrix view over tile range [i0..=i1] x [j0..=j1]
    /// (view coordinates). An inverted range yields an empty view.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a non-empty range exceeds the view.
    pub fn sub(&self, i0: usize, i1: usize, j0: usize, j1: usize) -> Result<Matrix<S>> {
        let rows = if i1 >= i0 { i1 - i0 + 1 } else { 0 };
        let cols = if j1 >= j0 { j1 - j0 + 1 } else { 0 };
        if (rows > 0 && i1 >= self.mt) || (cols > 0 && j1 >= self.nt) {
            return Err(Error::invalid_argument(format!(
                "sub range [{}..={}] x [{}..={}] exceeds {}x{} tiles",
                i0, i1, j0, j1, self.mt, self.nt
            )));
        }
        let (io, jo) = match self.op {
            Op::NoTrans => (self.io + i0, self.jo + j0),
            Op::Trans | Op::ConjTrans => (self.io + j0, self.jo + i0),
        };
        Ok(Matrix {
            inner: Arc::clone(&self.inner),
            io,
            jo,
            mt: rows,
            nt: cols,
            op: self.op,
        })
    }

    /// O(1) transposed view. `transpose(transpose(A))` is `A`.
    pub fn transpose(&self) -> Matrix<S> {
        let op = match self.op {
            Op::NoTrans => Op::Trans,
            Op::Trans => Op::NoTrans,
            Op::ConjTrans => {
                // Plain conjugation is not a representable view state.
                unreachable_op()
            }
        };
        Matrix {
            inner: Arc::clone(&self.inner),
            io: self.io,
            jo: self.jo,
            mt: self.nt,
            nt: self.mt,
            op,
        }
    }

    /// O(1) conjugate-transposed view. Degenerates to [`transpose`] for
    /// real scalar types.
    ///
    /// [`transpose`]: Matrix::transpose
    pub fn conj_transpose(&self) -> Matrix<S> {
        if !S::IS_COMPLEX {
            return self.transpose();
        }
        let op = match self.op {
            Op::NoTrans => Op::ConjTrans,
            Op::ConjTrans => Op::NoTrans,
            Op::Trans => unreachable_op(),
        };
        Matrix {
            inner: Arc::clone(&self.inner),
            io: self.io,
            jo: self.jo,
            mt: self.nt,
            nt: self.mt,
            op,
        }
    }

    // =====================================================================
    // Ownership
    // =====================================================================

    /// True when view tile (i, j) is materially stored by the
    /// specialization.
    pub fn tile_is_stored(&self, i: usize, j: usize) -> bool {
        let (pi, pj) = self.map_tile(i, j);
        stored(self.inner.kind, pi, pj)
    }

    /// Rank owning view tile (i, j).
    pub fn tile_owner(&self, i: usize, j: usize) -> usize {
        let (pi, pj) = self.map_tile(i, j);
        let (pr, pc) = self.inner.owner.owner(pi, pj);
        self.inner.grid.rank_of(pr, pc)
    }

    /// True when this rank owns view tile (i, j).
    pub fn tile_is_local(&self, i: usize, j: usize) -> bool {
        self.tile_owner(i, j) == self.inner.comm.rank()
    }

    /// View coordinates of every stored tile owned by this rank.
    pub fn local_stored_tiles(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for i in 0..self.mt {
            for j in 0..self.nt {
                if self.tile_is_stored(i, j) && self.tile_is_local(i, j) {
                    out.push((i, j));
                }
            }
        }
        out
    }

    // =====================================================================
    // Tile access and coherence
    // =====================================================================

    /// Host replica of view tile (i, j): the origin on the owner, a
    /// received workspace replica elsewhere.
    ///
    /// # Errors
    ///
    /// `Internal` when no host replica is resident (a missing broadcast).
    pub fn tile(&self, i: usize, j: usize) -> Result<TileRef<S>> {
        self.tile_on(i, j, DeviceId::HOST)
    }

    /// Replica of view tile (i, j) on `device`, creating it from the
    /// current origin if needed. The fresh replica is a coherent snapshot;
    /// it does not become the origin until a kernel writes it and moves
    /// the origin over.
    pub fn tile_on(&self, i: usize, j: usize, device: DeviceId) -> Result<TileRef<S>> {
        let key = self.map_tile(i, j);
        if device.is_host() {
            let node = self.inner.tiles.get(&key).ok_or_else(|| {
                Error::internal(format!("tile ({}, {}) has no resident replica", key.0, key.1))
            })?;
            return node
                .replica(DeviceId::HOST)
                .cloned()
                .ok_or_else(|| {
                    Error::internal(format!("tile ({}, {}) has no host replica", key.0, key.1))
                });
        }

        let arena = self.device_arena(device)?;
        let mut node = self.inner.tiles.get_mut(&key).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) has no resident replica", key.0, key.1))
        })?;
        if let Some(t) = node.replica(device) {
            return Ok(Arc::clone(t));
        }
        // Received workspace tiles carry no origin; snapshot the host
        // replica instead.
        let origin = node
            .origin()
            .map(|(_, t)| t)
            .or_else(|| node.replica(DeviceId::HOST))
            .ok_or_else(|| {
                Error::internal(format!("tile ({}, {}) has no origin replica", key.0, key.1))
            })?;
        let origin = Arc::clone(origin);
        let mut src = origin.write();
        let mut fresh = arena.allocate(src.mb(), src.nb(), src.layout())?;
        fresh.copy_from(&src)?;
        fresh.set_origin(false);
        // The snapshot synchronizes the pair.
        src.clear_modified();
        drop(src);
        let tile_ref = Arc::new(RwLock::new(fresh));
        node.replicas.push((device, Arc::clone(&tile_ref)));
        Ok(tile_ref)
    }

    /// Move the origin of view tile (i, j) to `device`, copying the
    /// current origin's bytes into the destination replica first.
    /// Idempotent when the origin is already there.
    pub fn tile_set_origin(&self, i: usize, j: usize, device: DeviceId) -> Result<()> {
        let key = self.map_tile(i, j);
        // Ensure the destination replica exists before re-locking the node.
        let dest = self.tile_on(i, j, device)?;
        let node = self.inner.tiles.get(&key).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) has no resident replica", key.0, key.1))
        })?;
        let (src_dev, src) = node.origin().ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) has no origin replica", key.0, key.1))
        })?;
        if src_dev == device {
            return Ok(());
        }
        let src = Arc::clone(src);
        drop(node);

        // Only modified origin bytes travel; a clean origin means the
        // destination replica (possibly freshly computed there) already has
        // the authoritative data.
        let src_tile = src.read();
        let mut dst_tile = dest.write();
        if src_tile.is_modified() {
            dst_tile.copy_from(&src_tile)?;
            dst_tile.clear_modified();
        }
        dst_tile.set_origin(true);
        drop(src_tile);
        drop(dst_tile);
        let mut src_tile = src.write();
        src_tile.set_origin(false);
        src_tile.clear_modified();
        Ok(())
    }

    /// Pull view tile (i, j)'s origin back to the host replica.
    pub fn tile_update_origin(&self, i: usize, j: usize) -> Result<()> {
        self.tile_set_origin(i, j, DeviceId::HOST)
    }

    /// Pull every local tile's origin back to host.
    pub fn tile_update_all_origin(&self) -> Result<()> {
        for (i, j) in self.local_stored_tiles() {
            self.tile_update_origin(i, j)?;
        }
        Ok(())
    }

    /// Insert a non-origin host workspace replica for view tile (i, j),
    /// sized from the parent geometry. Used by the broadcast receive path.
    pub fn workspace_tile(&self, i: usize, j: usize, layout: Layout) -> Result<TileRef<S>> {
        let key = self.map_tile(i, j);
        let mut node = self.inner.tiles.entry(key).or_insert_with(|| TileNode {
            replicas: SmallVec::new(),
        });
        if let Some(t) = node.replica(DeviceId::HOST) {
            return Ok(Arc::clone(t));
        }
        let mut tile = self.inner.host_arena.allocate(
            tile_dim(self.inner.mg, self.inner.mb, key.0),
            tile_dim(self.inner.ng, self.inner.nb, key.1),
            layout,
        )?;
        tile.set_origin(false);
        let tile_ref = Arc::new(RwLock::new(tile));
        node.replicas.push((DeviceId::HOST, Arc::clone(&tile_ref)));
        Ok(tile_ref)
    }

    /// Drop every non-origin, unheld replica: received workspace tiles and
    /// device copies. Buffers go back to their arenas.
    pub fn clear_workspace(&self) {
        let mut empty_keys = Vec::new();
        for mut entry in self.inner.tiles.iter_mut() {
            let key = *entry.key();
            let node = entry.value_mut();
            let mut kept: SmallVec<[(DeviceId, TileRef<S>); 2]> = SmallVec::new();
            for (dev, tile_ref) in node.replicas.drain(..) {
                let drop_it = {
                    let t = tile_ref.read();
                    !t.is_origin() && t.hold() == 0
                };
                if drop_it {
                    // The Arc may still be shared with an in-flight task;
                    // only reclaim sole ownership.
                    match Arc::try_unwrap(tile_ref) {
                        Ok(lock) => {
                            let tile = lock.into_inner();
                            let arena = if dev.is_host() {
                                &self.inner.host_arena
                            } else {
                                &self.inner.device_arenas[dev.index().unwrap_or(0)]
                            };
                            arena.release(tile);
                        }
                        Err(shared) => kept.push((dev, shared)),
                    }
                } else {
                    kept.push((dev, tile_ref));
                }
            }
            node.replicas = kept;
            if node.replicas.is_empty() {
                empty_keys.push(key);
            }
        }
        for key in empty_keys {
            self.inner.tiles.remove(&key);
        }
    }

    /// Drop device replicas of view tile (i, j) whose hold count is zero.
    /// The host replica is untouched; a device origin is pulled home first.
    pub fn tile_release_device(&self, i: usize, j: usize) -> Result<()> {
        self.tile_update_origin(i, j)?;
        let key = self.map_tile(i, j);
        if let Some(mut node) = self.inner.tiles.get_mut(&key) {
            let mut kept: SmallVec<[(DeviceId, TileRef<S>); 2]> = SmallVec::new();
            for (dev, tile_ref) in node.replicas.drain(..) {
                if !dev.is_host() && tile_ref.read().hold() == 0 {
                    match Arc::try_unwrap(tile_ref) {
                        Ok(lock) => {
                            self.inner.device_arenas[dev.index().unwrap_or(0)]
                                .release(lock.into_inner());
                        }
                        // Still referenced by an in-flight task; keep it.
                        Err(shared) => kept.push((dev, shared)),
                    }
                } else {
                    kept.push((dev, tile_ref));
                }
            }
            node.replicas = kept;
        }
        Ok(())
    }

    fn device_arena(&self, device: DeviceId) -> Result<&Arena<S>> {
        let idx = device.index().ok_or_else(|| {
            Error::invalid_argument("host is not a device arena".to_string())
        })?;
        self.inner.device_arenas.get(idx).ok_or_else(|| {
            Error::invalid_argument(format!(
                "device {} not configured (have {})",
                device,
                self.inner.device_arenas.len()
            ))
        })
    }

    // =====================================================================
    // Batched-kernel bookkeeping
    // =====================================================================

    /// Preallocate batch argument arrays for `count` batches of
    /// `batch_size` tile triples each.
    pub fn allocate_batch_arrays(&self, batch_size: usize, count: usize) {
        let cap = batch_size * count;
        let mut batch = self.inner.batch.lock();
        batch.a.reserve(cap);
        batch.b.reserve(cap);
        batch.c.reserve(cap);
    }

    /// Probe each device arena for one tile's worth of workspace so
    /// capacity problems surface at driver entry, not mid-pipeline.
    pub fn reserve_device_workspace(&self) -> Result<()> {
        for arena in &self.inner.device_arenas {
            let probe = arena.allocate(self.inner.mb, self.inner.nb, self.inner.layout)?;
            arena.release(probe);
        }
        Ok(())
    }

    /// Run `f` with exclusive access to the batch arrays.
    pub fn with_batch<R>(&self, f: impl FnOnce(&mut BatchArrays) -> R) -> R {
        let mut batch = self.inner.batch.lock();
        f(&mut batch)
    }

    // =====================================================================
    // Element access
    // =====================================================================

    /// Read element (gi, gj) of this view, resolving transposition and the
    /// implied triangle of Hermitian/symmetric storage.
    ///
    /// # Errors
    ///
    /// `Internal` if the element's tile is not resident on this rank.
    pub fn get(&self, gi: usize, gj: usize) -> Result<S> {
        let (pgi, pgj, conj) = self.map_element(gi, gj);
        let (mut ti, mut tj) = (pgi / self.inner.mb, pgj / self.inner.nb);
        let (mut ri, mut rj) = (pgi % self.inner.mb, pgj % self.inner.nb);
        let mut mirror_conj = false;
        if !stored(self.inner.kind, ti, tj) {
            match self.inner.kind {
                MatrixKind::Hermitian { .. } => {
                    std::mem::swap(&mut ti, &mut tj);
                    std::mem::swap(&mut ri, &mut rj);
                    mirror_conj = true;
                }
                MatrixKind::Symmetric { .. } => {
                    std::mem::swap(&mut ti, &mut tj);
                    std::mem::swap(&mut ri, &mut rj);
                }
                // Off-region elements of triangular/band storage are
                // implicit zeros.
                MatrixKind::Triangular { .. } | MatrixKind::Band { .. } => {
                    return Ok(S::zero())
                }
                MatrixKind::General => {
                    return Err(Error::internal(format!(
                        "element ({}, {}) falls outside stored tiles",
                        gi, gj
                    )))
                }
            }
        }
        let node = self.inner.tiles.get(&(ti, tj)).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) not resident for element read", ti, tj))
        })?;
        let tile_ref = node.replica(DeviceId::HOST).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) has no host replica", ti, tj))
        })?;
        let v = tile_ref.read().get(ri, rj);
        let v = if conj ^ mirror_conj { v.conj() } else { v };
        Ok(v)
    }

    /// Write element (gi, gj) of this view's stored region.
    pub fn set(&self, gi: usize, gj: usize, value: S) -> Result<()> {
        let (pgi, pgj, conj) = self.map_element(gi, gj);
        let (ti, tj) = (pgi / self.inner.mb, pgj / self.inner.nb);
        let node = self.inner.tiles.get(&(ti, tj)).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) not resident for element write", ti, tj))
        })?;
        let tile_ref = node.replica(DeviceId::HOST).ok_or_else(|| {
            Error::internal(format!("tile ({}, {}) has no host replica", ti, tj))
        })?;
        let mut tile = tile_ref.write();
        tile.set(pgi % self.inner.mb, pgj % self.inner.nb, if conj { value.conj() } else { value });
        tile.mark_modified();
        Ok(())
    }

    /// Map view element coordinates to parent element coordinates plus a
    /// conjugation flag.
    fn map_element(&self, gi: usize, gj: usize) -> (usize, usize, bool) {
        match self.op {
            Op::NoTrans => (self.io * self.inner.mb + gi, self.jo * self.inner.nb + gj, false),
            Op::Trans => (self.io * self.inner.mb + gj, self.jo * self.inner.nb + gi, false),
            Op::ConjTrans => (self.io * self.inner.mb + gj, self.jo * self.inner.nb + gi, true),
        }
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Rows/cols of tile `t` along a dimension of `total` elements in blocks
/// of `block`.
pub(crate) fn tile_dim(total: usize, block: usize, t: usize) -> usize {
    let start = t * block;
    block.min(total.saturating_sub(start))
}

pub(crate) fn stored(kind: MatrixKind, i: usize, j: usize) -> bool {
    match kind {
        MatrixKind::General => true,
        MatrixKind::Triangular { uplo, .. }
        | MatrixKind::Hermitian { uplo }
        | MatrixKind::Symmetric { uplo } => match uplo {
            Uplo::Lower => i >= j,
            Uplo::Upper => i <= j,
        },
        MatrixKind::Band { kl, ku } => {
            (j <= i + ku) && (i <= j + kl)
        }
    }
}

#[cold]
fn unreachable_op() -> ! {
    panic!("plain conjugation is not a representable view; compose transpose/conj_transpose from NoTrans")
}
