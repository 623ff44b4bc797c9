use crate::barrier::{Barrier, BarrierRound};
use crate::env_var::{config, Alloc};
use crate::error::{invalid_arg, XbrtimeError, XbrtimeResult};
use crate::fabric::local_fabric::LocalComm;
use crate::fabric::threads_fabric::{ThreadComm, ThreadFabric};
use crate::fabric::{Backend, Comm, CommInfo, CommStats, Remote, SymAddr, HEAP_START, MAX_PES};
use crate::warnings::RuntimeWarning;
use crate::xbrtime_alloc::{align_size, HeapAlloc, SymmetricAlloc};
use crate::xbrtime_arch::{ArchEnum, IdentityArch, PeArch};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::*;

/// One PE's view of the runtime: its identity, its symmetric heap and its
/// handle onto the fabric.
///
/// Every transfer, collective and barrier is issued through a `World`.
/// Heap operations must be performed in the same order, with the same sizes,
/// on every PE; nothing checks this, and a PE that deviates makes every later
/// symmetric address meaningless.
pub struct World {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    pub(crate) arch: ArchEnum,
    pub(crate) comm: Arc<Comm>,
    barrier: Barrier,
    alloc: Mutex<HeapAlloc>,
    heap_size: usize,
    closed: bool,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("backend", &self.comm.backend())
            .field("arch", &self.arch)
            .field("heap_size", &self.heap_size)
            .field("segment_size", &self.comm.segment_size())
            .finish()
    }
}

impl World {
    fn new(
        my_pe: usize,
        arch: ArchEnum,
        comm: Arc<Comm>,
        alloc: Alloc,
        mem_slots: usize,
        heap_size: usize,
    ) -> World {
        let mut heap = HeapAlloc::new(alloc, format!("pe{my_pe}_heap"));
        heap.init(HEAP_START.0, heap_size, mem_slots);
        World {
            my_pe,
            num_pes: comm.num_pes(),
            barrier: Barrier::new(my_pe, arch.clone(), comm.clone()),
            arch,
            comm,
            alloc: Mutex::new(heap),
            heap_size,
            closed: false,
        }
    }

    /// Returns the id of this PE
    ///
    /// # Examples
    ///```
    /// use xbrtime::WorldBuilder;
    ///
    /// let pes = WorldBuilder::new()
    ///     .with_num_pes(4)
    ///     .launch(|world| {
    ///         let my_pe = world.my_pe();
    ///         world.close().unwrap();
    ///         my_pe
    ///     })
    ///     .unwrap();
    /// assert_eq!(pes, vec![0, 1, 2, 3]);
    ///```
    pub fn my_pe(&self) -> usize {
        self.my_pe
    }

    /// Returns the number of PEs in the group
    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn backend(&self) -> Backend {
        self.comm.backend()
    }

    /// Size in bytes of the symmetric heap on every PE
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// The target id the remote primitives use for logical PE `pe`
    pub fn decode_pe(&self, pe: usize) -> usize {
        self.arch.decode_pe(pe)
    }

    /// Whether `addr` on logical PE `pe` is reachable under the current topology
    pub fn addr_accessible(&self, addr: SymAddr, pe: usize) -> bool {
        pe < self.num_pes && self.arch.addr_accessible(addr, self.arch.decode_pe(pe))
    }

    /// Bytes this PE has moved to and from other PEs
    pub fn stats(&self) -> CommStats {
        self.comm.stats()
    }

    /// Physical id of this PE's own segment
    pub(crate) fn home(&self) -> usize {
        self.comm.my_pe()
    }

    pub(crate) fn check_pe(&self, pe: usize) -> XbrtimeResult<()> {
        if pe < self.num_pes {
            Ok(())
        } else {
            Err(XbrtimeError::InvalidPe {
                pe,
                num_pes: self.num_pes,
            })
        }
    }

    /// Global synchronization point: returns once every PE has entered.
    ///
    /// Every PE must call this the same number of times; a PE that never
    /// arrives blocks the others forever.
    #[tracing::instrument(skip_all)]
    pub fn barrier(&self) -> XbrtimeResult<()> {
        self.barrier.barrier()
    }

    /// A barrier that also returns, per round, the logical PE signalled and
    /// the logical PE whose signal was received
    #[doc(hidden)]
    pub fn barrier_traced(&self) -> XbrtimeResult<Vec<BarrierRound>> {
        self.barrier.barrier_traced()
    }

    /// Full memory fence on this PE
    pub fn fence(&self) {
        self.comm.fence()
    }

    /// Reserve `size` bytes (rounded up to 8) on the symmetric heap.
    ///
    /// The returned address is the same on every PE provided all PEs issue the
    /// same sequence of `malloc`/`free` calls.
    ///
    /// # Examples
    ///```
    /// let world = xbrtime::init().unwrap();
    /// let addr = world.malloc(10 * std::mem::size_of::<u64>()).unwrap();
    /// world.free(addr).unwrap();
    /// world.close().unwrap();
    ///```
    #[tracing::instrument(skip_all)]
    pub fn malloc(&self, size: usize) -> XbrtimeResult<SymAddr> {
        if size == 0 {
            return Err(invalid_arg("malloc size must be non-zero"));
        }
        let addr = self.alloc.lock().try_malloc(align_size(size)?)?;
        self.comm.fence();
        debug!(pe = self.my_pe, addr, size, "malloc");
        Ok(SymAddr(addr))
    }

    /// Release a block, zeroing its bytes so a later allocation starts clean
    #[tracing::instrument(skip_all)]
    pub fn free(&self, addr: SymAddr) -> XbrtimeResult<()> {
        let size = self.alloc.lock().free(addr.0)?;
        self.comm.zero_local(addr, size)?;
        self.comm.fence();
        debug!(pe = self.my_pe, addr = addr.0, size, "free");
        Ok(())
    }

    /// Bytes currently allocated on the symmetric heap
    pub fn mem_occupied(&self) -> usize {
        self.alloc.lock().mem_occupied()
    }

    /// Number of live symmetric blocks
    pub fn num_allocations(&self) -> usize {
        self.alloc.lock().allocations().len()
    }

    /// Read one element of this PE's symmetric memory
    pub fn read_local<T: Remote>(&self, addr: SymAddr) -> XbrtimeResult<T> {
        self.comm.remote_read(addr, self.home())
    }

    /// Write one element of this PE's symmetric memory
    pub fn write_local<T: Remote>(&self, addr: SymAddr, val: T) -> XbrtimeResult<()> {
        self.comm.remote_write(addr, self.home(), val)
    }

    /// Read `len` contiguous elements of this PE's symmetric memory
    pub fn read_local_slice<T: Remote>(&self, addr: SymAddr, len: usize) -> XbrtimeResult<Vec<T>> {
        self.check_local_extent::<T>(addr, len, 1)?;
        (0..len).map(|i| self.read_local(addr.elem::<T>(i))).collect()
    }

    /// Write `vals` contiguously into this PE's symmetric memory
    pub fn write_local_slice<T: Remote>(&self, addr: SymAddr, vals: &[T]) -> XbrtimeResult<()> {
        self.check_local_extent::<T>(addr, vals.len(), 1)?;
        for (i, val) in vals.iter().enumerate() {
            self.write_local(addr.elem::<T>(i), *val)?;
        }
        Ok(())
    }

    /// Collective shutdown: barrier, fence, then release whatever is still
    /// allocated. Every PE must call it.
    #[tracing::instrument(skip_all)]
    pub fn close(mut self) -> XbrtimeResult<()> {
        self.closed = true;
        self.shutdown()
    }

    fn shutdown(&self) -> XbrtimeResult<()> {
        self.barrier.barrier()?;
        self.comm.fence();
        let leaked = self.alloc.lock().allocations();
        if !leaked.is_empty() {
            let bytes = leaked.iter().map(|(_, size)| size).sum();
            RuntimeWarning::LeakedAllocations(self.my_pe, leaked.len(), bytes).print();
            for (addr, _) in leaked {
                self.free(SymAddr(addr))?;
            }
        }
        debug!(pe = self.my_pe, "closed");
        Ok(())
    }
}

impl Drop for World {
    #[tracing::instrument(skip_all)]
    fn drop(&mut self) {
        // a panicking pe cannot take part in the closing barrier
        if self.closed || std::thread::panicking() {
            return;
        }
        RuntimeWarning::UnclosedWorld(self.my_pe).print();
        if let Err(e) = self.shutdown() {
            error!(pe = self.my_pe, "failed to close world: {e}");
        }
    }
}

/// Initialize a single PE world with the environment configuration.
///
/// Multi-PE programs use [WorldBuilder::launch].
pub fn init() -> XbrtimeResult<World> {
    WorldBuilder::new().with_num_pes(1).build()
}

/// An implementation of the Builder design pattern, used to construct [World]s.
///
/// Defaults come from the `XBRTIME_*` environment variables (see [Config][crate::Config]).
///
/// # Examples
///
///```
/// use xbrtime::WorldBuilder;
///
/// let sums = WorldBuilder::new()
///     .with_num_pes(4)
///     .launch(|world| {
///         let addr = world.malloc(8).unwrap();
///         world.write_local(addr, world.my_pe() as u64).unwrap();
///         world.reduce_sum::<u64>(addr, addr, 1, 1, 0).unwrap();
///         let sum = world.read_local::<u64>(addr).unwrap();
///         world.close().unwrap();
///         sum
///     })
///     .unwrap();
/// assert_eq!(sums[0], 6);
///```
#[derive(Debug)]
pub struct WorldBuilder {
    num_pes: usize,
    heap_size: usize,
    alloc: Alloc,
    mem_slots: usize,
    arch: Option<ArchEnum>,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        WorldBuilder::new()
    }
}

impl WorldBuilder {
    #[tracing::instrument(skip_all)]
    pub fn new() -> WorldBuilder {
        let config = config();
        WorldBuilder {
            num_pes: config.num_pes,
            heap_size: config.heap_size,
            alloc: config.alloc,
            mem_slots: config.mem_slots,
            arch: None,
        }
    }

    /// Number of PEs [launch][WorldBuilder::launch] spawns
    pub fn with_num_pes(mut self, num_pes: usize) -> WorldBuilder {
        self.num_pes = num_pes;
        self
    }

    /// Bytes of symmetric heap per PE
    pub fn with_heap_size(mut self, heap_size: usize) -> WorldBuilder {
        self.heap_size = heap_size;
        self
    }

    pub fn with_alloc(mut self, alloc: Alloc) -> WorldBuilder {
        self.alloc = alloc;
        self
    }

    /// Maximum number of live symmetric blocks per PE
    pub fn with_mem_slots(mut self, mem_slots: usize) -> WorldBuilder {
        self.mem_slots = mem_slots;
        self
    }

    /// Replace the default [IdentityArch] topology
    pub fn with_arch<A: PeArch + 'static>(mut self, arch: A) -> WorldBuilder {
        self.arch = Some(ArchEnum::new(arch));
        self
    }

    fn validate(&self) -> XbrtimeResult<ArchEnum> {
        if self.num_pes == 0 {
            return Err(invalid_arg("num_pes must be non-zero"));
        }
        if self.num_pes > MAX_PES {
            return Err(XbrtimeError::TooManyPes {
                num_pes: self.num_pes,
                max: MAX_PES,
            });
        }
        if self.heap_size == 0 {
            return Err(invalid_arg("heap_size must be non-zero"));
        }
        let arch = match &self.arch {
            Some(arch) => arch.clone(),
            None => ArchEnum::new(IdentityArch::new(self.num_pes)),
        };
        if arch.num_pes() != self.num_pes {
            return Err(invalid_arg(format!(
                "topology describes {} pes, world has {}",
                arch.num_pes(),
                self.num_pes
            )));
        }
        // every pe needs a segment of its own
        let mut homes = vec![false; self.num_pes];
        for pe in 0..self.num_pes {
            let home = arch.decode_pe(pe);
            if home >= self.num_pes || homes[home] {
                return Err(XbrtimeError::InvalidPe {
                    pe: home,
                    num_pes: self.num_pes,
                });
            }
            homes[home] = true;
        }
        Ok(arch)
    }

    /// The aligned heap size and the full segment size (barrier banks plus heap)
    fn segment_layout(&self) -> XbrtimeResult<(usize, usize)> {
        let too_large = || invalid_arg(format!("heap_size {} is too large", self.heap_size));
        let heap_size = align_size(self.heap_size).map_err(|_| too_large())?;
        let segment_size = HEAP_START.0.checked_add(heap_size).ok_or_else(too_large)?;
        Ok((heap_size, segment_size))
    }

    /// Instantiate the single PE world of this process
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> XbrtimeResult<World> {
        if self.num_pes != 1 {
            return Err(invalid_arg(format!(
                "build() creates a single pe world, use launch() for {} pes",
                self.num_pes
            )));
        }
        let arch = self.validate()?;
        let (heap_size, segment_size) = self.segment_layout()?;
        let comm = Arc::new(Comm::from(LocalComm::new(segment_size)?));
        Barrier::reset_slots(&comm, 0)?;
        debug!(heap_size = self.heap_size, "local world initialized");
        Ok(World::new(
            0,
            arch,
            comm,
            self.alloc,
            self.mem_slots,
            heap_size,
        ))
    }

    /// Run `f` once per PE, each on its own thread with its own [World],
    /// returning every PE's result ordered by PE id.
    #[tracing::instrument(skip_all)]
    pub fn launch<F, R>(self, f: F) -> anyhow::Result<Vec<R>>
    where
        F: Fn(World) -> R + Sync,
        R: Send,
    {
        let arch = self.validate()?;
        let (heap_size, segment_size) = self.segment_layout()?;
        let fabric = ThreadFabric::new(self.num_pes, segment_size)?;
        let mut worlds = Vec::with_capacity(self.num_pes);
        for pe in 0..self.num_pes {
            let home = arch.decode_pe(pe);
            let comm = Arc::new(Comm::from(ThreadComm::new(home, fabric.clone())));
            Barrier::reset_slots(&comm, home)?;
            worlds.push(World::new(
                pe,
                arch.clone(),
                comm,
                self.alloc,
                self.mem_slots,
                heap_size,
            ));
        }
        debug!(num_pes = self.num_pes, heap_size = self.heap_size, "launching");

        let f = &f;
        std::thread::scope(|s| -> anyhow::Result<Vec<R>> {
            let mut handles = Vec::with_capacity(worlds.len());
            for world in worlds {
                let pe = world.my_pe;
                let handle = std::thread::Builder::new()
                    .name(format!("xbrtime_pe_{pe}"))
                    .spawn_scoped(s, move || f(world))?;
                handles.push((pe, handle));
            }
            handles
                .into_iter()
                .map(|(pe, handle)| {
                    handle
                        .join()
                        .map_err(|_| anyhow::anyhow!("pe {pe} panicked"))
                })
                .collect()
        })
    }
}
