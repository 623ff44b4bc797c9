use crate::error::{XbrtimeError, XbrtimeResult};

use enum_dispatch::enum_dispatch;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) mod local_fabric;
pub(crate) mod remote;
pub(crate) mod segment;
pub(crate) mod threads_fabric;

pub use remote::{Reducible, Remote};
use local_fabric::LocalComm;
use segment::Segment;
use threads_fabric::ThreadComm;

/// Largest group the barrier slot banks can serve
pub const MAX_PES: usize = 1024;
/// ceil(log2(MAX_PES))
pub(crate) const MAX_BARRIER_ROUNDS: usize = 10;
/// The two sense banks of barrier slots occupy the start of every segment
pub(crate) const BARRIER_BANKS: SymAddr = SymAddr(0);
/// The symmetric heap arena starts right after the (padded) barrier banks
pub(crate) const HEAP_START: SymAddr = SymAddr(256);

/// A symmetric address: a byte offset into a PE's symmetric segment.
///
/// The same value names the same location on every PE, which is what lets a
/// block allocated in lockstep be addressed remotely without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SymAddr(pub usize);

impl SymAddr {
    /// The raw byte offset
    pub fn offset(&self) -> usize {
        self.0
    }

    /// The address `bytes` further into the segment
    pub fn byte_add(&self, bytes: usize) -> SymAddr {
        SymAddr(self.0 + bytes)
    }

    /// The address of element `index` of a `T` array starting here
    pub fn elem<T>(&self, index: usize) -> SymAddr {
        SymAddr(self.0 + index * std::mem::size_of::<T>())
    }
}

impl std::fmt::LowerHex for SymAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The list of available fabric backends, used to specify how data moves between PEs
#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
pub enum Backend {
    /// A single PE in a single process
    Local,
    /// One thread per PE inside a single process, each with its own segment
    Threads,
}

/// Bytes moved to and from other PEs through a PE's fabric handle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommStats {
    pub bytes_put: usize,
    pub bytes_get: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CommCounters {
    put_amt: AtomicUsize,
    get_amt: AtomicUsize,
}

impl CommCounters {
    fn stats(&self) -> CommStats {
        CommStats {
            bytes_put: self.put_amt.load(Ordering::Relaxed),
            bytes_get: self.get_amt.load(Ordering::Relaxed),
        }
    }
}

#[enum_dispatch]
pub(crate) trait CommInfo {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    fn segment_size(&self) -> usize;
}

/// The extended-address primitive contract: single element remote store,
/// load and swap keyed by the target PE, plus a full fence.
pub(crate) trait CommRemote: CommInfo {
    fn segment(&self, pe: usize) -> XbrtimeResult<&Segment>;
    fn counters(&self) -> &CommCounters;

    fn check_pe(&self, pe: usize) -> XbrtimeResult<()> {
        if pe < self.num_pes() {
            Ok(())
        } else {
            Err(XbrtimeError::InvalidPe {
                pe,
                num_pes: self.num_pes(),
            })
        }
    }

    fn remote_write<T: Remote>(&self, addr: SymAddr, pe: usize, val: T) -> XbrtimeResult<()> {
        self.segment(pe)?.store(addr, pe, val)?;
        if pe != self.my_pe() {
            self.counters()
                .put_amt
                .fetch_add(std::mem::size_of::<T>(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn remote_read<T: Remote>(&self, addr: SymAddr, pe: usize) -> XbrtimeResult<T> {
        let val = self.segment(pe)?.load(addr, pe)?;
        if pe != self.my_pe() {
            self.counters()
                .get_amt
                .fetch_add(std::mem::size_of::<T>(), Ordering::Relaxed);
        }
        Ok(val)
    }

    fn remote_atomic_swap<T: Remote>(&self, addr: SymAddr, pe: usize, val: T) -> XbrtimeResult<T> {
        self.segment(pe)?.swap(addr, pe, val)
    }

    fn fence(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    fn stats(&self) -> CommStats {
        self.counters().stats()
    }
}

#[enum_dispatch(CommInfo)]
#[derive(Debug)]
pub(crate) enum Comm {
    Local(LocalComm),
    Threads(ThreadComm),
}

// generic methods cannot go through enum_dispatch
impl Comm {
    pub(crate) fn remote_write<T: Remote>(
        &self,
        addr: SymAddr,
        pe: usize,
        val: T,
    ) -> XbrtimeResult<()> {
        match self {
            Comm::Local(comm) => comm.remote_write(addr, pe, val),
            Comm::Threads(comm) => comm.remote_write(addr, pe, val),
        }
    }
    pub(crate) fn remote_read<T: Remote>(&self, addr: SymAddr, pe: usize) -> XbrtimeResult<T> {
        match self {
            Comm::Local(comm) => comm.remote_read(addr, pe),
            Comm::Threads(comm) => comm.remote_read(addr, pe),
        }
    }
    pub(crate) fn remote_atomic_swap<T: Remote>(
        &self,
        addr: SymAddr,
        pe: usize,
        val: T,
    ) -> XbrtimeResult<T> {
        match self {
            Comm::Local(comm) => comm.remote_atomic_swap(addr, pe, val),
            Comm::Threads(comm) => comm.remote_atomic_swap(addr, pe, val),
        }
    }
    pub(crate) fn fence(&self) {
        match self {
            Comm::Local(comm) => comm.fence(),
            Comm::Threads(comm) => comm.fence(),
        }
    }
    pub(crate) fn stats(&self) -> CommStats {
        match self {
            Comm::Local(comm) => comm.stats(),
            Comm::Threads(comm) => comm.stats(),
        }
    }
    /// Zero a range of this PE's own segment
    pub(crate) fn zero_local(&self, addr: SymAddr, len: usize) -> XbrtimeResult<()> {
        let my_pe = self.my_pe();
        match self {
            Comm::Local(comm) => comm.segment(my_pe)?.zero(addr, len, my_pe),
            Comm::Threads(comm) => comm.segment(my_pe)?.zero(addr, len, my_pe),
        }
    }
}
