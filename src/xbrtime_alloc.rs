use crate::env_var::Alloc;
use crate::error::{invalid_arg, XbrtimeError, XbrtimeResult};

use enum_dispatch::enum_dispatch;
use indexmap::IndexSet;
use std::collections::BTreeMap;

/// Granularity of every symmetric block
pub(crate) const ALLOC_ALIGN: usize = 8;

/// Round `size` up to [ALLOC_ALIGN], failing if that leaves the address space
pub(crate) fn align_size(size: usize) -> XbrtimeResult<usize> {
    size.checked_add(ALLOC_ALIGN - 1)
        .map(|padded| padded & !(ALLOC_ALIGN - 1))
        .ok_or(XbrtimeError::OutOfSymmetricMemory { requested: size })
}

/// Local bookkeeping for the symmetric arena.
///
/// Implementations must be deterministic: the same sequence of `try_malloc`
/// and `free` calls always produces the same addresses. That, plus every PE
/// issuing the same sequence, is the whole symmetry guarantee; nothing here
/// talks to other PEs.
#[enum_dispatch]
pub(crate) trait SymmetricAlloc {
    fn init(&mut self, start_addr: usize, size: usize, max_allocs: usize);
    /// Reserve `size` bytes (already aligned), returning the block address
    fn try_malloc(&mut self, size: usize) -> XbrtimeResult<usize>;
    /// Release the block at `addr`, returning its size
    fn free(&mut self, addr: usize) -> XbrtimeResult<usize>;
    /// Live blocks as (addr, size), in address order
    fn allocations(&self) -> Vec<(usize, usize)>;
    fn mem_occupied(&self) -> usize;
}

#[enum_dispatch(SymmetricAlloc)]
#[derive(Clone, Debug)]
pub(crate) enum HeapAlloc {
    BTreeAlloc,
    LinearAlloc,
}

impl HeapAlloc {
    pub(crate) fn new(kind: Alloc, id: String) -> HeapAlloc {
        match kind {
            Alloc::Btree => BTreeAlloc::new(id).into(),
            Alloc::Linear => LinearAlloc::new(id).into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Vma {
    addr: usize,
    size: usize,
}

/// First fit over an address ordered list of live blocks
#[derive(Clone, Debug)]
pub(crate) struct LinearAlloc {
    entries: Vec<Vma>,
    start_addr: usize,
    max_size: usize,
    max_allocs: usize,
    id: String,
}

impl LinearAlloc {
    pub(crate) fn new(id: String) -> LinearAlloc {
        LinearAlloc {
            entries: Vec::new(),
            start_addr: 0,
            max_size: 0,
            max_allocs: 0,
            id,
        }
    }
}

impl SymmetricAlloc for LinearAlloc {
    fn init(&mut self, start_addr: usize, size: usize, max_allocs: usize) {
        self.start_addr = start_addr;
        self.max_size = size;
        self.max_allocs = max_allocs;
        self.entries.clear();
    }

    fn try_malloc(&mut self, size: usize) -> XbrtimeResult<usize> {
        if self.entries.len() >= self.max_allocs {
            return Err(XbrtimeError::OutOfSymmetricMemory { requested: size });
        }
        let mut prev_end = self.start_addr;
        let mut idx = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.addr - prev_end >= size {
                idx = i;
                break;
            }
            prev_end = entry.addr + entry.size;
        }
        let arena_end = self.start_addr + self.max_size;
        if size <= arena_end - prev_end {
            self.entries.insert(
                idx,
                Vma {
                    addr: prev_end,
                    size,
                },
            );
            Ok(prev_end)
        } else {
            tracing::debug!("{} out of memory for {} bytes", self.id, size);
            Err(XbrtimeError::OutOfSymmetricMemory { requested: size })
        }
    }

    fn free(&mut self, addr: usize) -> XbrtimeResult<usize> {
        match self.entries.binary_search_by_key(&addr, |vma| vma.addr) {
            Ok(i) => Ok(self.entries.remove(i).size),
            Err(_) => Err(XbrtimeError::InvalidFree(crate::SymAddr(addr))),
        }
    }

    fn allocations(&self) -> Vec<(usize, usize)> {
        self.entries.iter().map(|vma| (vma.addr, vma.size)).collect()
    }

    fn mem_occupied(&self) -> usize {
        self.entries.iter().map(|vma| vma.size).sum()
    }
}

#[derive(Clone, Debug)]
struct FreeEntries {
    sizes: BTreeMap<usize, IndexSet<usize>>, //<size,<Vec<addr>>
    addrs: BTreeMap<usize, usize>,           //<addr,size>
}

impl FreeEntries {
    fn new() -> FreeEntries {
        FreeEntries {
            sizes: BTreeMap::new(),
            addrs: BTreeMap::new(),
        }
    }

    fn insert(&mut self, addr: usize, size: usize) {
        self.addrs.insert(addr, size);
        self.sizes
            .entry(size)
            .or_insert_with(IndexSet::new)
            .insert(addr);
    }

    fn remove(&mut self, addr: usize, size: usize) {
        self.addrs.remove(&addr);
        let mut remove_size = false;
        if let Some(addrs) = self.sizes.get_mut(&size) {
            addrs.shift_remove(&addr);
            remove_size = addrs.is_empty();
        }
        if remove_size {
            self.sizes.remove(&size);
        }
    }
}

/// Best fit: free blocks indexed by size, merged with their neighbours on free
#[derive(Clone, Debug)]
pub(crate) struct BTreeAlloc {
    free_entries: FreeEntries,
    allocated_addrs: BTreeMap<usize, usize>, //<addr,size>
    start_addr: usize,
    max_size: usize,
    max_allocs: usize,
    id: String,
}

impl BTreeAlloc {
    pub(crate) fn new(id: String) -> BTreeAlloc {
        BTreeAlloc {
            free_entries: FreeEntries::new(),
            allocated_addrs: BTreeMap::new(),
            start_addr: 0,
            max_size: 0,
            max_allocs: 0,
            id,
        }
    }
}

impl SymmetricAlloc for BTreeAlloc {
    fn init(&mut self, start_addr: usize, size: usize, max_allocs: usize) {
        self.start_addr = start_addr;
        self.max_size = size;
        self.max_allocs = max_allocs;
        self.free_entries = FreeEntries::new();
        self.allocated_addrs.clear();
        self.free_entries.insert(start_addr, size);
    }

    fn try_malloc(&mut self, size: usize) -> XbrtimeResult<usize> {
        if self.allocated_addrs.len() >= self.max_allocs {
            return Err(XbrtimeError::OutOfSymmetricMemory { requested: size });
        }
        //find smallest memory segment greater than or equal to size, lowest address first
        let (free_size, addr) = match self.free_entries.sizes.range(size..).next() {
            Some((free_size, addrs)) => match addrs.iter().min() {
                Some(addr) => (*free_size, *addr),
                None => return Err(invalid_arg(format!("{} corrupt free list", self.id))),
            },
            None => {
                tracing::debug!("{} out of memory for {} bytes", self.id, size);
                return Err(XbrtimeError::OutOfSymmetricMemory { requested: size });
            }
        };
        self.free_entries.remove(addr, free_size);
        if free_size != size {
            self.free_entries.insert(addr + size, free_size - size);
        }
        self.allocated_addrs.insert(addr, size);
        Ok(addr)
    }

    fn free(&mut self, addr: usize) -> XbrtimeResult<usize> {
        let size = self
            .allocated_addrs
            .remove(&addr)
            .ok_or(XbrtimeError::InvalidFree(crate::SymAddr(addr)))?;
        let mut temp_addr = addr;
        let mut temp_size = size;
        let mut remove: Vec<(usize, usize)> = vec![];
        if let Some((faddr, fsize)) = self.free_entries.addrs.range(..addr).next_back() {
            //look at address before addr
            if faddr + fsize == addr {
                temp_addr = *faddr;
                temp_size = fsize + size;
                remove.push((*faddr, *fsize));
            }
        }
        if let Some((faddr, fsize)) = self.free_entries.addrs.range(addr..).next() {
            //look at address after addr
            if temp_addr + temp_size == *faddr {
                temp_size += fsize;
                remove.push((*faddr, *fsize));
            }
        }
        for (raddr, rsize) in remove {
            self.free_entries.remove(raddr, rsize);
        }
        self.free_entries.insert(temp_addr, temp_size);
        Ok(size)
    }

    fn allocations(&self) -> Vec<(usize, usize)> {
        self.allocated_addrs
            .iter()
            .map(|(addr, size)| (*addr, *size))
            .collect()
    }

    fn mem_occupied(&self) -> usize {
        self.allocated_addrs.values().sum()
    }
}
