use crate::error::{XbrtimeError, XbrtimeResult};
use crate::fabric::SymAddr;

use std::collections::HashMap;
use std::sync::Arc;

/// Resolves logical PE numbers to the targets used by the remote primitives.
///
/// This is the single place where PE-to-hardware-target translation and
/// reachability are decided, so transfer and collective code never needs to
/// change when the topology does.
pub trait PeArch: Send + Sync {
    /// The number of PEs in the group
    fn num_pes(&self) -> usize;
    /// Map a logical PE number to the id the remote primitives expect
    fn decode_pe(&self, logical_pe: usize) -> usize;
    /// Whether `addr` on (physical) `pe` may be accessed
    fn addr_accessible(&self, addr: SymAddr, pe: usize) -> bool;
}

/// Pass-through topology: logical and physical ids coincide and everything is reachable.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct IdentityArch {
    num_pes: usize,
}

impl IdentityArch {
    pub fn new(num_pes: usize) -> IdentityArch {
        IdentityArch { num_pes }
    }
}

impl PeArch for IdentityArch {
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn decode_pe(&self, logical_pe: usize) -> usize {
        logical_pe
    }
    fn addr_accessible(&self, _addr: SymAddr, _pe: usize) -> bool {
        true
    }
}

/// A logical to physical PE table with a bounded accessible heap window.
///
/// Logical PEs missing from the table decode to themselves.
///
/// # Examples
///```
/// use xbrtime::{MappedArch, PeArch, SymAddr};
///
/// // logical pe 0 lives on physical node 3 and vice versa
/// let arch = MappedArch::new(4, &[(0, 3), (3, 0)], SymAddr(256), 4096).unwrap();
/// assert_eq!(arch.decode_pe(0), 3);
/// assert_eq!(arch.decode_pe(1), 1);
///```
#[derive(Clone, Debug)]
pub struct MappedArch {
    num_pes: usize,
    map: HashMap<usize, usize>,
    heap_start: SymAddr,
    heap_size: usize,
}

impl MappedArch {
    pub fn new(
        num_pes: usize,
        map: &[(usize, usize)],
        heap_start: SymAddr,
        heap_size: usize,
    ) -> XbrtimeResult<MappedArch> {
        let mut logical_map = HashMap::new();
        let mut seen = HashMap::new();
        for &(logical, physical) in map {
            for pe in [logical, physical] {
                if pe >= num_pes {
                    return Err(XbrtimeError::InvalidPe { pe, num_pes });
                }
            }
            if seen.insert(physical, logical).is_some() || logical_map.contains_key(&logical) {
                return Err(XbrtimeError::InvalidPe { pe: physical, num_pes });
            }
            logical_map.insert(logical, physical);
        }
        Ok(MappedArch {
            num_pes,
            map: logical_map,
            heap_start,
            heap_size,
        })
    }
}

impl PeArch for MappedArch {
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn decode_pe(&self, logical_pe: usize) -> usize {
        match self.map.get(&logical_pe) {
            Some(physical) => *physical,
            None => logical_pe,
        }
    }
    fn addr_accessible(&self, addr: SymAddr, pe: usize) -> bool {
        if pe >= self.num_pes {
            return false;
        }
        addr >= self.heap_start && addr.0 <= self.heap_start.0 + self.heap_size
    }
}

#[derive(Clone)]
pub(crate) enum ArchEnum {
    Identity(IdentityArch),
    Mapped(MappedArch),
    Dynamic(Arc<dyn PeArch>),
}

impl std::fmt::Debug for ArchEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchEnum::Identity(_) => write!(f, "IdentityArch"),
            ArchEnum::Mapped(_) => write!(f, "MappedArch"),
            ArchEnum::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

impl ArchEnum {
    pub(crate) fn new<A>(arch: A) -> ArchEnum
    where
        A: PeArch + 'static,
    {
        let any_arch = &arch as &dyn std::any::Any;
        if let Some(identity) = any_arch.downcast_ref::<IdentityArch>() {
            ArchEnum::Identity(*identity)
        } else if let Some(mapped) = any_arch.downcast_ref::<MappedArch>() {
            ArchEnum::Mapped(mapped.clone())
        } else {
            ArchEnum::Dynamic(Arc::new(arch))
        }
    }
}

impl PeArch for ArchEnum {
    fn num_pes(&self) -> usize {
        match self {
            ArchEnum::Identity(arch) => arch.num_pes(),
            ArchEnum::Mapped(arch) => arch.num_pes(),
            ArchEnum::Dynamic(arch) => arch.num_pes(),
        }
    }
    fn decode_pe(&self, logical_pe: usize) -> usize {
        match self {
            ArchEnum::Identity(arch) => arch.decode_pe(logical_pe),
            ArchEnum::Mapped(arch) => arch.decode_pe(logical_pe),
            ArchEnum::Dynamic(arch) => arch.decode_pe(logical_pe),
        }
    }
    fn addr_accessible(&self, addr: SymAddr, pe: usize) -> bool {
        match self {
            ArchEnum::Identity(arch) => arch.addr_accessible(addr, pe),
            ArchEnum::Mapped(arch) => arch.addr_accessible(addr, pe),
            ArchEnum::Dynamic(arch) => arch.addr_accessible(addr, pe),
        }
    }
}
