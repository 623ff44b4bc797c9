use crate::error::{invalid_arg, XbrtimeError, XbrtimeResult};
use crate::fabric::{CommInfo, Remote, SymAddr};
use crate::xbrtime_arch::PeArch;
use crate::World;

use tracing::trace;

/// Address of the last of `count` (non-zero) elements spaced `stride` apart from `addr`
pub(crate) fn last_elem<T>(addr: SymAddr, count: usize, stride: usize) -> XbrtimeResult<SymAddr> {
    (count - 1)
        .checked_mul(stride)
        .and_then(|elems| elems.checked_mul(std::mem::size_of::<T>()))
        .and_then(|bytes| addr.0.checked_add(bytes))
        .map(SymAddr)
        .ok_or_else(|| invalid_arg("transfer extends past the address space"))
}

/// The remote side of one transfer, validated and resolved to a target.
///
/// Built and consumed inside a single call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferDesc {
    pub(crate) target: usize,
    pub(crate) addr: SymAddr,
    pub(crate) stride: usize,
    pub(crate) count: usize,
    pub(crate) elem_width: usize,
}

impl TransferDesc {
    /// Checks count and stride, then the PE range, then reachability of the
    /// first and last element on the decoded target.
    pub(crate) fn new<T: Remote>(
        world: &World,
        pe: usize,
        addr: SymAddr,
        count: usize,
        stride: usize,
    ) -> XbrtimeResult<TransferDesc> {
        if count == 0 {
            return Err(invalid_arg("transfer count must be non-zero"));
        }
        if stride == 0 {
            return Err(invalid_arg("transfer stride must be non-zero"));
        }
        world.check_pe(pe)?;
        let target = world.arch.decode_pe(pe);
        let elem_width = std::mem::size_of::<T>();
        let last = last_elem::<T>(addr, count, stride)?;
        for check in [addr, last] {
            if !world.arch.addr_accessible(check, target) {
                return Err(XbrtimeError::UnreachableAddress { addr: check, pe });
            }
        }
        Ok(TransferDesc {
            target,
            addr,
            stride,
            count,
            elem_width,
        })
    }

    pub(crate) fn elem(&self, i: usize) -> SymAddr {
        self.addr.byte_add(i * self.stride * self.elem_width)
    }
}

impl World {
    /// Checks that `count` elements spaced `stride` apart from `addr` lie
    /// inside this PE's segment
    pub(crate) fn check_local_extent<T: Remote>(
        &self,
        addr: SymAddr,
        count: usize,
        stride: usize,
    ) -> XbrtimeResult<()> {
        if count == 0 {
            return Ok(());
        }
        let last = last_elem::<T>(addr, count, stride)?;
        match last.0.checked_add(std::mem::size_of::<T>()) {
            Some(end) if end <= self.comm.segment_size() => Ok(()),
            _ => Err(XbrtimeError::UnreachableAddress {
                addr: last,
                pe: self.my_pe,
            }),
        }
    }

    /// Copy `count` elements from this PE's `src_addr` (stepping `src_stride`
    /// elements) to `dest_addr` on `dest_pe` (stepping `dest_stride`).
    ///
    /// Returns once every element has been written. Only single elements are
    /// written atomically; concurrent transfers into the same range need a
    /// barrier around them.
    ///
    /// # Examples
    ///```
    /// use xbrtime::WorldBuilder;
    ///
    /// WorldBuilder::new()
    ///     .with_num_pes(2)
    ///     .launch(|world| {
    ///         let addr = world.malloc(4 * std::mem::size_of::<u64>()).unwrap();
    ///         world.write_local_slice(addr, &[1u64, 2, 3, 4]).unwrap();
    ///         world.barrier().unwrap();
    ///         // send 4 u64s to the next pe
    ///         let next = (world.my_pe() + 1) % world.num_pes();
    ///         world.put::<u64>(next, addr, addr, 4, 1, 1).unwrap();
    ///         world.close().unwrap();
    ///     })
    ///     .unwrap();
    ///```
    #[tracing::instrument(skip_all)]
    pub fn put<T: Remote>(
        &self,
        dest_pe: usize,
        dest_addr: SymAddr,
        src_addr: SymAddr,
        count: usize,
        dest_stride: usize,
        src_stride: usize,
    ) -> XbrtimeResult<()> {
        if src_stride == 0 {
            return Err(invalid_arg("transfer stride must be non-zero"));
        }
        let desc = TransferDesc::new::<T>(self, dest_pe, dest_addr, count, dest_stride)?;
        self.check_local_extent::<T>(src_addr, count, src_stride)?;
        trace!(pe = self.my_pe, ?desc, "put");
        for i in 0..desc.count {
            let val: T = self.read_local(src_addr.elem::<T>(i * src_stride))?;
            self.comm.remote_write(desc.elem(i), desc.target, val)?;
        }
        Ok(())
    }

    /// Copy `count` elements from `src_addr` on `src_pe` (stepping
    /// `src_stride` elements) into this PE's `dest_addr` (stepping `dest_stride`).
    #[tracing::instrument(skip_all)]
    pub fn get<T: Remote>(
        &self,
        dest_addr: SymAddr,
        src_pe: usize,
        src_addr: SymAddr,
        count: usize,
        dest_stride: usize,
        src_stride: usize,
    ) -> XbrtimeResult<()> {
        if dest_stride == 0 {
            return Err(invalid_arg("transfer stride must be non-zero"));
        }
        let desc = TransferDesc::new::<T>(self, src_pe, src_addr, count, src_stride)?;
        self.check_local_extent::<T>(dest_addr, count, dest_stride)?;
        trace!(pe = self.my_pe, ?desc, "get");
        for i in 0..desc.count {
            let val: T = self.comm.remote_read(desc.elem(i), desc.target)?;
            self.write_local(dest_addr.elem::<T>(i * dest_stride), val)?;
        }
        Ok(())
    }

    /// [put][World::put] with the source taken from a private buffer
    #[tracing::instrument(skip_all)]
    pub fn put_slice<T: Remote>(
        &self,
        dest_pe: usize,
        dest_addr: SymAddr,
        src: &[T],
        dest_stride: usize,
    ) -> XbrtimeResult<()> {
        let desc = TransferDesc::new::<T>(self, dest_pe, dest_addr, src.len(), dest_stride)?;
        trace!(pe = self.my_pe, ?desc, "put_slice");
        for (i, val) in src.iter().enumerate() {
            self.comm.remote_write(desc.elem(i), desc.target, *val)?;
        }
        Ok(())
    }

    /// [get][World::get] into a private buffer; fetches `dest.len()` elements
    #[tracing::instrument(skip_all)]
    pub fn get_slice<T: Remote>(
        &self,
        dest: &mut [T],
        src_pe: usize,
        src_addr: SymAddr,
        src_stride: usize,
    ) -> XbrtimeResult<()> {
        let desc = TransferDesc::new::<T>(self, src_pe, src_addr, dest.len(), src_stride)?;
        trace!(pe = self.my_pe, ?desc, "get_slice");
        for (i, val) in dest.iter_mut().enumerate() {
            *val = self.comm.remote_read(desc.elem(i), desc.target)?;
        }
        Ok(())
    }

    /// Atomically replace the element at `addr` on `pe`, returning the previous value
    pub fn atomic_swap<T: Remote>(&self, addr: SymAddr, pe: usize, val: T) -> XbrtimeResult<T> {
        let desc = TransferDesc::new::<T>(self, pe, addr, 1, 1)?;
        self.comm.remote_atomic_swap(addr, desc.target, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MappedArch, WorldBuilder};

    fn local_world() -> World {
        WorldBuilder::new()
            .with_num_pes(1)
            .with_heap_size(4096)
            .build()
            .unwrap()
    }

    #[test]
    fn strided_local_round_trip() {
        let world = local_world();
        let src = world.malloc(8 * 8).unwrap();
        let dest = world.malloc(8 * 8).unwrap();
        world
            .write_local_slice(src, &[1i64, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        world.put::<i64>(0, dest, src, 4, 2, 2).unwrap();
        assert_eq!(
            world.read_local_slice::<i64>(dest, 8).unwrap(),
            vec![1, 0, 3, 0, 5, 0, 7, 0]
        );
        let mut back = [0i64; 3];
        world.get_slice(&mut back, 0, src, 3).unwrap();
        assert_eq!(back, [1, 4, 7]);
        world.close().unwrap();
    }

    #[test]
    fn validation_order() {
        let world = local_world();
        let addr = world.malloc(64).unwrap();
        // count is checked before the pe
        assert!(matches!(
            world.put::<u32>(5, addr, addr, 0, 1, 1),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            world.get::<u32>(addr, 0, addr, 4, 0, 1),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        assert_eq!(
            world.put::<u32>(5, addr, addr, 1, 1, 1),
            Err(XbrtimeError::InvalidPe { pe: 5, num_pes: 1 })
        );
        assert!(matches!(
            world.put_slice::<u8>(0, addr, &[], 1),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        // past the end of the segment
        assert!(matches!(
            world.put::<u64>(0, SymAddr(1 << 20), addr, 1, 1, 1),
            Err(XbrtimeError::UnreachableAddress { .. })
        ));
        world.close().unwrap();
    }

    #[test]
    fn mapped_window_denies_access() {
        let world = WorldBuilder::new()
            .with_num_pes(1)
            .with_heap_size(4096)
            .with_arch(MappedArch::new(1, &[], SymAddr(256), 64).unwrap())
            .build()
            .unwrap();
        let addr = world.malloc(128).unwrap();
        assert!(world.addr_accessible(addr, 0));
        assert!(!world.addr_accessible(addr.elem::<u64>(9), 0));
        // the last element lands outside the window
        assert_eq!(
            world.put::<u64>(0, addr, addr, 10, 1, 1),
            Err(XbrtimeError::UnreachableAddress {
                addr: addr.elem::<u64>(9),
                pe: 0
            })
        );
        world.put::<u64>(0, addr, addr, 8, 1, 1).unwrap();
        world.close().unwrap();
    }

    #[test]
    fn local_side_is_bounds_checked() {
        let world = local_world();
        let a = world.malloc(64).unwrap();
        world.write_local_slice(a, &[5u64; 8]).unwrap();
        // the local stride runs past the address space
        assert!(matches!(
            world.put::<u64>(0, a, a, 2, 1, usize::MAX / 4),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            world.get::<u64>(a, 0, a, 2, usize::MAX / 4, 1),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        // representable, but past the end of the segment
        let last = a.elem::<u64>(1 << 20);
        assert_eq!(
            world.put::<u64>(0, a, a, 2, 1, 1 << 20),
            Err(XbrtimeError::UnreachableAddress { addr: last, pe: 0 })
        );
        assert_eq!(
            world.get::<u64>(a, 0, a, 2, 1 << 20, 1),
            Err(XbrtimeError::UnreachableAddress { addr: last, pe: 0 })
        );
        // nothing was written by the rejected transfers
        assert_eq!(world.read_local_slice::<u64>(a, 8).unwrap(), vec![5; 8]);
        world.close().unwrap();
    }

    #[test]
    fn swap_returns_previous() {
        let world = local_world();
        let addr = world.malloc(8).unwrap();
        world.write_local(addr, 11u64).unwrap();
        assert_eq!(world.atomic_swap(addr, 0, 12u64).unwrap(), 11);
        assert_eq!(world.read_local::<u64>(addr).unwrap(), 12);
        world.close().unwrap();
    }
}
