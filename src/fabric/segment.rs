use crate::error::{invalid_arg, XbrtimeError, XbrtimeResult};
use crate::fabric::{Remote, SymAddr};

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

const SEGMENT_ALIGN: usize = 64;

/// One PE's symmetric segment: barrier slot banks followed by the heap arena.
///
/// The memory is only ever touched through width-sized atomics, which is what
/// makes it sound to share between the PE threads.
pub(crate) struct Segment {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment({:p}, {} bytes)", self.ptr, self.layout.size())
    }
}

impl Segment {
    pub(crate) fn new(size: usize) -> XbrtimeResult<Segment> {
        if size == 0 {
            return Err(invalid_arg("segment size must be non-zero"));
        }
        let layout = Layout::from_size_align(size, SEGMENT_ALIGN)
            .map_err(|_| XbrtimeError::OutOfSymmetricMemory { requested: size })?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Segment { ptr, layout }),
            None => Err(XbrtimeError::OutOfSymmetricMemory { requested: size }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Pointer to the element of type `T` at `addr`, after bounds and alignment checks.
    /// `pe` is only used to describe the failure.
    pub(crate) fn elem_ptr<T: Remote>(&self, addr: SymAddr, pe: usize) -> XbrtimeResult<*mut u8> {
        let width = std::mem::size_of::<T>();
        match addr.0.checked_add(width) {
            Some(end) if end <= self.len() => {}
            _ => return Err(XbrtimeError::UnreachableAddress { addr, pe }),
        }
        if addr.0 % width != 0 {
            return Err(invalid_arg(format!(
                "address {:#x} is not aligned to the {} byte element width",
                addr.0, width
            )));
        }
        Ok(unsafe { self.ptr.as_ptr().add(addr.0) })
    }

    pub(crate) fn load<T: Remote>(&self, addr: SymAddr, pe: usize) -> XbrtimeResult<T> {
        let ptr = self.elem_ptr::<T>(addr, pe)?;
        Ok(unsafe { T::atomic_load(ptr) })
    }

    pub(crate) fn store<T: Remote>(&self, addr: SymAddr, pe: usize, val: T) -> XbrtimeResult<()> {
        let ptr = self.elem_ptr::<T>(addr, pe)?;
        unsafe { T::atomic_store(ptr, val) };
        Ok(())
    }

    pub(crate) fn swap<T: Remote>(&self, addr: SymAddr, pe: usize, val: T) -> XbrtimeResult<T> {
        let ptr = self.elem_ptr::<T>(addr, pe)?;
        Ok(unsafe { T::atomic_swap(ptr, val) })
    }

    /// Zero `len` bytes at `addr`; both must be multiples of 8.
    pub(crate) fn zero(&self, addr: SymAddr, len: usize, pe: usize) -> XbrtimeResult<()> {
        if addr.0 % 8 != 0 || len % 8 != 0 {
            return Err(invalid_arg("zeroed ranges must be 8 byte aligned"));
        }
        for word in (addr.0..addr.0 + len).step_by(8) {
            let ptr = self.elem_ptr::<u64>(SymAddr(word), pe)?;
            unsafe { AtomicU64::from_ptr(ptr as *mut u64).store(0, Ordering::Relaxed) };
        }
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_starts_zeroed() {
        let seg = Segment::new(256).unwrap();
        for off in (0..256).step_by(8) {
            assert_eq!(seg.load::<u64>(SymAddr(off), 0).unwrap(), 0);
        }
    }

    #[test]
    fn bounds_and_alignment_are_checked() {
        let seg = Segment::new(64).unwrap();
        assert_eq!(
            seg.load::<u64>(SymAddr(64), 3),
            Err(XbrtimeError::UnreachableAddress {
                addr: SymAddr(64),
                pe: 3
            })
        );
        assert!(matches!(
            seg.store::<u32>(SymAddr(2), 0, 7),
            Err(XbrtimeError::InvalidArgument(_))
        ));
        seg.store::<u16>(SymAddr(2), 0, 7).unwrap();
        assert_eq!(seg.load::<u16>(SymAddr(2), 0).unwrap(), 7);
    }

    #[test]
    fn zero_clears_range() {
        let seg = Segment::new(64).unwrap();
        seg.store::<u64>(SymAddr(8), 0, u64::MAX).unwrap();
        seg.store::<u64>(SymAddr(16), 0, u64::MAX).unwrap();
        seg.zero(SymAddr(8), 8, 0).unwrap();
        assert_eq!(seg.load::<u64>(SymAddr(8), 0).unwrap(), 0);
        assert_eq!(seg.load::<u64>(SymAddr(16), 0).unwrap(), u64::MAX);
    }
}
