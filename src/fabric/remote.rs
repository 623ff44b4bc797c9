use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};

/// Element types that can be moved by the remote access primitives.
///
/// Each single-element access is a sequentially consistent atomic of the
/// element's width, so a concurrent reader never observes a torn value.
/// Signed and unsigned variants of a width are distinct types and therefore
/// distinct load primitives (a remote `i8` load sign extends, a `u8` load does not).
///
/// # Safety
/// Implementors must only touch `size_of::<Self>()` bytes at `ptr`, and callers
/// must pass a pointer into a live segment aligned to `size_of::<Self>()`.
pub unsafe trait Remote:
    Copy + Send + Sync + Default + PartialEq + PartialOrd + std::fmt::Debug + 'static
{
    #[doc(hidden)]
    unsafe fn atomic_load(ptr: *mut u8) -> Self;
    #[doc(hidden)]
    unsafe fn atomic_store(ptr: *mut u8, val: Self);
    #[doc(hidden)]
    unsafe fn atomic_swap(ptr: *mut u8, val: Self) -> Self;
}

macro_rules! impl_remote_int {
    ($($t:ty => $atomic:ty),*) => {
        $(
            unsafe impl Remote for $t {
                unsafe fn atomic_load(ptr: *mut u8) -> Self {
                    <$atomic>::from_ptr(ptr as *mut $t).load(Ordering::SeqCst)
                }
                unsafe fn atomic_store(ptr: *mut u8, val: Self) {
                    <$atomic>::from_ptr(ptr as *mut $t).store(val, Ordering::SeqCst)
                }
                unsafe fn atomic_swap(ptr: *mut u8, val: Self) -> Self {
                    <$atomic>::from_ptr(ptr as *mut $t).swap(val, Ordering::SeqCst)
                }
            }
        )*
    };
}

macro_rules! impl_remote_float {
    ($($t:ty => $atomic:ty, $bits:ty),*) => {
        $(
            unsafe impl Remote for $t {
                unsafe fn atomic_load(ptr: *mut u8) -> Self {
                    <$t>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).load(Ordering::SeqCst))
                }
                unsafe fn atomic_store(ptr: *mut u8, val: Self) {
                    <$atomic>::from_ptr(ptr as *mut $bits).store(val.to_bits(), Ordering::SeqCst)
                }
                unsafe fn atomic_swap(ptr: *mut u8, val: Self) -> Self {
                    <$t>::from_bits(
                        <$atomic>::from_ptr(ptr as *mut $bits).swap(val.to_bits(), Ordering::SeqCst),
                    )
                }
            }
        )*
    };
}

impl_remote_int!(
    u8 => AtomicU8,
    i8 => AtomicI8,
    u16 => AtomicU16,
    i16 => AtomicI16,
    u32 => AtomicU32,
    i32 => AtomicI32,
    u64 => AtomicU64,
    i64 => AtomicI64,
    usize => AtomicUsize,
    isize => AtomicIsize
);

impl_remote_float!(
    f32 => AtomicU32, u32,
    f64 => AtomicU64, u64
);

/// Element types that the reduction collectives can combine.
///
/// Integer sum and product wrap at the element's native width.
pub trait Reducible: Remote {
    fn reduce_add(self, other: Self) -> Self;
    fn reduce_mul(self, other: Self) -> Self;
}

macro_rules! impl_reducible_int {
    ($($t:ty),*) => {
        $(
            impl Reducible for $t {
                fn reduce_add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }
                fn reduce_mul(self, other: Self) -> Self {
                    self.wrapping_mul(other)
                }
            }
        )*
    };
}

macro_rules! impl_reducible_float {
    ($($t:ty),*) => {
        $(
            impl Reducible for $t {
                fn reduce_add(self, other: Self) -> Self {
                    self + other
                }
                fn reduce_mul(self, other: Self) -> Self {
                    self * other
                }
            }
        )*
    };
}

impl_reducible_int!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize);
impl_reducible_float!(f32, f64);
