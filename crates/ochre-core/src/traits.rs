//! Capability traits for the index and value type parameters.
//!
//! Kernels are generic over a signed integer index type `I` and a
//! floating-point value type `V`. The traits below pin down exactly the
//! capabilities the kernels use so that both 32- and 64-bit widths can be
//! chosen at instantiation time.

use std::fmt::Debug;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use num_traits::{Float, PrimInt, Signed};

/// Signed integer type used for row pointers and column indices.
pub trait Index: PrimInt + Signed + Send + Sync + Debug + 'static {
    /// Converts to `usize`. The value must be non-negative.
    fn as_usize(self) -> usize;

    /// Converts from `usize`. The value must fit in `Self`.
    fn from_usize(n: usize) -> Self;
}

impl Index for i32 {
    #[inline]
    fn as_usize(self) -> usize {
        debug_assert!(self >= 0);
        self as usize
    }

    #[inline]
    fn from_usize(n: usize) -> Self {
        debug_assert!(i32::try_from(n).is_ok());
        n as i32
    }
}

impl Index for i64 {
    #[inline]
    fn as_usize(self) -> usize {
        debug_assert!(self >= 0);
        self as usize
    }

    #[inline]
    fn from_usize(n: usize) -> Self {
        debug_assert!(i64::try_from(n).is_ok());
        n as i64
    }
}

/// Floating-point type stored in the matrix and the dense vectors.
///
/// Beyond the arithmetic the kernels need, the trait carries an atomic
/// accumulate hook used by the atomics multiplication strategy, where
/// several threads fold contributions into shared output positions.
pub trait Value: Float + AddAssign + Default + Send + Sync + Debug + 'static {
    /// Atomically performs `*ptr += rhs`.
    ///
    /// # Safety
    /// `ptr` must be valid, properly aligned, and every concurrent access
    /// to it must go through this function until the next synchronization
    /// point.
    unsafe fn atomic_add(ptr: *mut Self, rhs: Self);
}

impl Value for f32 {
    #[inline]
    unsafe fn atomic_add(ptr: *mut Self, rhs: Self) {
        let cell = &*(ptr as *const AtomicU32);
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + rhs).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Value for f64 {
    #[inline]
    unsafe fn atomic_add(ptr: *mut Self, rhs: Self) {
        let cell = &*(ptr as *const AtomicU64);
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + rhs).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}
