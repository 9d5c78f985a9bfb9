//! Slab Cache
//!
//! A fixed-size object caching allocator layered over a page provider that
//! hands out naturally aligned, power-of-two sized blocks of pages, featuring:
//! - Slab order selection that minimizes the bytes wasted per slab
//! - Free / partial / full slab lists with O(1) transitions
//! - Intrusive per-slab free lists threaded through unused object slots
//! - O(1) slab lookup from any object pointer

#![no_std]

extern crate alloc;

use core::fmt;
use core::ptr::NonNull;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size of the underlying page provider.
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Largest slab order a cache may request, i.e. slabs of at most
/// `page_size * 2^MAX_SLAB_ORDER` bytes (4 MiB with 4 KiB pages).
pub const MAX_SLAB_ORDER: usize = 10;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid request to the page provider (e.g. order out of range).
    InvalidParam,
    /// The object does not fit into a slab of the maximum order.
    ObjectTooLarge,
    /// The page provider could not satisfy a block request.
    NoMemory,
    /// The pointer was not handed out by this cache.
    InvalidPointer,
    /// The object is already on its slab's free list.
    DoubleFree,
    /// A free would push a slab's free count past its capacity.
    Corrupted,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::InvalidParam => "invalid page provider request",
            AllocError::ObjectTooLarge => "object does not fit in a slab of the maximum order",
            AllocError::NoMemory => "page provider exhausted",
            AllocError::InvalidPointer => "pointer does not belong to this cache",
            AllocError::DoubleFree => "object freed twice",
            AllocError::Corrupted => "slab free count exceeds its capacity",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Source of the memory blocks slabs are carved from.
///
/// A block of order `o` spans `PAGE_SIZE << o` bytes and must be aligned to
/// that same size, the way a buddy allocator hands out its blocks.
pub trait PageProvider {
    /// The size of a memory page.
    const PAGE_SIZE: usize;

    /// Allocate a block of `PAGE_SIZE << order` bytes aligned to its size.
    fn alloc_block(&mut self, order: usize) -> AllocResult<NonNull<u8>>;

    /// Return a block to the provider.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by [`PageProvider::alloc_block`] on this
    /// provider with the same `order`, and must not be used afterwards.
    unsafe fn dealloc_block(&mut self, block: NonNull<u8>, order: usize);
}

impl<P: PageProvider> PageProvider for &mut P {
    const PAGE_SIZE: usize = P::PAGE_SIZE;

    fn alloc_block(&mut self, order: usize) -> AllocResult<NonNull<u8>> {
        (**self).alloc_block(order)
    }

    unsafe fn dealloc_block(&mut self, block: NonNull<u8>, order: usize) {
        (**self).dealloc_block(block, order)
    }
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod page_allocator;
pub use page_allocator::SystemPageProvider;

pub mod slab;
#[cfg(feature = "tracking")]
pub use slab::CacheStats;
pub use slab::{
    optimal_slab_order, wasted_bytes, SlabCache, SlabGeometry, SLAB_META_SIZE, SLOT_HEADER_SIZE,
};
