//! Slab cache for a single object size.
//!
//! This module implements SlabCache which manages three lists (free, partial, full)
//! of slab nodes. A slab's list is its state:
//!
//! - free: every object of the slab is free
//! - partial: some objects are handed out, some are free
//! - full: no free object left
//!
//! Slabs are created on demand in [`SlabCache::alloc`] and only go back to
//! the page provider through [`SlabCache::shrink`] and [`SlabCache::release`].

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "log")]
use log::{debug, error, info, trace, warn};

use super::slab_list::SlabList;
use super::slab_node::SlabNode;
use super::slab_order::SlabGeometry;
use crate::page_allocator::SystemPageProvider;
use crate::{AllocError, AllocResult, PageProvider, MAX_SLAB_ORDER};

/// Source of the owner tokens stamped into slab metadata.
static NEXT_OWNER: AtomicUsize = AtomicUsize::new(1);

/// Cumulative counters of one cache.
#[cfg(feature = "tracking")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub slabs_created: usize,
    pub slabs_released: usize,
    pub allocs: usize,
    pub frees: usize,
    pub rejected_frees: usize,
}

/// Caching allocator for objects of one fixed size.
///
/// The cache is not synchronized; share it between threads only behind a lock.
pub struct SlabCache<P: PageProvider = SystemPageProvider> {
    provider: P,
    object_size: usize,
    /// `None` when the object size does not fit any allowed slab order.
    geometry: Option<SlabGeometry>,
    owner: usize,
    free: SlabList,
    partial: SlabList,
    full: SlabList,
    objects_in_use: usize,
    #[cfg(feature = "tracking")]
    stats: CacheStats,
}

impl<P: PageProvider> SlabCache<P> {
    /// Set up a cache for objects of `object_size` bytes.
    ///
    /// If the object does not fit in a slab of [`MAX_SLAB_ORDER`], the cache
    /// is disabled: it reports an object size of 0 and every allocation fails
    /// with [`AllocError::ObjectTooLarge`].
    pub fn new(provider: P, object_size: usize) -> Self {
        Self::with_max_order(provider, object_size, MAX_SLAB_ORDER)
    }

    /// Like [`SlabCache::new`], but fails instead of returning a disabled cache.
    pub fn try_new(provider: P, object_size: usize) -> AllocResult<Self> {
        let cache = Self::new(provider, object_size);
        if cache.is_disabled() {
            return Err(AllocError::ObjectTooLarge);
        }
        Ok(cache)
    }

    /// Like [`SlabCache::new`], with slabs limited to `max_order`
    /// (clamped to [`MAX_SLAB_ORDER`]).
    pub fn with_max_order(provider: P, object_size: usize, max_order: usize) -> Self {
        let max_order = max_order.min(MAX_SLAB_ORDER);
        let geometry = match SlabGeometry::new(object_size, P::PAGE_SIZE, max_order) {
            Ok(geometry) => {
                info!(
                    "slab cache: object size {}, slab order {} ({} bytes), {} objects per slab",
                    object_size, geometry.order, geometry.slab_bytes, geometry.capacity
                );
                Some(geometry)
            }
            Err(_) => {
                warn!(
                    "slab cache: object size {} does not fit in a slab of order {}",
                    object_size, max_order
                );
                None
            }
        };

        Self {
            provider,
            object_size: if geometry.is_some() { object_size } else { 0 },
            geometry,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            free: SlabList::new(),
            partial: SlabList::new(),
            full: SlabList::new(),
            objects_in_use: 0,
            #[cfg(feature = "tracking")]
            stats: CacheStats::default(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.geometry.is_none()
    }

    /// Object size served by this cache, 0 if disabled.
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn slab_order(&self) -> usize {
        self.geometry.map_or(0, |geometry| geometry.order)
    }

    pub fn slab_bytes(&self) -> usize {
        self.geometry.map_or(0, |geometry| geometry.slab_bytes)
    }

    /// Objects per slab, 0 if disabled.
    pub fn capacity(&self) -> usize {
        self.geometry.map_or(0, |geometry| geometry.capacity)
    }

    pub fn free_slabs(&self) -> usize {
        self.free.len()
    }

    pub fn partial_slabs(&self) -> usize {
        self.partial.len()
    }

    pub fn full_slabs(&self) -> usize {
        self.full.len()
    }

    pub fn total_slabs(&self) -> usize {
        self.free.len() + self.partial.len() + self.full.len()
    }

    pub fn objects_in_use(&self) -> usize {
        self.objects_in_use
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Allocate one object.
    ///
    /// Objects come from a partially used slab first, then from a free slab,
    /// and only then from a new slab requested from the page provider.
    pub fn alloc(&mut self) -> AllocResult<NonNull<u8>> {
        let geometry = self.geometry.ok_or(AllocError::ObjectTooLarge)?;

        // 1. Try to allocate from partial list
        if let Some(slab_base) = self.partial.front() {
            let mut node = SlabNode::new(slab_base, geometry);
            let obj_addr = node.alloc_object().ok_or_else(|| {
                error!(
                    "slab cache: partial slab {:#x} has no free object",
                    slab_base
                );
                AllocError::Corrupted
            })?;
            if node.is_full() {
                trace!("slab {:#x}: partial -> full", slab_base);
                SlabList::transfer(geometry, slab_base, &mut self.partial, &mut self.full);
            }
            return Ok(self.hand_out(obj_addr));
        }

        // 2. Try to allocate from free list
        if let Some(slab_base) = self.free.front() {
            let mut node = SlabNode::new(slab_base, geometry);
            let obj_addr = node.alloc_object().ok_or_else(|| {
                error!("slab cache: free slab {:#x} has no free object", slab_base);
                AllocError::Corrupted
            })?;
            if node.is_full() {
                trace!("slab {:#x}: free -> full", slab_base);
                SlabList::transfer(geometry, slab_base, &mut self.free, &mut self.full);
            } else {
                trace!("slab {:#x}: free -> partial", slab_base);
                SlabList::transfer(geometry, slab_base, &mut self.free, &mut self.partial);
            }
            return Ok(self.hand_out(obj_addr));
        }

        // 3. Allocate a new slab from the page provider
        let obj_addr = self.allocate_new_slab(geometry)?;
        Ok(self.hand_out(obj_addr))
    }

    fn allocate_new_slab(&mut self, geometry: SlabGeometry) -> AllocResult<usize> {
        let block = self.provider.alloc_block(geometry.order).map_err(|e| {
            error!(
                "slab cache: page provider failed for order {}: {}",
                geometry.order, e
            );
            e
        })?;

        let slab_base = block.as_ptr() as usize;
        let mut node = unsafe { SlabNode::generate(slab_base, geometry, self.owner) };
        debug!(
            "slab cache: new slab {:#x}, order {}, {} objects",
            slab_base, geometry.order, geometry.capacity
        );
        #[cfg(feature = "tracking")]
        {
            self.stats.slabs_created += 1;
        }

        // A fresh slab always has `capacity >= 1` free objects.
        let Some(obj_addr) = node.alloc_object() else {
            error!("slab cache: new slab {:#x} has no free object", slab_base);
            self.release_slab(geometry, slab_base);
            return Err(AllocError::Corrupted);
        };

        // A slab whose only object was just handed out is full, not partial.
        if node.is_full() {
            self.full.push_front(geometry, slab_base);
        } else {
            self.partial.push_front(geometry, slab_base);
        }
        Ok(obj_addr)
    }

    fn hand_out(&mut self, obj_addr: usize) -> NonNull<u8> {
        self.objects_in_use += 1;
        #[cfg(feature = "tracking")]
        {
            self.stats.allocs += 1;
        }
        unsafe { NonNull::new_unchecked(obj_addr as *mut u8) }
    }

    /// Return an object to the cache.
    ///
    /// Frees that would corrupt the cache are rejected without changing any
    /// state: [`AllocError::DoubleFree`] for an object that is already free,
    /// [`AllocError::InvalidPointer`] for an address that is not an object of
    /// a live slab of this cache, [`AllocError::Corrupted`] when the slab
    /// already counts all of its objects as free.
    ///
    /// # Safety
    ///
    /// `ptr` must point into a slab of this cache, or into any other block
    /// obtained from a page provider with the same geometry that is still
    /// allocated, so that the slab metadata can be read. Every pointer
    /// returned by [`SlabCache::alloc`] on this cache qualifies until the slab
    /// holding it is given back by [`SlabCache::shrink`] or
    /// [`SlabCache::release`].
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> AllocResult {
        let obj_addr = ptr.as_ptr() as usize;
        let Some(geometry) = self.geometry else {
            warn!("slab cache: free of {:#x} on a disabled cache", obj_addr);
            return Err(AllocError::InvalidPointer);
        };

        let mut node = SlabNode::containing(obj_addr, geometry);
        if !node.is_valid_for(self.owner) {
            return Err(self.reject_free(obj_addr, AllocError::InvalidPointer));
        }

        let slab_base = node.base();
        let was_full = node.is_full();
        if let Err(e) = node.dealloc_object(obj_addr) {
            return Err(self.reject_free(obj_addr, e));
        }

        self.objects_in_use -= 1;
        #[cfg(feature = "tracking")]
        {
            self.stats.frees += 1;
        }

        if node.is_empty() {
            let from = if was_full {
                &mut self.full
            } else {
                &mut self.partial
            };
            trace!("slab {:#x}: -> free", slab_base);
            SlabList::transfer(geometry, slab_base, from, &mut self.free);
        } else if was_full {
            trace!("slab {:#x}: full -> partial", slab_base);
            SlabList::transfer(geometry, slab_base, &mut self.full, &mut self.partial);
        }
        Ok(())
    }

    fn reject_free(&mut self, obj_addr: usize, err: AllocError) -> AllocError {
        warn!("slab cache: rejected free of {:#x}: {}", obj_addr, err);
        #[cfg(feature = "tracking")]
        {
            self.stats.rejected_frees += 1;
        }
        err
    }

    /// Base address of the slab holding the object at `ptr`, recovered from
    /// the address alone.
    ///
    /// # Safety
    ///
    /// Same requirement on `ptr` as [`SlabCache::free`].
    pub unsafe fn slab_base_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let geometry = self.geometry?;
        let obj_addr = ptr.as_ptr() as usize;
        let node = SlabNode::containing(obj_addr, geometry);
        if !node.is_valid_for(self.owner) {
            return None;
        }
        node.slot_index_from_addr(obj_addr)?;
        Some(node.base())
    }

    /// Return every slab without allocated objects to the page provider.
    ///
    /// Partial and full slabs are left alone. Returns the number of slabs
    /// released.
    pub fn shrink(&mut self) -> usize {
        let Some(geometry) = self.geometry else {
            return 0;
        };

        let mut released = 0;
        while let Some(slab_base) = self.free.pop_front(geometry) {
            self.release_slab(geometry, slab_base);
            released += 1;
        }

        if released > 0 {
            debug!("slab cache: shrink released {} slabs", released);
        }
        released
    }

    /// Return every slab to the page provider, including those holding
    /// allocated objects. Afterwards all three lists are empty and the cache
    /// can be used again from scratch.
    ///
    /// Objects still held by callers become dangling.
    pub fn release(&mut self) {
        let Some(geometry) = self.geometry else {
            return;
        };

        let mut released = self.shrink();
        while let Some(slab_base) = self.partial.pop_front(geometry) {
            self.release_slab(geometry, slab_base);
            released += 1;
        }
        while let Some(slab_base) = self.full.pop_front(geometry) {
            self.release_slab(geometry, slab_base);
            released += 1;
        }

        if self.objects_in_use > 0 {
            debug!(
                "slab cache: release dropped {} live objects",
                self.objects_in_use
            );
        }
        self.objects_in_use = 0;
        debug!("slab cache: released {} slabs", released);
    }

    fn release_slab(&mut self, geometry: SlabGeometry, slab_base: usize) {
        SlabNode::new(slab_base, geometry).invalidate();
        #[cfg(feature = "tracking")]
        {
            self.stats.slabs_released += 1;
        }
        unsafe {
            self.provider
                .dealloc_block(NonNull::new_unchecked(slab_base as *mut u8), geometry.order);
        }
    }
}

impl<P: PageProvider> Drop for SlabCache<P> {
    fn drop(&mut self) {
        self.release();
    }
}
