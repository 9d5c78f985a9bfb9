//! Page provider backed by the global heap.
//!
//! Hands out naturally aligned blocks of `PAGE_SIZE << order` bytes, the same
//! contract a buddy page allocator offers, so slab caches can run on a hosted
//! target without a dedicated physical memory manager.

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

use crate::{AllocError, AllocResult, PageProvider, MAX_SLAB_ORDER};

#[cfg(feature = "log")]
use log::{debug, warn};

pub struct SystemPageProvider<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    /// Upper bound on simultaneously live blocks, `None` for unbounded.
    block_limit: Option<usize>,
    live_blocks: usize,
    live_bytes: usize,
    total_allocated: usize,
}

impl<const PAGE_SIZE: usize> SystemPageProvider<PAGE_SIZE> {
    /// Create an unbounded provider.
    pub const fn new() -> Self {
        Self {
            block_limit: None,
            live_blocks: 0,
            live_bytes: 0,
            total_allocated: 0,
        }
    }

    /// Create a provider that fails with [`AllocError::NoMemory`] once
    /// `limit` blocks are live at the same time.
    pub const fn with_block_limit(limit: usize) -> Self {
        Self {
            block_limit: Some(limit),
            live_blocks: 0,
            live_bytes: 0,
            total_allocated: 0,
        }
    }

    /// Change the live block limit. Already allocated blocks are unaffected.
    pub fn set_block_limit(&mut self, limit: Option<usize>) {
        self.block_limit = limit;
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Number of bytes currently handed out.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Number of blocks handed out over the provider's lifetime.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    fn block_layout(order: usize) -> AllocResult<Layout> {
        if order > MAX_SLAB_ORDER {
            return Err(AllocError::InvalidParam);
        }
        let size = PAGE_SIZE << order;
        Layout::from_size_align(size, size).map_err(|_| AllocError::InvalidParam)
    }
}

impl<const PAGE_SIZE: usize> PageProvider for SystemPageProvider<PAGE_SIZE> {
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn alloc_block(&mut self, order: usize) -> AllocResult<NonNull<u8>> {
        let layout = Self::block_layout(order)?;

        if let Some(limit) = self.block_limit {
            if self.live_blocks >= limit {
                debug!(
                    "page provider: block limit {} reached, refusing order {}",
                    limit, order
                );
                return Err(AllocError::NoMemory);
            }
        }

        let block = NonNull::new(unsafe { alloc(layout) }).ok_or(AllocError::NoMemory)?;
        debug_assert!(crate::is_aligned(block.as_ptr() as usize, layout.size()));

        self.live_blocks += 1;
        self.live_bytes += layout.size();
        self.total_allocated += 1;
        Ok(block)
    }

    unsafe fn dealloc_block(&mut self, block: NonNull<u8>, order: usize) {
        let Ok(layout) = Self::block_layout(order) else {
            warn!(
                "page provider: dealloc of {:#x} with invalid order {}",
                block.as_ptr() as usize,
                order
            );
            return;
        };

        dealloc(block.as_ptr(), layout);
        self.live_blocks = self.live_blocks.saturating_sub(1);
        self.live_bytes = self.live_bytes.saturating_sub(layout.size());
    }
}

impl<const PAGE_SIZE: usize> Default for SystemPageProvider<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
