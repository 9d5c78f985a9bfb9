//! Slab order selection.
//!
//! Picks how many pages back each slab of a cache, trading slab size against
//! the bytes lost at the end of the slot array.

use super::slab_node::{SLAB_META_SIZE, SLOT_HEADER_SIZE};
use crate::{AllocError, AllocResult};

/// Bytes left unused in a slab of `order` after packing as many slots of
/// `stride` bytes as fit in front of the trailing metadata.
///
/// Returns `None` if not even one slot fits.
pub fn wasted_bytes(order: usize, stride: usize, page_size: usize) -> Option<usize> {
    let usable = (page_size << order).checked_sub(SLAB_META_SIZE)?;
    if usable < stride {
        return None;
    }
    Some(usable % stride)
}

/// Choose the slab order for slots of `stride` bytes.
///
/// Starts at the smallest order that holds the metadata plus one slot and
/// walks up to `max_order`, keeping an order only if it wastes strictly fewer
/// bytes than the best seen so far. Stops early on a perfect fit.
pub fn optimal_slab_order(stride: usize, page_size: usize, max_order: usize) -> Option<usize> {
    if stride == 0 || page_size == 0 {
        return None;
    }

    let min_order = (0..=max_order).find(|&order| wasted_bytes(order, stride, page_size).is_some())?;
    let mut best_order = min_order;
    let mut best_waste = wasted_bytes(min_order, stride, page_size)?;

    for order in min_order + 1..=max_order {
        if best_waste == 0 {
            break;
        }
        let Some(waste) = wasted_bytes(order, stride, page_size) else {
            continue;
        };
        if waste < best_waste {
            best_order = order;
            best_waste = waste;
        }
    }

    Some(best_order)
}

/// Layout shared by every slab of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabGeometry {
    /// Slab size is `page_size << order`.
    pub order: usize,
    pub slab_bytes: usize,
    /// Bytes per slot: slot header plus object, word aligned.
    pub stride: usize,
    /// Objects per slab, at least 1.
    pub capacity: usize,
}

impl SlabGeometry {
    pub fn new(object_size: usize, page_size: usize, max_order: usize) -> AllocResult<Self> {
        let align = core::mem::align_of::<usize>();
        let stride = object_size
            .checked_add(SLOT_HEADER_SIZE + align - 1)
            .map(|end| crate::align_down(end, align))
            .ok_or(AllocError::ObjectTooLarge)?;

        let order =
            optimal_slab_order(stride, page_size, max_order).ok_or(AllocError::ObjectTooLarge)?;
        let slab_bytes = page_size << order;
        let capacity = (slab_bytes - SLAB_META_SIZE) / stride;
        debug_assert!(capacity >= 1);

        Ok(Self {
            order,
            slab_bytes,
            stride,
            capacity,
        })
    }

    /// Offset of the slab metadata from the slab base.
    pub fn meta_offset(&self) -> usize {
        self.slab_bytes - SLAB_META_SIZE
    }
}
