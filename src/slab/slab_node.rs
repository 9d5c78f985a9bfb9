//! Slab node implementation.
//!
//! A slab is one block from the page provider. Its object slots are packed
//! from the base of the block and its metadata sits at the very end, so the
//! metadata of any object is found by rounding the object address down to
//! the slab size and adding a fixed offset.
//!
//! ```text
//! base                                               base + slab_bytes
//! | hdr | object | hdr | object | ... | unused | SlabHeader |
//! ```

#[cfg(feature = "log")]
use log::error;

use super::slab_order::SlabGeometry;
use crate::{AllocError, AllocResult};

#[repr(C)]
pub(crate) struct SlabHeader {
    magic: u32,
    free_count: u32,
    /// Encoded [`SlotState::Free`] link of the first free slot.
    free_head: usize,
    /// Token of the cache that generated this slab.
    owner: usize,
    prev: usize,
    next: usize,
}

const SLAB_HEADER_MAGIC: u32 = 0x534c_4142;

/// Bytes reserved at the end of every slab for its metadata.
pub const SLAB_META_SIZE: usize = core::mem::size_of::<SlabHeader>();

/// Bytes in front of every object, holding its [`SlotState`].
pub const SLOT_HEADER_SIZE: usize = core::mem::size_of::<usize>();

const SLOT_ALLOCATED: usize = usize::MAX;
const SLOT_END: usize = usize::MAX - 1;

/// State kept in the header word in front of each object.
///
/// While free, the header links the slot into its slab's free list by slot
/// index. Once handed out it only carries the allocated tag, and the object
/// bytes after it belong to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free { next: Option<usize> },
    Allocated,
}

impl SlotState {
    fn encode(self) -> usize {
        match self {
            SlotState::Free { next: Some(index) } => index,
            SlotState::Free { next: None } => SLOT_END,
            SlotState::Allocated => SLOT_ALLOCATED,
        }
    }

    fn decode(raw: usize) -> Self {
        match raw {
            SLOT_ALLOCATED => SlotState::Allocated,
            SLOT_END => SlotState::Free { next: None },
            index => SlotState::Free { next: Some(index) },
        }
    }
}

/// Handle to a slab living at `addr`.
#[derive(Debug, Clone, Copy)]
pub struct SlabNode {
    addr: usize,
    geometry: SlabGeometry,
}

impl SlabNode {
    pub const fn new(addr: usize, geometry: SlabGeometry) -> Self {
        Self { addr, geometry }
    }

    /// The slab an object address belongs to.
    ///
    /// This is the only place an object address is turned into a slab address.
    /// It relies on the page provider aligning every block to its own size;
    /// the result is only meaningful if `obj_addr` lies inside a live slab of
    /// this geometry, which callers confirm with [`SlabNode::is_valid_for`].
    pub fn containing(obj_addr: usize, geometry: SlabGeometry) -> Self {
        Self::new(crate::align_down(obj_addr, geometry.slab_bytes), geometry)
    }

    pub fn base(&self) -> usize {
        self.addr
    }

    fn header(&self) -> &SlabHeader {
        unsafe { &*((self.addr + self.geometry.meta_offset()) as *const SlabHeader) }
    }

    fn header_mut(&mut self) -> &mut SlabHeader {
        unsafe { &mut *((self.addr + self.geometry.meta_offset()) as *mut SlabHeader) }
    }

    fn slot_addr(&self, index: usize) -> usize {
        self.addr + index * self.geometry.stride
    }

    fn slot_state(&self, index: usize) -> SlotState {
        SlotState::decode(unsafe { *(self.slot_addr(index) as *const usize) })
    }

    fn set_slot_state(&mut self, index: usize, state: SlotState) {
        unsafe { *(self.slot_addr(index) as *mut usize) = state.encode() };
    }

    /// Carve a fresh block into slots and write the slab metadata.
    ///
    /// Slots are threaded in address order, so the first allocation returns
    /// the lowest object.
    ///
    /// # Safety
    ///
    /// `addr` must be the start of a writable block of `geometry.slab_bytes`
    /// bytes aligned to its size and not in use by anything else.
    pub unsafe fn generate(addr: usize, geometry: SlabGeometry, owner: usize) -> Self {
        let mut node = Self::new(addr, geometry);
        let capacity = geometry.capacity;

        for index in 0..capacity {
            let next = if index + 1 < capacity {
                Some(index + 1)
            } else {
                None
            };
            node.set_slot_state(index, SlotState::Free { next });
        }

        let header = (addr + geometry.meta_offset()) as *mut SlabHeader;
        header.write(SlabHeader {
            magic: SLAB_HEADER_MAGIC,
            free_count: capacity as u32,
            free_head: SlotState::Free { next: Some(0) }.encode(),
            owner,
            prev: 0,
            next: 0,
        });

        node
    }

    /// Whether the metadata at the end of this slab was written by the cache
    /// identified by `owner`.
    pub fn is_valid_for(&self, owner: usize) -> bool {
        let header = self.header();
        header.magic == SLAB_HEADER_MAGIC && header.owner == owner
    }

    /// Clear the magic so stale pointers into a returned slab are not taken
    /// for live ones while the memory is still mapped.
    pub fn invalidate(&mut self) {
        self.header_mut().magic = 0;
    }

    pub fn capacity(&self) -> usize {
        self.geometry.capacity
    }

    pub fn free_count(&self) -> usize {
        self.header().free_count as usize
    }

    #[cfg(test)]
    pub fn in_use(&self) -> usize {
        self.capacity() - self.free_count()
    }

    pub fn is_full(&self) -> bool {
        self.free_count() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.free_count() == self.capacity()
    }

    /// Take the first slot off the free list and return its object address.
    pub fn alloc_object(&mut self) -> Option<usize> {
        let SlotState::Free { next: Some(index) } = SlotState::decode(self.header().free_head)
        else {
            return None;
        };
        if index >= self.capacity() {
            error!(
                "slab {:#x}: free list points at slot {} past capacity {}",
                self.addr,
                index,
                self.capacity()
            );
            return None;
        }

        let SlotState::Free { next } = self.slot_state(index) else {
            error!(
                "slab {:#x}: allocated slot {} found on free list",
                self.addr, index
            );
            return None;
        };

        self.set_slot_state(index, SlotState::Allocated);
        let header = self.header_mut();
        header.free_head = SlotState::Free { next }.encode();
        header.free_count -= 1;
        Some(self.object_addr(index))
    }

    /// Put the object at `obj_addr` back on the free list.
    ///
    /// Nothing is modified when the address is not an allocated object of
    /// this slab.
    pub fn dealloc_object(&mut self, obj_addr: usize) -> AllocResult {
        let index = self
            .slot_index_from_addr(obj_addr)
            .ok_or(AllocError::InvalidPointer)?;

        if self.slot_state(index) != SlotState::Allocated {
            return Err(AllocError::DoubleFree);
        }
        if self.free_count() >= self.capacity() {
            return Err(AllocError::Corrupted);
        }

        let head = SlotState::decode(self.header().free_head);
        self.set_slot_state(index, head);
        let header = self.header_mut();
        header.free_head = SlotState::Free { next: Some(index) }.encode();
        header.free_count += 1;
        Ok(())
    }

    pub fn object_addr(&self, index: usize) -> usize {
        self.slot_addr(index) + SLOT_HEADER_SIZE
    }

    pub fn slot_index_from_addr(&self, obj_addr: usize) -> Option<usize> {
        let offset = obj_addr.checked_sub(self.addr + SLOT_HEADER_SIZE)?;
        if offset % self.geometry.stride != 0 {
            return None;
        }

        let index = offset / self.geometry.stride;
        if index < self.capacity() {
            Some(index)
        } else {
            None
        }
    }

    pub fn prev(&self) -> usize {
        self.header().prev
    }

    pub fn next(&self) -> usize {
        self.header().next
    }

    pub fn set_prev(&mut self, prev: usize) {
        self.header_mut().prev = prev;
    }

    pub fn set_next(&mut self, next: usize) {
        self.header_mut().next = next;
    }
}
