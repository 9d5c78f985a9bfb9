//! Slab cache implementation.
//!
//! This module implements a fixed-size object cache whose slabs are blocks
//! from a [`PageProvider`](crate::PageProvider), with metadata kept at the end
//! of each slab.

pub mod slab_cache;
mod slab_list;
mod slab_node;
pub mod slab_order;

// Re-export public types
#[cfg(feature = "tracking")]
pub use slab_cache::CacheStats;
pub use slab_cache::SlabCache;
pub use slab_node::{SLAB_META_SIZE, SLOT_HEADER_SIZE};
pub use slab_order::{optimal_slab_order, wasted_bytes, SlabGeometry};
