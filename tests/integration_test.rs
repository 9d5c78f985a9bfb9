//! Integration tests for the slab cache
//!
//! Drives caches through the public API only, with slabs backed by the
//! global heap through `SystemPageProvider`.

#![no_std]

extern crate alloc;
extern crate slab_cache;

use alloc::vec::Vec;
use core::ptr::NonNull;
use slab_cache::{AllocError, SlabCache, SystemPageProvider, MAX_SLAB_ORDER};

const PAGE_SIZE: usize = 0x1000;
const OBJECT_SIZE: usize = 3000;

type Provider = SystemPageProvider<PAGE_SIZE>;

fn assert_released(cache: &SlabCache<Provider>) {
    assert_eq!(cache.free_slabs(), 0);
    assert_eq!(cache.partial_slabs(), 0);
    assert_eq!(cache.full_slabs(), 0);
    assert_eq!(cache.provider().live_blocks(), 0);
}

#[test]
fn test_alloc_many_then_release() {
    let mut cache = SlabCache::new(Provider::new(), OBJECT_SIZE);

    let objs: Vec<NonNull<u8>> = (0..1000).map(|_| cache.alloc().unwrap()).collect();
    let slabs = (1000 + cache.capacity() - 1) / cache.capacity();
    assert_eq!(cache.total_slabs(), slabs);
    assert_eq!(cache.provider().live_blocks(), slabs);
    assert_eq!(cache.objects_in_use(), objs.len());

    cache.release();
    assert_released(&cache);
}

#[test]
fn test_interleaved_alloc_free_then_release() {
    let mut cache = SlabCache::new(Provider::new(), OBJECT_SIZE);
    let mut objs = Vec::new();

    for _ in 0..15 {
        for _ in 0..25 {
            objs.push(cache.alloc().unwrap());
        }
        let last = *objs.last().unwrap();
        unsafe { cache.free(last).unwrap() };
    }

    assert_eq!(cache.objects_in_use(), 15 * 25 - 15);

    cache.release();
    assert_released(&cache);
}

#[test]
fn test_shrink_returns_only_empty_slabs() {
    let mut cache = SlabCache::new(Provider::new(), OBJECT_SIZE);
    let capacity = cache.capacity();

    let objs: Vec<NonNull<u8>> = (0..900).map(|_| cache.alloc().unwrap()).collect();
    let slabs_before = cache.total_slabs();
    assert_eq!(slabs_before, (900 + capacity - 1) / capacity);

    for &obj in &objs[..870] {
        unsafe { cache.free(obj).unwrap() };
    }

    // Slabs are filled one after the other, so exactly the slabs whose
    // objects all lie in the first 870 are now empty.
    let empty = 870 / capacity;
    assert_eq!(cache.free_slabs(), empty);

    assert_eq!(cache.shrink(), empty);
    assert_eq!(cache.free_slabs(), 0);
    assert_eq!(cache.total_slabs(), slabs_before - empty);
    assert_eq!(cache.provider().live_blocks(), slabs_before - empty);

    // Every surviving object is still recognized and can be freed.
    for &obj in &objs[870..] {
        unsafe {
            assert!(cache.slab_base_of(obj).is_some());
            cache.free(obj).unwrap();
        }
    }
    assert_eq!(cache.objects_in_use(), 0);

    cache.release();
    assert_released(&cache);
}

#[test]
fn test_no_leak_round_trip() {
    for n in [0, 1, 2, 63, 64, 65, 200, 1000] {
        for object_size in [1, 24, 500, 3000, 40000] {
            let mut cache = SlabCache::new(Provider::new(), object_size);
            let objs: Vec<NonNull<u8>> = (0..n).map(|_| cache.alloc().unwrap()).collect();
            for &obj in &objs {
                unsafe { cache.free(obj).unwrap() };
            }

            assert_eq!(cache.partial_slabs(), 0);
            assert_eq!(cache.full_slabs(), 0);
            cache.release();
            assert_released(&cache);
        }
    }
}

#[test]
fn test_address_recovery() {
    let mut cache = SlabCache::new(Provider::new(), 200);
    let slab_bytes = cache.slab_bytes();

    let objs: Vec<NonNull<u8>> = (0..cache.capacity() * 3)
        .map(|_| cache.alloc().unwrap())
        .collect();

    for &obj in &objs {
        let addr = obj.as_ptr() as usize;
        let base = unsafe { cache.slab_base_of(obj) }.unwrap();
        assert_eq!(base % slab_bytes, 0);
        assert!(addr >= base && addr + 200 <= base + slab_bytes);
        assert_eq!(addr % core::mem::align_of::<usize>(), 0);
    }

    // Objects of one slab share the same base.
    let first = unsafe { cache.slab_base_of(objs[0]) };
    let last_of_first = unsafe { cache.slab_base_of(objs[cache.capacity() - 1]) };
    let first_of_second = unsafe { cache.slab_base_of(objs[cache.capacity()]) };
    assert_eq!(first, last_of_first);
    assert_ne!(first, first_of_second);
}

#[test]
fn test_objects_do_not_overlap() {
    let mut cache = SlabCache::new(Provider::new(), 100);
    let objs: Vec<NonNull<u8>> = (0..500).map(|_| cache.alloc().unwrap()).collect();

    for (i, &obj) in objs.iter().enumerate() {
        unsafe { core::ptr::write_bytes(obj.as_ptr(), i as u8, 100) };
    }
    for (i, &obj) in objs.iter().enumerate() {
        let bytes = unsafe { core::slice::from_raw_parts(obj.as_ptr(), 100) };
        assert!(bytes.iter().all(|&b| b == i as u8));
    }

    // Caller data does not disturb the free lists.
    for &obj in &objs {
        unsafe { cache.free(obj).unwrap() };
    }
    assert_eq!(cache.free_slabs(), cache.total_slabs());
}

#[test]
fn test_over_free_detected() {
    let mut cache = SlabCache::new(Provider::new(), OBJECT_SIZE);
    let a = cache.alloc().unwrap();
    let b = cache.alloc().unwrap();

    unsafe {
        cache.free(a).unwrap();
        cache.free(b).unwrap();
        assert_eq!(cache.free(a), Err(AllocError::DoubleFree));
        assert_eq!(cache.free(b), Err(AllocError::DoubleFree));
    }
    assert_eq!(cache.free_slabs(), 1);
    assert_eq!(cache.objects_in_use(), 0);

    // The slab is still intact and hands out both objects again.
    let c = cache.alloc().unwrap();
    let d = cache.alloc().unwrap();
    assert_eq!((c, d), (b, a));
}

#[test]
fn test_object_too_large() {
    let mut cache = SlabCache::new(Provider::new(), PAGE_SIZE << MAX_SLAB_ORDER);
    assert!(cache.is_disabled());
    assert_eq!(cache.object_size(), 0);
    assert_eq!(cache.alloc(), Err(AllocError::ObjectTooLarge));

    let largest = (PAGE_SIZE << MAX_SLAB_ORDER)
        - slab_cache::SLAB_META_SIZE
        - slab_cache::SLOT_HEADER_SIZE;
    let mut cache = SlabCache::new(Provider::new(), largest);
    assert_eq!(cache.slab_order(), MAX_SLAB_ORDER);
    assert_eq!(cache.capacity(), 1);
    let obj = cache.alloc().unwrap();
    assert_eq!(cache.full_slabs(), 1);
    unsafe { cache.free(obj).unwrap() };
    assert_eq!(cache.free_slabs(), 1);
}

#[test]
fn test_provider_exhaustion() {
    let mut cache = SlabCache::new(Provider::with_block_limit(2), OBJECT_SIZE);
    let capacity = cache.capacity();

    let objs: Vec<NonNull<u8>> = (0..capacity * 2).map(|_| cache.alloc().unwrap()).collect();
    assert_eq!(cache.alloc(), Err(AllocError::NoMemory));
    assert_eq!(cache.alloc(), Err(AllocError::NoMemory));
    assert_eq!(cache.full_slabs(), 2);
    assert_eq!(cache.objects_in_use(), capacity * 2);

    // Freeing makes room inside the existing slabs.
    unsafe { cache.free(objs[capacity]).unwrap() };
    assert_eq!(cache.alloc().unwrap(), objs[capacity]);
}
