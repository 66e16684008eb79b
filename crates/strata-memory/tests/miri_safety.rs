//! Narrow tests aimed at the raw-pointer paths, kept small enough to run
//! under Miri.

use strata_memory::{Arena, ArenaConfig, ArenaList, ArenaMap, ArenaString};

#[test]
fn raw_alloc_write_read() {
    let arena = Arena::with_config(ArenaConfig::small_blocks());
    let ptr = arena.alloc_raw(32, 8);
    unsafe {
        std::ptr::write_bytes(ptr.as_ptr(), 0x42, 32);
        assert_eq!(*ptr.as_ptr(), 0x42);
        assert_eq!(*ptr.as_ptr().add(31), 0x42);
    }
}

#[test]
fn resize_last_extension_stays_writable() {
    let arena = Arena::with_config(ArenaConfig::small_blocks());
    let ptr = arena.alloc_raw_uninit(4, 1);
    assert!(arena.resize_last(ptr, 16));
    unsafe {
        std::ptr::write_bytes(ptr.as_ptr(), 7, 16);
        assert_eq!(*ptr.as_ptr().add(15), 7);
    }
}

#[test]
fn string_growth_and_compaction() {
    let arena = Arena::with_config(ArenaConfig::small_blocks());
    let mut s = ArenaString::new(&arena, 2);
    s.push_str("abcdefgh");
    s.write_at(10, b"z");
    let bytes = s.into_bytes();
    assert_eq!(bytes, b"abcdefgh\0\0z\0");
}

#[test]
fn list_header_slide_is_sound() {
    let arena = Arena::with_config(ArenaConfig::small_blocks());
    let mut list: ArenaList<'_, [u8; 3]> = ArenaList::new(&arena, 4);
    list.push([1, 2, 3]);
    list.push([4, 5, 6]);
    list.push([7, 8, 9]);
    list.drop_front(1);
    assert_eq!(list.as_slice(), &[[4, 5, 6], [7, 8, 9]]);
    list.push([10, 11, 12]);
    list.drop_front(2);
    assert_eq!(list.as_slice(), &[[10, 11, 12]]);
}

#[test]
fn map_insert_remove_cycles() {
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct E {
        key: u8,
        value: u8,
    }

    let arena = Arena::with_config(ArenaConfig::small_blocks());
    arena.set_hash_key(3);
    let mut map = ArenaMap::<E>::with_opaque_keys(&arena, 2, 1);
    for round in 0..3u8 {
        for key in 0..10u8 {
            map.update(E { key, value: key.wrapping_add(round) });
        }
        for key in (0..10u8).step_by(2) {
            assert!(map.remove_opaque(&key));
        }
        assert_eq!(map.len(), 5);
        for key in (1..10u8).step_by(2) {
            assert_eq!(map.find_opaque(&key).unwrap().value, key.wrapping_add(round));
        }
        for key in (0..10u8).step_by(2) {
            map.update(E { key, value: 0 });
        }
    }
}

#[test]
fn clear_and_reuse() {
    let mut arena = Arena::with_config(ArenaConfig::small_blocks());
    {
        let mut s = ArenaString::new(&arena, 64);
        s.push_str("transient");
    }
    arena.clear();
    let p = arena.alloc_raw(8, 8);
    unsafe {
        *p.as_ptr() = 1;
    }
    arena.free();
}
