//! Scenario-level tests for the keyed hash map.

use strata_memory::{Arena, ArenaMap, KeyKind};

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Debug)]
struct Pair {
    key: i32,
    value: i32,
}

fn pinned_arena() -> Arena {
    let arena = Arena::new();
    arena.set_hash_key(0x0bad_cafe_0bad_cafe);
    arena
}

#[test]
fn value_keys_insert_find_update() {
    let arena = pinned_arena();
    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 8, size_of::<i32>());

    map.find_or_insert(Pair { key: 1, value: 11 });
    map.find_or_insert(Pair { key: 2, value: 22 });

    // Present key: reports found and does not overwrite.
    let (entry, found) = map.find_or_insert(Pair { key: 2, value: 23 });
    assert!(found);
    assert_eq!(entry.value, 22);

    map.update(Pair { key: 2, value: 23 });
    assert_eq!(map.find_opaque(&2i32).unwrap().value, 23);
    assert_eq!(map.len(), 2);
    assert_eq!(map.key_kind(), KeyKind::Opaque);
}

#[test]
fn string_keys_match_by_contents_not_pointer() {
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Named {
        name: *const u8,
        id: u32,
    }

    static NAME: &[u8] = b"abcd\0";

    let arena = pinned_arena();
    // SAFETY: every inserted key string is 'static.
    let mut map = unsafe { ArenaMap::<Named>::with_str_keys(&arena, 8) };
    map.find_or_insert(Named { name: NAME.as_ptr(), id: 9 });

    // A freshly allocated "abcd" has a different address but equal contents.
    let fresh = String::from("abcd");
    let hit = map.find_str(fresh.as_str()).expect("found by contents");
    assert_eq!(hit.id, 9);
    // The stored key pointer is the caller's original, not a copy.
    assert_eq!(hit.name, NAME.as_ptr());

    assert!(map.find_str("a").is_none());
}

#[test]
fn delete_churn_keeps_survivors_intact() {
    let arena = pinned_arena();
    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 128, size_of::<i32>());

    for key in 0..100i32 {
        map.find_or_insert(Pair { key, value: key * 7 });
    }
    assert_eq!(map.len(), 100);
    let capacity = map.capacity();

    assert!(map.remove_opaque(&10i32));
    assert!(map.remove_opaque(&50i32));
    assert_eq!(map.len(), 98);
    assert!(map.find_opaque(&10i32).is_none());
    assert!(map.find_opaque(&50i32).is_none());

    for key in (0..100i32).filter(|k| *k != 10 && *k != 50) {
        let hit = map.find_opaque(&key).expect("survivor");
        assert_eq!(hit.value, key * 7);
    }

    // A fresh key reuses existing capacity.
    map.find_or_insert(Pair { key: 1000, value: 1 });
    assert_eq!(map.capacity(), capacity);
    assert_eq!(map.len(), 99);
}

#[test]
fn ensure_space_front_loads_growth() {
    let arena = pinned_arena();
    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 2, size_of::<i32>());

    map.ensure_space(300);
    let capacity = map.capacity();
    assert!(capacity >= 300);

    for key in 0..300i32 {
        map.find_or_insert(Pair { key, value: key });
    }
    assert_eq!(map.capacity(), capacity);
    assert_eq!(map.len(), 300);
}

#[test]
fn copy_compares_equal_item_by_item() {
    let arena = pinned_arena();
    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 16, size_of::<i32>());
    for key in 0..10i32 {
        map.find_or_insert(Pair { key, value: key + 1 });
    }

    let copy = map.copy_with_capacity(16);
    assert_eq!(copy.len(), map.len());
    for (a, b) in map.iter().zip(copy.iter()) {
        assert_eq!(a, b);
    }
    for key in 0..10i32 {
        assert_eq!(copy.find_opaque(&key), map.find_opaque(&key));
    }
}

#[test]
fn capacity_is_always_a_power_of_two() {
    let arena = pinned_arena();
    let map = ArenaMap::<Pair>::with_opaque_keys(&arena, 100, size_of::<i32>());
    assert_eq!(map.capacity(), 128);

    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 1, size_of::<i32>());
    for key in 0..33i32 {
        map.find_or_insert(Pair { key, value: 0 });
    }
    assert!(map.capacity().is_power_of_two());
    assert!(map.capacity() >= 33);
}

#[test]
fn dense_items_walkable_as_a_sequence() {
    let arena = pinned_arena();
    let mut map = ArenaMap::<Pair>::with_opaque_keys(&arena, 8, size_of::<i32>());
    for key in [3i32, 1, 2] {
        map.find_or_insert(Pair { key, value: key });
    }
    let keys: Vec<i32> = map.iter().map(|p| p.key).collect();
    assert_eq!(keys, vec![3, 1, 2]);
    assert_eq!(map.items().len(), 3);
}
