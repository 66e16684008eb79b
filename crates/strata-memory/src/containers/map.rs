//! Order-preserving keyed hash map backed by an arena.
//!
//! Items live in a dense array in insertion order (deletion swaps the last
//! item into the hole); lookups go through an out-of-band open-addressed slot
//! table that stores 32-bit hashes next to dense-array indexes. The dense
//! array keeps a zero-filled sentinel slot after the last item, so external
//! code can walk it like a plain null-terminated sequence.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::slice;

use crate::arena::Arena;
use crate::hash::MIN_HASH;

const MAP_MAGIC: u32 = 0x5041_4d41;

/// Slot states below [`MIN_HASH`]; anything else is an occupied slot's hash.
const EMPTY: u32 = 0;
const TOMBSTONE: u32 = 1;

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Largest supported item capacity: twice this many slots still fit
        /// a 32-bit slot index.
        pub const MAX_MAP_CAPACITY: usize = 1 << 31;
    } else {
        /// Largest supported item capacity on 32-bit targets, bounded by the
        /// addressable size of the slot table.
        pub const MAX_MAP_CAPACITY: usize = 1 << 27;
    }
}

/// How the key is read out of an item.
///
/// The key always occupies the first `key_size` bytes of the item; the kind
/// decides whether those bytes are the key itself or a pointer to it.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyKind {
    /// The first `key_size` bytes, hashed and compared bytewise.
    Opaque,
    /// A `*const u8` to a null-terminated byte string; hashed and compared
    /// by contents.
    Str,
    /// A `{*const u8, usize}` pair; hashed and compared by contents.
    Slice,
}

/// Header stored immediately before the dense item array.
#[repr(C)]
#[derive(Clone, Copy)]
struct MapHeader {
    arena: *const Arena,
    /// Active slot table: `cap * 2` hash words, then `cap * 2` index words.
    slots: *mut u32,
    /// Retained rebuild table, null until the first tombstone cleanup.
    spare: *mut u32,
    len: usize,
    cap: usize,
    tombstones: usize,
    item_size: usize,
    key_size: usize,
    kind: KeyKind,
    magic: u32,
}

const HEADER_SIZE: usize = size_of::<MapHeader>();
const HEADER_ALIGN: usize = align_of::<MapHeader>();

/// An order-preserving hash map over fixed-size items, allocated from an
/// [`Arena`].
///
/// The handle points at the dense item array; the header sits immediately
/// before it. Capacity is always a power of two and only ever grows. Lookups
/// return references into the dense array that any growing or deleting
/// mutation invalidates (the borrow checker enforces this).
///
/// `T` must be plain data laid out with the key first (`#[repr(C)]` with the
/// key as the leading field, or a careful equivalent). For
/// [`KeyKind::Opaque`] the first `key_size` bytes are hashed and compared
/// directly, so they must be fully initialised — no padding inside the key
/// prefix.
///
/// # Examples
///
/// ```
/// use strata_memory::{Arena, ArenaMap};
///
/// #[repr(C)]
/// #[derive(Clone, Copy)]
/// struct Entry {
///     key: u32,
///     value: u32,
/// }
///
/// let arena = Arena::new();
/// let mut map = ArenaMap::<Entry>::with_opaque_keys(&arena, 8, size_of::<u32>());
/// map.find_or_insert(Entry { key: 1, value: 11 });
/// map.update(Entry { key: 1, value: 12 });
/// assert_eq!(map.find_opaque(&1u32).unwrap().value, 12);
/// ```
pub struct ArenaMap<'a, T: Copy> {
    items: NonNull<T>,
    _arena: PhantomData<&'a Arena>,
}

enum Probe {
    Found { slot: usize, index: usize },
    Vacant { slot: usize },
}

impl<'a, T: Copy> ArenaMap<'a, T> {
    /// Creates a map whose keys are the first `key_size` bytes of each item.
    ///
    /// # Panics
    ///
    /// Panics when `T` is zero-sized, when its alignment does not divide the
    /// header layout, or when `key_size` is zero or exceeds the item size.
    pub fn with_opaque_keys(arena: &'a Arena, capacity: usize, key_size: usize) -> Self {
        Self::create(arena, capacity, KeyKind::Opaque, key_size)
    }

    /// Creates a map whose items start with a `*const u8` to a
    /// null-terminated key string. The string is not copied.
    ///
    /// # Safety
    ///
    /// Every inserted item must begin with a valid pointer to a
    /// null-terminated byte string that outlives the map; lookups and
    /// rebuilds read through it at any time.
    pub unsafe fn with_str_keys(arena: &'a Arena, capacity: usize) -> Self {
        Self::create(arena, capacity, KeyKind::Str, size_of::<*const u8>())
    }

    /// Creates a map whose items start with a `{*const u8, usize}` pair
    /// naming the key bytes. The bytes are not copied.
    ///
    /// # Safety
    ///
    /// Every inserted item must begin with a valid pointer/length pair that
    /// outlives the map.
    pub unsafe fn with_slice_keys(arena: &'a Arena, capacity: usize) -> Self {
        Self::create(
            arena,
            capacity,
            KeyKind::Slice,
            size_of::<*const u8>() + size_of::<usize>(),
        )
    }

    fn create(arena: &'a Arena, capacity: usize, kind: KeyKind, key_size: usize) -> Self {
        assert!(size_of::<T>() != 0, "zero-sized items are not supported");
        assert!(
            HEADER_ALIGN % align_of::<T>() == 0 && HEADER_SIZE % align_of::<T>() == 0,
            "item alignment incompatible with the map header layout"
        );
        assert!(
            key_size > 0 && key_size <= size_of::<T>(),
            "key must occupy the leading bytes of the item"
        );

        if capacity > MAX_MAP_CAPACITY {
            arena.oom(capacity);
        }
        let cap = capacity.max(1).next_power_of_two();
        let (base, items) = allocate::<T>(arena, cap);
        let slots = alloc_slots(arena, cap);
        // SAFETY: freshly reserved header + items region.
        unsafe {
            write_header(
                base,
                MapHeader {
                    arena: ptr::from_ref(arena),
                    slots,
                    spare: ptr::null_mut(),
                    len: 0,
                    cap,
                    tombstones: 0,
                    item_size: size_of::<T>(),
                    key_size,
                    kind,
                    magic: MAP_MAGIC,
                },
            );
            zero_item(items.as_ptr());
        }
        Self { items, _arena: PhantomData }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.header().len
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item capacity; always a power of two.
    pub fn capacity(&self) -> usize {
        self.header().cap
    }

    /// How keys are read out of items.
    pub fn key_kind(&self) -> KeyKind {
        self.header().kind
    }

    /// Bytes of each item that belong to the key.
    pub fn key_size(&self) -> usize {
        self.header().key_size
    }

    /// The items in insertion order (deletion swaps the last item into the
    /// vacated position).
    pub fn items(&self) -> &[T] {
        let h = self.header();
        // SAFETY: `len` items are initialised.
        unsafe { slice::from_raw_parts(self.items.as_ptr(), h.len) }
    }

    /// Iterates over the items in dense-array order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.items().iter()
    }

    // ── lookup ─────────────────────────────────────────────────────────────

    /// Looks up by opaque key value. `K` must match the map's `key_size`.
    pub fn find_opaque<K: Copy>(&self, key: &K) -> Option<&T> {
        let h = self.header();
        debug_assert_eq!(h.kind, KeyKind::Opaque, "handle keyed by pointer, not value");
        debug_assert_eq!(size_of::<K>(), h.key_size, "key width mismatch");
        self.find_bytes(opaque_key_bytes(key))
    }

    /// Looks up by string contents (maps created with
    /// [`ArenaMap::with_str_keys`]).
    pub fn find_str(&self, key: &str) -> Option<&T> {
        debug_assert_eq!(self.header().kind, KeyKind::Str, "handle not string-keyed");
        self.find_bytes(key.as_bytes())
    }

    /// Looks up by slice contents (maps created with
    /// [`ArenaMap::with_slice_keys`]).
    pub fn find_slice(&self, key: &[u8]) -> Option<&T> {
        debug_assert_eq!(self.header().kind, KeyKind::Slice, "handle not slice-keyed");
        self.find_bytes(key)
    }

    fn find_bytes(&self, key: &[u8]) -> Option<&T> {
        let h = self.header();
        let hash = self.arena().hash_of(key);
        match self.probe(&h, hash, key) {
            // SAFETY: probe indexes stay within the dense array.
            Probe::Found { index, .. } => Some(unsafe { &*self.items.as_ptr().add(index) }),
            Probe::Vacant { .. } => None,
        }
    }

    // ── mutation ───────────────────────────────────────────────────────────

    /// Returns the item with `item`'s key, inserting `item` if absent.
    ///
    /// The flag reports whether the item was already present; when it was,
    /// the stored item is returned untouched (see [`ArenaMap::update`] to
    /// overwrite).
    pub fn find_or_insert(&mut self, item: T) -> (&mut T, bool) {
        self.ensure_space(1);
        let mut h = self.header();
        // SAFETY: `item` is a live value; its key prefix is readable.
        let key = unsafe { item_key_bytes(h.kind, h.key_size, (&raw const item).cast::<u8>()) };
        let hash = self.arena().hash_of(key);

        match self.probe(&h, hash, key) {
            Probe::Found { index, .. } => {
                // SAFETY: `index < len`.
                (unsafe { &mut *self.items.as_ptr().add(index) }, true)
            }
            Probe::Vacant { slot } => {
                let index = h.len;
                let slot_count = h.cap * 2;
                // SAFETY: ensure_space guarantees `len < cap`, so the item
                // and the sentinel behind it stay inside the allocation; the
                // slot indexes are masked.
                unsafe {
                    self.items.as_ptr().add(index).write(item);
                    zero_item(self.items.as_ptr().add(index + 1));
                    *h.slots.add(slot) = hash;
                    *h.slots.add(slot_count + slot) = index as u32;
                }
                h.len = index + 1;
                self.set_header(h);
                // SAFETY: just written.
                (unsafe { &mut *self.items.as_ptr().add(index) }, false)
            }
        }
    }

    /// Inserts `item`, overwriting the stored item (key and value portions
    /// both) when the key is already present.
    pub fn update(&mut self, item: T) -> &mut T {
        let (entry, found) = self.find_or_insert(item);
        if found {
            *entry = item;
        }
        entry
    }

    /// Removes by opaque key value; reports whether anything was removed.
    pub fn remove_opaque<K: Copy>(&mut self, key: &K) -> bool {
        let h = self.header();
        debug_assert_eq!(h.kind, KeyKind::Opaque, "handle keyed by pointer, not value");
        debug_assert_eq!(size_of::<K>(), h.key_size, "key width mismatch");
        self.remove_bytes(opaque_key_bytes(key))
    }

    /// Removes by string contents.
    pub fn remove_str(&mut self, key: &str) -> bool {
        debug_assert_eq!(self.header().kind, KeyKind::Str, "handle not string-keyed");
        self.remove_bytes(key.as_bytes())
    }

    /// Removes by slice contents.
    pub fn remove_slice(&mut self, key: &[u8]) -> bool {
        debug_assert_eq!(self.header().kind, KeyKind::Slice, "handle not slice-keyed");
        self.remove_bytes(key)
    }

    fn remove_bytes(&mut self, key: &[u8]) -> bool {
        let mut h = self.header();
        let hash = self.arena().hash_of(key);
        let Probe::Found { slot, index } = self.probe(&h, hash, key) else {
            return false;
        };
        let slot_count = h.cap * 2;
        let last = h.len - 1;
        // SAFETY: all offsets are bounded by the live table and dense array.
        unsafe {
            *h.slots.add(slot) = TOMBSTONE;
            h.tombstones += 1;

            if index != last {
                let src = self.items.as_ptr().add(last);
                let dst = self.items.as_ptr().add(index);
                ptr::copy_nonoverlapping(src, dst, 1);

                // Repoint the moved item's slot at its new position.
                let moved_key = item_key_bytes(h.kind, h.key_size, dst.cast_const().cast::<u8>());
                let moved_hash = self.arena().hash_of(moved_key);
                let mask = slot_count - 1;
                let mut s = (moved_hash as usize) & mask;
                loop {
                    let hw = *h.slots.add(s);
                    debug_assert_ne!(hw, EMPTY, "slot table lost an entry");
                    if hw == moved_hash && *h.slots.add(slot_count + s) as usize == last {
                        *h.slots.add(slot_count + s) = index as u32;
                        break;
                    }
                    s = (s + 1) & mask;
                }
            }

            h.len = last;
            self.set_header(h);
            zero_item(self.items.as_ptr().add(last));
        }
        true
    }

    // ── capacity ───────────────────────────────────────────────────────────

    /// Guarantees room for `count` more insertions without touching the slot
    /// table again.
    ///
    /// Grows to 1.5× the future length when slots run out; if growth alone
    /// does not clear the tombstones (because the capacity did not change),
    /// the slot table is rebuilt in place through a retained spare table.
    pub fn ensure_space(&mut self, count: usize) {
        let h = self.header();
        if h.cap - h.tombstones - h.len >= count {
            return;
        }
        let Some(future) = h.len.checked_add(count) else {
            self.arena().oom(count);
        };
        if future > MAX_MAP_CAPACITY {
            self.arena().oom(future);
        }
        let desired = future.saturating_add(future / 2).min(MAX_MAP_CAPACITY);
        self.set_capacity(desired);
        if self.header().tombstones > 0 {
            self.rebuild_slots();
        }
    }

    /// Grows the capacity to the next power of two at or above
    /// `new_capacity`. Shrinking is impossible; smaller values are no-ops.
    pub fn set_capacity(&mut self, new_capacity: usize) {
        let h = self.header();
        if new_capacity > MAX_MAP_CAPACITY {
            self.arena().oom(new_capacity);
        }
        let new_cap = new_capacity.max(1).next_power_of_two();
        if new_cap <= h.cap {
            return;
        }
        let fresh = self.clone_into(new_cap);
        self.invalidate();
        self.items = fresh.items;
    }

    /// Allocates an independent copy with capacity at least `min_capacity`.
    pub fn copy_with_capacity(&self, min_capacity: usize) -> Self {
        let h = self.header();
        if min_capacity > MAX_MAP_CAPACITY {
            self.arena().oom(min_capacity);
        }
        let cap = min_capacity.max(h.len).max(1).next_power_of_two();
        self.clone_into(cap)
    }

    // ── internals ──────────────────────────────────────────────────────────

    /// Walks the probe sequence for `key`, stopping at a matching occupied
    /// slot or the first empty one. Tombstones are stepped over on lookup and
    /// never reused for insertion; the growth policy keeps walks short
    /// instead.
    fn probe(&self, h: &MapHeader, hash: u32, key: &[u8]) -> Probe {
        let slot_count = h.cap * 2;
        let mask = slot_count - 1;
        let mut s = (hash as usize) & mask;
        // SAFETY: slot offsets are masked into the table; item indexes stored
        // in occupied slots are within the dense array.
        unsafe {
            loop {
                let hw = *h.slots.add(s);
                if hw == EMPTY {
                    return Probe::Vacant { slot: s };
                }
                if hw == hash {
                    let index = *h.slots.add(slot_count + s) as usize;
                    let item = self.items.as_ptr().add(index).cast_const().cast::<u8>();
                    if item_key_bytes(h.kind, h.key_size, item) == key {
                        return Probe::Found { slot: s, index };
                    }
                }
                s = (s + 1) & mask;
            }
        }
    }

    /// Fresh header + dense array + slot table at `new_cap`, with every
    /// occupied slot reprobed under the new mask.
    fn clone_into(&self, new_cap: usize) -> Self {
        let h = self.header();
        debug_assert!(new_cap.is_power_of_two() && new_cap >= h.len);
        let arena = self.arena();
        let (base, items) = allocate::<T>(arena, new_cap);
        let slots = alloc_slots(arena, new_cap);
        let new_slot_count = new_cap * 2;
        let mask = new_slot_count - 1;
        // SAFETY: fresh disjoint allocations of the computed sizes; the old
        // table's occupied entries carry valid hashes and indexes.
        unsafe {
            ptr::copy_nonoverlapping(self.items.as_ptr(), items.as_ptr(), h.len);
            zero_item(items.as_ptr().add(h.len));

            let old_slot_count = h.cap * 2;
            for s in 0..old_slot_count {
                let hw = *h.slots.add(s);
                if hw < MIN_HASH {
                    continue;
                }
                let index = *h.slots.add(old_slot_count + s);
                let mut ns = (hw as usize) & mask;
                while *slots.add(ns) != EMPTY {
                    ns = (ns + 1) & mask;
                }
                *slots.add(ns) = hw;
                *slots.add(new_slot_count + ns) = index;
            }

            write_header(
                base,
                MapHeader {
                    arena: ptr::from_ref(arena),
                    slots,
                    spare: ptr::null_mut(),
                    len: h.len,
                    cap: new_cap,
                    tombstones: 0,
                    item_size: h.item_size,
                    key_size: h.key_size,
                    kind: h.kind,
                    magic: MAP_MAGIC,
                },
            );
        }
        Self { items, _arena: PhantomData }
    }

    /// Clears tombstones by reprobing every occupied slot into the spare
    /// table, then swaps the tables. The spare is allocated once and kept.
    fn rebuild_slots(&mut self) {
        let mut h = self.header();
        let slot_count = h.cap * 2;
        let words = h.cap * 4;
        let arena = self.arena();
        // SAFETY: table offsets are bounded; the spare is sized like the
        // active table.
        unsafe {
            if h.spare.is_null() {
                let Some(bytes) = words.checked_mul(size_of::<u32>()) else {
                    arena.oom(words);
                };
                h.spare = arena.alloc_raw(bytes, align_of::<u32>()).as_ptr().cast::<u32>();
            } else {
                ptr::write_bytes(h.spare, 0, words);
            }

            let mask = slot_count - 1;
            for s in 0..slot_count {
                let hw = *h.slots.add(s);
                if hw < MIN_HASH {
                    continue;
                }
                let index = *h.slots.add(slot_count + s);
                let mut ns = (hw as usize) & mask;
                while *h.spare.add(ns) != EMPTY {
                    ns = (ns + 1) & mask;
                }
                *h.spare.add(ns) = hw;
                *h.spare.add(slot_count + ns) = index;
            }
        }
        std::mem::swap(&mut h.slots, &mut h.spare);
        h.tombstones = 0;
        self.set_header(h);
    }

    fn header(&self) -> MapHeader {
        // SAFETY: the header always sits `HEADER_SIZE` bytes before the dense
        // array, in the same allocation.
        let h = unsafe { *header_ptr(self.items) };
        debug_assert_eq!(h.magic, MAP_MAGIC, "stale or foreign map handle");
        debug_assert_eq!(h.item_size, size_of::<T>(), "handle used at the wrong item type");
        h
    }

    fn set_header(&mut self, h: MapHeader) {
        // SAFETY: as in `header`.
        unsafe {
            *header_ptr(self.items) = h;
        }
    }

    fn arena(&self) -> &'a Arena {
        // SAFETY: handles never outlive their arena (`'a`).
        unsafe { &*self.header().arena }
    }

    fn invalidate(&mut self) {
        let mut h = self.header();
        h.magic = 0;
        // SAFETY: header and first item slot are live until the handle moves.
        unsafe {
            *header_ptr(self.items) = h;
            zero_item(self.items.as_ptr());
        }
    }
}

impl<'s, T: Copy> IntoIterator for &'s ArenaMap<'_, T> {
    type Item = &'s T;
    type IntoIter = slice::Iter<'s, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Copy> fmt::Debug for ArenaMap<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("kind", &self.key_kind())
            .finish_non_exhaustive()
    }
}

fn header_ptr<T>(items: NonNull<T>) -> *mut MapHeader {
    // SAFETY: the dense array is always preceded by its header.
    unsafe { items.as_ptr().cast::<u8>().sub(HEADER_SIZE).cast::<MapHeader>() }
}

/// # Safety
///
/// `base` must point at a writable, aligned header slot.
unsafe fn write_header(base: NonNull<u8>, h: MapHeader) {
    // SAFETY: per contract.
    unsafe {
        base.as_ptr().cast::<MapHeader>().write(h);
    }
}

/// # Safety
///
/// `item` must be writable for one item's worth of bytes.
unsafe fn zero_item<T>(item: *mut T) {
    // SAFETY: per contract.
    unsafe {
        ptr::write_bytes(item.cast::<u8>(), 0, size_of::<T>());
    }
}

fn opaque_key_bytes<K: Copy>(key: &K) -> &[u8] {
    // SAFETY: any `&K` is readable for `size_of::<K>()` bytes.
    unsafe { slice::from_raw_parts(ptr::from_ref(key).cast::<u8>(), size_of::<K>()) }
}

/// Resolves the logical key bytes of the item at `item`.
///
/// # Safety
///
/// `item` must point at a live item of the map's type; for pointer-keyed
/// kinds the pointed-to key data must still be valid.
unsafe fn item_key_bytes<'k>(kind: KeyKind, key_size: usize, item: *const u8) -> &'k [u8] {
    // SAFETY: per contract; the reads below stay within the key prefix or
    // the key data it points to.
    unsafe {
        match kind {
            KeyKind::Opaque => slice::from_raw_parts(item, key_size),
            KeyKind::Str => {
                let p = ptr::read_unaligned(item.cast::<*const u8>());
                let mut n = 0;
                while *p.add(n) != 0 {
                    n += 1;
                }
                slice::from_raw_parts(p, n)
            }
            KeyKind::Slice => {
                let p = ptr::read_unaligned(item.cast::<*const u8>());
                let n = ptr::read_unaligned(item.add(size_of::<*const u8>()).cast::<usize>());
                slice::from_raw_parts(p, n)
            }
        }
    }
}

fn total_bytes<T>(capacity: usize) -> Option<usize> {
    capacity
        .checked_add(1)?
        .checked_mul(size_of::<T>())?
        .checked_add(HEADER_SIZE)
}

/// Reserves header + `capacity + 1` item slots; returns (base, items).
fn allocate<T>(arena: &Arena, capacity: usize) -> (NonNull<u8>, NonNull<T>) {
    let Some(total) = total_bytes::<T>(capacity) else {
        arena.oom(capacity);
    };
    let base = arena.alloc_raw_uninit(total, HEADER_ALIGN);
    // SAFETY: `total > HEADER_SIZE`.
    let items = unsafe { NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE).cast::<T>()) };
    (base, items)
}

/// Zeroed slot table for `capacity` items: `capacity * 4` 32-bit words.
fn alloc_slots(arena: &Arena, capacity: usize) -> *mut u32 {
    let Some(bytes) = capacity
        .checked_mul(4)
        .and_then(|words| words.checked_mul(size_of::<u32>()))
    else {
        arena.oom(capacity);
    };
    arena.alloc_raw(bytes, align_of::<u32>()).as_ptr().cast::<u32>()
}
