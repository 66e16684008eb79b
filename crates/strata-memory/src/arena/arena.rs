//! The bump allocation engine.

use std::cell::{Cell, RefCell};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use tracing::{debug, error, trace};

use super::block::{self, BLOCK_OVERHEAD, BlockHeader};
use super::stats::ArenaFootprint;
use super::ArenaConfig;
use crate::error::MemoryResult;
use crate::hash::halfsiphash;
use crate::utils::{MAX_ALIGN, align_up};

/// A region allocator.
///
/// The arena starts empty and grows by appending blocks of strictly doubling
/// size. Allocations are served by bumping a cursor within the newest block
/// and are never freed individually; [`Arena::clear`] drops every block but
/// the newest and [`Arena::free`] drops them all, after which the arena is
/// reusable.
///
/// Allocation methods take `&self`: the cursor lives in [`Cell`]s so that the
/// arena-backed containers, each holding a shared borrow, can all allocate
/// from the same arena. The arena is strictly single-threaded (`!Sync`).
///
/// Out of memory is not an error the caller sees. When the system allocator
/// fails, the arena runs the hook installed with [`Arena::set_oom_hook`] and
/// aborts the process.
///
/// # Examples
///
/// ```
/// use strata_memory::{Arena, ArenaConfig};
///
/// let mut arena = Arena::with_config(ArenaConfig::small_blocks());
/// let nums = arena.alloc_slice(&[1u64, 2, 3]);
/// nums[0] = 10;
/// assert_eq!(nums, &[10, 2, 3]);
///
/// arena.clear(); // nums is statically unusable from here on
/// ```
pub struct Arena {
    /// Newest block, or null while the arena is empty.
    head: Cell<*mut BlockHeader>,
    /// Start of the most recent allocation from the current block.
    last_alloc: Cell<*mut u8>,
    /// First free byte of the current block.
    free_ptr: Cell<*mut u8>,
    /// One past the end of the current block.
    end_ptr: Cell<*mut u8>,
    /// Bytes needed if every finalised allocation were packed into one block.
    /// Usage of the current block is folded in only when that block is
    /// finished (growth, `clear`, `free`).
    size_estimate: Cell<usize>,
    /// High-water mark of `size_estimate`; drives block sizing on reuse.
    size_estimate_high: Cell<usize>,
    /// Keyed-hash key; 0 means "not yet seeded".
    hash_key: Cell<u64>,
    oom_hook: RefCell<Option<Box<dyn Fn(usize)>>>,
    config: ArenaConfig,
}

impl Arena {
    /// Creates an empty arena with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates an empty arena with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails [`ArenaConfig::validate`].
    #[must_use]
    pub fn with_config(config: ArenaConfig) -> Self {
        Self::try_with_config(config).expect("invalid arena configuration")
    }

    /// Creates an empty arena, reporting configuration errors.
    pub fn try_with_config(config: ArenaConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self {
            head: Cell::new(ptr::null_mut()),
            last_alloc: Cell::new(ptr::null_mut()),
            free_ptr: Cell::new(ptr::null_mut()),
            end_ptr: Cell::new(ptr::null_mut()),
            size_estimate: Cell::new(0),
            size_estimate_high: Cell::new(0),
            hash_key: Cell::new(0),
            oom_hook: RefCell::new(None),
            config,
        })
    }

    /// The configuration this arena was built with.
    #[inline]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    // ── raw allocation ─────────────────────────────────────────────────────

    /// Allocates `size` bytes at `alignment`, zero-filled.
    ///
    /// `alignment` must be a power of two no greater than [`MAX_ALIGN`].
    pub fn alloc_raw(&self, size: usize, alignment: usize) -> NonNull<u8> {
        let ptr = self.alloc_raw_uninit(size, alignment);
        // SAFETY: the region was just carved out of the current block.
        unsafe {
            ptr::write_bytes(ptr.as_ptr(), 0, size);
        }
        ptr
    }

    /// Allocates `size` bytes at `alignment` without initialising them.
    ///
    /// The containers use this and initialise only the fields they need.
    pub fn alloc_raw_uninit(&self, size: usize, alignment: usize) -> NonNull<u8> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        debug_assert!(alignment <= MAX_ALIGN, "alignment above MAX_ALIGN is unsupported");

        loop {
            let free = self.free_ptr.get();
            if !free.is_null() {
                let start = align_up(free.addr(), alignment);
                if let Some(top) = start.checked_add(size) {
                    if top <= self.end_ptr.get().addr() {
                        let ptr = free.with_addr(start);
                        self.last_alloc.set(ptr);
                        self.free_ptr.set(free.with_addr(top));
                        // SAFETY: `start` lies inside the current block.
                        return unsafe { NonNull::new_unchecked(ptr) };
                    }
                }
            }
            self.grow(size, alignment);
        }
    }

    /// Grows the most recent allocation (or shrinks it) in place.
    ///
    /// Succeeds iff `ptr` is the last allocation served from the current
    /// block and `new_size` still fits the block; in that case the cursor is
    /// moved to `ptr + new_size` and the call returns `true`. On failure
    /// nothing changes. This is the only copyless growth path the containers
    /// have.
    pub fn resize_last(&self, ptr: NonNull<u8>, new_size: usize) -> bool {
        if ptr.as_ptr() != self.last_alloc.get() {
            return false;
        }
        let Some(top) = ptr.addr().get().checked_add(new_size) else {
            return false;
        };
        if top > self.end_ptr.get().addr() {
            return false;
        }
        self.free_ptr.set(ptr.as_ptr().with_addr(top));
        true
    }

    /// Makes sure the current block can serve a `(size, alignment)` request,
    /// growing exactly as [`Arena::alloc_raw`] would, and returns the number
    /// of bytes available past the alignment padding.
    ///
    /// Callers use the return value to reserve all remaining block space as a
    /// speculative upper bound, then shrink with [`Arena::resize_last`].
    pub fn pre_alloc(&self, size: usize, alignment: usize) -> usize {
        debug_assert!(alignment.is_power_of_two());
        loop {
            let free = self.free_ptr.get();
            if !free.is_null() {
                let start = align_up(free.addr(), alignment);
                let end = self.end_ptr.get().addr();
                if let Some(top) = start.checked_add(size) {
                    if top <= end {
                        return end - start;
                    }
                }
            }
            self.grow(size, alignment);
        }
    }

    /// Finalises the current block and starts a fresh one.
    ///
    /// Test hook: lets growth-policy tests draw a block boundary on demand.
    pub fn start_new_block(&self) {
        self.grow(0, 1);
    }

    // ── typed allocation ───────────────────────────────────────────────────

    /// Allocates and initialises a value.
    #[allow(clippy::mut_from_ref)] // distinct allocations never alias
    pub fn alloc<T>(&self, value: T) -> &mut T {
        let ptr = self.alloc_raw_uninit(size_of::<T>(), align_of::<T>()).cast::<T>();
        // SAFETY: properly aligned, freshly reserved space for one `T`.
        unsafe {
            ptr.as_ptr().write(value);
            &mut *ptr.as_ptr()
        }
    }

    /// Allocates space for a value without initialising it.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_uninit<T>(&self) -> &mut MaybeUninit<T> {
        let ptr = self
            .alloc_raw_uninit(size_of::<T>(), align_of::<T>())
            .cast::<MaybeUninit<T>>();
        // SAFETY: properly aligned; MaybeUninit needs no initialisation.
        unsafe { &mut *ptr.as_ptr() }
    }

    /// Allocates a copy of a slice.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &mut [T] {
        if slice.is_empty() {
            return &mut [];
        }
        let ptr = self
            .alloc_raw_uninit(size_of_val(slice), align_of::<T>())
            .cast::<T>();
        // SAFETY: freshly reserved region of the right size and alignment;
        // source and destination cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(slice.as_ptr(), ptr.as_ptr(), slice.len());
            std::slice::from_raw_parts_mut(ptr.as_ptr(), slice.len())
        }
    }

    /// Allocates a copy of a string slice.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_str(&self, s: &str) -> &mut str {
        let bytes = self.alloc_slice(s.as_bytes());
        // SAFETY: bytes came from valid UTF-8.
        unsafe { std::str::from_utf8_unchecked_mut(bytes) }
    }

    // ── lifecycle ──────────────────────────────────────────────────────────

    /// Drops every block behind the newest one and rewinds the cursor to the
    /// start of its payload.
    ///
    /// Takes `&mut self`, so every handle derived from this arena is
    /// statically invalidated.
    pub fn clear(&mut self) {
        self.finish_current_block();
        let head = self.head.get();
        self.last_alloc.set(ptr::null_mut());
        if head.is_null() {
            return;
        }
        // SAFETY: `head` is live; the tail chain is exclusively ours.
        unsafe {
            block::release_chain((*head).prev);
            (*head).prev = ptr::null_mut();
            self.free_ptr.set(BlockHeader::payload_start(head));
        }
        debug!(retained = self.held_bytes(), "arena cleared");
    }

    /// Releases every block. The arena is afterwards as good as freshly
    /// constructed (the size estimates intentionally survive, so a reused
    /// arena can anticipate its demand).
    pub fn free(&mut self) {
        self.finish_current_block();
        // SAFETY: the whole chain is exclusively ours.
        unsafe {
            block::release_chain(self.head.get());
        }
        self.head.set(ptr::null_mut());
        self.last_alloc.set(ptr::null_mut());
        self.free_ptr.set(ptr::null_mut());
        self.end_ptr.set(ptr::null_mut());
        debug!(estimate_high = self.size_estimate_high.get(), "arena freed");
    }

    // ── introspection ──────────────────────────────────────────────────────

    /// Total bytes currently held from the system allocator.
    pub fn held_bytes(&self) -> usize {
        let mut total = 0;
        let mut b = self.head.get();
        while !b.is_null() {
            // SAFETY: chain entries stay live until released.
            unsafe {
                total += (*b).size;
                b = (*b).prev;
            }
        }
        total
    }

    /// Number of blocks in the chain.
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut b = self.head.get();
        while !b.is_null() {
            // SAFETY: as in `held_bytes`.
            unsafe {
                count += 1;
                b = (*b).prev;
            }
        }
        count
    }

    /// Packed-size estimate of all finalised allocations.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate.get()
    }

    /// High-water mark of the size estimate.
    pub fn high_water_estimate(&self) -> usize {
        self.size_estimate_high.get()
    }

    /// Overrides the high-water mark, e.g. to pre-size the first block of a
    /// reused arena.
    pub fn set_high_water_estimate(&self, bytes: usize) {
        self.size_estimate_high.set(bytes);
    }

    /// Snapshot of the arena's memory footprint.
    pub fn footprint(&self) -> ArenaFootprint {
        let head = self.head.get();
        let current_block_used = if head.is_null() {
            0
        } else {
            // SAFETY: head is live.
            let payload = unsafe { BlockHeader::payload_start(head) };
            self.free_ptr.get().addr() - payload.addr()
        };
        ArenaFootprint {
            blocks: self.block_count(),
            held_bytes: self.held_bytes(),
            current_block_used,
            size_estimate: self.size_estimate.get(),
            size_estimate_high: self.size_estimate_high.get(),
        }
    }

    /// Installs the hook run (with the requested size) right before the
    /// process aborts on out-of-memory.
    pub fn set_oom_hook(&mut self, hook: impl Fn(usize) + 'static) {
        *self.oom_hook.borrow_mut() = Some(Box::new(hook));
    }

    // ── hashing ────────────────────────────────────────────────────────────

    /// Overrides the keyed-hash key. Tests use this for determinism; a value
    /// of 0 causes reseeding on next use.
    pub fn set_hash_key(&self, key: u64) {
        self.hash_key.set(key);
    }

    /// The current keyed-hash key (0 until first use).
    pub fn hash_key(&self) -> u64 {
        self.hash_key.get()
    }

    /// Hashes `bytes` under this arena's key, seeding the key on first use.
    pub(crate) fn hash_of(&self, bytes: &[u8]) -> u32 {
        let mut key = self.hash_key.get();
        if key == 0 {
            while key == 0 {
                key = rand::random();
            }
            self.hash_key.set(key);
        }
        halfsiphash(key, bytes)
    }

    // ── internals ──────────────────────────────────────────────────────────

    /// Folds the current block's usage into the size estimate.
    ///
    /// The estimate is first rounded up to [`MAX_ALIGN`] so it behaves as if
    /// every allocation started on a max-aligned boundary.
    fn finish_current_block(&self) {
        let head = self.head.get();
        if head.is_null() {
            return;
        }
        // SAFETY: head is live.
        let payload = unsafe { BlockHeader::payload_start(head) };
        let used = self.free_ptr.get().addr() - payload.addr();
        let estimate = align_up(self.size_estimate.get(), MAX_ALIGN).saturating_add(used);
        self.size_estimate.set(estimate);
        if estimate > self.size_estimate_high.get() {
            self.size_estimate_high.set(estimate);
        }
    }

    /// Appends a block able to serve a `(size, alignment)` request.
    ///
    /// The new block is the smallest power of two that fits the request plus
    /// overhead, is at least `min_block_size`, and is at least the
    /// anticipation target: double the current block when there is one, else
    /// 125% of the remembered high-water estimate.
    #[cold]
    fn grow(&self, size: usize, alignment: usize) {
        let overhead = align_up(BLOCK_OVERHEAD, alignment);
        let Some(needed) = size.checked_add(overhead) else {
            self.oom(size);
        };

        let head = self.head.get();
        let anticipated = if head.is_null() {
            let high = self.size_estimate_high.get();
            high.saturating_add(high / 4)
        } else {
            // SAFETY: head is live.
            unsafe { (*head).size + 1 }
        };

        let target = needed.max(anticipated).max(self.config.min_block_size);
        let Some(block_size) = target.checked_next_power_of_two() else {
            self.oom(size);
        };

        self.finish_current_block();

        let block = match block::alloc_block(block_size, head) {
            Ok(block) => block.as_ptr(),
            Err(_) => self.oom(size),
        };
        trace!(
            block_size,
            anticipated,
            requested = size,
            "arena appended a block"
        );

        self.head.set(block);
        self.last_alloc.set(ptr::null_mut());
        // SAFETY: freshly allocated block.
        unsafe {
            self.free_ptr.set(BlockHeader::payload_start(block));
            self.end_ptr.set(BlockHeader::end(block));
        }
    }

    /// Runs the out-of-memory hook and aborts.
    #[cold]
    pub(crate) fn oom(&self, requested: usize) -> ! {
        if let Some(hook) = self.oom_hook.borrow().as_deref() {
            hook(requested);
        }
        error!(requested, "arena out of memory; aborting");
        std::process::abort();
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: dropping owns the chain exclusively.
        unsafe {
            block::release_chain(self.head.get());
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("blocks", &self.block_count())
            .field("held_bytes", &self.held_bytes())
            .field("size_estimate", &self.size_estimate.get())
            .field("size_estimate_high", &self.size_estimate_high.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned_ptr;

    fn tiny() -> Arena {
        Arena::with_config(ArenaConfig::small_blocks())
    }

    #[test]
    fn starts_empty() {
        let arena = Arena::new();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.held_bytes(), 0);
        assert_eq!(arena.size_estimate(), 0);
    }

    #[test]
    fn serves_aligned_allocations() {
        let arena = tiny();
        let a = arena.alloc_raw(5, 1);
        let b = arena.alloc_raw(3, 8);
        assert!(is_aligned_ptr(b.as_ptr(), 8));
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert!(b.addr().get() >= a.addr().get() + 5);
    }

    #[test]
    fn zero_fills_on_request() {
        let arena = tiny();
        let ptr = arena.alloc_raw(64, 1);
        // SAFETY: freshly allocated region of 64 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn blocks_strictly_double() {
        let arena = tiny();
        arena.alloc_raw(1, 1);
        let first = arena.held_bytes();
        arena.start_new_block();
        let second = arena.held_bytes() - first;
        assert!(second >= first * 2);
        arena.start_new_block();
        let third = arena.held_bytes() - first - second;
        assert!(third >= second * 2);
    }

    #[test]
    fn resize_last_extends_in_place() {
        let arena = tiny();
        let ptr = arena.alloc_raw_uninit(8, 1);
        assert!(arena.resize_last(ptr, 24));
        let next = arena.alloc_raw_uninit(1, 1);
        assert_eq!(next.addr().get(), ptr.addr().get() + 24);
    }

    #[test]
    fn resize_last_rejects_stale_pointers() {
        let arena = tiny();
        let old = arena.alloc_raw_uninit(8, 1);
        let _other = arena.alloc_raw_uninit(8, 1);
        assert!(!arena.resize_last(old, 16));
    }

    #[test]
    fn resize_last_shrinks_to_zero() {
        let arena = tiny();
        let ptr = arena.alloc_raw_uninit(32, 1);
        assert!(arena.resize_last(ptr, 0));
        let again = arena.alloc_raw_uninit(4, 1);
        assert_eq!(again.as_ptr(), ptr.as_ptr());
    }

    #[test]
    fn pre_alloc_reports_remaining_space() {
        let arena = tiny();
        let available = arena.pre_alloc(16, 1);
        assert!(available >= 16);
        let ptr = arena.alloc_raw_uninit(available, 1);
        // The reservation consumed the block exactly.
        assert_eq!(arena.free_ptr.get().addr(), arena.end_ptr.get().addr());
        assert!(arena.resize_last(ptr, 0));
    }

    #[test]
    fn typed_helpers_round_trip() {
        let arena = tiny();
        let v = arena.alloc(0x1234_5678_u64);
        assert_eq!(*v, 0x1234_5678);

        let s = arena.alloc_str("hello");
        assert_eq!(s, "hello");

        let xs = arena.alloc_slice(&[1u16, 2, 3]);
        assert_eq!(xs, &[1, 2, 3]);

        let empty: &mut [u32] = arena.alloc_slice(&[]);
        assert!(empty.is_empty());

        let u = arena.alloc_uninit::<u32>();
        u.write(7);
    }

    #[test]
    fn clear_keeps_only_the_head_block() {
        let mut arena = tiny();
        arena.alloc_raw(1, 1);
        arena.start_new_block();
        arena.start_new_block();
        assert_eq!(arena.block_count(), 3);

        let head_size = arena.footprint().held_bytes - {
            // size of the two blocks behind the head
            let mut behind = 0;
            let head = arena.head.get();
            let mut b = unsafe { (*head).prev };
            while !b.is_null() {
                unsafe {
                    behind += (*b).size;
                    b = (*b).prev;
                }
            }
            behind
        };

        arena.clear();
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.held_bytes(), head_size);
        assert_eq!(arena.footprint().current_block_used, 0);
    }

    #[test]
    fn free_resets_to_empty_but_keeps_estimates() {
        let mut arena = tiny();
        arena.alloc_raw(100, 1);
        arena.free();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.held_bytes(), 0);
        assert!(arena.high_water_estimate() >= 100);

        // Reusable after free.
        let p = arena.alloc_raw(8, 8);
        assert!(is_aligned_ptr(p.as_ptr(), 8));
    }

    #[test]
    fn reuse_anticipates_from_high_water() {
        let mut arena = tiny();
        arena.alloc_raw(3000, 1);
        arena.free();
        let high = arena.high_water_estimate();
        assert!(high >= 3000);

        arena.alloc_raw(1, 1);
        // First block of the reused arena covers 125% of the high-water mark.
        assert!(arena.held_bytes() >= high + high / 4);
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn estimate_folds_in_finished_blocks_only() {
        let arena = tiny();
        arena.alloc_raw(10, 1);
        assert_eq!(arena.size_estimate(), 0);
        arena.start_new_block();
        assert!(arena.size_estimate() >= 10);
    }

    #[test]
    fn hash_key_seeds_once_and_can_be_pinned() {
        let arena = Arena::new();
        assert_eq!(arena.hash_key(), 0);
        let h1 = arena.hash_of(b"x");
        let key = arena.hash_key();
        assert_ne!(key, 0);
        assert_eq!(arena.hash_of(b"x"), h1);

        arena.set_hash_key(0xfeed_face_dead_beef);
        assert_ne!(arena.hash_key(), key);
    }

    #[test]
    fn debug_output_is_cheap() {
        let arena = tiny();
        arena.alloc_raw(1, 1);
        let text = format!("{arena:?}");
        assert!(text.contains("Arena"));
    }
}
