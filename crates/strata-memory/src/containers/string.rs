//! Growable null-terminated byte string backed by an arena.

use std::fmt::{self, Write as _};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::arena::Arena;
use crate::arena::fmt::BoundedWriter;

const STRING_MAGIC: u32 = 0x5354_5241;

/// Header stored immediately before the string's payload bytes.
#[repr(C)]
#[derive(Clone, Copy)]
struct StrHeader {
    arena: *const Arena,
    /// Payload bytes, excluding the terminator.
    len: usize,
    /// Payload capacity, excluding the terminator slot.
    cap: usize,
    magic: u32,
}

const HEADER_SIZE: usize = size_of::<StrHeader>();
const HEADER_ALIGN: usize = align_of::<StrHeader>();

/// A growable byte string allocated from an [`Arena`].
///
/// The handle is a single pointer to the payload; the header (back-reference
/// to the arena, length, capacity) sits immediately before it in the same
/// allocation. The byte after the last payload byte is always 0, so the
/// payload doubles as a C-style string for code that expects one — interior
/// null bytes are nevertheless allowed.
///
/// Growth first attempts the arena's last-allocation in-place resize; only
/// when another allocation has intervened does it copy to a fresh payload and
/// invalidate the old header.
///
/// # Examples
///
/// ```
/// use strata_memory::{Arena, ArenaString};
///
/// let arena = Arena::new();
/// let mut s = ArenaString::new(&arena, 8);
/// s.push_str("hello");
/// s.push_str(", world");
/// assert_eq!(s.as_bytes(), b"hello, world");
/// assert_eq!(s.as_bytes_with_nul().last(), Some(&0));
/// ```
pub struct ArenaString<'a> {
    payload: NonNull<u8>,
    _arena: PhantomData<&'a Arena>,
}

impl<'a> ArenaString<'a> {
    /// Creates an empty string with room for `capacity` bytes.
    pub fn new(arena: &'a Arena, capacity: usize) -> Self {
        let (base, payload) = allocate(arena, capacity);
        // SAFETY: freshly reserved header + payload region.
        unsafe {
            write_header(base, StrHeader { arena: ptr::from_ref(arena), len: 0, cap: capacity, magic: STRING_MAGIC });
            *payload.as_ptr() = 0;
        }
        Self { payload, _arena: PhantomData }
    }

    /// Creates a string from format arguments, with no reserved slack.
    ///
    /// Reserves the remainder of the current block, formats into it, then
    /// shrinks to the exact length; if the reservation overflows the space is
    /// handed back and a right-sized buffer is used instead. Usually invoked
    /// through [`astr_format!`](crate::astr_format).
    pub fn from_fmt(arena: &'a Arena, args: fmt::Arguments<'_>) -> Self {
        let floor = arena.config().fmt_reserve_floor;
        let min_total = HEADER_SIZE + floor + 1;
        let reserve = arena.pre_alloc(min_total, HEADER_ALIGN);
        let base = arena.alloc_raw_uninit(reserve, HEADER_ALIGN);
        // SAFETY: `reserve >= min_total > HEADER_SIZE`.
        let payload = unsafe { base.as_ptr().add(HEADER_SIZE) };
        let cap = reserve - HEADER_SIZE - 1;

        // SAFETY: `payload` is valid for `cap + 1` bytes.
        let mut writer = unsafe { BoundedWriter::new(payload, cap) };
        let _ = writer.write_fmt(args);
        let len = writer.needed();

        if len <= cap {
            let fitted = arena.resize_last(base, HEADER_SIZE + len + 1);
            debug_assert!(fitted);
            // SAFETY: region retained by the resize.
            unsafe {
                *payload.add(len) = 0;
                write_header(base, StrHeader { arena: ptr::from_ref(arena), len, cap: len, magic: STRING_MAGIC });
                return Self { payload: NonNull::new_unchecked(payload), _arena: PhantomData };
            }
        }

        // The block remainder was too short; return it and take an exact fit.
        let returned = arena.resize_last(base, 0);
        debug_assert!(returned);
        let Some(total) = HEADER_SIZE.checked_add(len).and_then(|t| t.checked_add(1)) else {
            arena.oom(len);
        };
        let base = arena.alloc_raw_uninit(total, HEADER_ALIGN);
        // SAFETY: `total > HEADER_SIZE`.
        let payload = unsafe { base.as_ptr().add(HEADER_SIZE) };
        // SAFETY: `payload` is valid for `len + 1` bytes.
        let mut writer = unsafe { BoundedWriter::new(payload, len) };
        let _ = writer.write_fmt(args);
        if writer.needed() != len {
            arena.oom(total);
        }
        // SAFETY: exactly `len` bytes written; header slot is ours.
        unsafe {
            *payload.add(len) = 0;
            write_header(base, StrHeader { arena: ptr::from_ref(arena), len, cap: len, magic: STRING_MAGIC });
            Self { payload: NonNull::new_unchecked(payload), _arena: PhantomData }
        }
    }

    /// Allocates an independent copy with capacity at least `min_capacity`.
    pub fn copy_with_capacity(&self, min_capacity: usize) -> Self {
        let h = self.header();
        let cap = min_capacity.max(h.len);
        // SAFETY: the header's arena outlives `'a`.
        let arena: &'a Arena = unsafe { &*h.arena };
        let (base, payload) = allocate(arena, cap);
        // SAFETY: fresh region; source and destination are disjoint.
        unsafe {
            ptr::copy_nonoverlapping(self.payload.as_ptr(), payload.as_ptr(), h.len);
            *payload.as_ptr().add(h.len) = 0;
            write_header(base, StrHeader { arena: ptr::from_ref(arena), len: h.len, cap, magic: STRING_MAGIC });
        }
        Self { payload, _arena: PhantomData }
    }

    /// Payload length in bytes, excluding the terminator.
    pub fn len(&self) -> usize {
        self.header().len
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload capacity in bytes, excluding the terminator slot.
    pub fn capacity(&self) -> usize {
        self.header().cap
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let h = self.header();
        // SAFETY: the payload holds `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.payload.as_ptr(), h.len) }
    }

    /// The payload bytes including the trailing null.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        let h = self.header();
        // SAFETY: `payload[len]` is the terminator, always initialised.
        unsafe { std::slice::from_raw_parts(self.payload.as_ptr(), h.len + 1) }
    }

    /// Changes the capacity.
    ///
    /// Values below the current length are clamped up to it. Growth tries the
    /// in-place resize first and falls back to copy-and-invalidate; shrinking
    /// succeeds only in place (arena memory cannot be returned).
    pub fn set_capacity(&mut self, new_capacity: usize) {
        let mut h = self.header();
        let new_cap = new_capacity.max(h.len);
        if new_cap == h.cap {
            return;
        }
        let arena = self.arena();
        let Some(total) = HEADER_SIZE.checked_add(new_cap).and_then(|t| t.checked_add(1)) else {
            arena.oom(new_cap);
        };
        let base = self.base_ptr();
        if arena.resize_last(base, total) {
            h.cap = new_cap;
            self.set_header(h);
            return;
        }
        if new_cap < h.cap {
            return;
        }
        let fresh = self.copy_with_capacity(new_cap);
        self.invalidate();
        self.payload = fresh.payload;
    }

    /// Sets the length, zero-filling any newly exposed bytes.
    pub fn resize(&mut self, new_len: usize) {
        if new_len > self.header().cap {
            self.set_capacity(new_len);
        }
        let mut h = self.header();
        // SAFETY: `new_len <= cap`, so the touched range ends at the
        // terminator slot at worst.
        unsafe {
            if new_len > h.len {
                ptr::write_bytes(self.payload.as_ptr().add(h.len), 0, new_len - h.len + 1);
            } else {
                *self.payload.as_ptr().add(new_len) = 0;
            }
        }
        h.len = new_len;
        self.set_header(h);
    }

    /// Empties the string, keeping its capacity.
    pub fn clear(&mut self) {
        self.resize(0);
    }

    /// Appends raw bytes, doubling capacity on growth.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let h = self.header();
        let Some(new_len) = h.len.checked_add(bytes.len()) else {
            self.arena().oom(bytes.len());
        };
        if new_len > h.cap {
            self.set_capacity(new_len.saturating_mul(2));
        }
        let h = self.header();
        // SAFETY: capacity now covers `new_len` plus the terminator.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.payload.as_ptr().add(h.len), bytes.len());
            *self.payload.as_ptr().add(new_len) = 0;
        }
        let mut h = h;
        h.len = new_len;
        self.set_header(h);
    }

    /// Appends a string slice.
    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Appends formatted output.
    ///
    /// Formats straight into the unused capacity; on overflow the capacity is
    /// grown to twice the required length and the output re-rendered.
    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) {
        let h = self.header();
        let space = h.cap - h.len;
        // SAFETY: `payload[len..cap+1]` is within the allocation.
        let mut writer =
            unsafe { BoundedWriter::new(self.payload.as_ptr().add(h.len), space) };
        let _ = writer.write_fmt(args);
        let needed = writer.needed();

        if needed <= space {
            // SAFETY: terminator slot is within capacity.
            unsafe {
                *self.payload.as_ptr().add(h.len + needed) = 0;
            }
            let mut h = h;
            h.len += needed;
            self.set_header(h);
            return;
        }

        let arena = self.arena();
        let Some(new_len) = h.len.checked_add(needed) else {
            arena.oom(needed);
        };
        self.set_capacity(new_len.saturating_mul(2));

        let h = self.header();
        let space = h.cap - h.len;
        // SAFETY: as above, against the grown payload.
        let mut writer =
            unsafe { BoundedWriter::new(self.payload.as_ptr().add(h.len), space) };
        let _ = writer.write_fmt(args);
        if writer.needed() > space {
            arena.oom(new_len);
        }
        let needed = writer.needed();
        // SAFETY: fits now.
        unsafe {
            *self.payload.as_ptr().add(h.len + needed) = 0;
        }
        let mut h = h;
        h.len += needed;
        self.set_header(h);
    }

    /// Writes `data` at byte `offset`, growing as needed.
    ///
    /// Writing past the current length zero-fills the gap and extends the
    /// string; writing inside it overwrites in place.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        let Some(end) = offset.checked_add(data.len()) else {
            self.arena().oom(data.len());
        };
        if end > self.header().cap {
            self.set_capacity(end.saturating_mul(2));
        }
        let mut h = self.header();
        // SAFETY: capacity covers `end` plus the terminator slot.
        unsafe {
            if offset > h.len {
                ptr::write_bytes(self.payload.as_ptr().add(h.len), 0, offset - h.len);
            }
            ptr::copy_nonoverlapping(data.as_ptr(), self.payload.as_ptr().add(offset), data.len());
            if end > h.len {
                *self.payload.as_ptr().add(end) = 0;
                h.len = end;
            }
        }
        self.set_header(h);
    }

    /// Compacts the string into a plain null-terminated byte allocation,
    /// consuming the handle.
    ///
    /// When the string is still the arena's most recent allocation, the
    /// payload slides down over the header and the header's space is
    /// reclaimed; otherwise the existing payload is returned as-is. The
    /// returned slice includes the terminator.
    pub fn into_bytes(self) -> &'a mut [u8] {
        let h = self.header();
        let arena: &'a Arena = unsafe { &*h.arena };
        let base = self.base_ptr();
        // SAFETY: the header is live until the handle is gone.
        unsafe {
            (*header_ptr(self.payload)).magic = 0;
        }
        if arena.resize_last(base, h.len + 1) {
            // SAFETY: source and destination overlap; `copy` handles that.
            unsafe {
                ptr::copy(self.payload.as_ptr(), base.as_ptr(), h.len + 1);
                std::slice::from_raw_parts_mut(base.as_ptr(), h.len + 1)
            }
        } else {
            // SAFETY: payload plus terminator stay valid for `'a`.
            unsafe { std::slice::from_raw_parts_mut(self.payload.as_ptr(), h.len + 1) }
        }
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn header(&self) -> StrHeader {
        // SAFETY: the header always sits `HEADER_SIZE` bytes before the
        // payload, in the same allocation.
        let h = unsafe { *header_ptr(self.payload) };
        debug_assert_eq!(h.magic, STRING_MAGIC, "stale or foreign string handle");
        h
    }

    fn set_header(&mut self, h: StrHeader) {
        // SAFETY: as in `header`.
        unsafe {
            *header_ptr(self.payload) = h;
        }
    }

    fn arena(&self) -> &'a Arena {
        // SAFETY: handles never outlive their arena (`'a`).
        unsafe { &*self.header().arena }
    }

    fn base_ptr(&self) -> NonNull<u8> {
        // SAFETY: derived from a valid payload pointer.
        unsafe { NonNull::new_unchecked(header_ptr(self.payload).cast::<u8>()) }
    }

    /// Marks the current header stale and clears the first payload byte.
    fn invalidate(&mut self) {
        // SAFETY: header and payload are live until the handle moves on.
        unsafe {
            (*header_ptr(self.payload)).magic = 0;
            *self.payload.as_ptr() = 0;
        }
    }
}

impl fmt::Write for ArenaString<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl fmt::Debug for ArenaString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaString")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

fn header_ptr(payload: NonNull<u8>) -> *mut StrHeader {
    // SAFETY: the payload is always preceded by its header.
    unsafe { payload.as_ptr().sub(HEADER_SIZE).cast::<StrHeader>() }
}

/// # Safety
///
/// `base` must point at a writable header slot.
unsafe fn write_header(base: NonNull<u8>, h: StrHeader) {
    // SAFETY: per contract.
    unsafe {
        base.as_ptr().cast::<StrHeader>().write(h);
    }
}

/// Reserves header + `capacity + 1` payload bytes; returns (base, payload).
fn allocate(arena: &Arena, capacity: usize) -> (NonNull<u8>, NonNull<u8>) {
    let Some(total) = HEADER_SIZE.checked_add(capacity).and_then(|t| t.checked_add(1)) else {
        arena.oom(capacity);
    };
    let base = arena.alloc_raw_uninit(total, HEADER_ALIGN);
    // SAFETY: `total > HEADER_SIZE`.
    let payload = unsafe { NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE)) };
    (base, payload)
}
