//! Arena-backed formatted printing.
//!
//! The strategy mirrors a bounded `snprintf` loop: speculatively reserve the
//! rest of the current block, format into it while counting the bytes the
//! output actually needs, then either shrink the reservation to the exact
//! length or hand the space back and retry once with a right-sized buffer.

use std::fmt::{self, Write};
use std::ptr::{self, NonNull};

use super::arena::Arena;

/// A bounded writer over raw arena bytes.
///
/// Copies what fits and keeps counting past the end, so after formatting the
/// caller knows both whether the output fit and how many bytes it needs.
pub(crate) struct BoundedWriter {
    buf: *mut u8,
    capacity: usize,
    written: usize,
    needed: usize,
}

impl BoundedWriter {
    /// # Safety
    ///
    /// `buf` must be valid for writes of `capacity` bytes for the writer's
    /// lifetime.
    pub(crate) unsafe fn new(buf: *mut u8, capacity: usize) -> Self {
        Self { buf, capacity, written: 0, needed: 0 }
    }

    /// Bytes the output requires in total, fitting or not.
    pub(crate) fn needed(&self) -> usize {
        self.needed
    }

    /// Whether everything written so far fit the buffer.
    pub(crate) fn fits(&self) -> bool {
        self.needed <= self.capacity
    }
}

impl Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let room = self.capacity - self.written;
        let n = bytes.len().min(room);
        if n > 0 {
            // SAFETY: `written + n <= capacity`, and the constructor contract
            // makes that range writable.
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), self.buf.add(self.written), n);
            }
            self.written += n;
        }
        self.needed += bytes.len();
        Ok(())
    }
}

impl Arena {
    /// Formats into the arena and returns the result as a borrowed `&str`.
    ///
    /// The returned string is also null-terminated in memory and carries no
    /// reserved slack. Usually invoked through
    /// [`arena_format!`](crate::arena_format).
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_memory::{Arena, arena_format};
    ///
    /// let arena = Arena::new();
    /// let s = arena_format!(&arena, "{}-{}", 12, 34);
    /// assert_eq!(s, "12-34");
    /// ```
    pub fn format(&self, args: fmt::Arguments<'_>) -> &str {
        let floor = self.config().fmt_reserve_floor;
        let reserve = self.pre_alloc(floor, 1);
        let buf = self.alloc_raw_uninit(reserve, 1);

        // SAFETY: `buf` is valid for `reserve` bytes; one is kept for the
        // terminator.
        let mut writer = unsafe { BoundedWriter::new(buf.as_ptr(), reserve - 1) };
        let _ = writer.write_fmt(args);
        let len = writer.needed();

        if len + 1 <= reserve {
            let fitted = self.resize_last(buf, len + 1);
            debug_assert!(fitted);
            // SAFETY: `len < reserve`, still inside the reservation.
            unsafe {
                *buf.as_ptr().add(len) = 0;
                return str_from_raw(buf, len);
            }
        }

        // Overflowed: hand the reservation back, take exactly what's needed.
        let returned = self.resize_last(buf, 0);
        debug_assert!(returned);
        let exact = self.alloc_raw_uninit(len + 1, 1);
        // SAFETY: `exact` is valid for `len + 1` bytes.
        let mut writer = unsafe { BoundedWriter::new(exact.as_ptr(), len) };
        let _ = writer.write_fmt(args);
        if writer.needed() != len {
            // The arguments formatted differently the second time around.
            self.oom(len + 1);
        }
        // SAFETY: exactly `len` bytes were written; the terminator slot is ours.
        unsafe {
            *exact.as_ptr().add(len) = 0;
            str_from_raw(exact, len)
        }
    }
}

/// # Safety
///
/// `buf` must hold `len` initialised bytes of formatter output (valid UTF-8).
unsafe fn str_from_raw<'a>(buf: NonNull<u8>, len: usize) -> &'a str {
    // SAFETY: per contract; `core::fmt` only ever produces UTF-8.
    unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(buf.as_ptr(), len)) }
}
