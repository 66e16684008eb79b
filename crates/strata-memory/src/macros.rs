//! Convenience macros for formatted arena strings.

/// Formats into an arena and returns a borrowed `&str`.
///
/// Shorthand for [`Arena::format`](crate::Arena::format) with
/// `format_args!`.
///
/// ```
/// use strata_memory::{Arena, arena_format};
///
/// let arena = Arena::new();
/// let label = arena_format!(&arena, "{}:{}", "row", 7);
/// assert_eq!(label, "row:7");
/// ```
#[macro_export]
macro_rules! arena_format {
    ($arena:expr, $($fmt:tt)*) => {
        $arena.format(core::format_args!($($fmt)*))
    };
}

/// Builds an [`ArenaString`](crate::ArenaString) from format arguments.
///
/// ```
/// use strata_memory::{Arena, astr_format};
///
/// let arena = Arena::new();
/// let mut s = astr_format!(&arena, "{} + {}", 1, 2);
/// s.push_str(" = 3");
/// assert_eq!(s.as_bytes(), b"1 + 2 = 3");
/// ```
#[macro_export]
macro_rules! astr_format {
    ($arena:expr, $($fmt:tt)*) => {
        $crate::ArenaString::from_fmt($arena, core::format_args!($($fmt)*))
    };
}
