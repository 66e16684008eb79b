//! Growable containers whose storage lives in an [`Arena`](crate::Arena).
//!
//! All three share one memory discipline: the user-visible payload is
//! preceded, in the same allocation, by a header holding the back-reference
//! to the arena and the length/capacity bookkeeping, and the slot just past
//! the payload is kept null/zero so the payload self-terminates. Growth
//! first asks the arena to extend the most recent allocation in place; when
//! that fails (another allocation intervened) the container copies itself,
//! invalidates the abandoned header's magic word, and rebinds the handle.
//!
//! Interleaving the growth of two containers on one arena defeats the
//! in-place path and degrades to copying — correct, but wasteful. Hot
//! containers are better given a short-lived arena of their own:
//!
//! ```
//! use strata_memory::{Arena, ArenaList};
//!
//! let scratch = Arena::new();
//! let mut hot: ArenaList<'_, u64> = ArenaList::new(&scratch, 0);
//! for i in 0..10_000 {
//!     hot.push(i); // grows in place every time
//! }
//! assert_eq!(hot.len(), 10_000);
//! ```

mod list;
mod map;
mod string;

pub use self::list::ArenaList;
pub use self::map::{ArenaMap, KeyKind, MAX_MAP_CAPACITY};
pub use self::string::ArenaString;
