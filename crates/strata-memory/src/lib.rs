//! # strata-memory
//!
//! Region-based allocation with arena-backed containers.
//!
//! An [`Arena`] owns a chain of large system-allocated blocks and serves
//! allocations by bumping a pointer; nothing is freed individually, the
//! region is reclaimed as a whole. Three growable containers draw their
//! storage from an arena and keep their bookkeeping header directly in front
//! of the payload:
//!
//! - [`ArenaString`] — a null-terminated mutable byte string
//! - [`ArenaList`] — a null-terminated array of fixed-size items
//! - [`ArenaMap`] — an order-preserving keyed hash map
//!
//! ```
//! use strata_memory::{Arena, ArenaMap, ArenaString};
//!
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct Route {
//!     port: u16,
//!     hits: u32,
//! }
//!
//! let arena = Arena::new();
//!
//! let mut log = ArenaString::new(&arena, 32);
//! log.push_str("starting");
//!
//! let mut routes = ArenaMap::<Route>::with_opaque_keys(&arena, 16, size_of::<u16>());
//! routes.find_or_insert(Route { port: 443, hits: 0 });
//! routes.update(Route { port: 443, hits: 1 });
//! assert_eq!(routes.find_opaque(&443u16).unwrap().hits, 1);
//! ```
//!
//! The arena and everything built on it is single-threaded by design. All
//! failure paths short of out-of-memory are in-band (`bool` / `Option`);
//! out-of-memory runs the arena's hook and aborts the process.

// The whole point of this crate is managing raw regions; the workspace-wide
// `unsafe_code = "warn"` is opted out here.
#![allow(unsafe_code)]

pub mod arena;
pub mod containers;
pub mod error;
pub mod hash;
mod macros;
pub mod utils;

pub use arena::{Arena, ArenaConfig, ArenaFootprint};
pub use containers::{ArenaList, ArenaMap, ArenaString, KeyKind, MAX_MAP_CAPACITY};
pub use error::{MemoryError, MemoryResult};
