//! The block chain backing an arena.
//!
//! Blocks come straight from the system allocator and are linked newest-first
//! through their `prev` pointers. Each block starts with a [`BlockHeader`]
//! followed by a max-aligned payload area; the arena bumps a cursor through
//! the payload of the newest block only.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};
use crate::utils::{MAX_ALIGN, align_up};

/// Bytes between the start of a block and the start of its payload.
pub(crate) const BLOCK_OVERHEAD: usize = align_up(size_of::<BlockHeader>(), MAX_ALIGN);

/// Header at the start of every block.
///
/// `size` counts the whole block including this header and is always a power
/// of two.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) prev: *mut BlockHeader,
    pub(crate) size: usize,
}

impl BlockHeader {
    /// First payload byte of `block`.
    #[inline]
    pub(crate) unsafe fn payload_start(block: *mut BlockHeader) -> *mut u8 {
        // SAFETY: caller guarantees `block` points at a live block, and the
        // payload offset is within its allocation by construction.
        unsafe { block.cast::<u8>().add(BLOCK_OVERHEAD) }
    }

    /// One past the last byte of `block`.
    #[inline]
    pub(crate) unsafe fn end(block: *mut BlockHeader) -> *mut u8 {
        // SAFETY: as above; `size` spans exactly the allocation.
        unsafe { block.cast::<u8>().add((*block).size) }
    }
}

/// Allocates a block of `size` bytes (header included) and links it to `prev`.
pub(crate) fn alloc_block(
    size: usize,
    prev: *mut BlockHeader,
) -> MemoryResult<NonNull<BlockHeader>> {
    debug_assert!(size.is_power_of_two());
    debug_assert!(size > BLOCK_OVERHEAD);

    let layout = Layout::from_size_align(size, MAX_ALIGN)
        .map_err(|_| MemoryError::SizeOverflow { operation: "block layout" })?;

    // SAFETY: layout has non-zero size.
    let raw = unsafe { alloc(layout) };
    let block = NonNull::new(raw.cast::<BlockHeader>())
        .ok_or(MemoryError::AllocationFailed { size, align: MAX_ALIGN })?;

    // SAFETY: freshly allocated, exclusively owned, properly aligned.
    unsafe {
        block.as_ptr().write(BlockHeader { prev, size });
    }
    Ok(block)
}

/// Frees `block` and everything behind it.
pub(crate) unsafe fn release_chain(mut block: *mut BlockHeader) {
    while !block.is_null() {
        // SAFETY: every chain entry was produced by `alloc_block` with this
        // exact layout, and nothing aliases it once the arena lets go.
        unsafe {
            let prev = (*block).prev;
            let size = (*block).size;
            dealloc(
                block.cast::<u8>(),
                Layout::from_size_align_unchecked(size, MAX_ALIGN),
            );
            block = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned_ptr;

    #[test]
    fn overhead_is_max_aligned() {
        assert_eq!(BLOCK_OVERHEAD % MAX_ALIGN, 0);
        assert!(BLOCK_OVERHEAD >= size_of::<BlockHeader>());
    }

    #[test]
    fn blocks_link_and_release() {
        let first = alloc_block(64, std::ptr::null_mut()).unwrap();
        let second = alloc_block(128, first.as_ptr()).unwrap();

        assert!(is_aligned_ptr(first.as_ptr(), MAX_ALIGN));
        assert!(is_aligned_ptr(second.as_ptr(), MAX_ALIGN));

        unsafe {
            assert_eq!((*second.as_ptr()).prev, first.as_ptr());
            assert_eq!((*second.as_ptr()).size, 128);

            let payload = BlockHeader::payload_start(second.as_ptr());
            let end = BlockHeader::end(second.as_ptr());
            assert_eq!(end as usize - payload as usize, 128 - BLOCK_OVERHEAD);

            release_chain(second.as_ptr());
        }
    }
}
