//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, PAGES_PER_ADDRESS_SPACE};

/// End of the kernel's shared virtual range (exclusive). Every address space
/// maps `0..KERNEL_SPACE_END` through the kernel's own page tables.
pub const KERNEL_SPACE_END: u32 = 0x4000_0000; // 1 GiB

/// First virtual page of the kernel range that may be handed out.
/// Page 0 is the null page and is never mapped.
pub const KERNEL_FIRST_PAGE: u32 = 1;

/// First virtual page of the private user range.
pub const USER_FIRST_PAGE: u32 = KERNEL_SPACE_END / PAGE_SIZE;

/// One past the last virtual page of the user range.
pub const USER_END_PAGE: u32 = PAGES_PER_ADDRESS_SPACE;

/// Exclusive upper bound of the identity-page search. Identity pages are
/// always placed inside the shared kernel range so that every directory can
/// reach them.
pub const IDENTITY_SEARCH_END_PAGE: u32 = USER_FIRST_PAGE;

/// Number of physical frames tracked by the frame bitmap (full 4 GiB).
pub const FRAME_COUNT: usize = PAGES_PER_ADDRESS_SPACE as usize;

/// Number of `u64` words backing a bitmap of [`FRAME_COUNT`] bits.
pub const FRAME_BITMAP_WORDS: usize = FRAME_COUNT / 64;

const _: () = {
    assert!(KERNEL_SPACE_END.is_multiple_of(4 * 1024 * 1024));
    assert!(USER_FIRST_PAGE == 256 * 1024);
    assert!(FRAME_COUNT.is_multiple_of(64));
    assert!(IDENTITY_SEARCH_END_PAGE <= USER_FIRST_PAGE);
};
