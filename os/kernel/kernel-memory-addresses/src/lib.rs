//! # 32-bit Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and 4 KiB page bases used by the
//! two-level (directory → table → frame) paging code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Physical memory (RAM, firmware ranges, MMIO). |
//! | [`VirtualAddress`] / [`VirtualPage`] | Addresses translated through a page directory. |
//! | [`MemoryRange`] | A contiguous physical region: image, module or firmware map entry. |
//!
//! All types are `#[repr(transparent)]` over `u32`, `Copy`, ordered and
//! hashable. Only the base page size of [`PAGE_SIZE`] bytes exists; the
//! design does not use large pages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u32(), 0x4000_1000);
//! assert_eq!(va.offset(), 0x234);
//! assert_eq!(page.index(), 0x40001);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_range;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use crate::memory_range::MemoryRange;
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

/// Size of one page / frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`; number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

/// Number of 4 KiB pages in the full 32-bit address space.
pub const PAGES_PER_ADDRESS_SPACE: u32 = 1 << (32 - PAGE_SHIFT);

const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`, saturating at the highest
/// aligned value instead of wrapping.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(u32::MAX, 4096), 0xFFFF_F000);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => align_down(u32::MAX, a),
    }
}

/// Number of whole pages needed to hold `bytes` bytes.
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(1), 1);
/// assert_eq!(pages_for(4096), 1);
/// assert_eq!(pages_for(4097), 2);
/// ```
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn pages_for(bytes: usize) -> u32 {
    let pages = bytes.div_ceil(PAGE_SIZE as usize);
    if pages > PAGES_PER_ADDRESS_SPACE as usize {
        PAGES_PER_ADDRESS_SPACE
    } else {
        pages as u32
    }
}
