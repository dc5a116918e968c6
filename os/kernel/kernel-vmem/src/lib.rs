//! # Virtual Memory Support
//!
//! Classic 32-bit `x86` paging (no PAE) for the kernel's memory core.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at one [`PageDirectory`],
//!   editable whether or not it is the active one.
//! - A hardware-exact [`PageEntryBits`] bitfield shared by directory and
//!   table entries.
//! - 4 KiB-aligned [`PageDirectory`] / [`PageTable`] wrappers and index helpers.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//!  CR3 → PD ──► PDE (one per 4 MiB) ──► PT ──► PTE (one per 4 KiB) ──► frame
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | Top-level table referenced by CR3; entries point to PTs. |
//! | 2 | **PT** (Page Table) | **PTE** | Each entry maps a 4 KiB physical frame. |
//!
//! The directory's first 256 entries (the lowest GiB) are the kernel range
//! and point at the same page tables in every address space.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;

pub use crate::address_space::{AddressSpace, FrameRole, MapError, MappedRegion, Regions};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirectoryIndex, KERNEL_SHARED_ENTRIES, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// The implementation decides where frames come from (bitmap, identity
/// pages, a test bump pointer). Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for a page table.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// The kernel reaches its paging structures through identity mappings
/// ([`IdentityMapper`]); tests back physical memory with host allocations.
///
/// # Safety
/// - `pa` must be mapped writable for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa`.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// A [`FrameAlloc`] that never has a frame, for mapping into ranges whose
/// page tables are known to exist.
pub struct NoFrames;

impl FrameAlloc for NoFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        None
    }
}

/// [`PhysMapper`] for frames that are identity-mapped (or accessed before
/// paging is enabled): the physical address is the pointer.
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *(pa.as_usize() as *mut T) }
    }
}
