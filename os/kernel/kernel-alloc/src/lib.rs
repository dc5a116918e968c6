//! # Kernel Memory Core
//!
//! Physical frame allocation, address spaces and the allocation facade of a
//! 32-bit paged kernel.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 MemoryManager                       │
//! │    • alloc / free / identity pages / eternal maps   │
//! │    • address-space create / destroy / switch        │
//! │    • boot sequence, diagnostics                     │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │                         │
//! ┌───────────▼───────────┐ ┌───────────▼───────────────┐
//! │   BitmapFrameAlloc    │ │  kernel_vmem::AddressSpace │
//! │  one bit per frame    │ │  two-level page tables     │
//! └───────────────────────┘ └───────────────────────────┘
//! ```
//!
//! Everything below [`MemoryManager`] is unlocked. The manager keeps the
//! bitmap, the counters and its view of the kernel directory in a single
//! [`kernel_sync::CriticalSection`], entered once per public operation, so
//! operations are atomic with respect to other CPUs and to interrupt
//! handlers.
//!
//! ## Address spaces
//!
//! The first 1 GiB of every address space is the kernel range. It is backed
//! by the kernel's own page tables, which every directory shares. The rest is
//! private to each space. Page directories and page tables are identity
//! pages in the kernel range, so they are reachable from any active
//! directory.
//!
//! ## Hardware
//!
//! [`PagingControl`] is the seam to the CPU (CR3, CR0.PG, `invlpg`); on
//! `x86` [`CpuPaging`] drives the real registers through `kernel-registers`.
//! Physical memory is reached through a [`kernel_vmem::PhysMapper`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod address_space;
mod boot;
mod dump;
mod error;
mod flags;
pub mod frame_alloc;
pub mod paging;
mod state;
mod vmm;

pub use address_space::AddressSpaceHandle;
pub use boot::BootStage;
pub use dump::{DumpScope, MemoryUsage};
pub use error::MemoryError;
pub use flags::MemoryFlags;
pub use frame_alloc::{BitmapFrameAlloc, FrameAllocError};
#[cfg(target_arch = "x86")]
pub use paging::CpuPaging;
pub use paging::PagingControl;
pub use vmm::MemoryManager;
