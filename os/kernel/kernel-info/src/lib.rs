//! # Kernel Memory Layout and Boot Hand-off
//!
//! Shared, plain-data definitions that the memory core needs from the rest of
//! the system:
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants describing how the 32-bit virtual address space is
//! split and how large the frame bitmap is:
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  null page (never mapped)       │
//! 0x0000_1000 ├─────────────────────────────────┤
//!             │  Kernel Space                   │
//!             │  identity-mapped image/modules, │
//!             │  kernel heap pages, page tables │
//!             │  (shared by every directory)    │
//! 0x4000_0000 ├─────────────────────────────────┤ KERNEL_SPACE_END
//!             │                                 │
//!             │  User Space                     │
//!             │  (private per address space)    │
//!             │                                 │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Boot Information ([`boot`])
//! The firmware memory map, the boot module list and the kernel image bounds,
//! supplied once by the loader.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;
