//! # Kernel synchronization primitives
//!
//! The memory core is serialized by exactly one coarse lock. This crate
//! provides it:
//!
//! - [`RawSpin`]: a test-and-test-and-set spin lock without data.
//! - [`IrqGuard`]: saves `EFLAGS.IF`, disables interrupts, restores on drop.
//! - [`CriticalSection`]: data protected by a [`RawSpin`] **and** an
//!   [`IrqGuard`], entered through a scoped [`CriticalGuard`].
//!
//! The critical section is **not** re-entrant: entering it again while a
//! guard is alive on the same CPU deadlocks. Code that composes several
//! protected operations must work on the guarded data directly.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod critical_section;
pub mod irq;
mod raw_spin;

pub use critical_section::{CriticalGuard, CriticalSection};
pub use irq::IrqGuard;
pub use raw_spin::RawSpin;
