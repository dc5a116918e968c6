use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Physical 4 KiB frame base.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pp = PhysicalPage::containing_address(PhysicalAddress::new(0x0030_0123));
/// assert_eq!(pp.base().as_u32(), 0x0030_0000);
/// assert_eq!(pp.frame_number(), 0x300);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(PhysicalAddress);

impl PhysicalPage {
    /// The frame containing `pa` (low bits dropped).
    #[inline]
    #[must_use]
    pub const fn containing_address(pa: PhysicalAddress) -> Self {
        Self(PhysicalAddress::new(pa.as_u32() & !(PAGE_SIZE - 1)))
    }

    /// Alias of [`containing_address`](Self::containing_address).
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        Self::containing_address(pa)
    }

    /// Build from a 20-bit frame number, as stored in a paging entry.
    #[inline]
    #[must_use]
    pub const fn from_frame_number(frame: u32) -> Self {
        debug_assert!(frame < (1 << (32 - PAGE_SHIFT)));
        Self(PhysicalAddress::new(frame << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    /// Combine this frame with an in-frame `offset`.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE);
        PhysicalAddress::new(self.0.as_u32() | offset)
    }

    /// The frame `count` frames after this one, if it exists.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, count: u32) -> Option<Self> {
        match self.frame_number().checked_add(count) {
            Some(frame) if frame < (1 << (32 - PAGE_SHIFT)) => Some(Self::from_frame_number(frame)),
            _ => None,
        }
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0.as_u32())
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0.as_u32())
    }
}
