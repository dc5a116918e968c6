use crate::{PAGE_SHIFT, PAGE_SIZE, PAGES_PER_ADDRESS_SPACE, VirtualAddress};
use core::fmt;

/// Virtual 4 KiB page base.
///
/// Pages are also addressed by their **index** (`base >> 12`), which ranges
/// over `0..PAGES_PER_ADDRESS_SPACE`. Range scans iterate indices rather than
/// addresses so that the last page of the address space never overflows.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(VirtualAddress);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn containing_address(va: VirtualAddress) -> Self {
        Self(VirtualAddress::new(va.as_u32() & !(PAGE_SIZE - 1)))
    }

    /// Build from a page index in `0..PAGES_PER_ADDRESS_SPACE`.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        debug_assert!(index < PAGES_PER_ADDRESS_SPACE);
        Self(VirtualAddress::new(index << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.0
    }

    /// Combine this page with an in-page `offset`.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> VirtualAddress {
        debug_assert!(offset < PAGE_SIZE);
        VirtualAddress::new(self.0.as_u32() | offset)
    }

    /// The page `count` pages after this one, if it exists.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, count: u32) -> Option<Self> {
        match self.index().checked_add(count) {
            Some(index) if index < PAGES_PER_ADDRESS_SPACE => Some(Self::from_index(index)),
            _ => None,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0.as_u32())
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.0.as_u32())
    }
}
