use crate::{PAGE_SIZE, PhysicalAddress, PhysicalPage, align_down, align_up};
use core::fmt;

/// A contiguous physical region: `base .. base + size`.
///
/// Used for firmware memory-map entries, the kernel image and boot modules.
#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MemoryRange {
    pub base: PhysicalAddress,
    pub size: u32,
}

impl MemoryRange {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u32) -> Self {
        Self { base, size }
    }

    /// The smallest page-aligned range covering `size` bytes starting at the
    /// (possibly unaligned) address `base`.
    ///
    /// ```rust
    /// # use kernel_memory_addresses::*;
    /// let r = MemoryRange::around_non_aligned_address(PhysicalAddress::new(0x1_0800), 0x1000);
    /// assert_eq!(r.base, PhysicalAddress::new(0x1_0000));
    /// assert_eq!(r.size, 0x2000);
    /// ```
    #[must_use]
    pub const fn around_non_aligned_address(base: PhysicalAddress, size: u32) -> Self {
        let start = align_down(base.as_u32(), PAGE_SIZE);
        let end = align_up(base.as_u32().saturating_add(size), PAGE_SIZE);
        Self::new(PhysicalAddress::new(start), end - start)
    }

    /// Exclusive end, saturating at the top of the 32-bit space.
    #[inline]
    #[must_use]
    pub const fn end(self) -> u32 {
        self.base.as_u32().saturating_add(self.size)
    }

    /// Number of pages spanned, rounding a partial trailing page up.
    #[inline]
    #[must_use]
    pub const fn page_count(self) -> u32 {
        align_up(self.size, PAGE_SIZE) / PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn first_page(self) -> PhysicalPage {
        PhysicalPage::containing_address(self.base)
    }

    /// `true` if `[base, base + len)` lies entirely inside this range.
    #[inline]
    #[must_use]
    pub const fn contains_span(self, base: PhysicalAddress, len: u32) -> bool {
        match base.as_u32().checked_add(len) {
            Some(end) => base.as_u32() >= self.base.as_u32() && end <= self.end(),
            None => false,
        }
    }
}

impl fmt::Debug for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryRange(0x{:08X}..0x{:08X})", self.base.as_u32(), self.end())
    }
}
