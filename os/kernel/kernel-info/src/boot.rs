//! # Kernel Boot Information
//!
//! Plain data handed to the memory core once during boot. The loader parses
//! its own format (e.g. multiboot) and fills these in.

use kernel_memory_addresses::{MemoryRange, PhysicalAddress, PhysicalPage};

/// Type of a firmware memory-map entry.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryMapEntryKind {
    /// Usable RAM.
    Available = 1,
    /// Reserved by firmware or hardware.
    Reserved = 2,
    /// ACPI tables; reclaimable after parsing.
    AcpiReclaimable = 3,
    /// ACPI non-volatile storage.
    Nvs = 4,
    /// Defective RAM.
    BadRam = 5,
}

/// One entry of the firmware memory map.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MemoryMapEntry {
    pub range: MemoryRange,
    pub kind: MemoryMapEntryKind,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn new(base: u32, size: u32, kind: MemoryMapEntryKind) -> Self {
        Self {
            range: MemoryRange::new(PhysicalAddress::new(base), size),
            kind,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.kind, MemoryMapEntryKind::Available)
    }
}

/// A module loaded next to the kernel (initrd, drivers, ...).
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct BootModule {
    pub range: MemoryRange,
}

/// Memory-related part of the loader hand-off.
#[derive(Copy, Clone, Debug)]
pub struct BootMemoryInfo<'a> {
    /// Firmware memory map, in loader order.
    pub memory_map: &'a [MemoryMapEntry],
    /// Loaded modules, in loader order.
    pub modules: &'a [BootModule],
    /// Usable memory in bytes, as reported by the firmware.
    pub memory_usable: u64,
}

/// Where the kernel image and its statically allocated paging structures
/// live in physical memory. Derived from linker-provided symbols.
#[derive(Copy, Clone, Debug)]
pub struct KernelImage {
    /// First byte of the loaded image (`__start`).
    pub start: PhysicalAddress,
    /// One past the last byte of the loaded image (`__end`).
    pub end: PhysicalAddress,
    /// The kernel page directory (a page-aligned static in the image).
    pub page_directory: PhysicalPage,
    /// First of the kernel's contiguous page tables (page-aligned statics in
    /// the image), one per shared directory entry.
    pub page_tables: PhysicalPage,
}

impl KernelImage {
    /// The page-aligned range covering the whole image.
    #[must_use]
    pub const fn range(&self) -> MemoryRange {
        MemoryRange::around_non_aligned_address(
            self.start,
            self.end.as_u32().saturating_sub(self.start.as_u32()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_image_range_covers_unaligned_symbols() {
        let image = KernelImage {
            start: PhysicalAddress::new(0x0010_0010),
            end: PhysicalAddress::new(0x0010_2001),
            page_directory: PhysicalPage::from_frame_number(0x101),
            page_tables: PhysicalPage::from_frame_number(0x102),
        };
        let range = image.range();
        assert_eq!(range.base.as_u32(), 0x0010_0000);
        assert_eq!(range.end(), 0x0010_3000);
        assert_eq!(range.page_count(), 3);
    }
}
