//! # Page Directory (PD)
//!
//! The top paging level, referenced by CR3:
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a PD entry pointing at a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.
//!
//! ## Kernel-shared entries
//!
//! The first [`KERNEL_SHARED_ENTRIES`] entries cover the kernel range. In
//! every directory they hold the *same* table frames as the kernel's own
//! directory; those tables are owned by the kernel and are never freed
//! through a process directory. Only [`PageDirectory::private_indices`] may
//! be walked for teardown.

use crate::PageEntryBits;
use crate::page_table::{ENTRIES_PER_TABLE, PAGES_PER_TABLE};
use kernel_info::memory::KERNEL_SPACE_END;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress};

/// Number of leading directory entries shared with the kernel directory.
pub const KERNEL_SHARED_ENTRIES: usize =
    (KERNEL_SPACE_END / (PAGES_PER_TABLE * PAGE_SIZE)) as usize;

const _: () = assert!(KERNEL_SHARED_ENTRIES == 256);

/// Index into a Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl DirectoryIndex {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 22) as u16)
    }

    /// The entry covering virtual page `index`.
    #[inline]
    #[must_use]
    pub const fn of_page(index: u32) -> Self {
        Self::new((index >> 10) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether this entry lies in the kernel-shared range.
    #[inline]
    #[must_use]
    pub const fn is_kernel_shared(self) -> bool {
        self.as_usize() < KERNEL_SHARED_ENTRIES
    }

    /// Index of the first page covered by this entry.
    #[inline]
    #[must_use]
    pub const fn first_page(self) -> u32 {
        self.0 as u32 * PAGES_PER_TABLE
    }
}

impl PdEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// Point at the page table in `table`, writable, user access as requested.
    #[inline]
    #[must_use]
    pub const fn make_table(table: PhysicalPage, user: bool) -> Self {
        Self(PageEntryBits::new_rw(user).with_physical_page(table))
    }

    /// If present, the frame of the referenced page table.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "4 MiB pages are not supported");
        Some(self.0.physical_page())
    }

    /// Same entry with the user bit set.
    #[inline]
    #[must_use]
    pub const fn with_user(self) -> Self {
        Self(self.0.with_user_access(true))
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Set every entry to non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// The kernel-shared prefix.
    #[inline]
    #[must_use]
    pub fn kernel_entries(&self) -> &[PdEntry] {
        &self.entries[..KERNEL_SHARED_ENTRIES]
    }

    /// The private (process-owned) suffix.
    #[inline]
    #[must_use]
    pub fn private_entries(&self) -> &[PdEntry] {
        &self.entries[KERNEL_SHARED_ENTRIES..]
    }

    /// Copy the kernel-shared prefix from `kernel`.
    #[inline]
    pub fn share_kernel_entries(&mut self, kernel: &Self) {
        self.entries[..KERNEL_SHARED_ENTRIES].copy_from_slice(kernel.kernel_entries());
    }

    /// Indices of the private entries, ascending.
    pub fn private_indices() -> impl Iterator<Item = DirectoryIndex> {
        (KERNEL_SHARED_ENTRIES as u16..ENTRIES_PER_TABLE as u16).map(DirectoryIndex::new)
    }

    /// Indices starting at `first`, ascending.
    pub fn indices_from(first: DirectoryIndex) -> impl Iterator<Item = DirectoryIndex> {
        (first.0..ENTRIES_PER_TABLE as u16).map(DirectoryIndex::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_boundary_is_one_gib() {
        assert!(DirectoryIndex::from(VirtualAddress::new(0x3FFF_FFFF)).is_kernel_shared());
        assert!(!DirectoryIndex::from(VirtualAddress::new(0x4000_0000)).is_kernel_shared());
        assert_eq!(DirectoryIndex::new(256).first_page(), 256 * 1024);
    }

    #[test]
    fn share_copies_exactly_the_kernel_prefix() {
        let mut kernel = PageDirectory::zeroed();
        for i in 0..ENTRIES_PER_TABLE as u16 {
            kernel.set(
                DirectoryIndex::new(i),
                PdEntry::make_table(PhysicalPage::from_frame_number(0x100 + u32::from(i)), false),
            );
        }

        let mut user = PageDirectory::zeroed();
        user.share_kernel_entries(&kernel);

        assert_eq!(user.kernel_entries(), kernel.kernel_entries());
        assert!(user.private_entries().iter().all(|e| !e.is_present()));
        assert_eq!(PageDirectory::private_indices().count(), 768);
    }

    #[test]
    fn table_entry_decodes_frame() {
        let e = PdEntry::make_table(PhysicalPage::from_frame_number(0x400), false);
        assert_eq!(e.next_table().map(PhysicalPage::frame_number), Some(0x400));
        assert!(!e.flags().user_access());
        assert!(e.with_user().flags().user_access());
        assert_eq!(PdEntry::zero().next_table(), None);
    }
}
