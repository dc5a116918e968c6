//! # Page Table (PT)
//!
//! The lower paging level:
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a PT entry (PTE) mapping one 4 KiB frame.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! A page table occupies exactly one physical frame. After modifying active
//! mappings, the caller must perform any required TLB maintenance.

use crate::PageEntryBits;
use crate::page_table::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into a Page Table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A single Page Table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PtEntry(PageEntryBits);

/// The Page Table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES_PER_TABLE],
}

impl TableIndex {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 12) & 0x3FF) as u16)
    }

    /// The slot of virtual page `index` inside its table.
    #[inline]
    #[must_use]
    pub const fn of_page(index: u32) -> Self {
        Self::new((index & 0x3FF) as u16)
    }

    /// Construct from a raw `u16`.
    ///
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

    /// All indices in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRIES_PER_TABLE as u16).map(Self::new)
    }
}

impl PtEntry {
    /// Create a zero (non-present) entry.
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

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, return the mapped frame and its flags.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<(PhysicalPage, PageEntryBits)> {
        if !self.is_present() {
            return None;
        }
        Some((self.0.physical_page(), self.0))
    }

    /// Create a present, writable leaf for `page`.
    #[inline]
    #[must_use]
    pub const fn make_4k(page: PhysicalPage, user: bool) -> Self {
        Self(PageEntryBits::new_rw(user).with_physical_page(page))
    }

    /// Whether the mapping is pinned (never released).
    #[inline]
    #[must_use]
    pub const fn is_pinned(self) -> bool {
        self.0.pinned()
    }

    /// Same entry marked as pinned.
    #[inline]
    #[must_use]
    pub const fn pinned(self) -> Self {
        Self(self.0.with_pinned(true))
    }

    /// Same entry with `present` cleared; the frame number is kept.
    #[inline]
    #[must_use]
    pub const fn cleared(self) -> Self {
        Self(self.0.with_present(false))
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// No validation is performed.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageTable {
    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Set every entry to non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    /// Plain load; does not imply any TLB synchronization.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Iterate `(index, frame)` over present entries.
    pub fn present_pages(&self) -> impl Iterator<Item = (TableIndex, PhysicalPage)> + '_ {
        TableIndex::all().filter_map(|i| self.get(i).page_4k().map(|(p, _)| (i, p)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pte_4k_leaf() {
        let page = PhysicalPage::from_frame_number(0x5_5550);
        let e = PtEntry::make_4k(page, true);
        let (p, fl) = e.page_4k().unwrap();
        assert_eq!(p.base().as_u32(), 0x5555_0000);
        assert!(fl.present());
        assert!(fl.writable());
        assert!(fl.user_access());
        assert!(!fl.large_page());
    }

    #[test]
    fn cleared_entry_is_not_a_mapping() {
        let e = PtEntry::make_4k(PhysicalPage::from_frame_number(7), false).cleared();
        assert!(e.page_4k().is_none());
        assert_eq!(e.raw(), 0x7002);
    }

    #[test]
    fn present_pages_walks_in_order() {
        let mut pt = PageTable::zeroed();
        pt.set(TableIndex::new(3), PtEntry::make_4k(PhysicalPage::from_frame_number(30), false));
        pt.set(TableIndex::new(1), PtEntry::make_4k(PhysicalPage::from_frame_number(10), false));
        let v: Vec<_> = pt
            .present_pages()
            .map(|(i, p)| (i.as_usize(), p.frame_number()))
            .collect();
        assert_eq!(v, [(1, 10), (3, 30)]);
    }
}
