use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// Represents a single 32-bit `x86` paging entry in its raw bitfield form.
///
/// The same layout serves both levels of classic (non-PAE) paging: a page
/// directory entry (PDE) pointing at a page table, and a page table entry
/// (PTE) mapping one 4 KiB frame. The bit ordering is hardware-exact; the
/// value written into a table is `into_bits()` verbatim.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page in a PDE; PAT in a PTE |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | AVL             | Reserved for OS use |
/// | 12–31  | `frame`         | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalPage;
/// let frame = PhysicalPage::from_frame_number(0x12345);
/// let e = PageEntryBits::new_kernel_rw().with_physical_page(frame);
/// assert_eq!(e.into_bits(), 0x1234_5003);
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Subject to CR0.WP in supervisor mode.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Effective user access requires the bit in **both** the PDE and the PTE.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    ///
    /// Set by the CPU on first access through this entry.
    pub accessed: bool,

    /// Dirty (D, bit 6), PTE only.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a PDE; PAT in a PTE.
    ///
    /// Always clear here: 4 MiB pages are not used.
    pub large_page: bool,

    /// Global (G, bit 8), PTE only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11). Bit 9 marks a pinned mapping; see
    /// [`PageEntryBits::PINNED`].
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame: u32,
}

impl PageEntryBits {
    /// `os_available` bit of a mapping that must never be released.
    pub const PINNED: u8 = 0b001;

    #[inline]
    #[must_use]
    pub const fn pinned(&self) -> bool {
        self.os_available() & Self::PINNED != 0
    }

    #[inline]
    #[must_use]
    pub const fn with_pinned(self, pinned: bool) -> Self {
        let avl = if pinned {
            self.os_available() | Self::PINNED
        } else {
            self.os_available() & !Self::PINNED
        };
        self.with_os_available(avl)
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage) {
        self.set_frame(page.frame_number());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage) -> Self {
        self.set_physical_page(page);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::from_frame_number(self.frame())
    }

    /// Present, writable, supervisor-only.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable, user-accessible.
    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new_kernel_rw().with_user_access(true)
    }

    /// Present and writable, user access as requested.
    #[inline]
    #[must_use]
    pub const fn new_rw(user: bool) -> Self {
        Self::new_kernel_rw().with_user_access(user)
    }
}

impl PartialEq for PageEntryBits {
    fn eq(&self, other: &Self) -> bool {
        self.into_bits() == other.into_bits()
    }
}

impl Eq for PageEntryBits {}
