//! # Memory Page Table
//!
//! Classic 32-bit two-level paging: a page directory of 1024 entries, each
//! pointing at a page table of 1024 entries, each mapping one 4 KiB frame.
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

/// Entries per directory and per table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Pages covered by one directory entry (4 MiB).
pub const PAGES_PER_TABLE: u32 = 1024;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0xC012_3456);
        let (di, ti) = split_indices(va);
        assert_eq!(di.as_usize(), 0x300);
        assert_eq!(ti.as_usize(), 0x123);
    }

    #[test]
    fn last_page_of_the_address_space() {
        let (di, ti) = split_indices(VirtualAddress::new(0xFFFF_FFFF));
        assert_eq!(di.as_usize(), ENTRIES_PER_TABLE - 1);
        assert_eq!(ti.as_usize(), ENTRIES_PER_TABLE - 1);
    }
}
