//! Diagnostics: memory usage and address-space listings.

use crate::address_space::AddressSpaceHandle;
use crate::paging::PagingControl;
use crate::vmm::MemoryManager;
use core::fmt;
use kernel_info::memory::USER_FIRST_PAGE;
use kernel_memory_addresses::{PAGE_SIZE, PAGES_PER_ADDRESS_SPACE, VirtualPage};
use kernel_vmem::{MappedRegion, PhysMapper};

/// Snapshot of the allocation counters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory status:")?;
        writeln!(f, "\tused:  {:>12} KiB", self.used_bytes / 1024)?;
        write!(f, "\ttotal: {:>12} KiB", self.total_bytes / 1024)
    }
}

/// Which part of an address space a listing covers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DumpScope {
    /// From page 0.
    #[default]
    All,
    /// From the first user page.
    UserOnly,
}

impl DumpScope {
    const fn first_page(self) -> VirtualPage {
        match self {
            Self::All => VirtualPage::from_index(0),
            Self::UserOnly => VirtualPage::from_index(USER_FIRST_PAGE),
        }
    }
}

impl<M: PhysMapper, P: PagingControl> MemoryManager<'_, M, P> {
    #[must_use]
    pub fn usage(&self) -> MemoryUsage {
        let state = self.state.enter();
        MemoryUsage {
            used_bytes: state.frames.used_bytes(),
            total_bytes: state.frames.total_bytes(),
        }
    }

    /// Call `f` for every coalesced run of present pages in `handle`,
    /// ascending. Nothing is reported before paging is active.
    pub fn for_each_region(
        &self,
        handle: AddressSpaceHandle,
        scope: DumpScope,
        mut f: impl FnMut(MappedRegion),
    ) {
        let state = self.state.enter();
        if !state.is_ready() {
            return;
        }
        let space = state.space(&self.mapper, handle);
        for region in space.regions(scope.first_page(), PAGES_PER_ADDRESS_SPACE) {
            f(region);
        }
    }

    /// Write one line per coalesced region of `handle`:
    ///
    /// ```text
    /// \t<virtual first> [<physical first>:<physical last>] <virtual last>
    /// ```
    ///
    /// The last addresses are the bases of the region's last page.
    ///
    /// `[empty]` is written when nothing is mapped; nothing at all before
    /// paging is active.
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn dump_address_space(
        &self,
        handle: AddressSpaceHandle,
        scope: DumpScope,
        out: &mut impl fmt::Write,
    ) -> fmt::Result {
        let state = self.state.enter();
        if !state.is_ready() {
            return Ok(());
        }

        let space = state.space(&self.mapper, handle);
        let mut any = false;
        for region in space.regions(scope.first_page(), PAGES_PER_ADDRESS_SPACE) {
            write_region(out, &region)?;
            any = true;
        }
        if !any {
            writeln!(out, "[empty]")?;
        }
        Ok(())
    }
}

fn write_region(out: &mut impl fmt::Write, region: &MappedRegion) -> fmt::Result {
    let last = u64::from(region.pages.saturating_sub(1)) * u64::from(PAGE_SIZE);
    let v_first = region.virtual_base.as_u32();
    let p_first = region.physical_base.as_u32();
    writeln!(
        out,
        "\t{v_first:08x} [{p_first:08x}:{:08x}] {:08x}",
        u64::from(p_first) + last,
        u64::from(v_first) + last
    )
}
