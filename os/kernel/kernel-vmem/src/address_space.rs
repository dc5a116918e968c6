//! # Address Space (32-bit, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space: the tree rooted at one [`PageDirectory`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::map`] installs `count` consecutive 4 KiB mappings,
//!   creating and zeroing page tables on first reference to a 4 MiB region.
//! - [`AddressSpace::unmap`] clears `present` without reclaiming tables.
//! - [`AddressSpace::present`] / [`AddressSpace::translate`] query mappings.
//! - [`AddressSpace::regions`] walks present pages as coalesced runs.
//! - [`AddressSpace::release_private`] hands every private frame back for
//!   teardown, never touching the kernel-shared entries.
//!
//! Any space can be edited, not only the active one. TLB maintenance for
//! the active space is the caller's responsibility.

use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use crate::page_table::{PAGES_PER_TABLE, split_indices};
use crate::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::{
    PAGE_SIZE, PAGES_PER_ADDRESS_SPACE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

/// Mapping failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// No frame for a new page table. The first `mapped` pages of the
    /// request were written before the failure.
    #[error("out of memory for a page table after mapping {mapped} page(s)")]
    OutOfMemory { mapped: u32 },
}

/// What a frame handed out by [`AddressSpace::release_private`] was used for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameRole {
    /// A mapped 4 KiB page.
    Leaf,
    /// A mapped page marked pinned; its frame is not owned by the space.
    Pinned,
    /// A page table of the private range.
    Table,
}

/// A run of present pages that is contiguous both virtually and physically.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MappedRegion {
    pub virtual_base: VirtualAddress,
    pub physical_base: PhysicalAddress,
    pub pages: u32,
}

impl MappedRegion {
    /// One past the last physical byte.
    #[must_use]
    pub fn physical_end(&self) -> u64 {
        u64::from(self.physical_base.as_u32()) + self.len()
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(self.pages) * u64::from(PAGE_SIZE)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pages == 0
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the space whose directory lives in `root`.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the directory.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    pub(crate) fn pd_mut(&self) -> &mut PageDirectory {
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.root.base()) }
    }

    #[inline]
    pub(crate) fn pt_mut(&self, page: PhysicalPage) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Read-only view of the directory.
    #[inline]
    #[must_use]
    pub fn directory(&self) -> &PageDirectory {
        self.pd_mut()
    }

    /// Mark every directory entry non-present.
    pub fn clear(&self) {
        self.pd_mut().zero();
    }

    /// Point this directory's kernel-shared entries at `kernel`'s tables.
    pub fn share_kernel_entries(&self, kernel: &AddressSpace<'_, M>) {
        if kernel.root == self.root {
            return;
        }
        let src = kernel.directory();
        self.pd_mut().share_kernel_entries(src);
    }

    /// The entry for `page`, if its table exists.
    fn entry(&self, page: VirtualPage) -> Option<PtEntry> {
        let (di, ti) = split_indices(page.base());
        let table = self.pd_mut().get(di).next_table()?;
        Some(self.pt_mut(table).get(ti))
    }

    /// The frame `page` maps to, if present.
    #[must_use]
    pub fn lookup(&self, page: VirtualPage) -> Option<PhysicalPage> {
        self.entry(page)?.page_4k().map(|(frame, _)| frame)
    }

    /// Whether `page` is mapped and pinned.
    #[must_use]
    pub fn is_pinned(&self, page: VirtualPage) -> bool {
        self.entry(page).is_some_and(|e| e.is_present() && e.is_pinned())
    }

    /// Mark the mapping of `page` as pinned. Returns `false` if not present.
    pub fn pin(&self, page: VirtualPage) -> bool {
        let (di, ti) = split_indices(page.base());
        let Some(table) = self.pd_mut().get(di).next_table() else {
            return false;
        };
        let pt = self.pt_mut(table);
        let entry = pt.get(ti);
        if !entry.is_present() {
            return false;
        }
        pt.set(ti, entry.pinned());
        true
    }

    /// Whether `page` is mapped user-accessible.
    #[must_use]
    pub fn is_user(&self, page: VirtualPage) -> bool {
        self.entry(page)
            .and_then(PtEntry::page_4k)
            .is_some_and(|(_, flags)| flags.user_access())
    }

    /// Translate `va` to the physical address it maps to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va.page()).map(|frame| frame.join(va.offset()))
    }

    /// `true` iff each of the `count` pages starting at `va`'s page is present.
    #[must_use]
    pub fn present(&self, va: VirtualAddress, count: u32) -> bool {
        let first = va.page().index();
        (0..count).all(|i| {
            first
                .checked_add(i)
                .filter(|&p| p < PAGES_PER_ADDRESS_SPACE)
                .is_some_and(|p| self.lookup(VirtualPage::from_index(p)).is_some())
        })
    }

    /// Make sure the table for `di` exists, allocating and zeroing it if not.
    ///
    /// No reference into the directory is held across `alloc`: the allocator
    /// may itself edit paging structures.
    fn ensure_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        di: DirectoryIndex,
        user: bool,
    ) -> Option<PhysicalPage> {
        let pde = self.pd_mut().get(di);
        if let Some(table) = pde.next_table() {
            if user && !pde.flags().user_access() {
                self.pd_mut().set(di, pde.with_user());
            }
            return Some(table);
        }

        let table = alloc.alloc_4k()?;
        self.pt_mut(table).zero();
        self.pd_mut().set(di, PdEntry::make_table(table, user));
        log::trace!("new page table {table} for directory entry {}", di.as_usize());
        Some(table)
    }

    /// Zero `table` and install it as the table of entry `di`, supervisor-only.
    ///
    /// Used to wire statically allocated tables into a fresh directory.
    pub fn adopt_table(&self, di: DirectoryIndex, table: PhysicalPage) {
        self.pt_mut(table).zero();
        self.pd_mut().set(di, PdEntry::make_table(table, false));
    }

    /// Create every missing table for `count` pages starting at `page`
    /// without mapping anything.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] (with `mapped = 0`) if a table cannot be
    /// created. Tables created before the failure are kept.
    pub fn prepare<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        page: VirtualPage,
        count: u32,
        user: bool,
    ) -> Result<(), MapError> {
        if count == 0 {
            return Ok(());
        }
        assert!(fits(page.index(), count), "range at {page} leaves the 32-bit space");
        let first = DirectoryIndex::of_page(page.index());
        let last = DirectoryIndex::of_page(page.index() + count - 1);
        for di in PageDirectory::indices_from(first).take_while(|di| *di <= last) {
            self.ensure_table(alloc, di, user)
                .ok_or(MapError::OutOfMemory { mapped: 0 })?;
        }
        Ok(())
    }

    /// Map `page → frame`, writable, user access as requested.
    ///
    /// An existing mapping is overwritten; its frame is not released.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the page table cannot be created.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        page: VirtualPage,
        frame: PhysicalPage,
        user: bool,
    ) -> Result<(), MapError> {
        let (di, ti) = split_indices(page.base());
        let table = self
            .ensure_table(alloc, di, user)
            .ok_or(MapError::OutOfMemory { mapped: 0 })?;
        self.pt_mut(table).set(ti, PtEntry::make_4k(frame, user));
        Ok(())
    }

    /// Map `count` consecutive pages starting at `page` onto `count`
    /// consecutive frames starting at `frame`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] with the number of pages already written
    /// when a page table cannot be created. Those pages stay mapped.
    ///
    /// # Panics
    /// If either range runs past the end of the 32-bit space.
    pub fn map<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        page: VirtualPage,
        frame: PhysicalPage,
        count: u32,
        user: bool,
    ) -> Result<(), MapError> {
        assert!(
            fits(page.index(), count) && fits(frame.frame_number(), count),
            "mapping {count} page(s) at {page} -> {frame} leaves the 32-bit space"
        );

        for i in 0..count {
            let v = VirtualPage::from_index(page.index() + i);
            let p = PhysicalPage::from_frame_number(frame.frame_number() + i);
            self.map_one(alloc, v, p, user)
                .map_err(|_| MapError::OutOfMemory { mapped: i })?;
        }
        Ok(())
    }

    /// Clear the mapping of `page`; returns the frame it pointed at.
    ///
    /// The page table is kept even if it becomes empty.
    pub fn unmap_one(&self, page: VirtualPage) -> Option<PhysicalPage> {
        let (di, ti) = split_indices(page.base());
        let table = self.pd_mut().get(di).next_table()?;
        let pt = self.pt_mut(table);
        let entry = pt.get(ti);
        let (frame, _) = entry.page_4k()?;
        pt.set(ti, entry.cleared());
        Some(frame)
    }

    /// Clear every present mapping among `count` pages from `page`.
    /// Returns how many were cleared.
    pub fn unmap(&self, page: VirtualPage, count: u32) -> u32 {
        let mut cleared = 0;
        for i in 0..count {
            let next = page.index().checked_add(i);
            let Some(p) = next.filter(|&p| p < PAGES_PER_ADDRESS_SPACE) else {
                break;
            };
            if self.unmap_one(VirtualPage::from_index(p)).is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    /// First-fit search for `count` consecutive unmapped pages inside page
    /// indices `[first, end)`.
    #[must_use]
    pub fn find_unmapped(&self, first: u32, end: u32, count: u32) -> Option<VirtualPage> {
        debug_assert!(count > 0);
        let end = end.min(PAGES_PER_ADDRESS_SPACE);
        let mut run_start = first;
        let mut run_len = 0u32;
        let mut idx = first;

        while idx < end {
            let di = DirectoryIndex::of_page(idx);
            let table_end = (di.first_page() + PAGES_PER_TABLE).min(end);

            match self.pd_mut().get(di).next_table() {
                None => {
                    if run_len == 0 {
                        run_start = idx;
                    }
                    run_len += table_end - idx;
                    if run_len >= count {
                        return Some(VirtualPage::from_index(run_start));
                    }
                }
                Some(table) => {
                    let pt = self.pt_mut(table);
                    for p in idx..table_end {
                        if pt.get(TableIndex::of_page(p)).is_present() {
                            run_len = 0;
                            continue;
                        }
                        if run_len == 0 {
                            run_start = p;
                        }
                        run_len += 1;
                        if run_len >= count {
                            return Some(VirtualPage::from_index(run_start));
                        }
                    }
                }
            }
            idx = table_end;
        }
        None
    }

    /// Present pages in `[first, end)` as runs that are contiguous both
    /// virtually and physically, ascending.
    #[must_use]
    pub fn regions(&self, first: VirtualPage, end: u32) -> Regions<'_, 'm, M> {
        Regions {
            space: self,
            next: first.index(),
            end: end.min(PAGES_PER_ADDRESS_SPACE),
        }
    }

    /// Hand every frame reachable from the private directory entries to
    /// `release`: first the leaves of a table, then the table itself. The
    /// private entries are cleared afterwards. Kernel-shared entries are
    /// never visited.
    pub fn release_private(&self, mut release: impl FnMut(PhysicalPage, FrameRole)) {
        for di in PageDirectory::private_indices() {
            let Some(table) = self.pd_mut().get(di).next_table() else {
                continue;
            };
            let pt = self.pt_mut(table);
            for (ti, frame) in pt.present_pages() {
                let role = if pt.get(ti).is_pinned() {
                    FrameRole::Pinned
                } else {
                    FrameRole::Leaf
                };
                release(frame, role);
            }
            release(table, FrameRole::Table);
            self.pd_mut().set(di, PdEntry::zero());
        }
    }
}

const fn fits(first: u32, count: u32) -> bool {
    match first.checked_add(count) {
        Some(end) => end <= PAGES_PER_ADDRESS_SPACE,
        None => false,
    }
}

/// Iterator returned by [`AddressSpace::regions`].
pub struct Regions<'a, 'm, M: PhysMapper> {
    space: &'a AddressSpace<'m, M>,
    next: u32,
    end: u32,
}

impl<M: PhysMapper> Iterator for Regions<'_, '_, M> {
    type Item = MappedRegion;

    fn next(&mut self) -> Option<MappedRegion> {
        let mut current: Option<MappedRegion> = None;

        while self.next < self.end {
            let idx = self.next;
            let di = DirectoryIndex::of_page(idx);

            let Some(table) = self.space.pd_mut().get(di).next_table() else {
                self.next = (di.first_page() + PAGES_PER_TABLE).min(self.end);
                if current.is_some() {
                    return current;
                }
                continue;
            };

            let entry = self.space.pt_mut(table).get(TableIndex::of_page(idx));
            let Some((frame, _)) = entry.page_4k() else {
                self.next += 1;
                if current.is_some() {
                    return current;
                }
                continue;
            };

            if let Some(region) = current.as_mut() {
                if region.physical_end() == u64::from(frame.base().as_u32()) {
                    region.pages += 1;
                    self.next += 1;
                    continue;
                }
                return current;
            }

            current = Some(MappedRegion {
                virtual_base: VirtualPage::from_index(idx).base(),
                physical_base: frame.base(),
                pages: 1,
            });
            self.next += 1;
        }
        current
    }
}
