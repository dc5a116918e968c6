//! State behind the memory lock and the operations on it.
//!
//! Nothing here locks. Each public [`MemoryManager`](crate::MemoryManager)
//! operation enters the critical section once and composes these helpers on
//! the guarded [`MemoryState`].

use crate::address_space::AddressSpaceHandle;
use crate::boot::BootStage;
use crate::error::MemoryError;
use crate::frame_alloc::BitmapFrameAlloc;
use crate::paging::PagingControl;
use core::ops::Range;
use kernel_info::memory::{
    IDENTITY_SEARCH_END_PAGE, KERNEL_FIRST_PAGE, USER_END_PAGE, USER_FIRST_PAGE,
};
use kernel_memory_addresses::{
    MemoryRange, PAGE_SIZE, PAGES_PER_ADDRESS_SPACE, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_vmem::{AddressSpace, FrameAlloc, MapError, NoFrames, PhysMapper};

pub(crate) struct MemoryState<'b> {
    pub(crate) frames: BitmapFrameAlloc<'b>,
    pub(crate) kernel_root: PhysicalPage,
    pub(crate) active_root: Option<PhysicalPage>,
    pub(crate) stage: BootStage,
}

/// Page tables are identity pages of the kernel space, so every directory
/// can reach them at their physical address.
pub(crate) struct TableFrames<'s, 'b, 'm, M: PhysMapper> {
    frames: &'s mut BitmapFrameAlloc<'b>,
    kernel: &'s AddressSpace<'m, M>,
    /// Frame numbers that must not become tables.
    avoid: Range<u32>,
}

impl<'s, 'b, 'm, M: PhysMapper> TableFrames<'s, 'b, 'm, M> {
    pub(crate) const fn new(
        frames: &'s mut BitmapFrameAlloc<'b>,
        kernel: &'s AddressSpace<'m, M>,
    ) -> Self {
        Self {
            frames,
            kernel,
            avoid: 0..0,
        }
    }

    pub(crate) fn avoiding(mut self, frames: Range<u32>) -> Self {
        self.avoid = frames;
        self
    }
}

impl<M: PhysMapper> FrameAlloc for TableFrames<'_, '_, '_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        identity_page_avoiding(self.frames, self.kernel, self.avoid.clone()).ok()
    }
}

/// Claim the first frame in `[1, IDENTITY_SEARCH_END_PAGE)` that is free and
/// whose equal virtual page is unmapped in `space`, and map it 1:1.
pub(crate) fn identity_page<M: PhysMapper>(
    frames: &mut BitmapFrameAlloc<'_>,
    space: &AddressSpace<'_, M>,
) -> Result<PhysicalPage, MemoryError> {
    identity_page_avoiding(frames, space, 0..0)
}

fn identity_page_avoiding<M: PhysMapper>(
    frames: &mut BitmapFrameAlloc<'_>,
    space: &AddressSpace<'_, M>,
    avoid: Range<u32>,
) -> Result<PhysicalPage, MemoryError> {
    let candidate = (KERNEL_FIRST_PAGE..IDENTITY_SEARCH_END_PAGE)
        .filter(|n| !avoid.contains(n))
        .map(PhysicalPage::from_frame_number)
        .find(|frame| {
            !frames.is_used(frame.base(), 1)
                && space.lookup(VirtualPage::from_index(frame.frame_number())).is_none()
        });

    let Some(frame) = candidate else {
        log::warn!("failed to allocate an identity mapped page");
        return Err(MemoryError::IdentitySearchExhausted);
    };

    frames.claim(frame, 1);
    let page = VirtualPage::from_index(frame.frame_number());
    if space.map_one(&mut NoFrames, page, frame, false).is_err() {
        frames.free(frame, 1);
        log::warn!("identity page {frame} has no kernel page table");
        return Err(MemoryError::IdentitySearchExhausted);
    }
    Ok(frame)
}

const fn fits(page: VirtualPage, count: u32) -> bool {
    match page.index().checked_add(count) {
        Some(end) => end <= PAGES_PER_ADDRESS_SPACE,
        None => false,
    }
}

const fn nth(page: VirtualPage, i: u32) -> VirtualPage {
    VirtualPage::from_index(page.index() + i)
}

impl<'b> MemoryState<'b> {
    pub(crate) const fn new(frames: BitmapFrameAlloc<'b>, kernel_root: PhysicalPage) -> Self {
        Self {
            frames,
            kernel_root,
            active_root: None,
            stage: BootStage::Uninitialized,
        }
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.stage == BootStage::PagingActive
    }

    #[inline]
    pub(crate) const fn kernel_handle(&self) -> AddressSpaceHandle {
        AddressSpaceHandle::from_directory_page(self.kernel_root)
    }

    #[inline]
    pub(crate) const fn kernel<'m, M: PhysMapper>(&self, mapper: &'m M) -> AddressSpace<'m, M> {
        AddressSpace::from_root(mapper, self.kernel_root)
    }

    /// Resolve `handle` to its directory through the kernel space.
    ///
    /// # Panics
    /// If the handle does not name a mapped directory.
    pub(crate) fn space<'m, M: PhysMapper>(
        &self,
        mapper: &'m M,
        handle: AddressSpaceHandle,
    ) -> AddressSpace<'m, M> {
        if handle == self.kernel_handle() {
            return self.kernel(mapper);
        }
        let Some(root) = self.kernel(mapper).lookup(handle.directory().page()) else {
            panic!("{handle} does not reference a mapped page directory");
        };
        AddressSpace::from_root(mapper, root)
    }

    /// Whether a translation of `page` in the space rooted at `root` may be
    /// cached by the CPU. The kernel range is shared by every directory.
    pub(crate) fn translation_live(&self, root: PhysicalPage, page: VirtualPage) -> bool {
        self.is_ready() && (page.index() < USER_FIRST_PAGE || self.active_root == Some(root))
    }

    /// Unmap `page` from `space` and free its frame.
    pub(crate) fn release_page<M: PhysMapper, P: PagingControl>(
        &mut self,
        space: &AddressSpace<'_, M>,
        page: VirtualPage,
        paging: &P,
    ) -> Option<PhysicalPage> {
        let frame = space.unmap_one(page)?;
        self.frames.free(frame, 1);
        if self.translation_live(space.root_page(), page) {
            paging.invalidate_page(page);
        }
        Some(frame)
    }

    /// Physical run first, then a first-fit virtual range; the run is
    /// returned to the bitmap if the second step fails.
    pub(crate) fn alloc_pages<M: PhysMapper>(
        &mut self,
        mapper: &M,
        handle: AddressSpaceHandle,
        pages: u32,
        user: bool,
    ) -> Result<(VirtualPage, PhysicalPage), MemoryError> {
        let frame = self.frames.alloc(pages).map_err(|e| {
            log::error!(
                "failed to allocate memory: not enough physical memory for {pages} page(s)"
            );
            MemoryError::from(e)
        })?;

        let space = self.space(mapper, handle);
        let kernel = self.kernel(mapper);
        let (first, end) = if user {
            (USER_FIRST_PAGE, USER_END_PAGE)
        } else {
            (KERNEL_FIRST_PAGE, USER_FIRST_PAGE)
        };

        let Some(page) = space.find_unmapped(first, end, pages) else {
            self.frames.free(frame, pages);
            log::error!("failed to allocate memory: no {pages} free virtual page(s) in {handle}");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        };

        let mut tables = TableFrames::new(&mut self.frames, &kernel);
        if let Err(MapError::OutOfMemory { mapped }) =
            space.map(&mut tables, page, frame, pages, user)
        {
            space.unmap(page, mapped);
            self.frames.free(frame, pages);
            log::error!("failed to allocate memory: no page table for {pages} page(s) in {handle}");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        }

        log::trace!("allocated {pages} page(s) at {page} -> {frame} in {handle}");
        Ok((page, frame))
    }

    /// Release a fully present range; anything else is ignored.
    pub(crate) fn free_pages<M: PhysMapper, P: PagingControl>(
        &mut self,
        mapper: &M,
        paging: &P,
        handle: AddressSpaceHandle,
        va: VirtualAddress,
        count: u32,
    ) {
        let space = self.space(mapper, handle);
        if !space.present(va, count) {
            log::warn!("ignoring free of {count} page(s) at {va} in {handle}: not fully present");
            return;
        }

        let first = va.page();
        if (0..count).any(|i| space.is_pinned(nth(first, i))) {
            log::warn!("ignoring free of {count} page(s) at {va} in {handle}: eternal mapping");
            return;
        }

        for i in 0..count {
            self.release_page(&space, nth(first, i), paging);
        }
    }

    /// Give every unmapped page of the range its own fresh frame.
    ///
    /// Tables are created and the free frame count checked before any frame
    /// is taken, so a failure leaves no page of the range newly mapped.
    pub(crate) fn populate<M: PhysMapper>(
        &mut self,
        mapper: &M,
        handle: AddressSpaceHandle,
        va: VirtualAddress,
        count: u32,
        user: bool,
    ) -> Result<(), MemoryError> {
        let first = va.page();
        if !fits(first, count) {
            log::error!("cannot map {count} page(s) at {va}: range leaves the address space");
            return Err(MemoryError::OutOfVirtualSpace { pages: count });
        }
        if first.index() < KERNEL_FIRST_PAGE {
            log::error!("cannot map {count} page(s) at {va}: the null page is reserved");
            return Err(MemoryError::OutOfVirtualSpace { pages: count });
        }

        let space = self.space(mapper, handle);
        let kernel = self.kernel(mapper);
        let mut tables = TableFrames::new(&mut self.frames, &kernel);
        if space.prepare(&mut tables, first, count, user).is_err() {
            log::error!("cannot map {count} page(s) at {va} in {handle}: no page table");
            return Err(MemoryError::OutOfVirtualSpace { pages: count });
        }

        let missing = (0..count).filter(|&i| space.lookup(nth(first, i)).is_none()).count();
        let missing = u32::try_from(missing).unwrap_or(u32::MAX);
        if self.frames.free_frames() < missing {
            log::error!("cannot map {count} page(s) at {va} in {handle}: {missing} frame(s) short");
            return Err(MemoryError::OutOfPhysicalMemory { pages: missing });
        }

        for i in 0..count {
            let page = nth(first, i);
            if space.lookup(page).is_some() {
                continue;
            }
            let frame = self.frames.alloc(1)?;
            if space.map_one(&mut NoFrames, page, frame, user).is_err() {
                self.frames.free(frame, 1);
                return Err(MemoryError::OutOfVirtualSpace { pages: count });
            }
        }
        Ok(())
    }

    /// Release each present page of the range; absent and eternal pages are
    /// skipped.
    pub(crate) fn unmap_pages<M: PhysMapper, P: PagingControl>(
        &mut self,
        mapper: &M,
        paging: &P,
        handle: AddressSpaceHandle,
        va: VirtualAddress,
        count: u32,
    ) {
        let space = self.space(mapper, handle);
        let first = va.page();
        let count = count.min(PAGES_PER_ADDRESS_SPACE - first.index());

        for i in 0..count {
            let page = nth(first, i);
            if space.is_pinned(page) {
                log::warn!("not unmapping eternal page {page} in {handle}");
                continue;
            }
            self.release_page(&space, page, paging);
        }
    }

    /// Reserve `range` for good and identity-map it, supervisor-only.
    ///
    /// Page tables are created first, never from frames of the range itself.
    /// If that fails, nothing of the range is mapped or reserved.
    pub(crate) fn map_eternal<M: PhysMapper>(
        &mut self,
        mapper: &M,
        handle: AddressSpaceHandle,
        range: MemoryRange,
    ) -> Result<(), MemoryError> {
        let range = MemoryRange::around_non_aligned_address(range.base, range.size);
        let pages = range.page_count();
        let frame = range.first_page();
        let first = VirtualPage::from_index(frame.frame_number());
        if !fits(first, pages) {
            log::error!("eternal mapping of {range:?} leaves the address space");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        }

        let space = self.space(mapper, handle);
        let kernel = self.kernel(mapper);
        let own = frame.frame_number()..frame.frame_number() + pages;
        let mut tables = TableFrames::new(&mut self.frames, &kernel).avoiding(own);
        if let Err(e) = space.prepare(&mut tables, first, pages, false) {
            log::error!("eternal mapping of {range:?} failed: {e}");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        }
        if let Err(MapError::OutOfMemory { mapped }) =
            space.map(&mut NoFrames, first, frame, pages, false)
        {
            space.unmap(first, mapped);
            log::error!("eternal mapping of {range:?} lost a page table");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        }

        self.frames.set_used(range.base, pages);
        for i in 0..pages {
            space.pin(nth(first, i));
        }

        log::debug!("eternal mapping of {range:?} in {handle}");
        Ok(())
    }

    /// Zero `pages` frames from `frame` through a one-page window in the
    /// kernel range, for frames whose own mapping is not live.
    ///
    /// # Errors
    /// [`MemoryError::OutOfVirtualSpace`] if the kernel range has no free page.
    pub(crate) fn zero_frames<M: PhysMapper, P: PagingControl>(
        &self,
        mapper: &M,
        paging: &P,
        frame: PhysicalPage,
        pages: u32,
    ) -> Result<(), MemoryError> {
        let kernel = self.kernel(mapper);
        let Some(window) = kernel.find_unmapped(KERNEL_FIRST_PAGE, USER_FIRST_PAGE, 1) else {
            log::error!("no kernel page free to zero {pages} frame(s) at {frame}");
            return Err(MemoryError::OutOfVirtualSpace { pages });
        };

        for i in 0..pages {
            let target = PhysicalPage::from_frame_number(frame.frame_number() + i);
            if kernel.map_one(&mut NoFrames, window, target, false).is_err() {
                log::error!("kernel page {window} has no page table");
                return Err(MemoryError::OutOfVirtualSpace { pages });
            }
            paging.invalidate_page(window);
            unsafe {
                // The window maps only `target`, which the caller owns.
                paging.zero_fill(window.base(), PAGE_SIZE as usize);
            }
            kernel.unmap_one(window);
            paging.invalidate_page(window);
        }
        Ok(())
    }
}
