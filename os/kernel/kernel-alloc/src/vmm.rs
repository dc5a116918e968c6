//! The allocation facade.
//!
//! [`MemoryManager`] owns the frame bitmap and reaches every page directory
//! through the kernel address space. All state sits behind one
//! [`CriticalSection`]; each public operation enters it exactly once.
//!
//! ```ignore
//! let mm = MemoryManager::boot(bitmap, IdentityMapper, CpuPaging, &image, &info);
//! let kernel = mm.kernel_handle();
//! let buf = mm.alloc(kernel, 3 * 4096, MemoryFlags::ZERO)?;
//! mm.free(kernel, buf, 3);
//! ```

use crate::address_space::AddressSpaceHandle;
use crate::error::MemoryError;
use crate::flags::MemoryFlags;
use crate::paging::PagingControl;
use crate::state::{MemoryState, identity_page};
use kernel_memory_addresses::{
    MemoryRange, PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage, pages_for,
};
use kernel_sync::CriticalSection;
use kernel_vmem::PhysMapper;

/// Kernel memory manager: physical frames, address spaces and mappings.
pub struct MemoryManager<'b, M: PhysMapper, P: PagingControl> {
    pub(crate) state: CriticalSection<MemoryState<'b>>,
    pub(crate) mapper: M,
    pub(crate) paging: P,
    pub(crate) kernel: AddressSpaceHandle,
}

impl<M: PhysMapper, P: PagingControl> MemoryManager<'_, M, P> {
    /// The kernel's own address space. Never changes after boot.
    #[inline]
    #[must_use]
    pub const fn kernel_handle(&self) -> AddressSpaceHandle {
        self.kernel
    }

    /// The hardware paging primitives in use.
    #[inline]
    #[must_use]
    pub const fn paging(&self) -> &P {
        &self.paging
    }

    /// The physical memory accessor in use.
    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Allocate `size` bytes (rounded up to whole pages) in `handle`.
    ///
    /// The physical run is contiguous. With [`MemoryFlags::USER`] the range
    /// is placed in the user range and user-accessible, otherwise in the
    /// kernel range. With [`MemoryFlags::ZERO`] it is zero-filled: after the
    /// lock is released when `handle` is active or the range is kernel
    /// memory, otherwise under the lock through a kernel window page.
    ///
    /// # Errors
    /// [`MemoryError::EmptyRequest`] for `size == 0`, otherwise a physical or
    /// virtual shortage. A failed call holds no frames and maps no page.
    pub fn alloc(
        &self,
        handle: AddressSpaceHandle,
        size: usize,
        flags: MemoryFlags,
    ) -> Result<VirtualAddress, MemoryError> {
        let pages = pages_for(size);
        if pages == 0 {
            return Err(MemoryError::EmptyRequest);
        }
        let user = flags.contains(MemoryFlags::USER);

        let zero = flags.contains(MemoryFlags::ZERO);

        let (page, live) = {
            let mut state = self.state.enter();
            let (page, frame) = state.alloc_pages(&self.mapper, handle, pages, user)?;
            let root = state.space(&self.mapper, handle).root_page();
            let live = state.translation_live(root, page);
            if zero && !live {
                if let Err(e) = state.zero_frames(&self.mapper, &self.paging, frame, pages) {
                    state.free_pages(&self.mapper, &self.paging, handle, page.base(), pages);
                    return Err(e);
                }
            }
            (page, live)
        };

        if zero && live {
            self.zero(page.base(), pages);
        }
        Ok(page.base())
    }

    /// Free `count` pages at `va` in `handle`.
    ///
    /// All-or-nothing: if any page of the range is not present, or is part
    /// of an eternal mapping, nothing happens and a warning is logged.
    ///
    /// # Panics
    /// If a mapped frame is already free in the bitmap.
    pub fn free(&self, handle: AddressSpaceHandle, va: VirtualAddress, count: u32) {
        self.state
            .enter()
            .free_pages(&self.mapper, &self.paging, handle, va, count);
    }

    /// Get one zeroed page whose virtual and physical addresses are equal.
    ///
    /// # Errors
    /// [`MemoryError::IdentitySearchExhausted`] when no page in the kernel
    /// range is both physically free and unmapped in `handle`.
    pub fn alloc_identity_page(
        &self,
        handle: AddressSpaceHandle,
    ) -> Result<VirtualAddress, MemoryError> {
        let page = {
            let mut state = self.state.enter();
            let space = state.space(&self.mapper, handle);
            let frame = identity_page(&mut state.frames, &space)?;
            let page = VirtualPage::from_index(frame.frame_number());
            if !state.translation_live(space.root_page(), page) {
                if let Err(e) = state.zero_frames(&self.mapper, &self.paging, frame, 1) {
                    state.free_pages(&self.mapper, &self.paging, handle, page.base(), 1);
                    return Err(e);
                }
                return Ok(page.base());
            }
            page
        };

        self.zero(page.base(), 1);
        Ok(page.base())
    }

    /// Reserve `range` permanently and identity-map it supervisor-only.
    ///
    /// The frames are taken out of the bitmap without touching the usage
    /// counter and the pages are pinned: [`free`](Self::free) and
    /// [`unmap`](Self::unmap) never release them.
    ///
    /// # Errors
    /// [`MemoryError::OutOfVirtualSpace`] if a page table cannot be created.
    /// Nothing of `range` is reserved or mapped then.
    pub fn map_eternal(
        &self,
        handle: AddressSpaceHandle,
        range: MemoryRange,
    ) -> Result<(), MemoryError> {
        self.state.enter().map_eternal(&self.mapper, handle, range)
    }

    /// Back every unmapped page of `count` pages at `va` with a fresh frame.
    /// Pages already present keep their frames.
    ///
    /// # Errors
    /// A physical or virtual shortage, or a range touching page 0. No page of
    /// the range is newly mapped when that happens.
    pub fn map(
        &self,
        handle: AddressSpaceHandle,
        va: VirtualAddress,
        count: u32,
        flags: MemoryFlags,
    ) -> Result<(), MemoryError> {
        if count == 0 {
            return Ok(());
        }
        self.state
            .enter()
            .populate(&self.mapper, handle, va, count, flags.contains(MemoryFlags::USER))
    }

    /// Release every present page of `count` pages at `va`, skipping the
    /// absent ones.
    pub fn unmap(&self, handle: AddressSpaceHandle, va: VirtualAddress, count: u32) {
        self.state
            .enter()
            .unmap_pages(&self.mapper, &self.paging, handle, va, count);
    }

    /// The physical address `va` maps to in `handle`.
    #[must_use]
    pub fn translate(
        &self,
        handle: AddressSpaceHandle,
        va: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let state = self.state.enter();
        state.space(&self.mapper, handle).translate(va)
    }

    /// Whether all `count` pages starting at `va` are present in `handle`.
    #[must_use]
    pub fn present(&self, handle: AddressSpaceHandle, va: VirtualAddress, count: u32) -> bool {
        let state = self.state.enter();
        state.space(&self.mapper, handle).present(va, count)
    }

    /// Bytes handed out since boot, excluding eternal mappings.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.state.enter().frames.used_bytes()
    }

    /// Usable memory reported by the firmware.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.state.enter().frames.total_bytes()
    }

    /// Zero a range whose translation is live on this CPU.
    fn zero(&self, va: VirtualAddress, pages: u32) {
        unsafe {
            // The range was just mapped for this caller and is not shared.
            self.paging.zero_fill(va, pages as usize * PAGE_SIZE as usize);
        }
    }
}
