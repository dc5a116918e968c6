//! Address-space lifecycle: create, destroy, switch.
//!
//! Every directory is an identity page of the kernel space. A handle is the
//! directory's virtual address there, which equals its physical address.

use crate::error::MemoryError;
use crate::paging::PagingControl;
use crate::state::identity_page;
use crate::vmm::MemoryManager;
use core::fmt;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{AddressSpace, FrameRole, PageDirectory, PhysMapper};

/// Opaque reference to one address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AddressSpaceHandle {
    directory: VirtualAddress,
}

impl AddressSpaceHandle {
    pub(crate) const fn from_directory_page(page: PhysicalPage) -> Self {
        Self {
            directory: page.base().identity(),
        }
    }

    /// Where the directory is mapped in the kernel space.
    #[inline]
    #[must_use]
    pub const fn directory(self) -> VirtualAddress {
        self.directory
    }
}

impl fmt::Display for AddressSpaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address space {}", self.directory)
    }
}

impl<M: PhysMapper, P: PagingControl> MemoryManager<'_, M, P> {
    /// Create an address space whose kernel range shares the kernel's page
    /// tables and whose user range is empty.
    ///
    /// # Errors
    /// The identity page for the directory could not be obtained.
    pub fn create(&self) -> Result<AddressSpaceHandle, MemoryError> {
        let mut state = self.state.enter();
        let kernel = state.kernel(&self.mapper);

        let root = identity_page(&mut state.frames, &kernel).map_err(|e| {
            log::error!("page directory allocation failed: {e}");
            e
        })?;

        let space = AddressSpace::from_root(&self.mapper, root);
        space.clear();
        space.share_kernel_entries(&kernel);

        let handle = AddressSpaceHandle::from_directory_page(root);
        log::debug!("created {handle}");
        Ok(handle)
    }

    /// Tear down `handle`: every private page and table, then the directory.
    ///
    /// # Panics
    /// If `handle` is the kernel space, the active space, or not a mapped
    /// directory.
    pub fn destroy(&self, handle: AddressSpaceHandle) {
        let mut guard = self.state.enter();
        let state = &mut *guard;

        assert_ne!(handle, self.kernel, "the kernel address space is never destroyed");
        let space = state.space(&self.mapper, handle);
        let root = space.root_page();
        assert_ne!(state.active_root, Some(root), "cannot destroy the active {handle}");

        let kernel = state.kernel(&self.mapper);
        space.release_private(|frame, role| match role {
            FrameRole::Leaf => state.frames.free(frame, 1),
            FrameRole::Pinned => {}
            FrameRole::Table => {
                let page = VirtualPage::from_index(frame.frame_number());
                state.release_page(&kernel, page, &self.paging);
            }
        });
        let directory = VirtualPage::from_index(root.frame_number());
        state.release_page(&kernel, directory, &self.paging);

        log::debug!("destroyed {handle}");
    }

    /// Make `handle` the active address space.
    ///
    /// # Panics
    /// If `handle` is not a mapped directory.
    pub fn switch_to(&self, handle: AddressSpaceHandle) {
        let mut state = self.state.enter();
        let root = state.space(&self.mapper, handle).root_page();
        self.paging.load_directory(root);
        state.active_root = Some(root);
        log::debug!("switched to {handle}");
    }

    /// Run `f` on the directory of `handle` while holding the lock.
    pub fn inspect_directory<R>(
        &self,
        handle: AddressSpaceHandle,
        f: impl FnOnce(&PageDirectory) -> R,
    ) -> R {
        let state = self.state.enter();
        f(state.space(&self.mapper, handle).directory())
    }
}
