//! Boot sequencing of the memory core.
//!
//! [`MemoryManager::boot`] walks a fixed list of stages, each one building
//! on the previous. Any failure on the way panics; there is no partially
//! initialised memory manager.

use crate::address_space::AddressSpaceHandle;
use crate::frame_alloc::BitmapFrameAlloc;
use crate::paging::PagingControl;
use crate::state::MemoryState;
use crate::vmm::MemoryManager;
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_info::memory::FRAME_COUNT;
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualPage, align_down, align_up,
};
use kernel_sync::CriticalSection;
use kernel_vmem::{DirectoryIndex, KERNEL_SHARED_ENTRIES, PhysMapper};

/// Progress of [`MemoryManager::boot`], in order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BootStage {
    Uninitialized,
    /// Every frame is marked used.
    BitmapCleared,
    /// The kernel directory holds the kernel's static page tables.
    KernelDirectoryBuilt,
    /// Available firmware regions are free in the bitmap.
    MemoryMapApplied,
    /// The kernel image is identity-mapped for good.
    KernelMapped,
    /// Every boot module is identity-mapped for good.
    ModulesMapped,
    /// Page 0 is unmapped and its frame reserved.
    NullPageUnmapped,
    /// The kernel directory is loaded and paging is on.
    PagingActive,
}

impl BootStage {
    /// The stage that follows this one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::BitmapCleared),
            Self::BitmapCleared => Some(Self::KernelDirectoryBuilt),
            Self::KernelDirectoryBuilt => Some(Self::MemoryMapApplied),
            Self::MemoryMapApplied => Some(Self::KernelMapped),
            Self::KernelMapped => Some(Self::ModulesMapped),
            Self::ModulesMapped => Some(Self::NullPageUnmapped),
            Self::NullPageUnmapped => Some(Self::PagingActive),
            Self::PagingActive => None,
        }
    }
}

impl MemoryState<'_> {
    fn advance(&mut self, to: BootStage) {
        assert_eq!(
            self.stage.next(),
            Some(to),
            "boot stage {to:?} out of order after {:?}",
            self.stage
        );
        self.stage = to;
        log::info!("memory boot: {to:?}");
    }
}

impl<'b, M: PhysMapper, P: PagingControl> MemoryManager<'b, M, P> {
    /// Bring up the memory core and turn paging on.
    ///
    /// `bitmap` backs the frame bitmap and must hold at least one bit per
    /// frame of physical memory to manage. `mapper` must reach the kernel
    /// image's paging structures and every frame handed out as an identity
    /// page.
    ///
    /// # Panics
    /// If the kernel's paging structures lie outside the image, or mapping
    /// the image or a module fails.
    pub fn boot(
        bitmap: &'b mut [u64],
        mapper: M,
        paging: P,
        image: &KernelImage,
        info: &BootMemoryInfo<'_>,
    ) -> Self {
        let frame_count = (bitmap.len() * 64).min(FRAME_COUNT);
        #[allow(clippy::cast_possible_truncation)]
        let frames = BitmapFrameAlloc::new(bitmap, frame_count as u32);
        let root = image.page_directory;

        let mut state = MemoryState::new(frames, root);
        let kernel = AddressSpaceHandle::from_directory_page(root);

        state.frames.mark_all_used();
        state.advance(BootStage::BitmapCleared);

        build_kernel_directory(&state, &mapper, image);
        state.advance(BootStage::KernelDirectoryBuilt);

        apply_memory_map(&mut state.frames, info);
        state.advance(BootStage::MemoryMapApplied);

        if let Err(e) = state.map_eternal(&mapper, kernel, image.range()) {
            panic!("cannot map the kernel image {:?}: {e}", image.range());
        }
        state.advance(BootStage::KernelMapped);

        for module in info.modules {
            if let Err(e) = state.map_eternal(&mapper, kernel, module.range) {
                panic!("cannot map boot module {:?}: {e}", module.range);
            }
        }
        state.advance(BootStage::ModulesMapped);

        state.kernel(&mapper).unmap(VirtualPage::from_index(0), 1);
        state.frames.set_used(PhysicalAddress::zero(), 1);
        state.advance(BootStage::NullPageUnmapped);

        paging.load_directory(root);
        paging.enable_paging();
        state.active_root = Some(root);
        state.advance(BootStage::PagingActive);

        log::info!("total memory: {} KiB", state.frames.total_bytes() / 1024);
        log::info!("used memory: {} KiB", state.frames.used_bytes() / 1024);
        log::info!("paging enabled");

        Self {
            state: CriticalSection::new(state),
            mapper,
            paging,
            kernel,
        }
    }

    /// How far boot got. Always [`BootStage::PagingActive`] once `boot`
    /// has returned.
    #[must_use]
    pub fn boot_stage(&self) -> BootStage {
        self.state.enter().stage
    }
}

/// Wire the image's static tables into the kernel directory, one per
/// kernel-shared entry.
#[allow(clippy::cast_possible_truncation)]
fn build_kernel_directory<M: PhysMapper>(
    state: &MemoryState<'_>,
    mapper: &M,
    image: &KernelImage,
) {
    let range = image.range();
    let tables_len = KERNEL_SHARED_ENTRIES as u32 * PAGE_SIZE;
    assert!(
        range.contains_span(image.page_directory.base(), PAGE_SIZE),
        "kernel page directory {} lies outside the kernel image",
        image.page_directory
    );
    assert!(
        range.contains_span(image.page_tables.base(), tables_len),
        "kernel page tables at {} lie outside the kernel image",
        image.page_tables
    );

    let kernel = state.kernel(mapper);
    kernel.clear();
    for i in 0..KERNEL_SHARED_ENTRIES {
        let table = PhysicalPage::from_frame_number(image.page_tables.frame_number() + i as u32);
        kernel.adopt_table(DirectoryIndex::new(i as u16), table);
    }
}

/// Free every whole frame of the available regions and start the counters.
fn apply_memory_map(frames: &mut BitmapFrameAlloc<'_>, info: &BootMemoryInfo<'_>) {
    for entry in info.memory_map.iter().filter(|e| e.is_available()) {
        let first = align_up(entry.range.base.as_u32(), PAGE_SIZE);
        let end = align_down(entry.range.end(), PAGE_SIZE);
        if end > first {
            frames.set_free(PhysicalAddress::new(first), (end - first) / PAGE_SIZE);
        }
    }
    frames.reset_used_bytes();
    frames.set_total_bytes(info.memory_usable);
}
