//! Shared fixtures: simulated RAM, a recording paging backend and a booted
//! memory manager over a small machine.

#![allow(dead_code)]

use kernel_alloc::{MemoryManager, PagingControl};
use kernel_info::boot::{
    BootMemoryInfo, BootModule, KernelImage, MemoryMapEntry, MemoryMapEntryKind,
};
use kernel_info::memory::FRAME_BITMAP_WORDS;
use kernel_memory_addresses::{
    MemoryRange, PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_vmem::PhysMapper;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

pub const IMAGE_START: u32 = 0x0010_0000;
pub const IMAGE_DIRECTORY: u32 = 0x0010_1000;
pub const IMAGE_TABLES: u32 = 0x0010_2000;
pub const IMAGE_END: u32 = 0x0020_3000;
pub const MODULE_BASE: u32 = 0x0030_0000;
pub const MODULE_SIZE: u32 = 0x1800;
pub const RAM_END: u32 = 0x0400_0000;
pub const USABLE: u64 = (RAM_END - IMAGE_START) as u64;

/// First frame nobody owns after boot.
pub const FIRST_FREE_FRAME: u32 = IMAGE_END / PAGE_SIZE;

#[repr(C, align(4096))]
pub struct Aligned4K([u8; 4096]);

/// Physical memory as a sparse set of frames, created zeroed on first touch.
///
/// Every frame reached through [`PhysMapper`] is remembered, so tests can
/// tell which frames the memory manager accessed directly.
#[derive(Default)]
pub struct SimulatedRam {
    frames: RefCell<BTreeMap<u32, Box<Aligned4K>>>,
    touched: RefCell<BTreeSet<u32>>,
}

impl SimulatedRam {
    /// Whether the frame holding `pa` was reached through [`PhysMapper`]
    /// since the last [`forget_touches`](Self::forget_touches).
    pub fn was_touched(&self, pa: u32) -> bool {
        self.touched.borrow().contains(&(pa & !(PAGE_SIZE - 1)))
    }

    pub fn forget_touches(&self) {
        self.touched.borrow_mut().clear();
    }

    fn frame(&self, pa: u32) -> *mut [u8; 4096] {
        let base = pa & !(PAGE_SIZE - 1);
        let mut frames = self.frames.borrow_mut();
        let frame = frames.entry(base).or_insert_with(|| Box::new(Aligned4K([0; 4096])));
        std::ptr::from_mut(&mut frame.0)
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let base = pa.as_u32() & !(PAGE_SIZE - 1);
        self.touched.borrow_mut().insert(base);
        let ptr = self.frame(base).cast::<u8>();
        unsafe { &mut *ptr.add(pa.offset() as usize).cast::<T>() }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    LoadDirectory(u32),
    EnablePaging,
    Invalidate(u32),
    ZeroFill(u32, usize),
}

/// [`PagingControl`] that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingPaging {
    events: RefCell<Vec<Event>>,
}

impl RecordingPaging {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl PagingControl for RecordingPaging {
    fn load_directory(&self, directory: PhysicalPage) {
        self.events.borrow_mut().push(Event::LoadDirectory(directory.base().as_u32()));
    }

    fn enable_paging(&self) {
        self.events.borrow_mut().push(Event::EnablePaging);
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.events.borrow_mut().push(Event::Invalidate(page.base().as_u32()));
    }

    unsafe fn zero_fill(&self, va: VirtualAddress, len: usize) {
        self.events.borrow_mut().push(Event::ZeroFill(va.as_u32(), len));
    }
}

pub type TestManager = MemoryManager<'static, SimulatedRam, RecordingPaging>;

pub fn image() -> KernelImage {
    KernelImage {
        start: PhysicalAddress::new(IMAGE_START),
        end: PhysicalAddress::new(IMAGE_END),
        page_directory: PhysicalPage::from_addr(PhysicalAddress::new(IMAGE_DIRECTORY)),
        page_tables: PhysicalPage::from_addr(PhysicalAddress::new(IMAGE_TABLES)),
    }
}

/// 64 MiB machine: low 1 MiB reserved, the rest available, one module.
pub fn boot() -> TestManager {
    boot_on(&[])
}

/// [`boot`] plus `size` bytes of RAM at `base`.
pub fn boot_with_ram_at(base: u32, size: u32) -> TestManager {
    boot_on(&[MemoryMapEntry::new(base, size, MemoryMapEntryKind::Available)])
}

fn boot_on(extra: &[MemoryMapEntry]) -> TestManager {
    let mut memory_map = vec![
        MemoryMapEntry::new(0, IMAGE_START, MemoryMapEntryKind::Reserved),
        MemoryMapEntry::new(IMAGE_START, RAM_END - IMAGE_START, MemoryMapEntryKind::Available),
        MemoryMapEntry::new(0xFFFC_0000, 0x4_0000, MemoryMapEntryKind::Reserved),
    ];
    memory_map.extend_from_slice(extra);
    let modules = [BootModule {
        range: MemoryRange::new(PhysicalAddress::new(MODULE_BASE), MODULE_SIZE),
    }];
    let info = BootMemoryInfo {
        memory_map: &memory_map,
        modules: &modules,
        memory_usable: USABLE + extra.iter().map(|e| u64::from(e.range.size)).sum::<u64>(),
    };

    let bitmap: &'static mut [u64] = Box::leak(vec![0u64; FRAME_BITMAP_WORDS].into_boxed_slice());
    MemoryManager::boot(
        bitmap,
        SimulatedRam::default(),
        RecordingPaging::default(),
        &image(),
        &info,
    )
}

pub fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

pub fn pa(p: u32) -> PhysicalAddress {
    PhysicalAddress::new(p)
}
