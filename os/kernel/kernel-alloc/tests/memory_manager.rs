mod common;

use common::*;
use kernel_alloc::{BootStage, DumpScope, MemoryError, MemoryFlags};
use kernel_memory_addresses::{MemoryRange, PAGE_SIZE};

const PAGE: usize = PAGE_SIZE as usize;
const USER_BASE: u32 = 0x4000_0000;

fn raw_entries(mm: &TestManager, handle: kernel_alloc::AddressSpaceHandle) -> (Vec<u32>, Vec<u32>) {
    mm.inspect_directory(handle, |d| {
        (
            d.kernel_entries().iter().map(|e| e.raw()).collect(),
            d.private_entries().iter().map(|e| e.raw()).collect(),
        )
    })
}

#[test]
fn boot_reaches_paging_active() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    assert_eq!(mm.boot_stage(), BootStage::PagingActive);
    assert_eq!(
        mm.paging().events(),
        [Event::LoadDirectory(IMAGE_DIRECTORY), Event::EnablePaging]
    );
    assert_eq!(kernel.directory(), va(IMAGE_DIRECTORY));
    assert_eq!(mm.used_bytes(), 0);
    assert_eq!(mm.total_bytes(), USABLE);

    assert_eq!(mm.translate(kernel, va(IMAGE_START + 0x10)), Some(pa(IMAGE_START + 0x10)));
    assert!(mm.present(kernel, va(IMAGE_START), (IMAGE_END - IMAGE_START) / PAGE_SIZE));
    assert!(mm.present(kernel, va(MODULE_BASE), 2));
    assert!(!mm.present(kernel, va(MODULE_BASE + 0x2000), 1));
    assert!(!mm.present(kernel, va(0), 1));

    let (shared, private) = raw_entries(&mm, kernel);
    assert!(shared.iter().all(|e| e & 1 == 1));
    assert!(private.iter().all(|e| e & 1 == 0));
}

#[test]
fn kernel_alloc_and_free_balance_counters() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let a = mm.alloc(kernel, 3 * PAGE - 100, MemoryFlags::empty()).unwrap();
    assert_eq!(a, va(0x1000));
    assert_eq!(mm.translate(kernel, a), Some(pa(FIRST_FREE_FRAME * PAGE_SIZE)));
    assert_eq!(mm.translate(kernel, va(0x3008)), Some(pa((FIRST_FREE_FRAME + 2) * PAGE_SIZE + 8)));
    assert_eq!(mm.used_bytes(), 3 * 4096);

    mm.paging().clear();
    mm.free(kernel, a, 3);
    assert_eq!(mm.used_bytes(), 0);
    assert!(!mm.present(kernel, a, 1));
    assert_eq!(
        mm.paging().events(),
        [Event::Invalidate(0x1000), Event::Invalidate(0x2000), Event::Invalidate(0x3000)]
    );
}

#[test]
fn empty_and_oversized_requests_fail_cleanly() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    assert_eq!(mm.alloc(kernel, 0, MemoryFlags::empty()), Err(MemoryError::EmptyRequest));
    assert_eq!(
        mm.alloc(kernel, RAM_END as usize, MemoryFlags::empty()),
        Err(MemoryError::OutOfPhysicalMemory { pages: RAM_END / PAGE_SIZE })
    );
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn create_shares_kernel_tables_and_destroy_returns_everything() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let space = mm.create().unwrap();
    assert_eq!(space.directory(), va(FIRST_FREE_FRAME * PAGE_SIZE));
    assert_eq!(mm.used_bytes(), 4096);
    assert_eq!(mm.translate(kernel, space.directory()), Some(pa(FIRST_FREE_FRAME * PAGE_SIZE)));

    let (kernel_shared, _) = raw_entries(&mm, kernel);
    let (shared, private) = raw_entries(&mm, space);
    assert_eq!(shared, kernel_shared);
    assert!(private.iter().all(|&e| e == 0));

    let u = mm.alloc(space, 2 * PAGE, MemoryFlags::USER).unwrap();
    assert_eq!(u, va(USER_BASE));
    assert_eq!(mm.translate(space, u), Some(pa((FIRST_FREE_FRAME + 1) * PAGE_SIZE)));
    assert_eq!(mm.translate(kernel, u), None);
    // directory, two data frames, one page table
    assert_eq!(mm.used_bytes(), 4 * 4096);

    mm.paging().clear();
    mm.destroy(space);
    assert_eq!(mm.used_bytes(), 0);
    assert_eq!(mm.translate(kernel, space.directory()), None);
    let table = (FIRST_FREE_FRAME + 3) * PAGE_SIZE;
    assert_eq!(
        mm.paging().events(),
        [Event::Invalidate(table), Event::Invalidate(space.directory().as_u32())]
    );
}

#[test]
fn identity_page_maps_onto_itself() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let v = mm.alloc_identity_page(kernel).unwrap();
    assert_eq!(mm.translate(kernel, v).map(|p| p.as_u32()), Some(v.as_u32()));
    assert_eq!(v, va(FIRST_FREE_FRAME * PAGE_SIZE));
    assert!(mm.paging().events().contains(&Event::ZeroFill(v.as_u32(), PAGE)));
    assert_eq!(mm.used_bytes(), 4096);

    let w = mm.alloc_identity_page(kernel).unwrap();
    assert_eq!(w.as_u32(), v.as_u32() + PAGE_SIZE);

    mm.free(kernel, v, 1);
    mm.free(kernel, w, 1);
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn eternal_mapping_cannot_be_released() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    mm.map_eternal(kernel, MemoryRange::new(pa(0x0040_0800), 0x1000)).unwrap();
    assert!(mm.present(kernel, va(0x0040_0000), 2));
    assert_eq!(mm.translate(kernel, va(0x0040_1234)), Some(pa(0x0040_1234)));
    assert_eq!(mm.used_bytes(), 0);

    mm.free(kernel, va(0x0040_0000), 2);
    mm.unmap(kernel, va(0x0040_0000), 2);
    assert!(mm.present(kernel, va(0x0040_0000), 2));

    mm.free(kernel, va(IMAGE_START), 1);
    assert!(mm.present(kernel, va(IMAGE_START), 1));
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn free_of_partly_present_range_is_ignored() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let a = mm.alloc(kernel, 2 * PAGE, MemoryFlags::empty()).unwrap();
    mm.free(kernel, a, 3);
    assert!(mm.present(kernel, a, 2));
    assert_eq!(mm.used_bytes(), 2 * 4096);

    mm.free(kernel, a, 2);
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn failed_mapping_returns_the_physical_run() {
    let mm = boot();
    let kernel = mm.kernel_handle();
    let space = mm.create().unwrap();

    // Take the gap between the directory and the module, leaving one run.
    let gap = MODULE_BASE / PAGE_SIZE - (FIRST_FREE_FRAME + 1);
    let filler = mm.alloc(kernel, gap as usize * PAGE, MemoryFlags::empty()).unwrap();
    assert_eq!(mm.translate(kernel, filler), Some(pa((FIRST_FREE_FRAME + 1) * PAGE_SIZE)));
    let used = mm.used_bytes();

    // The whole remaining run: no frame is left for the user page table.
    let rest = RAM_END / PAGE_SIZE - (MODULE_BASE / PAGE_SIZE + 2);
    assert_eq!(
        mm.alloc(space, rest as usize * PAGE, MemoryFlags::USER),
        Err(MemoryError::OutOfVirtualSpace { pages: rest })
    );
    assert_eq!(mm.used_bytes(), used);
    assert!(!mm.present(space, va(USER_BASE), 1));

    let next = mm.alloc(kernel, PAGE, MemoryFlags::empty()).unwrap();
    assert_eq!(mm.translate(kernel, next), Some(pa(MODULE_BASE + 2 * PAGE_SIZE)));
}

#[test]
fn zero_fill_of_kernel_memory_uses_its_own_address() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let k = mm.alloc(kernel, 2 * PAGE, MemoryFlags::ZERO).unwrap();
    assert_eq!(mm.paging().events().last(), Some(&Event::ZeroFill(k.as_u32(), 2 * PAGE)));
    mm.free(kernel, k, 2);
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn zero_fill_of_inactive_space_goes_through_a_kernel_window() {
    let mm = boot();
    let kernel = mm.kernel_handle();
    let space = mm.create().unwrap();
    let data = (FIRST_FREE_FRAME + 1) * PAGE_SIZE;

    mm.paging().clear();
    mm.mapper().forget_touches();
    let u = mm.alloc(space, PAGE, MemoryFlags::USER | MemoryFlags::ZERO).unwrap();

    // The first free kernel page serves as the window and is gone again.
    let window = PAGE_SIZE;
    assert_eq!(
        mm.paging().events(),
        [
            Event::Invalidate(window),
            Event::ZeroFill(window, PAGE),
            Event::Invalidate(window),
        ]
    );
    assert!(!mm.present(kernel, va(window), 1));
    assert!(!mm.mapper().was_touched(data));
    assert_eq!(mm.translate(space, u), Some(pa(data)));
    // directory, user page table, data page
    assert_eq!(mm.used_bytes(), 3 * 4096);
}

#[test]
fn zero_fill_without_a_free_kernel_page_gives_the_frames_back() {
    // RAM above the kernel range: frames with no kernel page of their own.
    let high = 0x4000_0000;
    let mm = boot_with_ram_at(high, 256 * PAGE_SIZE);
    let kernel = mm.kernel_handle();
    let space = mm.create().unwrap();
    let first = mm.alloc(space, PAGE, MemoryFlags::USER).unwrap();

    // Fill the whole kernel range below and above the RAM.
    mm.map_eternal(kernel, MemoryRange::new(pa(PAGE_SIZE), IMAGE_START - PAGE_SIZE)).unwrap();
    mm.map_eternal(kernel, MemoryRange::new(pa(RAM_END), high - RAM_END)).unwrap();
    let low = FIRST_FREE_FRAME + 1;
    mm.map(kernel, va(low * PAGE_SIZE), RAM_END / PAGE_SIZE - low, MemoryFlags::empty())
        .unwrap();
    assert!(mm.present(kernel, va(PAGE_SIZE), high / PAGE_SIZE - 1));

    let used = mm.used_bytes();
    mm.paging().clear();
    assert_eq!(
        mm.alloc(space, PAGE, MemoryFlags::USER | MemoryFlags::ZERO),
        Err(MemoryError::OutOfVirtualSpace { pages: 1 })
    );
    assert_eq!(mm.used_bytes(), used);
    assert!(!mm.present(space, first + PAGE_SIZE, 1));
    assert!(mm.paging().events().is_empty());

    // One kernel page back is enough.
    let window = low * PAGE_SIZE;
    mm.unmap(kernel, va(window), 1);
    mm.paging().clear();
    let second = mm.alloc(space, PAGE, MemoryFlags::USER | MemoryFlags::ZERO).unwrap();
    assert_eq!(second, first + PAGE_SIZE);
    assert_eq!(
        mm.paging().events(),
        [
            Event::Invalidate(window),
            Event::ZeroFill(window, PAGE),
            Event::Invalidate(window),
        ]
    );
    assert!(!mm.present(kernel, va(window), 1));
}

#[test]
fn identity_search_exhaustion_leaves_the_bitmap_alone() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    // Every frame of the machine, in the two free runs around the module.
    let below = MODULE_BASE / PAGE_SIZE - FIRST_FREE_FRAME;
    let above = (RAM_END - MODULE_BASE - 2 * PAGE_SIZE) / PAGE_SIZE;
    let a = mm.alloc(kernel, below as usize * PAGE, MemoryFlags::empty()).unwrap();
    mm.alloc(kernel, above as usize * PAGE, MemoryFlags::empty()).unwrap();
    let used = mm.used_bytes();
    assert_eq!(used, USABLE - u64::from(IMAGE_END - IMAGE_START) - 2 * 4096);

    assert_eq!(mm.alloc_identity_page(kernel), Err(MemoryError::IdentitySearchExhausted));
    assert_eq!(mm.create(), Err(MemoryError::IdentitySearchExhausted));
    assert_eq!(mm.used_bytes(), used);

    // Crosses into the kernel directory's user range, which has no table yet.
    let edge = MemoryRange::new(pa(0x3FFF_F000), 2 * PAGE_SIZE);
    assert_eq!(
        mm.map_eternal(kernel, edge),
        Err(MemoryError::OutOfVirtualSpace { pages: 2 })
    );
    assert!(!mm.present(kernel, va(0x3FFF_F000), 1));
    assert_eq!(mm.used_bytes(), used);

    mm.free(kernel, a, below);
    assert_eq!(mm.map_eternal(kernel, edge), Ok(()));
    assert!(mm.present(kernel, va(0x3FFF_F000), 2));
    let table = FIRST_FREE_FRAME * PAGE_SIZE;
    assert_eq!(mm.translate(kernel, va(table)), Some(pa(table)));
    assert_eq!(mm.alloc_identity_page(kernel), Ok(va(table + PAGE_SIZE)));

    mm.free(kernel, va(0x3FFF_F000), 2);
    assert!(mm.present(kernel, va(0x3FFF_F000), 2));
}

#[test]
fn map_never_touches_the_null_page() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    assert_eq!(
        mm.map(kernel, va(0), 1, MemoryFlags::empty()),
        Err(MemoryError::OutOfVirtualSpace { pages: 1 })
    );
    assert_eq!(
        mm.map(kernel, va(0x800), 3, MemoryFlags::empty()),
        Err(MemoryError::OutOfVirtualSpace { pages: 3 })
    );
    assert!(!mm.present(kernel, va(0), 1));
    assert!(!mm.present(kernel, va(PAGE_SIZE), 1));
    assert_eq!(mm.used_bytes(), 0);

    mm.map(kernel, va(PAGE_SIZE), 1, MemoryFlags::empty()).unwrap();
    assert!(mm.present(kernel, va(PAGE_SIZE), 1));
}

#[test]
fn unmap_in_active_space_invalidates_each_page() {
    let mm = boot();
    let kernel = mm.kernel_handle();
    let space = mm.create().unwrap();

    mm.switch_to(space);
    let load = Event::LoadDirectory(space.directory().as_u32());
    assert_eq!(mm.paging().events().last(), Some(&load));

    let u = mm.alloc(space, 2 * PAGE, MemoryFlags::USER).unwrap();
    mm.paging().clear();
    mm.unmap(space, u, 2);
    assert_eq!(
        mm.paging().events(),
        [Event::Invalidate(USER_BASE), Event::Invalidate(USER_BASE + PAGE_SIZE)]
    );
    // the directory and the kept page table
    assert_eq!(mm.used_bytes(), 2 * 4096);

    mm.switch_to(kernel);
    mm.destroy(space);
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
#[should_panic(expected = "cannot destroy the active")]
fn destroying_the_active_space_panics() {
    let mm = boot();
    let space = mm.create().unwrap();
    mm.switch_to(space);
    mm.destroy(space);
}

#[test]
#[should_panic(expected = "never destroyed")]
fn destroying_the_kernel_space_panics() {
    let mm = boot();
    mm.destroy(mm.kernel_handle());
}

#[test]
#[should_panic(expected = "does not reference a mapped page directory")]
fn stale_handle_panics() {
    let mm = boot();
    let space = mm.create().unwrap();
    mm.destroy(space);
    let _ = mm.present(space, va(USER_BASE), 1);
}

#[test]
fn map_populates_only_missing_pages() {
    let mm = boot();
    let space = mm.create().unwrap();
    let base = va(0x5000_0000);

    mm.map(space, base, 3, MemoryFlags::USER).unwrap();
    assert!(mm.present(space, base, 3));
    // directory, page table, three pages
    assert_eq!(mm.used_bytes(), 5 * 4096);

    let first = mm.translate(space, base);
    mm.map(space, va(0x5000_1000), 3, MemoryFlags::USER).unwrap();
    assert!(mm.present(space, base, 4));
    assert_eq!(mm.translate(space, base), first);
    assert_eq!(mm.used_bytes(), 6 * 4096);

    mm.unmap(space, base, 10);
    assert!(!mm.present(space, base, 1));
    assert_eq!(mm.used_bytes(), 2 * 4096);

    assert_eq!(mm.map(space, base, 0, MemoryFlags::USER), Ok(()));
}

#[test]
fn map_without_enough_frames_maps_nothing() {
    let mm = boot();
    let kernel = mm.kernel_handle();
    let base = va(0x1000_0000);

    assert_eq!(
        mm.map(kernel, base, 20_000, MemoryFlags::empty()),
        Err(MemoryError::OutOfPhysicalMemory { pages: 20_000 })
    );
    assert!(!mm.present(kernel, base, 1));
    assert_eq!(mm.used_bytes(), 0);
}

#[test]
fn dump_lists_coalesced_regions() {
    let mm = boot();
    let kernel = mm.kernel_handle();

    let mut out = String::new();
    mm.dump_address_space(kernel, DumpScope::All, &mut out).unwrap();
    assert_eq!(
        out,
        "\t00100000 [00100000:00202000] 00202000\n\t00300000 [00300000:00301000] 00301000\n"
    );

    let space = mm.create().unwrap();
    let mut out = String::new();
    mm.dump_address_space(space, DumpScope::UserOnly, &mut out).unwrap();
    assert_eq!(out, "[empty]\n");

    mm.alloc(space, 2 * PAGE, MemoryFlags::USER).unwrap();
    let mut out = String::new();
    mm.dump_address_space(space, DumpScope::UserOnly, &mut out).unwrap();
    let data = (FIRST_FREE_FRAME + 1) * PAGE_SIZE;
    assert_eq!(
        out,
        format!("\t40000000 [{data:08x}:{:08x}] 40001000\n", data + PAGE_SIZE)
    );

    let mut regions = Vec::new();
    mm.for_each_region(space, DumpScope::All, |r| regions.push(r));
    // image with the directory after it, the user page table, module, user pages
    assert_eq!(regions.len(), 4);
    assert_eq!(regions[3].pages, 2);
}

#[test]
fn usage_matches_counters() {
    let mm = boot();
    let kernel = mm.kernel_handle();
    mm.alloc(kernel, PAGE, MemoryFlags::empty()).unwrap();

    let usage = mm.usage();
    assert_eq!(usage.used_bytes, mm.used_bytes());
    assert_eq!(usage.total_bytes, USABLE);
    assert!(usage.to_string().contains("4 KiB"));
}
