//! Hardware paging primitives consumed by the memory core.

use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};

/// The CPU side of paging. Every call is treated as atomic and infallible.
pub trait PagingControl {
    /// Make `directory` the active page directory (CR3).
    fn load_directory(&self, directory: PhysicalPage);

    /// Turn paging on (CR0.PG).
    fn enable_paging(&self);

    /// Drop any cached translation of `page` on this CPU.
    fn invalidate_page(&self, page: VirtualPage);

    /// Zero `len` bytes at `va` through the active translation.
    ///
    /// # Safety
    /// `[va, va + len)` must be mapped writable in the active address space
    /// and exclusively owned by the caller.
    unsafe fn zero_fill(&self, va: VirtualAddress, len: usize);
}

/// [`PagingControl`] on the executing `x86` CPU.
#[cfg(target_arch = "x86")]
pub struct CpuPaging;

#[cfg(target_arch = "x86")]
impl PagingControl for CpuPaging {
    fn load_directory(&self, directory: PhysicalPage) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        unsafe { Cr3::from_directory(directory).store_unsafe() }
    }

    fn enable_paging(&self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        unsafe {
            let cr0 = Cr0::load_unsafe();
            cr0.with_pg_paging(true).store_unsafe();
        }
    }

    fn invalidate_page(&self, page: VirtualPage) {
        let va = page.base().as_u32();
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
        }
    }

    unsafe fn zero_fill(&self, va: VirtualAddress, len: usize) {
        unsafe { core::ptr::write_bytes(va.as_usize() as *mut u8, 0, len) }
    }
}
