//! Interrupt flag control.
//!
//! On bare-metal `x86` the functions here execute `cli`/`sti` and read
//! `EFLAGS` through `pushfd; pop`. On hosted targets (unit tests, tooling)
//! there are no interrupts to mask and every function is a no-op that
//! reports interrupts as disabled.

/// `EFLAGS.IF`, the interrupt enable flag (bit 9).
pub const EFLAGS_IF: u32 = 1 << 9;

/// Disables hardware interrupts (`cli`).
///
/// # Safety & Privilege
///
/// Must only be called where `cli` is permitted (CPL0).
#[inline]
pub fn cli_stop_interrupts() {
    #[cfg(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Enables hardware interrupts (`sti`).
///
/// # Safety & Privilege
///
/// Must only be called where `sti` is permitted (CPL0). Typically used to
/// restore a previously saved interrupt state.
#[inline]
pub fn sti_enable_interrupts() {
    #[cfg(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Returns the low 32 bits of the flags register.
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    #[cfg(all(target_os = "none", target_arch = "x86"))]
    {
        let r: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags)) }
        r
    }
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags)) }
        #[allow(clippy::cast_possible_truncation)]
        let low = r as u32;
        low
    }
    #[cfg(not(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
    {
        0
    }
}

/// `true` if `EFLAGS.IF` is set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & EFLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots `EFLAGS.IF`. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were enabled
/// before, so guards nest correctly.
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether this guard will re-enable interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}
