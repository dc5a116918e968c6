use crate::{IrqGuard, RawSpin};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// Data guarded by one global, non-reentrant critical section.
///
/// Entering disables interrupts on the current CPU and then takes the spin
/// lock; the returned [`CriticalGuard`] releases the lock and restores the
/// interrupt flag when dropped. This excludes both other CPUs and interrupt
/// handlers running on this CPU.
///
/// ```
/// use kernel_sync::CriticalSection;
///
/// let counters = CriticalSection::new((0u64, 0u64));
/// {
///     let mut g = counters.enter();
///     g.0 += 4096;
/// } // lock released, interrupts restored
/// assert_eq!(counters.with(|c| c.0), 4096);
/// ```
pub struct CriticalSection<T> {
    lock: RawSpin,
    data: UnsafeCell<T>,
}

// Safety: all access to `data` is serialized by `lock`.
unsafe impl<T: Send> Sync for CriticalSection<T> {}
unsafe impl<T: Send> Send for CriticalSection<T> {}

impl<T> CriticalSection<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: RawSpin::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Enter the section, spinning until it is free.
    ///
    /// Entering again while a guard is alive on the same CPU deadlocks.
    #[inline]
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        let irq = IrqGuard::new();
        self.lock.lock();
        CriticalGuard {
            section: self,
            _irq: irq,
        }
    }

    /// Enter the section only if it is free right now.
    #[inline]
    pub fn try_enter(&self) -> Option<CriticalGuard<'_, T>> {
        let irq = IrqGuard::new();
        if self.lock.try_lock() {
            Some(CriticalGuard {
                section: self,
                _irq: irq,
            })
        } else {
            None
        }
    }

    /// Run `f` inside the section.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.enter();
        f(&mut g)
    }

    /// `true` while some guard is alive.
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock.is_locked()
    }

    /// Direct access when `&mut self` proves there are no other users.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Scoped ownership of a [`CriticalSection`].
///
/// Field order matters: the lock is released in `Drop::drop`, then the
/// interrupt guard field is dropped, restoring `EFLAGS.IF` last.
pub struct CriticalGuard<'a, T> {
    section: &'a CriticalSection<T>,
    _irq: IrqGuard,
}

impl<T> Deref for CriticalGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.section.data.get() }
    }
}

impl<T> DerefMut for CriticalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.section.data.get() }
    }
}

impl<T> Drop for CriticalGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.section.lock.unlock() }
    }
}
