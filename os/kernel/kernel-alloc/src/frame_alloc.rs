//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame; a set bit means the frame is unavailable, either
//! allocated or reserved. The bitmap is the only record of frame ownership.
//! Two byte counters move in lockstep with [`BitmapFrameAlloc::alloc`] and
//! [`BitmapFrameAlloc::free`]; the raw [`set_used`](BitmapFrameAlloc::set_used)
//! and [`set_free`](BitmapFrameAlloc::set_free) calls bypass them.

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};

const BITS: u32 = u64::BITS;

/// Physical allocator failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    /// No run of `pages` consecutive free frames exists.
    #[error("no run of {pages} free frame(s)")]
    OutOfMemory { pages: u32 },
    /// A request for zero frames.
    #[error("empty frame request")]
    EmptyRequest,
}

/// First-fit bitmap allocator over frames `0..frame_count`.
pub struct BitmapFrameAlloc<'b> {
    bitmap: &'b mut [u64],
    frame_count: u32,
    used_bytes: u64,
    total_bytes: u64,
}

impl<'b> BitmapFrameAlloc<'b> {
    /// Track `frame_count` frames in `bitmap`, all of them free.
    ///
    /// # Panics
    /// If `bitmap` has fewer than `frame_count` bits.
    pub fn new(bitmap: &'b mut [u64], frame_count: u32) -> Self {
        assert!(
            bitmap.len() as u64 * u64::from(BITS) >= u64::from(frame_count),
            "bitmap of {} word(s) cannot track {frame_count} frames",
            bitmap.len()
        );
        let mut this = Self {
            bitmap,
            frame_count,
            used_bytes: 0,
            total_bytes: 0,
        };
        this.set_free(PhysicalAddress::zero(), frame_count);
        this
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[inline]
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    #[inline]
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Fix the total once, from the firmware's usable-memory figure.
    #[inline]
    pub const fn set_total_bytes(&mut self, total: u64) {
        self.total_bytes = total;
    }

    /// Forget all counted allocations (boot only).
    #[inline]
    pub const fn reset_used_bytes(&mut self) {
        self.used_bytes = 0;
    }

    /// Mark every frame unavailable.
    pub fn mark_all_used(&mut self) {
        self.bitmap.fill(u64::MAX);
    }

    #[inline]
    fn bit(&self, frame: u32) -> bool {
        self.bitmap[(frame / BITS) as usize] & (1 << (frame % BITS)) != 0
    }

    #[inline]
    fn set_bit(&mut self, frame: u32, used: bool) {
        let word = &mut self.bitmap[(frame / BITS) as usize];
        if used {
            *word |= 1 << (frame % BITS);
        } else {
            *word &= !(1 << (frame % BITS));
        }
    }

    /// Frames `[first, first + count)` clipped to the tracked range.
    fn span(&self, addr: PhysicalAddress, count: u32) -> core::ops::Range<u32> {
        let first = addr.page().frame_number().min(self.frame_count);
        first..first.saturating_add(count).min(self.frame_count)
    }

    /// `true` iff every frame of the range is unavailable. Frames beyond
    /// the tracked range count as unavailable.
    #[must_use]
    pub fn is_used(&self, addr: PhysicalAddress, count: u32) -> bool {
        let first = addr.page().frame_number();
        (0..count).all(|i| {
            first
                .checked_add(i)
                .filter(|&f| f < self.frame_count)
                .is_none_or(|f| self.bit(f))
        })
    }

    /// Reserve frames without touching the counters.
    pub fn set_used(&mut self, addr: PhysicalAddress, count: u32) {
        for f in self.span(addr, count) {
            self.set_bit(f, true);
        }
    }

    /// Release frames without touching the counters.
    pub fn set_free(&mut self, addr: PhysicalAddress, count: u32) {
        for f in self.span(addr, count) {
            self.set_bit(f, false);
        }
    }

    /// Reserve frames and count them as allocated.
    ///
    /// # Panics
    /// If any frame of the range is already unavailable.
    pub fn claim(&mut self, page: PhysicalPage, count: u32) {
        assert!(
            !(0..count).any(|i| self.is_used(page.base() + i * PAGE_SIZE, 1)),
            "claiming {count} frame(s) at {page}: already in use"
        );
        self.set_used(page.base(), count);
        self.used_bytes += bytes(count);
    }

    /// Number of free frames.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        let full_words = (self.frame_count / BITS) as usize;
        let mut used: u32 = self.bitmap[..full_words].iter().map(|w| w.count_ones()).sum();
        let tail = self.frame_count % BITS;
        if tail != 0 {
            used += (self.bitmap[full_words] & ((1 << tail) - 1)).count_ones();
        }
        self.frame_count - used
    }

    /// First-fit: find the lowest run of `count` free frames, mark it used
    /// and count it.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no such run exists; nothing is
    /// modified in that case.
    pub fn alloc(&mut self, count: u32) -> Result<PhysicalPage, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::EmptyRequest);
        }

        let Some(first) = self.find_run(count) else {
            log::error!("physical allocator: no run of {count} free frame(s)");
            return Err(FrameAllocError::OutOfMemory { pages: count });
        };

        for f in first..first + count {
            self.set_bit(f, true);
        }
        self.used_bytes += bytes(count);
        Ok(PhysicalPage::from_frame_number(first))
    }

    fn find_run(&self, count: u32) -> Option<u32> {
        let mut run_start = 0;
        let mut run_len = 0;
        let mut frame = 0;

        while frame < self.frame_count {
            if frame % BITS == 0 && frame + BITS <= self.frame_count {
                match self.bitmap[(frame / BITS) as usize] {
                    u64::MAX => {
                        run_len = 0;
                        frame += BITS;
                        continue;
                    }
                    0 => {
                        if run_len == 0 {
                            run_start = frame;
                        }
                        run_len += BITS;
                        frame += BITS;
                        if run_len >= count {
                            return Some(run_start);
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            if self.bit(frame) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = frame;
                }
                run_len += 1;
                if run_len >= count {
                    return Some(run_start);
                }
            }
            frame += 1;
        }
        None
    }

    /// Return `count` frames from `page` and uncount them.
    ///
    /// # Panics
    /// If any frame of the range is not in use (double free).
    pub fn free(&mut self, page: PhysicalPage, count: u32) {
        assert!(
            self.is_used(page.base(), count),
            "freeing {count} frame(s) at {page}: not all in use"
        );
        self.set_free(page.base(), count);
        self.used_bytes = self.used_bytes.saturating_sub(bytes(count));
    }
}

const fn bytes(pages: u32) -> u64 {
    pages as u64 * PAGE_SIZE as u64
}
