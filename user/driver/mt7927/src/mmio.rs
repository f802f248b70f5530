//! Host primitives: BAR access, delays, bounded polling and barriers
//!
//! The PCI layer (device enable, BAR mapping, IRQ vectors) lives outside this
//! crate. It hands us something that implements [`RegisterBus`] over BAR0 and
//! a [`Clock`] to sleep on.

use crate::config::PollConfig;

/// 32-bit register access at a BAR0 byte offset
pub trait RegisterBus {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
    /// Mapped size in bytes
    fn size(&self) -> u32;
}

/// Delay source for busy-polls
pub trait Clock {
    fn delay_us(&self, us: u32);

    fn delay_ms(&self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }

    /// Give up the CPU between firmware chunks
    fn yield_now(&self) {}
}

/// MMIO region handle over a mapped BAR
///
/// Reads outside the mapping return all-ones (what a dead PCIe link returns
/// too); writes outside it are dropped.
pub struct MmioRegion {
    base: *mut u8,
    size: u32,
}

// The region is only touched through volatile accesses by its single owner.
unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// Wrap an already-mapped BAR.
    ///
    /// # Safety
    /// `base` must point to `size` bytes of device memory that stay mapped for
    /// the lifetime of the region.
    pub unsafe fn new(base: *mut u8, size: u32) -> Self {
        Self { base, size }
    }

    #[inline]
    fn in_range(&self, offset: u32) -> bool {
        offset % 4 == 0 && offset.checked_add(4).map_or(false, |end| end <= self.size)
    }
}

impl RegisterBus for MmioRegion {
    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        if !self.in_range(offset) {
            log::trace!(target: "mt7927::remap", "read_oob offset=0x{:x}", offset);
            return 0xffff_ffff;
        }
        unsafe { core::ptr::read_volatile(self.base.add(offset as usize) as *const u32) }
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        if !self.in_range(offset) {
            log::warn!(target: "mt7927::remap", "write_oob offset=0x{:x} value=0x{:08x}", offset, value);
            return;
        }
        unsafe { core::ptr::write_volatile(self.base.add(offset as usize) as *mut u32, value) }
    }

    #[inline]
    fn size(&self) -> u32 {
        self.size
    }
}

/// Poll `condition` every `poll.interval_us` until it holds or the budget runs
/// out. Returns `true` if the condition was met.
pub fn poll_until<C, F>(clock: &C, label: &str, poll: PollConfig, mut condition: F) -> bool
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    for _ in 0..poll.iterations() {
        if condition() {
            return true;
        }
        clock.delay_us(poll.interval_us);
    }
    log::debug!(target: "mt7927::init", "poll_timeout label={} timeout_us={}", label, poll.timeout_us);
    false
}

/// Write memory barrier: descriptor stores land before the doorbell
#[inline(always)]
pub fn dma_wmb() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dsb st", options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}
