//! MT7927 Device Access
//!
//! Register Address Translator. Every register access in the crate goes
//! through [`Mt7927Device`], which turns a logical chip address into a BAR0
//! offset.
//!
//! ## Translation order
//!
//! 1. `addr < 0x200000`: direct BAR0 offset
//! 2. Fixed Map hit: `mapped_offset + (addr - logical_base)`
//! 3. CONN_INFRA / CBTOP / WFSYS ranges: L1 remap (64 KiB aperture at 0x130000)
//! 4. anything else: L2 remap (L1 pointed at 0x18500000, L2 holds the address)
//!
//! ## Remap windows
//!
//! The remap control registers are shared device state. A remapped access
//! takes a [`RemapGuard`] which saves the control registers, reprograms them,
//! reads them back (the write must land before the aperture is touched) and
//! restores them on drop. The guard is not reentrant: a second remap while
//! one is held fails with [`Mt7927Error::RemapBusy`].

use spin::{Mutex, MutexGuard};

use crate::error::{Mt7927Error, Mt7927Result};
use crate::mmio::RegisterBus;
use crate::regs::{field_prep, hw, remap, FIXED_MAP};

/// Where a logical address lands in BAR0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Plain BAR0 offset
    Direct(u32),
    /// Fixed Map window
    Fixed(u32),
    /// Through the L1 aperture
    L1 { base: u32, offset: u32 },
    /// Through the L2 aperture
    L2 { addr: u32 },
}

impl Route {
    /// True if the access needs a remap window
    pub fn is_remapped(&self) -> bool {
        matches!(self, Route::L1 { .. } | Route::L2 { .. })
    }
}

/// Pure translation; never touches hardware.
pub fn translate(addr: u32) -> Route {
    if addr < remap::DIRECT_LIMIT {
        return Route::Direct(addr);
    }

    if let Some(ofs) = FIXED_MAP.iter().find_map(|w| w.map(addr)) {
        return Route::Fixed(ofs);
    }

    let in_l1 = remap::L1_RANGES
        .iter()
        .any(|&(start, end)| addr >= start && addr < end);
    if in_l1 {
        Route::L1 {
            base: addr >> 16,
            offset: addr & remap::L1_OFFSET,
        }
    } else {
        Route::L2 { addr }
    }
}

/// Scoped ownership of the remap control registers.
///
/// Restores L2 (if it was touched) and L1 to their pre-acquire values on drop.
pub struct RemapGuard<'a, B: RegisterBus> {
    bus: &'a B,
    _lock: MutexGuard<'a, ()>,
    saved_l1: u32,
    saved_l2: Option<u32>,
    /// BAR0 offset of the remapped target
    window: u32,
}

impl<'a, B: RegisterBus> RemapGuard<'a, B> {
    #[inline]
    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn read32(&self) -> u32 {
        self.bus.read32(self.window)
    }

    pub fn write32(&self, value: u32) {
        self.bus.write32(self.window, value);
    }
}

impl<'a, B: RegisterBus> Drop for RemapGuard<'a, B> {
    fn drop(&mut self) {
        if let Some(l2) = self.saved_l2 {
            self.bus.write32(remap::HIF_REMAP_L2, l2);
        }
        self.bus.write32(remap::HIF_REMAP_L1, self.saved_l1);
        let _ = self.bus.read32(remap::HIF_REMAP_L1);
    }
}

/// MT7927 device handle
pub struct Mt7927Device<B: RegisterBus> {
    bus: B,
    remap: Mutex<()>,
}

impl<B: RegisterBus> Mt7927Device<B> {
    /// Wrap BAR0. The BAR must be large enough to hold the remap control
    /// register; anything smaller is not this chip.
    pub fn new(bus: B) -> Mt7927Result<Self> {
        if bus.size() < remap::HIF_REMAP_L1 + 4 {
            log::error!(target: "mt7927::remap", "bar_too_small size=0x{:x}", bus.size());
            return Err(Mt7927Error::BarTooSmall);
        }
        Ok(Self { bus, remap: Mutex::new(()) })
    }

    /// Raw BAR0 handle
    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn lock_remap(&self) -> Mt7927Result<MutexGuard<'_, ()>> {
        self.remap.try_lock().ok_or_else(|| {
            log::error!(target: "mt7927::remap", "remap_busy");
            Mt7927Error::RemapBusy
        })
    }

    /// Point the L1 aperture at 64 KiB page `base`; `offset` selects the word.
    pub(crate) fn remap_l1(&self, base: u32, offset: u32) -> Mt7927Result<RemapGuard<'_, B>> {
        let lock = self.lock_remap()?;
        let saved_l1 = self.bus.read32(remap::HIF_REMAP_L1);
        let target = (saved_l1 & !remap::L1_MASK) | field_prep(remap::L1_MASK, base);
        self.bus.write32(remap::HIF_REMAP_L1, target);
        // readback orders the control write before the aperture access
        let _ = self.bus.read32(remap::HIF_REMAP_L1);

        Ok(RemapGuard {
            bus: &self.bus,
            _lock: lock,
            saved_l1,
            saved_l2: None,
            window: remap::HIF_REMAP_BASE_L1 + (offset & remap::L1_OFFSET),
        })
    }

    /// Point L1 at the L2 block and L2 at `addr`.
    pub(crate) fn remap_l2(&self, addr: u32) -> Mt7927Result<RemapGuard<'_, B>> {
        let lock = self.lock_remap()?;
        let saved_l1 = self.bus.read32(remap::HIF_REMAP_L1);
        let saved_l2 = self.bus.read32(remap::HIF_REMAP_L2);

        let l1 = (saved_l1 & !remap::L1_MASK)
            | field_prep(remap::L1_MASK, remap::HIF_REMAP_BASE_L2 >> 16);
        self.bus.write32(remap::HIF_REMAP_L1, l1);
        self.bus.write32(remap::HIF_REMAP_L2, addr);
        let _ = self.bus.read32(remap::HIF_REMAP_L1);
        let _ = self.bus.read32(remap::HIF_REMAP_L2);

        Ok(RemapGuard {
            bus: &self.bus,
            _lock: lock,
            saved_l1,
            saved_l2: Some(saved_l2),
            window: remap::HIF_REMAP_BASE_L1,
        })
    }

    /// Read a logical address.
    pub fn try_read(&self, addr: u32) -> Mt7927Result<u32> {
        match translate(addr) {
            Route::Direct(ofs) | Route::Fixed(ofs) => Ok(self.bus.read32(ofs)),
            Route::L1 { base, offset } => Ok(self.remap_l1(base, offset)?.read32()),
            Route::L2 { addr } => Ok(self.remap_l2(addr)?.read32()),
        }
    }

    /// Write a logical address.
    pub fn try_write(&self, addr: u32, value: u32) -> Mt7927Result<()> {
        match translate(addr) {
            Route::Direct(ofs) | Route::Fixed(ofs) => self.bus.write32(ofs, value),
            Route::L1 { base, offset } => self.remap_l1(base, offset)?.write32(value),
            Route::L2 { addr } => self.remap_l2(addr)?.write32(value),
        }
        Ok(())
    }

    /// Read, reporting a busy remap window as all-ones
    pub fn read(&self, addr: u32) -> u32 {
        self.try_read(addr).unwrap_or_else(|e| {
            log::warn!(target: "mt7927::remap", "read_failed addr=0x{:08x} err={}", addr, e);
            0xffff_ffff
        })
    }

    pub fn write(&self, addr: u32, value: u32) {
        if let Err(e) = self.try_write(addr, value) {
            log::warn!(target: "mt7927::remap", "write_dropped addr=0x{:08x} err={}", addr, e);
        }
    }

    /// Read-modify-write: clear `mask`, then set `value`
    pub fn rmw(&self, addr: u32, mask: u32, value: u32) -> u32 {
        let new = (self.read(addr) & !mask) | value;
        self.write(addr, new);
        new
    }

    pub fn set(&self, addr: u32, bits: u32) -> u32 {
        self.rmw(addr, 0, bits)
    }

    pub fn clear(&self, addr: u32, bits: u32) -> u32 {
        self.rmw(addr, bits, 0)
    }

    /// Read that treats all-ones as a dead device
    pub fn read_alive(&self, addr: u32) -> Mt7927Result<u32> {
        let val = self.try_read(addr)?;
        if val == 0xffff_ffff {
            log::error!(target: "mt7927::remap", "device_dead addr=0x{:08x}", addr);
            return Err(Mt7927Error::DeviceNotResponding);
        }
        Ok(val)
    }

    pub fn chip_id(&self) -> Mt7927Result<u32> {
        self.read_alive(hw::CHIPID)
    }

    pub fn hw_rev(&self) -> u32 {
        self.read(hw::REV) & 0xff
    }
}
