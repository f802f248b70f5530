//! MT7927 WFDMA (WiFi DMA) Ring Engine
//!
//! Host-to-device control plane: descriptor rings in DMA-coherent memory,
//! their WFDMA0 ring registers, and the global enable.
//!
//! ## Ring registers
//!
//! Four words per ring at `tx_ring(n)` / `rx_ring(n)`:
//! - BASE: bus address of the descriptor array
//! - CNT: descriptor count
//! - CIDX: host producer index, the doorbell
//! - DIDX: device consumer index
//!
//! ## Bring-up phases
//!
//! The register ordering that works on this chip was found empirically and is
//! enforced by [`WfdmaBuilder`]'s type states:
//!
//! 1. `Reset`: DMA disabled, logic reset pulsed, pointers cleared
//! 2. `RingsConfigured`: BASE/CNT/CIDX/DIDX programmed with enables off
//! 3. `Prefetched`: EXT_CTRL, pointer reset and RX re-arm, then CLK_GAT_DIS
//!    as the last write that precedes the enable
//! 4. [`Wfdma`]: global TX/RX enable, refused over any unconfigured ring
//!
//! Setting CLK_GAT_DIS before the ring writes makes the ring registers
//! read-only. Enabling a direction over a ring whose base is zero sends the
//! engine to address zero.
//!
//! ## Buffer lifetime
//!
//! A TX buffer moves into its ring slot on `submit` and only comes back out
//! through `tx_cleanup` (hardware consumed it) or `reset_all` (hardware
//! pointers cleared). A buffer can therefore never be freed or reused while a
//! live descriptor still points at it.

use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::{Config, PollConfig, Timing};
use crate::device::Mt7927Device;
use crate::dma_buf::{DmaAllocator, DmaBuf};
use crate::dma_defs::{desc_off, DescLayout, Descriptor, DESC_SIZE, RX_PREFETCH, TX_PREFETCH};
use crate::error::{Mt7927Error, Mt7927Result};
use crate::mmio::{dma_wmb, poll_until, Clock, RegisterBus};
use crate::regs::{field_prep, glo_cfg, ring_size, rxq, txq, wfdma};

/// GLO_CFG bits set alongside the enables (mt792x settings)
const GLO_CFG_BASE: u32 = glo_cfg::TX_WB_DDONE
    | glo_cfg::FIFO_LITTLE_ENDIAN
    | glo_cfg::CLK_GAT_DIS
    | glo_cfg::CSR_DISP_BASE_PTR_CHAIN_EN
    | field_prep(glo_cfg::DMA_SIZE, 3)
    | glo_cfg::FIFO_DIS_CHECK
    | glo_cfg::EXT_EN;

/// RX-direction bits, only touched when RX is enabled
const GLO_CFG_RX: u32 = glo_cfg::RX_DMA_EN | glo_cfg::RX_WB_DDONE | glo_cfg::OMIT_RX_INFO_PFET2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Outcome of waiting for a ring to drain.
///
/// The ROM never acknowledges download traffic, so a timeout is information,
/// not failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    TimedOutButContinuing,
    Fatal(Mt7927Error),
}

impl Completion {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Completion::Fatal(_))
    }

    pub fn completed(&self) -> bool {
        matches!(self, Completion::Completed)
    }
}

/// A buffer `submit` could not place, handed back to the caller
pub struct Rejected<M> {
    pub error: Mt7927Error,
    pub buf: M,
}

// ============================================================================
// Ring
// ============================================================================

/// One descriptor ring and the buffers its descriptors point at
pub struct Ring<M: DmaBuf> {
    index: u32,
    dir: Direction,
    layout: DescLayout,
    count: u32,
    desc: M,
    /// Producer index (driver-owned)
    head: u32,
    /// Last consumer index the driver has processed
    tail_shadow: u32,
    slots: Vec<Option<M>>,
    /// RX buffer size; 0 for TX and idle rings
    buf_size: u32,
}

impl<M: DmaBuf> Ring<M> {
    /// Allocate a ring with every descriptor idle (DMA_DONE set).
    pub fn allocate<A>(alloc: &A, dir: Direction, index: u32, count: u32, layout: DescLayout) -> Mt7927Result<Self>
    where
        A: DmaAllocator<Buf = M> + ?Sized,
    {
        // a one-slot TX ring is always full
        if count == 0 || (dir == Direction::Tx && count < 2) {
            log::error!(target: "mt7927::dma", "ring_bad_count dir={:?} ring={} count={}", dir, index, count);
            return Err(Mt7927Error::RingAllocFailed);
        }
        let desc = alloc.alloc(count as usize * DESC_SIZE).ok_or_else(|| {
            log::error!(target: "mt7927::dma", "ring_alloc_failed dir={:?} ring={} count={}", dir, index, count);
            Mt7927Error::RingAllocFailed
        })?;
        // ring base registers are 32-bit and zero is never a valid base
        if desc.paddr() == 0 || desc.paddr() > u32::MAX as u64 {
            log::error!(target: "mt7927::dma", "ring_bad_paddr ring={} paddr=0x{:x}", index, desc.paddr());
            return Err(Mt7927Error::RingAllocFailed);
        }

        let mut slots = Vec::with_capacity(count as usize);
        slots.resize_with(count as usize, || None);

        let ring = Self {
            index,
            dir,
            layout,
            count,
            desc,
            head: 0,
            tail_shadow: 0,
            slots,
            buf_size: 0,
        };
        let idle = Descriptor::idle(layout);
        for i in 0..count {
            ring.write_desc(i, &idle);
        }
        ring.desc.sync_for_device();

        log::debug!(
            target: "mt7927::dma",
            "ring_alloc dir={:?} ring={} count={} paddr=0x{:x}",
            dir, index, count, ring.desc.paddr()
        );
        Ok(ring)
    }

    /// Give every descriptor of an RX ring its own receive buffer.
    pub fn fill_rx<A>(&mut self, alloc: &A, buf_size: usize) -> Mt7927Result<()>
    where
        A: DmaAllocator<Buf = M> + ?Sized,
    {
        debug_assert_eq!(self.dir, Direction::Rx);
        for i in 0..self.count {
            let buf = alloc.alloc(buf_size).ok_or_else(|| {
                log::error!(target: "mt7927::dma", "rx_buf_alloc_failed ring={} slot={}", self.index, i);
                Mt7927Error::DmaAllocFailed
            })?;
            buf.sync_for_device();
            self.write_desc(i, &Descriptor::rx(self.layout, buf.paddr(), buf_size as u32));
            self.slots[i as usize] = Some(buf);
        }
        self.buf_size = buf_size as u32;
        // CIDX = last descriptor handed to hardware
        self.head = self.count - 1;
        self.tail_shadow = 0;
        Ok(())
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn tail(&self) -> u32 {
        self.tail_shadow
    }

    pub fn paddr(&self) -> u64 {
        self.desc.paddr()
    }

    pub fn layout(&self) -> DescLayout {
        self.layout
    }

    #[inline]
    fn next(&self, i: u32) -> u32 {
        (i + 1) % self.count
    }

    pub fn is_full(&self) -> bool {
        self.next(self.head) == self.tail_shadow
    }

    /// Descriptors submitted but not yet reclaimed
    pub fn in_flight(&self) -> u32 {
        (self.head + self.count - self.tail_shadow) % self.count
    }

    /// WFDMA0 register block of this ring
    pub fn regs(&self) -> u32 {
        match self.dir {
            Direction::Tx => wfdma::tx_ring(self.index),
            Direction::Rx => wfdma::rx_ring(self.index),
        }
    }

    /// Store a descriptor; ctrl goes last so DMA_DONE flips after the address
    pub fn write_desc(&self, idx: u32, d: &Descriptor) {
        let off = idx as usize * DESC_SIZE;
        self.desc.write32(off + desc_off::BUF0, d.buf0);
        self.desc.write32(off + desc_off::BUF1, d.buf1);
        self.desc.write32(off + desc_off::INFO, d.info);
        self.desc.write32(off + desc_off::CTRL, d.ctrl);
    }

    pub fn read_desc(&self, idx: u32) -> Descriptor {
        let off = idx as usize * DESC_SIZE;
        self.desc.sync_for_cpu();
        Descriptor {
            buf0: self.desc.read32(off + desc_off::BUF0),
            ctrl: self.desc.read32(off + desc_off::CTRL),
            buf1: self.desc.read32(off + desc_off::BUF1),
            info: self.desc.read32(off + desc_off::INFO),
        }
    }

    /// Drop every in-flight slot back to idle, handing buffers to `f`.
    /// Only valid once hardware has forgotten the ring's pointers.
    fn resync<F: FnMut(M)>(&mut self, f: &mut F) {
        let idle = Descriptor::idle(self.layout);
        let mut i = self.tail_shadow;
        while i != self.head {
            if let Some(buf) = self.slots[i as usize].take() {
                f(buf);
            }
            self.write_desc(i, &idle);
            i = self.next(i);
        }
        self.head = 0;
        self.tail_shadow = 0;
    }
}

/// Program BASE/CNT/CIDX/DIDX; global enables must be off.
fn program_ring<B: RegisterBus, M: DmaBuf>(dev: &Mt7927Device<B>, ring: &Ring<M>) {
    let regs = ring.regs();
    let base = ring.paddr() as u32;

    dev.write(regs + wfdma::RING_BASE, base);
    dev.write(regs + wfdma::RING_CNT, ring.count);
    dev.write(regs + wfdma::RING_CIDX, ring.head);
    dev.write(regs + wfdma::RING_DIDX, 0);
    dma_wmb();

    let readback = dev.read(regs + wfdma::RING_BASE);
    if readback != base {
        log::warn!(
            target: "mt7927::dma",
            "ring_base_dropped dir={:?} ring={} wrote=0x{:08x} read=0x{:08x}",
            ring.dir, ring.index, base, readback
        );
    }
    log::debug!(
        target: "mt7927::dma",
        "ring_config dir={:?} ring={} base=0x{:08x} cnt={} cidx={}",
        ring.dir, ring.index, base, ring.count, ring.head
    );
}

// ============================================================================
// Engine-wide control
// ============================================================================

/// Clear the enables and wait for TX/RX busy to drop. Returns `true` if idle.
pub fn dma_disable<B, C>(dev: &Mt7927Device<B>, clock: &C, poll: PollConfig) -> bool
where
    B: RegisterBus,
    C: Clock + ?Sized,
{
    dev.clear(
        wfdma::GLO_CFG,
        glo_cfg::TX_DMA_EN | glo_cfg::RX_DMA_EN | glo_cfg::CSR_DISP_BASE_PTR_CHAIN_EN,
    );
    let idle = poll_until(clock, "dma_idle", poll, || {
        dev.read(wfdma::GLO_CFG) & glo_cfg::BUSY_MASK == 0
    });
    if !idle {
        log::warn!(target: "mt7927::dma", "dma_idle_timeout glo_cfg=0x{:08x}", dev.read(wfdma::GLO_CFG));
    }
    idle
}

/// WPDMA logic reset and DMA pointer reset.
///
/// The RST bits are left asserted: ring registers only accept writes while
/// the logic is held in reset.
pub fn wpdma_reset<B, C>(dev: &Mt7927Device<B>, clock: &C)
where
    B: RegisterBus,
    C: Clock + ?Sized,
{
    let rst_bits = wfdma::RST_LOGIC_RST | wfdma::RST_DMASHDL_ALL_RST;
    let before = dev.read(wfdma::RST);
    if before & rst_bits == 0 {
        dev.clear(wfdma::RST, rst_bits);
        dev.set(wfdma::RST, rst_bits);
    }
    dev.write(wfdma::RST_DTX_PTR, 0xffff_ffff);
    dev.write(wfdma::RST_DRX_PTR, 0xffff_ffff);
    clock.delay_us(100);
    log::debug!(target: "mt7927::dma", "wpdma_reset rst=0x{:08x}->0x{:08x}", before, dev.read(wfdma::RST));
}

// ============================================================================
// Type-state builder
// ============================================================================

/// DMA disabled and reset; no ring programmed yet
pub struct Reset;
/// At least one ring programmed
pub struct RingsConfigured;
/// Prefetch and clock-gating configured; ready for the global enable
pub struct Prefetched;

/// Phase-ordered WFDMA bring-up. See the module docs for the ordering.
pub struct WfdmaBuilder<M: DmaBuf, S> {
    layout: DescLayout,
    tx: Vec<Ring<M>>,
    rx: Vec<Ring<M>>,
    _state: PhantomData<S>,
}

impl<M: DmaBuf, S> WfdmaBuilder<M, S> {
    fn into_state<T>(self) -> WfdmaBuilder<M, T> {
        WfdmaBuilder {
            layout: self.layout,
            tx: self.tx,
            rx: self.rx,
            _state: PhantomData,
        }
    }

    pub fn layout(&self) -> DescLayout {
        self.layout
    }
}

impl<M: DmaBuf> WfdmaBuilder<M, Reset> {
    /// Disable DMA, pulse the WPDMA logic reset and clear ring pointers.
    pub fn reset<B, C>(dev: &Mt7927Device<B>, clock: &C, timing: &Timing, layout: DescLayout) -> Self
    where
        B: RegisterBus,
        C: Clock + ?Sized,
    {
        dma_disable(dev, clock, timing.dma_idle);
        wpdma_reset(dev, clock);
        log::info!(target: "mt7927::dma", "wfdma reset layout={:?}", layout);
        Self {
            layout,
            tx: Vec::new(),
            rx: Vec::new(),
            _state: PhantomData,
        }
    }

    pub fn configure_ring<B: RegisterBus>(
        self,
        dev: &Mt7927Device<B>,
        ring: Ring<M>,
    ) -> WfdmaBuilder<M, RingsConfigured> {
        self.into_state::<RingsConfigured>().configure_ring(dev, ring)
    }
}

impl<M: DmaBuf> WfdmaBuilder<M, RingsConfigured> {
    /// Program a ring; a ring already configured at the same index is replaced.
    pub fn configure_ring<B: RegisterBus>(mut self, dev: &Mt7927Device<B>, ring: Ring<M>) -> Self {
        program_ring(dev, &ring);
        let rings = match ring.dir {
            Direction::Tx => &mut self.tx,
            Direction::Rx => &mut self.rx,
        };
        rings.retain(|r| r.index != ring.index);
        rings.push(ring);
        self
    }

    /// Prefetch (EXT_CTRL) and clock gating, strictly after the ring writes.
    pub fn prefetch<B: RegisterBus>(self, dev: &Mt7927Device<B>) -> WfdmaBuilder<M, Prefetched> {
        for p in RX_PREFETCH.iter() {
            dev.write(wfdma::rx_ext_ctrl(p.ring), wfdma::prefetch(p.base, p.depth));
        }
        for p in TX_PREFETCH.iter() {
            dev.write(wfdma::tx_ext_ctrl(p.ring), wfdma::prefetch(p.base, p.depth));
        }

        dev.write(wfdma::RST_DTX_PTR, 0xffff_ffff);
        dev.write(wfdma::RST_DRX_PTR, 0xffff_ffff);
        // pointer reset zeroed RX CIDX; hand filled RX rings back
        for r in self.rx.iter().filter(|r| r.head != 0) {
            dev.write(r.regs() + wfdma::RING_CIDX, r.head);
        }
        dev.write(wfdma::PRI_DLY_INT_CFG0, 0);
        dma_wmb();

        // ring registers turn read-only once clock gating is disabled
        dev.set(wfdma::GLO_CFG, glo_cfg::CLK_GAT_DIS);
        dma_wmb();

        log::debug!(target: "mt7927::dma", "prefetch configured tx_rings={} rx_rings={}", self.tx.len(), self.rx.len());
        self.into_state()
    }
}

impl<M: DmaBuf> WfdmaBuilder<M, Prefetched> {
    fn check_covered(&self, rx: bool) -> Mt7927Result<()> {
        let (table, rings) = if rx {
            (&RX_PREFETCH[..], &self.rx)
        } else {
            (&TX_PREFETCH[..], &self.tx)
        };
        for p in table {
            if !rings.iter().any(|r| r.index == p.ring && r.paddr() != 0) {
                log::error!(target: "mt7927::dma", "enable_refused rx={} ring={} unconfigured", rx, p.ring);
                return Err(Mt7927Error::RingNotConfigured { index: p.ring, rx });
            }
        }
        Ok(())
    }

    /// Set the global enables. Every ring the enabled direction covers must
    /// have been configured with a non-zero base.
    pub fn enable<B: RegisterBus>(self, dev: &Mt7927Device<B>, tx: bool, rx: bool) -> Mt7927Result<Wfdma<M>> {
        if tx {
            self.check_covered(false)?;
        }
        if rx {
            self.check_covered(true)?;
        }

        dma_wmb();

        let mut val = GLO_CFG_BASE;
        let mut want = 0;
        if tx {
            val |= glo_cfg::TX_DMA_EN;
            want |= glo_cfg::TX_DMA_EN;
        }
        if rx {
            val |= GLO_CFG_RX;
            want |= glo_cfg::RX_DMA_EN;
        }
        dev.set(wfdma::GLO_CFG, val);
        dma_wmb();

        let after = dev.read(wfdma::GLO_CFG);
        if after & want != want {
            log::warn!(target: "mt7927::dma", "glo_cfg_write_protected want=0x{:08x} read=0x{:08x}", want, after);
        }
        log::info!(target: "mt7927::dma", "wfdma enabled tx={} rx={} glo_cfg=0x{:08x}", tx, rx, after);

        Ok(Wfdma {
            layout: self.layout,
            tx: self.tx,
            rx: self.rx,
            tx_enabled: tx,
            rx_enabled: rx,
        })
    }
}

/// Allocate the bring-up ring set and walk the builder through to enable.
///
/// Every ring the prefetch tables cover gets its own descriptor memory, used
/// or not. RX rings come first; only the MCU event ring and the band 0 data
/// ring get receive buffers.
pub fn init<B, A, C>(dev: &Mt7927Device<B>, alloc: &A, clock: &C, config: &Config) -> Mt7927Result<Wfdma<A::Buf>>
where
    B: RegisterBus,
    A: DmaAllocator + ?Sized,
    C: Clock + ?Sized,
{
    let layout = config.desc_layout;
    let mut rings = Vec::with_capacity(RX_PREFETCH.len() + TX_PREFETCH.len());

    for p in RX_PREFETCH.iter() {
        let (count, filled) = match p.ring {
            rxq::MCU_WM => (config.rx_mcu_ring_size, true),
            rxq::BAND0 => (config.rx_ring_size, true),
            _ => (ring_size::IDLE, false),
        };
        let mut ring = Ring::allocate(alloc, Direction::Rx, p.ring, count, layout)?;
        if filled {
            ring.fill_rx(alloc, config.rx_buf_size)?;
        }
        rings.push(ring);
    }
    for p in TX_PREFETCH.iter() {
        let count = match p.ring {
            txq::BAND0 => config.tx_ring_size,
            txq::FWDL => config.fwdl_ring_size,
            txq::MCU_WM => config.mcu_ring_size,
            _ => ring_size::IDLE,
        };
        rings.push(Ring::allocate(alloc, Direction::Tx, p.ring, count, layout)?);
    }

    let mut rings = rings.into_iter();
    let first = rings.next().ok_or(Mt7927Error::RingAllocFailed)?;
    let mut builder = WfdmaBuilder::reset(dev, clock, &config.timing, layout).configure_ring(dev, first);
    for ring in rings {
        builder = builder.configure_ring(dev, ring);
    }
    builder.prefetch(dev).enable(dev, true, config.enable_rx)
}

// ============================================================================
// Running engine
// ============================================================================

/// WFDMA with its global enables set
pub struct Wfdma<M: DmaBuf> {
    layout: DescLayout,
    tx: Vec<Ring<M>>,
    rx: Vec<Ring<M>>,
    tx_enabled: bool,
    rx_enabled: bool,
}

impl<M: DmaBuf> Wfdma<M> {
    pub fn layout(&self) -> DescLayout {
        self.layout
    }

    pub fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    pub fn rx_enabled(&self) -> bool {
        self.rx_enabled
    }

    pub fn tx_ring(&self, index: u32) -> Option<&Ring<M>> {
        self.tx.iter().find(|r| r.index == index)
    }

    pub fn rx_ring(&self, index: u32) -> Option<&Ring<M>> {
        self.rx.iter().find(|r| r.index == index)
    }

    fn tx_mut(&mut self, index: u32) -> Option<&mut Ring<M>> {
        self.tx.iter_mut().find(|r| r.index == index)
    }

    fn rx_mut(&mut self, index: u32) -> Option<&mut Ring<M>> {
        self.rx.iter_mut().find(|r| r.index == index)
    }

    /// Queue `buf[..len]` on TX ring `index` and ring the doorbell.
    pub fn submit<B: RegisterBus>(
        &mut self,
        dev: &Mt7927Device<B>,
        index: u32,
        buf: M,
        len: u32,
        last: bool,
    ) -> Result<(), Rejected<M>> {
        let ring = match self.tx_mut(index) {
            Some(r) => r,
            None => {
                return Err(Rejected {
                    error: Mt7927Error::RingNotConfigured { index, rx: false },
                    buf,
                })
            }
        };
        if ring.is_full() {
            return Err(Rejected { error: Mt7927Error::RingFull { index }, buf });
        }

        buf.sync_for_device();
        let idx = ring.head;
        ring.write_desc(idx, &Descriptor::tx(ring.layout, buf.paddr(), len, last));
        ring.slots[idx as usize] = Some(buf);

        // descriptor must be visible before the doorbell
        dma_wmb();
        ring.head = ring.next(idx);
        dev.write(ring.regs() + wfdma::RING_CIDX, ring.head);

        log::trace!(target: "mt7927::dma", "submit ring={} idx={} len={} last={}", index, idx, len, last);
        Ok(())
    }

    /// Wait until the hardware consumer index catches up with `head`.
    pub fn poll_completion<B, C>(&self, dev: &Mt7927Device<B>, clock: &C, index: u32, poll: PollConfig) -> Completion
    where
        B: RegisterBus,
        C: Clock + ?Sized,
    {
        let ring = match self.tx_ring(index) {
            Some(r) => r,
            None => return Completion::Fatal(Mt7927Error::RingNotConfigured { index, rx: false }),
        };
        let target = ring.head;
        let didx_reg = ring.regs() + wfdma::RING_DIDX;

        let mut didx = 0;
        let mut dead = false;
        let hit = poll_until(clock, "tx_done", poll, || {
            didx = dev.read(didx_reg);
            dead = didx == 0xffff_ffff;
            dead || didx == target
        });

        if dead {
            log::error!(target: "mt7927::dma", "tx_poll_dead ring={}", index);
            return Completion::Fatal(Mt7927Error::DeviceNotResponding);
        }
        if hit {
            return Completion::Completed;
        }
        log::warn!(
            target: "mt7927::dma",
            "tx_timeout ring={} cidx={} didx={} timeout_us={}",
            index, target, didx, poll.timeout_us
        );
        Completion::TimedOutButContinuing
    }

    /// Reclaim buffers the hardware has consumed. Returns how many.
    pub fn tx_cleanup<B, F>(&mut self, dev: &Mt7927Device<B>, index: u32, mut f: F) -> u32
    where
        B: RegisterBus,
        F: FnMut(M),
    {
        let Some(ring) = self.tx_mut(index) else { return 0 };
        let didx = dev.read(ring.regs() + wfdma::RING_DIDX);
        if didx >= ring.count {
            return 0;
        }

        let idle = Descriptor::idle(ring.layout);
        let mut n = 0;
        while ring.tail_shadow != didx && ring.tail_shadow != ring.head {
            let i = ring.tail_shadow;
            if let Some(buf) = ring.slots[i as usize].take() {
                f(buf);
            }
            ring.write_desc(i, &idle);
            ring.tail_shadow = ring.next(i);
            n += 1;
        }
        n
    }

    /// Clear every TX ring's DMA pointers with one register write and resync
    /// the software indices. In-flight buffers go to `f`.
    pub fn reset_all<B, F>(&mut self, dev: &Mt7927Device<B>, mut f: F)
    where
        B: RegisterBus,
        F: FnMut(M),
    {
        dev.write(wfdma::RST_DTX_PTR, 0xffff_ffff);
        dma_wmb();
        for ring in self.tx.iter_mut() {
            ring.resync(&mut f);
        }
        log::trace!(target: "mt7927::dma", "reset_all");
    }

    /// Drain completed RX descriptors on ring `index`, re-arming each one.
    pub fn rx_poll<B, F>(&mut self, dev: &Mt7927Device<B>, index: u32, budget: u32, mut f: F) -> u32
    where
        B: RegisterBus,
        F: FnMut(u32, &[u8]),
    {
        let Some(ring) = self.rx_mut(index) else { return 0 };
        if ring.buf_size == 0 {
            return 0;
        }

        let mut n = 0;
        while n < budget {
            let i = ring.tail_shadow;
            let d = ring.read_desc(i);
            if !ring.layout.is_done(d.ctrl) {
                break;
            }
            let Some(buf) = ring.slots[i as usize].as_ref() else { break };

            let len = ring.layout.len(d.ctrl).min(ring.buf_size) as usize;
            buf.sync_for_cpu();
            f(index, buf.bytes(len));

            buf.sync_for_device();
            ring.write_desc(i, &Descriptor::rx(ring.layout, buf.paddr(), ring.buf_size));
            ring.head = i;
            ring.tail_shadow = ring.next(i);
            n += 1;
        }

        if n > 0 {
            dma_wmb();
            dev.write(ring.regs() + wfdma::RING_CIDX, ring.head);
            log::trace!(target: "mt7927::dma", "rx_poll ring={} n={} cidx={}", index, n, ring.head);
        }
        n
    }

    /// Stop the engine and wait for it to go idle.
    pub fn disable<B, C>(&mut self, dev: &Mt7927Device<B>, clock: &C, timing: &Timing) -> bool
    where
        B: RegisterBus,
        C: Clock + ?Sized,
    {
        self.tx_enabled = false;
        self.rx_enabled = false;
        dma_disable(dev, clock, timing.dma_idle)
    }

    /// Disable, clear pointers, then release all ring memory.
    pub fn shutdown<B, C>(mut self, dev: &Mt7927Device<B>, clock: &C, timing: &Timing)
    where
        B: RegisterBus,
        C: Clock + ?Sized,
    {
        self.disable(dev, clock, timing);
        self.reset_all(dev, |_| {});
        dev.write(wfdma::RST_DRX_PTR, 0xffff_ffff);
        log::info!(target: "mt7927::dma", "wfdma shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma_defs::Prefetch;
    use crate::regs::{rxq, txq};
    use crate::testutil::{Access, FakeClock, HeapBuf, HeapDma, MockBus};

    const LAYOUT: DescLayout = DescLayout::Mt76;

    fn dev() -> Mt7927Device<MockBus> {
        Mt7927Device::new(MockBus::new()).unwrap()
    }

    fn tx_rings(alloc: &HeapDma) -> Vec<Ring<HeapBuf>> {
        TX_PREFETCH
            .iter()
            .map(|p: &Prefetch| Ring::allocate(alloc, Direction::Tx, p.ring, 8, LAYOUT).unwrap())
            .collect()
    }

    fn rx_rings(alloc: &HeapDma) -> Vec<Ring<HeapBuf>> {
        RX_PREFETCH
            .iter()
            .map(|p| {
                let mut r = Ring::allocate(alloc, Direction::Rx, p.ring, 4, LAYOUT).unwrap();
                if p.ring == rxq::MCU_WM {
                    r.fill_rx(alloc, 256).unwrap();
                }
                r
            })
            .collect()
    }

    fn prefetched(
        dev: &Mt7927Device<MockBus>,
        rings: Vec<Ring<HeapBuf>>,
    ) -> WfdmaBuilder<HeapBuf, Prefetched> {
        let clock = FakeClock::new();
        let mut rings = rings.into_iter();
        let first = rings.next().unwrap();
        let mut b = WfdmaBuilder::reset(dev, &clock, &Timing::default(), LAYOUT).configure_ring(dev, first);
        for r in rings {
            b = b.configure_ring(dev, r);
        }
        b.prefetch(dev)
    }

    fn engine(dev: &Mt7927Device<MockBus>, alloc: &HeapDma, tx: bool, rx: bool) -> Wfdma<HeapBuf> {
        let mut rings = tx_rings(alloc);
        rings.extend(rx_rings(alloc));
        prefetched(dev, rings).enable(dev, tx, rx).unwrap()
    }

    #[test]
    fn test_fresh_ring_all_done() {
        let alloc = HeapDma::new();
        let ring = Ring::allocate(&alloc, Direction::Tx, txq::FWDL, 16, LAYOUT).unwrap();
        for i in 0..ring.count() {
            let d = ring.read_desc(i);
            assert_eq!(d, Descriptor::idle(LAYOUT));
            assert!(LAYOUT.is_done(d.ctrl));
        }
        assert_eq!((ring.head(), ring.tail()), (0, 0));
    }

    #[test]
    fn test_one_slot_tx_ring_rejected() {
        let alloc = HeapDma::new();
        let err = Ring::allocate(&alloc, Direction::Tx, txq::FWDL, 1, LAYOUT).err().unwrap();
        assert_eq!(err, Mt7927Error::RingAllocFailed);
        assert_eq!(alloc.allocations(), 0);

        let ring = Ring::allocate(&alloc, Direction::Tx, txq::FWDL, 2, LAYOUT).unwrap();
        assert!(!ring.is_full());
    }

    #[test]
    fn test_ring_alloc_failure_is_fatal() {
        let alloc = HeapDma::new();
        alloc.fail_after.set(Some(0));
        let err = Ring::allocate(&alloc, Direction::Tx, 0, 8, LAYOUT).err().unwrap();
        assert_eq!(err, Mt7927Error::RingAllocFailed);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_submit_then_poll_completes() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);
        let clock = FakeClock::new();

        let buf = alloc.alloc(64).unwrap();
        assert!(dma.submit(&dev, txq::FWDL, buf, 64, true).is_ok());
        let c = dma.poll_completion(&dev, &clock, txq::FWDL, PollConfig::ms(100, 1));
        assert_eq!(c, Completion::Completed);

        let ring = dma.tx_ring(txq::FWDL).unwrap();
        let didx = dev.bus().peek(wfdma::tx_ring(txq::FWDL) + wfdma::RING_DIDX);
        assert_eq!(ring.head(), didx);
        assert_eq!(ring.head(), 1);

        let d = ring.read_desc(0);
        assert_eq!(LAYOUT.len(d.ctrl), 64);
        assert!(LAYOUT.is_last(d.ctrl));
    }

    #[test]
    fn test_doorbell_after_descriptor() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);
        dev.bus().clear_log();

        let buf = alloc.alloc(32).unwrap();
        let paddr = buf.paddr();
        dma.submit(&dev, txq::MCU_WM, buf, 32, true).ok().unwrap();
        assert_eq!(
            dev.bus().log(),
            std::vec![Access::Write(wfdma::tx_ring(txq::MCU_WM) + wfdma::RING_CIDX, 1)]
        );
        assert_eq!(dma.tx_ring(txq::MCU_WM).unwrap().read_desc(0).buf0, paddr as u32);
    }

    #[test]
    fn test_poll_timeout_continues() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);
        dev.bus().auto_complete.set(false);
        let clock = FakeClock::new();

        dma.submit(&dev, txq::FWDL, alloc.alloc(16).unwrap(), 16, true).ok().unwrap();
        let c = dma.poll_completion(&dev, &clock, txq::FWDL, PollConfig::ms(20, 1));
        assert_eq!(c, Completion::TimedOutButContinuing);
        assert!(!c.is_fatal());
        assert_eq!(clock.elapsed_us(), 20_000);
    }

    #[test]
    fn test_tx_only_enable_leaves_rx_alone() {
        let dev = dev();
        let alloc = HeapDma::new();
        let dma = engine(&dev, &alloc, true, false);

        for v in dev.bus().writes_to(wfdma::GLO_CFG) {
            assert_eq!(v & GLO_CFG_RX, 0, "GLO_CFG write 0x{:08x} touched RX", v);
        }
        let glo = dev.bus().peek(wfdma::GLO_CFG);
        assert_ne!(glo & glo_cfg::TX_DMA_EN, 0);
        assert_eq!(glo & glo_cfg::RX_DMA_EN, 0);
        assert!(dma.tx_enabled() && !dma.rx_enabled());
    }

    #[test]
    fn test_rx_enable_refused_without_rx_rings() {
        let dev = dev();
        let alloc = HeapDma::new();
        let b = prefetched(&dev, tx_rings(&alloc));
        let err = b.enable(&dev, true, true).err().unwrap();
        assert_eq!(err, Mt7927Error::RingNotConfigured { index: rxq::MCU_WM, rx: true });
        assert_eq!(dev.bus().peek(wfdma::GLO_CFG) & glo_cfg::TX_DMA_EN, 0);
    }

    #[test]
    fn test_tx_enable_refused_with_missing_ring() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut rings = tx_rings(&alloc);
        rings.retain(|r| r.index() != 2);
        let err = prefetched(&dev, rings).enable(&dev, true, false).err().unwrap();
        assert_eq!(err, Mt7927Error::RingNotConfigured { index: 2, rx: false });
    }

    #[test]
    fn test_phase_ordering() {
        let dev = dev();
        let alloc = HeapDma::new();
        let _dma = engine(&dev, &alloc, true, true);
        let log = dev.bus().log();

        let pos = |pred: &dyn Fn(&Access) -> bool| log.iter().position(|a| pred(a)).unwrap();
        let last_ring_base = log
            .iter()
            .rposition(|a| matches!(*a, Access::Write(o, _) if o == wfdma::rx_ring(rxq::BAND1)))
            .unwrap();
        let first_ext = pos(&|a| matches!(*a, Access::Write(o, _) if o == wfdma::tx_ext_ctrl(0)));
        let clk_gat = pos(&|a| matches!(*a, Access::Write(o, v) if o == wfdma::GLO_CFG && v & glo_cfg::CLK_GAT_DIS != 0));
        let enable = pos(&|a| matches!(*a, Access::Write(o, v) if o == wfdma::GLO_CFG && v & glo_cfg::TX_DMA_EN != 0));

        assert!(last_ring_base < first_ext);
        assert!(last_ring_base < clk_gat);
        assert!(clk_gat < enable);
        assert_eq!(dev.bus().peek(wfdma::tx_ext_ctrl(txq::FWDL)), 0x0500_0004);

        // nothing touches ring or pointer registers once clock gating is off
        let is_ring_reg = |o: u32| {
            o == wfdma::RST_DTX_PTR
                || o == wfdma::RST_DRX_PTR
                || (wfdma::tx_ring(0)..wfdma::tx_ring(8)).contains(&o)
                || (wfdma::rx_ring(0)..wfdma::rx_ring(4)).contains(&o)
        };
        let late: Vec<Access> = log[clk_gat..]
            .iter()
            .copied()
            .filter(|a| matches!(*a, Access::Write(o, _) if is_ring_reg(o)))
            .collect();
        assert!(late.is_empty(), "ring writes after CLK_GAT_DIS: {:?}", late);
    }

    #[test]
    fn test_rx_ring_rearmed_after_prefetch() {
        let dev = dev();
        let alloc = HeapDma::new();
        let _dma = engine(&dev, &alloc, true, true);
        assert_eq!(dev.bus().peek(wfdma::rx_ring(rxq::MCU_WM) + wfdma::RING_CIDX), 3);
        assert_eq!(dev.bus().peek(wfdma::rx_ring(rxq::BAND1) + wfdma::RING_CIDX), 0);
        assert_ne!(dev.bus().peek(wfdma::rx_ring(rxq::BAND1) + wfdma::RING_BASE), 0);
    }

    #[test]
    fn test_reset_all_returns_in_flight_buffers() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);
        dev.bus().auto_complete.set(false);

        dma.submit(&dev, txq::FWDL, alloc.alloc(16).unwrap(), 16, true).ok().unwrap();
        dma.submit(&dev, txq::FWDL, alloc.alloc(16).unwrap(), 16, true).ok().unwrap();

        let mut back = 0;
        dma.reset_all(&dev, |_| back += 1);
        assert_eq!(back, 2);

        let ring = dma.tx_ring(txq::FWDL).unwrap();
        assert_eq!((ring.head(), ring.tail()), (0, 0));
        assert!(LAYOUT.is_done(ring.read_desc(0).ctrl));
        assert_eq!(dev.bus().peek(wfdma::tx_ring(txq::FWDL) + wfdma::RING_CIDX), 0);
    }

    #[test]
    fn test_tx_cleanup_follows_didx() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);

        for _ in 0..3 {
            dma.submit(&dev, txq::BAND0, alloc.alloc(16).unwrap(), 16, true).ok().unwrap();
        }
        let mut freed = 0;
        assert_eq!(dma.tx_cleanup(&dev, txq::BAND0, |_| freed += 1), 3);
        assert_eq!(freed, 3);
        assert_eq!(dma.tx_ring(txq::BAND0).unwrap().in_flight(), 0);
    }

    #[test]
    fn test_ring_full_hands_buffer_back() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, false);
        dev.bus().auto_complete.set(false);

        for _ in 0..7 {
            dma.submit(&dev, txq::BAND0, alloc.alloc(16).unwrap(), 16, true).ok().unwrap();
        }
        let rejected = dma.submit(&dev, txq::BAND0, alloc.alloc(16).unwrap(), 16, true).err().unwrap();
        assert_eq!(rejected.error, Mt7927Error::RingFull { index: txq::BAND0 });
        assert_eq!(rejected.buf.size(), 16);
    }

    #[test]
    fn test_rx_poll_delivers_and_rearms() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, true);

        // hardware fills slot 0
        {
            let ring = dma.rx_ring(rxq::MCU_WM).unwrap();
            let buf = ring.slots[0].as_ref().unwrap();
            buf.write_bytes(0, &[0xaa; 100]);
            let d = ring.read_desc(0);
            ring.write_desc(0, &Descriptor { ctrl: LAYOUT.ctrl(100, true) | LAYOUT.dma_done(), ..d });
        }

        let mut got = std::vec::Vec::new();
        let n = dma.rx_poll(&dev, rxq::MCU_WM, 16, |q, data| got.push((q, data.len(), data[0])));
        assert_eq!(n, 1);
        assert_eq!(got, std::vec![(rxq::MCU_WM, 100, 0xaa)]);

        let ring = dma.rx_ring(rxq::MCU_WM).unwrap();
        assert!(!LAYOUT.is_done(ring.read_desc(0).ctrl));
        assert_eq!(LAYOUT.len(ring.read_desc(0).ctrl), 256);
        assert_eq!(dev.bus().peek(wfdma::rx_ring(rxq::MCU_WM) + wfdma::RING_CIDX), 0);
        assert_eq!(ring.tail(), 1);
    }

    #[test]
    fn test_init_covers_every_ring() {
        let dev = dev();
        let alloc = HeapDma::new();
        let config = Config {
            tx_ring_size: 8,
            fwdl_ring_size: 8,
            mcu_ring_size: 8,
            rx_mcu_ring_size: 4,
            rx_ring_size: 4,
            rx_buf_size: 256,
            ..Config::default()
        };
        let dma = init(&dev, &alloc, &FakeClock::new(), &config).unwrap();
        assert!(dma.tx_enabled() && dma.rx_enabled());
        for p in TX_PREFETCH.iter() {
            assert_ne!(dev.bus().peek(wfdma::tx_ring(p.ring) + wfdma::RING_BASE), 0);
        }
        for p in RX_PREFETCH.iter() {
            assert_ne!(dev.bus().peek(wfdma::rx_ring(p.ring) + wfdma::RING_BASE), 0);
        }
        assert_eq!(dma.tx_ring(txq::FWDL).unwrap().count(), 8);
        assert_eq!(dma.tx_ring(2).unwrap().count(), ring_size::IDLE);
        // 10 descriptor rings + 4 MCU event buffers + 4 band 0 buffers
        assert_eq!(alloc.allocations(), 18);
    }

    #[test]
    fn test_init_rx_disabled() {
        let dev = dev();
        let alloc = HeapDma::new();
        let config = Config { enable_rx: false, rx_ring_size: 4, rx_mcu_ring_size: 4, ..Config::default() };
        let dma = init(&dev, &alloc, &FakeClock::new(), &config).unwrap();
        assert!(!dma.rx_enabled());
        assert_eq!(dev.bus().peek(wfdma::GLO_CFG) & glo_cfg::RX_DMA_EN, 0);
    }

    #[test]
    fn test_idle_rx_ring_yields_nothing() {
        let dev = dev();
        let alloc = HeapDma::new();
        let mut dma = engine(&dev, &alloc, true, true);
        assert_eq!(dma.rx_poll(&dev, rxq::BAND1, 16, |_, _| panic!("idle ring delivered")), 0);
    }
}
