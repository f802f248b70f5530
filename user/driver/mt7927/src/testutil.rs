//! Test doubles: a register model of the MT7927 BAR, heap-backed DMA memory
//! and a clock that only counts.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::vec::Vec;

use crate::dma_buf::{DmaAllocator, DmaBuf};
use crate::mmio::{Clock, RegisterBus};
use crate::regs::{conn_on, wfdma, wfsys};

/// BAR0 offsets of registers that have behaviour in the model
const LPCTL: u32 = 0xe0010;
const WFSYS_RST_B: u32 = 0xf0140;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(u32),
    Write(u32, u32),
}

/// Register model of the parts of BAR0 the bring-up path touches.
///
/// - LPCTL: SET_OWN raises OWN_SYNC, CLR_OWN drops it
/// - WFSYS_SW_RST_B: setting EN raises INIT_DONE
/// - TX CIDX write: DIDX follows immediately (when `auto_complete`)
/// - RST_DTX_PTR / RST_DRX_PTR: zero the selected rings' indices
/// - HOST_INT_STA: write-1-to-clear
pub struct MockBus {
    regs: RefCell<BTreeMap<u32, u32>>,
    log: RefCell<Vec<Access>>,
    size: u32,
    pub auto_complete: Cell<bool>,
    pub fw_ignores_set_own: Cell<bool>,
    pub fw_ignores_clr_own: Cell<bool>,
    pub reset_stuck: Cell<bool>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::with_size(0x20_0000)
    }

    pub fn with_size(size: u32) -> Self {
        Self {
            regs: RefCell::new(BTreeMap::new()),
            log: RefCell::new(Vec::new()),
            size,
            auto_complete: Cell::new(true),
            fw_ignores_set_own: Cell::new(false),
            fw_ignores_clr_own: Cell::new(false),
            reset_stuck: Cell::new(false),
        }
    }

    /// Set a register without logging or side effects
    pub fn poke(&self, offset: u32, value: u32) {
        self.regs.borrow_mut().insert(offset, value);
    }

    pub fn peek(&self, offset: u32) -> u32 {
        self.regs.borrow().get(&offset).copied().unwrap_or(0)
    }

    pub fn log(&self) -> Vec<Access> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn touched(&self, offset: u32) -> bool {
        self.log.borrow().iter().any(|a| match *a {
            Access::Read(o) | Access::Write(o, _) => o == offset,
        })
    }

    pub fn wrote(&self, offset: u32, value: u32) -> bool {
        self.log.borrow().iter().any(|a| *a == Access::Write(offset, value))
    }

    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.log
            .borrow()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(o, v) if o == offset => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Offsets written, in order, restricted to `offsets`
    pub fn write_order(&self, offsets: &[u32]) -> Vec<u32> {
        self.log
            .borrow()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(o, _) if offsets.contains(&o) => Some(o),
                _ => None,
            })
            .collect()
    }

    fn reset_indices(&self, ring: fn(u32) -> u32, mask: u32, count: u32) {
        let mut regs = self.regs.borrow_mut();
        for n in 0..count {
            if mask & (1 << n) != 0 {
                regs.insert(ring(n) + wfdma::RING_CIDX, 0);
                regs.insert(ring(n) + wfdma::RING_DIDX, 0);
            }
        }
    }
}

impl RegisterBus for MockBus {
    fn read32(&self, offset: u32) -> u32 {
        self.log.borrow_mut().push(Access::Read(offset));
        self.peek(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        self.log.borrow_mut().push(Access::Write(offset, value));

        match offset {
            LPCTL => {
                let mut v = self.peek(LPCTL);
                if value & conn_on::LPCTL_HOST_SET_OWN != 0 && !self.fw_ignores_set_own.get() {
                    v |= conn_on::LPCTL_HOST_OWN_SYNC;
                }
                if value & conn_on::LPCTL_HOST_CLR_OWN != 0 && !self.fw_ignores_clr_own.get() {
                    v &= !conn_on::LPCTL_HOST_OWN_SYNC;
                }
                self.poke(LPCTL, v);
            }
            WFSYS_RST_B => {
                let mut v = value & !wfsys::SW_INIT_DONE;
                if value & wfsys::SW_RST_B_EN != 0 && !self.reset_stuck.get() {
                    v |= wfsys::SW_INIT_DONE;
                }
                self.poke(WFSYS_RST_B, v);
            }
            wfdma::RST_DTX_PTR => self.reset_indices(wfdma::tx_ring, value, 8),
            wfdma::RST_DRX_PTR => self.reset_indices(wfdma::rx_ring, value, 4),
            wfdma::HOST_INT_STA => {
                let v = self.peek(offset) & !value;
                self.poke(offset, v);
            }
            o if (wfdma::tx_ring(0)..wfdma::tx_ring(8)).contains(&o)
                && (o - wfdma::tx_ring(0)) % wfdma::RING_STRIDE == wfdma::RING_CIDX =>
            {
                self.poke(o, value);
                if self.auto_complete.get() {
                    self.poke(o - wfdma::RING_CIDX + wfdma::RING_DIDX, value);
                }
            }
            _ => self.poke(offset, value),
        }
    }

    fn size(&self) -> u32 {
        self.size
    }
}

/// Clock that advances only when asked to wait
pub struct FakeClock {
    elapsed_us: Cell<u64>,
    yields: Cell<u32>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { elapsed_us: Cell::new(0), yields: Cell::new(0) }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us.get()
    }

    pub fn yields(&self) -> u32 {
        self.yields.get()
    }
}

impl Clock for FakeClock {
    fn delay_us(&self, us: u32) {
        self.elapsed_us.set(self.elapsed_us.get() + us as u64);
    }

    fn yield_now(&self) {
        self.yields.set(self.yields.get() + 1);
    }
}

/// Heap memory pretending to be DMA-coherent
pub struct HeapBuf {
    ptr: *mut u64,
    words: usize,
    size: usize,
    paddr: u64,
}

impl DmaBuf for HeapBuf {
    fn vaddr(&self) -> u64 {
        self.ptr as u64
    }

    fn paddr(&self) -> u64 {
        self.paddr
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for HeapBuf {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.ptr, self.words);
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Allocator handing out [`HeapBuf`]s with fake, page-aligned bus addresses
pub struct HeapDma {
    next_paddr: Cell<u64>,
    allocs: Cell<usize>,
    /// Fail every allocation once this many have succeeded
    pub fail_after: Cell<Option<usize>>,
}

impl HeapDma {
    pub fn new() -> Self {
        Self {
            next_paddr: Cell::new(0x8000_0000),
            allocs: Cell::new(0),
            fail_after: Cell::new(None),
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocs.get()
    }
}

impl DmaAllocator for HeapDma {
    type Buf = HeapBuf;

    fn alloc(&self, size: usize) -> Option<HeapBuf> {
        if let Some(limit) = self.fail_after.get() {
            if self.allocs.get() >= limit {
                return None;
            }
        }
        let words = (size + 7) / 8;
        let mem: Box<[u64]> = std::vec![0u64; words.max(1)].into_boxed_slice();
        let words = mem.len();
        let ptr = Box::into_raw(mem) as *mut u64;

        let paddr = self.next_paddr.get();
        let span = ((size as u64) + 0xfff) & !0xfff;
        self.next_paddr.set(paddr + span.max(0x1000));
        self.allocs.set(self.allocs.get() + 1);

        Some(HeapBuf { ptr, words, size, paddr })
    }
}

/// Patch blob: 96-byte big-endian header, one 64-byte section, then `len`
/// bytes of payload counting up from 0.
pub fn patch_image(addr: u32, len: usize) -> Vec<u8> {
    let mut b = std::vec![0u8; 96 + 64];
    b[..16].copy_from_slice(b"20260101120000a\0");
    b[16..20].copy_from_slice(b"ALPS");
    b[20..24].copy_from_slice(&0x8a00_8a00u32.to_be_bytes());
    b[24..28].copy_from_slice(&0x0000_0001u32.to_be_bytes());
    b[44..48].copy_from_slice(&1u32.to_be_bytes());

    let sec = 96;
    b[sec..sec + 4].copy_from_slice(&0x0003_0002u32.to_be_bytes());
    b[sec + 4..sec + 8].copy_from_slice(&160u32.to_be_bytes());
    b[sec + 8..sec + 12].copy_from_slice(&(len as u32).to_be_bytes());
    b[sec + 12..sec + 16].copy_from_slice(&addr.to_be_bytes());
    b[sec + 16..sec + 20].copy_from_slice(&(len as u32).to_be_bytes());
    b.extend((0..len).map(|i| i as u8));
    b
}

/// RAM blob: section bytes packed from 0, 72-byte regions, 36-byte trailer.
/// Section `n` is filled with byte `n + 1`.
pub fn ram_image(sections: &[(u32, usize)]) -> Vec<u8> {
    let mut b = Vec::new();
    for (n, &(_, len)) in sections.iter().enumerate() {
        b.extend(core::iter::repeat(n as u8 + 1).take(len));
    }
    for &(addr, len) in sections {
        let mut r = [0u8; 72];
        r[16..20].copy_from_slice(&addr.to_le_bytes());
        r[20..24].copy_from_slice(&(len as u32).to_le_bytes());
        r[40..44].copy_from_slice(b"sec\0");
        b.extend_from_slice(&r);
    }
    let mut t = [0u8; 36];
    t[0] = 0x27;
    t[2] = sections.len() as u8;
    t[7..17].copy_from_slice(b"____000000");
    t[17..32].copy_from_slice(b"20260101120000\0");
    b.extend_from_slice(&t);
    b
}
