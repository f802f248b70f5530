//! DMA Descriptor Definitions
//!
//! 16-byte WFDMA descriptor and the control-word layouts seen on this chip.
//!
//! ## Control word
//!
//! Two incompatible layouts exist in the field for the same word. Which one a
//! given silicon revision expects is not settled, so the layout is carried as
//! an explicit [`DescLayout`] parameter of every ring instead of a constant.

use crate::regs::{bit, genmask, rxq, txq};

/// Size of one descriptor in bytes
pub const DESC_SIZE: usize = 16;

/// Byte offsets of descriptor fields
pub mod desc_off {
    pub const BUF0: usize = 0x0;
    pub const CTRL: usize = 0x4;
    pub const BUF1: usize = 0x8;
    pub const INFO: usize = 0xc;
}

/// Control word layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescLayout {
    /// mt76 connac: SD_LEN0 29:16, LAST_SEC0 30, DMA_DONE 31
    #[default]
    Mt76,
    /// Low-half variant: SD_LEN 13:0, LAST_SEC 14, DMA_DONE 31
    LowHalf,
}

impl DescLayout {
    #[inline]
    pub const fn len_mask(self) -> u32 {
        match self {
            DescLayout::Mt76 => genmask(29, 16),
            DescLayout::LowHalf => genmask(13, 0),
        }
    }

    #[inline]
    pub const fn last_sec(self) -> u32 {
        match self {
            DescLayout::Mt76 => bit(30),
            DescLayout::LowHalf => bit(14),
        }
    }

    #[inline]
    pub const fn dma_done(self) -> u32 {
        bit(31)
    }

    /// Largest length the layout can express
    #[inline]
    pub const fn max_len(self) -> u32 {
        self.len_mask() >> self.len_mask().trailing_zeros()
    }

    pub const fn ctrl(self, len: u32, last: bool) -> u32 {
        let shift = self.len_mask().trailing_zeros();
        let mut ctrl = (len << shift) & self.len_mask();
        if last {
            ctrl |= self.last_sec();
        }
        ctrl
    }

    #[inline]
    pub const fn len(self, ctrl: u32) -> u32 {
        (ctrl & self.len_mask()) >> self.len_mask().trailing_zeros()
    }

    #[inline]
    pub const fn is_done(self, ctrl: u32) -> bool {
        ctrl & self.dma_done() != 0
    }

    #[inline]
    pub const fn is_last(self, ctrl: u32) -> bool {
        ctrl & self.last_sec() != 0
    }
}

/// WFDMA descriptor (16 bytes)
#[repr(C, align(4))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Buffer 0 address (low 32 bits)
    pub buf0: u32,
    /// Length / last-segment / done, per [`DescLayout`]
    pub ctrl: u32,
    /// High bits of the buffer address
    pub buf1: u32,
    pub info: u32,
}

impl Descriptor {
    /// Unused slot: DMA_DONE set, everything else zero. A zeroed slot reads
    /// as "pending" to the engine.
    pub const fn idle(layout: DescLayout) -> Self {
        Self { buf0: 0, ctrl: layout.dma_done(), buf1: 0, info: 0 }
    }

    /// TX descriptor for a single buffer
    pub const fn tx(layout: DescLayout, paddr: u64, len: u32, last: bool) -> Self {
        Self {
            buf0: paddr as u32,
            ctrl: layout.ctrl(len, last),
            buf1: (paddr >> 32) as u32,
            info: 0,
        }
    }

    /// RX descriptor handed to hardware: buffer size, DMA_DONE clear
    pub const fn rx(layout: DescLayout, paddr: u64, buf_len: u32) -> Self {
        Self {
            buf0: paddr as u32,
            ctrl: layout.ctrl(buf_len, false),
            buf1: (paddr >> 32) as u32,
            info: 0,
        }
    }
}

/// Prefetch SRAM slice for one ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefetch {
    pub ring: u32,
    pub base: u32,
    pub depth: u32,
}

const fn pf(ring: u32, base: u32, depth: u32) -> Prefetch {
    Prefetch { ring, base, depth }
}

/// TX rings the engine covers when TX is enabled
pub const TX_PREFETCH: [Prefetch; 6] = [
    pf(txq::BAND0, 0x0100, 0x10),
    pf(1, 0x0200, 0x10),
    pf(2, 0x0300, 0x10),
    pf(3, 0x0400, 0x10),
    pf(txq::FWDL, 0x0500, 0x4),
    pf(txq::MCU_WM, 0x0540, 0x4),
];

/// RX rings the engine covers when RX is enabled
pub const RX_PREFETCH: [Prefetch; 4] = [
    pf(rxq::MCU_WM, 0x0000, 0x4),
    pf(rxq::MCU_WM2, 0x0040, 0x4),
    pf(rxq::BAND0, 0x0080, 0x4),
    pf(rxq::BAND1, 0x00c0, 0x4),
];
