//! MT7927 Register Definitions
//!
//! Logical chip addresses and BAR0 offsets for the MT7927 PCIe function.
//! Addresses below `remap::DIRECT_LIMIT` are BAR0 offsets; everything else
//! is a logical bus address that goes through [`crate::device`] translation.
//!
//! ## Layout
//!
//! - helpers (`bit`, `genmask`, `field_get`, `field_prep`)
//! - Fixed Map (static logical -> BAR0 windows)
//! - remap control registers (L1/L2 apertures)
//! - CONN_ON / WFSYS / PCIe MAC / SWDEF registers
//! - WFDMA0 host DMA block
//! - queue ids and ring sizes

#![allow(dead_code)]

// ============================================================================
// Helper macros as const fn
// ============================================================================

/// BIT(n) = 1 << n
pub const fn bit(n: u32) -> u32 {
    1 << n
}

/// GENMASK(hi, lo) = mask from bit lo to bit hi inclusive
pub const fn genmask(hi: u32, lo: u32) -> u32 {
    let bits = hi - lo + 1;
    (((1u64 << bits) - 1) as u32) << lo
}

/// Extract a field described by `mask` from `val`
#[inline]
pub const fn field_get(mask: u32, val: u32) -> u32 {
    (val & mask) >> mask.trailing_zeros()
}

/// Place `val` into the field described by `mask`
#[inline]
pub const fn field_prep(mask: u32, val: u32) -> u32 {
    (val << mask.trailing_zeros()) & mask
}

// ============================================================================
// Fixed Map
// ============================================================================

/// One static translation window: `[logical_base, logical_base + size)`
/// appears in BAR0 at `mapped_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWindow {
    pub logical_base: u32,
    pub mapped_offset: u32,
    pub size: u32,
}

impl RegisterWindow {
    const fn new(logical_base: u32, mapped_offset: u32, size: u32) -> Self {
        Self { logical_base, mapped_offset, size }
    }

    /// BAR0 offset for `addr` if this window covers it
    #[inline]
    pub fn map(&self, addr: u32) -> Option<u32> {
        let delta = addr.checked_sub(self.logical_base)?;
        (delta < self.size).then(|| self.mapped_offset + delta)
    }
}

/// Fixed windows, scanned in order; first hit wins.
pub static FIXED_MAP: [RegisterWindow; 51] = [
    RegisterWindow::new(0x830c_0000, 0x00_0000, 0x0000_1000), // WF_MCU_BUS_CR_REMAP
    RegisterWindow::new(0x5400_0000, 0x00_2000, 0x0000_1000), // WFDMA PCIE0 MCU DMA0
    RegisterWindow::new(0x5500_0000, 0x00_3000, 0x0000_1000), // WFDMA PCIE0 MCU DMA1
    RegisterWindow::new(0x5600_0000, 0x00_4000, 0x0000_1000), // WFDMA reserved
    RegisterWindow::new(0x5700_0000, 0x00_5000, 0x0000_1000), // WFDMA MCU wrap CR
    RegisterWindow::new(0x5800_0000, 0x00_6000, 0x0000_1000), // WFDMA PCIE1 MCU DMA0
    RegisterWindow::new(0x5900_0000, 0x00_7000, 0x0000_1000), // WFDMA PCIE1 MCU DMA1
    RegisterWindow::new(0x820c_0000, 0x00_8000, 0x0000_4000), // WF_UMAC_TOP (PLE)
    RegisterWindow::new(0x820c_8000, 0x00_c000, 0x0000_2000), // WF_UMAC_TOP (PSE)
    RegisterWindow::new(0x820c_c000, 0x00_e000, 0x0000_2000), // WF_UMAC_TOP (PP)
    RegisterWindow::new(0x7403_0000, 0x01_0000, 0x0000_1000), // PCIe MAC
    RegisterWindow::new(0x820e_0000, 0x02_0000, 0x0000_0400), // BN0 WF_CFG
    RegisterWindow::new(0x820e_1000, 0x02_0400, 0x0000_0200), // BN0 WF_TRB
    RegisterWindow::new(0x820e_2000, 0x02_0800, 0x0000_0400), // BN0 WF_AGG
    RegisterWindow::new(0x820e_3000, 0x02_0c00, 0x0000_0400), // BN0 WF_ARB
    RegisterWindow::new(0x820e_4000, 0x02_1000, 0x0000_0400), // BN0 WF_TMAC
    RegisterWindow::new(0x820e_5000, 0x02_1400, 0x0000_0800), // BN0 WF_RMAC
    RegisterWindow::new(0x820c_e000, 0x02_1c00, 0x0000_0200), // WF_SEC
    RegisterWindow::new(0x820e_7000, 0x02_1e00, 0x0000_0200), // BN0 WF_DMA
    RegisterWindow::new(0x820c_f000, 0x02_2000, 0x0000_1000), // WF_PF
    RegisterWindow::new(0x820e_9000, 0x02_3400, 0x0000_0200), // BN0 WF_WTBLOFF
    RegisterWindow::new(0x820e_a000, 0x02_4000, 0x0000_0200), // BN0 WF_ETBF
    RegisterWindow::new(0x820e_b000, 0x02_4200, 0x0000_0400), // BN0 WF_LPON
    RegisterWindow::new(0x820e_c000, 0x02_4600, 0x0000_0200), // BN0 WF_INT
    RegisterWindow::new(0x820e_d000, 0x02_4800, 0x0000_0800), // BN0 WF_MIB
    RegisterWindow::new(0x820c_a000, 0x02_6000, 0x0000_2000), // BN0 WF_MUCOP
    RegisterWindow::new(0x820d_0000, 0x03_0000, 0x0001_0000), // WF_WTBLON
    RegisterWindow::new(0x4000_0000, 0x07_0000, 0x0001_0000), // WF_UMAC_SYSRAM
    RegisterWindow::new(0x0040_0000, 0x08_0000, 0x0001_0000), // WF_MCU_SYSRAM
    RegisterWindow::new(0x0041_0000, 0x09_0000, 0x0001_0000), // WF_MCU_SYSRAM (configure)
    RegisterWindow::new(0x820f_0000, 0x0a_0000, 0x0000_0400), // BN1 WF_CFG
    RegisterWindow::new(0x820f_1000, 0x0a_0600, 0x0000_0200), // BN1 WF_TRB
    RegisterWindow::new(0x820f_2000, 0x0a_0800, 0x0000_0400), // BN1 WF_AGG
    RegisterWindow::new(0x820f_3000, 0x0a_0c00, 0x0000_0400), // BN1 WF_ARB
    RegisterWindow::new(0x820f_4000, 0x0a_1000, 0x0000_0400), // BN1 WF_TMAC
    RegisterWindow::new(0x820f_5000, 0x0a_1400, 0x0000_0800), // BN1 WF_RMAC
    RegisterWindow::new(0x820f_7000, 0x0a_1e00, 0x0000_0200), // BN1 WF_DMA
    RegisterWindow::new(0x820f_9000, 0x0a_3400, 0x0000_0200), // BN1 WF_WTBLOFF
    RegisterWindow::new(0x820f_a000, 0x0a_4000, 0x0000_0200), // BN1 WF_ETBF
    RegisterWindow::new(0x820f_b000, 0x0a_4200, 0x0000_0400), // BN1 WF_LPON
    RegisterWindow::new(0x820f_c000, 0x0a_4600, 0x0000_0200), // BN1 WF_INT
    RegisterWindow::new(0x820f_d000, 0x0a_4800, 0x0000_0800), // BN1 WF_MIB
    RegisterWindow::new(0x820c_4000, 0x0a_8000, 0x0000_4000), // BN1 WF_MUCOP
    RegisterWindow::new(0x820b_0000, 0x0a_e000, 0x0000_1000), // [APB2] WFSYS_ON
    RegisterWindow::new(0x8002_0000, 0x0b_0000, 0x0001_0000), // WF_TOP_MISC_OFF
    RegisterWindow::new(0x8102_0000, 0x0c_0000, 0x0001_0000), // WF_TOP_MISC_ON
    RegisterWindow::new(0x7c02_0000, 0x0d_0000, 0x0001_0000), // CONN_INFRA, wfdma
    RegisterWindow::new(0x7c06_0000, 0x0e_0000, 0x0001_0000), // CONN_INFRA, conn_host_csr
    RegisterWindow::new(0x7c00_0000, 0x0f_0000, 0x0001_0000), // CONN_INFRA
    RegisterWindow::new(0x7002_0000, 0x1f_0000, 0x0001_0000), // reserved for CBTOP
    RegisterWindow::new(0x7c50_0000, 0x06_0000, 0x0200_0000), // remap
];

// ============================================================================
// Dynamic remap (L1 / L2 apertures)
// ============================================================================

pub mod remap {
    use super::genmask;

    /// Addresses below this are plain BAR0 offsets
    pub const DIRECT_LIMIT: u32 = 0x0020_0000;

    /// L1 remap control register (BAR0 offset)
    pub const HIF_REMAP_L1: u32 = 0x0015_5024;
    /// Base field of L1 control: the target's high 16 bits
    pub const L1_MASK: u32 = genmask(31, 16);
    /// Offset inside the 64 KiB L1 aperture
    pub const L1_OFFSET: u32 = genmask(15, 0);
    /// Where the L1 aperture appears in BAR0
    pub const HIF_REMAP_BASE_L1: u32 = 0x0013_0000;

    /// L2 remap control register (BAR0 offset)
    pub const HIF_REMAP_L2: u32 = 0x0000_0120;
    /// L1 target used to expose the L2 aperture
    pub const HIF_REMAP_BASE_L2: u32 = 0x1850_0000;

    /// Logical ranges reachable through L1; everything else uses L2
    pub const L1_RANGES: [(u32, u32); 3] = [
        (0x1800_0000, 0x18c0_0000),
        (0x7000_0000, 0x7800_0000),
        (0x7c00_0000, 0x7c40_0000),
    ];
}

// ============================================================================
// Top-level hardware identification
// ============================================================================

pub mod hw {
    use super::bit;

    pub const CHIPID: u32 = 0x0000;
    pub const REV: u32 = 0x0004;

    /// EMI control (sleep protection)
    pub const EMI_CTL: u32 = 0x0110;
    pub const EMI_CTL_SLPPROT_EN: u32 = bit(0);
}

// ============================================================================
// CONN_ON host CSR (power ownership, firmware status)
// ============================================================================

pub mod conn_on {
    use super::{bit, genmask};

    /// Low-power control: LPCTL 0x7c060010 -> BAR0 0xe0010
    pub const LPCTL: u32 = 0x7c06_0010;
    /// Write: hand ownership to firmware
    pub const LPCTL_HOST_SET_OWN: u32 = bit(0);
    /// Write: claim ownership for the driver
    pub const LPCTL_HOST_CLR_OWN: u32 = bit(1);
    /// Read: 1 = firmware owns, 0 = driver owns
    pub const LPCTL_HOST_OWN_SYNC: u32 = bit(2);

    /// MCU ready status
    pub const MISC: u32 = 0x7c06_00f0;
    pub const MISC_FW_N9_RDY: u32 = genmask(1, 0);
    pub const MISC_FW_N9_RDY_VAL: u32 = 0x1;
}

// ============================================================================
// WFSYS reset
// ============================================================================

pub mod wfsys {
    use super::bit;

    /// WFSYS_SW_RST_B 0x7c000140 -> BAR0 0xf0140
    pub const SW_RST_B: u32 = 0x7c00_0140;
    /// Reset deasserted when set
    pub const SW_RST_B_EN: u32 = bit(0);
    /// Subsystem finished its own init
    pub const SW_INIT_DONE: u32 = bit(4);
}

// ============================================================================
// PCIe MAC
// ============================================================================

pub mod pcie_mac {
    use super::bit;

    pub const BASE: u32 = 0x7403_0000;
    pub const fn pcie_mac(ofs: u32) -> u32 { BASE + ofs }

    pub const INT_ENABLE: u32 = pcie_mac(0x188);
    pub const INT_ENABLE_ALL: u32 = 0xff;
    pub const PM: u32 = pcie_mac(0x194);
    pub const PM_L0S_DIS: u32 = bit(8);
}

// ============================================================================
// Software-defined scratch registers shared with the ROM
// ============================================================================

pub mod swdef {
    pub const BASE: u32 = 0x0040_1400;
    pub const MODE: u32 = BASE + 0x3c;
    pub const NORMAL_MODE: u32 = 0;
}

// ============================================================================
// MCU-side WPDMA scratch register
// ============================================================================

pub mod mcu_wpdma {
    use super::bit;

    /// Host-to-ROM flag register (0x54000120 -> BAR0 0x2120)
    pub const DUMMY_CR: u32 = 0x5400_0120;
    /// Host has finished feeding firmware
    pub const SW_INIT_DONE: u32 = bit(0);
}

// ============================================================================
// WFDMA0 host DMA block
// ============================================================================

pub mod wfdma {
    use super::bit;

    /// WFDMA0 base (BAR0 offset, same window as logical 0x54000000)
    pub const BASE: u32 = 0x2000;
    pub const fn wfdma0(ofs: u32) -> u32 { BASE + ofs }

    pub const RST: u32 = wfdma0(0x100);
    pub const RST_LOGIC_RST: u32 = bit(4);
    pub const RST_DMASHDL_ALL_RST: u32 = bit(5);

    pub const MCU_CMD: u32 = wfdma0(0x1f0);

    pub const HOST_INT_STA: u32 = wfdma0(0x200);
    pub const HOST_INT_ENA: u32 = wfdma0(0x204);
    pub const GLO_CFG: u32 = wfdma0(0x208);
    pub const RST_DTX_PTR: u32 = wfdma0(0x20c);
    pub const RST_DRX_PTR: u32 = wfdma0(0x280);
    pub const PRI_DLY_INT_CFG0: u32 = wfdma0(0x2f0);

    /// Per-ring register block: BASE, CNT, CIDX, DIDX
    pub const RING_STRIDE: u32 = 0x10;
    pub const RING_BASE: u32 = 0x0;
    pub const RING_CNT: u32 = 0x4;
    pub const RING_CIDX: u32 = 0x8;
    pub const RING_DIDX: u32 = 0xc;

    pub const fn tx_ring(n: u32) -> u32 { wfdma0(0x300 + n * RING_STRIDE) }
    pub const fn rx_ring(n: u32) -> u32 { wfdma0(0x500 + n * RING_STRIDE) }
    pub const fn tx_ext_ctrl(n: u32) -> u32 { wfdma0(0x600 + n * 0x4) }
    pub const fn rx_ext_ctrl(n: u32) -> u32 { wfdma0(0x680 + n * 0x4) }

    /// EXT_CTRL value: prefetch SRAM base in 31:16, depth in 15:0
    pub const fn prefetch(base: u32, depth: u32) -> u32 {
        (base << 16) | depth
    }
}

/// WFDMA0 GLO_CFG bits
pub mod glo_cfg {
    use super::{bit, genmask};

    pub const TX_DMA_EN: u32 = bit(0);
    pub const TX_DMA_BUSY: u32 = bit(1);
    pub const RX_DMA_EN: u32 = bit(2);
    pub const RX_DMA_BUSY: u32 = bit(3);
    pub const CLK_GAT_DIS: u32 = bit(5);
    pub const TX_WB_DDONE: u32 = bit(6);
    pub const RX_WB_DDONE: u32 = bit(7);
    pub const FIFO_LITTLE_ENDIAN: u32 = bit(12);
    pub const CSR_DISP_BASE_PTR_CHAIN_EN: u32 = bit(15);
    pub const DMA_SIZE: u32 = genmask(17, 16);
    pub const FIFO_DIS_CHECK: u32 = bit(18);
    pub const OMIT_RX_INFO_PFET2: u32 = bit(21);
    pub const EXT_EN: u32 = bit(26);

    pub const BUSY_MASK: u32 = TX_DMA_BUSY | RX_DMA_BUSY;
}

/// MCU_CMD (WFDMA0 + 0x1f0) hardware error flags
pub mod mcu_cmd {
    use super::bit;

    pub const WM_WDT: u32 = bit(30);
    pub const WA_WDT: u32 = bit(31);
    pub const WDT_MASK: u32 = WM_WDT | WA_WDT;
}

// ============================================================================
// Queue ids and ring sizes
// ============================================================================

/// Hardware TX ring indices (MT7927 has TX rings 0..=7 only)
pub mod txq {
    pub const BAND0: u32 = 0;
    pub const FWDL: u32 = 4;
    pub const MCU_WM: u32 = 5;
}

/// Hardware RX ring indices
pub mod rxq {
    pub const MCU_WM: u32 = 0;
    pub const MCU_WM2: u32 = 1;
    pub const BAND0: u32 = 2;
    pub const BAND1: u32 = 3;
}

pub mod ring_size {
    pub const TX: u32 = 2048;
    pub const TX_MCU: u32 = 256;
    pub const TX_FWDL: u32 = 128;
    pub const RX: u32 = 1536;
    pub const RX_MCU: u32 = 512;
    /// Rings that are covered by a global enable but never used
    pub const IDLE: u32 = 4;
    pub const RX_BUF: usize = 2048;
}
