//! Bring-up tuning
//!
//! Every busy-wait in the bring-up path is bounded by a [`PollConfig`]
//! attached to the transition it guards, so per-revision tuning happens here
//! and nowhere else. `Config::default()` carries the values observed on
//! MT7927 silicon.

use crate::dma_defs::DescLayout;
use crate::regs::{mcu_wpdma, ring_size};

/// Bounded poll: check every `interval_us` until `timeout_us` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout_us: u32,
    pub interval_us: u32,
}

impl PollConfig {
    pub const fn ms(timeout_ms: u32, interval_ms: u32) -> Self {
        Self {
            timeout_us: timeout_ms * 1000,
            interval_us: interval_ms * 1000,
        }
    }

    pub const fn us(timeout_us: u32, interval_us: u32) -> Self {
        Self { timeout_us, interval_us }
    }

    /// Number of checks this poll performs (at least one)
    pub fn iterations(&self) -> u32 {
        (self.timeout_us / self.interval_us.max(1)).max(1)
    }
}

/// Timing of each state-machine transition
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// driver -> firmware handshake
    pub give_to_firmware: PollConfig,
    /// firmware -> driver handshake
    pub claim_for_driver: PollConfig,
    /// Settle time between CLR_OWN and the first poll
    pub claim_settle_us: u32,
    /// How long WFSYS reset stays asserted
    pub reset_assert_ms: u32,
    /// INIT_DONE wait after deassert
    pub reset_done: PollConfig,
    /// TX/RX busy drain when disabling DMA
    pub dma_idle: PollConfig,
    /// Command ring completion
    pub cmd_completion: PollConfig,
    /// Data ring completion per chunk
    pub chunk_completion: PollConfig,
    /// Sleep after each chunk so the ROM can drain
    pub chunk_gap_ms: u32,
    /// Wait after PATCH_FINISH for the ROM to apply the patch
    pub patch_apply_ms: u32,
    /// Idle ring-drain polling between RAM sections
    pub section_settle: PollConfig,
    /// FW_N9_RDY after finish
    pub mcu_ready: PollConfig,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            give_to_firmware: PollConfig::ms(100, 1),
            claim_for_driver: PollConfig::ms(2000, 1),
            claim_settle_us: 3000,
            reset_assert_ms: 50,
            reset_done: PollConfig::ms(500, 10),
            dma_idle: PollConfig::ms(100, 1),
            cmd_completion: PollConfig::ms(100, 1),
            chunk_completion: PollConfig::ms(100, 1),
            chunk_gap_ms: 5,
            patch_apply_ms: 50,
            section_settle: PollConfig::ms(100, 10),
            mcu_ready: PollConfig::ms(500, 10),
        }
    }
}

/// A single register bit the driver sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegBit {
    pub addr: u32,
    pub mask: u32,
}

/// Bring-up configuration
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub timing: Timing,
    /// Descriptor control-word layout; see [`DescLayout`]
    pub desc_layout: DescLayout,
    /// Firmware bytes per data-ring descriptor
    pub chunk_size: usize,
    pub fwdl_ring_size: u32,
    pub mcu_ring_size: u32,
    pub tx_ring_size: u32,
    pub rx_mcu_ring_size: u32,
    pub rx_ring_size: u32,
    pub rx_buf_size: usize,
    /// Enable RX DMA during bring-up (RX rings are always configured)
    pub enable_rx: bool,
    /// Reset every ring pointer before and after each firmware submission
    pub defensive_ring_reset: bool,
    /// Flag written by `finish()` in place of a FW_START exchange
    pub sw_init_done: RegBit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            desc_layout: DescLayout::default(),
            chunk_size: 4096,
            fwdl_ring_size: ring_size::TX_FWDL,
            mcu_ring_size: ring_size::TX_MCU,
            tx_ring_size: ring_size::TX,
            rx_mcu_ring_size: ring_size::RX_MCU,
            rx_ring_size: ring_size::RX,
            rx_buf_size: ring_size::RX_BUF,
            enable_rx: true,
            defensive_ring_reset: true,
            sw_init_done: RegBit {
                addr: mcu_wpdma::DUMMY_CR,
                mask: mcu_wpdma::SW_INIT_DONE,
            },
        }
    }
}
