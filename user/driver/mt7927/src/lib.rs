//! MT7927 WiFi MCU Bring-up Library
//!
//! Takes an MT7927 PCIe radio from cold power-on to running firmware.
//!
//! ## Initialization
//!
//! The host PCI layer enables the device, maps BAR0 and hands over:
//! 1. a [`RegisterBus`] over BAR0
//! 2. a [`DmaAllocator`] for DMA-coherent memory
//! 3. a [`Clock`] to busy-wait on
//!
//! [`Mt7927::probe`] then runs the fixed bring-up order:
//! chip id → EMI sleep protection → firmware own → driver own → WFSYS reset
//! → WFDMA rings → MCU prerequisites → interrupts.
//! [`Mt7927::load_firmware`] streams the ROM patch and RAM code.
//!
//! All register access goes through [`Mt7927Device`], which translates chip
//! addresses into BAR0 offsets (fixed windows or the L1/L2 remap apertures).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod device;
pub mod dma;
pub mod dma_buf;
pub mod dma_defs;
pub mod error;
pub mod firmware;
pub mod irq;
pub mod mcu;
pub mod mmio;
pub mod power;
pub mod regs;
pub mod reset;

#[cfg(test)]
mod testutil;

pub use config::{Config, PollConfig, RegBit, Timing};
pub use device::{translate, Mt7927Device, Route};
pub use dma::{Completion, Ring, Wfdma, WfdmaBuilder};
pub use dma_buf::{DmaAllocator, DmaBuf};
pub use dma_defs::{DescLayout, Descriptor};
pub use error::{FirmwareError, Mt7927Error, Mt7927Result};
pub use firmware::{PatchImage, RamImage, Section};
pub use irq::{IntStatus, IrqEvent, IrqHandler};
pub use mcu::{DownloadStats, McuFwdl, McuState};
pub use mmio::{Clock, MmioRegion, RegisterBus};
pub use power::OwnershipState;

use irq::RingCompletion;
use regs::{pcie_mac, swdef, wfdma};

/// Log a recoverable step failure and carry on; fatal errors pass through.
fn carry_on(step: &str, r: Mt7927Result<()>) -> Mt7927Result<()> {
    match r {
        Err(e) if !e.is_fatal() => {
            log::warn!(target: "mt7927::init", "{} failed, continuing: {}", step, e);
            Ok(())
        }
        other => other,
    }
}

/// MT7927 device and its bring-up state
pub struct Mt7927<B: RegisterBus, A: DmaAllocator, C: Clock> {
    dev: Mt7927Device<B>,
    alloc: A,
    clock: C,
    config: Config,
    dma: Option<Wfdma<A::Buf>>,
    chip_id: u32,
    hw_rev: u32,
    mcu_seq: u8,
    mcu_state: McuState,
}

impl<B: RegisterBus, A: DmaAllocator, C: Clock> Mt7927<B, A, C> {
    pub fn new(bus: B, alloc: A, clock: C, config: Config) -> Mt7927Result<Self> {
        Ok(Self {
            dev: Mt7927Device::new(bus)?,
            alloc,
            clock,
            config,
            dma: None,
            chip_id: 0,
            hw_rev: 0,
            mcu_seq: 0,
            mcu_state: McuState::Idle,
        })
    }

    pub fn device(&self) -> &Mt7927Device<B> {
        &self.dev
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dma(&self) -> Option<&Wfdma<A::Buf>> {
        self.dma.as_ref()
    }

    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    pub fn hw_rev(&self) -> u32 {
        self.hw_rev
    }

    pub fn mcu_state(&self) -> McuState {
        self.mcu_state
    }

    /// Everything up to a DMA engine ready for firmware download.
    pub fn probe(&mut self) -> Mt7927Result<()> {
        let timing = self.config.timing;

        self.chip_id = self.dev.chip_id()?;
        self.hw_rev = self.dev.hw_rev();
        log::info!(target: "mt7927::init", "chip_id=0x{:08x} hw_rev=0x{:02x}", self.chip_id, self.hw_rev);

        self.dev.enable_sleep_protection();

        carry_on("fw_own", self.dev.give_to_firmware(&self.clock, &timing))?;
        carry_on("drv_own", self.dev.claim_for_driver(&self.clock, &timing))?;
        carry_on("wfsys_reset", self.dev.wfsys_reset(&self.clock, &timing))?;

        self.dev.write(wfdma::HOST_INT_ENA, 0);
        self.dev.pcie_int_enable(false);

        // a previous probe's rings are released only after the engine is reset
        let old = self.dma.take();
        let dma = dma::init(&self.dev, &self.alloc, &self.clock, &self.config)?;
        drop(old);
        self.dma = Some(dma);

        self.mcu_prerequisites()?;

        self.dev.irq_enable(IntStatus::bring_up());
        self.dev.pcie_int_enable(true);

        log::info!(target: "mt7927::init", "probe done");
        Ok(())
    }

    /// Ownership re-check, L0s off, firmware mode normal
    fn mcu_prerequisites(&self) -> Mt7927Result<()> {
        carry_on("drv_own", self.dev.claim_for_driver(&self.clock, &self.config.timing))?;

        let pm = self.dev.set(pcie_mac::PM, pcie_mac::PM_L0S_DIS);
        self.dev.write(swdef::MODE, swdef::NORMAL_MODE);
        log::debug!(
            target: "mt7927::init",
            "mcu_prereq pcie_pm=0x{:08x} swdef_mode=0x{:08x}",
            pm,
            self.dev.read(swdef::MODE)
        );
        Ok(())
    }

    /// Stream ROM patch then RAM code, then close the download.
    ///
    /// Both blobs are parsed before anything is sent. Returns whether the MCU
    /// reported ready.
    pub fn load_firmware(&mut self, patch: &[u8], ram: &[u8]) -> Mt7927Result<bool> {
        let patch = PatchImage::parse(patch).map_err(|e| {
            log::error!(target: "mt7927::fw", "patch_invalid err={}", e);
            Mt7927Error::from(e)
        })?;
        let ram = RamImage::parse(ram).map_err(|e| {
            log::error!(target: "mt7927::fw", "ram_invalid err={}", e);
            Mt7927Error::from(e)
        })?;

        let Some(dma) = self.dma.as_mut() else {
            log::error!(target: "mt7927::fw", "load_firmware before probe");
            return Err(Mt7927Error::RingNotConfigured { index: regs::txq::FWDL, rx: false });
        };

        let mut fw = McuFwdl::new(&self.dev, dma, &self.alloc, &self.clock, &self.config, self.mcu_seq);
        let result = fw
            .load_patch(&patch)
            .and_then(|()| fw.load_ram(&ram))
            .and_then(|()| fw.finish());
        self.mcu_seq = fw.seq();
        self.mcu_state = fw.state();
        result
    }

    /// `probe` followed by `load_firmware`
    pub fn bring_up(&mut self, patch: &[u8], ram: &[u8]) -> Mt7927Result<bool> {
        self.probe()?;
        self.load_firmware(patch, ram)
    }

    /// Interrupt bottom half. Received bytes go to `rx` with their ring index.
    pub fn service_irq<F: FnMut(u32, &[u8])>(&mut self, rx: F) -> IntStatus {
        match self.dma.as_mut() {
            Some(dma) => {
                let mut handler = RingCompletion { dev: &self.dev, dma, rx };
                irq::service(&self.dev, IntStatus::bring_up(), &mut handler)
            }
            None => irq::service(&self.dev, IntStatus::bring_up(), &mut |_: IrqEvent| {}),
        }
    }

    /// Interrupts off, DMA stopped and released, device back to firmware.
    pub fn shutdown(&mut self) {
        self.dev.irq_disable(IntStatus::all());
        self.dev.pcie_int_enable(false);

        if let Some(dma) = self.dma.take() {
            dma.shutdown(&self.dev, &self.clock, &self.config.timing);
        }
        if let Err(e) = self.dev.give_to_firmware(&self.clock, &self.config.timing) {
            log::warn!(target: "mt7927::init", "shutdown fw_own failed: {}", e);
        }
        self.mcu_state = McuState::Idle;
        log::info!(target: "mt7927::init", "shutdown done");
    }

    /// Single logical owner for every register access and submission
    pub fn into_shared(self) -> spin::Mutex<Self> {
        spin::Mutex::new(self)
    }
}
