//! Subsystem Reset Controller
//!
//! Pulses WFSYS_SW_RST_B and waits for the subsystem to report INIT_DONE.
//! Runs after the driver owns the device and before any ring is programmed:
//! the reset wipes WFDMA ring registers.

use crate::config::Timing;
use crate::device::Mt7927Device;
use crate::error::{Mt7927Error, Mt7927Result};
use crate::mmio::{poll_until, Clock, RegisterBus};
use crate::regs::wfsys;

impl<B: RegisterBus> Mt7927Device<B> {
    /// INIT_DONE currently set?
    pub fn wfsys_ready(&self) -> bool {
        self.read(wfsys::SW_RST_B) & wfsys::SW_INIT_DONE != 0
    }

    /// Assert reset, hold it, deassert, wait for INIT_DONE.
    pub fn wfsys_reset<C: Clock + ?Sized>(&self, clock: &C, timing: &Timing) -> Mt7927Result<()> {
        let before = self.read_alive(wfsys::SW_RST_B)?;
        log::debug!(target: "mt7927::reset", "wfsys_reset before=0x{:08x}", before);

        self.write(wfsys::SW_RST_B, before & !wfsys::SW_RST_B_EN);
        clock.delay_ms(timing.reset_assert_ms.max(10));

        self.set(wfsys::SW_RST_B, wfsys::SW_RST_B_EN);

        if !poll_until(clock, "wfsys_init_done", timing.reset_done, || self.wfsys_ready()) {
            log::warn!(
                target: "mt7927::reset",
                "wfsys_reset_timeout rst_b=0x{:08x}",
                self.read(wfsys::SW_RST_B)
            );
            return Err(Mt7927Error::ResetTimeout);
        }

        log::info!(target: "mt7927::reset", "wfsys_reset done rst_b=0x{:08x}", self.read(wfsys::SW_RST_B));
        Ok(())
    }
}
