//! Power Ownership Controller
//!
//! Who drives the radio is negotiated through CONN_ON LPCTL: the host writes
//! SET_OWN or CLR_OWN, and hardware flips OWN_SYNC at its own pace. Nothing
//! here assumes the flip is synchronous; every transition is a bounded poll.
//!
//! Register writes while firmware owns the device are unreliable, so
//! `claim_for_driver` must succeed before reset or DMA configuration.

use crate::config::Timing;
use crate::device::Mt7927Device;
use crate::error::{Mt7927Error, Mt7927Result};
use crate::mmio::{poll_until, Clock, RegisterBus};
use crate::regs::{conn_on, hw};

/// Current owner, inferred from OWN_SYNC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    FirmwareOwned,
    DriverOwned,
    /// LPCTL read all-ones
    Unknown,
}

impl OwnershipState {
    fn from_lpctl(val: u32) -> Self {
        if val == 0xffff_ffff {
            OwnershipState::Unknown
        } else if val & conn_on::LPCTL_HOST_OWN_SYNC != 0 {
            OwnershipState::FirmwareOwned
        } else {
            OwnershipState::DriverOwned
        }
    }
}

impl<B: RegisterBus> Mt7927Device<B> {
    pub fn ownership(&self) -> OwnershipState {
        OwnershipState::from_lpctl(self.read(conn_on::LPCTL))
    }

    /// Enable EMI sleep protection ahead of the handshake
    pub fn enable_sleep_protection(&self) {
        let val = self.set(hw::EMI_CTL, hw::EMI_CTL_SLPPROT_EN);
        log::debug!(target: "mt7927::power", "emi_slpprot val=0x{:08x}", val);
    }

    /// Hand the device to firmware and wait for OWN_SYNC to rise.
    ///
    /// A timeout is reported as `OwnershipTimeout`; on some boot states the
    /// ROM never acknowledges and bring-up carries on.
    pub fn give_to_firmware<C: Clock + ?Sized>(&self, clock: &C, timing: &Timing) -> Mt7927Result<()> {
        self.write(conn_on::LPCTL, conn_on::LPCTL_HOST_SET_OWN);

        let ok = poll_until(clock, "fw_own", timing.give_to_firmware, || {
            self.ownership() == OwnershipState::FirmwareOwned
        });
        if !ok {
            log::warn!(target: "mt7927::power", "fw_own_timeout lpctl=0x{:08x}", self.read(conn_on::LPCTL));
            return Err(Mt7927Error::OwnershipTimeout);
        }
        log::info!(target: "mt7927::power", "fw_own ok");
        Ok(())
    }

    /// Take the device back from firmware.
    ///
    /// Returns at once when OWN_SYNC is already clear; otherwise writes
    /// CLR_OWN, lets the handshake settle, then polls.
    pub fn claim_for_driver<C: Clock + ?Sized>(&self, clock: &C, timing: &Timing) -> Mt7927Result<()> {
        match self.ownership() {
            OwnershipState::DriverOwned => {
                log::debug!(target: "mt7927::power", "drv_own already");
                return Ok(());
            }
            OwnershipState::Unknown => {
                log::error!(target: "mt7927::power", "drv_own lpctl=0xffffffff");
                return Err(Mt7927Error::DeviceNotResponding);
            }
            OwnershipState::FirmwareOwned => {}
        }

        self.write(conn_on::LPCTL, conn_on::LPCTL_HOST_CLR_OWN);
        clock.delay_us(timing.claim_settle_us);

        let ok = poll_until(clock, "drv_own", timing.claim_for_driver, || {
            self.ownership() == OwnershipState::DriverOwned
        });
        if !ok {
            log::warn!(target: "mt7927::power", "drv_own_timeout lpctl=0x{:08x}", self.read(conn_on::LPCTL));
            return Err(Mt7927Error::OwnershipTimeout);
        }
        log::info!(target: "mt7927::power", "drv_own ok");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeClock, MockBus};

    const LPCTL_BAR: u32 = 0xe0010;

    fn dev() -> Mt7927Device<MockBus> {
        Mt7927Device::new(MockBus::new()).unwrap()
    }

    #[test]
    fn test_handshake_round_trip() {
        let dev = dev();
        let clock = FakeClock::new();
        let timing = Timing::default();

        assert_eq!(dev.ownership(), OwnershipState::DriverOwned);
        dev.give_to_firmware(&clock, &timing).unwrap();
        assert_eq!(dev.ownership(), OwnershipState::FirmwareOwned);
        dev.claim_for_driver(&clock, &timing).unwrap();
        assert_eq!(dev.ownership(), OwnershipState::DriverOwned);
        assert!(dev.bus().wrote(LPCTL_BAR, conn_on::LPCTL_HOST_CLR_OWN));
    }

    #[test]
    fn test_claim_when_already_owned() {
        let dev = dev();
        let clock = FakeClock::new();
        dev.claim_for_driver(&clock, &Timing::default()).unwrap();
        assert!(dev.bus().writes_to(LPCTL_BAR).is_empty());
        assert_eq!(clock.elapsed_us(), 0);
    }

    #[test]
    fn test_claim_waits_settle_time() {
        let dev = dev();
        dev.bus().poke(LPCTL_BAR, conn_on::LPCTL_HOST_OWN_SYNC);
        let clock = FakeClock::new();
        let timing = Timing::default();
        dev.claim_for_driver(&clock, &timing).unwrap();
        assert!(clock.elapsed_us() >= timing.claim_settle_us as u64);
    }

    #[test]
    fn test_fw_own_timeout_is_recoverable() {
        let dev = dev();
        dev.bus().fw_ignores_set_own.set(true);
        let clock = FakeClock::new();
        let timing = Timing::default();
        let err = dev.give_to_firmware(&clock, &timing).unwrap_err();
        assert_eq!(err, Mt7927Error::OwnershipTimeout);
        assert!(!err.is_fatal());
        assert_eq!(clock.elapsed_us(), timing.give_to_firmware.timeout_us as u64);
    }

    #[test]
    fn test_claim_timeout_is_recoverable() {
        let dev = dev();
        dev.bus().poke(LPCTL_BAR, conn_on::LPCTL_HOST_OWN_SYNC);
        dev.bus().fw_ignores_clr_own.set(true);
        let clock = FakeClock::new();
        let timing = Timing::default();

        let err = dev.claim_for_driver(&clock, &timing).unwrap_err();
        assert_eq!(err, Mt7927Error::OwnershipTimeout);
        assert!(!err.is_fatal());
        assert_eq!(dev.ownership(), OwnershipState::FirmwareOwned);
        assert_eq!(
            clock.elapsed_us(),
            timing.claim_settle_us as u64 + timing.claim_for_driver.timeout_us as u64
        );
    }

    #[test]
    fn test_claim_dead_device() {
        let dev = dev();
        dev.bus().poke(LPCTL_BAR, 0xffff_ffff);
        assert_eq!(dev.ownership(), OwnershipState::Unknown);
        assert_eq!(
            dev.claim_for_driver(&FakeClock::new(), &Timing::default()),
            Err(Mt7927Error::DeviceNotResponding)
        );
    }
}
