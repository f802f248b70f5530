//! Bring-up error taxonomy
//!
//! Every sequencing step returns `Result<_, Mt7927Error>`. Whether an error
//! stops bring-up is decided by the caller through [`Mt7927Error::is_fatal`],
//! not by the mere presence of an `Err`.

use core::fmt;

/// Result type for bring-up steps
pub type Mt7927Result<T> = Result<T, Mt7927Error>;

/// MT7927 bring-up error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mt7927Error {
    /// Register read returned all-ones; the device fell off the bus
    DeviceNotResponding,
    /// BAR0 is smaller than the highest offset the translator can produce
    BarTooSmall,
    /// DMA-coherent buffer allocation failed
    DmaAllocFailed,
    /// Descriptor ring allocation failed
    RingAllocFailed,
    /// Power ownership handshake did not settle
    OwnershipTimeout,
    /// WFSYS never reported INIT_DONE
    ResetTimeout,
    /// Remap window already held (nested or concurrent remap access)
    RemapBusy,
    /// Global DMA enable requested over a ring with no valid base
    RingNotConfigured { index: u32, rx: bool },
    /// No free descriptor even after reclaiming completed ones
    RingFull { index: u32 },
    /// Firmware blob failed to parse
    InvalidFirmware(FirmwareError),
    /// MCU raised a hardware error flag (MCU_CMD watchdog bits)
    McuFault(u32),
}

impl Mt7927Error {
    /// Stop bring-up on this error?
    ///
    /// Ownership and reset timeouts are expected on some boot states and are
    /// carried through with a warning.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Mt7927Error::OwnershipTimeout | Mt7927Error::ResetTimeout)
    }
}

impl fmt::Display for Mt7927Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mt7927Error::DeviceNotResponding => write!(f, "device not responding (reads all-ones)"),
            Mt7927Error::BarTooSmall => write!(f, "BAR0 too small for register map"),
            Mt7927Error::DmaAllocFailed => write!(f, "DMA buffer allocation failed"),
            Mt7927Error::RingAllocFailed => write!(f, "descriptor ring allocation failed"),
            Mt7927Error::OwnershipTimeout => write!(f, "power ownership handshake timed out"),
            Mt7927Error::ResetTimeout => write!(f, "WFSYS reset did not complete"),
            Mt7927Error::RemapBusy => write!(f, "remap window already in use"),
            Mt7927Error::RingNotConfigured { index, rx } => write!(
                f,
                "{} ring {} not configured before global enable",
                if *rx { "RX" } else { "TX" },
                index
            ),
            Mt7927Error::RingFull { index } => write!(f, "TX ring {} full", index),
            Mt7927Error::InvalidFirmware(e) => write!(f, "invalid firmware: {}", e),
            Mt7927Error::McuFault(v) => write!(f, "MCU fault flags 0x{:08x}", v),
        }
    }
}

impl From<FirmwareError> for Mt7927Error {
    fn from(e: FirmwareError) -> Self {
        Mt7927Error::InvalidFirmware(e)
    }
}

/// Firmware image parse error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// Blob shorter than its fixed header/trailer
    Truncated,
    /// Image declares no sections
    Empty,
    /// Region count does not fit in the blob
    BadRegionCount,
    /// A section's bytes fall outside the blob (or into the region table)
    SectionOutOfBounds,
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FirmwareError::Truncated => "truncated image",
            FirmwareError::Empty => "no sections",
            FirmwareError::BadRegionCount => "bad region count",
            FirmwareError::SectionOutOfBounds => "section out of bounds",
        };
        f.write_str(s)
    }
}
