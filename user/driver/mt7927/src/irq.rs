//! Interrupt/Completion Notifier
//!
//! WFDMA0 HOST_INT_STA carries one bit per ring. Servicing reads it, writes
//! the same value back (write-1-to-clear, done even for zero), dispatches one
//! event per set bit and re-arms HOST_INT_ENA.
//!
//! Download is pure polling; this path matters once the data path is live.

use bitflags::bitflags;

use crate::device::Mt7927Device;
use crate::dma::Wfdma;
use crate::dma_buf::DmaBuf;
use crate::mmio::RegisterBus;
use crate::regs::{pcie_mac, rxq, txq, wfdma};

bitflags! {
    /// HOST_INT_STA / HOST_INT_ENA bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntStatus: u32 {
        const TX_DONE_BAND0 = 1 << 0;
        const TX_DONE_FWDL = 1 << 4;
        const TX_DONE_MCU_WM = 1 << 5;
        const RX_DONE_WM = 1 << 16;
        const RX_DONE_WM2 = 1 << 17;
        const RX_DONE_DATA = 1 << 18;
        const RX_DONE_DATA1 = 1 << 19;
        const MCU_CMD = 1 << 29;

        const TX_DONE_ALL = Self::TX_DONE_BAND0.bits()
            | Self::TX_DONE_FWDL.bits()
            | Self::TX_DONE_MCU_WM.bits();
        const RX_DONE_ALL = Self::RX_DONE_WM.bits()
            | Self::RX_DONE_WM2.bits()
            | Self::RX_DONE_DATA.bits();
    }
}

impl IntStatus {
    /// Mask armed at the end of bring-up and after every service pass
    pub const fn bring_up() -> Self {
        Self::TX_DONE_ALL.union(Self::RX_DONE_ALL).union(Self::MCU_CMD)
    }
}

/// One completion source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    TxDone { ring: u32 },
    RxDone { ring: u32 },
    McuCmd,
}

/// Status bit to event, in dispatch order (TX, then RX, then MCU)
const DISPATCH: [(IntStatus, IrqEvent); 8] = [
    (IntStatus::TX_DONE_BAND0, IrqEvent::TxDone { ring: txq::BAND0 }),
    (IntStatus::TX_DONE_FWDL, IrqEvent::TxDone { ring: txq::FWDL }),
    (IntStatus::TX_DONE_MCU_WM, IrqEvent::TxDone { ring: txq::MCU_WM }),
    (IntStatus::RX_DONE_WM, IrqEvent::RxDone { ring: rxq::MCU_WM }),
    (IntStatus::RX_DONE_WM2, IrqEvent::RxDone { ring: rxq::MCU_WM2 }),
    (IntStatus::RX_DONE_DATA, IrqEvent::RxDone { ring: rxq::BAND0 }),
    (IntStatus::RX_DONE_DATA1, IrqEvent::RxDone { ring: rxq::BAND1 }),
    (IntStatus::MCU_CMD, IrqEvent::McuCmd),
];

/// Events for every set bit of `status`
pub fn events(status: IntStatus) -> impl Iterator<Item = IrqEvent> {
    DISPATCH
        .into_iter()
        .filter(move |(bit, _)| status.contains(*bit))
        .map(|(_, ev)| ev)
}

/// Receives dispatched completions
pub trait IrqHandler {
    fn handle(&mut self, event: IrqEvent);
}

impl<F: FnMut(IrqEvent)> IrqHandler for F {
    fn handle(&mut self, event: IrqEvent) {
        self(event)
    }
}

impl<B: RegisterBus> Mt7927Device<B> {
    pub fn irq_enable(&self, mask: IntStatus) {
        self.set(wfdma::HOST_INT_ENA, mask.bits());
    }

    pub fn irq_disable(&self, mask: IntStatus) {
        self.clear(wfdma::HOST_INT_ENA, mask.bits());
    }

    /// PCIe MAC interrupt gate in front of WFDMA
    pub fn pcie_int_enable(&self, on: bool) {
        let val = if on { pcie_mac::INT_ENABLE_ALL } else { 0 };
        self.write(pcie_mac::INT_ENABLE, val);
    }

    /// Top half: is this our interrupt? If so, mask everything until
    /// [`service`] runs.
    pub fn irq_pending(&self) -> bool {
        let sta = self.read(wfdma::HOST_INT_STA);
        if sta == 0 || sta == 0xffff_ffff {
            return false;
        }
        self.write(wfdma::HOST_INT_ENA, 0);
        true
    }

    /// Read HOST_INT_STA and write it straight back
    pub fn irq_ack(&self) -> IntStatus {
        let raw = self.read(wfdma::HOST_INT_STA);
        self.write(wfdma::HOST_INT_STA, raw);
        if raw == 0xffff_ffff {
            log::error!(target: "mt7927::irq", "int_sta all-ones");
            return IntStatus::empty();
        }
        let status = IntStatus::from_bits_truncate(raw);
        if raw & !IntStatus::all().bits() != 0 {
            log::debug!(target: "mt7927::irq", "int_sta unknown bits=0x{:08x}", raw & !IntStatus::all().bits());
        }
        status
    }
}

/// Acknowledge, dispatch, re-arm `mask`. Returns the status serviced.
pub fn service<B, H>(dev: &Mt7927Device<B>, mask: IntStatus, handler: &mut H) -> IntStatus
where
    B: RegisterBus,
    H: IrqHandler + ?Sized,
{
    let status = dev.irq_ack();
    log::trace!(target: "mt7927::irq", "service status=0x{:08x}", status.bits());

    for ev in events(status) {
        handler.handle(ev);
    }

    dev.irq_enable(mask);
    status
}

/// RX budget per service pass for the MCU event rings
pub const RX_BUDGET_MCU: u32 = 16;
/// RX budget per service pass for the data rings
pub const RX_BUDGET_DATA: u32 = 64;

/// Completion handler over the ring engine: TX done frees consumed buffers,
/// RX done hands received bytes to `rx` and re-arms the descriptors.
pub struct RingCompletion<'a, B: RegisterBus, M: DmaBuf, F: FnMut(u32, &[u8])> {
    pub dev: &'a Mt7927Device<B>,
    pub dma: &'a mut Wfdma<M>,
    pub rx: F,
}

impl<B: RegisterBus, M: DmaBuf, F: FnMut(u32, &[u8])> IrqHandler for RingCompletion<'_, B, M, F> {
    fn handle(&mut self, event: IrqEvent) {
        match event {
            IrqEvent::TxDone { ring } => {
                let n = self.dma.tx_cleanup(self.dev, ring, drop);
                log::trace!(target: "mt7927::irq", "tx_done ring={} freed={}", ring, n);
            }
            IrqEvent::RxDone { ring } => {
                let budget = if ring == rxq::MCU_WM || ring == rxq::MCU_WM2 {
                    RX_BUDGET_MCU
                } else {
                    RX_BUDGET_DATA
                };
                let n = self.dma.rx_poll(self.dev, ring, budget, &mut self.rx);
                log::trace!(target: "mt7927::irq", "rx_done ring={} n={}", ring, n);
            }
            IrqEvent::McuCmd => {
                log::debug!(target: "mt7927::irq", "mcu_cmd mcu_cmd=0x{:08x}", self.dev.read(wfdma::MCU_CMD));
            }
        }
    }
}
