//! MT7927 Firmware Download Protocol
//!
//! Streams the ROM patch and RAM code to the MCU over two TX rings:
//! - MCU_WM (ring 5): headered commands (init download, patch finish, ...)
//! - FWDL (ring 4): raw firmware bytes, no header
//!
//! ## Protocol
//!
//! The ROM answers nothing during download. Every submission waits for the
//! ring to drain, a timeout is logged and the sequence moves on. There is no
//! FW_START exchange either: `finish()` raises a software init-done flag and
//! success is read from the absence of watchdog flags.
//!
//! ## Pacing
//!
//! The ROM drains chunks at a bounded rate. Each chunk is followed by a yield
//! and a short sleep, and RAM sections are separated by a settle period of
//! ring-drain polling.

use alloc::vec::Vec;

use crate::config::{Config, PollConfig};
use crate::device::Mt7927Device;
use crate::dma::{Completion, Rejected, Wfdma};
use crate::dma_buf::{DmaAllocator, DmaBuf};
use crate::error::{Mt7927Error, Mt7927Result};
use crate::firmware::{PatchImage, RamImage, Section};
use crate::mmio::{poll_until, Clock, RegisterBus};
use crate::regs::{conn_on, field_get, field_prep, mcu_cmd, txq, wfdma};

/// MCU command IDs
pub mod cmd {
    pub const TARGET_ADDRESS_LEN_REQ: u8 = 0x01;
    pub const PATCH_START_REQ: u8 = 0x05;
    pub const PATCH_FINISH_REQ: u8 = 0x07;
    pub const PATCH_SEM_CONTROL: u8 = 0x10;
}

/// Packet ID carried in every MCU header
pub const PKT_ID: u8 = 0xa0;
/// Download mode: plain, unencrypted
pub const FW_MODE_DL: u32 = 0;

pub const PATCH_SEM_RELEASE: u32 = 0;
pub const PATCH_SEM_GET: u32 = 1;

/// TXD word 0 fields
mod txd0 {
    use crate::regs::genmask;
    pub const TX_BYTES: u32 = genmask(15, 0);
    pub const PKT_FMT: u32 = genmask(24, 23);
    pub const Q_IDX: u32 = genmask(31, 25);
}

const PKT_FMT_CMD: u32 = 2;
/// MCU port RX queue 0
const Q_IDX_MCU_RX_Q0: u32 = 0x20;
/// Port/queue ID: MCU port, RX queue 0
const PQ_ID_MCU: u16 = 0x8000;
/// set_query: not applicable (legacy command)
const MCU_Q_NA: u8 = 0x3;
const S2D_H2N: u8 = 0;

const SEQ_MASK: u8 = 0xf;

/// Size of the MCU command header in front of every command
pub const MCU_TXD_SIZE: usize = 64;
/// Command scratch size (header + largest payload)
const MCU_CMD_BUF_SIZE: usize = MCU_TXD_SIZE + 64;

/// MCU command header: 8 TXD words followed by the MCU fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McuTxd {
    pub txd: [u32; 8],
    /// Length of everything after the TXD words
    pub len: u16,
    pub pq_id: u16,
    pub cid: u8,
    pub pkt_type: u8,
    pub set_query: u8,
    pub seq: u8,
    pub uc_d2b0_rev: u8,
    pub ext_cid: u8,
    pub s2d_index: u8,
    pub ext_cid_ack: u8,
}

impl McuTxd {
    pub fn new(cid: u8, payload_len: usize, seq: u8) -> Self {
        let total = (MCU_TXD_SIZE + payload_len) as u32;
        let mut txd = Self::default();

        txd.txd[0] = field_prep(txd0::TX_BYTES, total)
            | field_prep(txd0::PKT_FMT, PKT_FMT_CMD)
            | field_prep(txd0::Q_IDX, Q_IDX_MCU_RX_Q0);

        txd.len = (total - 32) as u16;
        txd.pq_id = PQ_ID_MCU;
        txd.cid = cid;
        txd.pkt_type = PKT_ID;
        txd.set_query = MCU_Q_NA;
        txd.seq = seq & SEQ_MASK;
        txd.s2d_index = S2D_H2N;
        txd
    }

    /// Little-endian wire image
    pub fn to_bytes(&self) -> [u8; MCU_TXD_SIZE] {
        let mut b = [0u8; MCU_TXD_SIZE];
        for (i, w) in self.txd.iter().enumerate() {
            b[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        b[32..34].copy_from_slice(&self.len.to_le_bytes());
        b[34..36].copy_from_slice(&self.pq_id.to_le_bytes());
        b[36] = self.cid;
        b[37] = self.pkt_type;
        b[38] = self.set_query;
        b[39] = self.seq;
        b[40] = self.uc_d2b0_rev;
        b[41] = self.ext_cid;
        b[42] = self.s2d_index;
        b[43] = self.ext_cid_ack;
        b
    }
}

/// Init-download request: `{addr, len, mode}`
pub fn init_download_payload(addr: u32, len: u32, mode: u32) -> [u8; 12] {
    let mut p = [0u8; 12];
    p[0..4].copy_from_slice(&addr.to_le_bytes());
    p[4..8].copy_from_slice(&len.to_le_bytes());
    p[8..12].copy_from_slice(&mode.to_le_bytes());
    p
}

/// Download progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuState {
    Idle,
    Patched,
    RamLoaded,
    Running,
}

/// Submission counters for one download session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub commands: u32,
    pub chunks: u32,
    pub bytes: u64,
    /// Completion waits that ran out
    pub timeouts: u32,
}

/// One firmware download session over an enabled WFDMA
pub struct McuFwdl<'a, B, A, C>
where
    B: RegisterBus,
    A: DmaAllocator + ?Sized,
    C: Clock + ?Sized,
{
    dev: &'a Mt7927Device<B>,
    dma: &'a mut Wfdma<A::Buf>,
    alloc: &'a A,
    clock: &'a C,
    config: &'a Config,
    seq: u8,
    /// Scratch buffers no descriptor points at
    free: Vec<A::Buf>,
    state: McuState,
    stats: DownloadStats,
}

impl<'a, B, A, C> McuFwdl<'a, B, A, C>
where
    B: RegisterBus,
    A: DmaAllocator + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(
        dev: &'a Mt7927Device<B>,
        dma: &'a mut Wfdma<A::Buf>,
        alloc: &'a A,
        clock: &'a C,
        config: &'a Config,
        seq: u8,
    ) -> Self {
        Self {
            dev,
            dma,
            alloc,
            clock,
            config,
            seq: seq & SEQ_MASK,
            free: Vec::new(),
            state: McuState::Idle,
            stats: DownloadStats::default(),
        }
    }

    pub fn state(&self) -> McuState {
        self.state
    }

    pub fn stats(&self) -> DownloadStats {
        self.stats
    }

    /// Next sequence number to be used
    pub fn seq(&self) -> u8 {
        self.seq
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = (self.seq + 1) & SEQ_MASK;
        seq
    }

    fn chunk_size(&self) -> usize {
        self.config
            .chunk_size
            .clamp(1, self.dma.layout().max_len() as usize)
    }

    /// Smallest idle scratch buffer of at least `min` bytes, or a new one
    fn take_buf(&mut self, min: usize, alloc_size: usize) -> Mt7927Result<A::Buf> {
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, b)| b.size() >= min)
            .min_by_key(|(_, b)| b.size())
            .map(|(i, _)| i);
        if let Some(i) = best {
            return Ok(self.free.swap_remove(i));
        }
        self.alloc.alloc(alloc_size).ok_or_else(|| {
            log::error!(target: "mt7927::mcu", "scratch_alloc_failed size={}", alloc_size);
            Mt7927Error::DmaAllocFailed
        })
    }

    /// Pull back every buffer the hardware is done with
    fn reclaim(&mut self, ring: u32) {
        let free = &mut self.free;
        self.dma.tx_cleanup(self.dev, ring, |b| free.push(b));
    }

    fn reset_rings(&mut self) {
        let free = &mut self.free;
        self.dma.reset_all(self.dev, |b| free.push(b));
    }

    /// Submit one buffer and wait for its ring to drain.
    fn transmit(&mut self, ring: u32, buf: A::Buf, len: u32, poll: PollConfig) -> Mt7927Result<Completion> {
        if self.config.defensive_ring_reset {
            self.reset_rings();
        }

        if let Err(Rejected { error, buf }) = self.dma.submit(self.dev, ring, buf, len, true) {
            self.free.push(buf);
            log::error!(target: "mt7927::mcu", "submit_failed ring={} err={}", ring, error);
            return Err(error);
        }

        let completion = self.dma.poll_completion(self.dev, self.clock, ring, poll);
        self.reclaim(ring);

        if self.config.defensive_ring_reset {
            self.reset_rings();
        }

        match completion {
            Completion::Fatal(e) => Err(e),
            Completion::TimedOutButContinuing => {
                self.stats.timeouts += 1;
                Ok(completion)
            }
            Completion::Completed => Ok(completion),
        }
    }

    /// Wrap `payload` in an MCU header and send it on the command ring.
    pub fn send_command(&mut self, cid: u8, payload: &[u8]) -> Mt7927Result<Completion> {
        let total = MCU_TXD_SIZE + payload.len();
        let buf = self.take_buf(total, total.max(MCU_CMD_BUF_SIZE))?;

        let seq = self.next_seq();
        let txd = McuTxd::new(cid, payload.len(), seq);
        buf.write_bytes(0, &txd.to_bytes());
        buf.write_bytes(MCU_TXD_SIZE, payload);

        log::debug!(target: "mt7927::mcu", "cmd cid=0x{:02x} seq={} len={}", cid, seq, total);
        let c = self.transmit(txq::MCU_WM, buf, total as u32, self.config.timing.cmd_completion)?;
        self.stats.commands += 1;
        Ok(c)
    }

    /// Send up to one chunk of raw firmware on the data ring, then pace.
    /// Returns how many bytes of `bytes` went out.
    pub fn send_chunk(&mut self, bytes: &[u8]) -> Mt7927Result<usize> {
        let chunk = self.chunk_size();
        let n = bytes.len().min(chunk);
        let buf = self.take_buf(n, chunk)?;
        buf.write_bytes(0, &bytes[..n]);

        self.transmit(txq::FWDL, buf, n as u32, self.config.timing.chunk_completion)?;
        self.stats.chunks += 1;
        self.stats.bytes += n as u64;
        log::trace!(target: "mt7927::mcu", "chunk len={} total={}", n, self.stats.bytes);

        self.clock.yield_now();
        self.clock.delay_ms(self.config.timing.chunk_gap_ms);
        Ok(n)
    }

    /// Announce a region with `init_cmd`, then stream its bytes.
    pub fn load_section(&mut self, section: &Section, data: &[u8], init_cmd: u8) -> Mt7927Result<()> {
        log::debug!(
            target: "mt7927::fw",
            "section addr=0x{:08x} len={}",
            section.target_addr, section.len
        );
        let req = init_download_payload(section.target_addr, section.len, FW_MODE_DL);
        self.send_command(init_cmd, &req)?;

        let mut rest = data;
        while !rest.is_empty() {
            let n = self.send_chunk(rest)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    fn patch_sem(&mut self, get: bool) -> Mt7927Result<()> {
        let op = if get { PATCH_SEM_GET } else { PATCH_SEM_RELEASE };
        self.send_command(cmd::PATCH_SEM_CONTROL, &op.to_le_bytes())?;
        Ok(())
    }

    /// ROM patch: semaphore, the single section, PATCH_FINISH, apply wait.
    pub fn load_patch(&mut self, patch: &PatchImage<'_>) -> Mt7927Result<()> {
        log::info!(
            target: "mt7927::fw",
            "patch build={} platform={} hw_sw_ver=0x{:08x} patch_ver=0x{:08x} len={}",
            patch.build_date(),
            patch.platform(),
            patch.hw_sw_ver,
            patch.patch_ver,
            patch.section().len
        );

        self.patch_sem(true)?;

        let loaded = self
            .load_section(patch.section(), patch.data(), cmd::PATCH_START_REQ)
            .and_then(|()| self.send_command(cmd::PATCH_FINISH_REQ, &[0u8; 4]).map(|_| ()));
        if let Err(e) = loaded {
            // the ROM holds the semaphore until told otherwise
            let _ = self.patch_sem(false);
            return Err(e);
        }

        self.clock.delay_ms(self.config.timing.patch_apply_ms);
        self.patch_sem(false)?;

        self.state = McuState::Patched;
        log::info!(target: "mt7927::fw", "patch loaded chunks={}", self.stats.chunks);
        Ok(())
    }

    /// Ring-drain polling between RAM sections
    fn settle(&mut self) {
        let poll = self.config.timing.section_settle;
        for _ in 0..poll.iterations() {
            self.reclaim(txq::FWDL);
            self.reclaim(txq::MCU_WM);
            self.clock.delay_us(poll.interval_us);
        }
    }

    /// RAM code: every section in file order.
    pub fn load_ram(&mut self, ram: &RamImage<'_>) -> Mt7927Result<()> {
        if self.state != McuState::Patched {
            log::warn!(target: "mt7927::fw", "ram_without_patch state={:?}", self.state);
        }
        log::info!(
            target: "mt7927::fw",
            "ram fw_ver={} build={} chip=0x{:02x} eco={} regions={}",
            ram.fw_ver(),
            ram.build_date(),
            ram.chip_id,
            ram.eco_code,
            ram.sections().len()
        );

        for (i, section) in ram.sections().iter().enumerate() {
            if i > 0 {
                self.settle();
            }
            self.load_section(section, ram.data(section), cmd::TARGET_ADDRESS_LEN_REQ)?;
        }

        self.state = McuState::RamLoaded;
        log::info!(
            target: "mt7927::fw",
            "ram loaded commands={} chunks={} bytes={} timeouts={}",
            self.stats.commands, self.stats.chunks, self.stats.bytes, self.stats.timeouts
        );
        Ok(())
    }

    /// Close the download without FW_START.
    ///
    /// Sets the software init-done flag, then watches for FW_N9_RDY. Returns
    /// whether the MCU reported ready; a watchdog flag is `McuFault`.
    pub fn finish(&mut self) -> Mt7927Result<bool> {
        let flag = self.config.sw_init_done;
        self.dev.set(flag.addr, flag.mask);
        log::info!(target: "mt7927::mcu", "sw_init_done addr=0x{:08x} mask=0x{:08x}", flag.addr, flag.mask);

        let dev = self.dev;
        let ready = poll_until(self.clock, "fw_n9_rdy", self.config.timing.mcu_ready, || {
            field_get(conn_on::MISC_FW_N9_RDY, dev.read(conn_on::MISC)) == conn_on::MISC_FW_N9_RDY_VAL
        });
        if !ready {
            log::warn!(target: "mt7927::mcu", "fw_n9_rdy_timeout misc=0x{:08x}", dev.read(conn_on::MISC));
        }

        let flags = dev.read(wfdma::MCU_CMD);
        if flags != 0xffff_ffff && flags & mcu_cmd::WDT_MASK != 0 {
            log::error!(target: "mt7927::mcu", "mcu_watchdog mcu_cmd=0x{:08x}", flags);
            return Err(Mt7927Error::McuFault(flags));
        }

        self.state = McuState::Running;
        log::info!(target: "mt7927::mcu", "firmware running ready={}", ready);
        Ok(ready)
    }
}
