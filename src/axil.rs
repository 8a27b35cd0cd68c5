//! AXI-Lite bus master and monitor driving a `<prefix>_*` signal group.

use futures::lock::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxiResp {
    Okay,
    ExOkay,
    SlvErr,
    DecErr,
}

impl AxiResp {
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => AxiResp::Okay,
            1 => AxiResp::ExOkay,
            2 => AxiResp::SlvErr,
            _ => AxiResp::DecErr,
        }
    }

    pub fn bits(self) -> u64 {
        match self {
            AxiResp::Okay => 0,
            AxiResp::ExOkay => 1,
            AxiResp::SlvErr => 2,
            AxiResp::DecErr => 3,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, AxiResp::Okay | AxiResp::ExOkay)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AxiError {
    #[error("Write to {addr:#x} answered with {resp:?}")]
    WriteResp { addr: u64, resp: AxiResp },
    #[error("Read from {addr:#x} answered with {resp:?}")]
    ReadResp { addr: u64, resp: AxiResp },
    #[error("Unsupported AXI-Lite data width of {0} bits")]
    DataWidth(u32),
}

/// The signals of one AXI-Lite interface.
#[derive(Clone, Copy, Debug)]
pub struct AxiLiteBus {
    pub awaddr: SimObject,
    pub awprot: SimObject,
    pub awvalid: SimObject,
    pub awready: SimObject,
    pub wdata: SimObject,
    pub wstrb: SimObject,
    pub wvalid: SimObject,
    pub wready: SimObject,
    pub bresp: SimObject,
    pub bvalid: SimObject,
    pub bready: SimObject,
    pub araddr: SimObject,
    pub arprot: SimObject,
    pub arvalid: SimObject,
    pub arready: SimObject,
    pub rdata: SimObject,
    pub rresp: SimObject,
    pub rvalid: SimObject,
    pub rready: SimObject,
}

/// AXI-Lite port names, without prefix, with their bit widths.
pub fn axil_ports(addr_width: u32, data_width: u32) -> [(&'static str, u32); 19] {
    [
        ("awaddr", addr_width),
        ("awprot", 3),
        ("awvalid", 1),
        ("awready", 1),
        ("wdata", data_width),
        ("wstrb", data_width / 8),
        ("wvalid", 1),
        ("wready", 1),
        ("bresp", 2),
        ("bvalid", 1),
        ("bready", 1),
        ("araddr", addr_width),
        ("arprot", 3),
        ("arvalid", 1),
        ("arready", 1),
        ("rdata", data_width),
        ("rresp", 2),
        ("rvalid", 1),
        ("rready", 1),
    ]
}

impl AxiLiteBus {
    pub fn from_prefix(dut: SimObject, prefix: &str) -> SimResult<Self> {
        let sig = |name: &str| dut.get_child(&format!("{}_{}", prefix, name));
        Ok(AxiLiteBus {
            awaddr: sig("awaddr")?,
            awprot: sig("awprot")?,
            awvalid: sig("awvalid")?,
            awready: sig("awready")?,
            wdata: sig("wdata")?,
            wstrb: sig("wstrb")?,
            wvalid: sig("wvalid")?,
            wready: sig("wready")?,
            bresp: sig("bresp")?,
            bvalid: sig("bvalid")?,
            bready: sig("bready")?,
            araddr: sig("araddr")?,
            arprot: sig("arprot")?,
            arvalid: sig("arvalid")?,
            arready: sig("arready")?,
            rdata: sig("rdata")?,
            rresp: sig("rresp")?,
            rvalid: sig("rvalid")?,
            rready: sig("rready")?,
        })
    }

    /// Number of bytes per data word.
    pub fn byte_lanes(&self) -> Result<usize, AxiError> {
        let width = self.wdata.width();
        if width == 0 || width % 8 != 0 || self.rdata.width() != width {
            return Err(AxiError::DataWidth(width));
        }
        Ok(width as usize / 8)
    }
}

/// Splits a byte range into word-aligned chunks: (word address, first lane, length).
pub(crate) fn word_chunks(address: u64, len: usize, lanes: usize) -> Vec<(u64, usize, usize)> {
    let mut chunks = Vec::new();
    let mut cur = address;
    let mut remaining = len;
    while remaining > 0 {
        let word_addr = cur - cur % lanes as u64;
        let first = (cur - word_addr) as usize;
        let n = (lanes - first).min(remaining);
        chunks.push((word_addr, first, n));
        cur += n as u64;
        remaining -= n;
    }
    chunks
}

/// Places `bytes` little-endian into a word starting at lane `first`, and
/// returns the word together with its strobe.
pub(crate) fn pack_word(bytes: &[u8], first: usize) -> (u64, u64) {
    let mut word = 0u64;
    let mut strb = 0u64;
    for (i, b) in bytes.iter().enumerate() {
        word |= (*b as u64) << (8 * (first + i));
        strb |= 1 << (first + i);
    }
    (word, strb)
}

pub(crate) fn unpack_word(word: u64, first: usize, n: usize) -> Vec<u8> {
    (first..first + n).map(|lane| (word >> (8 * lane)) as u8).collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MasterStats {
    pub writes: u32,
    pub reads: u32,
}

/// AXI-Lite bus master. Operations wait for the reset to be released, then run
/// one word transfer at a time on the rising clock edge.
#[derive(Clone)]
pub struct AxiLiteMaster {
    bus: AxiLiteBus,
    clk: SimObject,
    rst: Option<SimObject>,
    reset_active_level: bool,
    byte_lanes: usize,
    write_lock: Arc<Mutex<()>>,
    read_lock: Arc<Mutex<()>>,
    stats: TbObj<MasterStats>,
}

impl AxiLiteMaster {
    pub fn new(
        bus: AxiLiteBus,
        clk: SimObject,
        rst: Option<SimObject>,
        reset_active_level: bool,
    ) -> Result<Self, AxiError> {
        let byte_lanes = bus.byte_lanes()?;
        // idle outputs
        bus.awvalid.set(0);
        bus.wvalid.set(0);
        bus.bready.set(0);
        bus.arvalid.set(0);
        bus.rready.set(0);
        Ok(AxiLiteMaster {
            bus,
            clk,
            rst,
            reset_active_level,
            byte_lanes,
            write_lock: Arc::new(Mutex::new(())),
            read_lock: Arc::new(Mutex::new(())),
            stats: TbObj::new(MasterStats::default()),
        })
    }

    pub fn stats(&self) -> MasterStats {
        *self.stats.get()
    }

    async fn wait_reset_release(&self) {
        if let Some(rst) = self.rst {
            utils::wait_for_value(rst, !self.reset_active_level as u64).await;
        }
    }

    pub async fn write(&self, address: u64, data: &[u8]) -> Result<(), AxiError> {
        let _guard = self.write_lock.lock().await;
        log::info!("Write start addr: {:#010x} data: {:02x?}", address, data);
        for (word_addr, first, n) in word_chunks(address, data.len(), self.byte_lanes) {
            let offset = (word_addr + first as u64 - address) as usize;
            let (word, strb) = pack_word(&data[offset..offset + n], first);
            let resp = self.write_word(word_addr, word, strb).await;
            if !resp.is_ok() {
                log::warn!("Write to {:#010x} answered with {:?}", word_addr, resp);
                return Err(AxiError::WriteResp { addr: word_addr, resp });
            }
        }
        self.stats.with_mut(|s| s.writes += 1);
        log::info!("Write complete addr: {:#010x} length: {}", address, data.len());
        Ok(())
    }

    pub async fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, AxiError> {
        let _guard = self.read_lock.lock().await;
        log::info!("Read start addr: {:#010x} length: {}", address, length);
        let mut data = Vec::with_capacity(length);
        for (word_addr, first, n) in word_chunks(address, length, self.byte_lanes) {
            let (word, resp) = self.read_word(word_addr).await;
            if !resp.is_ok() {
                log::warn!("Read from {:#010x} answered with {:?}", word_addr, resp);
                return Err(AxiError::ReadResp { addr: word_addr, resp });
            }
            data.extend(unpack_word(word, first, n));
        }
        self.stats.with_mut(|s| s.reads += 1);
        log::info!("Read complete addr: {:#010x} data: {:02x?}", address, data);
        Ok(data)
    }

    pub async fn write_dword(&self, address: u64, value: u32) -> Result<(), AxiError> {
        self.write(address, &value.to_le_bytes()).await
    }

    pub async fn read_dword(&self, address: u64) -> Result<u32, AxiError> {
        let data = self.read(address, 4).await?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&data);
        Ok(u32::from_le_bytes(bytes))
    }

    async fn write_word(&self, addr: u64, word: u64, strb: u64) -> AxiResp {
        let bus = &self.bus;
        self.wait_reset_release().await;
        self.clk.rising_edge().await;
        bus.awaddr.set(addr);
        bus.awprot.set(0);
        bus.awvalid.set(1);
        bus.wdata.set(word);
        bus.wstrb.set(strb);
        bus.wvalid.set(1);
        bus.bready.set(1);

        let (mut aw_done, mut w_done) = (false, false);
        loop {
            self.clk.rising_edge().await;
            // sample the response before accepting address/data of this edge
            if aw_done && w_done && bus.bvalid.u32() == 1 {
                bus.bready.set(0);
                return AxiResp::from_bits(bus.bresp.u64());
            }
            if !aw_done && bus.awready.u32() == 1 {
                aw_done = true;
                bus.awvalid.set(0);
            }
            if !w_done && bus.wready.u32() == 1 {
                w_done = true;
                bus.wvalid.set(0);
            }
        }
    }

    async fn read_word(&self, addr: u64) -> (u64, AxiResp) {
        let bus = &self.bus;
        self.wait_reset_release().await;
        self.clk.rising_edge().await;
        bus.araddr.set(addr);
        bus.arprot.set(0);
        bus.arvalid.set(1);
        bus.rready.set(1);

        let mut ar_done = false;
        loop {
            self.clk.rising_edge().await;
            if ar_done && bus.rvalid.u32() == 1 {
                bus.rready.set(0);
                return (bus.rdata.u64(), AxiResp::from_bits(bus.rresp.u64()));
            }
            if !ar_done && bus.arready.u32() == 1 {
                ar_done = true;
                bus.arvalid.set(0);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusOp {
    Write,
    Read,
}

/// A completed transfer as seen on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusEvent {
    /// Simulation step of the clock edge completing the transfer.
    pub time: u64,
    pub op: BusOp,
    pub addr: u64,
    pub data: u64,
    pub resp: AxiResp,
}

/// Passive recorder of the write and read transfers on an AXI-Lite bus.
#[derive(Clone)]
pub struct AxiLiteMonitor {
    bus: AxiLiteBus,
    clk: SimObject,
    events: TbObj<Vec<BusEvent>>,
}

impl AxiLiteMonitor {
    pub fn new(bus: AxiLiteBus, clk: SimObject) -> Self {
        AxiLiteMonitor {
            bus,
            clk,
            events: TbObj::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.get().clone()
    }

    pub fn start(&self) -> JoinHandle {
        Task::fork(self.clone().run())
    }

    async fn run(self) -> TbResult {
        let bus = self.bus;
        let (mut aw, mut w, mut ar) = (None, None, None);
        loop {
            self.clk.rising_edge().await;
            let time = SIM_IF.get_sim_time_steps();
            if bus.bvalid.u32() == 1 && bus.bready.u32() == 1 {
                if let (Some(addr), Some(data)) = (aw.take(), w.take()) {
                    self.push(time, BusOp::Write, addr, data, bus.bresp.u64());
                }
            }
            if bus.awvalid.u32() == 1 && bus.awready.u32() == 1 {
                aw = Some(bus.awaddr.u64());
            }
            if bus.wvalid.u32() == 1 && bus.wready.u32() == 1 {
                w = Some(bus.wdata.u64());
            }
            if bus.rvalid.u32() == 1 && bus.rready.u32() == 1 {
                if let Some(addr) = ar.take() {
                    self.push(time, BusOp::Read, addr, bus.rdata.u64(), bus.rresp.u64());
                }
            }
            if bus.arvalid.u32() == 1 && bus.arready.u32() == 1 {
                ar = Some(bus.araddr.u64());
            }
        }
    }

    fn push(&self, time: u64, op: BusOp, addr: u64, data: u64, resp: u64) {
        let event = BusEvent {
            time,
            op,
            addr,
            data,
            resp: AxiResp::from_bits(resp),
        };
        log::debug!("Bus monitor: {:?}", event);
        self.events.with_mut(|e| e.push(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_dword_is_one_chunk() {
        assert_eq!(word_chunks(0, 4, 4), vec![(0, 0, 4)]);
        assert_eq!(word_chunks(12, 4, 4), vec![(12, 0, 4)]);
    }

    #[test]
    fn unaligned_ranges_split_at_word_boundaries() {
        assert_eq!(word_chunks(2, 5, 4), vec![(0, 2, 2), (4, 0, 3)]);
        assert_eq!(word_chunks(3, 1, 4), vec![(0, 3, 1)]);
        assert!(word_chunks(8, 0, 4).is_empty());
    }

    #[test]
    fn words_are_packed_lsb_first() {
        assert_eq!(pack_word(&170u32.to_le_bytes(), 0), (170, 0b1111));
        assert_eq!(pack_word(&[0xab, 0xcd], 2), (0xcdab_0000, 0b1100));
        assert_eq!(unpack_word(0x1122_3344, 0, 4), vec![0x44, 0x33, 0x22, 0x11]);
        assert_eq!(unpack_word(0x1122_3344, 1, 2), vec![0x33, 0x22]);
    }

    #[test]
    fn responses_decode_from_two_bits() {
        assert_eq!(AxiResp::from_bits(0), AxiResp::Okay);
        assert_eq!(AxiResp::from_bits(3), AxiResp::DecErr);
        assert!(AxiResp::ExOkay.is_ok());
        assert!(!AxiResp::SlvErr.is_ok());
        assert_eq!(AxiResp::SlvErr.bits(), 2);
    }
}
