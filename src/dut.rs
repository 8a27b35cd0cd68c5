//! Behavioural model of the AXI-Lite MIDI peripheral.
//!
//! The bus side follows the usual AXI-Lite slave template: registered ready
//! and valid flags, one outstanding transfer per direction, synchronous
//! active-low reset. The MIDI side is an 8N1 receiver running on the bus clock.

use crate::axil::{axil_ports, AxiLiteBus, AxiResp};
use crate::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct PeripheralConfig {
    pub axi_prefix: String,
    pub addr_width: u32,
    pub num_regs: usize,
    /// Bus clock cycles per MIDI bit.
    pub clks_per_bit: u32,
    pub data_bits: u32,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        PeripheralConfig {
            axi_prefix: "s_axi".to_string(),
            addr_width: 4,
            num_regs: 4,
            clks_per_bit: 723,
            data_bits: 8,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Ports {
    clk: SimObject,
    aresetn: SimObject,
    bus: AxiLiteBus,
    midi_in: SimObject,
    midi_intr: SimObject,
}

#[derive(Clone, Debug)]
pub struct MidiAxiPeripheral {
    config: PeripheralConfig,
    ports: TbObj<Option<Ports>>,
    regs: TbObj<Vec<u32>>,
    received: TbObj<Vec<u8>>,
    framing_errors: TbObj<u32>,
}

impl Default for MidiAxiPeripheral {
    fn default() -> Self {
        MidiAxiPeripheral::new(PeripheralConfig::default())
    }
}

impl MidiAxiPeripheral {
    pub fn new(config: PeripheralConfig) -> Self {
        let regs = vec![0; config.num_regs];
        MidiAxiPeripheral {
            config,
            ports: TbObj::new(None),
            regs: TbObj::new(regs),
            received: TbObj::new(Vec::new()),
            framing_errors: TbObj::new(0),
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn register(&self, index: usize) -> Option<u32> {
        self.regs.get().get(index).copied()
    }

    /// Bytes received on `midi_in` during the current test.
    pub fn received(&self) -> Vec<u8> {
        self.received.get().clone()
    }

    pub fn framing_errors(&self) -> u32 {
        *self.framing_errors.get()
    }

    async fn axi_slave(self, p: Ports) -> TbResult {
        let mut state = SlaveState::default();
        loop {
            p.clk.rising_edge().await;
            let inputs = SlaveInputs::sample(&p.bus, p.aresetn);
            self.regs.with_mut(|regs| state.clock(&inputs, regs));
            state.drive(&p.bus);
        }
    }

    async fn midi_rx(self, p: Ports) -> TbResult {
        let cpb = self.config.clks_per_bit;
        loop {
            p.clk.rising_edge().await;
            if p.aresetn.u32() == 0 || p.midi_in.u32() != 0 {
                continue;
            }
            // confirm the start bit in its middle
            utils::clock_cycles(p.clk, cpb / 2).await?;
            if p.midi_in.u32() != 0 {
                continue;
            }
            let mut byte = 0u32;
            for i in 0..self.config.data_bits {
                utils::clock_cycles(p.clk, cpb).await?;
                byte |= p.midi_in.u32() << i;
            }
            utils::clock_cycles(p.clk, cpb).await?;
            if p.midi_in.u32() != 1 {
                log::warn!("MIDI framing error, dropped byte {:#04x}", byte);
                self.framing_errors.with_mut(|n| *n += 1);
                continue;
            }
            log::debug!("MIDI received {:#04x}", byte);
            self.received.with_mut(|r| r.push(byte as u8));
            self.regs.with_mut(|regs| {
                if let Some(r) = regs.first_mut() {
                    *r = byte;
                }
            });
            p.midi_intr.set(1);
            p.clk.rising_edge().await;
            p.midi_intr.set(0);
        }
    }
}

impl HdlModel for MidiAxiPeripheral {
    fn elaborate(&self, top: &Scope) -> SimResult<()> {
        let prefix = &self.config.axi_prefix;
        let clk = top.signal(&format!("{}_aclk", prefix), 1)?;
        let aresetn = top.signal_init(&format!("{}_aresetn", prefix), 1, 1)?;
        for (name, width) in axil_ports(self.config.addr_width, 32) {
            top.signal(&format!("{}_{}", prefix, name), width)?;
        }
        let midi_in = top.signal_init("midi_in", 1, 1)?;
        let midi_intr = top.signal("midi_intr", 1)?;
        let bus = AxiLiteBus::from_prefix(top.object(), prefix)?;
        self.ports.with_mut(|p| {
            *p = Some(Ports {
                clk,
                aresetn,
                bus,
                midi_in,
                midi_intr,
            })
        });
        Ok(())
    }

    fn start(&self, _top: SimObject) {
        let ports = *self.ports.get();
        let p = match ports {
            Some(p) => p,
            None => {
                fail_test("Peripheral started before elaboration");
                return;
            }
        };
        // power-on state
        self.regs.with_mut(|r| r.iter_mut().for_each(|v| *v = 0));
        self.received.with_mut(Vec::clear);
        self.framing_errors.with_mut(|n| *n = 0);

        Task::fork(self.clone().axi_slave(p));
        Task::fork(self.clone().midi_rx(p));
    }
}

/// Merges `data` into `old` for every byte lane enabled in `strb`.
pub(crate) fn apply_strobe(old: u32, data: u32, strb: u64) -> u32 {
    (0..4).fold(old, |acc, lane| {
        if strb & (1 << lane) != 0 {
            let mask = 0xffu32 << (8 * lane);
            (acc & !mask) | (data & mask)
        } else {
            acc
        }
    })
}

#[derive(Clone, Copy, Debug, Default)]
struct SlaveInputs {
    resetn: bool,
    awvalid: bool,
    awaddr: u64,
    wvalid: bool,
    wdata: u64,
    wstrb: u64,
    bready: bool,
    arvalid: bool,
    araddr: u64,
    rready: bool,
}

impl SlaveInputs {
    fn sample(bus: &AxiLiteBus, aresetn: SimObject) -> Self {
        SlaveInputs {
            resetn: aresetn.u32() == 1,
            awvalid: bus.awvalid.u32() == 1,
            awaddr: bus.awaddr.u64(),
            wvalid: bus.wvalid.u32() == 1,
            wdata: bus.wdata.u64(),
            wstrb: bus.wstrb.u64(),
            bready: bus.bready.u32() == 1,
            arvalid: bus.arvalid.u32() == 1,
            araddr: bus.araddr.u64(),
            rready: bus.rready.u32() == 1,
        }
    }
}

/// Registered outputs and internal state of the slave interface.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SlaveState {
    awready: bool,
    wready: bool,
    bvalid: bool,
    bresp: AxiResp,
    arready: bool,
    rvalid: bool,
    rresp: AxiResp,
    rdata: u32,
    aw_en: bool,
    awaddr: u64,
    araddr: u64,
}

impl Default for SlaveState {
    fn default() -> Self {
        SlaveState {
            awready: false,
            wready: false,
            bvalid: false,
            bresp: AxiResp::Okay,
            arready: false,
            rvalid: false,
            rresp: AxiResp::Okay,
            rdata: 0,
            aw_en: true,
            awaddr: 0,
            araddr: 0,
        }
    }
}

impl SlaveState {
    /// One rising clock edge. All decisions use the state from before the edge.
    fn clock(&mut self, i: &SlaveInputs, regs: &mut [u32]) {
        if !i.resetn {
            *self = SlaveState::default();
            regs.iter_mut().for_each(|r| *r = 0);
            return;
        }
        let old = *self;

        self.awready = !old.awready && i.awvalid && i.wvalid && old.aw_en;
        if self.awready {
            self.aw_en = false;
            self.awaddr = i.awaddr;
        } else if i.bready && old.bvalid {
            self.aw_en = true;
        }
        self.wready = !old.wready && i.wvalid && i.awvalid && old.aw_en;

        let wren = old.wready && i.wvalid && old.awready && i.awvalid;
        if wren && !old.bvalid {
            self.bvalid = true;
            self.bresp = match regs.get_mut(reg_index(old.awaddr)) {
                Some(r) => {
                    *r = apply_strobe(*r, i.wdata as u32, i.wstrb);
                    AxiResp::Okay
                }
                None => AxiResp::DecErr,
            };
        } else if i.bready && old.bvalid {
            self.bvalid = false;
        }

        self.arready = !old.arready && i.arvalid;
        if self.arready {
            self.araddr = i.araddr;
        }
        let rden = old.arready && i.arvalid && !old.rvalid;
        if rden {
            self.rvalid = true;
            let (rdata, rresp) = match regs.get(reg_index(old.araddr)) {
                Some(r) => (*r, AxiResp::Okay),
                None => (0, AxiResp::DecErr),
            };
            self.rdata = rdata;
            self.rresp = rresp;
        } else if old.rvalid && i.rready {
            self.rvalid = false;
        }
    }

    fn drive(&self, bus: &AxiLiteBus) {
        bus.awready.set(self.awready as u64);
        bus.wready.set(self.wready as u64);
        bus.bvalid.set(self.bvalid as u64);
        bus.bresp.set(self.bresp.bits());
        bus.arready.set(self.arready as u64);
        bus.rvalid.set(self.rvalid as u64);
        bus.rresp.set(self.rresp.bits());
        bus.rdata.set(self.rdata as u64);
    }
}

fn reg_index(addr: u64) -> usize {
    (addr >> 2) as usize
}
