//! Stimulus for the AXI-Lite MIDI peripheral.
//!
//! `read_write` is the regular scenario. The other scenarios extend it with
//! read-back checks and MIDI input and are only run when selected explicitly.

use crate::axil::{AxiLiteBus, AxiLiteMaster};
use crate::prelude::*;
use crate::testbench::Clock;
use crate::uart::UartSource;

/// Timing and stimulus of one scenario run.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadWriteConfig {
    pub clk_period_ns: f64,
    pub reset_ns: u64,
    pub settle_cycles: u32,
    pub baud: u32,
    pub data_bits: u32,
    pub address: u64,
    pub value: u32,
}

impl Default for ReadWriteConfig {
    fn default() -> Self {
        ReadWriteConfig {
            clk_period_ns: 44.286,
            reset_ns: 20,
            settle_cycles: 300,
            baud: 31250,
            data_bits: 8,
            address: 0,
            value: 170,
        }
    }
}

/// Drives `reset_n` low for `duration`, then releases it. The device is not
/// checked for having left reset.
pub async fn reset_dut(reset_n: SimObject, duration: u64, unit: TimeUnit) {
    reset_n.set(0);
    Trigger::timer(duration, unit).await;
    reset_n.set(1);
}

/// Clock, bus master and MIDI source bound to the peripheral's ports.
pub struct Harness {
    pub clk: SimObject,
    pub reset_n: SimObject,
    pub midi_intr: SimObject,
    pub master: AxiLiteMaster,
    pub midi: UartSource,
}

impl Harness {
    /// Starts the bus clock high and builds the bus master and MIDI source.
    pub fn new(dut: SimObject, cfg: &ReadWriteConfig) -> Result<Self, TbError> {
        let clk = dut.get_child("s_axi_aclk")?;
        let reset_n = dut.get_child("s_axi_aresetn")?;
        // the first rising edge lands while reset is asserted
        Clock::new(clk, cfg.clk_period_ns, TimeUnit::Ns)
            .start_high()
            .start();

        let midi = UartSource::new(dut.get_child("midi_in")?, cfg.baud, cfg.data_bits)?;
        let bus = AxiLiteBus::from_prefix(dut, "s_axi")?;
        let master = AxiLiteMaster::new(bus, clk, Some(reset_n), false)?;
        Ok(Harness {
            clk,
            reset_n,
            midi_intr: dut.get_child("midi_intr")?,
            master,
            midi,
        })
    }

    pub async fn reset(&self, cfg: &ReadWriteConfig) {
        reset_dut(self.reset_n, cfg.reset_ns, TimeUnit::Ns).await;
    }

    pub async fn settle(&self, cfg: &ReadWriteConfig) -> TbResult {
        utils::clock_cycles(self.clk, cfg.settle_cycles).await
    }
}

/// Reset, one write, one read and the settle period. Returns the bytes read.
pub async fn run_read_write(dut: SimObject, cfg: &ReadWriteConfig) -> Result<Vec<u8>, TbError> {
    let tb = Harness::new(dut, cfg)?;
    tb.reset(cfg).await;

    tb.master.write(cfg.address, &cfg.value.to_le_bytes()).await?;
    let data = tb.master.read(cfg.address, 4).await?;
    tb.settle(cfg).await?;

    log::info!("Test done");
    Ok(data)
}

pub async fn read_write(dut: SimObject) -> TbResult {
    let data = run_read_write(dut, &ReadWriteConfig::default()).await?;
    Ok(Val::Bytes(data))
}

/// `read_write` plus a check of the value read back.
pub async fn read_write_checked(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let data = run_read_write(dut, &cfg).await?;
    let expected = cfg.value.to_le_bytes();
    if data != expected {
        return Err(TbError::Failed(format!(
            "Read back {:02x?} from {:#x}, expected {:02x?}",
            data, cfg.address, expected
        )));
    }
    Ok(Val::Bytes(data))
}

/// Sends a MIDI byte, waits for the interrupt and reads the byte from register 0.
pub async fn midi_to_register(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let byte = cfg.value as u8;
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    let midi = tb.midi.clone();
    let tx = Task::fork(async move {
        midi.write(&[byte]).await?;
        Ok::<_, TbError>(Val::None)
    });
    tb.midi_intr.rising_edge().await;
    log::info!("MIDI interrupt");
    tx.await?;

    let value = tb.master.read_dword(0).await?;
    if value != byte as u32 {
        return Err(TbError::Failed(format!(
            "Register 0 holds {:#x} after receiving {:#x}",
            value, byte
        )));
    }
    tb.settle(&cfg).await?;
    Ok(Val::Int(value as i64))
}

/// Write, read back and settle for the remaining registers.
pub async fn register_sweep(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    for (address, value) in [(4u64, 171u32), (8, 172), (12, 173)] {
        tb.master.write_dword(address, value).await?;
        let read = tb.master.read_dword(address).await?;
        if read != value {
            return Err(TbError::Failed(format!(
                "Read back {} from {:#x}, expected {}",
                read, address, value
            )));
        }
        tb.settle(&cfg).await?;
    }
    log::info!("Test done");
    Ok(Val::None)
}
