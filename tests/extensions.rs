use std::sync::Arc;

use axil_midi_tb::axil::{AxiError, AxiLiteBus, AxiLiteMaster, AxiLiteMonitor, AxiResp, BusOp};
use axil_midi_tb::dut::{MidiAxiPeripheral, PeripheralConfig};
use axil_midi_tb::prelude::*;
use axil_midi_tb::scenario::{self, reset_dut, Harness, ReadWriteConfig};
use axil_midi_tb::uart::{UartError, UartSource};
use axil_midi_tb::TestFn;
use futures::future::BoxFuture;

fn test(name: &str, generator: TestFn) -> Test {
    Test::new(name.to_string(), generator)
}

fn run_tests(periph: &MidiAxiPeripheral, tests: Vec<Test>) -> Vec<TestSummary> {
    let mut tb_tests = TbTests::new();
    for t in tests {
        tb_tests.push(t);
    }
    let model: Arc<dyn HdlModel> = Arc::new(periph.clone());
    run(&SimConfig::default(), vec![model], tb_tests).unwrap()
}

fn check(cond: bool, msg: &str) -> Result<(), TbError> {
    match cond {
        true => Ok(()),
        false => Err(TbError::Failed(msg.to_string())),
    }
}

fn read_write_checked(dut: SimObject) -> BoxFuture<'static, TbResult> {
    scenario::read_write_checked(dut).boxed()
}

fn midi_to_register(dut: SimObject) -> BoxFuture<'static, TbResult> {
    scenario::midi_to_register(dut).boxed()
}

fn register_sweep(dut: SimObject) -> BoxFuture<'static, TbResult> {
    scenario::register_sweep(dut).boxed()
}

async fn decode_errors(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    match tb.master.write_dword(0x8, 1).await {
        Err(AxiError::WriteResp { addr: 0x8, resp: AxiResp::DecErr }) => {}
        other => return Err(TbError::Failed(format!("write answered {:?}", other))),
    }
    match tb.master.read_dword(0xc).await {
        Err(AxiError::ReadResp { addr: 0xc, resp: AxiResp::DecErr }) => {}
        other => return Err(TbError::Failed(format!("read answered {:?}", other))),
    }
    // in-range registers still work
    tb.master.write_dword(0x4, 0xdead_beef).await?;
    let value = tb.master.read_dword(0x4).await?;
    Ok(Val::Int(value as i64))
}

async fn random_registers(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    let values: Vec<u32> = (0..4).map(|_| utils::rand_word()).collect();
    for (i, value) in values.iter().enumerate() {
        tb.master.write_dword(4 * i as u64, *value).await?;
    }
    for (i, value) in values.iter().enumerate() {
        let read = tb.master.read_dword(4 * i as u64).await?;
        if read != *value {
            return Err(TbError::Failed(format!(
                "register {} read {:#x}, wrote {:#x}",
                i, read, value
            )));
        }
    }
    // unaligned access touching two registers
    tb.master.write(0x6, &[0xa5, 0x5a]).await?;
    let bytes = tb.master.read(0x6, 2).await?;
    if bytes != [0xa5, 0x5a] {
        return Err(TbError::Failed(format!("unaligned read returned {:02x?}", bytes)));
    }
    let stats = tb.master.stats();
    Ok(Val::Int((stats.writes + stats.reads) as i64))
}

async fn reset_clears_registers(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    tb.master.write_dword(0x4, 0x55).await?;
    check(tb.master.read_dword(0x4).await? == 0x55, "write before reset lost")?;
    // longer than a clock period, so reset spans a rising edge
    reset_dut(tb.reset_n, 50, TimeUnit::Ns).await;
    let value = tb.master.read_dword(0x4).await?;
    Ok(Val::Int(value as i64))
}

async fn serial_config_errors(dut: SimObject) -> TbResult {
    let midi_in = dut.c("midi_in");
    check(
        matches!(UartSource::new(midi_in, 31250, 4), Err(UartError::DataBits(4))),
        "4 data bits accepted",
    )?;
    check(
        matches!(UartSource::new(midi_in, 31250, 10), Err(UartError::DataBits(10))),
        "10 data bits accepted",
    )?;
    check(
        matches!(UartSource::new(midi_in, 0, 8), Err(UartError::Baud)),
        "zero baud accepted",
    )?;
    let seven_bit = UartSource::new(midi_in, 31250, 7)?;
    match seven_bit.write(&[0x80]).await {
        Err(UartError::ByteTooWide { byte: 0x80, bits: 7 }) => {}
        other => return Err(TbError::Failed(format!("7-bit write answered {:?}", other))),
    }
    check(midi_in.u64() == 1, "line left idle")?;

    let bus = AxiLiteBus::from_prefix(dut, "s_axi")?;
    let narrow = AxiLiteBus {
        wdata: midi_in,
        ..bus
    };
    let master = AxiLiteMaster::new(narrow, dut.c("s_axi_aclk"), None, false);
    check(matches!(master, Err(AxiError::DataWidth(1))), "1-bit data bus accepted")?;
    Ok(Val::None)
}

async fn concurrent_writes(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    let monitor = AxiLiteMonitor::new(AxiLiteBus::from_prefix(dut, "s_axi")?, tb.clk);
    monitor.start();
    tb.reset(&cfg).await;

    let (first, second) = (tb.master.clone(), tb.master.clone());
    let a = Task::fork(async move {
        first.write_dword(0, 1).await?;
        Ok::<_, TbError>(Val::None)
    });
    let b = Task::fork(async move {
        second.write_dword(0, 2).await?;
        Ok::<_, TbError>(Val::None)
    });
    a.await?;
    b.await?;

    let writes: Vec<_> = monitor
        .events()
        .into_iter()
        .filter(|e| e.op == BusOp::Write)
        .collect();
    check(writes.len() == 2, "expected two write transfers")?;
    check(writes[0].data == 1 && writes[1].data == 2, "writes out of order")?;
    check(writes[0].time < writes[1].time, "writes overlapped")?;
    check(tb.master.read_dword(0).await? == 2, "last write did not win")?;
    check(tb.master.stats().writes == 2, "write count")?;
    Ok(Val::None)
}

async fn framing_error_then_good_byte(dut: SimObject) -> TbResult {
    let cfg = ReadWriteConfig::default();
    let tb = Harness::new(dut, &cfg)?;
    tb.reset(&cfg).await;

    // low through the stop bit sample, 9.6 bit times
    let midi_in = dut.c("midi_in");
    midi_in.set(0);
    Trigger::timer(307_200, TimeUnit::Ns).await;
    midi_in.set(1);
    Trigger::timer(50, TimeUnit::Us).await;

    let midi = tb.midi.clone();
    let tx = Task::fork(async move {
        midi.write(&[0x42]).await?;
        Ok::<_, TbError>(Val::None)
    });
    tb.midi_intr.rising_edge().await;
    tx.await?;
    let value = tb.master.read_dword(0).await?;
    Ok(Val::Int(value as i64))
}

#[test]
fn read_back_check_passes() {
    let summaries = run_tests(
        &MidiAxiPeripheral::default(),
        vec![test("checked", read_write_checked)],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
}

#[test]
fn midi_byte_lands_in_register_zero() {
    let periph = MidiAxiPeripheral::default();
    let summaries = run_tests(&periph, vec![test("midi", midi_to_register)]);
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(summaries[0].message, format!("{:?}", Val::Int(170)));
    assert_eq!(periph.received(), vec![170]);
    assert_eq!(periph.framing_errors(), 0);
    assert_eq!(periph.register(0), Some(170));
}

#[test]
fn sweep_fills_the_remaining_registers() {
    let periph = MidiAxiPeripheral::default();
    let summaries = run_tests(&periph, vec![test("sweep", register_sweep)]);
    assert!(summaries[0].passed, "{}", summaries[0].message);
    let regs: Vec<_> = (0..4).filter_map(|i| periph.register(i)).collect();
    assert_eq!(regs, vec![0, 171, 172, 173]);
}

#[test]
fn addresses_beyond_the_register_file_fail() {
    let periph = MidiAxiPeripheral::new(PeripheralConfig {
        num_regs: 2,
        ..Default::default()
    });
    let summaries = run_tests(&periph, vec![test("decerr", |dut| decode_errors(dut).boxed())]);
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(summaries[0].message, format!("{:?}", Val::Int(0xdead_beef)));
}

#[test]
fn failing_test_does_not_stop_the_next_one() {
    let periph = MidiAxiPeripheral::new(PeripheralConfig {
        num_regs: 2,
        ..Default::default()
    });
    let summaries = run_tests(
        &periph,
        vec![test("sweep", register_sweep), test("checked", read_write_checked)],
    );
    assert_eq!(summaries.len(), 2);
    assert!(!summaries[0].passed);
    assert!(summaries[0].message.contains("DecErr"), "{}", summaries[0].message);
    assert!(summaries[1].passed, "{}", summaries[1].message);
    assert_eq!(periph.register(0), Some(170));
}

#[test]
fn random_register_values_read_back() {
    let summaries = run_tests(
        &MidiAxiPeripheral::default(),
        vec![test("random", |dut| random_registers(dut).boxed())],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
    // four dword writes, four dword reads, one write and one read of two bytes
    assert_eq!(summaries[0].message, format!("{:?}", Val::Int(10)));
}

#[test]
fn reset_clears_a_written_register() {
    let periph = MidiAxiPeripheral::default();
    let summaries = run_tests(
        &periph,
        vec![test("reset", |dut| reset_clears_registers(dut).boxed())],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(summaries[0].message, format!("{:?}", Val::Int(0)));
    assert_eq!(periph.register(1), Some(0));
}

#[test]
fn invalid_serial_and_bus_setups_are_rejected() {
    let summaries = run_tests(
        &MidiAxiPeripheral::default(),
        vec![test("config", |dut| serial_config_errors(dut).boxed())],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
}

#[test]
fn concurrent_writers_are_serialised() {
    let periph = MidiAxiPeripheral::default();
    let summaries = run_tests(
        &periph,
        vec![test("concurrent", |dut| concurrent_writes(dut).boxed())],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(periph.register(0), Some(2));
}

#[test]
fn framing_error_is_counted_and_the_next_byte_received() {
    let periph = MidiAxiPeripheral::default();
    let summaries = run_tests(
        &periph,
        vec![test("framing", |dut| framing_error_then_good_byte(dut).boxed())],
    );
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(summaries[0].message, format!("{:?}", Val::Int(0x42)));
    assert_eq!(periph.framing_errors(), 1);
    assert_eq!(periph.received(), vec![0x42]);
}
