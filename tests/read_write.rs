use std::cell::RefCell;
use std::sync::Arc;

use axil_midi_tb::axil::{AxiLiteBus, AxiLiteMonitor, AxiResp, BusEvent, BusOp};
use axil_midi_tb::dut::MidiAxiPeripheral;
use axil_midi_tb::prelude::*;
use axil_midi_tb::scenario::{self, ReadWriteConfig};
use axil_midi_tb::TestFn;
use futures::future::BoxFuture;

const PERIOD_STEPS: u64 = 44_286;

#[derive(Clone, Debug, Default, PartialEq)]
struct Trace {
    reset: Vec<(u64, u64)>,
    edges_in_reset: Vec<u64>,
    intr_rising: u32,
    bus: Vec<BusEvent>,
    read: Vec<u8>,
    end: u64,
}

thread_local! {
    static TRACE: RefCell<Trace> = RefCell::new(Trace::default());
}

async fn watch_reset(reset_n: SimObject) -> TbResult {
    loop {
        reset_n.edge().await;
        let sample = (SIM_IF.get_sim_time_steps(), reset_n.u64());
        TRACE.with(|t| t.borrow_mut().reset.push(sample));
    }
}

async fn watch_edges_in_reset(clk: SimObject, reset_n: SimObject) -> TbResult {
    loop {
        clk.rising_edge().await;
        if reset_n.u64() == 0 {
            let now = SIM_IF.get_sim_time_steps();
            TRACE.with(|t| t.borrow_mut().edges_in_reset.push(now));
        }
    }
}

async fn watch_intr(intr: SimObject) -> TbResult {
    loop {
        intr.rising_edge().await;
        TRACE.with(|t| t.borrow_mut().intr_rising += 1);
    }
}

async fn traced(dut: SimObject, cfg: ReadWriteConfig) -> TbResult {
    Task::fork(watch_reset(dut.c("s_axi_aresetn")));
    Task::fork(watch_intr(dut.c("midi_intr")));
    Task::fork(watch_edges_in_reset(dut.c("s_axi_aclk"), dut.c("s_axi_aresetn")));
    let bus = AxiLiteBus::from_prefix(dut, "s_axi")?;
    let monitor = AxiLiteMonitor::new(bus, dut.c("s_axi_aclk"));
    monitor.start();

    let read = scenario::run_read_write(dut, &cfg).await?;

    let end = SIM_IF.get_sim_time_steps();
    TRACE.with(|t| {
        let mut t = t.borrow_mut();
        t.bus = monitor.events();
        t.read = read.clone();
        t.end = end;
    });
    Ok(Val::Bytes(read))
}

fn traced_read_write(dut: SimObject) -> BoxFuture<'static, TbResult> {
    traced(dut, ReadWriteConfig::default()).boxed()
}

fn traced_byte_order(dut: SimObject) -> BoxFuture<'static, TbResult> {
    let cfg = ReadWriteConfig {
        value: 0x1122_3344,
        ..Default::default()
    };
    traced(dut, cfg).boxed()
}

fn run_traced(name: &str, test: TestFn, periph: &MidiAxiPeripheral) -> (Vec<TestSummary>, Trace) {
    TRACE.with(|t| *t.borrow_mut() = Trace::default());
    let mut tests = TbTests::new();
    tests.push(Test::new(name.to_string(), test));
    let model: Arc<dyn HdlModel> = Arc::new(periph.clone());
    let summaries = run(&SimConfig::default(), vec![model], tests).unwrap();
    (summaries, TRACE.with(|t| t.borrow().clone()))
}

#[test]
fn reset_is_low_for_the_hold_time() {
    let (summaries, trace) = run_traced("reset", traced_read_write, &MidiAxiPeripheral::default());
    assert!(summaries[0].passed);
    assert_eq!(trace.reset, vec![(0, 0), (20_000, 1)]);
}

#[test]
fn clock_rises_while_reset_is_asserted() {
    let periph = MidiAxiPeripheral::default();
    let (summaries, trace) = run_traced("reset_edge", traced_read_write, &periph);
    assert!(summaries[0].passed);
    // the clock starts high, the 20 ns reset ends before the second edge
    assert_eq!(trace.edges_in_reset, vec![0]);
}

#[test]
fn value_written_is_read_back() {
    let periph = MidiAxiPeripheral::default();
    let (summaries, trace) = run_traced("read_back", traced_read_write, &periph);
    assert!(summaries[0].passed, "{}", summaries[0].message);
    assert_eq!(trace.read, vec![170, 0, 0, 0]);
    assert_eq!(periph.register(0), Some(170));
}

#[test]
fn settles_for_300_cycles_after_the_read() {
    let (_, trace) = run_traced("settle", traced_read_write, &MidiAxiPeripheral::default());
    let read = trace.bus.iter().find(|e| e.op == BusOp::Read).unwrap();
    assert_eq!(trace.end - read.time, 300 * PERIOD_STEPS);
}

#[test]
fn one_write_one_read_and_no_interrupt() {
    let (_, trace) = run_traced("single", traced_read_write, &MidiAxiPeripheral::default());
    let ops: Vec<_> = trace.bus.iter().map(|e| (e.op, e.addr, e.data, e.resp)).collect();
    assert_eq!(
        ops,
        vec![
            (BusOp::Write, 0, 170, AxiResp::Okay),
            (BusOp::Read, 0, 170, AxiResp::Okay)
        ]
    );
    assert!(trace.bus[0].time < trace.bus[1].time);
    assert_eq!(trace.intr_rising, 0);
}

#[test]
fn reruns_produce_identical_traces() {
    let periph = MidiAxiPeripheral::default();
    let (_, first) = run_traced("first", traced_read_write, &periph);
    let (_, second) = run_traced("second", traced_read_write, &periph);
    assert!(!first.bus.is_empty());
    assert_eq!(first, second);
}

#[test]
fn bytes_go_lsb_first() {
    let periph = MidiAxiPeripheral::default();
    let (summaries, trace) = run_traced("byte_order", traced_byte_order, &periph);
    assert!(summaries[0].passed);
    assert_eq!(trace.read, vec![0x44, 0x33, 0x22, 0x11]);
    assert_eq!(trace.bus[0].data, 0x1122_3344);
    assert_eq!(periph.register(0), Some(0x1122_3344));
}

#[test]
fn main_scenario_passes_and_writes_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.xml");
    let config = SimConfig {
        results_file: Some(path.clone()),
        ..Default::default()
    };
    let mut tests = TbTests::new();
    tests.push(Test::new("read_write".to_string(), |dut| {
        scenario::read_write(dut).boxed()
    }));
    let model: Arc<dyn HdlModel> = Arc::new(MidiAxiPeripheral::default());
    let summaries = run(&config, vec![model], tests).unwrap();

    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].passed);
    assert_eq!(summaries[0].message, format!("{:?}", Val::Bytes(vec![170, 0, 0, 0])));
    let xml = std::fs::read_to_string(path).unwrap();
    assert!(xml.contains("read_write"));
}
