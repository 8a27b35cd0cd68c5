use axil_midi_tb::dut::MidiAxiPeripheral;
use axil_midi_tb::scenario::read_write;

// Specify tests to be executed
axil_midi_tb::run_with_model!(MidiAxiPeripheral::default(); read_write);
