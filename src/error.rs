use thiserror::Error;

use crate::axil::AxiError;
use crate::uart::UartError;

/// Errors reported by the simulator interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("No object named '{0}'")]
    UnknownObject(String),
    #[error("Invalid object handle {0}")]
    InvalidHandle(usize),
    #[error("Object '{0}' declared twice")]
    Redeclared(String),
    #[error("Object '{0}' does not carry a value")]
    NotAValue(String),
    #[error("Value {value:#x} does not fit into {width} bit(s) of '{name}'")]
    ValueTooWide { name: String, value: u64, width: u32 },
    #[error("Unsupported signal width {0}, must be 1 to 64 bits")]
    UnsupportedWidth(u32),
    #[error("Invalid binary string '{0}'")]
    InvalidBinStr(String),
    #[error("Unknown time unit '{0}'")]
    UnknownTimeUnit(String),
    #[error("No callback registered with handle {0}")]
    UnknownCallback(usize),
    #[error("Can't write '{0}' during the read-only phase")]
    ReadOnlyWrite(String),
    #[error("Design did not settle after {deltas} delta cycles at step {time}")]
    DeltaOverflow { deltas: u32, time: u64 },
}

/// Errors ending a test. Everything a test or a forked task can fail with
/// converts into this type, so scenarios propagate with `?`.
#[derive(Error, Debug)]
pub enum TbError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Axi(#[from] AxiError),
    #[error(transparent)]
    Uart(#[from] UartError),
    #[error("{0}")]
    Failed(String),
    #[error("Task was cancelled before completion")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Could not write test report: {0}")]
    Report(String),
}
