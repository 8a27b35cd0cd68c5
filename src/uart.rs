//! UART transmitter driving a serial line, 8N1 style with configurable data bits.

use futures::lock::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::prelude::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UartError {
    #[error("Unsupported UART frame of {0} data bits")]
    DataBits(u32),
    #[error("Byte {byte:#x} does not fit into {bits} data bits")]
    ByteTooWide { byte: u8, bits: u32 },
    #[error("Baud rate must be non-zero")]
    Baud,
}

/// Line levels of one frame: start bit, data bits LSB first, stop bit.
pub(crate) fn frame_bits(byte: u8, bits: u32) -> Vec<u64> {
    let mut frame = Vec::with_capacity(bits as usize + 2);
    frame.push(0);
    frame.extend((0..bits).map(|i| (byte as u64 >> i) & 1));
    frame.push(1);
    frame
}

#[derive(Clone)]
pub struct UartSource {
    line: SimObject,
    bits: u32,
    bit_steps: u64,
    lock: Arc<Mutex<()>>,
}

impl UartSource {
    pub fn new(line: SimObject, baud: u32, bits: u32) -> Result<Self, UartError> {
        if !(5..=9).contains(&bits) {
            return Err(UartError::DataBits(bits));
        }
        if baud == 0 {
            return Err(UartError::Baud);
        }
        let bit_steps = SIM_IF.get_sim_steps(1e9 / baud as f64, TimeUnit::Ns);
        line.set(1);
        Ok(UartSource {
            line,
            bits,
            bit_steps,
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn bit_steps(&self) -> u64 {
        self.bit_steps
    }

    /// Sends `data` back to back. Concurrent writers are serialised.
    pub async fn write(&self, data: &[u8]) -> Result<(), UartError> {
        let _guard = self.lock.lock().await;
        for &byte in data {
            if self.bits < 8 && byte >> self.bits != 0 {
                return Err(UartError::ByteTooWide {
                    byte,
                    bits: self.bits,
                });
            }
            log::debug!("UART write {:#04x} on {}", byte, self.line.name());
            for level in frame_bits(byte, self.bits) {
                self.line.set(level);
                Trigger::timer_steps(self.bit_steps).await;
            }
        }
        Ok(())
    }
}
