use std::fmt;
use std::str::FromStr;

use crate::kernel::Model;
use crate::signal::ObjectKind;
use crate::{SimError, SimResult};

/// The simulator backing the running testbench.
pub static SIM_IF: &(dyn SimIf + Sync) = &Model;

/// Callback requests handed to the simulator. `Time` carries a delay relative to
/// the current time when registering; the simulator reports it back with the
/// absolute time at which it fired.
#[derive(Debug, Hash, Clone, Copy, Eq, PartialEq)]
pub enum SimCallback {
    Time(u64),
    Edge(usize),
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    Sec,
}

impl TimeUnit {
    pub fn exponent(self) -> i8 {
        match self {
            TimeUnit::Fs => -15,
            TimeUnit::Ps => -12,
            TimeUnit::Ns => -9,
            TimeUnit::Us => -6,
            TimeUnit::Ms => -3,
            TimeUnit::Sec => 0,
        }
    }

    pub fn from_exponent(exp: i8) -> Option<Self> {
        match exp {
            -15 => Some(TimeUnit::Fs),
            -12 => Some(TimeUnit::Ps),
            -9 => Some(TimeUnit::Ns),
            -6 => Some(TimeUnit::Us),
            -3 => Some(TimeUnit::Ms),
            0 => Some(TimeUnit::Sec),
            _ => None,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "sec" | "s" => Ok(TimeUnit::Sec),
            _ => Err(SimError::UnknownTimeUnit(s.to_string())),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::Sec => "sec",
        };
        f.write_str(s)
    }
}

pub trait SimIf {
    fn set_value(&self, handle: usize, value: u64) -> SimResult<()>;
    fn get_value(&self, handle: usize) -> SimResult<u64>;
    fn get_value_bin(&self, handle: usize) -> SimResult<String>;
    fn get_handle_by_name(&self, name: &str) -> SimResult<usize>;
    fn get_kind(&self, handle: usize) -> SimResult<ObjectKind>;
    fn get_full_name(&self, handle: usize) -> SimResult<String>;
    fn get_root_handle(&self) -> SimResult<usize>;
    fn get_sim_time_steps(&self) -> u64;
    fn get_sim_precision(&self) -> i8;
    fn register_callback(&self, cb: SimCallback) -> SimResult<usize>;
    fn cancel_callback(&self, cb_hdl: usize) -> SimResult<()>;
    fn log(&self, msg: &str);

    fn get_sim_time(&self, unit: TimeUnit) -> f64 {
        // this function does not preserve precision, so don't use carelessly
        let t = self.get_sim_time_steps() as f64;
        ldexp10(t, self.get_sim_precision() - unit.exponent())
    }

    fn get_sim_steps(&self, time: f64, unit: TimeUnit) -> u64 {
        let precision = self.get_sim_precision();
        steps_at_precision(time, unit, precision)
    }
}

pub(crate) fn steps_at_precision(time: f64, unit: TimeUnit, precision: i8) -> u64 {
    let steps = ldexp10(time, unit.exponent() - precision);
    let rounded = steps.round();
    // tolerate float noise such as 44.286 * 1000 = 44286.000000000004
    if (steps - rounded).abs() > 1e-6 * rounded.max(1.0) {
        log::warn!(
            "Time {} {} is not a multiple of the simulation precision ({}), rounded to {} steps",
            time,
            unit,
            TimeUnit::from_exponent(precision)
                .map(|u| u.to_string())
                .unwrap_or_else(|| format!("1e{}", precision)),
            rounded
        );
    }
    rounded.max(0.0) as u64
}

/// Like math.ldexp, but base 10.
pub(crate) fn ldexp10(frac: f64, exp: i8) -> f64 {
    if exp >= 0 {
        frac * 10_u64.pow(exp as u32) as f64
    } else {
        let div = 10_u64.pow(-exp as u32) as f64;
        frac / div
    }
}
