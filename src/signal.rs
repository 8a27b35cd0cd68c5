use crate::sim_if::SIM_IF;
use crate::trigger::Trigger;
use crate::{fail_test, SimError, SimResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimObject {
    pub(crate) handle: usize,
    pub(crate) kind: ObjectKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Unsigned integer signal of the given bit width.
    Int(u32),
    Hier,
}

impl SimObject {
    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn name(&self) -> String {
        SIM_IF
            .get_full_name(self.handle)
            .unwrap_or_else(|_| format!("<handle {}>", self.handle))
    }

    /// Bit width of a signal, 0 for scopes.
    pub fn width(&self) -> u32 {
        match self.kind {
            ObjectKind::Int(width) => width,
            ObjectKind::Hier => 0,
        }
    }

    pub fn get_child(&self, name: &str) -> SimResult<Self> {
        let mut child_name = self.name();
        child_name.push('.');
        child_name.push_str(name);
        SimObject::from_name(&child_name)
    }

    pub fn from_handle(handle: usize) -> SimResult<Self> {
        Ok(SimObject {
            handle,
            kind: SIM_IF.get_kind(handle)?,
        })
    }

    pub fn from_name(full_name: &str) -> SimResult<Self> {
        let handle = SIM_IF.get_handle_by_name(full_name)?;
        SimObject::from_handle(handle)
    }

    pub fn get_root() -> SimResult<Self> {
        SimObject::from_handle(SIM_IF.get_root_handle()?)
    }

    /// Shorthand for `get_child` in testbench code; panics if the child is missing.
    pub fn c(&self, name: &str) -> Self {
        self.get_child(name)
            .unwrap_or_else(|_| panic!("Could not get object with name {}.{}", self.name(), name))
    }

    pub fn get(&self) -> SimResult<u64> {
        SIM_IF.get_value(self.handle)
    }

    pub fn u64(&self) -> u64 {
        self.get().unwrap_or_else(|e| {
            report(e);
            0
        })
    }

    pub fn u32(&self) -> u32 {
        self.u64() as u32
    }

    pub fn bin(&self) -> String {
        SIM_IF.get_value_bin(self.handle).unwrap_or_else(|e| {
            report(e);
            String::new()
        })
    }

    pub fn try_set(&self, val: u64) -> SimResult<()> {
        SIM_IF.set_value(self.handle, val)
    }

    /// Schedules `val` for the next delta cycle. A rejected write fails the
    /// running test.
    pub fn set(&self, val: u64) {
        if let Err(e) = self.try_set(val) {
            report(e);
        }
    }

    pub fn set_bin(&self, val: &str) {
        if let Err(e) = self.try_set_bin(val) {
            report(e);
        }
    }

    pub fn try_set_bin(&self, val: &str) -> SimResult<()> {
        // remove '_' and 0b
        let stripped = val.trim_start_matches("0b").replace('_', "");
        if stripped.len() != self.width() as usize || !stripped.chars().all(valid_char) {
            return Err(SimError::InvalidBinStr(val.to_string()));
        }
        let value = u64::from_str_radix(&stripped, 2)
            .map_err(|_| SimError::InvalidBinStr(val.to_string()))?;
        self.try_set(value)
    }

    // convenience functions to get edge triggers for this signal
    pub fn rising_edge(self) -> Trigger {
        Trigger::rising_edge(self)
    }
    pub async fn rising_edge_ro(self) {
        self.rising_edge().await;
        Trigger::read_only().await;
    }
    pub async fn rising_edge_rw(self) {
        self.rising_edge().await;
        Trigger::read_write().await;
    }
    pub fn falling_edge(self) -> Trigger {
        Trigger::falling_edge(self)
    }
    pub fn edge(self) -> Trigger {
        Trigger::edge(self)
    }
}

fn valid_char(c: char) -> bool {
    c == '0' || c == '1'
}

fn report(e: SimError) {
    log::error!("{}", e);
    fail_test(&e.to_string());
}
