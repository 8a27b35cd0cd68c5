//! In-process two-state simulator.
//!
//! Stands in for an HDL simulator behind [`SimIf`]: designs are Rust models that
//! declare their ports at elaboration and run as tasks on the testbench
//! executor. Writes are deferred to the next delta cycle, so every process
//! reacting to a clock edge samples the values from before that edge.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use intmap::IntMap;

use crate::signal::{ObjectKind, SimObject};
use crate::sim_if::{ldexp10, SimCallback, SimIf};
use crate::trigger::{self, EdgeKind};
use crate::{SimError, SimResult};

/// A design model elaborated into the simulator.
pub trait HdlModel: Send + Sync {
    /// Declares the model's ports below `top`.
    fn elaborate(&self, top: &Scope) -> SimResult<()>;
    /// Forks the model's processes. Called at the start of every test, since
    /// tearing a test down drops all of its tasks.
    fn start(&self, top: SimObject);
}

/// Handle used during elaboration to declare objects in a scope.
#[derive(Clone, Copy, Debug)]
pub struct Scope {
    handle: usize,
}

impl Scope {
    pub fn root() -> SimResult<Self> {
        Model.get_root_handle().map(|handle| Scope { handle })
    }

    pub fn object(&self) -> SimObject {
        SimObject {
            handle: self.handle,
            kind: ObjectKind::Hier,
        }
    }

    pub fn scope(&self, name: &str) -> SimResult<Scope> {
        let handle = with_kernel(|k| k.declare(self.handle, name, ObjectKind::Hier, 0))?;
        Ok(Scope { handle })
    }

    pub fn signal(&self, name: &str, width: u32) -> SimResult<SimObject> {
        self.signal_init(name, width, 0)
    }

    pub fn signal_init(&self, name: &str, width: u32, init: u64) -> SimResult<SimObject> {
        if width == 0 || width > 64 {
            return Err(SimError::UnsupportedWidth(width));
        }
        let kind = ObjectKind::Int(width);
        let handle = with_kernel(|k| k.declare(self.handle, name, kind, init))?;
        Ok(SimObject { handle, kind })
    }
}

struct Object {
    name: String,
    kind: ObjectKind,
    value: u64,
}

enum Callback {
    Time(u64),
    Edge(usize),
    ReadWrite,
    ReadOnly,
}

struct Kernel {
    objects: Vec<Object>,
    names: HashMap<String, usize>,
    // ordered so commits (and therefore edge delivery) are deterministic
    pending: BTreeMap<usize, u64>,
    next_cb: usize,
    callbacks: IntMap<Callback>,
    timers: BTreeMap<u64, Vec<usize>>,
    edges: IntMap<usize>,
    read_write: Option<usize>,
    read_only: Option<usize>,
    in_read_only: bool,
}

thread_local! {
    static KERNEL: RefCell<Kernel> = RefCell::new(Kernel::new());
    // kept outside KERNEL so the logger can read them at any time
    static NOW: Cell<u64> = Cell::new(0);
    static PRECISION: Cell<i8> = Cell::new(-12);
}

fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    KERNEL.with(|k| f(&mut k.borrow_mut()))
}

impl Kernel {
    fn new() -> Self {
        Kernel {
            objects: Vec::new(),
            names: HashMap::new(),
            pending: BTreeMap::new(),
            next_cb: 1,
            callbacks: IntMap::new(),
            timers: BTreeMap::new(),
            edges: IntMap::new(),
            read_write: None,
            read_only: None,
            in_read_only: false,
        }
    }

    fn declare(
        &mut self,
        parent: usize,
        name: &str,
        kind: ObjectKind,
        init: u64,
    ) -> SimResult<usize> {
        let parent = self.object(parent)?;
        if parent.kind != ObjectKind::Hier {
            return Err(SimError::NotAValue(parent.name.clone()));
        }
        let full_name = format!("{}.{}", parent.name, name);
        self.insert(full_name, kind, init)
    }

    fn insert(&mut self, full_name: String, kind: ObjectKind, init: u64) -> SimResult<usize> {
        if self.names.contains_key(&full_name) {
            return Err(SimError::Redeclared(full_name));
        }
        if let ObjectKind::Int(width) = kind {
            check_width(&full_name, width, init)?;
        }
        let handle = self.objects.len();
        self.names.insert(full_name.clone(), handle);
        self.objects.push(Object {
            name: full_name,
            kind,
            value: init,
        });
        Ok(handle)
    }

    fn object(&self, handle: usize) -> SimResult<&Object> {
        self.objects.get(handle).ok_or(SimError::InvalidHandle(handle))
    }

    fn signal(&self, handle: usize) -> SimResult<(&Object, u32)> {
        let obj = self.object(handle)?;
        match obj.kind {
            ObjectKind::Int(width) => Ok((obj, width)),
            ObjectKind::Hier => Err(SimError::NotAValue(obj.name.clone())),
        }
    }

    fn new_cb_hdl(&mut self, cb: Callback) -> usize {
        let hdl = self.next_cb;
        self.next_cb += 1;
        self.callbacks.insert(hdl as u64, cb);
        hdl
    }

    /// Applies all pending writes. Returns the signals whose value changed and
    /// which edge that was.
    fn commit(&mut self) -> Vec<(usize, EdgeKind)> {
        let pending = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        for (handle, value) in pending {
            if let Some(obj) = self.objects.get_mut(handle) {
                if obj.value != value {
                    let edge = match obj.kind {
                        ObjectKind::Int(1) if value == 1 => EdgeKind::Rising,
                        ObjectKind::Int(1) => EdgeKind::Falling,
                        _ => EdgeKind::Any,
                    };
                    obj.value = value;
                    events.push((handle, edge));
                }
            }
        }
        events
    }

    fn take_read_write(&mut self) -> bool {
        match self.read_write.take() {
            Some(hdl) => {
                self.callbacks.remove(hdl as u64);
                true
            }
            None => false,
        }
    }

    fn take_read_only(&mut self) -> bool {
        match self.read_only.take() {
            Some(hdl) => {
                self.callbacks.remove(hdl as u64);
                true
            }
            None => false,
        }
    }

    fn take_next_timer(&mut self) -> Option<u64> {
        let t = *self.timers.keys().next()?;
        for hdl in self.timers.remove(&t).unwrap_or_default() {
            self.callbacks.remove(hdl as u64);
        }
        Some(t)
    }
}

fn check_width(name: &str, width: u32, value: u64) -> SimResult<()> {
    if width < 64 && value >> width != 0 {
        Err(SimError::ValueTooWide {
            name: name.to_string(),
            value,
            width,
        })
    } else {
        Ok(())
    }
}

/// The [`SimIf`] implementation backed by the thread's kernel.
pub struct Model;

impl SimIf for Model {
    fn set_value(&self, handle: usize, value: u64) -> SimResult<()> {
        with_kernel(|k| {
            let (obj, width) = k.signal(handle)?;
            if k.in_read_only {
                return Err(SimError::ReadOnlyWrite(obj.name.clone()));
            }
            check_width(&obj.name, width, value)?;
            k.pending.insert(handle, value);
            Ok(())
        })
    }

    fn get_value(&self, handle: usize) -> SimResult<u64> {
        with_kernel(|k| k.signal(handle).map(|(obj, _)| obj.value))
    }

    fn get_value_bin(&self, handle: usize) -> SimResult<String> {
        with_kernel(|k| {
            let (obj, width) = k.signal(handle)?;
            Ok(format!("{:0width$b}", obj.value, width = width as usize))
        })
    }

    fn get_handle_by_name(&self, name: &str) -> SimResult<usize> {
        with_kernel(|k| {
            k.names
                .get(name)
                .copied()
                .ok_or_else(|| SimError::UnknownObject(name.to_string()))
        })
    }

    fn get_kind(&self, handle: usize) -> SimResult<ObjectKind> {
        with_kernel(|k| k.object(handle).map(|obj| obj.kind))
    }

    fn get_full_name(&self, handle: usize) -> SimResult<String> {
        with_kernel(|k| k.object(handle).map(|obj| obj.name.clone()))
    }

    fn get_root_handle(&self) -> SimResult<usize> {
        with_kernel(|k| k.object(0).map(|_| 0))
    }

    fn get_sim_time_steps(&self) -> u64 {
        NOW.with(Cell::get)
    }

    fn get_sim_precision(&self) -> i8 {
        PRECISION.with(Cell::get)
    }

    fn register_callback(&self, cb: SimCallback) -> SimResult<usize> {
        with_kernel(|k| match cb {
            SimCallback::Time(t) => {
                let t_abs = t + NOW.with(Cell::get);
                let hdl = k.new_cb_hdl(Callback::Time(t_abs));
                k.timers.entry(t_abs).or_default().push(hdl);
                Ok(hdl)
            }
            SimCallback::Edge(sig_hdl) => {
                k.signal(sig_hdl)?;
                let hdl = k.new_cb_hdl(Callback::Edge(sig_hdl));
                if let Some(old) = k.edges.insert(sig_hdl as u64, hdl) {
                    k.callbacks.remove(old as u64);
                }
                Ok(hdl)
            }
            SimCallback::ReadWrite => {
                let hdl = k.new_cb_hdl(Callback::ReadWrite);
                if let Some(old) = k.read_write.replace(hdl) {
                    k.callbacks.remove(old as u64);
                }
                Ok(hdl)
            }
            SimCallback::ReadOnly => {
                let hdl = k.new_cb_hdl(Callback::ReadOnly);
                if let Some(old) = k.read_only.replace(hdl) {
                    k.callbacks.remove(old as u64);
                }
                Ok(hdl)
            }
        })
    }

    fn cancel_callback(&self, cb_hdl: usize) -> SimResult<()> {
        with_kernel(|k| {
            let cb = k
                .callbacks
                .remove(cb_hdl as u64)
                .ok_or(SimError::UnknownCallback(cb_hdl))?;
            match cb {
                Callback::Time(t_abs) => {
                    if let Some(hdls) = k.timers.get_mut(&t_abs) {
                        hdls.retain(|h| *h != cb_hdl);
                        if hdls.is_empty() {
                            k.timers.remove(&t_abs);
                        }
                    }
                }
                Callback::Edge(sig_hdl) => {
                    if k.edges.get(sig_hdl as u64) == Some(&cb_hdl) {
                        k.edges.remove(sig_hdl as u64);
                    }
                }
                Callback::ReadWrite => {
                    if k.read_write == Some(cb_hdl) {
                        k.read_write = None;
                    }
                }
                Callback::ReadOnly => {
                    if k.read_only == Some(cb_hdl) {
                        k.read_only = None;
                    }
                }
            }
            Ok(())
        })
    }

    fn log(&self, msg: &str) {
        log::info!(target: "sim", "{}", msg);
    }
}

/// Replaces the thread's kernel by an empty one holding only the top scope.
pub(crate) fn reset(top: &str, precision: i8) -> SimResult<()> {
    NOW.with(|n| n.set(0));
    PRECISION.with(|p| p.set(precision));
    with_kernel(|k| {
        *k = Kernel::new();
        k.insert(top.to_string(), ObjectKind::Hier, 0).map(|_| ())
    })
}

/// Current simulation time in ns, for log records.
pub(crate) fn now_ns() -> f64 {
    let steps = NOW.with(Cell::get) as f64;
    ldexp10(steps, PRECISION.with(Cell::get) + 9)
}

/// Runs the simulation until no timer is left.
pub(crate) fn run(max_deltas: u32) -> SimResult<()> {
    // start-up tasks were only queued so far
    crate::executor::run_once();
    loop {
        settle(max_deltas)?;

        let read_only = with_kernel(|k| {
            let fire = k.take_read_only();
            k.in_read_only = fire;
            fire
        });
        if read_only {
            trigger::react(SimCallback::ReadOnly, None);
            with_kernel(|k| k.in_read_only = false);
        }

        if with_kernel(|k| k.read_write.is_some() || !k.pending.is_empty()) {
            continue;
        }
        match with_kernel(Kernel::take_next_timer) {
            Some(t) => {
                NOW.with(|n| n.set(t));
                trigger::react(SimCallback::Time(t), None);
            }
            None => break,
        }
    }
    log::debug!("No more events, simulation ends");
    Ok(())
}

/// Runs delta cycles at the current time until no signal changes any more.
fn settle(max_deltas: u32) -> SimResult<()> {
    let mut deltas = 0;
    loop {
        let events = with_kernel(Kernel::commit);
        if events.is_empty() && !with_kernel(Kernel::take_read_write) {
            return Ok(());
        }
        deltas += 1;
        if deltas > max_deltas {
            return Err(SimError::DeltaOverflow {
                deltas: max_deltas,
                time: NOW.with(Cell::get),
            });
        }
        if events.is_empty() {
            trigger::react(SimCallback::ReadWrite, None);
            continue;
        }
        for (sig_hdl, edge) in events {
            if with_kernel(|k| k.edges.contains_key(sig_hdl as u64)) {
                trigger::react(SimCallback::Edge(sig_hdl), Some(edge));
            }
        }
    }
}
