use intmap::IntMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::executor;
use crate::signal::SimObject;
use crate::sim_if::{SimCallback, TimeUnit, SIM_IF};
use crate::SimResult;

struct CallbackHandles {
    handle: Option<usize>,
    callbacks: VecDeque<TrigShared>,
}

impl CallbackHandles {
    fn new() -> Self {
        CallbackHandles {
            handle: None,
            callbacks: VecDeque::new(),
        }
    }
}

struct TriggerMaps {
    // key is signal handle as u64
    edges: IntMap<CallbackHandles>,
    // key is absolute callback time
    timers: IntMap<CallbackHandles>,
    read_only: CallbackHandles,
    read_write: CallbackHandles,
}

thread_local! {
    static TRIGGERS: RefCell<TriggerMaps> = RefCell::new(TriggerMaps {
        edges: IntMap::new(),
        timers: IntMap::new(),
        read_only: CallbackHandles::new(),
        read_write: CallbackHandles::new(),
    });
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum EdgeKind {
    Any,
    Rising,
    Falling,
}

pub(crate) fn cancel_all_triggers() {
    let handles: Vec<usize> = TRIGGERS.with(|t| {
        let mut t = t.borrow_mut();
        let t = &mut *t;
        let mut handles = Vec::new();
        handles.extend(t.read_only.handle.take());
        t.read_only.callbacks.clear();
        handles.extend(t.read_write.handle.take());
        t.read_write.callbacks.clear();
        for map in [&mut t.timers, &mut t.edges] {
            // TrigShared wakers are dropped with the maps
            let old = std::mem::replace(map, IntMap::new());
            handles.extend(old.values().filter_map(|cb| cb.handle));
        }
        handles
    });
    for handle in handles {
        if let Err(e) = SIM_IF.cancel_callback(handle) {
            log::debug!("Cancelling callback {}: {}", handle, e);
        }
    }
}

struct TrigShared {
    waker: Waker,
    fired: Arc<AtomicBool>,
    // If trigger is an edge, react needs to know if it waits for a rising or falling
    // edge so an existing callback does not have to be rescheduled.
    edge_kind: EdgeKind,
}

impl TrigShared {
    fn wake(self) {
        self.fired.store(true, Ordering::Release);
        self.waker.wake();
    }
}

#[derive(Clone, Copy, Debug)]
enum TrigKind {
    Edge(usize, EdgeKind),
    Timer(u64),
    ReadWrite,
    ReadOnly,
}

/// A simulator event a task can await. Each trigger is awaited once.
pub struct Trigger {
    kind: TrigKind,
    fired: Option<Arc<AtomicBool>>,
}

impl Trigger {
    fn new(kind: TrigKind) -> Self {
        Trigger { kind, fired: None }
    }
    pub fn timer(time: u64, unit: TimeUnit) -> Self {
        Trigger::new(TrigKind::Timer(SIM_IF.get_sim_steps(time as f64, unit)))
    }
    pub fn timer_steps(steps: u64) -> Self {
        Trigger::new(TrigKind::Timer(steps))
    }
    pub async fn timer_ro(time: u64, unit: TimeUnit) {
        Trigger::timer(time, unit).await;
        Trigger::read_only().await;
    }
    pub async fn timer_rw(time: u64, unit: TimeUnit) {
        Trigger::timer(time, unit).await;
        Trigger::read_write().await;
    }
    pub fn edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Any))
    }
    pub fn rising_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Rising))
    }
    pub fn falling_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Falling))
    }
    pub fn read_write() -> Self {
        Trigger::new(TrigKind::ReadWrite)
    }
    pub fn read_only() -> Self {
        Trigger::new(TrigKind::ReadOnly)
    }
}

impl Future for Trigger {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(fired) = &self.fired {
            // polled again: either the simulator event woke us, or the task was
            // woken by something else while we are still waiting
            return match fired.load(Ordering::Acquire) {
                true => Poll::Ready(()),
                false => Poll::Pending,
            };
        }

        let fired = Arc::new(AtomicBool::new(false));
        self.fired = Some(fired.clone());
        let shared = TrigShared {
            waker: cx.waker().clone(),
            fired,
            edge_kind: EdgeKind::Any,
        };
        if let Err(e) = register(self.kind, shared) {
            log::error!("Could not register trigger {:?}: {}", self.kind, e);
            crate::fail_test(&format!("Could not register trigger: {}", e));
        }
        Poll::Pending
    }
}

fn register(kind: TrigKind, mut shared: TrigShared) -> SimResult<()> {
    TRIGGERS.with(|t| {
        let mut t = t.borrow_mut();
        match kind {
            TrigKind::ReadWrite => {
                t.read_write.callbacks.push_back(shared);
                if t.read_write.handle.is_none() {
                    let cb_hdl = SIM_IF.register_callback(SimCallback::ReadWrite)?;
                    t.read_write.handle.replace(cb_hdl);
                }
            }
            TrigKind::ReadOnly => {
                t.read_only.callbacks.push_back(shared);
                if t.read_only.handle.is_none() {
                    let cb_hdl = SIM_IF.register_callback(SimCallback::ReadOnly)?;
                    t.read_only.handle.replace(cb_hdl);
                }
            }
            TrigKind::Timer(steps) => {
                // Key on absolute time, since the simulator reports absolute time back
                let abs_time = steps + SIM_IF.get_sim_time_steps();
                if let Some(callbacks) = t.timers.get_mut(abs_time) {
                    callbacks.callbacks.push_back(shared);
                } else {
                    let handle = SIM_IF.register_callback(SimCallback::Time(steps))?;
                    let mut callbacks = CallbackHandles::new();
                    callbacks.handle = Some(handle);
                    callbacks.callbacks.push_back(shared);
                    t.timers.insert(abs_time, callbacks);
                }
            }
            TrigKind::Edge(sig_hdl, edge_kind) => {
                shared.edge_kind = edge_kind;
                if let Some(callbacks) = t.edges.get_mut(sig_hdl as u64) {
                    callbacks.callbacks.push_back(shared);
                } else {
                    let handle = SIM_IF.register_callback(SimCallback::Edge(sig_hdl))?;
                    let mut callbacks = CallbackHandles::new();
                    callbacks.handle = Some(handle);
                    callbacks.callbacks.push_back(shared);
                    t.edges.insert(sig_hdl as u64, callbacks);
                }
            }
        }
        Ok(())
    })
}

/// Wakes the triggers waiting for `cb` and runs the woken tasks.
pub(crate) fn react(cb: SimCallback, edge: Option<EdgeKind>) {
    let mut to_cancel = None;
    let wake: VecDeque<TrigShared> = TRIGGERS.with(|t| {
        let mut t = t.borrow_mut();
        match cb {
            SimCallback::ReadWrite => {
                t.read_write.handle = None; // callback is done
                std::mem::take(&mut t.read_write.callbacks)
            }
            SimCallback::ReadOnly => {
                t.read_only.handle = None;
                std::mem::take(&mut t.read_only.callbacks)
            }
            SimCallback::Time(t_abs) => t
                .timers
                .remove(t_abs)
                .map(|callbacks| callbacks.callbacks)
                .unwrap_or_default(),
            SimCallback::Edge(sig_hdl) => {
                let Some(mut callbacks) = t.edges.remove(sig_hdl as u64) else {
                    return VecDeque::new();
                };
                let edge = edge.unwrap_or(EdgeKind::Any);
                let (wake, resched): (VecDeque<_>, VecDeque<_>) = callbacks
                    .callbacks
                    .drain(..)
                    .partition(|trig| trig.edge_kind == EdgeKind::Any || trig.edge_kind == edge);
                if resched.is_empty() {
                    // no callbacks are remaining, cancel
                    to_cancel = callbacks.handle;
                } else {
                    callbacks.callbacks = resched;
                    t.edges.insert(sig_hdl as u64, callbacks);
                }
                wake
            }
        }
    });

    if let Some(handle) = to_cancel {
        if let Err(e) = SIM_IF.cancel_callback(handle) {
            log::debug!("Cancelling callback {}: {}", handle, e);
        }
    }
    if !wake.is_empty() {
        for shared in wake {
            shared.wake();
        }
        // execute woken tasks
        executor::run_once();
    }
}
