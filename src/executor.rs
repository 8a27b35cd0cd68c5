use futures::{
    future::{BoxFuture, FutureExt},
    task::{waker_ref, ArcWake, Context, Poll},
};
use futures_channel::oneshot;
use queues::{IsQueue, Queue};
use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{TbError, TbResult};

thread_local! {
    static READY_QUEUE: RefCell<Queue<Arc<Task>>> = RefCell::new(Queue::new());
    // Bumped whenever a test is torn down. Tasks of an older epoch are never polled again.
    static EPOCH: Cell<u64> = Cell::new(0);
}

pub fn schedule_task(task: Arc<Task>) {
    READY_QUEUE.with(|q| {
        let _ = q.borrow_mut().add(task);
    });
}

fn next_task() -> Option<Arc<Task>> {
    READY_QUEUE.with(|q| q.borrow_mut().remove().ok())
}

pub(crate) fn clear_ready_queue() {
    READY_QUEUE.with(|q| *q.borrow_mut() = Queue::new());
}

pub(crate) fn next_epoch() {
    EPOCH.with(|e| e.set(e.get() + 1));
}

fn current_epoch() -> u64 {
    EPOCH.with(Cell::get)
}

#[inline]
pub fn run_once() {
    while let Some(task) = next_task() {
        process_task(task);
    }
}

#[inline]
fn process_task(task: Arc<Task>) {
    if task.is_stale() {
        // do not execute, will be dropped once all references disappear
        return;
    }

    let result = {
        let mut fut_slot = lock(&task.future);
        let Some(mut fut) = fut_slot.take() else {
            // woken after completion
            return;
        };
        let waker = waker_ref(&task);
        let context = &mut Context::from_waker(&*waker);
        match fut.as_mut().poll(context) {
            Poll::Pending => {
                *fut_slot = Some(fut);
                return;
            }
            Poll::Ready(result) => result,
        }
    };
    log::trace!("Task '{}' complete", task.name);
    let tx = lock(&task.join_tx).take();
    if let Some(tx) = tx {
        if let Err(Err(e)) = tx.send(result) {
            // nobody holds the JoinHandle, so nobody else will see this error
            log::error!("Task '{}' failed: {}", task.name, e);
            crate::fail_test(&format!("Task '{}' failed: {}", task.name, e));
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(PartialEq, Clone, Copy)]
enum TaskState {
    Pending,
    Cancelled,
}

pub struct Task {
    future: Mutex<Option<BoxFuture<'static, TbResult>>>,
    state: Mutex<TaskState>,
    // None for tasks surviving test teardown
    epoch: Option<u64>,
    name: String,
    join_tx: Mutex<Option<oneshot::Sender<TbResult>>>,
}

impl Task {
    pub fn fork(future: impl Future<Output = TbResult> + Send + 'static) -> JoinHandle {
        Task::spawn_from_future(future, "forked")
    }
    pub fn spawn_from_future(
        future: impl Future<Output = TbResult> + Send + 'static,
        name: &str,
    ) -> JoinHandle {
        Task::spawn(future.boxed(), name, Some(current_epoch()))
    }
    pub(crate) fn spawn_persistent(
        future: impl Future<Output = TbResult> + Send + 'static,
        name: &str,
    ) -> JoinHandle {
        Task::spawn(future.boxed(), name, None)
    }
    fn spawn(fut: BoxFuture<'static, TbResult>, name: &str, epoch: Option<u64>) -> JoinHandle {
        let (tx, rx) = oneshot::channel();
        let task = Arc::new(Task {
            future: Mutex::new(Some(fut)),
            state: Mutex::new(TaskState::Pending),
            epoch,
            name: name.to_string(),
            join_tx: Mutex::new(Some(tx)),
        });
        schedule_task(task.clone());
        JoinHandle {
            awaited_task: Some(task),
            join_rx: rx,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn cancel(&self) {
        // Executor will drop the Task without execution on its next wake-up
        *lock(&self.state) = TaskState::Cancelled;
        // a JoinHandle may keep the task alive, release whoever awaits it
        lock(&self.join_tx).take();
    }
    fn is_stale(&self) -> bool {
        *lock(&self.state) == TaskState::Cancelled
            || self.epoch.map_or(false, |e| e != current_epoch())
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        schedule_task(arc_self.clone());
    }
}

pub struct JoinHandle {
    awaited_task: Option<Arc<Task>>,
    join_rx: oneshot::Receiver<TbResult>,
}

impl JoinHandle {
    pub(crate) fn task(&self) -> Option<Arc<Task>> {
        self.awaited_task.clone()
    }
    pub fn cancel(mut self) {
        if let Some(task) = self.awaited_task.take() {
            task.cancel();
        }
    }
}

impl Future for JoinHandle {
    type Output = TbResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join_rx.poll_unpin(cx) {
            // sender dropped: the task was cancelled or torn down with its test
            Poll::Ready(result) => Poll::Ready(result.unwrap_or(Err(TbError::Cancelled))),
            Poll::Pending => Poll::Pending,
        }
    }
}
