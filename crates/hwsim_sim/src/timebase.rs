//! The discrete-event scheduler and its cooperative task executor.
//!
//! Pending wakeups live in a min-heap keyed by `(SimTime, sequence)`. The
//! sequence number breaks ties, so entries scheduled for the same instant
//! pop in insertion order. Each entry either runs a one-shot callback or
//! wakes a parked [`Sleep`] future.
//!
//! Tasks are boxed futures polled on the single simulation thread. A task
//! parks by returning `Pending` from one of the primitives (sleep, channel,
//! lock, event); the primitive keeps its waker and the task becomes ready
//! again when the waker fires. Ready tasks run at the end of every
//! [`Timebase::advance`], before the next pop.
//!
//! A zero-duration wait lands on the next delta of the current instant;
//! positive waits land on delta 0 of a later instant. Every delta of an
//! instant therefore drains before time moves on.

use crate::error::SimError;
use crate::time::SimTime;
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// A boxed task future.
pub type Task = Pin<Box<dyn Future<Output = Result<(), SimError>>>>;

type Callback = Box<dyn FnOnce() -> Result<(), SimError>>;

struct WaitSlot {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

enum Action {
    Callback(Callback),
    Waiter(Rc<WaitSlot>),
}

struct Entry {
    at: SimTime,
    seq: u64,
    action: Action,
}

impl Entry {
    fn key(&self) -> (SimTime, u64) {
        (self.at, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type ReadyQueue = Arc<Mutex<VecDeque<u64>>>;

struct TaskWaker {
    id: u64,
    ready: ReadyQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match self.ready.lock() {
            Ok(mut q) => q.push_back(self.id),
            Err(poisoned) => poisoned.into_inner().push_back(self.id),
        }
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// A waker that does nothing. Used to poll bodies that must not suspend.
pub fn noop_waker() -> Waker {
    Waker::from(Arc::new(NoopWake))
}

/// Polls `fut` exactly once. `None` means it suspended.
pub fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Option<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match fut.poll(&mut cx) {
        Poll::Ready(v) => Some(v),
        Poll::Pending => None,
    }
}

struct Inner {
    now: Cell<SimTime>,
    seq: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<Entry>>>,
    tasks: RefCell<HashMap<u64, Task>>,
    next_task: Cell<u64>,
    running: Cell<Option<u64>>,
    cancelled: RefCell<HashSet<u64>>,
    ready: ReadyQueue,
    stopped: Cell<bool>,
}

/// The simulation scheduler. Cloning yields another handle to the same
/// scheduler.
#[derive(Clone)]
pub struct Timebase {
    inner: Rc<Inner>,
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timebase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timebase")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

impl Timebase {
    /// A scheduler at time zero with nothing pending.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                now: Cell::new(SimTime::zero()),
                seq: Cell::new(0),
                heap: RefCell::new(BinaryHeap::new()),
                tasks: RefCell::new(HashMap::new()),
                next_task: Cell::new(0),
                running: Cell::new(None),
                cancelled: RefCell::new(HashSet::new()),
                ready: Arc::new(Mutex::new(VecDeque::new())),
                stopped: Cell::new(false),
            }),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.inner.now.get()
    }

    /// Number of scheduled heap entries.
    pub fn pending(&self) -> usize {
        self.inner.heap.borrow().len()
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len() + usize::from(self.inner.running.get().is_some())
    }

    fn target(&self, delay_fs: u64) -> SimTime {
        let now = self.now();
        if delay_fs == 0 {
            now.next_delta()
        } else {
            now.after(delay_fs)
        }
    }

    fn push(&self, at: SimTime, action: Action) {
        let seq = self.inner.seq.get();
        self.inner.seq.set(seq + 1);
        log::trace!("schedule #{seq} at {at}");
        self.inner
            .heap
            .borrow_mut()
            .push(Reverse(Entry { at, seq, action }));
    }

    /// Suspends the calling task for `delay_fs` femtoseconds. Zero yields to
    /// the next delta step.
    pub fn wait(&self, delay_fs: u64) -> Sleep {
        Sleep {
            timebase: self.clone(),
            delay_fs,
            slot: None,
        }
    }

    /// Suspends the calling task until the next delta step.
    pub fn wait_delta(&self) -> Sleep {
        self.wait(0)
    }

    /// Runs `callback` once `delay_fs` femtoseconds from now. No task is
    /// created.
    pub fn after(&self, delay_fs: u64, callback: impl FnOnce() -> Result<(), SimError> + 'static) {
        self.push(self.target(delay_fs), Action::Callback(Box::new(callback)));
    }

    /// Starts a task. It first runs at the next [`Timebase::run_ready`].
    pub fn spawn(&self, fut: impl Future<Output = Result<(), SimError>> + 'static) -> TaskHandle {
        let id = self.inner.next_task.get();
        self.inner.next_task.set(id + 1);
        self.inner.tasks.borrow_mut().insert(id, Box::pin(fut));
        self.enqueue(id);
        TaskHandle {
            id,
            timebase: self.clone(),
        }
    }

    fn enqueue(&self, id: u64) {
        match self.inner.ready.lock() {
            Ok(mut q) => q.push_back(id),
            Err(poisoned) => poisoned.into_inner().push_back(id),
        }
    }

    fn next_ready(&self) -> Option<u64> {
        match self.inner.ready.lock() {
            Ok(mut q) => q.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    /// Polls every ready task until none is ready. Returns the first task
    /// error.
    pub fn run_ready(&self) -> Result<(), SimError> {
        let mut first_err = None;
        while let Some(id) = self.next_ready() {
            let Some(mut task) = self.inner.tasks.borrow_mut().remove(&id) else {
                continue;
            };
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                ready: Arc::clone(&self.inner.ready),
            }));
            let mut cx = Context::from_waker(&waker);
            self.inner.running.set(Some(id));
            let poll = task.as_mut().poll(&mut cx);
            self.inner.running.set(None);
            let cancelled = self.inner.cancelled.borrow_mut().remove(&id);
            match poll {
                Poll::Ready(Ok(())) => log::trace!("task {id} finished"),
                Poll::Ready(Err(e)) => {
                    log::debug!("task {id} failed: {e}");
                    first_err.get_or_insert(e);
                }
                Poll::Pending if cancelled => log::trace!("task {id} cancelled itself"),
                Poll::Pending => {
                    self.inner.tasks.borrow_mut().insert(id, task);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pops every entry at the earliest scheduled time, moves `now` there,
    /// runs callbacks and wakes parked tasks in insertion order, then runs
    /// the woken tasks. Returns whether entries remain.
    pub fn advance(&self) -> Result<bool, SimError> {
        self.run_ready()?;
        let batch = {
            let mut heap = self.inner.heap.borrow_mut();
            let Some(Reverse(head)) = heap.peek() else {
                return Ok(false);
            };
            let at = head.at;
            let mut batch = Vec::new();
            while heap.peek().is_some_and(|Reverse(e)| e.at == at) {
                if let Some(Reverse(e)) = heap.pop() {
                    batch.push(e);
                }
            }
            self.inner.now.set(at);
            batch
        };
        log::trace!("advance to {} ({} entries)", self.now(), batch.len());

        let mut first_err = None;
        for entry in batch {
            match entry.action {
                Action::Callback(cb) => {
                    if let Err(e) = cb() {
                        first_err.get_or_insert(e);
                    }
                }
                Action::Waiter(slot) => {
                    slot.fired.set(true);
                    let waker = slot.waker.borrow_mut().take();
                    if let Some(w) = waker {
                        w.wake();
                    }
                }
            }
        }
        let ran = self.run_ready();
        if let Some(e) = first_err {
            return Err(e);
        }
        ran?;
        Ok(self.pending() > 0)
    }

    /// Advances until the queue is empty, the next entry lies beyond
    /// `end_fs`, or [`Timebase::stop`] is called. Time then reads `end_fs`
    /// unless stopped earlier.
    pub fn run_until(&self, end_fs: u64) -> Result<(), SimError> {
        self.inner.stopped.set(false);
        self.run_ready()?;
        loop {
            if self.inner.stopped.get() {
                return Ok(());
            }
            let next = self
                .inner
                .heap
                .borrow()
                .peek()
                .map(|Reverse(e)| e.at.fs);
            match next {
                Some(fs) if fs <= end_fs => {
                    self.advance()?;
                }
                _ => break,
            }
        }
        if self.now().fs < end_fs {
            self.inner.now.set(SimTime::from_fs(end_fs));
        }
        Ok(())
    }

    /// Makes a running [`Timebase::run_until`] return after the current
    /// step.
    pub fn stop(&self) {
        self.inner.stopped.set(true);
    }

    /// Drops every task and pending entry. Time is left unchanged.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        drop(tasks);
        let heap = std::mem::take(&mut *self.inner.heap.borrow_mut());
        drop(heap);
        self.inner.cancelled.borrow_mut().clear();
    }

    fn cancel_task(&self, id: u64) {
        let task = self.inner.tasks.borrow_mut().remove(&id);
        if task.is_none() && self.inner.running.get() == Some(id) {
            self.inner.cancelled.borrow_mut().insert(id);
        }
        drop(task);
    }

    fn is_live(&self, id: u64) -> bool {
        self.inner.running.get() == Some(id) || self.inner.tasks.borrow().contains_key(&id)
    }

    fn remove_waiter(&self, slot: &Rc<WaitSlot>) {
        self.inner
            .heap
            .borrow_mut()
            .retain(|Reverse(e)| !matches!(&e.action, Action::Waiter(s) if Rc::ptr_eq(s, slot)));
    }
}

/// Handle to a spawned task.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    timebase: Timebase,
}

impl TaskHandle {
    /// Drops the task's future. Everything it was parked on forgets it.
    pub fn cancel(&self) {
        self.timebase.cancel_task(self.id);
    }

    /// Returns `true` once the task finished, failed or was cancelled.
    pub fn is_done(&self) -> bool {
        !self.timebase.is_live(self.id)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskHandle({})", self.id)
    }
}

/// Future returned by [`Timebase::wait`].
pub struct Sleep {
    timebase: Timebase,
    delay_fs: u64,
    slot: Option<Rc<WaitSlot>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &this.slot {
            None => {
                let slot = Rc::new(WaitSlot {
                    fired: Cell::new(false),
                    waker: RefCell::new(Some(cx.waker().clone())),
                });
                let at = this.timebase.target(this.delay_fs);
                this.timebase.push(at, Action::Waiter(Rc::clone(&slot)));
                this.slot = Some(slot);
                Poll::Pending
            }
            Some(slot) if slot.fired.get() => Poll::Ready(()),
            Some(slot) => {
                *slot.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(slot) = &self.slot {
            if !slot.fired.get() {
                self.timebase.remove_waiter(slot);
            }
        }
    }
}
