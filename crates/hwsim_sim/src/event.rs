//! Level-sensitive event flags with an optional callback.

use crate::error::SimError;
use crate::timebase::Timebase;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A boxed future produced by a task callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), SimError>>>>;

/// What runs when an event is set.
#[derive(Clone)]
pub enum EventCallback {
    /// Runs to completion inside `set`.
    Immediate(Rc<dyn Fn() -> Result<(), SimError>>),
    /// Produces a future that is spawned as a new task on every `set`.
    Task(Rc<dyn Fn() -> CallbackFuture>),
}

impl fmt::Debug for EventCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCallback::Immediate(_) => f.write_str("Immediate"),
            EventCallback::Task(_) => f.write_str("Task"),
        }
    }
}

#[derive(Default)]
struct EventState {
    flag: bool,
    generation: u64,
    next_ticket: u64,
    waiters: Vec<(u64, Waker)>,
    callback: Option<EventCallback>,
}

struct EventInner {
    state: RefCell<EventState>,
    timebase: Timebase,
}

/// An event flag. Clones share the same event.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.borrow();
        write!(f, "Event(set={}, waiters={})", st.flag, st.waiters.len())
    }
}

impl Event {
    /// A cleared event whose task callbacks run on `timebase`.
    pub fn new(timebase: Timebase) -> Self {
        Self {
            inner: Rc::new(EventInner {
                state: RefCell::new(EventState::default()),
                timebase,
            }),
        }
    }

    /// Returns `true` while the flag is set.
    pub fn is_set(&self) -> bool {
        self.inner.state.borrow().flag
    }

    /// Returns `true` if both handles refer to the same event.
    pub fn same_event(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs the callback. Only one callback may be bound.
    pub fn bind_callback(&self, callback: EventCallback) -> Result<(), SimError> {
        let mut st = self.inner.state.borrow_mut();
        if st.callback.is_some() {
            return Err(SimError::CallbackAlreadyBound);
        }
        st.callback = Some(callback);
        Ok(())
    }

    /// Sets the flag, wakes every waiter and runs the callback.
    pub fn set(&self) -> Result<(), SimError> {
        let (waiters, callback) = {
            let mut st = self.inner.state.borrow_mut();
            st.flag = true;
            st.generation += 1;
            (std::mem::take(&mut st.waiters), st.callback.clone())
        };
        for (_, w) in waiters {
            w.wake();
        }
        match callback {
            Some(EventCallback::Immediate(f)) => f(),
            Some(EventCallback::Task(f)) => {
                self.inner.timebase.spawn(f());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Clears the flag.
    pub fn clear(&self) {
        self.inner.state.borrow_mut().flag = false;
    }

    /// Waits until the flag is set. Completes at once if it already is, and
    /// also completes for a `set` followed by a `clear` that happened while
    /// parked.
    pub fn wait(&self) -> EventWait {
        EventWait {
            event: self.clone(),
            generation: None,
            ticket: None,
        }
    }
}

/// Future returned by [`Event::wait`].
pub struct EventWait {
    event: Event,
    generation: Option<u64>,
    ticket: Option<u64>,
}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut st = this.event.inner.state.borrow_mut();
        let start = *this.generation.get_or_insert(st.generation);
        if st.flag || st.generation != start {
            if let Some(t) = this.ticket.take() {
                st.waiters.retain(|(id, _)| *id != t);
            }
            return Poll::Ready(());
        }
        match this.ticket {
            Some(t) => {
                if let Some(slot) = st.waiters.iter_mut().find(|(id, _)| *id == t) {
                    slot.1 = cx.waker().clone();
                } else {
                    st.waiters.push((t, cx.waker().clone()));
                }
            }
            None => {
                let t = st.next_ticket;
                st.next_ticket += 1;
                st.waiters.push((t, cx.waker().clone()));
                this.ticket = Some(t);
            }
        }
        Poll::Pending
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        if let Some(t) = self.ticket.take() {
            self.event
                .inner
                .state
                .borrow_mut()
                .waiters
                .retain(|(id, _)| *id != t);
        }
    }
}
