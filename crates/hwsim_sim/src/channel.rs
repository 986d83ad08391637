//! Blocking FIFO channels with separate put and get endpoints.
//!
//! Parked getters and putters queue in FIFO order. A parked future that is
//! dropped leaves its queue; if it had already been woken, the wakeup passes
//! to the next waiter so no item or slot is stranded.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct WaitQueue {
    next_ticket: u64,
    waiters: VecDeque<(u64, Waker)>,
}

impl WaitQueue {
    fn new() -> Self {
        Self {
            next_ticket: 0,
            waiters: VecDeque::new(),
        }
    }

    /// Registers or refreshes `ticket`. A woken waiter that was robbed goes
    /// back to the front.
    fn park(&mut self, ticket: &mut Option<u64>, waker: &Waker) {
        match *ticket {
            Some(t) => match self.waiters.iter_mut().find(|(id, _)| *id == t) {
                Some(slot) => slot.1 = waker.clone(),
                None => self.waiters.push_front((t, waker.clone())),
            },
            None => {
                let t = self.next_ticket;
                self.next_ticket += 1;
                self.waiters.push_back((t, waker.clone()));
                *ticket = Some(t);
            }
        }
    }

    /// Removes `ticket`. Returns `true` if it was still queued.
    fn remove(&mut self, ticket: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|(id, _)| *id != ticket);
        self.waiters.len() != before
    }

    fn pop(&mut self) -> Option<Waker> {
        self.waiters.pop_front().map(|(_, w)| w)
    }
}

struct ChannelState<T> {
    items: VecDeque<T>,
    max_size: usize,
    getters: WaitQueue,
    putters: WaitQueue,
}

impl<T> ChannelState<T> {
    fn has_space(&self) -> bool {
        self.max_size == 0 || self.items.len() < self.max_size
    }
}

/// A FIFO queue shared by its endpoints. A `max_size` of zero is unbounded.
pub struct Channel<T> {
    state: Rc<RefCell<ChannelState<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        write!(f, "Channel(len={}, max={})", st.items.len(), st.max_size)
    }
}

impl<T> Channel<T> {
    /// A channel holding at most `max_size` items, or unbounded for zero.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState {
                items: VecDeque::new(),
                max_size,
                getters: WaitQueue::new(),
                putters: WaitQueue::new(),
            })),
        }
    }

    /// An unbounded channel.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    /// Returns `true` if no item is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity, zero for unbounded.
    pub fn max_size(&self) -> usize {
        self.state.borrow().max_size
    }

    /// Returns `true` if a `get` would complete now.
    pub fn can_get(&self) -> bool {
        !self.state.borrow().items.is_empty()
    }

    /// Returns `true` if a `put` would complete now.
    pub fn can_put(&self) -> bool {
        self.state.borrow().has_space()
    }

    /// Returns `true` if both handles refer to the same channel.
    pub fn same_channel(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Takes the head item, waiting while the channel is empty.
    pub fn get(&self) -> GetFuture<T> {
        GetFuture {
            channel: self.clone(),
            ticket: None,
        }
    }

    /// Appends an item, waiting while the channel is full.
    pub fn put(&self, item: T) -> PutFuture<T> {
        PutFuture {
            channel: self.clone(),
            item: Some(item),
            ticket: None,
        }
    }

    /// Takes the head item if there is one.
    pub fn try_get(&self) -> Option<T> {
        let (item, waker) = {
            let mut st = self.state.borrow_mut();
            let item = st.items.pop_front();
            let waker = if item.is_some() { st.putters.pop() } else { None };
            (item, waker)
        };
        if let Some(w) = waker {
            w.wake();
        }
        item
    }

    /// Appends an item if there is room, otherwise hands it back.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let waker = {
            let mut st = self.state.borrow_mut();
            if !st.has_space() {
                return Err(item);
            }
            st.items.push_back(item);
            st.getters.pop()
        };
        if let Some(w) = waker {
            w.wake();
        }
        Ok(())
    }

    /// The consuming endpoint.
    pub fn get_if(&self) -> GetEnd<T> {
        GetEnd {
            channel: self.clone(),
        }
    }

    /// The producing endpoint.
    pub fn put_if(&self) -> PutEnd<T> {
        PutEnd {
            channel: self.clone(),
        }
    }
}

/// Future returned by [`Channel::get`].
pub struct GetFuture<T> {
    channel: Channel<T>,
    ticket: Option<u64>,
}

impl<T> Future for GetFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let (result, waker) = {
            let mut st = this.channel.state.borrow_mut();
            match st.items.pop_front() {
                Some(item) => {
                    if let Some(t) = this.ticket.take() {
                        st.getters.remove(t);
                    }
                    (Poll::Ready(item), st.putters.pop())
                }
                None => {
                    st.getters.park(&mut this.ticket, cx.waker());
                    (Poll::Pending, None)
                }
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
        result
    }
}

impl<T> Drop for GetFuture<T> {
    fn drop(&mut self) {
        let Some(t) = self.ticket.take() else {
            return;
        };
        let waker = {
            let mut st = self.channel.state.borrow_mut();
            let queued = st.getters.remove(t);
            if !queued && !st.items.is_empty() {
                st.getters.pop()
            } else {
                None
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
    }
}

/// Future returned by [`Channel::put`].
pub struct PutFuture<T> {
    channel: Channel<T>,
    item: Option<T>,
    ticket: Option<u64>,
}

impl<T> Unpin for PutFuture<T> {}

impl<T> Future for PutFuture<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let (result, waker) = {
            let mut st = this.channel.state.borrow_mut();
            if st.has_space() {
                if let Some(item) = this.item.take() {
                    st.items.push_back(item);
                }
                if let Some(t) = this.ticket.take() {
                    st.putters.remove(t);
                }
                (Poll::Ready(()), st.getters.pop())
            } else {
                st.putters.park(&mut this.ticket, cx.waker());
                (Poll::Pending, None)
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
        result
    }
}

impl<T> Drop for PutFuture<T> {
    fn drop(&mut self) {
        let Some(t) = self.ticket.take() else {
            return;
        };
        let waker = {
            let mut st = self.channel.state.borrow_mut();
            let queued = st.putters.remove(t);
            if !queued && st.has_space() {
                st.putters.pop()
            } else {
                None
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
    }
}

/// The consuming endpoint of a channel.
pub struct GetEnd<T> {
    channel: Channel<T>,
}

impl<T> Clone for GetEnd<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> fmt::Debug for GetEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GetEnd({:?})", self.channel)
    }
}

impl<T> GetEnd<T> {
    /// See [`Channel::get`].
    pub fn get(&self) -> GetFuture<T> {
        self.channel.get()
    }

    /// See [`Channel::try_get`].
    pub fn try_get(&self) -> Option<T> {
        self.channel.try_get()
    }

    /// See [`Channel::can_get`].
    pub fn can_get(&self) -> bool {
        self.channel.can_get()
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

/// The producing endpoint of a channel.
pub struct PutEnd<T> {
    channel: Channel<T>,
}

impl<T> Clone for PutEnd<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> fmt::Debug for PutEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PutEnd({:?})", self.channel)
    }
}

impl<T> PutEnd<T> {
    /// See [`Channel::put`].
    pub fn put(&self, item: T) -> PutFuture<T> {
        self.channel.put(item)
    }

    /// See [`Channel::try_put`].
    pub fn try_put(&self, item: T) -> Result<(), T> {
        self.channel.try_put(item)
    }

    /// See [`Channel::can_put`].
    pub fn can_put(&self) -> bool {
        self.channel.can_put()
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use crate::timebase::{poll_once, Timebase};
    use std::cell::RefCell;

    #[test]
    fn try_get_on_empty_returns_none() {
        let ch: Channel<u32> = Channel::unbounded();
        assert_eq!(ch.try_get(), None);
        assert!(!ch.can_get());
    }

    #[test]
    fn fifo_order() {
        let ch = Channel::unbounded();
        for i in 0..5 {
            ch.try_put(i).unwrap();
        }
        let got: Vec<i32> = std::iter::from_fn(|| ch.try_get()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn bounded_try_put_hands_item_back() {
        let ch = Channel::new(2);
        ch.try_put('a').unwrap();
        ch.try_put('b').unwrap();
        assert!(!ch.can_put());
        assert_eq!(ch.try_put('c'), Err('c'));
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn get_blocks_until_put() {
        let tb = Timebase::new();
        let ch: Channel<u32> = Channel::unbounded();
        let got = Rc::new(RefCell::new(Vec::new()));
        {
            let (rx, got) = (ch.get_if(), Rc::clone(&got));
            tb.spawn(async move {
                for _ in 0..3 {
                    let v = rx.get().await;
                    got.borrow_mut().push(v);
                }
                Ok(())
            });
        }
        {
            let (tx, t) = (ch.put_if(), tb.clone());
            tb.spawn(async move {
                for v in [10, 20, 30] {
                    t.wait(5).await;
                    tx.put(v).await;
                }
                Ok::<(), SimError>(())
            });
        }
        tb.run_until(100).unwrap();
        assert_eq!(*got.borrow(), vec![10, 20, 30]);
    }

    #[test]
    fn put_blocks_while_full() {
        let tb = Timebase::new();
        let ch = Channel::new(1);
        let progress = Rc::new(RefCell::new(Vec::new()));
        {
            let (tx, p) = (ch.put_if(), Rc::clone(&progress));
            tb.spawn(async move {
                for v in 0..3 {
                    tx.put(v).await;
                    p.borrow_mut().push(v);
                }
                Ok(())
            });
        }
        tb.run_ready().unwrap();
        assert_eq!(*progress.borrow(), vec![0]);
        assert_eq!(ch.try_get(), Some(0));
        tb.run_ready().unwrap();
        assert_eq!(*progress.borrow(), vec![0, 1]);
        assert_eq!(ch.try_get(), Some(1));
        assert_eq!(ch.try_get(), None);
        tb.run_ready().unwrap();
        assert_eq!(ch.try_get(), Some(2));
    }

    #[test]
    fn parked_getters_served_in_order() {
        let tb = Timebase::new();
        let ch: Channel<u32> = Channel::unbounded();
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in 0..3 {
            let (c, o) = (ch.clone(), Rc::clone(&order));
            tb.spawn(async move {
                let v = c.get().await;
                o.borrow_mut().push((id, v));
                Ok(())
            });
        }
        tb.run_ready().unwrap();
        for v in [7, 8, 9] {
            ch.try_put(v).unwrap();
        }
        tb.run_ready().unwrap();
        assert_eq!(*order.borrow(), vec![(0, 7), (1, 8), (2, 9)]);
    }

    #[test]
    fn dropped_getter_leaves_queue() {
        let ch: Channel<u32> = Channel::unbounded();
        let mut fut = ch.get();
        assert!(poll_once(Pin::new(&mut fut)).is_none());
        assert_eq!(ch.state.borrow().getters.waiters.len(), 1);
        drop(fut);
        assert!(ch.state.borrow().getters.waiters.is_empty());
    }

    #[test]
    fn cancelled_task_deregisters_from_channel() {
        let tb = Timebase::new();
        let ch: Channel<u32> = Channel::unbounded();
        let c = ch.clone();
        let handle = tb.spawn(async move {
            c.get().await;
            Ok(())
        });
        tb.run_ready().unwrap();
        assert_eq!(ch.state.borrow().getters.waiters.len(), 1);
        handle.cancel();
        assert!(ch.state.borrow().getters.waiters.is_empty());
        ch.try_put(1).unwrap();
        assert_eq!(ch.try_get(), Some(1));
    }
}
