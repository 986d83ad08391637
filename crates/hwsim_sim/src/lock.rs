//! Mutual exclusion between simulation tasks.
//!
//! `release` hands the lock directly to the oldest waiter, so waiters acquire
//! in the order they parked.

use crate::error::SimError;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct LockState {
    locked: bool,
    next_ticket: u64,
    waiters: VecDeque<(u64, Waker)>,
    granted: HashSet<u64>,
}

impl LockState {
    /// Passes the lock to the oldest waiter or frees it.
    fn hand_off(&mut self) -> Option<Waker> {
        match self.waiters.pop_front() {
            Some((t, w)) => {
                self.granted.insert(t);
                Some(w)
            }
            None => {
                self.locked = false;
                None
            }
        }
    }
}

/// A FIFO lock. Clones share the same lock.
#[derive(Clone, Default)]
pub struct Lock {
    state: Rc<RefCell<LockState>>,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        write!(f, "Lock(locked={}, waiters={})", st.locked, st.waiters.len())
    }
}

impl Lock {
    /// An unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while someone holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.borrow().locked
    }

    /// Returns `true` if both handles refer to the same lock.
    pub fn same_lock(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Waits until the lock is held by the caller.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            lock: self.clone(),
            ticket: None,
        }
    }

    /// Takes the lock if it is free.
    pub fn try_acquire(&self) -> bool {
        let mut st = self.state.borrow_mut();
        if st.locked {
            false
        } else {
            st.locked = true;
            true
        }
    }

    /// Releases the lock, handing it to the oldest waiter if there is one.
    pub fn release(&self) -> Result<(), SimError> {
        let waker = {
            let mut st = self.state.borrow_mut();
            if !st.locked {
                return Err(SimError::LockNotHeld);
            }
            st.hand_off()
        };
        if let Some(w) = waker {
            w.wake();
        }
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub async fn guard(&self) -> LockGuard {
        self.acquire().await;
        LockGuard { lock: self.clone() }
    }
}

/// Future returned by [`Lock::acquire`].
pub struct Acquire {
    lock: Lock,
    ticket: Option<u64>,
}

impl Future for Acquire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut st = this.lock.state.borrow_mut();
        if let Some(t) = this.ticket {
            if st.granted.remove(&t) {
                this.ticket = None;
                return Poll::Ready(());
            }
            if let Some(slot) = st.waiters.iter_mut().find(|(id, _)| *id == t) {
                slot.1 = cx.waker().clone();
            }
            return Poll::Pending;
        }
        if !st.locked {
            st.locked = true;
            return Poll::Ready(());
        }
        let t = st.next_ticket;
        st.next_ticket += 1;
        st.waiters.push_back((t, cx.waker().clone()));
        this.ticket = Some(t);
        Poll::Pending
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        let Some(t) = self.ticket.take() else {
            return;
        };
        let waker = {
            let mut st = self.lock.state.borrow_mut();
            if st.granted.remove(&t) {
                st.hand_off()
            } else {
                st.waiters.retain(|(id, _)| *id != t);
                None
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
    }
}

/// Holds a [`Lock`] until dropped.
#[derive(Debug)]
pub struct LockGuard {
    lock: Lock,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            log::warn!("lock guard release failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::{poll_once, Timebase};
    use std::cell::RefCell;

    #[test]
    fn try_acquire_and_release() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn release_unheld_errors() {
        assert_eq!(Lock::new().release(), Err(SimError::LockNotHeld));
    }

    #[test]
    fn waiters_acquire_in_fifo_order() {
        let tb = Timebase::new();
        let lock = Lock::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        assert!(lock.try_acquire());
        for id in 0..3 {
            let (l, o, t) = (lock.clone(), Rc::clone(&order), tb.clone());
            tb.spawn(async move {
                l.acquire().await;
                o.borrow_mut().push(id);
                t.wait(10).await;
                l.release()
            });
        }
        tb.run_ready().unwrap();
        assert!(order.borrow().is_empty());
        lock.release().unwrap();
        tb.run_until(100).unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert!(!lock.is_locked());
    }

    #[test]
    fn guard_releases_on_drop() {
        let tb = Timebase::new();
        let lock = Lock::new();
        let l = lock.clone();
        let t = tb.clone();
        tb.spawn(async move {
            let _g = l.guard().await;
            t.wait(5).await;
            Ok(())
        });
        tb.run_ready().unwrap();
        assert!(lock.is_locked());
        tb.run_until(10).unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn dropped_waiter_leaves_queue() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        let mut fut = lock.acquire();
        assert!(poll_once(Pin::new(&mut fut)).is_none());
        drop(fut);
        lock.release().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn granted_but_dropped_acquire_passes_lock_on() {
        let lock = Lock::new();
        assert!(lock.try_acquire());
        let mut first = lock.acquire();
        let mut second = lock.acquire();
        assert!(poll_once(Pin::new(&mut first)).is_none());
        assert!(poll_once(Pin::new(&mut second)).is_none());
        lock.release().unwrap();
        drop(first);
        assert_eq!(poll_once(Pin::new(&mut second)), Some(()));
        assert!(lock.is_locked());
    }
}
