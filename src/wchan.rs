//! # Wait Channel.
//!
//! A wait channel is the list of threads sleeping on one primitive. It has no
//! lock of its own: it lives inside the state a primitive protects with its
//! [`SpinLock`], and every operation on it needs that lock held. The guard
//! is the only way to reach the channel, so the requirement is checked by
//! the compiler:
//!
//! ```rust
//! use kbase::spinlock::SpinLock;
//! use synch::WaitChannel;
//!
//! struct State {
//!     ready: bool,
//!     wchan: WaitChannel,
//! }
//!
//! impl AsMut<WaitChannel> for State {
//!     fn as_mut(&mut self) -> &mut WaitChannel {
//!         &mut self.wchan
//!     }
//! }
//!
//! let state = SpinLock::new(State { ready: true, wchan: WaitChannel::new("ready").unwrap() });
//! let mut guard = state.lock();
//! while !guard.ready {
//!     // Registers this thread, releases the spin lock and sleeps.
//!     WaitChannel::sleep(guard);
//!     guard = state.lock();
//! }
//! guard.unlock();
//! ```
//!
//! Because a sleeper is on the channel before the spin lock is released, and
//! [`WaitChannel::wake_one`] and [`WaitChannel::wake_all`] are only reachable
//! with the same spin lock held, a wakeup cannot slip in between a thread
//! deciding to sleep and the thread actually sleeping.
//!
//! Sleepers are woken from the front of the channel, but a woken thread races
//! with every other thread for the spin lock, so wakeup order says nothing
//! about who gets the resource first.
//!
//! [`SpinLock`]: kbase::spinlock::SpinLock

use crate::{KernelError, TraceFlags, dup_name};
use alloc::string::String;
use core::cell::Cell;
use intrusive_collections::{LinkedList, LinkedListLink, UnsafeRef, intrusive_adapter};
use kbase::{
    spinlock::SpinLockGuard,
    thread::{Current, ParkHandle},
};

/// A sleeping thread's entry on a channel.
///
/// Lives on the sleeper's stack for the duration of [`WaitChannel::sleep`].
struct Waiter {
    link: LinkedListLink,
    handle: Cell<Option<ParkHandle>>,
}

// Safety: a linked `Waiter` is only touched with the channel's spin lock
// held. Its owner reads it again only after a waker unlinked it.
unsafe impl Send for Waiter {}
unsafe impl Sync for Waiter {}

impl Waiter {
    fn new() -> Self {
        Self {
            link: LinkedListLink::new(),
            handle: Cell::new(None),
        }
    }
}

intrusive_adapter!(WaiterAdapter = UnsafeRef<Waiter>: Waiter { link: LinkedListLink });

/// The list of threads sleeping on a primitive.
pub struct WaitChannel {
    name: String,
    waiters: LinkedList<WaiterAdapter>,
    len: usize,
}

// Safety: see `Waiter`.
unsafe impl Send for WaitChannel {}

impl WaitChannel {
    /// Creates an empty wait channel named `name`.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the name could not be allocated.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        Ok(Self {
            name: dup_name(name)?,
            waiters: LinkedList::new(WaiterAdapter::new()),
            len: 0,
        })
    }

    /// Name of this channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of sleeping threads.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no thread sleeps on this channel.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Links `waiter` at the back of the channel.
    ///
    /// # Safety
    ///
    /// `waiter` must stay in place until it is unlinked by
    /// [`wake_one`](Self::wake_one) or [`wake_all`](Self::wake_all).
    unsafe fn enqueue(&mut self, waiter: &Waiter) {
        self.waiters
            .push_back(unsafe { UnsafeRef::from_raw(waiter as *const Waiter) });
        self.len += 1;
    }

    /// Unlinks the front sleeper and hands out its park handle.
    fn dequeue(&mut self) -> Option<ParkHandle> {
        let waiter = self.waiters.pop_front()?;
        self.len -= 1;
        waiter.handle.take()
    }

    /// Puts the current thread to sleep on the channel inside `guard`.
    ///
    /// The current thread is registered on the channel and `guard` is
    /// released, in that order, and then the thread sleeps until it is woken
    /// by [`wake_one`] or [`wake_all`]. The spin lock is **not** held when
    /// this returns; the caller takes it again if it needs to.
    ///
    /// Nothing is allocated while `guard` is held: the channel entry lives on
    /// this thread's stack.
    ///
    /// [`wake_one`]: WaitChannel::wake_one
    /// [`wake_all`]: WaitChannel::wake_all
    pub fn sleep<T: AsMut<WaitChannel>>(mut guard: SpinLockGuard<'_, T>) {
        let waiter = Waiter::new();
        Current::park_with(|handle| {
            let tid = handle.tid();
            waiter.handle.set(Some(handle));
            let wchan = (*guard).as_mut();
            // Safety: `park_with` returns only after the handle stored in
            // `waiter` is unparked, which happens after it is unlinked.
            unsafe { wchan.enqueue(&waiter) };
            guard.unlock();
            trace!(TraceFlags::WCHAN, "thread {} sleeps", tid);
        });
        debug_assert!(!waiter.link.is_linked());
    }

    /// Wakes one sleeping thread, if any.
    ///
    /// Returns `true` if a thread was woken.
    pub fn wake_one(&mut self) -> bool {
        match self.dequeue() {
            Some(handle) => {
                handle.unpark();
                true
            }
            None => false,
        }
    }

    /// Wakes every sleeping thread.
    ///
    /// Returns the number of threads woken.
    pub fn wake_all(&mut self) -> usize {
        let mut woken = 0;
        while let Some(handle) = self.dequeue() {
            handle.unpark();
            woken += 1;
        }
        woken
    }

    /// Destroys the channel.
    ///
    /// # Panics
    ///
    /// Panics if a thread still sleeps on the channel.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for WaitChannel {
    fn drop(&mut self) {
        if kbase::panicking() {
            self.waiters.fast_clear();
            return;
        }
        assert!(
            self.waiters.is_empty(),
            "wchan {}: destroyed with {} sleeping threads",
            self.name,
            self.len
        );
    }
}

impl core::fmt::Debug for WaitChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitChannel")
            .field("name", &self.name)
            .field("waiters", &self.len)
            .finish()
    }
}
