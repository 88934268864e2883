//! # Condition Variable.
//!
//! A **condition variable** allows a thread to block until a certain
//! condition on shared state becomes true, without consuming CPU cycles. It
//! is always used together with the [`Lock`] that guards that shared state,
//! and the lock is passed to every call. The condition variable itself does
//! not remember the lock; pairing the right lock with it is up to the caller.
//!
//! [`ConditionVariable::wait`] releases the lock and sleeps as one step: the
//! thread is registered as a waiter before the lock is given up, so a thread
//! that takes the lock, changes the state and signals can never do so between
//! the waiter deciding to sleep and the waiter sleeping.
//!
//! A woken waiter competes for the lock with every other thread, and the
//! condition may no longer hold once it gets it. Waiting therefore belongs in
//! a loop, which [`ConditionVariable::wait_while`] writes for you:
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use synch::{ConditionVariable, Lock};
//!
//! let lock = Lock::new("ready").unwrap();
//! let cv = ConditionVariable::new("ready").unwrap();
//! let ready = AtomicBool::new(true);
//!
//! lock.acquire();
//! cv.wait_while(&lock, || !ready.load(Ordering::Relaxed));
//! cv.broadcast(&lock);
//! lock.release();
//! ```
//!
//! There are two signaling methods:
//! - [`ConditionVariable::signal`] wakes **one** waiting thread and
//! - [`ConditionVariable::broadcast`] wakes **all** waiting threads.
//!
//! Both require the caller to hold the lock.

use crate::{KernelError, Lock, TraceFlags, dup_name, wchan::WaitChannel};
use alloc::string::String;
use kbase::{spinlock::SpinLock, thread::Current};

struct CvState {
    wchan: WaitChannel,
}

impl AsMut<WaitChannel> for CvState {
    fn as_mut(&mut self) -> &mut WaitChannel {
        &mut self.wchan
    }
}

/// A condition variable.
pub struct ConditionVariable {
    name: String,
    state: SpinLock<CvState>,
}

impl ConditionVariable {
    /// Creates a new condition variable named `name`.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the condition variable could not be
    /// allocated.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        let wchan = WaitChannel::new(&name)?;
        trace!(TraceFlags::CONDVAR, "cv {}: created", name);
        Ok(Self {
            name,
            state: SpinLock::new(CvState { wchan }),
        })
    }

    /// Name of this condition variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases `lock`, sleeps until signaled, and acquires `lock` again.
    ///
    /// The caller holds `lock` both before and after the call, but not while
    /// sleeping. A wakeup says nothing about the condition; re-check it.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`, or if called in interrupt
    /// context.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !Current::in_interrupt(),
            "cv {}: wait in interrupt context",
            self.name
        );
        assert!(
            lock.is_held_by_caller(),
            "cv {}: wait without holding lock {}",
            self.name,
            lock.name()
        );

        let guard = self.state.lock();
        lock.release();
        WaitChannel::sleep(guard);
        trace!(
            TraceFlags::CONDVAR,
            "cv {}: thread {} woken",
            self.name,
            Current::get_tid()
        );
        lock.acquire();
    }

    /// Waits on this condition variable while `condition` returns `true`.
    ///
    /// `condition` is evaluated with `lock` held, once before any wait and
    /// again after every wakeup. Returns with `lock` held and `condition`
    /// false.
    ///
    /// # Panics
    ///
    /// Same as [`wait`].
    ///
    /// [`wait`]: ConditionVariable::wait
    pub fn wait_while(&self, lock: &Lock, mut condition: impl FnMut() -> bool) {
        while condition() {
            self.wait(lock);
        }
    }

    /// Wakes up one thread waiting on this condition variable, if any.
    ///
    /// Signals are not buffered: with nobody waiting, this does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_caller(),
            "cv {}: signal without holding lock {}",
            self.name,
            lock.name()
        );

        let mut guard = self.state.lock();
        guard.wchan.wake_one();
        guard.unlock();
    }

    /// Wakes up every thread waiting on this condition variable.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_caller(),
            "cv {}: broadcast without holding lock {}",
            self.name,
            lock.name()
        );

        let mut guard = self.state.lock();
        let woken = guard.wchan.wake_all();
        guard.unlock();
        trace!(TraceFlags::CONDVAR, "cv {}: broadcast to {}", self.name, woken);
    }

    /// Destroys the condition variable.
    ///
    /// # Panics
    ///
    /// Panics if a thread still waits on the condition variable.
    pub fn destroy(self) {
        trace!(TraceFlags::CONDVAR, "cv {}: destroyed", self.name);
        self.state.into_inner().wchan.destroy();
    }
}

impl core::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let guard = self.state.lock();
        let waiters = guard.wchan.len();
        guard.unlock();
        f.debug_struct("ConditionVariable")
            .field("name", &self.name)
            .field("waiters", &waiters)
            .finish()
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use kbase::thread::hosted::simulate_interrupt;

    #[test]
    fn signal_without_waiters_is_dropped() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        assert_eq!(cv.name(), "cv");
        lock.acquire();
        cv.signal(&lock);
        cv.broadcast(&lock);
        lock.release();
        cv.destroy();
        lock.destroy();
    }

    #[test]
    fn wait_while_false_does_not_sleep() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        let mut checks = 0;
        lock.acquire();
        cv.wait_while(&lock, || {
            checks += 1;
            false
        });
        assert!(lock.is_held_by_caller());
        lock.release();
        assert_eq!(checks, 1);
    }

    #[test]
    #[should_panic(expected = "wait without holding lock")]
    fn wait_without_lock_panics() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        cv.wait(&lock);
    }

    #[test]
    #[should_panic(expected = "signal without holding lock")]
    fn signal_without_lock_panics() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        cv.signal(&lock);
    }

    #[test]
    #[should_panic(expected = "broadcast without holding lock")]
    fn broadcast_without_lock_panics() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        cv.broadcast(&lock);
    }

    #[test]
    #[should_panic(expected = "wait in interrupt context")]
    fn wait_in_interrupt_context_panics() {
        let lock = Lock::new("lock").unwrap();
        let cv = ConditionVariable::new("cv").unwrap();
        lock.acquire();
        simulate_interrupt(|| cv.wait(&lock));
    }
}
