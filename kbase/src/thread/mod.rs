//! Thread abstraction, as seen by the blocking primitives.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each identified
//! by a thread id (tid). A thread can park itself: it hands out a
//! [`ParkHandle`] and stops running until someone consumes that handle with
//! [`ParkHandle::unpark`]. The handle is the only way to wake a parked thread.
//!
//! Parking is split into two steps so that a wait queue can register the
//! handle (and release its spin lock) before the thread actually stops.
//! See [`Current::park_with`].
pub mod scheduler;

#[cfg(feature = "hosted")]
pub mod hosted;

use crate::interrupt::InterruptGuard;
use core::task::Waker;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use scheduler::scheduler;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is parked.
    Parked,
    /// Thread has exited.
    Exited,
}

/// The thread id does not name a live thread.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NoSuchThread(pub u64);

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, NoSuchThread> {
    scheduler().state_of(tid).ok_or(NoSuchThread(tid))
}

/// A handle that represent the parked thread.
///
/// Consuming the handle with [`unpark`] makes the thread runnable again.
/// Dropping it without unparking leaves the thread parked forever.
///
/// [`unpark`]: ParkHandle::unpark
pub struct ParkHandle {
    tid: u64,
    waker: Waker,
}

impl ParkHandle {
    /// Make a handle for the parked thread `tid`, woken through `waker`.
    ///
    /// Called by a [`Scheduler`] from [`Scheduler::park_current`].
    ///
    /// [`Scheduler`]: scheduler::Scheduler
    /// [`Scheduler::park_current`]: scheduler::Scheduler::park_current
    pub fn new(tid: u64, waker: Waker) -> Self {
        Self { tid, waker }
    }

    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        self.waker.wake();
    }
}

impl core::fmt::Debug for ParkHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParkHandle").field("tid", &self.tid).finish()
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs after the thread is marked parked but before it stops, so a
    /// handle published by `f` may be unparked right away; the thread then
    /// simply does not stay parked. The current thread must not hold any spin
    /// lock once `f` returns.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let sched = scheduler();
        f(sched.park_current());
        assert!(
            !InterruptGuard::is_guarded(),
            "Try to park a thread while holding a lock."
        );
        sched.reschedule();
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        scheduler().current_tid()
    }

    /// Returns `true` if the current cpu is executing an interrupt handler.
    pub fn in_interrupt() -> bool {
        scheduler().in_interrupt()
    }
}
