//! Interrupt state of the running thread.
//!
//! A spin lock must not be interrupted by code that could try to take the
//! same lock on the same cpu, and its holder must not be scheduled out. Both
//! are achieved by entering a critical section for as long as the lock is
//! held. How a critical section is realized (masking interrupts, disabling
//! preemption, or plain bookkeeping on a hosted build) is up to the
//! registered [`Scheduler`].
//!
//! [`Scheduler`]: crate::thread::scheduler::Scheduler

use crate::thread::scheduler::scheduler;
use core::marker::PhantomData;

/// An RAII-based guard for a critical section of the current thread.
///
/// When an `InterruptGuard` is created, the current thread enters a critical
/// section. When it is dropped, the critical section is left again. Guards
/// nest; the thread leaves the critical section once the outermost guard is
/// dropped.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation**.
/// - The guard is tied to the thread that created it and cannot be sent to
///   another one.
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, entering a critical section.
    ///
    /// # Example
    /// ```rust
    /// let _guard = kbase::interrupt::InterruptGuard::new();
    /// // Critical section...
    /// // The critical section ends when `_guard` goes out of scope.
    /// ```
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        scheduler().enter_critical();
        Self {
            _not_send: PhantomData,
        }
    }

    /// Returns `true` if the current thread holds at least one guard.
    pub fn is_guarded() -> bool {
        scheduler().is_critical()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        scheduler().exit_critical();
    }
}
