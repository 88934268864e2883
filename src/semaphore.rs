//! # Semaphore.
//!
//! A **semaphore** regulates concurrent access to a finite set of resources.
//! It maintains a count of available units; [`Semaphore::down`] (Dijkstra's
//! P) takes one, sleeping while none is left, and [`Semaphore::up`] (V)
//! returns one and wakes a sleeper.
//!
//! A semaphore created with a count of zero works as an event: one thread
//! `down`s to wait for it, another `up`s to signal it.
//!
//! Threads going through the semaphore are not served in FIFO order: a
//! thread calling `down` may get a unit on its first try even while other
//! threads are sleeping. A woken sleeper re-checks the count and goes back
//! to sleep if someone else got there first.
//!
//! ```rust
//! use synch::Semaphore;
//!
//! let sema = Semaphore::new("slots", 2).unwrap();
//! sema.down();
//! {
//!     let _permit = sema.permit();
//!     assert_eq!(sema.count(), 0);
//! }
//! assert_eq!(sema.count(), 1);
//! sema.up();
//! sema.destroy();
//! ```

use crate::{KernelError, TraceFlags, dup_name, wchan::WaitChannel};
use alloc::string::String;
use kbase::{
    spinlock::{SpinLock, WouldBlock},
    thread::Current,
};

struct SemaphoreState {
    count: u32,
    wchan: WaitChannel,
}

impl AsMut<WaitChannel> for SemaphoreState {
    fn as_mut(&mut self) -> &mut WaitChannel {
        &mut self.wchan
    }
}

/// Counting semaphore.
pub struct Semaphore {
    name: String,
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    /// Creates a new semaphore named `name` holding `initial_count` units.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the semaphore could not be allocated.
    /// Nothing is leaked in that case.
    pub fn new(name: &str, initial_count: u32) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        let wchan = WaitChannel::new(&name)?;
        trace!(
            TraceFlags::SEMAPHORE,
            "semaphore {}: created with count {}",
            name,
            initial_count
        );
        Ok(Self {
            name,
            state: SpinLock::new(SemaphoreState {
                count: initial_count,
                wchan,
            }),
        })
    }

    /// Name of this semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current count.
    ///
    /// The value may be stale by the time the caller looks at it.
    pub fn count(&self) -> u32 {
        let guard = self.state.lock();
        let count = guard.count;
        guard.unlock();
        count
    }

    /// Takes one unit, sleeping until one is available (P).
    ///
    /// # Panics
    ///
    /// Panics if called in interrupt context, even when a unit is available.
    pub fn down(&self) {
        assert!(
            !Current::in_interrupt(),
            "semaphore {}: down in interrupt context",
            self.name
        );

        let mut guard = self.state.lock();
        while guard.count == 0 {
            WaitChannel::sleep(guard);
            trace!(TraceFlags::SEMAPHORE, "semaphore {}: woken", self.name);
            guard = self.state.lock();
        }
        guard.count -= 1;
        guard.unlock();
    }

    /// Takes one unit if one is available right now.
    ///
    /// Never sleeps, so it may be called in interrupt context.
    ///
    /// # Errors
    ///
    /// [`WouldBlock`] if the count is zero.
    pub fn try_down(&self) -> Result<(), WouldBlock> {
        let mut guard = self.state.lock();
        let result = if guard.count > 0 {
            guard.count -= 1;
            Ok(())
        } else {
            Err(WouldBlock)
        };
        guard.unlock();
        result
    }

    /// Returns one unit and wakes one sleeper, if any (V).
    ///
    /// # Panics
    ///
    /// Panics if the count would overflow.
    pub fn up(&self) {
        let mut guard = self.state.lock();
        guard.count = guard
            .count
            .checked_add(1)
            .unwrap_or_else(|| panic!("semaphore {}: count overflow", self.name));
        guard.wchan.wake_one();
        guard.unlock();
    }

    /// Takes one unit like [`down`] and returns it when the permit is
    /// dropped.
    ///
    /// [`down`]: Semaphore::down
    pub fn permit(&self) -> SemaphorePermit<'_> {
        self.down();
        SemaphorePermit { sema: self }
    }

    /// Destroys the semaphore.
    ///
    /// # Panics
    ///
    /// Panics if a thread still sleeps on the semaphore.
    pub fn destroy(self) {
        trace!(TraceFlags::SEMAPHORE, "semaphore {}: destroyed", self.name);
        self.state.into_inner().wchan.destroy();
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("count", &self.count())
            .finish()
    }
}

/// An RAII implementation of a unit taken from a [`Semaphore`]. When this
/// structure is dropped (falls out of scope), the unit is returned with
/// [`Semaphore::up`].
///
/// This structure is created by the [`permit`] method on [`Semaphore`].
///
/// [`permit`]: Semaphore::permit
pub struct SemaphorePermit<'a> {
    sema: &'a Semaphore,
}

impl SemaphorePermit<'_> {
    /// Keeps the unit taken: the permit is consumed without calling
    /// [`Semaphore::up`].
    pub fn forget(self) {
        core::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sema.up()
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use kbase::thread::hosted::simulate_interrupt;

    #[test]
    fn down_and_up_move_the_count() {
        let sema = Semaphore::new("sema", 2).unwrap();
        assert_eq!(sema.name(), "sema");
        sema.down();
        sema.down();
        assert_eq!(sema.count(), 0);
        assert_eq!(sema.try_down(), Err(WouldBlock));
        sema.up();
        assert_eq!(sema.count(), 1);
        assert_eq!(sema.try_down(), Ok(()));
        assert_eq!(sema.count(), 0);
        sema.destroy();
    }

    #[test]
    fn permit_returns_the_unit() {
        let sema = Semaphore::new("permit", 1).unwrap();
        let permit = sema.permit();
        assert_eq!(sema.count(), 0);
        drop(permit);
        assert_eq!(sema.count(), 1);
        sema.permit().forget();
        assert_eq!(sema.count(), 0);
        sema.destroy();
    }

    #[test]
    fn try_down_is_allowed_in_interrupt_context() {
        let sema = Semaphore::new("irq", 1).unwrap();
        simulate_interrupt(|| {
            assert_eq!(sema.try_down(), Ok(()));
            sema.up();
        });
        assert_eq!(sema.count(), 1);
        sema.destroy();
    }

    #[test]
    #[should_panic(expected = "down in interrupt context")]
    fn down_in_interrupt_context_panics() {
        let sema = Semaphore::new("irq", 1).unwrap();
        simulate_interrupt(|| sema.down());
    }

    #[test]
    #[should_panic(expected = "count overflow")]
    fn up_overflow_panics() {
        let sema = Semaphore::new("full", u32::MAX).unwrap();
        sema.up();
    }
}
