//! # Lock.
//!
//! A lock allows **only one thread at a time** into a critical section.
//! Unlike the spin lock, a thread trying to acquire a held lock sleeps
//! until the lock is released, so it is suited to critical sections that may
//! last a while or that themselves sleep.
//!
//! The lock records which thread holds it. Only that thread may release it,
//! and [`Lock::is_held_by_caller`] lets code assert that it runs under the
//! lock. The lock is not reentrant: a holder that acquires it again sleeps
//! forever.
//!
//! |                | SpinLock                 | Lock                      |
//! |----------------|--------------------------|---------------------------|
//! | Waiting thread | Spins (busy-waits)       | Sleeps                    |
//! | CPU usage      | High (wastes CPU cycles) | Low (no busy waiting)     |
//! | Overhead       | Low (fast if uncontended)| Higher (due to sleep/wake)|
//! | Owner tracking | No                       | Yes                       |
//!
//! The lock holds no data of its own; it guards whatever the caller decides
//! it guards, which is also what a [`ConditionVariable`] paired with it
//! talks about.
//!
//! [`ConditionVariable`]: crate::ConditionVariable

use crate::{KernelError, TraceFlags, dup_name, wchan::WaitChannel};
use alloc::string::String;
use kbase::{
    spinlock::{SpinLock, WouldBlock},
    thread::Current,
};

struct LockState {
    /// Thread id of the holder. `Some` exactly while the lock is busy.
    owner: Option<u64>,
    wchan: WaitChannel,
}

impl LockState {
    fn busy(&self) -> bool {
        self.owner.is_some()
    }
}

impl AsMut<WaitChannel> for LockState {
    fn as_mut(&mut self) -> &mut WaitChannel {
        &mut self.wchan
    }
}

/// A sleeping mutual exclusion lock with owner tracking.
pub struct Lock {
    name: String,
    state: SpinLock<LockState>,
}

impl Lock {
    /// Creates a new, free lock named `name`.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the lock could not be allocated.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        let wchan = WaitChannel::new(&name)?;
        trace!(TraceFlags::LOCK, "lock {}: created", name);
        Ok(Self {
            name,
            state: SpinLock::new(LockState { owner: None, wchan }),
        })
    }

    /// Name of this lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock, sleeping until it is free.
    ///
    /// Upon returning, the calling thread is the holder of the lock.
    ///
    /// # Panics
    ///
    /// Panics if called in interrupt context. Acquiring a lock the caller
    /// already holds is not detected and never returns.
    pub fn acquire(&self) {
        assert!(
            !Current::in_interrupt(),
            "lock {}: acquire in interrupt context",
            self.name
        );

        let tid = Current::get_tid();
        let mut guard = self.state.lock();
        while guard.busy() {
            WaitChannel::sleep(guard);
            trace!(TraceFlags::LOCK, "lock {}: thread {} woken", self.name, tid);
            guard = self.state.lock();
        }
        guard.owner = Some(tid);
        guard.unlock();
    }

    /// Acquires the lock if it is free right now.
    ///
    /// # Errors
    ///
    /// [`WouldBlock`] if the lock is held, including by the caller.
    pub fn try_acquire(&self) -> Result<(), WouldBlock> {
        let tid = Current::get_tid();
        let mut guard = self.state.lock();
        let result = if guard.busy() {
            Err(WouldBlock)
        } else {
            guard.owner = Some(tid);
            Ok(())
        };
        guard.unlock();
        result
    }

    /// Releases the lock and wakes one sleeper, if any.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn release(&self) {
        let tid = Current::get_tid();
        let mut guard = self.state.lock();
        assert!(guard.busy(), "lock {}: released while free", self.name);
        assert_eq!(
            guard.owner,
            Some(tid),
            "lock {}: released by a thread that does not hold it",
            self.name
        );
        guard.owner = None;
        guard.wchan.wake_one();
        guard.unlock();
    }

    /// Returns `true` if the calling thread holds the lock.
    pub fn is_held_by_caller(&self) -> bool {
        let tid = Current::get_tid();
        let guard = self.state.lock();
        let held = guard.owner == Some(tid);
        guard.unlock();
        held
    }

    /// Acquires the lock like [`acquire`] and releases it when the returned
    /// guard is dropped.
    ///
    /// [`acquire`]: Lock::acquire
    pub fn hold(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Destroys the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is held.
    pub fn destroy(self) {
        trace!(TraceFlags::LOCK, "lock {}: destroyed", self.name);
        let name = self.name;
        let LockState { owner, wchan } = self.state.into_inner();
        assert!(
            owner.is_none(),
            "lock {}: destroyed while held by thread {:?}",
            name,
            owner
        );
        wchan.destroy();
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let guard = self.state.lock();
        let owner = guard.owner;
        guard.unlock();
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("owner", &owner)
            .finish()
    }
}

/// An implementation of a "scoped lock" of a [`Lock`]. When this structure
/// is dropped (falls out of scope), the lock is released.
///
/// This structure is created by the [`hold`] method on [`Lock`].
///
/// [`hold`]: Lock::hold
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl LockGuard<'_> {
    /// The lock this guard holds.
    pub fn lock(&self) -> &Lock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
