//! SMP-supported spinlock.
//!
//! On a uniprocessor it would be enough to keep the lock holder from being
//! preempted. On a multiprocessor, threads on other cores run concurrently,
//! so a core 1) polls a variable telling whether the lock is taken, 2) sets it
//! when it takes the lock, and 3) clears it on unlock. Steps 1 and 2 are a
//! single atomic read-modify-write.
//!
//! A spin lock never sleeps. It is only meant for tiny critical sections and
//! must never be held across a call that may put the thread to sleep.

use crate::interrupt::InterruptGuard;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    panic::Location,
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::{Backoff, CachePadded};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data
///
/// This spinlock busy-waits until the lock becomes available. Each spinlock
/// has a type parameter which represents the data that it is protecting. The
/// data can only be accessed through the guards returned from [`lock`] and
/// [`try_lock`], which guarantees that the data is only ever accessed when the
/// spinlock is locked.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use kbase::spinlock::SpinLock;
/// use std::sync::Arc;
///
/// let data = Arc::new(SpinLock::new(0));
/// let threads: Vec<_> = (0..4)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         std::thread::spawn(move || {
///             let mut guard = data.lock();
///             *guard += 1;
///             // the lock must be "explicitly" unlocked before `guard` goes out of scope.
///             guard.unlock();
///         })
///     })
///     .collect();
/// for th in threads {
///     th.join().unwrap();
/// }
/// assert_eq!(data.snapshot(), 4);
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: CachePadded<AtomicBool>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: CachePadded::new(AtomicBool::new(false)),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires a spinlock, busy-waiting until it is able to do so.
    ///
    /// Upon returning, the thread is the only thread with the lock held and
    /// is inside a critical section. When the returned guard goes out of
    /// scope without [`SpinLockGuard::unlock`], panic occurs.
    ///
    /// Locking a spinlock in the thread which already holds it never
    /// returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        let guard = loop {
            let guard = InterruptGuard::new();
            if !self.locked.swap(true, Ordering::Acquire) {
                break guard;
            }
            drop(guard);

            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        };

        SpinLockGuard {
            caller: Location::caller(),
            lock: self,
            guard: Some(guard),
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not spin.
    ///
    /// # Errors
    ///
    /// If the spinlock could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = InterruptGuard::new();
        if !self.locked.swap(true, Ordering::Acquire) {
            Ok(SpinLockGuard {
                caller: Location::caller(),
                lock: self,
                guard: Some(guard),
                _not_send: PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }

    /// Returns `true` if some thread currently holds this lock.
    ///
    /// The answer may be stale by the time it is observed; it is meant for
    /// assertions on teardown paths.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: Copy> SpinLock<T> {
    /// Copies the protected value out under the lock.
    pub fn snapshot(&self) -> T {
        let guard = self.lock();
        let val = *guard;
        guard.unlock();
        val
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// An implementation of a "scoped lock" of a spinlock. When this structure
/// is dropped (falls out of scope) without unlock, panic occurs.
///
/// The lock must be explicitly unlocked by [`unlock`] method.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`SpinLock`].
///
/// [`lock`]: SpinLock::lock
/// [`try_lock`]: SpinLock::try_lock
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<InterruptGuard>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock
    /// as available again.
    ///
    /// [`unlock`]: SpinLockGuard::unlock
    pub fn unlock(mut self) {
        self.lock.locked.store(false, Ordering::Release);
        self.guard.take();
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if crate::panicking() {
            self.lock.locked.store(false, Ordering::Release);
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
