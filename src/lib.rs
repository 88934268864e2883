//! # Blocking Synchronization Primitives.
//!
//! A kernel must coordinate access to shared state among many threads that
//! run concurrently on several cpus. The [`SpinLock`] provides mutual
//! exclusion by busy-waiting, which is only acceptable for tiny critical
//! sections. This crate provides the primitives that put a waiting thread to
//! sleep instead:
//!
//! - [`Semaphore`]: a counting semaphore. [`Semaphore::down`] (P) takes a unit
//!   of the count, sleeping while it is zero; [`Semaphore::up`] (V) gives one
//!   back and wakes a sleeper.
//! - [`Lock`]: a sleeping mutual-exclusion lock that remembers which thread
//!   holds it. Only the holder may release it.
//! - [`ConditionVariable`]: lets the holder of a [`Lock`] atomically give up
//!   the lock and sleep until another holder signals a change of state.
//!
//! | Primitive             | Blocks Thread? | Fair? | Typical Use Case                                 |
//! |-----------------------|----------------|-------|--------------------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | No    | Short, uncontended critical sections             |
//! | [`Lock`]              | Yes            | No    | Exclusive access to shared data                  |
//! | [`ConditionVariable`] | Yes            | No    | Waiting for a condition to become true           |
//! | [`Semaphore`]         | Yes            | No    | Limiting access to a bounded resource            |
//!
//! None of the primitives is fair: a thread that arrives while others are
//! sleeping may get the resource first.
//!
//! ## Building blocks
//!
//! Each primitive keeps its state in a private [`SpinLock`] together with a
//! [`WaitChannel`]. An operation takes the spin lock, looks at the state, and
//! either finishes right away or goes to sleep on the channel. Going to sleep
//! registers the thread on the channel *before* the spin lock is released,
//! and waking requires the same spin lock, so a wakeup can never fall between
//! the check and the sleep.
//!
//! ## Contract violations
//!
//! Releasing a lock the caller does not hold, signalling a condition variable
//! without holding its lock, blocking in interrupt context, and destroying a
//! primitive that still has sleepers are bugs in the caller. They panic
//! immediately instead of being reported, as continuing would break the
//! mutual exclusion the rest of the kernel relies on. Running out of memory
//! while creating a primitive is the only error that is returned.
//!
//! [`SpinLock`]: kbase::spinlock::SpinLock
#![cfg_attr(not(feature = "hosted"), no_std)]
#![deny(missing_docs)]

extern crate alloc;

use core::sync::atomic::{AtomicU32, Ordering};

macro_rules! trace {
    ($flags:expr, $($arg:tt)*) => {
        if $crate::traced($flags) {
            kbase::debug!($($arg)*)
        }
    };
}

pub mod condition_variable;
pub mod lock;
pub mod semaphore;
pub mod wchan;

pub use condition_variable::ConditionVariable;
pub use lock::{Lock, LockGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use wchan::WaitChannel;

/// Enum representing errors that can occur while creating a primitive.
#[derive(Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Out of memory. (ENOMEM)
    NoMemory,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::NoMemory => -12isize,
        }) as usize
    }
}

impl From<alloc::collections::TryReserveError> for KernelError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        KernelError::NoMemory
    }
}

/// Copies `name` into a freshly allocated string.
pub(crate) fn dup_name(name: &str) -> Result<alloc::string::String, KernelError> {
    let mut s = alloc::string::String::new();
    s.try_reserve_exact(name.len())?;
    s.push_str(name);
    Ok(s)
}

bitflags::bitflags! {
    /// Which primitives emit debug traces.
    pub struct TraceFlags: u32 {
        /// Semaphore creation, destruction and sleeps.
        const SEMAPHORE = 1 << 0;
        /// Lock creation, destruction and sleeps.
        const LOCK = 1 << 1;
        /// Condition variable creation, destruction and sleeps.
        const CONDVAR = 1 << 2;
        /// Every sleep and wakeup on a wait channel.
        const WCHAN = 1 << 3;
    }
}

static TRACE: AtomicU32 = AtomicU32::new(0);

/// Returns `true` if any of `flags` is enabled for tracing.
pub fn traced(flags: TraceFlags) -> bool {
    TraceFlags::from_bits_truncate(TRACE.load(Ordering::Relaxed)).intersects(flags)
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] configures the collaborators the
/// primitives run on before any of them is used.
///
/// ```
/// use synch::{SystemConfigurationBuilder, TraceFlags};
///
/// SystemConfigurationBuilder::new()
///     .set_quiet(false)
///     .set_trace(TraceFlags::LOCK | TraceFlags::CONDVAR);
/// ```
pub struct SystemConfigurationBuilder {
    _p: (),
}

impl SystemConfigurationBuilder {
    /// Starts a configuration.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { _p: () }
    }

    /// Sets the system-wide scheduler.
    ///
    /// The scheduler provides thread identity, the interrupt-context query,
    /// and parking. It must be set before any primitive is used.
    pub fn set_scheduler(self, scheduler: impl kbase::thread::scheduler::Scheduler + 'static) -> Self {
        kbase::thread::scheduler::set_scheduler(scheduler);
        self
    }

    /// Sets the console that log messages are written to.
    pub fn set_console(self, console: impl kbase::kprint::Console + 'static) -> Self {
        kbase::kprint::set_console(console);
        self
    }

    /// Silences `info`, `warning` and `debug` messages.
    pub fn set_quiet(self, quiet: bool) -> Self {
        kbase::QUIET.store(quiet, Ordering::SeqCst);
        self
    }

    /// Selects which primitives emit debug traces.
    pub fn set_trace(self, flags: TraceFlags) -> Self {
        TRACE.store(flags.bits(), Ordering::Relaxed);
        kbase::info!("Tracing {:?}.", flags);
        self
    }
}
