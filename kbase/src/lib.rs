//! The base of the kernel that the blocking primitives are built on.
//!
//! This crate contains the leaf facilities that the [`synch`] crate treats as
//! external collaborators:
//!
//! - [`spinlock`]: the non-sleeping spin mutex used for tiny critical sections.
//! - [`interrupt`]: the per-thread critical section bookkeeping a spin lock
//!   enters while it is held.
//! - [`thread`]: thread identity, the interrupt-context query, and the
//!   park/unpark interface of the scheduler.
//! - [`kprint`]: the console and the logging macros.
//!
//! None of the modules here ever put a thread to sleep on their own; they only
//! expose the pieces ([`thread::Current::park_with`], [`thread::ParkHandle`])
//! that a wait queue needs to do so.
//!
//! With the `hosted` feature (enabled by default) the scheduler and the
//! console are backed by the host operating system, so that the primitives
//! can be exercised on a development machine. A kernel build disables the
//! feature and registers its own [`thread::scheduler::Scheduler`] and
//! [`kprint::Console`].
//!
//! [`synch`]: ../synch/index.html
#![cfg_attr(not(feature = "hosted"), no_std)]
#![deny(missing_docs)]

extern crate alloc;

use core::sync::atomic::AtomicBool;

#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod spinlock;
pub mod thread;

/// Silences `info!`, `warning!` and `debug!` when set.
#[doc(hidden)]
pub static QUIET: AtomicBool = AtomicBool::new(false);

/// Returns `true` if the current context is unwinding from a panic.
///
/// Guards that panic when dropped in the wrong state use this to release
/// quietly instead of turning a panic into a double panic.
pub fn panicking() -> bool {
    thread::scheduler::scheduler().panicking()
}
