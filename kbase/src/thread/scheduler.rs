//! Thread scheduler interface.

use super::{ParkHandle, ThreadState};
use core::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

/// A trait for the thread scheduler the primitives run on.
///
/// The scheduler owns thread identity, knows whether the current cpu is in
/// interrupt context, and is the only component that can stop and restart
/// threads. The blocking primitives never touch threads directly; they only
/// go through this interface (mostly through [`Current`]).
///
/// [`Current`]: super::Current
pub trait Scheduler: Sync {
    /// Thread id of the calling thread.
    fn current_tid(&self) -> u64;

    /// Returns `true` if the current cpu is executing an interrupt handler.
    ///
    /// Blocking is illegal in interrupt context.
    fn in_interrupt(&self) -> bool;

    /// Enter a (nesting) critical section on the current thread.
    fn enter_critical(&self);

    /// Leave the innermost critical section entered by
    /// [`enter_critical`](Self::enter_critical).
    fn exit_critical(&self);

    /// Returns `true` if the current thread is inside a critical section.
    fn is_critical(&self) -> bool;

    /// Mark the current thread parked and return the handle that wakes it.
    ///
    /// The thread keeps running until [`reschedule`](Self::reschedule).
    fn park_current(&self) -> ParkHandle;

    /// Give up the cpu.
    ///
    /// If the current thread was parked by
    /// [`park_current`](Self::park_current), this returns only once its
    /// handle has been unparked, which may already have happened.
    fn reschedule(&self);

    /// State of thread `tid`, or `None` if no such thread is alive.
    fn state_of(&self, tid: u64) -> Option<ThreadState>;

    /// Returns `true` if the current context is unwinding from a panic.
    ///
    /// A kernel answers this from the panic depth its panic handler keeps.
    fn panicking(&self) -> bool;
}

static SCHEDULER: AtomicPtr<&'static dyn Scheduler> = AtomicPtr::new(ptr::null_mut());

/// Set the scheduler of the kernel.
///
/// The scheduler is leaked. It must be set before any thread uses a lock and
/// should not be replaced afterwards.
pub fn set_scheduler(t: impl Scheduler + 'static) {
    let sched: &'static dyn Scheduler = alloc::boxed::Box::leak(alloc::boxed::Box::new(t));
    let slot = alloc::boxed::Box::into_raw(alloc::boxed::Box::new(sched));
    if !SCHEDULER.swap(slot, Ordering::SeqCst).is_null() {
        warning!("The scheduler is replaced while the kernel is running.");
    }
}

/// Get the reference of the kernel scheduler.
pub fn scheduler() -> &'static (dyn Scheduler + 'static) {
    // Safety: the slot is only ever filled with a leaked, never-freed box.
    if let Some(sched) = unsafe { SCHEDULER.load(Ordering::SeqCst).as_ref() } {
        return *sched;
    }
    #[cfg(feature = "hosted")]
    return &super::hosted::HOSTED;
    #[cfg(not(feature = "hosted"))]
    panic!("No scheduler is registered.");
}
