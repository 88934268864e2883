//! Scheduler backed by the threads of the host operating system.
//!
//! Every host thread that touches the scheduler gets a kernel thread id and a
//! [`ThreadState`] entry. Parking is built on [`std::thread::park`] with an
//! explicit token, so an unpark that lands between
//! [`Scheduler::park_current`] and [`Scheduler::reschedule`] is not lost.
//!
//! Threads spawned through [`ThreadBuilder`] know their tid before they start
//! running, which lets a test observe them through [`get_state_by_tid`].
//!
//! [`get_state_by_tid`]: super::get_state_by_tid

use super::{ParkHandle, ThreadState, scheduler::Scheduler};
use alloc::{string::String, sync::Arc, task::Wake};
use core::{
    cell::Cell,
    sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    task::Waker,
};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    thread::Thread,
};

pub(crate) static HOSTED: Hosted = Hosted;

static TID: AtomicU64 = AtomicU64::new(0);
static THREAD_STATE_TABLE: Mutex<BTreeMap<u64, Arc<AtomicU8>>> = Mutex::new(BTreeMap::new());

fn state_table() -> MutexGuard<'static, BTreeMap<u64, Arc<AtomicU8>>> {
    THREAD_STATE_TABLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn register(tid: u64, state: ThreadState) -> Arc<AtomicU8> {
    let state = Arc::new(AtomicU8::new(state.into()));
    state_table().insert(tid, state.clone());
    state
}

/// Identity handed from [`ThreadBuilder::spawn`] to the spawned thread.
struct Identity {
    tid: u64,
    state: Arc<AtomicU8>,
}

/// Per-thread bookkeeping of the hosted scheduler.
struct Context {
    tid: u64,
    state: Arc<AtomicU8>,
    interrupt: Cell<usize>,
    /// Allocated once per thread; every park reuses it.
    parker: Arc<Parker>,
    parked: Cell<bool>,
}

impl Context {
    fn new() -> Self {
        let Identity { tid, state } = IDENTITY.with(|id| id.take()).unwrap_or_else(|| {
            let tid = TID.fetch_add(1, Ordering::SeqCst);
            Identity {
                tid,
                state: register(tid, ThreadState::Running),
            }
        });
        state.store(ThreadState::Running.into(), Ordering::SeqCst);
        let parker = Arc::new(Parker {
            thread: std::thread::current(),
            token: AtomicBool::new(false),
            state: state.clone(),
        });
        Self {
            tid,
            state,
            interrupt: Cell::new(0),
            parker,
            parked: Cell::new(false),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.state
            .store(ThreadState::Exited.into(), Ordering::SeqCst);
        state_table().remove(&self.tid);
    }
}

std::thread_local! {
    static IDENTITY: Cell<Option<Identity>> = const { Cell::new(None) };
    static CONTEXT: Context = Context::new();
    // Const-initialized: entering a critical section must not allocate.
    static CRITICAL: Cell<usize> = const { Cell::new(0) };
}

/// Wakes one parked host thread.
struct Parker {
    thread: Thread,
    token: AtomicBool,
    state: Arc<AtomicU8>,
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.state
            .store(ThreadState::Runnable.into(), Ordering::SeqCst);
        self.token.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// The hosted scheduler.
///
/// Used by default when the `hosted` feature is enabled and no other
/// scheduler is registered.
pub struct Hosted;

impl Scheduler for Hosted {
    fn current_tid(&self) -> u64 {
        CONTEXT.with(|ctx| ctx.tid)
    }

    fn in_interrupt(&self) -> bool {
        CONTEXT.with(|ctx| ctx.interrupt.get() != 0)
    }

    fn enter_critical(&self) {
        let _ = CRITICAL.try_with(|critical| critical.set(critical.get() + 1));
    }

    fn exit_critical(&self) {
        let _ = CRITICAL.try_with(|critical| {
            let prev = critical.get();
            assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
            critical.set(prev - 1);
        });
    }

    fn is_critical(&self) -> bool {
        CRITICAL
            .try_with(|critical| critical.get() != 0)
            .unwrap_or(false)
    }

    fn park_current(&self) -> ParkHandle {
        CONTEXT.with(|ctx| {
            assert!(!ctx.parked.replace(true), "Thread {} is already parked.", ctx.tid);
            ctx.parker.token.store(false, Ordering::Relaxed);
            ctx.state
                .store(ThreadState::Parked.into(), Ordering::SeqCst);
            ParkHandle::new(ctx.tid, Waker::from(ctx.parker.clone()))
        })
    }

    fn reschedule(&self) {
        CONTEXT.with(|ctx| {
            if ctx.parked.replace(false) {
                while !ctx.parker.token.load(Ordering::Acquire) {
                    std::thread::park();
                }
                ctx.state
                    .store(ThreadState::Running.into(), Ordering::SeqCst);
            } else {
                std::thread::yield_now();
            }
        })
    }

    fn panicking(&self) -> bool {
        std::thread::panicking()
    }

    fn state_of(&self, tid: u64) -> Option<ThreadState> {
        let state = state_table().get(&tid)?.load(Ordering::SeqCst);
        ThreadState::try_from(state).ok()
    }
}

/// Run `f` as if the current thread were executing an interrupt handler.
///
/// Blocking operations called from `f` trip their interrupt-context
/// assertion.
pub fn simulate_interrupt<R>(f: impl FnOnce() -> R) -> R {
    struct InInterrupt;
    impl Drop for InInterrupt {
        fn drop(&mut self) {
            CONTEXT.with(|ctx| ctx.interrupt.set(ctx.interrupt.get() - 1));
        }
    }

    CONTEXT.with(|ctx| ctx.interrupt.set(ctx.interrupt.get() + 1));
    let _in_interrupt = InInterrupt;
    f()
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    tid: u64,
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name: String::from(name),
        }
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> u64 {
        self.tid
    }

    /// Spawn the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let Self { tid, name } = self;
        let state = register(tid, ThreadState::Runnable);
        let identity = Identity { tid, state };
        let inner = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                IDENTITY.with(|id| id.set(Some(identity)));
                CONTEXT.with(|_| ());
                thread_fn()
            })
            .unwrap_or_else(|e| panic!("Fail to spawn thread `{name}`: {e}"));
        JoinHandle { tid, inner }
    }
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    inner: std::thread::JoinHandle<()>,
}

impl JoinHandle {
    /// Wait for the thread to finish.
    ///
    /// A panic of the joined thread is propagated to the caller.
    pub fn join(self) {
        if let Err(payload) = self.inner.join() {
            std::panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interrupt::InterruptGuard,
        thread::{Current, get_state_by_tid},
    };

    fn wait_for_state(tid: u64, expected: ThreadState) {
        while get_state_by_tid(tid) != Ok(expected) {
            std::thread::yield_now();
        }
    }

    #[test]
    fn tids_are_distinct() {
        let main = Current::get_tid();
        assert_eq!(main, Current::get_tid());
        let builder = ThreadBuilder::new("other");
        let tid = builder.get_tid();
        assert_ne!(tid, main);
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let handle = {
            let seen = seen.clone();
            builder.spawn(move || seen.store(Current::get_tid(), Ordering::SeqCst))
        };
        assert_eq!(handle.tid, tid);
        handle.join();
        assert_eq!(seen.load(Ordering::SeqCst), tid);
    }

    #[test]
    fn unpark_before_reschedule_is_not_lost() {
        let tid = Current::get_tid();
        Current::park_with(|h| {
            assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Parked));
            h.unpark();
        });
        assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Running));
    }

    #[test]
    fn parker_is_reused_across_parks() {
        let tid = Current::get_tid();
        for _ in 0..3 {
            Current::park_with(|h| {
                assert!(!InterruptGuard::is_guarded());
                h.unpark();
            });
            assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Running));
        }
        let parker = CONTEXT.with(|ctx| ctx.parker.clone());
        // The context and this test hold the only references.
        assert_eq!(Arc::strong_count(&parker), 2);
    }

    #[test]
    fn park_and_unpark_from_other_thread() {
        let slot = Arc::new(Mutex::new(None::<ParkHandle>));
        let worker = {
            let slot = slot.clone();
            ThreadBuilder::new("parkee").spawn(move || {
                Current::park_with(|h| *slot.lock().unwrap() = Some(h));
            })
        };
        wait_for_state(worker.tid, ThreadState::Parked);
        let handle = loop {
            if let Some(h) = slot.lock().unwrap().take() {
                break h;
            }
            std::thread::yield_now();
        };
        assert_eq!(handle.tid(), worker.tid);
        handle.unpark();
        worker.join();
    }

    #[test]
    fn interrupt_context_nests() {
        assert!(!Current::in_interrupt());
        simulate_interrupt(|| {
            assert!(Current::in_interrupt());
            simulate_interrupt(|| assert!(Current::in_interrupt()));
            assert!(Current::in_interrupt());
        });
        assert!(!Current::in_interrupt());
    }
}
