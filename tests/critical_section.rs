use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
};

use kbase::{
    interrupt::InterruptGuard,
    kprint::Console,
    thread::{ThreadState, get_state_by_tid, hosted::ThreadBuilder},
};
use synch::{ConditionVariable, Lock, Semaphore, SystemConfigurationBuilder, TraceFlags};

/// More sleepers than a small preallocated wait list would hold.
const SLEEPERS: usize = 8;

/// Counts allocations made while the allocating thread holds a spin lock.
struct GuardedCounter;

static GUARDED_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for GuardedCounter {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if InterruptGuard::is_guarded() {
            GUARDED_ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: GuardedCounter = GuardedCounter;

struct Discard;

impl Console for Discard {
    fn write_str(&self, _: &str) {}
}

/// A name longer than the console's line buffer, so that a trace naming it
/// allocates while being formatted. Turns every trace on first.
fn long_name(kind: &str) -> String {
    static CONFIGURE: Once = Once::new();
    CONFIGURE.call_once(|| {
        SystemConfigurationBuilder::new()
            .set_console(Discard)
            .set_quiet(false)
            .set_trace(TraceFlags::all());
    });
    format!("{kind}-{}", "z".repeat(300))
}

fn wait_until_parked(tids: &[u64]) {
    for &tid in tids {
        while get_state_by_tid(tid) != Ok(ThreadState::Parked) {
            std::thread::yield_now();
        }
    }
}

fn assert_nothing_allocated_under_spin_lock() {
    assert_eq!(
        GUARDED_ALLOCATIONS.load(Ordering::SeqCst),
        0,
        "allocated while a spin lock was held"
    );
}

#[test]
fn lock_sleepers() {
    let lock = Arc::new(Lock::new(&long_name("lock")).unwrap());
    lock.acquire();

    let sleepers = (0..SLEEPERS)
        .map(|_| {
            let lock = lock.clone();
            ThreadBuilder::new("sleeper").spawn(move || {
                lock.acquire();
                lock.release();
            })
        })
        .collect::<Vec<_>>();
    wait_until_parked(&sleepers.iter().map(|s| s.tid).collect::<Vec<_>>());

    lock.release();
    for sleeper in sleepers {
        sleeper.join();
    }
    assert_nothing_allocated_under_spin_lock();
}

#[test]
fn semaphore_sleepers() {
    let sema = Arc::new(Semaphore::new(&long_name("sema"), 0).unwrap());

    let sleepers = (0..SLEEPERS)
        .map(|_| {
            let sema = sema.clone();
            ThreadBuilder::new("sleeper").spawn(move || sema.down())
        })
        .collect::<Vec<_>>();
    wait_until_parked(&sleepers.iter().map(|s| s.tid).collect::<Vec<_>>());

    for _ in 0..SLEEPERS {
        sema.up();
    }
    for sleeper in sleepers {
        sleeper.join();
    }
    assert_eq!(sema.count(), 0);
    assert_nothing_allocated_under_spin_lock();
}

#[test]
fn condition_variable_sleepers() {
    let lock = Arc::new(Lock::new(&long_name("lock")).unwrap());
    let cv = Arc::new(ConditionVariable::new(&long_name("cv")).unwrap());
    let open = Arc::new(AtomicUsize::new(0));

    let sleepers = (0..SLEEPERS)
        .map(|_| {
            let (lock, cv, open) = (lock.clone(), cv.clone(), open.clone());
            ThreadBuilder::new("sleeper").spawn(move || {
                lock.acquire();
                cv.wait_while(&lock, || open.load(Ordering::SeqCst) == 0);
                lock.release();
            })
        })
        .collect::<Vec<_>>();
    wait_until_parked(&sleepers.iter().map(|s| s.tid).collect::<Vec<_>>());

    lock.acquire();
    open.store(1, Ordering::SeqCst);
    cv.broadcast(&lock);
    lock.release();
    for sleeper in sleepers {
        sleeper.join();
    }
    assert_nothing_allocated_under_spin_lock();
}
