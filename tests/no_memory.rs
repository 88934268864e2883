use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    ptr,
};

use synch::{ConditionVariable, KernelError, Lock, Semaphore};

std::thread_local! {
    /// Number of allocations that still succeed before the next one fails.
    static SUCCEEDING: Cell<Option<usize>> = const { Cell::new(None) };
    /// Allocations minus frees made by this thread.
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

/// Fails an allocation once the current thread's budget runs out.
struct Failing;

unsafe impl GlobalAlloc for Failing {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let fail = SUCCEEDING
            .try_with(|budget| match budget.get() {
                Some(0) => true,
                Some(n) => {
                    budget.set(Some(n - 1));
                    false
                }
                None => false,
            })
            .unwrap_or(false);
        if fail {
            return ptr::null_mut();
        }
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            let _ = LIVE.try_with(|live| live.set(live.get() + 1));
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = LIVE.try_with(|live| live.set(live.get() - 1));
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: Failing = Failing;

/// Runs `f` with only `budget` allocations succeeding.
fn with_budget<R>(budget: usize, f: impl FnOnce() -> R) -> R {
    SUCCEEDING.with(|b| b.set(Some(budget)));
    let r = f();
    SUCCEEDING.with(|b| b.set(None));
    r
}

fn live() -> isize {
    LIVE.with(Cell::get)
}

fn assert_no_memory<T>(budget: usize, create: impl FnOnce() -> Result<T, KernelError>) {
    let before = live();
    let result = with_budget(budget, create);
    assert_eq!(result.err(), Some(KernelError::NoMemory), "budget {budget}");
    assert_eq!(live(), before, "leaked with budget {budget}");
}

#[test]
fn name_copy_fails() {
    assert_no_memory(0, || Semaphore::new("abc", 1));
    assert_no_memory(0, || Lock::new("abc"));
    assert_no_memory(0, || ConditionVariable::new("abc"));
}

#[test]
fn wait_channel_fails() {
    // The primitive's own name is copied first; the wait channel's is second.
    assert_no_memory(1, || Semaphore::new("abc", 1));
    assert_no_memory(1, || Lock::new("abc"));
    assert_no_memory(1, || ConditionVariable::new("abc"));
}

#[test]
fn creation_allocates_only_names() {
    let before = live();
    let sema = with_budget(2, || Semaphore::new("abc", 1)).unwrap();
    let lock = with_budget(2, || Lock::new("abc")).unwrap();
    let cv = with_budget(2, || ConditionVariable::new("abc")).unwrap();
    sema.destroy();
    lock.destroy();
    cv.destroy();
    assert_eq!(live(), before);
}

#[test]
fn empty_name_needs_no_memory() {
    let sema = with_budget(0, || Semaphore::new("", 0)).unwrap();
    assert_eq!(sema.name(), "");
    sema.destroy();
}
