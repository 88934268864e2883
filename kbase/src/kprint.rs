//! Kernel print utilities.
//!
//! Output goes through a single registered [`Console`]. Every call to
//! [`_print`] formats the whole message first and hands it to the console in
//! one write, so lines printed from different threads do not interleave.

use arrayvec::ArrayString;
use core::{
    fmt::Write,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

/// Size of the line buffer used to format a message before writing it out.
const LINE_BUFFER: usize = 256;

/// A sink for the kernel console.
pub trait Console: Sync {
    /// Writes `s` to the console.
    fn write_str(&self, s: &str);
}

static CONSOLE: AtomicPtr<&'static dyn Console> = AtomicPtr::new(ptr::null_mut());

/// Sets the console all print macros write to.
///
/// The console is leaked; registering another one later replaces it.
pub fn set_console(console: impl Console + 'static) {
    let console: &'static dyn Console = alloc::boxed::Box::leak(alloc::boxed::Box::new(console));
    let slot = alloc::boxed::Box::into_raw(alloc::boxed::Box::new(console));
    CONSOLE.store(slot, Ordering::SeqCst);
}

fn console() -> Option<&'static dyn Console> {
    // Safety: the slot is only ever filled with a leaked, never-freed box.
    if let Some(console) = unsafe { CONSOLE.load(Ordering::SeqCst).as_ref() } {
        return Some(*console);
    }
    #[cfg(feature = "hosted")]
    return Some(&HostConsole);
    #[cfg(not(feature = "hosted"))]
    return None;
}

/// Console that writes to the standard error of the host process.
#[cfg(feature = "hosted")]
struct HostConsole;

#[cfg(feature = "hosted")]
impl Console for HostConsole {
    fn write_str(&self, s: &str) {
        use std::io::Write;
        let _ = std::io::stderr().lock().write_all(s.as_bytes());
    }
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let Some(console) = console() else {
        return;
    };
    let mut line = ArrayString::<LINE_BUFFER>::new();
    if line.write_fmt(fmt).is_ok() {
        console.write_str(&line);
    } else {
        console.write_str(&alloc::fmt::format(fmt));
    }
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use alloc::string::String;
    use std::sync::Mutex;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    struct Capture;

    impl Console for Capture {
        fn write_str(&self, s: &str) {
            CAPTURED.lock().unwrap().push_str(s);
        }
    }

    #[test]
    fn macros_write_whole_lines() {
        set_console(Capture);
        info!("lock {} created", "disk");
        warning!("count is {}", 0);
        let long = "x".repeat(LINE_BUFFER * 2);
        println!("{}", long);
        let captured = CAPTURED.lock().unwrap();
        assert!(captured.contains("[INFO] lock disk created\n"));
        assert!(captured.contains("[WARN] count is 0\n"));
        assert!(captured.contains(&alloc::format!("{long}\n")));
    }
}
