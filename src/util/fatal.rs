//! Abort path for contract violations.

use super::backtrace;
use log::Level;
use std::fmt;

pub(crate) const FATAL_TARGET: &str = "spindle::fatal";

/// Reports an unrecoverable contract violation and aborts the process.
///
/// The report goes through the logging facade when a logger accepts it,
/// otherwise straight to stderr. The message is written before the call
/// stack is captured so it survives even if symbolization fails.
#[cold]
#[inline(never)]
pub fn abort_with(args: fmt::Arguments<'_>) -> ! {
    let via_log = log::log_enabled!(target: FATAL_TARGET, Level::Error);

    if via_log {
        log::error!(target: FATAL_TARGET, "fatal: {}", args);
    } else {
        eprintln!("fatal: {}", args);
    }

    let trace = backtrace::backtrace_string(1, "    ");
    if via_log {
        log::error!(target: FATAL_TARGET, "fatal: backtrace:\n{}", trace);
        log::logger().flush();
    } else {
        eprintln!("backtrace:\n{}", trace);
    }

    std::process::abort()
}

/// Logs the formatted message and aborts the process.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::util::fatal::abort_with(format_args!($($arg)+))
    };
}
