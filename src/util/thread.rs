//! Thread identity helpers used by log records and diagnostics.

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
pub fn thread_id() -> i64 {
    // SAFETY: gettid has no preconditions and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

/// Stable per-thread number of the calling thread.
#[cfg(not(target_os = "linux"))]
pub fn thread_id() -> i64 {
    use std::sync::atomic::{AtomicI64, Ordering};

    static NEXT_ID: AtomicI64 = AtomicI64::new(1);
    thread_local! {
        static ID: i64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

/// Name of the calling thread, `"unnamed"` when it has none.
pub fn thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_differs_between_threads() {
        let here = thread_id();
        let there = std::thread::spawn(thread_id).join().unwrap();

        assert!(here > 0);
        assert_ne!(here, there);
        assert_eq!(here, thread_id());
    }

    #[test]
    fn test_thread_name() {
        let name = std::thread::Builder::new()
            .name("named-worker".to_string())
            .spawn(thread_name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "named-worker");
    }
}
