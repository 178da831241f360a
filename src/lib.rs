//! Spindle - stackful fibers on a fixed thread pool
//!
//! An M:N cooperative runtime: blocking-style code runs on fibers with their
//! own stacks, multiplexed onto a small pool of OS threads by a scheduler.
//! Control changes hands only when a fiber yields.
//!
//! # Quick Start
//!
//! ```no_run
//! use spindle::prelude::*;
//!
//! // The calling thread is one of the two scheduling threads.
//! let scheduler = Scheduler::new(2, true, "main").unwrap();
//! scheduler.start().unwrap();
//!
//! for i in 0..4 {
//!     scheduler.schedule(move || {
//!         println!("task {} on fiber {}", i, spindle::fiber::current_id());
//!     });
//! }
//!
//! // Runs the caller's share of the work, then joins the pool.
//! scheduler.stop();
//! ```
//!
//! # Features
//!
//! - **Fibers**: resume/yield with a fixed counterpart, stack reuse via `reset`
//! - **Scheduler**: FIFO queue, thread affinity, condvar-based idle wakeups
//! - **Failure containment**: a panicking task is logged, never fatal to its thread
//! - **Logging**: named loggers for the `log` facade with console and async file appenders

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod fiber;
pub mod logging;
pub mod prelude;
pub mod scheduler;
pub mod util;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use error::{Error, Result};
pub use fiber::{Fiber, State};
pub use scheduler::{Handle, Scheduler, Task};

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_fiber_on_scheduler() {
        let scheduler = Scheduler::new(1, true, "lib").unwrap();
        scheduler.start().unwrap();

        let steps = Arc::new(Mutex::new(Vec::new()));
        let s = steps.clone();
        let task = Fiber::new(move || {
            s.lock().push(1);
        });
        scheduler.schedule_fiber(task.clone());
        scheduler.stop();

        assert_eq!(*steps.lock(), vec![1]);
        assert_eq!(task.state(), State::Terminated);
    }

    #[test]
    fn test_fiber_reschedules_itself() {
        let scheduler = Scheduler::new(1, true, "resched").unwrap();
        scheduler.start().unwrap();

        let steps = Arc::new(Mutex::new(Vec::new()));
        let s = steps.clone();
        scheduler.schedule(move || {
            for i in 0..3 {
                s.lock().push(i);
                Handle::current().unwrap().schedule_fiber(Fiber::current());
                fiber::yield_now();
            }
        });
        scheduler.stop();

        assert_eq!(*steps.lock(), vec![0, 1, 2]);
    }
}
