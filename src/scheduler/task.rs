//! Units of work accepted by the scheduler.

use crate::fiber::{Callback, Fiber};
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// What a task runs: an existing fiber, or a callback the scheduler wraps
/// in a fiber of its own.
pub enum Work {
    Fiber(Arc<Fiber>),
    Callback(Callback),
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Fiber(fiber) => f.debug_tuple("Fiber").field(&fiber.id()).finish(),
            Work::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// A pending queue entry, optionally pinned to one thread.
#[derive(Debug)]
pub struct Task {
    pub(crate) work: Work,
    pub(crate) affinity: Option<ThreadId>,
}

impl Task {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            work: Work::Callback(Box::new(f)),
            affinity: None,
        }
    }

    pub fn fiber(fiber: Arc<Fiber>) -> Self {
        Task {
            work: Work::Fiber(fiber),
            affinity: None,
        }
    }

    /// Restricts the task to `thread`. A thread that never joins the pool
    /// never runs it.
    pub fn pin_to(mut self, thread: ThreadId) -> Self {
        self.affinity = Some(thread);
        self
    }

    pub fn affinity(&self) -> Option<ThreadId> {
        self.affinity
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn into_work(self) -> Work {
        self.work
    }

    /// Whether the scan on `thread` may take this task now.
    pub(crate) fn is_eligible_on(&self, thread: ThreadId) -> bool {
        if self.is_pinned_elsewhere(thread) {
            return false;
        }
        match &self.work {
            // still switching out on another carrier
            Work::Fiber(fiber) => fiber.state() != crate::fiber::State::Running,
            Work::Callback(_) => true,
        }
    }

    pub(crate) fn is_pinned_elsewhere(&self, thread: ThreadId) -> bool {
        matches!(self.affinity, Some(pinned) if pinned != thread)
    }
}

impl From<Arc<Fiber>> for Task {
    fn from(fiber: Arc<Fiber>) -> Self {
        Task::fiber(fiber)
    }
}

impl From<Callback> for Task {
    fn from(callback: Callback) -> Self {
        Task {
            work: Work::Callback(callback),
            affinity: None,
        }
    }
}
