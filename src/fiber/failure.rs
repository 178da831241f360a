//! Panics escaping a fiber callback.

use crate::util::backtrace;
use std::any::Any;
use std::backtrace::Backtrace;

/// A panic caught at the trampoline boundary.
#[derive(Debug)]
pub struct TaskFailure {
    pub message: String,
    trace: Backtrace,
}

impl TaskFailure {
    /// Captures the payload and the current call stack. Symbols are resolved
    /// lazily when the failure is rendered.
    pub(crate) fn capture(payload: Box<dyn Any + Send>) -> Self {
        Self {
            message: message_of(payload.as_ref()),
            trace: Backtrace::force_capture(),
        }
    }

    /// Call stack formatted one frame per line.
    pub fn backtrace(&self, prefix: &str) -> String {
        backtrace::render(&backtrace::frames(&self.trace), prefix)
    }
}

fn message_of(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
