pub mod backtrace;
pub mod fatal;
pub mod thread;

pub use backtrace::{backtrace, backtrace_string};
pub use thread::{thread_id, thread_name};
