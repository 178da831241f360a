pub use crate::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::fiber::{self, yield_now, Fiber, State};
pub use crate::scheduler::{Handle, Scheduler, Task};
