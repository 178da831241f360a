use crate::error::{Error, Result};
use std::time::Duration;

/// Default stack size of task fibers.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Default stack size of the caller-thread root fiber.
pub const DEFAULT_ROOT_STACK_SIZE: usize = 1024 * 1024;

/// Smallest stack a fiber may be created with.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

const MAX_THREADS: usize = 1024;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_threads: Option<usize>,
    pub use_caller: bool,
    pub name: String,
    pub stack_size: usize,
    pub root_stack_size: usize,
    pub idle_timeout: Duration,
    pub reuse_callback_fibers: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            use_caller: true,
            name: "spindle".to_string(),
            stack_size: DEFAULT_STACK_SIZE,
            root_stack_size: DEFAULT_ROOT_STACK_SIZE,
            idle_timeout: Duration::from_millis(10),
            reuse_callback_fibers: false,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > MAX_THREADS {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.name.is_empty() {
            return Err(Error::config("name must not be empty"));
        }

        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::config(format!(
                "stack_size must be at least {} bytes",
                MIN_STACK_SIZE
            )));
        }

        if self.root_stack_size < MIN_STACK_SIZE {
            return Err(Error::config(format!(
                "root_stack_size must be at least {} bytes",
                MIN_STACK_SIZE
            )));
        }

        if self.idle_timeout.is_zero() {
            return Err(Error::config("idle_timeout must be > 0"));
        }

        Ok(())
    }

    /// Number of threads taking part in scheduling, the caller included.
    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn use_caller(mut self, use_caller: bool) -> Self {
        self.config.use_caller = use_caller;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    pub fn root_stack_size(mut self, size: usize) -> Self {
        self.config.root_stack_size = size;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn reuse_callback_fibers(mut self, reuse: bool) -> Self {
        self.config.reuse_callback_fibers = reuse;
        self
    }

    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
