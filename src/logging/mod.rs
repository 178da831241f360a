//! Logging backend for the `log` facade.
//!
//! Records are routed by target to named loggers: the logger whose name is
//! the longest `::`-delimited prefix of the target handles the record, the
//! root logger handles everything else. Each logger filters by level and
//! fans the formatted line out to its appenders.
//!
//! ```no_run
//! use log::LevelFilter;
//! use spindle::logging::{self, AsyncFileAppender, ConsoleAppender, Logger};
//!
//! logging::Builder::new()
//!     .root(Logger::new("root").level(LevelFilter::Info).appender(ConsoleAppender::new()))
//!     .logger(
//!         Logger::new("spindle::fiber")
//!             .level(LevelFilter::Debug)
//!             .appender(AsyncFileAppender::open("log/fiber.log").unwrap()),
//!     )
//!     .install()
//!     .unwrap();
//! ```

pub mod appender;
pub mod async_file;

pub use appender::{Appender, ConsoleAppender};
pub use async_file::{AsyncFileAppender, AsyncFileOptions};

use crate::error::Result;
use crate::fiber;
use crate::util::fatal::FATAL_TARGET;
use crate::util::{thread_id, thread_name};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

/// A named logger: a level filter and a set of appenders.
pub struct Logger {
    name: String,
    level: LevelFilter,
    appenders: Vec<Arc<dyn Appender>>,
}

impl Logger {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            level: LevelFilter::Debug,
            appenders: Vec::new(),
        }
    }

    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn appender<A: Appender + 'static>(self, appender: A) -> Self {
        self.shared_appender(Arc::new(appender))
    }

    /// Adds an appender that other loggers may also write to.
    pub fn shared_appender(mut self, appender: Arc<dyn Appender>) -> Self {
        self.appenders.push(appender);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.level
    }

    fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    fn handles(&self, target: &str) -> bool {
        match target.strip_prefix(self.name.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with("::"),
            None => false,
        }
    }

    fn write(&self, level: Level, line: &str) {
        for appender in &self.appenders {
            if level <= appender.level() {
                appender.append(level, line);
            }
        }
    }

    fn flush(&self) {
        for appender in &self.appenders {
            appender.flush();
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("appenders", &self.appenders.len())
            .finish()
    }
}

/// The `log::Log` implementation holding every logger.
#[derive(Debug)]
pub struct LoggerRegistry {
    root: Logger,
    // longest name first so the most specific logger wins
    named: Vec<Logger>,
}

impl LoggerRegistry {
    fn route(&self, target: &str) -> &Logger {
        self.named
            .iter()
            .find(|logger| logger.handles(target))
            .unwrap_or(&self.root)
    }

    /// Looks up a named logger, falling back to the root logger.
    pub fn logger(&self, name: &str) -> &Logger {
        self.route(name)
    }

    pub fn max_level(&self) -> LevelFilter {
        self.named
            .iter()
            .map(Logger::level_filter)
            .fold(self.root.level, Ord::max)
    }
}

impl Log for LoggerRegistry {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.route(metadata.target()).enabled(metadata.level())
    }

    fn log(&self, record: &Record<'_>) {
        let logger = self.route(record.target());
        if logger.enabled(record.level()) {
            logger.write(record.level(), &format_record(record));
        }
    }

    fn flush(&self) {
        self.root.flush();
        for logger in &self.named {
            logger.flush();
        }
    }
}

#[derive(Debug)]
pub struct Builder {
    root: Logger,
    named: Vec<Logger>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            root: Logger::new("root"),
            named: Vec::new(),
        }
    }

    pub fn root(mut self, logger: Logger) -> Self {
        self.root = logger;
        self
    }

    /// Adds a named logger, replacing any earlier one with the same name.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.named.retain(|existing| existing.name != logger.name);
        self.named.push(logger);
        self
    }

    pub fn build(mut self) -> LoggerRegistry {
        self.named
            .sort_by(|a, b| b.name.len().cmp(&a.name.len()));
        LoggerRegistry {
            root: self.root,
            named: self.named,
        }
    }

    /// Installs the registry as the process-wide logger.
    pub fn install(self) -> Result<()> {
        let registry = self.build();
        let max_level = registry.max_level();
        log::set_boxed_logger(Box::new(registry))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs a root logger writing to stderr at `level`.
pub fn init(level: LevelFilter) -> Result<()> {
    Builder::new()
        .root(Logger::new("root").level(level).appender(ConsoleAppender::new()))
        .install()
}

fn level_label(record: &Record<'_>) -> &'static str {
    if record.target() == FATAL_TARGET {
        return "FATAL";
    }
    match record.level() {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// `<time> <tid> <thread> <fiber> [<LEVEL>] [<target>] <file>:<line> <message>`
pub fn format_record(record: &Record<'_>) -> String {
    format!(
        "{} {} {} {} [{}] [{}] {}:{} {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        thread_id(),
        thread_name(),
        fiber::current_id(),
        level_label(record),
        record.target(),
        record.file().unwrap_or("?"),
        record.line().unwrap_or(0),
        record.args()
    )
}
