//! Log sinks.

use log::{Level, LevelFilter};
use std::io::{self, Write};

/// Destination for formatted log lines.
pub trait Appender: Send + Sync {
    /// Writes one formatted line, newline included.
    fn append(&self, level: Level, line: &str);

    /// Most verbose level this appender accepts.
    fn level(&self) -> LevelFilter {
        LevelFilter::Trace
    }

    fn flush(&self) {}
}

/// Writes log lines to stderr.
#[derive(Debug)]
pub struct ConsoleAppender {
    level: LevelFilter,
}

impl ConsoleAppender {
    pub fn new() -> Self {
        Self {
            level: LevelFilter::Trace,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }
}

impl Default for ConsoleAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl Appender for ConsoleAppender {
    fn append(&self, _level: Level, line: &str) {
        let _ = io::stderr().lock().write_all(line.as_bytes());
    }

    fn level(&self) -> LevelFilter {
        self.level
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}
