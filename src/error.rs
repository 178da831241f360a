use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("fiber stack allocation failed: {0}")]
    StackAllocation(#[source] io::Error),

    #[error("worker spawn failed: {0}")]
    Spawn(#[source] io::Error),

    #[error("logger already installed: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn scheduler<S: Into<String>>(msg: S) -> Self {
        Error::Scheduler(msg.into())
    }
}
