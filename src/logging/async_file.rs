//! Buffered log-file writer running on a background thread.

use super::appender::Appender;
use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{Level, LevelFilter};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const FLUSH_ACK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct AsyncFileOptions {
    /// Bytes collected before the writer hits the file.
    pub buffer_capacity: usize,
    /// Longest time a line may sit in the buffer.
    pub flush_interval: Duration,
    /// Lines that may wait for the writer before new ones are dropped.
    pub queue_capacity: usize,
    pub level: LevelFilter,
}

impl Default for AsyncFileOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 4 * 1024 * 1024,
            flush_interval: Duration::from_secs(1),
            queue_capacity: 64 * 1024,
            level: LevelFilter::Trace,
        }
    }
}

enum Message {
    Line(String),
    Flush(Sender<()>),
}

/// Appends log lines to a file without blocking the logging thread on I/O.
///
/// Lines are queued to a writer thread that batches them into one buffer
/// and writes it when full or every flush interval. A full queue drops the
/// line and counts it. Dropping the appender drains the queue, flushes the
/// file and joins the writer.
pub struct AsyncFileAppender {
    path: PathBuf,
    level: LevelFilter,
    sender: Option<Sender<Message>>,
    writer: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl AsyncFileAppender {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, AsyncFileOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: AsyncFileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (sender, receiver) = bounded(options.queue_capacity.max(1));
        let level = options.level;
        let writer = thread::Builder::new()
            .name("spindle-log-writer".to_string())
            .spawn(move || write_loop(file, receiver, options))?;

        Ok(Self {
            path,
            level,
            sender: Some(sender),
            writer: Some(writer),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines discarded because the writer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Appender for AsyncFileAppender {
    fn append(&self, _level: Level, line: &str) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(Message::Line(line.to_owned())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn level(&self) -> LevelFilter {
        self.level
    }

    /// Blocks until everything queued so far reached the file, or a second
    /// has passed.
    fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if sender
            .send_timeout(Message::Flush(ack_tx), FLUSH_ACK_TIMEOUT)
            .is_ok()
        {
            let _ = ack_rx.recv_timeout(FLUSH_ACK_TIMEOUT);
        }
    }
}

impl Drop for AsyncFileAppender {
    fn drop(&mut self) {
        // disconnecting the channel tells the writer to drain and exit
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl std::fmt::Debug for AsyncFileAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFileAppender")
            .field("path", &self.path)
            .field("level", &self.level)
            .field("dropped", &self.dropped())
            .finish()
    }
}

fn write_loop(mut file: File, receiver: Receiver<Message>, options: AsyncFileOptions) {
    let mut buffer: Vec<u8> = Vec::with_capacity(options.buffer_capacity);
    let mut last_flush = Instant::now();

    loop {
        if last_flush.elapsed() >= options.flush_interval {
            write_out(&mut file, &mut buffer);
            last_flush = Instant::now();
        }

        let wait = options.flush_interval.saturating_sub(last_flush.elapsed());
        match receiver.recv_timeout(wait) {
            Ok(Message::Line(line)) => {
                if !buffer.is_empty() && buffer.len() + line.len() > options.buffer_capacity {
                    write_out(&mut file, &mut buffer);
                }
                buffer.extend_from_slice(line.as_bytes());
            }
            Ok(Message::Flush(ack)) => {
                write_out(&mut file, &mut buffer);
                last_flush = Instant::now();
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {
                write_out(&mut file, &mut buffer);
                last_flush = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => {
                write_out(&mut file, &mut buffer);
                break;
            }
        }
    }
}

fn write_out(file: &mut File, buffer: &mut Vec<u8>) {
    if buffer.is_empty() {
        return;
    }
    // the logger cannot log its own failures
    if let Err(err) = file.write_all(buffer).and_then(|()| file.flush()) {
        eprintln!("spindle: log file write failed: {}", err);
    }
    buffer.clear();
}
