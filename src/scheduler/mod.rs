//! M:N fiber scheduler.
//!
//! A [`Scheduler`] owns a fixed pool of OS threads sharing one FIFO task
//! queue. Every participating thread runs the same loop: take the first
//! task eligible on this thread, resume it as a fiber, repeat; with nothing
//! to do it parks in a per-thread idle fiber until woken.
//!
//! In caller mode the constructing thread is one of the pool. Its loop runs
//! inside a dedicated root fiber that [`Scheduler::stop`] resumes to drain
//! whatever is still queued.
//!
//! A fiber that yields is not requeued automatically. Whoever wants it to
//! continue schedules it again before yielding:
//!
//! ```no_run
//! use spindle::{fiber, Fiber, Handle, Scheduler};
//!
//! let scheduler = Scheduler::new(2, true, "demo").unwrap();
//! scheduler.start().unwrap();
//! scheduler.schedule(|| {
//!     let handle = Handle::current().unwrap();
//!     handle.schedule_fiber(Fiber::current());
//!     fiber::yield_now();
//!     // resumed later, possibly on another thread
//! });
//! scheduler.stop();
//! ```

mod queue;
pub mod task;
mod worker;

pub use task::{Task, Work};

use self::queue::{RunQueue, Tickle};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::fiber::{self, Fiber, State};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

thread_local! {
    /// Scheduler the current thread participates in.
    static CURRENT_SCHEDULER: RefCell<Weak<Shared>> = RefCell::new(Weak::new());
}

#[inline(never)]
fn current_shared() -> Option<Arc<Shared>> {
    CURRENT_SCHEDULER
        .try_with(|slot| slot.borrow().upgrade())
        .ok()
        .flatten()
}

#[inline(never)]
pub(crate) fn set_current_shared(shared: &Arc<Shared>) {
    CURRENT_SCHEDULER.with(|slot| *slot.borrow_mut() = Arc::downgrade(shared));
}

#[inline(never)]
fn clear_current_shared(shared: &Shared) {
    let _ = CURRENT_SCHEDULER.try_with(|slot| {
        let mut slot = slot.borrow_mut();
        if std::ptr::eq(slot.as_ptr(), shared) {
            *slot = Weak::new();
        }
    });
}

/// State shared between the owner, handles and every scheduling thread.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) config: SchedulerConfig,
    pub(crate) root_thread: Option<ThreadId>,
    pub(crate) queue: Mutex<RunQueue>,
    pub(crate) wakeup: Condvar,
}

impl Shared {
    fn submit(&self, task: Task) {
        let need_tickle = self.queue.lock().push(task);
        if need_tickle {
            self.tickle(Tickle::One);
        }
    }

    fn submit_batch<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        let mut need_tickle = false;
        {
            let mut queue = self.queue.lock();
            for task in tasks {
                need_tickle |= queue.push(task);
            }
        }
        if need_tickle {
            self.tickle(Tickle::One);
        }
    }

    /// Wakes idle threads blocked on the queue.
    pub(crate) fn tickle(&self, tickle: Tickle) {
        match tickle {
            Tickle::None => {}
            Tickle::One => {
                self.wakeup.notify_one();
            }
            Tickle::All => {
                self.wakeup.notify_all();
            }
        }
    }

    fn stopping(&self) -> bool {
        self.queue.lock().is_drained()
    }
}

/// Cloneable handle for submitting work to a running scheduler.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// The scheduler the calling thread takes part in, if any.
    pub fn current() -> Option<Handle> {
        current_shared().map(|shared| Handle { shared })
    }

    pub fn schedule<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Task::callback(f));
    }

    pub fn schedule_fiber(&self, fiber: Arc<Fiber>) {
        self.shared.submit(Task::fiber(fiber));
    }

    pub fn submit(&self, task: Task) {
        self.shared.submit(task);
    }

    /// Enqueues every task under one lock acquisition.
    pub fn submit_batch<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        self.shared.submit_batch(tasks);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stopping(&self) -> bool {
        self.shared.stopping()
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.shared.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Owner of a scheduler: its threads, its root fiber and its lifecycle.
///
/// `stop()` must have completed before the scheduler is dropped.
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    root_fiber: Option<Arc<Fiber>>,
    spawn_count: usize,
}

impl Scheduler {
    /// Creates a scheduler with `threads` participating threads, the
    /// calling thread included when `use_caller` is set.
    pub fn new<S: Into<String>>(threads: usize, use_caller: bool, name: S) -> Result<Self> {
        let config = SchedulerConfig::builder()
            .num_threads(threads)
            .use_caller(use_caller)
            .name(name)
            .build()?;
        Self::with_config(config)
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let threads = config.worker_threads();

        if !config.use_caller {
            let shared = Arc::new(Shared {
                name: config.name.clone(),
                config,
                root_thread: None,
                queue: Mutex::new(RunQueue::new()),
                wakeup: Condvar::new(),
            });
            return Ok(Self::assemble(shared, None, threads));
        }

        if let Some(existing) = current_shared() {
            return Err(Error::scheduler(format!(
                "thread already takes part in scheduler '{}'",
                existing.name
            )));
        }
        // establish the identity fiber the root fiber switches against
        let _ = Fiber::current();

        let caller = thread::current().id();
        let mut queue = RunQueue::new();
        queue.register_thread(caller);

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            root_thread: Some(caller),
            queue: Mutex::new(queue),
            wakeup: Condvar::new(),
            config,
        });

        let root_shared = shared.clone();
        let root = Fiber::try_with_options(
            move || worker::run(root_shared),
            shared.config.root_stack_size,
            false,
        )?;

        set_current_shared(&shared);
        fiber::local::set_scheduling_fiber(&root);

        Ok(Self::assemble(shared, Some(root), threads - 1))
    }

    fn assemble(shared: Arc<Shared>, root_fiber: Option<Arc<Fiber>>, spawn_count: usize) -> Self {
        log::debug!(
            "scheduler '{}' created ({} spawned threads, caller {})",
            shared.name,
            spawn_count,
            if root_fiber.is_some() { "included" } else { "excluded" }
        );
        Self {
            shared,
            lifecycle: Mutex::new(Lifecycle::Created),
            threads: Mutex::new(Vec::new()),
            root_fiber,
            spawn_count,
        }
    }

    /// Spawns the worker threads. Calling it again while started does
    /// nothing; a stopped scheduler cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started => return Ok(()),
            Lifecycle::Stopping | Lifecycle::Stopped => {
                return Err(Error::scheduler(format!(
                    "scheduler '{}' cannot be restarted",
                    self.shared.name
                )))
            }
        }
        *lifecycle = Lifecycle::Started;

        let mut threads = self.threads.lock();
        for index in 0..self.spawn_count {
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.shared.name, index))
                .spawn(move || worker::run(shared))
                .map_err(Error::Spawn)?;
            self.shared.queue.lock().register_thread(handle.thread().id());
            threads.push(handle);
        }

        log::info!(
            "scheduler '{}' started with {} threads",
            self.shared.name,
            self.thread_ids().len()
        );
        Ok(())
    }

    /// Drains all queued work and joins the worker threads.
    ///
    /// In caller mode this must run on the constructing thread, which
    /// executes its share of the remaining work before returning. Calling
    /// it again after the scheduler drained does nothing.
    pub fn stop(&self) {
        if self.shared.stopping() {
            return;
        }

        let current = current_shared();
        let on_own_thread = current
            .as_ref()
            .map_or(false, |shared| Arc::ptr_eq(shared, &self.shared));
        drop(current);
        match self.shared.root_thread {
            Some(root) if root != thread::current().id() || !on_own_thread => crate::fatal!(
                "scheduler '{}' must be stopped from the thread that created it",
                self.shared.name
            ),
            None if on_own_thread => crate::fatal!(
                "scheduler '{}' stopped from one of its own threads",
                self.shared.name
            ),
            _ => {}
        }

        if *self.lifecycle.lock() == Lifecycle::Created {
            if let Err(err) = self.start() {
                log::error!("scheduler '{}': {}", self.shared.name, err);
            }
        }
        *self.lifecycle.lock() = Lifecycle::Stopping;

        self.shared.queue.lock().set_stopping();
        self.shared.tickle(Tickle::All);

        if let Some(root) = &self.root_fiber {
            if root.state() != State::Terminated {
                root.resume();
            }
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                log::error!("scheduler '{}': thread {} panicked", self.shared.name, name);
            }
        }

        *self.lifecycle.lock() = Lifecycle::Stopped;
        log::info!("scheduler '{}' stopped", self.shared.name);
    }

    /// A cloneable handle for submitting work from anywhere.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Enqueues a callback. It runs on a fresh fiber.
    pub fn schedule<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Task::callback(f));
    }

    /// Enqueues a ready fiber.
    pub fn schedule_fiber(&self, fiber: Arc<Fiber>) {
        self.shared.submit(Task::fiber(fiber));
    }

    /// Enqueues a task, pinned or not.
    pub fn submit(&self, task: Task) {
        self.shared.submit(task);
    }

    /// Enqueues every task under one lock acquisition, waking at most once.
    pub fn submit_batch<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        self.shared.submit_batch(tasks);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Threads taking part in scheduling, caller thread first.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.shared.queue.lock().thread_ids().to_vec()
    }

    pub fn active_threads(&self) -> usize {
        self.shared.queue.lock().active_threads()
    }

    pub fn idle_threads(&self) -> usize {
        self.shared.queue.lock().idle_threads()
    }

    pub fn has_idle_threads(&self) -> bool {
        self.idle_threads() > 0
    }

    /// Number of queued tasks not yet taken by any thread.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// True once a stop was requested and no work is queued or running.
    pub fn stopping(&self) -> bool {
        self.shared.stopping()
    }

    pub fn is_stopped(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Stopped
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let lifecycle = *self.lifecycle.get_mut();
        if lifecycle != Lifecycle::Stopped {
            crate::fatal!(
                "scheduler '{}' dropped in state {:?}, stop() must complete first",
                self.shared.name,
                lifecycle
            );
        }
        clear_current_shared(&self.shared);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("lifecycle", &*self.lifecycle.lock())
            .field("spawn_count", &self.spawn_count)
            .field("use_caller", &self.root_fiber.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_caller_only_scheduler() {
        let scheduler = Scheduler::new(1, true, "unit").unwrap();
        assert_eq!(scheduler.name(), "unit");
        assert_eq!(scheduler.thread_ids(), vec![thread::current().id()]);
        assert!(Handle::current().is_some());

        scheduler.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            scheduler.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.pending(), 10);
        assert!(!scheduler.stopping());

        scheduler.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(scheduler.stopping());
        assert!(scheduler.is_stopped());

        drop(scheduler);
        assert!(Handle::current().is_none());
    }

    #[test]
    fn test_second_caller_scheduler_rejected() {
        let first = Scheduler::new(1, true, "first").unwrap();
        let second = Scheduler::new(1, true, "second");
        assert!(matches!(second, Err(Error::Scheduler(_))));
        first.stop();
    }

    #[test]
    fn test_restart_rejected() {
        let scheduler = Scheduler::new(2, false, "pool").unwrap();
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.start().is_err());
    }

    #[test]
    fn test_stop_without_start_drains() {
        let scheduler = Scheduler::new(2, false, "lazy").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        scheduler.schedule(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_thread_count() {
        assert!(matches!(
            Scheduler::new(0, false, "none"),
            Err(Error::Config(_))
        ));
    }
}
