//! Stackful fibers.
//!
//! A [`Fiber`] is either the *identity* fiber of an OS thread (no stack of
//! its own, always running while the thread is alive) or a *task* fiber that
//! owns a fixed-size stack and runs one callback. Task fibers move through
//! `Ready -> Running -> {Ready, Terminated}`; `reset()` turns a terminated
//! fiber back into a ready one over the same stack.
//!
//! Every fiber switches with one fixed counterpart: the thread's scheduling
//! fiber when it is scheduler-managed, the thread's identity fiber
//! otherwise. Contract violations (resuming a fiber that is not ready,
//! resetting one that has not terminated, dropping a live task fiber) abort
//! the process.

mod context;
mod failure;
pub(crate) mod local;

pub use failure::TaskFailure;

use self::context::{Context, Suspender, Switch};
use crate::config::DEFAULT_STACK_SIZE;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const FAILURE_TARGET: &str = "spindle::fiber";

/// Global fiber ID counter. Zero is reserved for "no fiber".
static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Number of fibers currently alive, identity fibers included.
static LIVE_FIBERS: AtomicU64 = AtomicU64::new(0);

/// Work run by a task fiber. Consumed exactly once.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Ready = 0,
    Running = 1,
    Terminated = 2,
}

impl From<u8> for State {
    fn from(value: u8) -> Self {
        match value {
            0 => State::Ready,
            1 => State::Running,
            _ => State::Terminated,
        }
    }
}

pub struct Fiber {
    id: u64,
    state: AtomicU8,
    scheduler_managed: bool,
    stack_size: usize,
    stack_base: AtomicUsize,
    callback: Mutex<Option<Callback>>,
    context: UnsafeCell<Option<Context>>,
    suspender: AtomicPtr<Suspender>,
    failure: Mutex<Option<TaskFailure>>,
}

// SAFETY: `context` is only accessed by the thread that moved the state out
// of `Ready` (resume) or `Terminated` (reset) with a compare-exchange, and by
// `Drop`, which has exclusive access. All other fields are atomic or locked.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a scheduler-managed task fiber with the default stack size.
    pub fn new<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_options(callback, 0, true)
    }

    /// Creates a task fiber. A `stack_size` of 0 selects the default
    /// (128 KiB). Stack allocation failure aborts the process.
    pub fn with_options<F>(callback: F, stack_size: usize, scheduler_managed: bool) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        match Self::try_with_options(callback, stack_size, scheduler_managed) {
            Ok(fiber) => fiber,
            Err(err) => crate::fatal!("cannot create fiber: {}", err),
        }
    }

    /// Like [`Fiber::with_options`], reporting stack allocation failure.
    pub fn try_with_options<F>(
        callback: F,
        stack_size: usize,
        scheduler_managed: bool,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            stack_size
        };
        let stack = Context::allocate_stack(stack_size).map_err(Error::StackAllocation)?;
        let callback: Callback = Box::new(callback);

        let fiber = Arc::new_cyclic(|weak: &Weak<Fiber>| {
            let context = Context::new(stack, entry(weak.clone()));
            Fiber {
                id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
                state: AtomicU8::new(State::Ready as u8),
                scheduler_managed,
                stack_size,
                stack_base: AtomicUsize::new(context.stack_base()),
                callback: Mutex::new(Some(callback)),
                context: UnsafeCell::new(Some(context)),
                suspender: AtomicPtr::new(ptr::null_mut()),
                failure: Mutex::new(None),
            }
        });
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);

        log::trace!("fiber {} created ({} byte stack)", fiber.id, stack_size);
        Ok(fiber)
    }

    fn identity() -> Arc<Self> {
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);
        Arc::new(Fiber {
            id: 0,
            state: AtomicU8::new(State::Running as u8),
            scheduler_managed: false,
            stack_size: 0,
            stack_base: AtomicUsize::new(0),
            callback: Mutex::new(None),
            context: UnsafeCell::new(None),
            suspender: AtomicPtr::new(ptr::null_mut()),
            failure: Mutex::new(None),
        })
    }

    /// Returns the fiber running on this thread, creating the thread's
    /// identity fiber on first use.
    pub fn current() -> Arc<Fiber> {
        match local::current() {
            Some(fiber) => fiber,
            None => {
                let fiber = Self::thread_fiber();
                local::set_current(&fiber);
                fiber
            }
        }
    }

    fn thread_fiber() -> Arc<Fiber> {
        if let Some(fiber) = local::thread_fiber() {
            return fiber;
        }
        let fiber = Self::identity();
        local::set_thread_fiber(fiber.clone());
        if local::current().is_none() {
            local::set_current(&fiber);
        }
        fiber
    }

    /// The context this fiber resumes from and yields back to.
    fn counterpart(&self) -> Arc<Fiber> {
        if self.scheduler_managed {
            if let Some(fiber) = local::scheduling_fiber() {
                return fiber;
            }
        }
        Self::thread_fiber()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> State {
        State::from(self.state.load(Ordering::Acquire))
    }

    /// Stack size in bytes, 0 for identity fibers.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Highest address of the owned stack, `None` for identity fibers.
    pub fn stack_base(&self) -> Option<usize> {
        match self.stack_base.load(Ordering::Acquire) {
            0 => None,
            base => Some(base),
        }
    }

    pub fn is_scheduler_managed(&self) -> bool {
        self.scheduler_managed
    }

    fn owns_stack(&self) -> bool {
        self.stack_size != 0
    }

    fn transition(&self, from: State, to: State) -> std::result::Result<(), State> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(State::from)
    }

    /// Switches into this fiber. Returns once it yields or terminates.
    ///
    /// Must be called from the fiber's counterpart, on a `Ready` fiber.
    pub fn resume(self: &Arc<Self>) {
        if !self.owns_stack() {
            crate::fatal!("identity fiber cannot be resumed");
        }
        if let Err(actual) = self.transition(State::Ready, State::Running) {
            crate::fatal!("resume of fiber {} in state {:?}", self.id, actual);
        }

        let counterpart = self.counterpart();
        let resumer = Fiber::current();
        if !Arc::ptr_eq(&resumer, &counterpart) {
            crate::fatal!(
                "fiber {} resumed from fiber {} instead of its counterpart fiber {}",
                self.id,
                resumer.id,
                counterpart.id
            );
        }
        drop(resumer);

        local::set_current(self);
        // SAFETY: the Ready -> Running exchange gives this thread exclusive
        // access to the context until the state is published again below.
        let switched = match unsafe { &mut *self.context.get() } {
            Some(context) => context.switch_in(),
            None => crate::fatal!("fiber {} lost its context", self.id),
        };
        local::set_current(&counterpart);

        match switched {
            Switch::Suspended => self.state.store(State::Ready as u8, Ordering::Release),
            Switch::Finished => {
                self.suspender.store(ptr::null_mut(), Ordering::Release);
                let failure = self.failure.lock().take();
                self.state.store(State::Terminated as u8, Ordering::Release);
                if let Some(failure) = failure {
                    self.report(&failure);
                }
            }
        }
    }

    /// Suspends this fiber and switches back to its counterpart. Must be
    /// called by the fiber itself while it is running.
    pub fn yield_now(&self) {
        let suspender = self.suspender_for_yield();
        // SAFETY: the trampoline published a pointer into this fiber's own
        // stack, which stays valid until the entry returns; we are executing
        // on that stack right now.
        unsafe { (*suspender).suspend(()) };
    }

    fn suspender_for_yield(&self) -> *const Suspender {
        let state = self.state();
        if state != State::Running {
            crate::fatal!("yield of fiber {} in state {:?}", self.id, state);
        }
        if !local::is_current(self) {
            crate::fatal!("fiber {} yielded while not current on this thread", self.id);
        }
        let suspender = self.suspender.load(Ordering::Acquire);
        if suspender.is_null() {
            crate::fatal!("fiber {} has no context to yield from", self.id);
        }
        suspender
    }

    /// Reuses a terminated fiber's stack for a new callback.
    pub fn reset<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.owns_stack() {
            crate::fatal!("identity fiber cannot be reset");
        }
        if let Err(actual) = self.transition(State::Terminated, State::Running) {
            crate::fatal!("reset of fiber {} in state {:?}", self.id, actual);
        }

        // SAFETY: the Terminated -> Running exchange gives this thread
        // exclusive access to the context until the state is published.
        let slot = unsafe { &mut *self.context.get() };
        let context = match slot.take() {
            Some(context) => context.rebuild(entry(Arc::downgrade(self))),
            None => crate::fatal!("fiber {} lost its context", self.id),
        };
        self.stack_base
            .store(context.stack_base(), Ordering::Release);
        *slot = Some(context);
        *self.callback.lock() = Some(Box::new(callback));

        self.state.store(State::Ready as u8, Ordering::Release);
    }

    fn report(&self, failure: &TaskFailure) {
        log::error!(
            target: FAILURE_TARGET,
            "uncaught panic in fiber {}: {}\n{}",
            self.id,
            failure.message,
            failure.backtrace("    ")
        );
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        LIVE_FIBERS.fetch_sub(1, Ordering::Relaxed);
        let state = State::from(*self.state.get_mut());

        if self.owns_stack() {
            if state != State::Terminated {
                crate::fatal!("fiber {} dropped in state {:?}", self.id, state);
            }
        } else {
            if self.callback.get_mut().is_some() || state != State::Running {
                crate::fatal!("identity fiber dropped in state {:?}", state);
            }
            local::forget_current(self);
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("stack_size", &self.stack_size)
            .field("scheduler_managed", &self.scheduler_managed)
            .finish()
    }
}

fn entry(fiber: Weak<Fiber>) -> impl FnOnce(&Suspender) + 'static {
    move |suspender| trampoline(suspender, fiber)
}

/// First frame of every task fiber. Runs the callback inside a panic
/// boundary; a caught panic is stashed for the resumer to report.
fn trampoline(suspender: &Suspender, fiber: Weak<Fiber>) {
    let callback = match fiber.upgrade() {
        Some(this) => {
            this.suspender
                .store(suspender as *const Suspender as *mut Suspender, Ordering::Release);
            this.callback.lock().take()
        }
        None => crate::fatal!("fiber entered after its last handle was dropped"),
    };

    // the callback and its captures are gone once this returns
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
        if let Some(callback) = callback {
            callback();
        }
    }));

    if let Err(payload) = outcome {
        let failure = TaskFailure::capture(payload);
        if let Some(this) = fiber.upgrade() {
            *this.failure.lock() = Some(failure);
        }
    }
}

/// Yields the fiber running on this thread.
pub fn yield_now() {
    let suspender = local::with_current(|fiber| match fiber {
        Some(fiber) => fiber.suspender_for_yield(),
        None => crate::fatal!("yield_now called outside of a fiber"),
    });
    // SAFETY: see `Fiber::yield_now`.
    unsafe { (*suspender).suspend(()) };
}

/// ID of the fiber running on this thread, 0 if none has been established.
pub fn current_id() -> u64 {
    local::with_current(|fiber| fiber.map_or(0, Fiber::id))
}

/// Number of live fibers in the process.
pub fn live_count() -> u64 {
    LIVE_FIBERS.load(Ordering::Relaxed)
}

/// Fiber running this thread's scheduling loop, if the thread takes part in
/// a scheduler.
pub fn scheduling_fiber() -> Option<Arc<Fiber>> {
    local::scheduling_fiber()
}
