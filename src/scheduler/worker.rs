// scheduling loop, one per participating thread
use super::queue::Tickle;
use super::task::Work;
use super::{set_current_shared, Shared};
use crate::fiber::{self, Fiber, State};
use std::sync::Arc;
use std::thread;

/// Returns a dispatched task's slot. The thread that leaves a stopping
/// scheduler drained wakes every idle thread so none sleeps out its timeout.
fn finish(shared: &Shared) {
    let drained = shared.queue.lock().finish();
    if drained {
        shared.tickle(Tickle::All);
    }
}

/// Runs the scan-dispatch-idle loop on the calling thread until the
/// scheduler is stopped and drained.
pub(crate) fn run(shared: Arc<Shared>) {
    set_current_shared(&shared);
    let thread = thread::current().id();
    if Some(thread) != shared.root_thread {
        fiber::local::set_scheduling_fiber(&Fiber::current());
    }
    log::debug!("{}: scheduling loop entered", shared.name);

    let idle = Fiber::with_options(idle_body(shared.clone()), shared.config.stack_size, true);
    let mut spare: Option<Arc<Fiber>> = None;
    let mut dispatched = 0u64;

    loop {
        let (task, tickle) = shared.queue.lock().take_for(thread);
        if tickle != Tickle::None {
            shared.tickle(tickle);
        }

        match task.map(|task| task.work) {
            Some(Work::Fiber(fiber)) => {
                fiber.resume();
                finish(&shared);
                dispatched += 1;
            }
            Some(Work::Callback(callback)) => {
                let wrapper = match spare.take() {
                    Some(wrapper)
                        if wrapper.state() == State::Terminated
                            && Arc::strong_count(&wrapper) == 1 =>
                    {
                        wrapper.reset(callback);
                        wrapper
                    }
                    _ => Fiber::with_options(callback, shared.config.stack_size, true),
                };
                wrapper.resume();
                finish(&shared);
                dispatched += 1;
                if shared.config.reuse_callback_fibers {
                    spare = Some(wrapper);
                }
            }
            None => {
                if idle.state() == State::Terminated {
                    break;
                }
                shared.queue.lock().enter_idle();
                idle.resume();
                shared.queue.lock().leave_idle();
            }
        }
    }

    log::debug!(
        "{}: scheduling loop exited after {} tasks",
        shared.name,
        dispatched
    );
}

/// Body of the per-thread idle fiber. Blocks the carrier on the wake
/// condvar while nothing is eligible here, and returns for good once the
/// scheduler is drained.
fn idle_body(shared: Arc<Shared>) -> impl FnOnce() + Send + 'static {
    move || {
        let thread = thread::current().id();
        loop {
            {
                let mut queue = shared.queue.lock();
                if queue.is_drained() {
                    break;
                }
                if !queue.has_work_for(thread) {
                    shared
                        .wakeup
                        .wait_for(&mut queue, shared.config.idle_timeout);
                }
            }
            fiber::yield_now();
        }
        log::trace!("{}: idle fiber done", shared.name);
    }
}
