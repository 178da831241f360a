//! Per-thread fiber identity slots.
//!
//! Only `THREAD_FIBER` owns anything. `CURRENT` and `SCHEDULING` are weak
//! back-references used for lookup. Every accessor is `inline(never)` so a
//! fiber that migrates to another carrier thread between a suspend and the
//! next access never reuses a thread-local address computed on the old one.

use super::Fiber;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

thread_local! {
    /// Fiber currently executing on this thread.
    static CURRENT: RefCell<Weak<Fiber>> = RefCell::new(Weak::new());

    /// Identity fiber representing the OS thread itself.
    static THREAD_FIBER: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };

    /// Fiber running this thread's scheduling loop.
    static SCHEDULING: RefCell<Weak<Fiber>> = RefCell::new(Weak::new());
}

#[inline(never)]
pub(crate) fn current() -> Option<Arc<Fiber>> {
    CURRENT
        .try_with(|slot| slot.borrow().upgrade())
        .ok()
        .flatten()
}

#[inline(never)]
pub(crate) fn set_current(fiber: &Arc<Fiber>) {
    CURRENT.with(|slot| *slot.borrow_mut() = Arc::downgrade(fiber));
}

/// Runs `f` against the current fiber without handing out an owning
/// reference that could outlive the call.
#[inline(never)]
pub(crate) fn with_current<R>(f: impl FnOnce(Option<&Fiber>) -> R) -> R {
    let fiber = current();
    f(fiber.as_deref())
}

#[inline(never)]
pub(crate) fn is_current(fiber: &Fiber) -> bool {
    CURRENT
        .try_with(|slot| std::ptr::eq(slot.borrow().as_ptr(), fiber))
        .unwrap_or(false)
}

/// Clears the current-fiber slot if it refers to `fiber`.
#[inline(never)]
pub(crate) fn forget_current(fiber: &Fiber) {
    let _ = CURRENT.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            if std::ptr::eq(slot.as_ptr(), fiber) {
                *slot = Weak::new();
            }
        }
    });
}

#[inline(never)]
pub(crate) fn thread_fiber() -> Option<Arc<Fiber>> {
    THREAD_FIBER
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

#[inline(never)]
pub(crate) fn set_thread_fiber(fiber: Arc<Fiber>) {
    THREAD_FIBER.with(|slot| *slot.borrow_mut() = Some(fiber));
}

#[inline(never)]
pub(crate) fn scheduling_fiber() -> Option<Arc<Fiber>> {
    SCHEDULING
        .try_with(|slot| slot.borrow().upgrade())
        .ok()
        .flatten()
}

#[inline(never)]
pub(crate) fn set_scheduling_fiber(fiber: &Arc<Fiber>) {
    SCHEDULING.with(|slot| *slot.borrow_mut() = Arc::downgrade(fiber));
}
