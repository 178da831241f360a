//! Execution context primitive.
//!
//! A context is a stack region plus a coroutine entered at a fixed entry
//! point. It supports exactly one two-way switch: the resumer switches in,
//! the running context suspends back to whoever switched it in. This is the
//! only module that touches register-level switching, which is delegated to
//! `corosensei`.

use corosensei::stack::{DefaultStack, Stack};
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::io;

/// Handle through which a running context switches back to its resumer.
pub(crate) type Suspender = Yielder<(), ()>;

/// Outcome of switching into a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    /// The context suspended itself and can be switched into again.
    Suspended,
    /// The entry function returned.
    Finished,
}

pub(crate) struct Context {
    coroutine: Coroutine<(), (), (), DefaultStack>,
    stack_base: usize,
}

impl Context {
    /// Allocates a stack of at least `size` bytes. Guard pages are added on
    /// top of the requested size.
    pub(crate) fn allocate_stack(size: usize) -> io::Result<DefaultStack> {
        DefaultStack::new(size)
    }

    /// Builds a context over `stack` whose first switch-in calls `entry`.
    pub(crate) fn new<F>(stack: DefaultStack, entry: F) -> Self
    where
        F: FnOnce(&Suspender) + 'static,
    {
        let stack_base = stack.base().get();
        let coroutine = Coroutine::with_stack(stack, move |suspender: &Suspender, ()| {
            entry(suspender)
        });

        Self {
            coroutine,
            stack_base,
        }
    }

    /// Rebuilds a finished context over the same stack memory.
    pub(crate) fn rebuild<F>(self, entry: F) -> Self
    where
        F: FnOnce(&Suspender) + 'static,
    {
        let stack = self.coroutine.into_stack();
        Self::new(stack, entry)
    }

    /// Switches into the context and returns once it suspends or finishes.
    pub(crate) fn switch_in(&mut self) -> Switch {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(()) => Switch::Suspended,
            CoroutineResult::Return(()) => Switch::Finished,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.coroutine.done()
    }

    /// Highest address of the stack region.
    pub(crate) fn stack_base(&self) -> usize {
        self.stack_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_switch_in_and_suspend() {
        let steps = Rc::new(Cell::new(0));
        let seen = steps.clone();

        let stack = Context::allocate_stack(64 * 1024).unwrap();
        let mut ctx = Context::new(stack, move |suspender| {
            seen.set(1);
            suspender.suspend(());
            seen.set(2);
        });

        assert_eq!(ctx.switch_in(), Switch::Suspended);
        assert_eq!(steps.get(), 1);
        assert!(!ctx.is_finished());

        assert_eq!(ctx.switch_in(), Switch::Finished);
        assert_eq!(steps.get(), 2);
        assert!(ctx.is_finished());
    }

    #[test]
    fn test_rebuild_reuses_stack() {
        let stack = Context::allocate_stack(64 * 1024).unwrap();
        let mut ctx = Context::new(stack, |_| {});
        let base = ctx.stack_base();
        assert_eq!(ctx.switch_in(), Switch::Finished);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let mut ctx = ctx.rebuild(move |_| flag.set(true));

        assert_eq!(ctx.stack_base(), base);
        assert_eq!(ctx.switch_in(), Switch::Finished);
        assert!(ran.get());
    }
}
