//! Pending tasks and the counters guarded with them.

use super::task::Task;
use std::collections::VecDeque;
use std::thread::ThreadId;

/// Who to wake after a scan or an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tickle {
    None,
    One,
    All,
}

/// Everything the scheduler protects with its single mutex.
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    tasks: VecDeque<Task>,
    active_threads: usize,
    idle_threads: usize,
    stopping: bool,
    thread_ids: Vec<ThreadId>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task, reporting whether the queue was empty before.
    pub fn push(&mut self, task: Task) -> bool {
        let was_empty = self.tasks.is_empty();
        self.tasks.push_back(task);
        was_empty
    }

    /// Removes the first task eligible on `thread` and marks the thread
    /// active. Entries pinned elsewhere are skipped and reported through
    /// the returned tickle so their owner gets woken.
    pub fn take_for(&mut self, thread: ThreadId) -> (Option<Task>, Tickle) {
        let mut skipped_pinned = false;
        let mut found = None;

        for (index, task) in self.tasks.iter().enumerate() {
            if task.is_pinned_elsewhere(thread) {
                skipped_pinned = true;
                continue;
            }
            if task.is_eligible_on(thread) {
                found = Some(index);
                break;
            }
        }

        let task = found.and_then(|index| self.tasks.remove(index));
        if task.is_some() {
            self.active_threads += 1;
        }

        let tickle = if skipped_pinned {
            Tickle::All
        } else if !self.tasks.is_empty() {
            // any leftover entry wakes one more thread, not only those past the taken one
            Tickle::One
        } else {
            Tickle::None
        };
        (task, tickle)
    }

    pub fn has_work_for(&self, thread: ThreadId) -> bool {
        self.tasks.iter().any(|task| task.is_eligible_on(thread))
    }

    /// A dispatched task returned control to the loop. True when this
    /// leaves a stopping scheduler drained, so idle threads must be woken.
    pub fn finish(&mut self) -> bool {
        debug_assert!(self.active_threads > 0);
        self.active_threads = self.active_threads.saturating_sub(1);
        self.is_drained()
    }

    pub fn enter_idle(&mut self) {
        self.idle_threads += 1;
    }

    pub fn leave_idle(&mut self) {
        self.idle_threads = self.idle_threads.saturating_sub(1);
    }

    pub fn set_stopping(&mut self) {
        self.stopping = true;
    }

    /// Stop requested, nothing queued, nothing running.
    pub fn is_drained(&self) -> bool {
        self.stopping && self.tasks.is_empty() && self.active_threads == 0
    }

    pub fn register_thread(&mut self, thread: ThreadId) {
        self.thread_ids.push(thread);
    }

    pub fn thread_ids(&self) -> &[ThreadId] {
        &self.thread_ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn active_threads(&self) -> usize {
        self.active_threads
    }

    pub fn idle_threads(&self) -> usize {
        self.idle_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use crate::scheduler::task::Work;
    use std::sync::Arc;
    use std::thread;

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_push_reports_empty_transition() {
        let mut queue = RunQueue::new();
        assert!(queue.push(Task::callback(|| {})));
        assert!(!queue.push(Task::callback(|| {})));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_take_in_submission_order() {
        let here = thread::current().id();
        let mut queue = RunQueue::new();
        let first = Fiber::with_options(|| {}, 0, false);
        queue.push(Task::fiber(first.clone()));
        queue.push(Task::callback(|| {}));

        let (task, tickle) = queue.take_for(here);
        match task.map(Task::into_work) {
            Some(Work::Fiber(fiber)) => assert!(Arc::ptr_eq(&fiber, &first)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tickle, Tickle::One);
        assert_eq!(queue.active_threads(), 1);

        let (task, tickle) = queue.take_for(here);
        assert!(task.is_some());
        assert_eq!(tickle, Tickle::None);
        assert_eq!(queue.active_threads(), 2);

        first.resume();
    }

    #[test]
    fn test_skips_tasks_pinned_elsewhere() {
        let here = thread::current().id();
        let other = other_thread();
        let mut queue = RunQueue::new();
        queue.push(Task::callback(|| {}).pin_to(other));

        let (task, tickle) = queue.take_for(here);
        assert!(task.is_none());
        assert_eq!(tickle, Tickle::All);
        assert!(!queue.has_work_for(here));
        assert!(queue.has_work_for(other));

        queue.push(Task::callback(|| {}).pin_to(here));
        let (task, tickle) = queue.take_for(here);
        assert_eq!(task.and_then(|t| t.affinity()), Some(here));
        assert_eq!(tickle, Tickle::All);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drained_predicate() {
        let here = thread::current().id();
        let mut queue = RunQueue::new();
        assert!(!queue.is_drained());

        queue.push(Task::callback(|| {}));
        queue.set_stopping();
        assert!(!queue.is_drained());

        let (task, _) = queue.take_for(here);
        assert!(task.is_some());
        assert!(!queue.is_drained());

        assert!(queue.finish());
        assert!(queue.is_drained());
    }

    #[test]
    fn test_finish_reports_drain_only_for_last_task() {
        let here = thread::current().id();
        let mut queue = RunQueue::new();
        queue.push(Task::callback(|| {}));
        queue.push(Task::callback(|| {}));
        queue.push(Task::callback(|| {}));

        // not stopping yet
        let _ = queue.take_for(here);
        assert!(!queue.finish());

        let _ = queue.take_for(here);
        let _ = queue.take_for(here);
        assert_eq!(queue.active_threads(), 2);
        queue.set_stopping();

        assert!(!queue.finish());
        assert!(queue.finish());
        assert_eq!(queue.active_threads(), 0);
    }

    #[test]
    fn test_idle_counters() {
        let mut queue = RunQueue::new();
        queue.enter_idle();
        queue.enter_idle();
        queue.leave_idle();
        assert_eq!(queue.idle_threads(), 1);

        queue.register_thread(thread::current().id());
        assert_eq!(queue.thread_ids(), &[thread::current().id()]);
    }
}
