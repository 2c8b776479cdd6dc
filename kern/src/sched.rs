//! Cooperative guest-thread scheduler.
//!
//! A single ready queue ordered by priority, FIFO among equals. The
//! emulator runs one guest thread at a time; kernel transitions call
//! [`Scheduler::pick`] to choose the next runnable thread and the CPU
//! engine is re-entered with that thread's register state.

use std::collections::VecDeque;

use crate::object::ThreadId;

/// Ready queue plus the currently running thread.
#[derive(Debug, Default)]
pub struct Scheduler {
    ready: VecDeque<(ThreadId, i32)>,
    current: Option<ThreadId>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The thread the CPU engine is (or was last) running.
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Adds a thread to the ready queue.
    ///
    /// Double insertion is a caller bug; it is tolerated but logged by
    /// the kernel layer, which owns the state transitions.
    pub fn make_ready(&mut self, thread: ThreadId, priority: i32) {
        self.ready.push_back((thread, priority));
    }

    /// Removes a thread from the ready queue (thread death, cancellation).
    pub fn remove(&mut self, thread: ThreadId) {
        self.ready.retain(|(t, _)| *t != thread);
        if self.current == Some(thread) {
            self.current = None;
        }
    }

    /// Picks the highest-priority ready thread (FIFO among equals),
    /// makes it current, and returns it. Returns `None` when nothing is
    /// runnable.
    pub fn pick(&mut self) -> Option<ThreadId> {
        let best = self
            .ready
            .iter()
            .enumerate()
            .max_by(|(ia, (_, pa)), (ib, (_, pb))| pa.cmp(pb).then(ib.cmp(ia)))?
            .0;
        let (thread, _) = self.ready.remove(best).expect("index from enumerate");
        self.current = Some(thread);
        Some(thread)
    }

    /// Forgets the current thread without requeueing it (it blocked or
    /// died).
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// True when no thread is ready or running.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.ready.is_empty()
    }
}
