//! Virtual clock and scheduled event queue.
//!
//! Time advances only when the CPU engine reports executed work or when
//! the scheduler idles. Events live in a min-heap keyed by absolute
//! deadline; equal deadlines fire in insertion order.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// How far [`Timing::idle`] advances when nothing is scheduled.
pub const IDLE_QUANTUM: u64 = 100_000;

/// Identifies a scheduled event for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    deadline: u64,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sequence breaks deadline ties so insertion order is preserved
        // through the heap.
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// The virtual clock plus its event queue, generic over the payload the
/// kernel attaches to each scheduled event.
pub struct Timing<T> {
    now: u64,
    next_seq: u64,
    queue: BinaryHeap<Reverse<Entry<T>>>,
    cancelled: HashSet<u64>,
}

impl<T> Default for Timing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timing<T> {
    /// Creates a clock at tick zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Current virtual time in ticks.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedules `payload` to fire `delay` ticks from now.
    pub fn schedule(&mut self, delay: u64, payload: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Entry {
            deadline: self.now + delay,
            seq,
            payload,
        }));
        TimerHandle(seq)
    }

    /// Cancels a scheduled event. Returns `false` if it already fired.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if self.queue.iter().any(|Reverse(e)| e.seq == handle.0) {
            self.cancelled.insert(handle.0);
            true
        } else {
            false
        }
    }

    /// Advances the clock by `elapsed` ticks and drains every due event
    /// in (deadline, insertion) order.
    pub fn advance(&mut self, elapsed: u64) -> Vec<T> {
        self.now += elapsed;
        let mut fired = Vec::new();
        while let Some(Reverse(head)) = self.queue.peek() {
            if head.deadline > self.now {
                break;
            }
            let Reverse(entry) = self.queue.pop().expect("peeked entry");
            if !self.cancelled.remove(&entry.seq) {
                fired.push(entry.payload);
            }
        }
        fired
    }

    /// Jumps the clock to the next deadline, or forward by
    /// [`IDLE_QUANTUM`] when nothing is scheduled. Does not fire events;
    /// the caller follows up with [`advance`](Self::advance).
    pub fn idle(&mut self) {
        match self.queue.peek() {
            Some(Reverse(head)) if head.deadline > self.now => {
                self.now = head.deadline;
            }
            Some(_) => {}
            None => self.now += IDLE_QUANTUM,
        }
    }

    /// Number of pending (uncancelled) events.
    pub fn pending(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }
}
