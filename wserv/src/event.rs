//! Window server events and redraw scheduling.

use byteorder::{ByteOrder, LittleEndian};

use karst_base::Vec2;

/// Kinds of event delivered to window clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    /// A window group gained keyboard focus.
    FocusGained = 0,
    /// A window group lost keyboard focus.
    FocusLost = 1,
    /// Pointer input.
    Pointer = 2,
    /// Key input.
    Key = 3,
    /// Modifier keys changed.
    ModifierChange = 4,
    /// The screen mode changed.
    ScreenChange = 5,
    /// An error message for the client.
    ErrorMessage = 6,
}

/// One queued client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Client-scoped handle of the window the event concerns.
    pub handle: u32,
    /// What happened.
    pub code: EventCode,
    /// Virtual time of the event.
    pub time: u64,
}

impl Event {
    /// Creates an event stamped at `time`.
    pub fn new(handle: u32, code: EventCode, time: u64) -> Self {
        Self { handle, code, time }
    }

    /// Encodes the guest event package `{code, handle, time}`.
    pub fn encode(&self) -> [u8; 16] {
        let mut pkg = [0u8; 16];
        LittleEndian::write_u32(&mut pkg[0..4], self.code as u32);
        LittleEndian::write_u32(&mut pkg[4..8], self.handle);
        LittleEndian::write_u64(&mut pkg[8..16], self.time);
        pkg
    }
}

/// One scheduled redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedrawEvent {
    /// Queue-assigned id, usable with [`RedrawQueue::dequeue`].
    pub id: u32,
    /// Window to redraw.
    pub handle: u32,
    /// Top-left corner of the dirty region.
    pub top_left: Vec2,
    /// Bottom-right corner of the dirty region.
    pub bottom_right: Vec2,
}

impl RedrawEvent {
    /// Encodes the guest redraw package `{handle, tl, br}`.
    pub fn encode(&self) -> [u8; 20] {
        let mut pkg = [0u8; 20];
        LittleEndian::write_u32(&mut pkg[0..4], self.handle);
        LittleEndian::write_i32(&mut pkg[4..8], self.top_left.x);
        LittleEndian::write_i32(&mut pkg[8..12], self.top_left.y);
        LittleEndian::write_i32(&mut pkg[12..16], self.bottom_right.x);
        LittleEndian::write_i32(&mut pkg[16..20], self.bottom_right.y);
        pkg
    }
}

struct QueuedRedraw {
    priority: u16,
    seq: u64,
    event: RedrawEvent,
}

/// Priority-ordered redraw queue.
///
/// Redraws pop in descending priority; equal priorities preserve
/// enqueue order. Entries can be removed by id when a synchronous
/// redraw supersedes them.
#[derive(Default)]
pub struct RedrawQueue {
    entries: Vec<QueuedRedraw>,
    next_id: u32,
    next_seq: u64,
}

impl RedrawQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a redraw, returning its id.
    pub fn queue(&mut self, handle: u32, top_left: Vec2, bottom_right: Vec2, priority: u16) -> u32 {
        self.next_id += 1;
        self.next_seq += 1;
        let id = self.next_id;
        self.entries.push(QueuedRedraw {
            priority,
            seq: self.next_seq,
            event: RedrawEvent {
                id,
                handle,
                top_left,
                bottom_right,
            },
        });
        id
    }

    /// Pops the highest-priority redraw.
    pub fn pop(&mut self) -> Option<RedrawEvent> {
        let best = self
            .entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.seq.cmp(&a.seq))
            })?
            .0;
        Some(self.entries.remove(best).event)
    }

    /// Removes a queued redraw by id.
    pub fn dequeue(&mut self, id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.event.id != id);
        before != self.entries.len()
    }

    /// Number of pending redraws.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
