//! Guest threads.

use karst_mem::{ChunkId, GuestAddr};

use crate::object::{ProcessId, ThreadId};

/// Default guest thread priority.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Snapshot of the guest CPU registers for one thread.
///
/// The layout mirrors what the external CPU engine saves and restores:
/// sixteen general registers (r13 = stack pointer, r14 = link register,
/// r15 = program counter) plus the status register.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    /// General-purpose registers r0–r15.
    pub regs: [u32; 16],
    /// Current program status register.
    pub cpsr: u32,
}

impl CpuState {
    /// Builds the initial state for a new thread.
    pub fn at_entry(entry: GuestAddr, stack_top: GuestAddr) -> Self {
        let mut state = Self::default();
        state.regs[13] = stack_top;
        state.regs[15] = entry;
        state
    }
}

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet released to the scheduler.
    Created,
    /// Eligible to run.
    Ready,
    /// Currently executing on the CPU engine.
    Running,
    /// Blocked on a kernel object (mutex, semaphore).
    WaitingOnObject,
    /// Blocked until a sent request completes.
    WaitingOnRequest,
    /// Terminated; kept only until reaped.
    Dead,
}

/// A guest thread.
#[derive(Debug)]
pub struct Thread {
    /// Unique id.
    pub id: ThreadId,
    /// Owning process.
    pub process: ProcessId,
    /// Scheduling state.
    pub state: ThreadState,
    /// Scheduling priority; larger runs first.
    pub priority: i32,
    /// Saved register file.
    pub cpu: CpuState,
    /// This thread's stack chunk.
    pub stack_chunk: ChunkId,
    /// Guest address of the request-status cell while the thread is in
    /// [`ThreadState::WaitingOnRequest`].
    pub pending_request: Option<GuestAddr>,
}

impl Thread {
    /// True when the thread still participates in scheduling.
    pub fn alive(&self) -> bool {
        self.state != ThreadState::Dead
    }
}
