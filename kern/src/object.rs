//! Kernel object identifiers.
//!
//! Every kernel object is addressed by a dense integer id; references
//! between objects are ids, never pointers. Ids are unique for the
//! lifetime of the kernel and never reused.

/// Identifies a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Identifies a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Identifies a session between a process and a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

/// Index of a registered server, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(pub usize);

/// Monotonic id generator shared by all object kinds.
#[derive(Debug, Default)]
pub struct IdGen(u64);

impl IdGen {
    /// Returns the next id, starting from 1.
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}
