//! Chunks: named, reference-counted regions of guest address space.

use bitflags::bitflags;

use crate::GuestAddr;

bitflags! {
    /// Access attributes of a chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkAttrib: u32 {
        /// Readable by guest code.
        const READ = 0b0001;
        /// Writable by guest code.
        const WRITE = 0b0010;
        /// Executable.
        const EXECUTE = 0b0100;
        /// Pages are committed lazily on first touch.
        const COMMIT_ON_DEMAND = 0b1000;
    }
}

/// Dense identifier of a chunk within an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub u32);

/// The allocation region a chunk lives in.
///
/// Region bases depend on the guest version; see
/// [`AddressSpace::new`](crate::space::AddressSpace::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Per-process local data, low addresses.
    LocalData,
    /// Globally visible data chunks.
    SharedData,
    /// Loaded executable code.
    RamCode,
    /// The execute-in-place ROM image.
    Rom,
}

/// A contiguous, committed region of guest memory.
#[derive(Debug)]
pub struct Chunk {
    /// Identifier within the owning address space.
    pub id: ChunkId,
    /// Diagnostic name (e.g. `"local$<pid>"`, `"rom"`).
    pub name: String,
    /// First guest address of the mapped range.
    pub base: GuestAddr,
    /// Access attributes.
    pub attrib: ChunkAttrib,
    /// Committed backing bytes; `data.len()` is the mapped size.
    pub data: Vec<u8>,
    /// Reference count; the chunk is unmapped when this drops to zero.
    pub refs: u32,
}

impl Chunk {
    /// One-past-the-end guest address.
    pub fn end(&self) -> u64 {
        u64::from(self.base) + self.data.len() as u64
    }

    /// True when `addr` lies inside the mapped range.
    pub fn contains(&self, addr: GuestAddr) -> bool {
        addr >= self.base && u64::from(addr) < self.end()
    }
}
