//! Guest address space and memory model.
//!
//! Guest virtual addresses are 32-bit. Memory is organised into
//! [`Chunk`](chunk::Chunk)s: named, reference-counted, contiguous regions
//! with access attributes. The [`AddressSpace`](space::AddressSpace)
//! owns every chunk and exposes the typed read/write surface the kernel
//! and servers use, including the guest descriptor codec.

pub mod chunk;
pub mod descriptor;
pub mod space;

use thiserror::Error;

pub use chunk::{Chunk, ChunkAttrib, ChunkId, Region};
pub use descriptor::{DesWidth, Descriptor};
pub use space::AddressSpace;

/// A guest virtual address.
pub type GuestAddr = u32;

/// Guest page size in bytes.
pub const PAGE_SIZE: u32 = 0x1000;

/// Errors raised by the memory subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemError {
    /// The access touched an address with no committed chunk behind it.
    #[error("access to unmapped guest address {0:#010x}")]
    BadAddress(GuestAddr),
    /// A write targeted the immutable ROM chunk.
    #[error("write to read-only guest address {0:#010x}")]
    ReadOnly(GuestAddr),
    /// A new chunk would overlap an existing mapping.
    #[error("chunk \"{0}\" overlaps an existing mapping")]
    Overlap(String),
    /// The region's address budget is exhausted.
    #[error("out of space in region {0:?}")]
    RegionFull(Region),
    /// The id does not name a live chunk.
    #[error("no chunk with id {0:?}")]
    BadChunk(ChunkId),
    /// A descriptor header was malformed.
    #[error("malformed descriptor at {0:#010x}")]
    BadDescriptor(GuestAddr),
    /// A descriptor write exceeded the caller-supplied maximum length.
    #[error("descriptor payload exceeds maximum length")]
    Overflow,
}
