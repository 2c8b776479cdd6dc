//! Guest processes and the parsed-image contract with the loader.

use karst_base::UidTriple;
use karst_mem::{ChunkId, GuestAddr};

use crate::handles::HandleTable;
use crate::object::{ProcessId, SessionId, ThreadId};

/// A guest executable parsed by the external image loader.
///
/// The loader owns file-format concerns; the kernel only consumes this
/// flattened view.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// UID triple from the image header.
    pub uids: UidTriple,
    /// Absolute guest path the image was resolved from.
    pub path: String,
    /// Executable code, relocated for its load address.
    pub code: Vec<u8>,
    /// Initialised data.
    pub data: Vec<u8>,
    /// Zero-initialised data size in bytes.
    pub bss_size: u32,
    /// Entry point offset into the code chunk.
    pub entry_offset: u32,
    /// Requested stack size in bytes.
    pub stack_size: u32,
}

/// A guest process.
#[derive(Debug)]
pub struct Process {
    /// Unique id.
    pub id: ProcessId,
    /// UID triple from the executable.
    pub uids: UidTriple,
    /// Absolute guest path of the executable.
    pub exe_path: String,
    /// Creation arguments (command line).
    pub args: String,
    /// The per-process local data chunk.
    pub local_chunk: ChunkId,
    /// Code chunk the image was loaded into.
    pub code_chunk: ChunkId,
    /// Guest address of the entry point.
    pub entry_point: GuestAddr,
    /// Handle table; threads of this process own slots in it.
    pub handles: HandleTable,
    /// Owned threads, in creation order. The first is the primary.
    pub threads: Vec<ThreadId>,
    /// Sessions opened by this process.
    pub sessions: Vec<SessionId>,
}

impl Process {
    /// The primary thread, created together with the process.
    pub fn primary_thread(&self) -> Option<ThreadId> {
        self.threads.first().copied()
    }
}
