//! File-server-side open nodes and share-mode arbitration.

use karst_kernel::ProcessId;

use crate::path;
use crate::vfs::{OpenMode, VfsDir, VfsFile};

/// Size of the file server's node table.
pub const NODE_TABLE_SIZE: usize = 256;

/// Guest open-mode word bits.
pub mod guest_mode {
    /// Mask of the two share-mode bits.
    pub const SHARE_MASK: u32 = 0x3;
    /// Share value: exclusive (the default).
    pub const SHARE_EXCLUSIVE: u32 = 0;
    /// Share value: readers only.
    pub const SHARE_READERS_ONLY: u32 = 1;
    /// Share value: any.
    pub const SHARE_ANY: u32 = 2;
    /// Share value: readers or writers.
    pub const SHARE_READERS_OR_WRITERS: u32 = 3;
    /// Text-translated stream access.
    pub const STREAM_TEXT: u32 = 0x100;
    /// Open for writing.
    pub const WRITE: u32 = 0x200;
    /// Hint: read-ahead everything.
    pub const READ_ASYNC_ALL: u32 = 0x400;
    /// Delete the file when the last handle closes.
    pub const DELETE_ON_CLOSE: u32 = 0x2_0000;
    /// 64-bit file hint.
    pub const BIG_FILE: u32 = 0x4_0000;

    /// Bits that do not affect node identity.
    pub const IDENTITY_IGNORED: u32 = STREAM_TEXT | READ_ASYNC_ALL | BIG_FILE;
}

/// Sharing discipline of an open file node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// One process only.
    Exclusive,
    /// Any number of readers, no writers.
    ReadersOnly,
    /// Readers and writers coexist.
    ReadersOrWriters,
    /// Anything goes.
    Any,
}

impl ShareMode {
    /// Decodes the two share bits of a guest mode word.
    pub fn from_guest_mode(mode: u32) -> Self {
        match mode & guest_mode::SHARE_MASK {
            guest_mode::SHARE_READERS_ONLY => ShareMode::ReadersOnly,
            guest_mode::SHARE_ANY => ShareMode::Any,
            guest_mode::SHARE_READERS_OR_WRITERS => ShareMode::ReadersOrWriters,
            _ => ShareMode::Exclusive,
        }
    }
}

/// Composes a new open's share mode with an existing node's.
///
/// Returns the share mode both nodes adopt on success, `None` for a
/// denied combination. `new_writer` / `existing_writer` say whether the
/// respective opens carry write access; `same_process` relaxes the
/// exclusive/exclusive cell.
pub fn compose_share(
    new: ShareMode,
    new_writer: bool,
    existing: ShareMode,
    existing_writer: bool,
    same_process: bool,
) -> Option<ShareMode> {
    use ShareMode::*;
    match (new, existing) {
        (Exclusive, Exclusive) if same_process => Some(Exclusive),
        (Exclusive, _) | (_, Exclusive) => None,
        (ReadersOnly, ReadersOnly) => Some(ReadersOnly),
        (ReadersOnly, ReadersOrWriters) if !existing_writer => Some(ReadersOnly),
        (ReadersOnly, ReadersOrWriters) => None,
        (ReadersOrWriters, ReadersOnly) if !new_writer => Some(ReadersOnly),
        (ReadersOrWriters, ReadersOnly) => None,
        (ReadersOrWriters, ReadersOrWriters) => Some(ReadersOrWriters),
        (ReadersOrWriters, Any) | (Any, ReadersOrWriters) | (Any, Any) => Some(Any),
        (ReadersOnly, Any) | (Any, ReadersOnly) => None,
    }
}

/// What an FS handle refers to.
pub enum NodeHandle {
    /// An open file.
    File(Box<dyn VfsFile>),
    /// An open directory iterator.
    Dir(Box<dyn VfsDir>),
}

/// One active node in the file server's table.
pub struct FsNode {
    /// The open VFS object.
    pub handle: NodeHandle,
    /// Internal access mode.
    pub open_mode: OpenMode,
    /// The guest mode word the node was opened with (identity bits only).
    pub guest_mode: u32,
    /// Sharing discipline.
    pub share: ShareMode,
    /// Process that opened the node.
    pub owner: ProcessId,
    /// Delete the backing path on close.
    pub temporary: bool,
}

impl FsNode {
    /// True when this node wraps an open file.
    pub fn is_file(&self) -> bool {
        matches!(self.handle, NodeHandle::File(_))
    }

    /// True when this node wraps a directory iterator.
    pub fn is_dir(&self) -> bool {
        matches!(self.handle, NodeHandle::Dir(_))
    }

    /// The open file, when this node is a file.
    pub fn file(&mut self) -> Option<&mut Box<dyn VfsFile>> {
        match &mut self.handle {
            NodeHandle::File(f) => Some(f),
            NodeHandle::Dir(_) => None,
        }
    }

    /// The open directory, when this node is a directory.
    pub fn dir(&mut self) -> Option<&mut Box<dyn VfsDir>> {
        match &mut self.handle {
            NodeHandle::File(_) => None,
            NodeHandle::Dir(d) => Some(d),
        }
    }

    /// Path of the underlying VFS object.
    pub fn path(&self) -> &str {
        match &self.handle {
            NodeHandle::File(f) => f.path(),
            NodeHandle::Dir(d) => d.path(),
        }
    }
}

/// The file server's slotted node table, separate from the kernel handle
/// table.
pub struct FsNodeTable {
    slots: Vec<Option<FsNode>>,
}

impl Default for FsNodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FsNodeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NODE_TABLE_SIZE);
        slots.resize_with(NODE_TABLE_SIZE, || None);
        Self { slots }
    }

    /// Stores a node in the first free slot; returns the 1-based handle
    /// or 0 when the table is full.
    pub fn add(&mut self, node: FsNode) -> u32 {
        match self.slots.iter().position(Option::is_none) {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx as u32 + 1
            }
            None => 0,
        }
    }

    /// Borrows a node by handle.
    pub fn get(&mut self, handle: u32) -> Option<&mut FsNode> {
        if handle == 0 || handle as usize > self.slots.len() {
            return None;
        }
        self.slots[handle as usize - 1].as_mut()
    }

    /// Finds the handle of an active file node at `path`.
    pub fn find_file(&self, guest_path: &str) -> Option<u32> {
        self.slots.iter().enumerate().find_map(|(idx, slot)| {
            let node = slot.as_ref()?;
            match &node.handle {
                NodeHandle::File(f) if path::eq(f.path(), guest_path) => Some(idx as u32 + 1),
                _ => None,
            }
        })
    }

    /// Closes a handle, returning the node for teardown.
    pub fn close(&mut self, handle: u32) -> Option<FsNode> {
        if handle == 0 || handle as usize > self.slots.len() {
            return None;
        }
        self.slots[handle as usize - 1].take()
    }

    /// Number of active nodes.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Iterates active nodes (for invariant checks and teardown).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut FsNode)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|n| (idx as u32 + 1, n)))
    }
}
