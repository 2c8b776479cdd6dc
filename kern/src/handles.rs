//! Slotted handle tables with owner attribution.

/// Who owns a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOwner {
    /// Owned by the kernel itself.
    Kernel,
    /// Owned by a process.
    Process,
    /// Owned by a single thread.
    Thread,
}

#[derive(Debug, Clone, Copy)]
struct HandleInfo {
    free: bool,
    org: i32,
    owner: HandleOwner,
    owner_id: u64,
}

const FREE_SLOT: HandleInfo = HandleInfo {
    free: true,
    org: -1,
    owner: HandleOwner::Kernel,
    owner_id: 0,
};

/// A fixed-capacity table mapping small integer handles to owners.
///
/// Handles are 1-based indices; handle 0 is always invalid. A live
/// slot's `org` field records its own 1-based position for the lifetime
/// of the handle.
#[derive(Debug)]
pub struct HandleTable<const N: usize = 512> {
    handles: [HandleInfo; N],
}

impl<const N: usize> Default for HandleTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HandleTable<N> {
    /// Creates a table with every slot free.
    pub fn new() -> Self {
        Self {
            handles: [FREE_SLOT; N],
        }
    }

    /// Allocates the first free slot for `owner`, or returns -1 when the
    /// table is full.
    pub fn new_handle(&mut self, owner: HandleOwner, owner_id: u64) -> i32 {
        let Some(slot) = self.handles.iter().position(|h| h.free) else {
            return -1;
        };

        let handle = slot as i32 + 1;
        self.handles[slot] = HandleInfo {
            free: false,
            org: handle,
            owner,
            owner_id,
        };
        handle
    }

    /// Returns the owner id recorded for `handle`, or 0 for free or
    /// out-of-range handles.
    pub fn owner_of(&self, handle: i32) -> u64 {
        match self.slot(handle) {
            Some(info) if !info.free => info.owner_id,
            _ => 0,
        }
    }

    /// Returns the owner kind for a live handle.
    pub fn owner_kind(&self, handle: i32) -> Option<HandleOwner> {
        self.slot(handle)
            .and_then(|info| (!info.free).then_some(info.owner))
    }

    /// Returns the slot's recorded original index.
    pub fn real_handle(&self, handle: i32) -> i32 {
        self.slot(handle).map_or(-1, |info| info.org)
    }

    /// Frees a handle. Out-of-range handles return `false` and mutate
    /// nothing.
    pub fn free_handle(&mut self, handle: i32) -> bool {
        if handle < 1 || handle as usize > N {
            return false;
        }
        self.handles[handle as usize - 1].free = true;
        true
    }

    /// Frees every live handle whose owner id matches, in one pass.
    pub fn free_all_by_owner(&mut self, owner_id: u64) {
        for info in self.handles.iter_mut() {
            if !info.free && info.owner_id == owner_id {
                info.free = true;
            }
        }
    }

    /// Counts live handles; diagnostics only.
    pub fn live(&self) -> usize {
        self.handles.iter().filter(|h| !h.free).count()
    }

    fn slot(&self, handle: i32) -> Option<&HandleInfo> {
        if handle < 1 || handle as usize > N {
            return None;
        }
        Some(&self.handles[handle as usize - 1])
    }
}
