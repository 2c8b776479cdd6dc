//! In-flight requests from sessions to servers.

use karst_mem::{DesWidth, GuestAddr};

use crate::object::{SessionId, ThreadId};

/// Bit 15 of a function code marks the request as asynchronous: the
/// handler registers a notify instead of completing inline.
pub const ASYNC_FUNC_BIT: u16 = 0x8000;

/// What an argument slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgKind {
    /// Nothing meaningful; reads as raw zero.
    #[default]
    Unused,
    /// A raw 32-bit immediate.
    Int,
    /// Pointer to a descriptor the server reads.
    DesIn(DesWidth),
    /// Pointer to a descriptor the server fills.
    DesOut(DesWidth),
}

/// The four argument slots of a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcArgs {
    /// Raw slot values.
    pub values: [u32; 4],
    /// Per-slot kinds.
    pub kinds: [ArgKind; 4],
}

impl IpcArgs {
    /// Starts an empty argument set; chain the builder methods below.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets slot `i` to an immediate value.
    pub fn int(mut self, i: usize, value: u32) -> Self {
        self.values[i] = value;
        self.kinds[i] = ArgKind::Int;
        self
    }

    /// Sets slot `i` to an input descriptor pointer.
    pub fn des_in(mut self, i: usize, addr: GuestAddr, width: DesWidth) -> Self {
        self.values[i] = addr;
        self.kinds[i] = ArgKind::DesIn(width);
        self
    }

    /// Sets slot `i` to an output descriptor pointer.
    pub fn des_out(mut self, i: usize, addr: GuestAddr, width: DesWidth) -> Self {
        self.values[i] = addr;
        self.kinds[i] = ArgKind::DesOut(width);
        self
    }
}

/// Which protocol step a message performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Session establishment; dispatched to the server's connect handler.
    Connect,
    /// Session teardown.
    Disconnect,
    /// A regular request carrying a function code.
    Request,
}

/// One in-flight request.
#[derive(Debug, Clone)]
pub struct Message {
    /// Protocol step.
    pub kind: MessageKind,
    /// Function code; bit 15 marks asynchronous requests.
    pub function: u16,
    /// Argument slots.
    pub args: IpcArgs,
    /// Session the request travels on.
    pub session: SessionId,
    /// Thread that issued the send and is blocked on completion.
    pub thread: ThreadId,
    /// Guest address of the request-status cell to complete into.
    pub status_addr: GuestAddr,
}

impl Message {
    /// Function code with the async bit stripped.
    pub fn function_code(&self) -> u16 {
        self.function & !ASYNC_FUNC_BIT
    }

    /// True when the async bit is set.
    pub fn is_async(&self) -> bool {
        self.function & ASYNC_FUNC_BIT != 0
    }
}

/// A deferred completion: the requester and its status cell.
///
/// Servers hold these for asynchronous opcodes and hand them back to the
/// kernel when the awaited condition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyInfo {
    /// Thread to make runnable on completion.
    pub thread: ThreadId,
    /// Status cell to write.
    pub status_addr: GuestAddr,
}
