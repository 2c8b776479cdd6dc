//! The emulated guest kernel.
//!
//! Object model, handle tables, virtual timing, the cooperative
//! scheduler and the session/server message protocol. The address space
//! and the servers themselves live in sibling crates; operations that
//! need them take them as explicit parameters.

pub mod handles;
pub mod ipc;
pub mod kernel;
pub mod message;
pub mod object;
pub mod process;
pub mod property;
pub mod sched;
pub mod server;
pub mod sync;
pub mod thread;
pub mod timing;

pub use handles::{HandleOwner, HandleTable};
pub use ipc::IpcContext;
pub use kernel::{Kernel, KernelError, Session, TimeoutEvent};
pub use message::{ArgKind, IpcArgs, Message, MessageKind, NotifyInfo, ASYNC_FUNC_BIT};
pub use object::{ProcessId, ServerId, SessionId, ThreadId};
pub use process::{LoadedImage, Process};
pub use property::{PropertyStore, PropertyType};
pub use server::{Handler, OpcodeTable, Service};
pub use thread::{CpuState, Thread, ThreadState};
pub use timing::{TimerHandle, Timing};
