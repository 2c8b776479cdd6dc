//! The context handed to server opcode handlers.
//!
//! An [`IpcContext`] bundles the message being serviced with mutable
//! access to the address space and the kernel, and owns the
//! one-status-write-per-message discipline: every handler either calls
//! [`set_status`](IpcContext::set_status) exactly once or defers
//! completion by taking a [`NotifyInfo`].

use log::{error, warn};

use karst_base::{status, ucs2};
use karst_mem::descriptor::{self, Descriptor};
use karst_mem::{AddressSpace, DesWidth, GuestAddr, MemError};

use crate::kernel::Kernel;
use crate::message::{ArgKind, Message, NotifyInfo};
use crate::object::{ProcessId, SessionId, ThreadId};

/// Per-message handler context.
pub struct IpcContext<'a> {
    /// The guest address space.
    pub mem: &'a mut AddressSpace,
    /// The kernel.
    pub kernel: &'a mut Kernel,
    msg: &'a Message,
    completed: bool,
    deferred: bool,
}

impl<'a> IpcContext<'a> {
    /// Builds a context for one message.
    pub fn new(mem: &'a mut AddressSpace, kernel: &'a mut Kernel, msg: &'a Message) -> Self {
        Self {
            mem,
            kernel,
            msg,
            completed: false,
            deferred: false,
        }
    }

    /// The message being serviced.
    pub fn message(&self) -> &Message {
        self.msg
    }

    /// Function code with the async bit stripped.
    pub fn function(&self) -> u16 {
        self.msg.function_code()
    }

    /// The session the message arrived on.
    pub fn session(&self) -> SessionId {
        self.msg.session
    }

    /// The sending thread.
    pub fn sender(&self) -> ThreadId {
        self.msg.thread
    }

    /// The sending thread's process.
    pub fn sender_process(&self) -> Option<ProcessId> {
        self.kernel.thread(self.msg.thread).map(|t| t.process)
    }

    // ── Argument access ─────────────────────────────────────────────────

    /// Raw 32-bit slot value, `None` out of range.
    pub fn get_u32(&self, slot: usize) -> Option<u32> {
        (slot < 4).then(|| self.msg.args.values[slot])
    }

    /// Slot value as a signed integer.
    pub fn get_i32(&self, slot: usize) -> Option<i32> {
        self.get_u32(slot).map(|v| v as i32)
    }

    /// Decodes a wide descriptor argument as a string.
    ///
    /// Returns `None` for non-descriptor slots or undecodable guest
    /// memory; handlers translate that to [`status::ARGUMENT`].
    pub fn get_str(&self, slot: usize) -> Option<String> {
        let addr = self.descriptor_addr(slot)?;
        match descriptor::read_string(self.mem, addr) {
            Ok(s) => Some(s),
            Err(err) => {
                warn!("bad wide descriptor in slot {slot}: {err}");
                None
            }
        }
    }

    /// Decodes a narrow descriptor argument as raw bytes.
    pub fn get_bytes(&self, slot: usize) -> Option<Vec<u8>> {
        let addr = self.descriptor_addr(slot)?;
        match descriptor::read_bytes(self.mem, addr) {
            Ok(b) => Some(b),
            Err(err) => {
                warn!("bad narrow descriptor in slot {slot}: {err}");
                None
            }
        }
    }

    /// Reads a fixed-layout package argument (a narrow descriptor whose
    /// payload is a raw struct image).
    pub fn get_pkg(&self, slot: usize) -> Option<Vec<u8>> {
        self.get_bytes(slot)
    }

    /// Writes a string into a wide descriptor-out argument.
    ///
    /// Returns the guest status for the write: [`status::NONE`],
    /// [`status::OVERFLOW`] (guest buffer untouched) or
    /// [`status::ARGUMENT`].
    pub fn write_str(&mut self, slot: usize, value: &str) -> i32 {
        let payload = ucs2::to_bytes(&ucs2::from_utf8(value));
        self.write_des(slot, &payload, DesWidth::Wide)
    }

    /// Writes raw bytes into a narrow descriptor-out argument.
    pub fn write_bytes(&mut self, slot: usize, payload: &[u8]) -> i32 {
        self.write_des(slot, payload, DesWidth::Narrow)
    }

    /// Writes a fixed-layout package; identical wire behaviour to
    /// [`write_bytes`](Self::write_bytes).
    pub fn write_pkg(&mut self, slot: usize, payload: &[u8]) -> i32 {
        self.write_bytes(slot, payload)
    }

    fn write_des(&mut self, slot: usize, payload: &[u8], width: DesWidth) -> i32 {
        let Some(addr) = self.descriptor_addr(slot) else {
            return status::ARGUMENT;
        };
        let des = match Descriptor::parse(self.mem, addr) {
            Ok(des) => des,
            Err(_) => return status::ARGUMENT,
        };
        match des.write(self.mem, payload, width) {
            Ok(()) => status::NONE,
            Err(MemError::Overflow) => status::OVERFLOW,
            Err(_) => status::ARGUMENT,
        }
    }

    fn descriptor_addr(&self, slot: usize) -> Option<GuestAddr> {
        if slot >= 4 {
            return None;
        }
        match self.msg.args.kinds[slot] {
            ArgKind::DesIn(_) | ArgKind::DesOut(_) => Some(self.msg.args.values[slot]),
            // Tolerate untyped slots: some guest stubs pass raw pointers.
            ArgKind::Int | ArgKind::Unused => Some(self.msg.args.values[slot]),
        }
    }

    // ── Completion ──────────────────────────────────────────────────────

    /// Completes the message: writes `code` to the request-status cell
    /// and unblocks the sender. A second call is a server bug; it is
    /// logged and ignored so the first status stands.
    pub fn set_status(&mut self, code: i32) {
        if self.completed {
            error!(
                "double completion of function {:#06x} (second status {})",
                self.msg.function,
                status::name(code)
            );
            return;
        }
        self.completed = true;
        self.kernel.complete(
            self.mem,
            NotifyInfo {
                thread: self.msg.thread,
                status_addr: self.msg.status_addr,
            },
            code,
        );
    }

    /// Defers completion: the handler stores the returned notify and
    /// fires it later through [`Kernel::complete`].
    pub fn defer(&mut self) -> NotifyInfo {
        self.deferred = true;
        NotifyInfo {
            thread: self.msg.thread,
            status_addr: self.msg.status_addr,
        }
    }

    /// True once the handler completed or deferred the message.
    pub fn responded(&self) -> bool {
        self.completed || self.deferred
    }
}
