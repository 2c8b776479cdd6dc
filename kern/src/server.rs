//! Server dispatch: opcode tables and the service trait.
//!
//! A server is a record of state plus a static table mapping opcodes to
//! handler function pointers. Dispatch looks the opcode up and falls
//! back to the service's unhandled hook, which keeps unknown opcodes
//! from wedging the sender.

use log::warn;

use karst_base::status;
use karst_mem::AddressSpace;

use crate::ipc::IpcContext;
use crate::kernel::Kernel;
use crate::object::SessionId;

/// An opcode handler for a service with state `S`.
pub type Handler<S> = fn(&mut S, &mut IpcContext<'_>);

/// A static opcode → handler table.
pub struct OpcodeTable<S: 'static> {
    /// `(opcode, handler)` pairs; order is irrelevant.
    pub entries: &'static [(u16, Handler<S>)],
}

impl<S> OpcodeTable<S> {
    /// Looks up the handler for an opcode.
    pub fn lookup(&self, opcode: u16) -> Option<Handler<S>> {
        self.entries
            .iter()
            .find(|(op, _)| *op == opcode)
            .map(|(_, h)| *h)
    }

    /// Dispatches `ctx` through the table; returns `false` when no entry
    /// matched.
    pub fn dispatch(&self, state: &mut S, ctx: &mut IpcContext<'_>) -> bool {
        match self.lookup(ctx.function()) {
            Some(handler) => {
                handler(state, ctx);
                true
            }
            None => false,
        }
    }
}

/// A guest-facing server.
///
/// Handlers must either complete the message or defer it by registering
/// a notify; the dispatch layer completes unhandled synchronous opcodes
/// with [`status::NOT_SUPPORTED`] so no sender is left blocked.
pub trait Service {
    /// The kernel-wide server name (e.g. `"!FileServer"`).
    fn name(&self) -> &str;

    /// Handles session establishment.
    fn connect(&mut self, ctx: &mut IpcContext<'_>) {
        ctx.set_status(status::NONE);
    }

    /// Handles session teardown.
    fn disconnect(&mut self, ctx: &mut IpcContext<'_>) {
        ctx.set_status(status::NONE);
    }

    /// Handles one request message.
    fn handle(&mut self, ctx: &mut IpcContext<'_>);

    /// Drops any session-scoped state and cancels pending notifies for a
    /// session that is going away without a disconnect round-trip
    /// (process death).
    fn cancel_session(&mut self, _mem: &mut AddressSpace, _kernel: &mut Kernel, _session: SessionId) {
    }

    /// Called after [`handle`](Service::handle) when the handler neither
    /// completed nor deferred; the default completes with
    /// [`status::NOT_SUPPORTED`].
    fn on_unhandled(&mut self, ctx: &mut IpcContext<'_>) {
        warn!(
            "{}: unimplemented opcode {:#06x}",
            self.name(),
            ctx.function()
        );
        ctx.set_status(status::NOT_SUPPORTED);
    }
}

#[cfg(test)]
mod tests {
    use karst_base::GuestVersion;
    use karst_mem::DesWidth;

    use super::*;
    use crate::message::{IpcArgs, Message, MessageKind};
    use crate::process::LoadedImage;

    struct Echo {
        last: Option<String>,
    }

    impl Echo {
        fn op_store(&mut self, ctx: &mut IpcContext<'_>) {
            match ctx.get_str(0) {
                Some(text) => {
                    self.last = Some(text);
                    ctx.set_status(status::NONE);
                }
                None => ctx.set_status(status::ARGUMENT),
            }
        }

        const OPS: OpcodeTable<Echo> = OpcodeTable {
            entries: &[(0x01, Echo::op_store)],
        };
    }

    impl Service for Echo {
        fn name(&self) -> &str {
            "!Echo"
        }

        fn handle(&mut self, ctx: &mut IpcContext<'_>) {
            if !Self::OPS.dispatch(self, ctx) {
                self.on_unhandled(ctx);
            }
        }
    }

    #[test]
    fn dispatch_routes_by_opcode() {
        let mut mem = AddressSpace::new(GuestVersion::V94);
        let mut kernel = Kernel::new(GuestVersion::V94);
        kernel.register_server("!Echo").unwrap();
        let pid = kernel
            .spawn_process(
                &mut mem,
                &LoadedImage {
                    uids: Default::default(),
                    path: "c:\\e.exe".into(),
                    code: vec![0; 4],
                    data: Vec::new(),
                    bss_size: 0,
                    entry_offset: 0,
                    stack_size: 0,
                },
                "",
            )
            .unwrap();
        kernel.run_process(pid).unwrap();
        let thread = kernel.process(pid).unwrap().primary_thread().unwrap();
        let local = kernel.process(pid).unwrap().local_chunk;
        let base = mem.chunk(local).unwrap().base;

        // Build a constant wide descriptor holding "hi".
        let des = base + 0x40;
        mem.write_u32(des, 2).unwrap();
        mem.write_bytes(des + 4, &[b'h', 0, b'i', 0]).unwrap();

        let session = kernel
            .create_session(thread, "!Echo", IpcArgs::new(), base)
            .unwrap();
        let mut echo = Echo { last: None };

        // Service the connect, then a store, then an unknown opcode.
        let connect = kernel.pop_request(crate::object::ServerId(0)).unwrap();
        let mut ctx = IpcContext::new(&mut mem, &mut kernel, &connect);
        echo.connect(&mut ctx);

        let store = Message {
            kind: MessageKind::Request,
            function: 0x01,
            args: IpcArgs::new().des_in(0, des, DesWidth::Wide),
            session,
            thread,
            status_addr: base,
        };
        let mut ctx = IpcContext::new(&mut mem, &mut kernel, &store);
        echo.handle(&mut ctx);
        assert_eq!(echo.last.as_deref(), Some("hi"));

        let unknown = Message {
            function: 0x7f,
            ..store.clone()
        };
        let mut ctx = IpcContext::new(&mut mem, &mut kernel, &unknown);
        echo.handle(&mut ctx);
        assert!(ctx.responded());
        assert_eq!(
            mem.read_u32(base).unwrap(),
            status::NOT_SUPPORTED as u32
        );
    }
}
