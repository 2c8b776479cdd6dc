//! The guest window server.
//!
//! One client per session. Connection-level messages create the client
//! and feed it command buffers; the two asynchronous readiness opcodes
//! register event/redraw notifies. Screen configuration comes from the
//! ROM's `wsini.ini`, loaded lazily on the first init.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error, info, warn};

use karst_base::{status, ucs2};
use karst_fs::{OpenMode, Vfs};
use karst_kernel::{IpcContext, Kernel, Service, SessionId};
use karst_mem::AddressSpace;

use crate::client::WindowClient;
use crate::config::{default_screens, parse_wsini, ScreenConfig};
use crate::driver::SharedDriver;
use crate::event::{Event, EventCode};
use crate::ops::{ws_msg, CMD_SLOT};

/// The kernel-wide name of the window server.
pub const SERVER_NAME: &str = "!Windowserver";

/// The window server.
pub struct WindowServer {
    vfs: Rc<RefCell<Vfs>>,
    driver: SharedDriver,
    screens: Vec<ScreenConfig>,
    loaded: bool,
    clients: HashMap<SessionId, WindowClient>,
}

impl WindowServer {
    /// Creates the server over a shared VFS and graphics driver.
    pub fn new(vfs: Rc<RefCell<Vfs>>, driver: SharedDriver) -> Self {
        Self {
            vfs,
            driver,
            screens: Vec::new(),
            loaded: false,
            clients: HashMap::new(),
        }
    }

    /// Screen configurations in use (tests and diagnostics).
    pub fn screens(&self) -> &[ScreenConfig] {
        &self.screens
    }

    /// Borrows a session's client.
    pub fn client(&mut self, session: SessionId) -> Option<&mut WindowClient> {
        self.clients.get_mut(&session)
    }

    fn ensure_config(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        self.screens = self.load_wsini().unwrap_or_default();
        if self.screens.is_empty() {
            error!("no usable wsini.ini; window clients get a default screen");
            self.screens = default_screens();
        }
    }

    /// Reads `<rom drive>:\system\data\wsini.ini` and parses it.
    fn load_wsini(&mut self) -> Option<Vec<ScreenConfig>> {
        let mut vfs = self.vfs.borrow_mut();
        let drive = vfs.rom_drive()?;
        let path = format!("{}:\\system\\data\\wsini.ini", drive.letter());

        let mut file = match vfs.open_file(&path, OpenMode::READ | OpenMode::BIN) {
            Ok(file) => file,
            Err(err) => {
                warn!("cannot open {path}: {err}");
                return None;
            }
        };
        let mut raw = vec![0u8; file.size() as usize];
        if file.read(&mut raw).ok()? != raw.len() {
            warn!("short read of {path}");
            return None;
        }

        // The file may be UTF-16 (with BOM) or plain eight-bit text.
        let text = if raw.len() >= 2 && raw[0] == 0xFF && raw[1] == 0xFE {
            ucs2::to_utf8(&ucs2::from_bytes(&raw[2..]))
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };

        info!("screen configuration loaded from {path}");
        Some(parse_wsini(&text))
    }

    fn init(&mut self, ctx: &mut IpcContext<'_>) {
        self.ensure_config();
        let session = ctx.session();
        debug!("window client for session {}", session.0);
        self.clients
            .insert(session, WindowClient::new(session, ctx.sender()));
        ctx.set_status(session.0 as i32);
    }

    fn command_buffer(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(buf) = ctx.get_bytes(CMD_SLOT) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let tally: Vec<i32> = self
            .clients
            .values()
            .flat_map(WindowClient::group_priorities)
            .collect();

        let session = ctx.session();
        let Some(client) = self.clients.get_mut(&session) else {
            warn!("command buffer before init on session {}", session.0);
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let reply = client.execute_buffer(ctx, &self.driver, &self.screens, &tally, &buf);
        ctx.set_status(reply);
    }

    // ── Input routing ───────────────────────────────────────────────────

    /// Delivers a key event to the client owning the focused group.
    pub fn route_key(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel, _scancode: u32) {
        let now = kernel.timing.now();
        for client in self.clients.values_mut() {
            if let Some(focus) = client_focus(client) {
                client.queue_event_raw(mem, kernel, Event::new(focus, EventCode::Key, now));
                return;
            }
        }
        debug!("key event dropped: no focused group");
    }

    /// Delivers a pointer event to the client owning the focused group.
    pub fn route_pointer(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel) {
        let now = kernel.timing.now();
        for client in self.clients.values_mut() {
            if let Some(focus) = client_focus(client) {
                client.queue_event_raw(mem, kernel, Event::new(focus, EventCode::Pointer, now));
                return;
            }
        }
    }
}

/// The focused group of a client's primary screen device, if any.
fn client_focus(client: &mut WindowClient) -> Option<u32> {
    let device = client.primary_device()?;
    match client.object(device) {
        Some(crate::window::ClientObject::Screen(screen)) => screen.focus,
        _ => None,
    }
}

impl Service for WindowServer {
    fn name(&self) -> &str {
        SERVER_NAME
    }

    fn handle(&mut self, ctx: &mut IpcContext<'_>) {
        match ctx.function() {
            ws_msg::INIT => self.init(ctx),
            ws_msg::COMMAND_BUFFER | ws_msg::SYNC_MSG_BUF => self.command_buffer(ctx),
            ws_msg::EVENT_READY => {
                let session = ctx.session();
                match self.clients.get_mut(&session) {
                    Some(client) => client.register_event_notify(ctx),
                    None => ctx.set_status(status::ARGUMENT),
                }
            }
            ws_msg::REDRAW_READY => {
                let session = ctx.session();
                match self.clients.get_mut(&session) {
                    Some(client) => client.register_redraw_notify(ctx),
                    None => ctx.set_status(status::ARGUMENT),
                }
            }
            _ => self.on_unhandled(ctx),
        }
    }

    fn disconnect(&mut self, ctx: &mut IpcContext<'_>) {
        if let Some(mut client) = self.clients.remove(&ctx.session()) {
            client.cancel_notifies(ctx.mem, ctx.kernel);
        }
        ctx.set_status(status::NONE);
    }

    fn cancel_session(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel, session: SessionId) {
        if let Some(mut client) = self.clients.remove(&session) {
            client.cancel_notifies(mem, kernel);
        }
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};

    use karst_base::{GuestVersion, UidTriple};
    use karst_fs::{DriveMedia, DriveNumber, IoAttrib, RamFs, RomEntry, RomFs, RomManifest};
    use karst_kernel::{
        IpcArgs, Kernel, LoadedImage, MessageKind, ServerId, ThreadId, ASYNC_FUNC_BIT,
    };
    use karst_mem::{AddressSpace, ChunkAttrib, DesWidth, GuestAddr, Region};

    use super::*;
    use crate::client::HANDLE_BASE;
    use crate::driver::NullGraphicsDriver;
    use crate::ops::{client_op, gc_op, screen_op, window_op, CMD_HANDLE_BIT, REPLY_SLOT};

    const WSINI: &str = "[SCREEN0]\nSCR_WIDTH1 176\nSCR_HEIGHT1 208\nSCR_ROTATION1 0\n";

    struct Fix {
        mem: AddressSpace,
        kernel: Kernel,
        server: WindowServer,
        driver: Rc<RefCell<NullGraphicsDriver>>,
        server_id: ServerId,
        session: SessionId,
        thread: ThreadId,
        cursor: GuestAddr,
        limit: GuestAddr,
    }

    impl Fix {
        fn new() -> Self {
            let mut vfs = Vfs::new();
            vfs.add_filesystem(Box::new(RamFs::new()));
            vfs.add_filesystem(Box::new(RomFs::new(&RomManifest {
                entries: vec![RomEntry {
                    path: "z:\\system\\data\\wsini.ini".into(),
                    data: WSINI.as_bytes().to_vec(),
                    rom_address: 0x8000_8000,
                }],
            })));
            vfs.mount(DriveNumber::C, DriveMedia::Physical, IoAttrib::INTERNAL, None);
            vfs.mount(DriveNumber::Z, DriveMedia::Rom, IoAttrib::INTERNAL, None);

            let driver = NullGraphicsDriver::shared();
            let shared: SharedDriver = driver.clone();
            let server = WindowServer::new(Rc::new(RefCell::new(vfs)), shared);

            let mut kernel = Kernel::new(GuestVersion::V94);
            let mut mem = AddressSpace::new(GuestVersion::V94);
            let server_id = kernel.register_server(SERVER_NAME).unwrap();
            let pid = kernel
                .spawn_process(
                    &mut mem,
                    &LoadedImage {
                        uids: UidTriple::default(),
                        path: "c:\\sys\\bin\\ui.exe".into(),
                        code: vec![0; 16],
                        data: Vec::new(),
                        bss_size: 0,
                        entry_offset: 0,
                        stack_size: 0x1000,
                    },
                    "",
                )
                .unwrap();
            kernel.run_process(pid).unwrap();
            let thread = kernel.process(pid).unwrap().primary_thread().unwrap();

            let scratch = mem
                .alloc_chunk(
                    "ws-scratch",
                    Region::SharedData,
                    0x8000,
                    ChunkAttrib::READ | ChunkAttrib::WRITE,
                )
                .unwrap();
            let base = mem.chunk(scratch).unwrap().base;

            let mut fix = Fix {
                mem,
                kernel,
                server,
                driver,
                server_id,
                session: SessionId(0),
                thread,
                cursor: base,
                limit: base + 0x8000,
            };
            fix.session = fix
                .kernel
                .create_session(fix.thread, SERVER_NAME, IpcArgs::new(), fix.alloc(4))
                .unwrap();
            fix.pump();

            // Init creates the client.
            let st = fix.send(ws_msg::INIT, IpcArgs::new());
            assert_eq!(st, fix.session.0 as i32);
            fix
        }

        fn alloc(&mut self, len: u32) -> GuestAddr {
            let addr = self.cursor;
            self.cursor += (len + 3) & !3;
            assert!(self.cursor <= self.limit, "scratch exhausted");
            addr
        }

        fn pump(&mut self) {
            while let Some(msg) = self.kernel.pop_request(self.server_id) {
                let mut ctx = IpcContext::new(&mut self.mem, &mut self.kernel, &msg);
                match msg.kind {
                    MessageKind::Connect => self.server.connect(&mut ctx),
                    MessageKind::Disconnect => self.server.disconnect(&mut ctx),
                    MessageKind::Request => self.server.handle(&mut ctx),
                }
            }
        }

        fn send(&mut self, function: u16, args: IpcArgs) -> i32 {
            let status_addr = self.alloc(4);
            self.mem.write_u32(status_addr, 0x7fff_ffff).unwrap();
            self.kernel
                .send(self.thread, self.session, function, args, status_addr)
                .unwrap();
            self.pump();
            self.mem.read_u32(status_addr).unwrap() as i32
        }

        /// Sends one batched command and returns the reply plus the
        /// reply-slot descriptor address.
        fn run_cmd(&mut self, op: u16, handle: Option<u32>, payload: &[u8]) -> (i32, GuestAddr) {
            let buf = encode_cmd(op, handle, payload);
            let cmd_des = self.alloc(4 + buf.len() as u32);
            self.mem.write_u32(cmd_des, buf.len() as u32).unwrap();
            self.mem.write_bytes(cmd_des + 4, &buf).unwrap();

            let reply_des = self.alloc(8 + 256);
            self.mem.write_u32(reply_des, 2 << 28).unwrap();
            self.mem.write_u32(reply_des + 4, 256).unwrap();

            let st = self.send(
                ws_msg::COMMAND_BUFFER,
                IpcArgs::new()
                    .des_in(0, cmd_des, DesWidth::Narrow)
                    .des_out(REPLY_SLOT, reply_des, DesWidth::Narrow),
            );
            (st, reply_des)
        }

        fn reply_bytes(&self, des: GuestAddr) -> Vec<u8> {
            karst_mem::descriptor::read_bytes(&self.mem, des).unwrap()
        }

        fn create_screen_device(&mut self) -> u32 {
            let (st, _) = self.run_cmd(client_op::CREATE_SCREEN_DEVICE, None, &0i32.to_le_bytes());
            assert!(st > HANDLE_BASE as i32, "screen device create failed: {st}");
            st as u32
        }

        fn create_group(&mut self, focus: bool) -> u32 {
            let mut payload = [0u8; 12];
            LittleEndian::write_u32(&mut payload[4..8], u32::from(focus));
            let (st, _) = self.run_cmd(client_op::CREATE_WINDOW_GROUP, None, &payload);
            assert!(st > HANDLE_BASE as i32, "group create failed: {st}");
            st as u32
        }

        fn create_user_window(&mut self, parent: u32) -> u32 {
            let mut payload = [0u8; 12];
            LittleEndian::write_u32(&mut payload[0..4], parent);
            let (st, _) = self.run_cmd(client_op::CREATE_WINDOW, None, &payload);
            assert!(st > HANDLE_BASE as i32, "window create failed: {st}");
            st as u32
        }

        fn get_event(&mut self) -> Option<(u32, u32)> {
            let (st, reply) = self.run_cmd(client_op::GET_EVENT, None, &[]);
            if st != 0 {
                return None;
            }
            let pkg = self.reply_bytes(reply);
            Some((
                LittleEndian::read_u32(&pkg[0..4]),
                LittleEndian::read_u32(&pkg[4..8]),
            ))
        }

        fn get_redraw(&mut self) -> Option<u32> {
            let (st, reply) = self.run_cmd(client_op::GET_REDRAW, None, &[]);
            if st != 0 {
                return None;
            }
            let pkg = self.reply_bytes(reply);
            Some(LittleEndian::read_u32(&pkg[0..4]))
        }
    }

    fn encode_cmd(op: u16, handle: Option<u32>, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let op = if handle.is_some() {
            op | CMD_HANDLE_BIT
        } else {
            op
        };
        buf.extend_from_slice(&op.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        if let Some(h) = handle {
            buf.extend_from_slice(&h.to_le_bytes());
        }
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn init_loads_wsini_configuration() {
        let mut fix = Fix::new();
        assert_eq!(fix.server.screens().len(), 1);
        assert_eq!(fix.server.screens()[0].modes[0].size.x, 176);

        let device = fix.create_screen_device();
        let (st, reply) = fix.run_cmd(screen_op::PIXEL_SIZE, Some(device), &[]);
        assert_eq!(st, 0);
        let pkg = fix.reply_bytes(reply);
        assert_eq!(LittleEndian::read_i32(&pkg[0..4]), 176);
        assert_eq!(LittleEndian::read_i32(&pkg[4..8]), 208);
    }

    #[test]
    fn screen_mode_queries() {
        let mut fix = Fix::new();
        let device = fix.create_screen_device();

        let (st, _) = fix.run_cmd(screen_op::GET_NUM_SCREEN_MODES, Some(device), &[]);
        assert_eq!(st, 1);
        let (st, _) = fix.run_cmd(screen_op::GET_SCREEN_MODE, Some(device), &[]);
        assert_eq!(st, 1);

        let (st, reply) = fix.run_cmd(
            screen_op::GET_SCREEN_MODE_SIZE_AND_ROTATION2,
            Some(device),
            &1i32.to_le_bytes(),
        );
        assert_eq!(st, 0);
        let pkg = fix.reply_bytes(reply);
        assert_eq!(LittleEndian::read_i32(&pkg[0..4]), 176);
        assert_eq!(LittleEndian::read_i32(&pkg[8..12]), 0);
    }

    #[test]
    fn focus_transfers_between_groups() {
        let mut fix = Fix::new();
        fix.create_screen_device();

        let g1 = fix.create_group(true);
        assert_eq!(fix.get_event(), Some((0, g1))); // focus gained

        let g2 = fix.create_group(true);
        assert_eq!(fix.get_event(), Some((1, g1))); // g1 lost focus
        assert_eq!(fix.get_event(), Some((0, g2))); // g2 gained focus

        let (st, _) = fix.run_cmd(client_op::GET_FOCUS_WINDOW_GROUP, None, &[]);
        assert_eq!(st, g2 as i32);
    }

    #[test]
    fn receive_focus_false_passes_focus_on() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let g1 = fix.create_group(true);
        let g2 = fix.create_group(true);
        while fix.get_event().is_some() {}

        // G2 holds focus; disabling it hands focus back to G1.
        let (st, _) = fix.run_cmd(
            window_op::RECEIVE_FOCUS,
            Some(g2),
            &0i32.to_le_bytes(),
        );
        assert_eq!(st, 0);
        assert_eq!(fix.get_event(), Some((1, g2)));
        assert_eq!(fix.get_event(), Some((0, g1)));
    }

    #[test]
    fn redraws_pop_in_priority_order() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let group = fix.create_group(false);
        let win_a = fix.create_user_window(group);
        let win_b = fix.create_user_window(group);

        let (st, _) = fix.run_cmd(
            window_op::SET_ORDINAL_POSITION,
            Some(win_a),
            &2i32.to_le_bytes(),
        );
        assert_eq!(st, 0);
        let (st, _) = fix.run_cmd(
            window_op::SET_ORDINAL_POSITION,
            Some(win_b),
            &5i32.to_le_bytes(),
        );
        assert_eq!(st, 0);

        // Invalidate A first, B second; B must still pop first.
        let rect = [0u8; 16];
        fix.run_cmd(window_op::INVALIDATE, Some(win_a), &rect);
        fix.run_cmd(window_op::INVALIDATE, Some(win_b), &rect);

        assert_eq!(fix.get_redraw(), Some(win_b));
        assert_eq!(fix.get_redraw(), Some(win_a));
        assert_eq!(fix.get_redraw(), None);
    }

    #[test]
    fn event_ready_completes_on_new_event() {
        let mut fix = Fix::new();
        fix.create_screen_device();

        let cell = fix.alloc(4);
        fix.mem.write_u32(cell, 0x7fff_ffff).unwrap();
        fix.kernel
            .send(
                fix.thread,
                fix.session,
                ws_msg::EVENT_READY | ASYNC_FUNC_BIT,
                IpcArgs::new(),
                cell,
            )
            .unwrap();
        fix.pump();
        assert_eq!(fix.mem.read_u32(cell).unwrap(), 0x7fff_ffff);

        // Creating a focused group queues a focus event and completes
        // the notify.
        fix.create_group(true);
        assert_eq!(fix.mem.read_u32(cell).unwrap(), 0);
    }

    #[test]
    fn redraw_ready_completes_immediately_when_pending() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let group = fix.create_group(false);
        let win = fix.create_user_window(group);
        fix.run_cmd(window_op::INVALIDATE, Some(win), &[0u8; 16]);

        let st = fix.send(ws_msg::REDRAW_READY | ASYNC_FUNC_BIT, IpcArgs::new());
        assert_eq!(st, 0);
    }

    #[test]
    fn end_redraw_flushes_to_driver_under_lock() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let group = fix.create_group(false);
        let win = fix.create_user_window(group);

        let (gc, _) = fix.run_cmd(client_op::CREATE_GC, None, &[]);
        let gc = gc as u32;
        let (st, _) = fix.run_cmd(gc_op::ACTIVATE, Some(gc), &win.to_le_bytes());
        assert!(st >= 0);

        fix.run_cmd(window_op::BEGIN_REDRAW, Some(win), &[]);

        // DrawText: pos (4, 8), "hi".
        let mut payload = Vec::new();
        payload.extend_from_slice(&4i32.to_le_bytes());
        payload.extend_from_slice(&8i32.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&karst_base::ucs2::to_bytes(&karst_base::ucs2::from_utf8("hi")));
        let (st, _) = fix.run_cmd(gc_op::DRAW_TEXT, Some(gc), &payload);
        assert_eq!(st, 0);

        let (st, _) = fix.run_cmd(window_op::END_REDRAW, Some(win), &[]);
        assert_eq!(st, 0);

        let log = fix.driver.borrow().log.clone();
        let lock_at = log.iter().position(|l| l == "lock").unwrap();
        let text_at = log.iter().position(|l| l.starts_with("text")).unwrap();
        let end_at = log.iter().position(|l| l == "end-invalidate").unwrap();
        let unlock_at = log.iter().position(|l| l == "unlock").unwrap();
        assert!(lock_at < text_at && text_at < end_at && end_at < unlock_at);
        assert!(log.iter().any(|l| l.contains("text \"hi\"")));
    }

    #[test]
    fn begin_redraw_supersedes_queued_redraw() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let group = fix.create_group(false);
        let win = fix.create_user_window(group);

        fix.run_cmd(window_op::INVALIDATE, Some(win), &[0u8; 16]);
        fix.run_cmd(window_op::BEGIN_REDRAW, Some(win), &[]);

        // The queued redraw was dequeued by BeginRedraw.
        assert_eq!(fix.get_redraw(), None);
    }

    #[test]
    fn group_queries() {
        let mut fix = Fix::new();
        fix.create_screen_device();
        let g1 = fix.create_group(false);
        let _g2 = fix.create_group(false);

        let (st, _) = fix.run_cmd(client_op::NUM_WINDOW_GROUPS_ALL, None, &[]);
        assert_eq!(st, 2);

        // Name a group, then find it case-insensitively.
        let name_units = karst_base::ucs2::from_utf8("Clock");
        let name_des = fix.alloc(4 + name_units.len() as u32 * 2);
        fix.mem
            .write_u32(name_des, name_units.len() as u32)
            .unwrap();
        fix.mem
            .write_bytes(name_des + 4, &karst_base::ucs2::to_bytes(&name_units))
            .unwrap();

        let buf = encode_cmd(window_op::SET_NAME, Some(g1), &[]);
        let cmd_des = fix.alloc(4 + buf.len() as u32);
        fix.mem.write_u32(cmd_des, buf.len() as u32).unwrap();
        fix.mem.write_bytes(cmd_des + 4, &buf).unwrap();
        let st = fix.send(
            ws_msg::COMMAND_BUFFER,
            IpcArgs::new()
                .des_in(0, cmd_des, DesWidth::Narrow)
                .des_in(crate::ops::REMOTE_SLOT, name_des, DesWidth::Wide),
        );
        assert_eq!(st, 0);

        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes()); // parent id
        payload.extend_from_slice(&0u32.to_le_bytes()); // offset
        payload.extend_from_slice(&5u32.to_le_bytes()); // name length
        payload.extend_from_slice(&karst_base::ucs2::to_bytes(&karst_base::ucs2::from_utf8(
            "clock",
        )));
        let (st, _) = fix.run_cmd(client_op::FIND_WINDOW_GROUP_IDENTIFIER, None, &payload);
        assert_eq!(st, g1 as i32);
    }

    #[test]
    fn unknown_object_handle_is_protocol_error() {
        let mut fix = Fix::new();
        let (st, _) = fix.run_cmd(window_op::SET_VISIBLE, Some(0x4dead), &1i32.to_le_bytes());
        assert_eq!(st, karst_base::status::BAD_HANDLE);
    }
}
