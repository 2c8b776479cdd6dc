//! One window-server client per session.
//!
//! The client owns an object arena (windows, screen devices, graphic
//! contexts, plugin stubs), its event and redraw queues, and the
//! readiness notifies. Batched commands from the guest are parsed and
//! dispatched here.

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};

use karst_base::{status, ucs2, Rect, Vec2};
use karst_kernel::{IpcContext, Kernel, NotifyInfo, SessionId, ThreadId};
use karst_mem::AddressSpace;

use crate::config::ScreenConfig;
use crate::driver::SharedDriver;
use crate::event::{Event, EventCode, RedrawQueue};
use crate::ops::{
    anim_op, click_op, client_op, gc_op, screen_op, window_op, CMD_HANDLE_BIT, DISPLAY_MODE_COLOR16MA,
    REPLY_SLOT, TWIPS_MUL,
};
use crate::window::{
    AnimDll, ClickDll, ClientObject, DrawCommand, GraphicContext, ScreenDevice, Sprite, Window,
    WindowFlags, WindowKind,
};

/// Client handles start just above this base.
pub const HANDLE_BASE: u32 = 0x4000_0000;

/// One parsed batched command.
#[derive(Debug, Clone)]
pub struct WsCommand {
    /// Opcode with the handle bit stripped.
    pub op: u16,
    /// Target object, `None` for client-scope commands.
    pub handle: Option<u32>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Splits a command buffer into commands.
///
/// Stops at the first malformed header rather than guessing at
/// resynchronisation.
pub fn parse_command_buffer(buf: &[u8]) -> Vec<WsCommand> {
    let mut cmds = Vec::new();
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        let mut op = LittleEndian::read_u16(&buf[pos..]);
        let len = LittleEndian::read_u16(&buf[pos + 2..]) as usize;
        pos += 4;

        let handle = if op & CMD_HANDLE_BIT != 0 {
            op &= !CMD_HANDLE_BIT;
            if pos + 4 > buf.len() {
                warn!("command buffer truncated in handle word");
                break;
            }
            let h = LittleEndian::read_u32(&buf[pos..]);
            pos += 4;
            Some(h)
        } else {
            None
        };

        if pos + len > buf.len() {
            warn!("command buffer truncated in payload");
            break;
        }
        cmds.push(WsCommand {
            op,
            handle,
            payload: buf[pos..pos + len].to_vec(),
        });
        pos += len;
    }
    cmds
}

fn pl_i32(payload: &[u8], off: usize) -> Option<i32> {
    (payload.len() >= off + 4).then(|| LittleEndian::read_i32(&payload[off..]))
}

fn pl_u32(payload: &[u8], off: usize) -> Option<u32> {
    (payload.len() >= off + 4).then(|| LittleEndian::read_u32(&payload[off..]))
}

fn pl_text(payload: &[u8], off: usize) -> Option<String> {
    let len = pl_u32(payload, off)? as usize;
    let start = off + 4;
    if payload.len() < start + len * 2 {
        return None;
    }
    Some(ucs2::to_utf8(&ucs2::from_bytes(
        &payload[start..start + len * 2],
    )))
}

/// A window server client.
pub struct WindowClient {
    /// The session this client serves.
    pub session: SessionId,
    /// The thread that connected; reported for group queries.
    pub thread: ThreadId,
    objects: Vec<Option<ClientObject>>,
    root: u32,
    events: VecDeque<Event>,
    redraws: RedrawQueue,
    event_notify: Option<NotifyInfo>,
    redraw_notify: Option<NotifyInfo>,
    primary_device: Option<u32>,
    total_groups: u32,
    cursor_mode: u32,
    mod_notify_windows: Vec<u32>,
    error_notify_windows: Vec<u32>,
    screen_change_windows: Vec<u32>,
}

impl WindowClient {
    /// Creates a client with its synthetic root window.
    pub fn new(session: SessionId, thread: ThreadId) -> Self {
        let mut client = Self {
            session,
            thread,
            objects: Vec::new(),
            root: 0,
            events: VecDeque::new(),
            redraws: RedrawQueue::new(),
            event_notify: None,
            redraw_notify: None,
            primary_device: None,
            total_groups: 0,
            cursor_mode: 0,
            mod_notify_windows: Vec::new(),
            error_notify_windows: Vec::new(),
            screen_change_windows: Vec::new(),
        };
        let root = client.add_object(|handle| {
            ClientObject::Window(Window::new(handle, WindowKind::Root, handle))
        });
        client.root = root;
        client
    }

    /// The root window handle.
    pub fn root(&self) -> u32 {
        self.root
    }

    /// The first screen device this client created, if any.
    pub fn primary_device(&self) -> Option<u32> {
        self.primary_device
    }

    /// Total window groups created by this client.
    pub fn total_groups(&self) -> u32 {
        self.total_groups
    }

    /// Priorities of this client's live groups, for server-wide tallies.
    pub fn group_priorities(&self) -> Vec<i32> {
        self.objects
            .iter()
            .flatten()
            .filter_map(ClientObject::as_window)
            .filter(|w| w.kind == WindowKind::Group)
            .map(|w| w.priority)
            .collect()
    }

    // ── Arena ───────────────────────────────────────────────────────────

    fn add_object(&mut self, build: impl FnOnce(u32) -> ClientObject) -> u32 {
        let handle = HANDLE_BASE + self.objects.len() as u32 + 1;
        self.objects.push(Some(build(handle)));
        handle
    }

    /// Borrows an object by client handle.
    pub fn object(&mut self, handle: u32) -> Option<&mut ClientObject> {
        let idx = handle.checked_sub(HANDLE_BASE + 1)? as usize;
        self.objects.get_mut(idx)?.as_mut()
    }

    fn object_ref(&self, handle: u32) -> Option<&ClientObject> {
        let idx = handle.checked_sub(HANDLE_BASE + 1)? as usize;
        self.objects.get(idx)?.as_ref()
    }

    fn delete_object(&mut self, handle: u32) -> bool {
        match handle.checked_sub(HANDLE_BASE + 1) {
            Some(idx) if (idx as usize) < self.objects.len() => {
                self.objects[idx as usize] = None;
                true
            }
            _ => {
                warn!("object handle {handle:#x} is invalid");
                false
            }
        }
    }

    fn window(&self, handle: u32) -> Option<&Window> {
        self.object_ref(handle).and_then(ClientObject::as_window)
    }

    fn window_mut(&mut self, handle: u32) -> Option<&mut Window> {
        self.object(handle).and_then(ClientObject::as_window_mut)
    }

    /// Finds a window by handle anywhere in the tree (groups first).
    fn find_group_by_name(&self, name: &str, offset: usize) -> Option<u32> {
        self.objects
            .iter()
            .flatten()
            .filter_map(ClientObject::as_window)
            .find(|w| {
                let tail: String = w.name.chars().skip(offset).collect();
                w.kind == WindowKind::Group && ucs2::eq_ignore_case(&tail, name)
            })
            .map(|w| w.handle)
    }

    // ── Priorities ──────────────────────────────────────────────────────

    /// Composed redraw priority: the parent's priority plus this
    /// window's `(primary << 4) + secondary`, floored at the parent's
    /// value so priority never decreases down the tree.
    pub fn redraw_priority(&self, handle: u32) -> u16 {
        let Some(window) = self.window(handle) else {
            return 0;
        };
        let parent = if window.parent == handle {
            0
        } else {
            self.redraw_priority(window.parent)
        };
        let own = ((window.priority << 4) + window.secondary_priority).max(0) as u16;
        parent.saturating_add(own)
    }

    // ── Queues ──────────────────────────────────────────────────────────

    /// Queues an event and fires a pending readiness notify.
    pub fn queue_event_raw(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel, event: Event) {
        trace!("event {:?} for {:#x}", event.code, event.handle);
        self.events.push_back(event);
        if let Some(notify) = self.event_notify.take() {
            kernel.complete(mem, notify, status::NONE);
        }
    }

    /// Queues a redraw for a window and fires a pending redraw notify.
    /// Returns the redraw id.
    pub fn queue_redraw_raw(
        &mut self,
        mem: &mut AddressSpace,
        kernel: &mut Kernel,
        handle: u32,
    ) -> u32 {
        let priority = self.redraw_priority(handle);
        let Some(window) = self.window(handle) else {
            return 0;
        };
        let (pos, size) = (window.pos, window.size);
        let id = self.redraws.queue(handle, pos, pos + size, priority);
        if let Some(notify) = self.redraw_notify.take() {
            kernel.complete(mem, notify, status::NONE);
        }
        id
    }

    /// Registers the event-readiness notify, completing it immediately
    /// when events are already waiting.
    pub fn register_event_notify(&mut self, ctx: &mut IpcContext<'_>) {
        if !self.events.is_empty() {
            ctx.set_status(status::NONE);
            return;
        }
        self.event_notify = Some(ctx.defer());
    }

    /// Registers the redraw-readiness notify.
    pub fn register_redraw_notify(&mut self, ctx: &mut IpcContext<'_>) {
        if !self.redraws.is_empty() {
            ctx.set_status(status::NONE);
            return;
        }
        self.redraw_notify = Some(ctx.defer());
    }

    /// Cancels outstanding notifies (session teardown).
    pub fn cancel_notifies(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel) {
        for notify in [self.event_notify.take(), self.redraw_notify.take()]
            .into_iter()
            .flatten()
        {
            kernel.complete(mem, notify, status::CANCEL);
        }
    }

    // ── Focus ───────────────────────────────────────────────────────────

    /// Recomputes the focused group of a screen device: the first
    /// focus-receivable visible group in draw order. Emits focus-lost /
    /// focus-gained events on change.
    pub fn update_focus(
        &mut self,
        mem: &mut AddressSpace,
        kernel: &mut Kernel,
        device_handle: u32,
        closing: Option<u32>,
    ) {
        let (old, next) = {
            let Some(ClientObject::Screen(device)) = self.object_ref(device_handle) else {
                return;
            };
            let next = device.groups.iter().copied().find(|g| {
                self.window(*g).is_some_and(|w| {
                    w.flags.contains(WindowFlags::FOCUS_RECEIVABLE) && w.visible()
                })
            });
            (device.focus, next)
        };

        if old == next {
            return;
        }
        let now = kernel.timing.now();
        if let Some(old) = old {
            if Some(old) != closing {
                self.queue_event_raw(mem, kernel, Event::new(old, EventCode::FocusLost, now));
            }
        }
        if let Some(next) = next {
            self.queue_event_raw(mem, kernel, Event::new(next, EventCode::FocusGained, now));
        }
        if let Some(ClientObject::Screen(device)) = self.object(device_handle) {
            device.focus = next;
        }
    }

    // ── Command execution ───────────────────────────────────────────────

    /// Executes a whole command buffer; the last command's reply becomes
    /// the message status.
    pub fn execute_buffer(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        screens: &[ScreenConfig],
        group_tally: &[i32],
        buf: &[u8],
    ) -> i32 {
        let mut reply = status::NONE;
        for cmd in parse_command_buffer(buf) {
            reply = match cmd.handle {
                Some(handle) => self.execute_object_command(ctx, driver, handle, &cmd),
                None => self.execute_client_command(ctx, driver, screens, group_tally, &cmd),
            };
        }
        reply
    }

    fn execute_client_command(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        screens: &[ScreenConfig],
        group_tally: &[i32],
        cmd: &WsCommand,
    ) -> i32 {
        match cmd.op {
            client_op::NUM_WINDOW_GROUPS => {
                let pri = pl_i32(&cmd.payload, 0).unwrap_or(0);
                group_tally.iter().filter(|p| **p == pri).count() as i32
            }
            client_op::NUM_WINDOW_GROUPS_ALL => group_tally.len() as i32,
            client_op::SEND_EVENT_TO_WINDOW_GROUP => {
                let Some(code) = pl_u32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                let handle = pl_u32(&cmd.payload, 4).unwrap_or(0);
                let code = match code {
                    0 => EventCode::FocusGained,
                    1 => EventCode::FocusLost,
                    2 => EventCode::Pointer,
                    3 => EventCode::Key,
                    4 => EventCode::ModifierChange,
                    5 => EventCode::ScreenChange,
                    _ => EventCode::ErrorMessage,
                };
                let now = ctx.kernel.timing.now();
                self.queue_event_raw(ctx.mem, ctx.kernel, Event::new(handle, code, now));
                status::NONE
            }
            client_op::COMPUTE_MODE => {
                trace!("compute mode ignored");
                status::NONE
            }
            client_op::SET_POINTER_CURSOR_MODE => {
                let owns_focus = self
                    .primary_device
                    .and_then(|d| match self.object_ref(d) {
                        Some(ClientObject::Screen(s)) => s.focus,
                        _ => None,
                    })
                    .is_some();
                if !owns_focus {
                    return status::PERMISSION_DENIED;
                }
                self.cursor_mode = pl_u32(&cmd.payload, 0).unwrap_or(0);
                status::NONE
            }
            client_op::GET_WINDOW_GROUP_CLIENT_THREAD_ID => {
                let Some(group) = pl_u32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                if self.window(group).map(|w| w.kind) != Some(WindowKind::Group) {
                    return status::ARGUMENT;
                }
                let mut pkg = [0u8; 4];
                LittleEndian::write_u32(&mut pkg, self.thread.0 as u32);
                ctx.write_pkg(REPLY_SLOT, &pkg)
            }
            client_op::GET_REDRAW => match self.redraws.pop() {
                Some(event) => {
                    if let Some(window) = self.window_mut(event.handle) {
                        if window.redraw_evt_id == event.id {
                            window.redraw_evt_id = 0;
                        }
                    }
                    let wrote = ctx.write_pkg(REPLY_SLOT, &event.encode());
                    if wrote != status::NONE {
                        return wrote;
                    }
                    status::NONE
                }
                None => status::NOT_FOUND,
            },
            client_op::GET_EVENT => match self.events.pop_front() {
                Some(event) => {
                    let wrote = ctx.write_pkg(REPLY_SLOT, &event.encode());
                    if wrote != status::NONE {
                        return wrote;
                    }
                    status::NONE
                }
                None => status::NOT_FOUND,
            },
            client_op::CREATE_SCREEN_DEVICE => {
                let number = pl_i32(&cmd.payload, 0).unwrap_or(0);
                let config = screens
                    .iter()
                    .find(|s| s.screen_number == number)
                    .cloned()
                    .unwrap_or_else(|| {
                        warn!("no configuration for screen {number}");
                        crate::config::default_screens().remove(0)
                    });
                let handle = self.add_object(|handle| {
                    ClientObject::Screen(ScreenDevice {
                        handle,
                        screen_number: number,
                        current_mode: 0,
                        config,
                        groups: Vec::new(),
                        focus: None,
                    })
                });
                if self.primary_device.is_none() {
                    self.primary_device = Some(handle);
                }
                if let Some(ClientObject::Screen(device)) = self.object_ref(handle) {
                    driver.borrow_mut().set_screen_size(device.mode().size);
                }
                handle as i32
            }
            client_op::CREATE_WINDOW_GROUP => {
                let parent_id = pl_u32(&cmd.payload, 0).unwrap_or(0);
                let focus = pl_u32(&cmd.payload, 4).unwrap_or(0) != 0;
                let device_handle = pl_u32(&cmd.payload, 8).unwrap_or(0);

                let parent = if self.window(parent_id).is_some() {
                    parent_id
                } else {
                    if parent_id != 0 {
                        warn!("parent {parent_id:#x} for new group not found, using root");
                    }
                    self.root
                };
                let device = if self.window(device_handle).is_none()
                    && matches!(self.object_ref(device_handle), Some(ClientObject::Screen(_)))
                {
                    Some(device_handle)
                } else {
                    self.primary_device
                };

                let handle = self.add_object(|handle| {
                    let mut group = Window::new(handle, WindowKind::Group, parent);
                    group.device = device;
                    if focus {
                        group.flags |= WindowFlags::FOCUS_RECEIVABLE;
                    }
                    ClientObject::Window(group)
                });
                if let Some(parent_win) = self.window_mut(parent) {
                    parent_win.children.push(handle);
                }
                if let Some(device) = device {
                    if let Some(ClientObject::Screen(dev)) = self.object(device) {
                        // New groups stack on top.
                        dev.groups.insert(0, handle);
                    }
                    self.update_focus(ctx.mem, ctx.kernel, device, None);
                }
                self.total_groups += 1;
                handle as i32
            }
            client_op::CREATE_WINDOW => {
                let parent_id = pl_u32(&cmd.payload, 0).unwrap_or(0);
                let Some(parent) = self.window(parent_id).map(|w| w.kind) else {
                    warn!("parent {parent_id:#x} for new window not found");
                    return status::ARGUMENT;
                };
                if parent != WindowKind::Group {
                    warn!("user windows must parent to a group");
                    return status::ARGUMENT;
                }
                let device = self.window(parent_id).and_then(|w| w.device);
                let driver_win_id =
                    driver
                        .borrow_mut()
                        .create_window(Vec2::new(200, 200), 0, true);

                let handle = self.add_object(|handle| {
                    let mut win = Window::new(handle, WindowKind::User, parent_id);
                    win.device = device;
                    win.driver_win_id = driver_win_id;
                    ClientObject::Window(win)
                });
                if let Some(parent_win) = self.window_mut(parent_id) {
                    parent_win.children.push(handle);
                }
                handle as i32
            }
            client_op::CREATE_GC => {
                let handle = self.add_object(|handle| {
                    ClientObject::Gc(GraphicContext {
                        handle,
                        ..Default::default()
                    })
                });
                handle as i32
            }
            client_op::CREATE_SPRITE => {
                let window = pl_u32(&cmd.payload, 0).unwrap_or(0);
                let window = if self.window(window).is_some() {
                    window
                } else {
                    warn!("sprite window handle invalid, using root");
                    self.root
                };
                let pos = Vec2::new(
                    pl_i32(&cmd.payload, 4).unwrap_or(0),
                    pl_i32(&cmd.payload, 8).unwrap_or(0),
                );
                let handle = self.add_object(|handle| {
                    ClientObject::Sprite(Sprite {
                        handle,
                        window,
                        position: pos,
                    })
                });
                handle as i32
            }
            client_op::CREATE_ANIM_DLL => {
                if let Some(name) = pl_text(&cmd.payload, 0) {
                    trace!("anim dll {name:?} stubbed");
                }
                let handle =
                    self.add_object(|_| ClientObject::AnimDll(AnimDll::default()));
                handle as i32
            }
            client_op::CREATE_CLICK => {
                trace!("click plugin stubbed");
                let handle =
                    self.add_object(|_| ClientObject::ClickDll(ClickDll::default()));
                handle as i32
            }
            client_op::RESTORE_DEFAULT_HOTKEY => {
                warn!("restore default hotkey ignored");
                status::NONE
            }
            client_op::GET_FOCUS_WINDOW_GROUP => {
                let device = if cmd.payload.len() >= 4 {
                    let number = pl_i32(&cmd.payload, 0).unwrap_or(0);
                    self.objects.iter().flatten().find_map(|o| match o {
                        ClientObject::Screen(s) if s.screen_number == number => Some(s.handle),
                        _ => None,
                    })
                } else {
                    self.primary_device
                };
                let Some(device) = device else {
                    return status::ARGUMENT;
                };
                match self.object_ref(device) {
                    Some(ClientObject::Screen(s)) => {
                        s.focus.map(|f| f as i32).unwrap_or(status::NOT_FOUND)
                    }
                    _ => status::ARGUMENT,
                }
            }
            client_op::FIND_WINDOW_GROUP_IDENTIFIER => {
                let offset = pl_u32(&cmd.payload, 4).unwrap_or(0) as usize;
                let Some(name) = pl_text(&cmd.payload, 8) else {
                    return status::ARGUMENT;
                };
                match self.find_group_by_name(&name, offset) {
                    Some(handle) => handle as i32,
                    None => status::NOT_FOUND,
                }
            }
            client_op::GET_WINDOW_GROUP_NAME_FROM_IDENTIFIER => {
                let Some(id) = pl_u32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                let max_len = pl_u32(&cmd.payload, 4).unwrap_or(u32::MAX) as usize;
                let Some(window) = self.window(id) else {
                    return status::ARGUMENT;
                };
                if window.kind != WindowKind::Group {
                    return status::ARGUMENT;
                }
                if window.name.is_empty() {
                    return status::NOT_READY;
                }
                let name: String = window.name.chars().take(max_len).collect();
                let wrote = ctx.write_str(REPLY_SLOT, &name);
                if wrote != status::NONE {
                    return wrote;
                }
                status::NONE
            }
            client_op::WINDOW_GROUP_LIST_AND_CHAIN => {
                let ids: Vec<u8> = self
                    .objects
                    .iter()
                    .flatten()
                    .filter_map(ClientObject::as_window)
                    .filter(|w| w.kind == WindowKind::Group)
                    .flat_map(|w| w.handle.to_le_bytes())
                    .collect();
                let wrote = ctx.write_pkg(REPLY_SLOT, &ids);
                if wrote != status::NONE {
                    return wrote;
                }
                status::NONE
            }
            other => {
                warn!("unimplemented client opcode {other:#06x}");
                status::NOT_SUPPORTED
            }
        }
    }

    fn execute_object_command(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        handle: u32,
        cmd: &WsCommand,
    ) -> i32 {
        match self.object_ref(handle) {
            Some(ClientObject::Window(_)) => self.window_command(ctx, driver, handle, cmd),
            Some(ClientObject::Screen(_)) => self.screen_command(ctx, driver, handle, cmd),
            Some(ClientObject::Gc(_)) => self.gc_command(ctx, driver, handle, cmd),
            Some(ClientObject::Sprite(_)) => {
                trace!("sprite opcode {:#06x} ignored", cmd.op);
                status::NONE
            }
            Some(ClientObject::AnimDll(_)) => self.anim_command(handle, cmd),
            Some(ClientObject::ClickDll(_)) => self.click_command(handle, cmd),
            None => {
                warn!("command for dead handle {handle:#x}");
                status::BAD_HANDLE
            }
        }
    }

    fn window_command(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        handle: u32,
        cmd: &WsCommand,
    ) -> i32 {
        match cmd.op {
            window_op::SET_EXTENT => {
                let (Some(x), Some(y), Some(w), Some(h)) = (
                    pl_i32(&cmd.payload, 0),
                    pl_i32(&cmd.payload, 4),
                    pl_i32(&cmd.payload, 8),
                    pl_i32(&cmd.payload, 12),
                ) else {
                    return status::ARGUMENT;
                };
                let driver_id = {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.pos = Vec2::new(x, y);
                    window.size = Vec2::new(w, h);
                    window.driver_win_id
                };
                if driver_id != 0 {
                    let mut drv = driver.borrow_mut();
                    drv.set_window_size(driver_id, Vec2::new(w, h));
                    drv.set_window_pos(driver_id, Vec2::new(x, y));
                }
                status::NONE
            }
            window_op::SET_VISIBLE => {
                let visible = pl_i32(&cmd.payload, 0).unwrap_or(0) != 0;
                let driver_id = {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.flags.set(WindowFlags::VISIBLE, visible);
                    window.driver_win_id
                };
                if driver_id != 0 {
                    driver.borrow_mut().set_window_visible(driver_id, visible);
                }
                status::NONE
            }
            window_op::SET_SHADOW_HEIGHT => {
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.shadow_height = pl_i32(&cmd.payload, 0).unwrap_or(0);
                status::NONE
            }
            window_op::SHADOW_DISABLED => {
                let disabled = pl_i32(&cmd.payload, 0).unwrap_or(0) != 0;
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.flags.set(WindowFlags::SHADOW_DISABLED, disabled);
                status::NONE
            }
            window_op::SET_BACKGROUND_COLOR => {
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.clear_color = pl_i32(&cmd.payload, 0).unwrap_or(-1);
                status::NONE
            }
            window_op::POINTER_FILTER => {
                let (Some(mask), Some(flags)) =
                    (pl_u32(&cmd.payload, 0), pl_u32(&cmd.payload, 4))
                else {
                    return status::ARGUMENT;
                };
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.pointer_filter = (window.pointer_filter & !mask) | flags;
                status::NONE
            }
            window_op::SET_POINTER_GRAB => {
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.allow_pointer_grab = pl_i32(&cmd.payload, 0).unwrap_or(0) != 0;
                status::NONE
            }
            window_op::ACTIVATE => {
                {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.flags |= WindowFlags::ACTIVE;
                }
                // Activation exposes the whole window; schedule a redraw.
                let id = self.queue_redraw_raw(ctx.mem, ctx.kernel, handle);
                if let Some(window) = self.window_mut(handle) {
                    window.redraw_evt_id = id;
                }
                status::NONE
            }
            window_op::INVALIDATE => {
                let rect = Rect::from_corners(
                    Vec2::new(
                        pl_i32(&cmd.payload, 0).unwrap_or(0),
                        pl_i32(&cmd.payload, 4).unwrap_or(0),
                    ),
                    Vec2::new(
                        pl_i32(&cmd.payload, 8).unwrap_or(0),
                        pl_i32(&cmd.payload, 12).unwrap_or(0),
                    ),
                );
                {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.invalid_rect = rect;
                }
                let id = self.queue_redraw_raw(ctx.mem, ctx.kernel, handle);
                if let Some(window) = self.window_mut(handle) {
                    window.redraw_evt_id = id;
                }
                status::NONE
            }
            window_op::BEGIN_REDRAW => {
                let pending = {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    let pending = window.redraw_evt_id;
                    window.redraw_evt_id = 0;
                    pending
                };
                // An explicit redraw supersedes the queued event.
                if pending != 0 {
                    self.redraws.dequeue(pending);
                }
                let contexts = self
                    .window(handle)
                    .map(|w| w.attached_contexts.clone())
                    .unwrap_or_default();
                for gc in contexts {
                    if let Some(ClientObject::Gc(gc)) = self.object(gc) {
                        gc.recording = true;
                        gc.draw_queue.clear();
                    }
                }
                status::NONE
            }
            window_op::END_REDRAW => {
                let contexts = self
                    .window(handle)
                    .map(|w| w.attached_contexts.clone())
                    .unwrap_or_default();
                for gc in contexts {
                    if let Some(ClientObject::Gc(gc_obj)) = self.object(gc) {
                        gc_obj.recording = false;
                    }
                    self.flush_context(driver, gc);
                }
                status::NONE
            }
            window_op::SET_ORDINAL_POSITION => {
                let Some(priority) = pl_i32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.priority = priority;
                }
                self.priority_updated(driver, handle);
                status::NONE
            }
            window_op::SET_ORDINAL_POSITION_PRI => {
                let (Some(pri), Some(pri2)) =
                    (pl_i32(&cmd.payload, 0), pl_i32(&cmd.payload, 4))
                else {
                    return status::ARGUMENT;
                };
                {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.priority = pri;
                    window.secondary_priority = pri2;
                }
                self.priority_updated(driver, handle);
                status::NONE
            }
            window_op::IDENTIFIER => handle as i32,
            window_op::ENABLE_MODIFIER_CHANGED_EVENTS => {
                if !self.mod_notify_windows.contains(&handle) {
                    self.mod_notify_windows.push(handle);
                }
                status::NONE
            }
            window_op::ENABLE_ERROR_MESSAGES => {
                if !self.error_notify_windows.contains(&handle) {
                    self.error_notify_windows.push(handle);
                }
                status::NONE
            }
            window_op::ENABLE_SCREEN_CHANGE_EVENTS => {
                if !self.screen_change_windows.contains(&handle) {
                    self.screen_change_windows.push(handle);
                }
                status::NONE
            }
            window_op::SET_NAME => {
                let Some(name) = ctx.get_str(crate::ops::REMOTE_SLOT) else {
                    return status::ARGUMENT;
                };
                let Some(window) = self.window_mut(handle) else {
                    return status::BAD_HANDLE;
                };
                window.name = name;
                status::NONE
            }
            window_op::RECEIVE_FOCUS => {
                let enable = pl_i32(&cmd.payload, 0).unwrap_or(0) != 0;
                let device = {
                    let Some(window) = self.window_mut(handle) else {
                        return status::BAD_HANDLE;
                    };
                    window.flags.set(WindowFlags::FOCUS_RECEIVABLE, enable);
                    trace!(
                        "group {:?} keyboard focus {}",
                        window.name,
                        if enable { "enabled" } else { "disabled" }
                    );
                    window.device
                };
                if let Some(device) = device {
                    self.update_focus(ctx.mem, ctx.kernel, device, None);
                }
                status::NONE
            }
            window_op::SET_TEXT_CURSOR => {
                let (Some(target), Some(x), Some(y)) = (
                    pl_u32(&cmd.payload, 0),
                    pl_i32(&cmd.payload, 4),
                    pl_i32(&cmd.payload, 8),
                ) else {
                    return status::ARGUMENT;
                };
                let is_child = self
                    .window(handle)
                    .is_some_and(|w| w.children.contains(&target));
                if !is_child {
                    return status::NOT_FOUND;
                }
                let Some(child) = self.window_mut(target) else {
                    return status::NOT_FOUND;
                };
                child.cursor_pos = Vec2::new(x, y) + child.pos;
                status::NONE
            }
            window_op::ORDINAL_POSITION => self
                .window(handle)
                .map(|w| w.priority)
                .unwrap_or(status::BAD_HANDLE),
            window_op::ORDINAL_PRIORITY => self
                .window(handle)
                .map(|w| w.secondary_priority)
                .unwrap_or(status::BAD_HANDLE),
            window_op::ENABLE_ON_EVENTS => {
                trace!("window on/off events unsupported");
                status::NONE
            }
            other => {
                warn!("unimplemented window opcode {other:#06x}");
                status::NOT_SUPPORTED
            }
        }
    }

    /// Re-announces composed priorities for a window subtree to the
    /// driver.
    fn priority_updated(&mut self, driver: &SharedDriver, handle: u32) {
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let Some(window) = self.window(current) else {
                continue;
            };
            stack.extend(window.children.iter().copied());
            if window.kind == WindowKind::User && window.driver_win_id != 0 {
                let priority = self.redraw_priority(current);
                driver
                    .borrow_mut()
                    .set_window_priority(window.driver_win_id, priority);
            }
        }
    }

    fn screen_command(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        handle: u32,
        cmd: &WsCommand,
    ) -> i32 {
        let Some(ClientObject::Screen(device)) = self.object(handle) else {
            return status::BAD_HANDLE;
        };
        match cmd.op {
            screen_op::PIXEL_SIZE => {
                let size = device.mode().size;
                let mut pkg = [0u8; 8];
                LittleEndian::write_i32(&mut pkg[0..4], size.x);
                LittleEndian::write_i32(&mut pkg[4..8], size.y);
                let wrote = ctx.write_pkg(REPLY_SLOT, &pkg);
                if wrote != status::NONE {
                    return wrote;
                }
                0
            }
            screen_op::TWIPS_SIZE => {
                let size = device.mode().size * TWIPS_MUL;
                let mut pkg = [0u8; 8];
                LittleEndian::write_i32(&mut pkg[0..4], size.x);
                LittleEndian::write_i32(&mut pkg[4..8], size.y);
                let wrote = ctx.write_pkg(REPLY_SLOT, &pkg);
                if wrote != status::NONE {
                    return wrote;
                }
                0
            }
            screen_op::GET_NUM_SCREEN_MODES => device.config.modes.len() as i32,
            screen_op::GET_SCREEN_MODE => device.mode().mode_number,
            screen_op::SET_SCREEN_MODE => {
                trace!("set screen mode stubbed");
                status::NONE
            }
            screen_op::SET_SCREEN_SIZE_AND_ROTATION => {
                let (Some(w), Some(h)) = (pl_i32(&cmd.payload, 0), pl_i32(&cmd.payload, 4)) else {
                    return status::ARGUMENT;
                };
                // Payload carries pixel size, twips size, then the
                // orientation ordinal.
                let orientation = pl_i32(&cmd.payload, 16).unwrap_or(0);
                let rotation = orientation_to_degrees(orientation);
                let found = device
                    .config
                    .modes
                    .iter()
                    .position(|m| m.size == Vec2::new(w, h) && m.rotation == rotation);
                match found {
                    Some(idx) => {
                        device.current_mode = idx;
                        let size = device.mode().size;
                        driver.borrow_mut().set_screen_size(size);
                        status::NONE
                    }
                    None => {
                        warn!("no screen mode {w}x{h} rot {rotation}");
                        status::NOT_SUPPORTED
                    }
                }
            }
            screen_op::GET_SCREEN_SIZE_MODE_LIST => {
                let modes: Vec<u8> = device
                    .config
                    .modes
                    .iter()
                    .flat_map(|m| m.mode_number.to_le_bytes())
                    .collect();
                let count = device.config.modes.len() as i32;
                let wrote = ctx.write_pkg(REPLY_SLOT, &modes);
                if wrote != status::NONE {
                    return wrote;
                }
                count
            }
            screen_op::GET_SCREEN_MODE_SIZE_AND_ROTATION => {
                let Some(mode) = pl_i32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                let Some(mode) = device.config.modes.iter().find(|m| m.mode_number == mode)
                else {
                    return status::ARGUMENT;
                };
                let mut pkg = [0u8; 20];
                LittleEndian::write_i32(&mut pkg[0..4], mode.size.x);
                LittleEndian::write_i32(&mut pkg[4..8], mode.size.y);
                LittleEndian::write_i32(&mut pkg[8..12], mode.size.x * TWIPS_MUL);
                LittleEndian::write_i32(&mut pkg[12..16], mode.size.y * TWIPS_MUL);
                LittleEndian::write_i32(&mut pkg[16..20], degrees_to_orientation(mode.rotation));
                let wrote = ctx.write_pkg(REPLY_SLOT, &pkg);
                if wrote != status::NONE {
                    return wrote;
                }
                0
            }
            screen_op::GET_SCREEN_MODE_SIZE_AND_ROTATION2 => {
                let Some(mode) = pl_i32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                let Some(mode) = device.config.modes.iter().find(|m| m.mode_number == mode)
                else {
                    return status::ARGUMENT;
                };
                let mut pkg = [0u8; 12];
                LittleEndian::write_i32(&mut pkg[0..4], mode.size.x);
                LittleEndian::write_i32(&mut pkg[4..8], mode.size.y);
                LittleEndian::write_i32(&mut pkg[8..12], degrees_to_orientation(mode.rotation));
                let wrote = ctx.write_pkg(REPLY_SLOT, &pkg);
                if wrote != status::NONE {
                    return wrote;
                }
                0
            }
            screen_op::GET_SCREEN_MODE_DISPLAY_MODE => {
                let mut pkg = [0u8; 4];
                LittleEndian::write_u32(&mut pkg, DISPLAY_MODE_COLOR16MA);
                let wrote = ctx.write_pkg(REPLY_SLOT, &pkg);
                if wrote != status::NONE {
                    return wrote;
                }
                status::NONE
            }
            screen_op::FREE => {
                // Detach windows that referenced this device.
                let dead = handle;
                for obj in self.objects.iter_mut().flatten() {
                    if let ClientObject::Window(w) = obj {
                        if w.device == Some(dead) {
                            w.device = None;
                        }
                    }
                }
                if self.primary_device == Some(dead) {
                    self.primary_device = None;
                }
                self.delete_object(dead);
                status::NONE
            }
            other => {
                warn!("unimplemented screen device opcode {other:#06x}");
                status::NOT_SUPPORTED
            }
        }
    }

    fn gc_command(
        &mut self,
        ctx: &mut IpcContext<'_>,
        driver: &SharedDriver,
        handle: u32,
        cmd: &WsCommand,
    ) -> i32 {
        match cmd.op {
            gc_op::ACTIVATE => {
                let Some(target) = pl_u32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                if self.window(target).map(|w| w.kind) != Some(WindowKind::User) {
                    return status::ARGUMENT;
                }
                if let Some(ClientObject::Gc(gc)) = self.object(handle) {
                    gc.attached = Some(target);
                }
                let device = {
                    let window = self.window_mut(target).expect("checked above");
                    if !window.attached_contexts.contains(&handle) {
                        window.attached_contexts.push(handle);
                    }
                    window.device
                };
                device.map(|d| d as i32).unwrap_or(0)
            }
            gc_op::DEACTIVATE => {
                let attached = match self.object(handle) {
                    Some(ClientObject::Gc(gc)) => gc.attached.take(),
                    _ => return status::BAD_HANDLE,
                };
                if let Some(window) = attached.and_then(|w| self.window_mut(w)) {
                    window.attached_contexts.retain(|c| *c != handle);
                }
                status::NONE
            }
            gc_op::SET_BRUSH_COLOR => {
                let Some(color) = pl_i32(&cmd.payload, 0) else {
                    return status::ARGUMENT;
                };
                if let Some(ClientObject::Gc(gc)) = self.object(handle) {
                    gc.draw_queue.push(DrawCommand::SetBrushColor(color));
                }
                status::NONE
            }
            gc_op::SET_BRUSH_STYLE | gc_op::SET_PEN_COLOR | gc_op::SET_PEN_STYLE => {
                trace!("pen/brush style opcode {:#06x} stubbed", cmd.op);
                status::NONE
            }
            gc_op::DRAW_TEXT => {
                let (Some(x), Some(y), Some(text)) = (
                    pl_i32(&cmd.payload, 0),
                    pl_i32(&cmd.payload, 4),
                    pl_text(&cmd.payload, 8),
                ) else {
                    return status::ARGUMENT;
                };
                self.queue_draw_text(
                    handle,
                    Rect::new(Vec2::new(x, y), Vec2::new(-1, -1)),
                    text,
                );
                status::NONE
            }
            gc_op::DRAW_TEXT_VERTICAL | gc_op::DRAW_BOX_TEXT => {
                let (Some(x), Some(y), Some(bx), Some(by), Some(text)) = (
                    pl_i32(&cmd.payload, 0),
                    pl_i32(&cmd.payload, 4),
                    pl_i32(&cmd.payload, 8),
                    pl_i32(&cmd.payload, 12),
                    pl_text(&cmd.payload, 16),
                ) else {
                    return status::ARGUMENT;
                };
                self.queue_draw_text(
                    handle,
                    Rect::from_corners(Vec2::new(x, y), Vec2::new(bx, by)),
                    text,
                );
                status::NONE
            }
            other => {
                warn!("unimplemented graphics context opcode {other:#06x}");
                let _ = ctx;
                let _ = driver;
                status::NOT_SUPPORTED
            }
        }
    }

    fn queue_draw_text(&mut self, gc: u32, rect: Rect, text: String) {
        if let Some(ClientObject::Gc(gc)) = self.object(gc) {
            gc.draw_queue.push(DrawCommand::DrawText(rect, text));
        }
    }

    /// Flushes one context's draw queue to the driver under the driver
    /// lock, bracketed by the window's invalidation.
    fn flush_context(&mut self, driver: &SharedDriver, gc_handle: u32) {
        let (attached, queue) = match self.object(gc_handle) {
            Some(ClientObject::Gc(gc)) => (gc.attached, std::mem::take(&mut gc.draw_queue)),
            _ => return,
        };
        let Some(window_handle) = attached else {
            return;
        };
        let (window_pos, invalid_rect) = {
            let Some(window) = self.window_mut(window_handle) else {
                return;
            };
            let rect = window.invalid_rect;
            window.invalid_rect = Rect::default();
            (window.pos, rect)
        };

        let mut drv = driver.borrow_mut();
        drv.lock_driver_from_process();
        drv.invalidate(invalid_rect);
        for command in queue {
            match command {
                DrawCommand::DrawText(rect, text) => {
                    let screen_rect = Rect::new(rect.top + window_pos, rect.size);
                    drv.draw_text(screen_rect, &text);
                }
                DrawCommand::SetBrushColor(_) => {
                    // The driver interface has no brush state; colour
                    // changes only matter to shape fills, which the
                    // driver does not expose yet.
                }
            }
        }
        drv.end_invalidate();
        drv.unlock_driver_from_process();
    }

    fn anim_command(&mut self, handle: u32, cmd: &WsCommand) -> i32 {
        let Some(ClientObject::AnimDll(anim)) = self.object(handle) else {
            return status::BAD_HANDLE;
        };
        match cmd.op {
            anim_op::CREATE_INSTANCE => {
                trace!("anim dll instance stubbed");
                anim.users += 1;
                anim.users - 1
            }
            anim_op::COMMAND_REPLY => status::NONE,
            other => {
                warn!("unimplemented anim dll opcode {other:#06x}");
                status::NOT_SUPPORTED
            }
        }
    }

    fn click_command(&mut self, handle: u32, cmd: &WsCommand) -> i32 {
        let Some(ClientObject::ClickDll(click)) = self.object(handle) else {
            return status::BAD_HANDLE;
        };
        match cmd.op {
            click_op::IS_LOADED => {
                if click.loaded {
                    0
                } else {
                    1
                }
            }
            click_op::LOAD => {
                if let Some(name) = pl_text(&cmd.payload, 0) {
                    trace!("click plugin {name:?} load stubbed");
                }
                click.loaded = true;
                status::NONE
            }
            click_op::COMMAND_REPLY => status::NONE,
            other => {
                warn!("unimplemented click plugin opcode {other:#06x}");
                status::NOT_SUPPORTED
            }
        }
    }
}
