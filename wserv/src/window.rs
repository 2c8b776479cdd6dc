//! Client-side window objects.
//!
//! Every object a client creates lives in its object arena, addressed
//! by a dense client-scoped handle. Parent/child/sibling relations are
//! handle fields, never references; traversal goes through the arena.

use bitflags::bitflags;

use karst_base::{Rect, Vec2};

use crate::config::ScreenConfig;

/// What kind of window node this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// The synthetic per-client root.
    Root,
    /// A focusable top-level group.
    Group,
    /// A drawable user window.
    User,
}

bitflags! {
    /// Window state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u32 {
        /// Window contents are shown.
        const VISIBLE = 0b0001;
        /// Group may receive keyboard focus.
        const FOCUS_RECEIVABLE = 0b0010;
        /// Window has been activated.
        const ACTIVE = 0b0100;
        /// Drop shadow suppressed.
        const SHADOW_DISABLED = 0b1000;
    }
}

/// A window-tree node (root, group or user window).
#[derive(Debug)]
pub struct Window {
    /// This window's client handle.
    pub handle: u32,
    /// Node kind.
    pub kind: WindowKind,
    /// Parent handle; the root is its own parent.
    pub parent: u32,
    /// Child handles in creation order.
    pub children: Vec<u32>,
    /// Primary ordinal priority.
    pub priority: i32,
    /// Secondary ordinal priority.
    pub secondary_priority: i32,
    /// State bits.
    pub flags: WindowFlags,
    /// Group name, searchable by other clients.
    pub name: String,
    /// Screen device the window presents on (groups and users).
    pub device: Option<u32>,
    /// Position on screen.
    pub pos: Vec2,
    /// Size in pixels.
    pub size: Vec2,
    /// Text cursor position, `(-1, -1)` when unset.
    pub cursor_pos: Vec2,
    /// Background colour; -1 means none.
    pub clear_color: i32,
    /// Pointer event filter bits.
    pub pointer_filter: u32,
    /// Pointer grab enabled.
    pub allow_pointer_grab: bool,
    /// Shadow height in pixels.
    pub shadow_height: i32,
    /// Driver-side window id (user windows).
    pub driver_win_id: u32,
    /// Pending redraw event id, 0 when none.
    pub redraw_evt_id: u32,
    /// Accumulated invalid region.
    pub invalid_rect: Rect,
    /// Graphic contexts currently activated on this window.
    pub attached_contexts: Vec<u32>,
}

impl Window {
    /// Creates a bare node of the given kind.
    pub fn new(handle: u32, kind: WindowKind, parent: u32) -> Self {
        Self {
            handle,
            kind,
            parent,
            children: Vec::new(),
            priority: 0,
            secondary_priority: 0,
            flags: WindowFlags::VISIBLE,
            name: String::new(),
            device: None,
            pos: Vec2::default(),
            size: Vec2::default(),
            cursor_pos: Vec2::new(-1, -1),
            clear_color: -1,
            pointer_filter: 0,
            allow_pointer_grab: false,
            shadow_height: 0,
            driver_win_id: 0,
            redraw_evt_id: 0,
            invalid_rect: Rect::default(),
            attached_contexts: Vec::new(),
        }
    }

    /// True when the window is visible.
    pub fn visible(&self) -> bool {
        self.flags.contains(WindowFlags::VISIBLE)
    }
}

/// A screen device object: mode list plus the focus pointer.
#[derive(Debug)]
pub struct ScreenDevice {
    /// This device's client handle.
    pub handle: u32,
    /// 0-based screen number.
    pub screen_number: i32,
    /// Modes from the ROM configuration.
    pub config: ScreenConfig,
    /// Index of the active mode in `config.modes`.
    pub current_mode: usize,
    /// Group handles in draw order, top-most first.
    pub groups: Vec<u32>,
    /// The focused group, if any.
    pub focus: Option<u32>,
}

impl ScreenDevice {
    /// The active display mode.
    pub fn mode(&self) -> &crate::config::ScreenMode {
        &self.config.modes[self.current_mode]
    }
}

/// A recorded drawing operation, queued until `EndRedraw` flushes it.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    /// Fill colour for subsequent shapes.
    SetBrushColor(i32),
    /// Text within a rectangle (window-relative).
    DrawText(Rect, String),
}

/// A graphic context; binds to one user window at a time.
#[derive(Debug, Default)]
pub struct GraphicContext {
    /// This context's client handle.
    pub handle: u32,
    /// The user window the context draws to.
    pub attached: Option<u32>,
    /// True between `BeginRedraw` and `EndRedraw`.
    pub recording: bool,
    /// Commands waiting for the flush.
    pub draw_queue: Vec<DrawCommand>,
}

/// A sprite anchored to a window.
#[derive(Debug)]
pub struct Sprite {
    /// This sprite's client handle.
    pub handle: u32,
    /// Window the sprite is attached to.
    pub window: u32,
    /// Base position.
    pub position: Vec2,
}

/// A stub animation-DLL host object.
#[derive(Debug, Default)]
pub struct AnimDll {
    /// Instances handed out so far.
    pub users: i32,
}

/// A stub key-click plugin object.
#[derive(Debug, Default)]
pub struct ClickDll {
    /// Whether a plugin DLL is nominally loaded.
    pub loaded: bool,
}

/// Any object reachable through a client handle.
pub enum ClientObject {
    /// A window-tree node.
    Window(Window),
    /// A screen device.
    Screen(ScreenDevice),
    /// A graphic context.
    Gc(GraphicContext),
    /// A sprite.
    Sprite(Sprite),
    /// An animation DLL host.
    AnimDll(AnimDll),
    /// A key-click plugin.
    ClickDll(ClickDll),
}

impl ClientObject {
    /// Borrows the window node, if this is one.
    pub fn as_window(&self) -> Option<&Window> {
        match self {
            ClientObject::Window(w) => Some(w),
            _ => None,
        }
    }

    /// Mutably borrows the window node, if this is one.
    pub fn as_window_mut(&mut self) -> Option<&mut Window> {
        match self {
            ClientObject::Window(w) => Some(w),
            _ => None,
        }
    }
}
