//! The graphics driver boundary.
//!
//! The window server never renders; it forwards draw work to an
//! external driver client through this trait. In some builds the driver
//! runs on a separate render thread, so every flush is bracketed by the
//! process-level driver lock.

use std::cell::RefCell;
use std::rc::Rc;

use karst_base::{Rect, Vec2};

/// A handle to the shared graphics driver client.
pub type SharedDriver = Rc<RefCell<dyn GraphicsDriver>>;

/// The drawing primitives the window server emits.
pub trait GraphicsDriver {
    /// Takes the process-level driver lock.
    fn lock_driver_from_process(&mut self);
    /// Releases the process-level driver lock.
    fn unlock_driver_from_process(&mut self);

    /// Announces the active screen size.
    fn set_screen_size(&mut self, size: Vec2);

    /// Begins an invalidation of `rect`; draw calls follow.
    fn invalidate(&mut self, rect: Rect);
    /// Ends the current invalidation.
    fn end_invalidate(&mut self);
    /// Draws text within `rect`.
    fn draw_text(&mut self, rect: Rect, text: &str);

    /// Creates a driver-side window, returning its driver id.
    fn create_window(&mut self, initial_size: Vec2, priority: u16, visible: bool) -> u32;
    /// Resizes a driver-side window.
    fn set_window_size(&mut self, win: u32, size: Vec2);
    /// Moves a driver-side window.
    fn set_window_pos(&mut self, win: u32, pos: Vec2);
    /// Shows or hides a driver-side window.
    fn set_window_visible(&mut self, win: u32, visible: bool);
    /// Restacks a driver-side window.
    fn set_window_priority(&mut self, win: u32, priority: u16);
}

/// A driver client that records calls and renders nothing.
///
/// Stands in when no host graphics back-end is attached; the test
/// suites inspect its log.
#[derive(Default)]
pub struct NullGraphicsDriver {
    /// Human-readable trace of every call, in order.
    pub log: Vec<String>,
    next_window: u32,
    lock_depth: i32,
}

impl NullGraphicsDriver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the recorder for sharing with the window server.
    pub fn shared() -> Rc<RefCell<NullGraphicsDriver>> {
        Rc::new(RefCell::new(Self::new()))
    }
}

impl GraphicsDriver for NullGraphicsDriver {
    fn lock_driver_from_process(&mut self) {
        self.lock_depth += 1;
        self.log.push("lock".into());
    }

    fn unlock_driver_from_process(&mut self) {
        self.lock_depth -= 1;
        assert!(self.lock_depth >= 0, "driver unlock without lock");
        self.log.push("unlock".into());
    }

    fn set_screen_size(&mut self, size: Vec2) {
        self.log.push(format!("screen-size {}x{}", size.x, size.y));
    }

    fn invalidate(&mut self, rect: Rect) {
        assert!(self.lock_depth > 0, "invalidate outside driver lock");
        self.log.push(format!(
            "invalidate {},{} {}x{}",
            rect.top.x, rect.top.y, rect.size.x, rect.size.y
        ));
    }

    fn end_invalidate(&mut self) {
        assert!(self.lock_depth > 0, "end-invalidate outside driver lock");
        self.log.push("end-invalidate".into());
    }

    fn draw_text(&mut self, _rect: Rect, text: &str) {
        assert!(self.lock_depth > 0, "draw outside driver lock");
        self.log.push(format!("text {text:?}"));
    }

    fn create_window(&mut self, _initial_size: Vec2, _priority: u16, _visible: bool) -> u32 {
        self.next_window += 1;
        self.log.push(format!("create-window {}", self.next_window));
        self.next_window
    }

    fn set_window_size(&mut self, win: u32, size: Vec2) {
        self.log.push(format!("win {win} size {}x{}", size.x, size.y));
    }

    fn set_window_pos(&mut self, win: u32, pos: Vec2) {
        self.log.push(format!("win {win} pos {},{}", pos.x, pos.y));
    }

    fn set_window_visible(&mut self, win: u32, visible: bool) {
        self.log.push(format!("win {win} visible {visible}"));
    }

    fn set_window_priority(&mut self, win: u32, priority: u16) {
        self.log.push(format!("win {win} priority {priority}"));
    }
}
