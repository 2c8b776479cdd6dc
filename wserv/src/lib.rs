//! The guest window server.
//!
//! A hierarchical window tree per client, screen devices configured from
//! the ROM's `wsini.ini`, graphic contexts that batch draw commands for
//! the external graphics driver, and per-client event and redraw queues
//! with asynchronous readiness notifies.

pub mod client;
pub mod config;
pub mod driver;
pub mod event;
pub mod ops;
pub mod server;
pub mod window;

pub use client::{parse_command_buffer, WindowClient, WsCommand, HANDLE_BASE};
pub use config::{parse_wsini, ScreenConfig, ScreenMode};
pub use driver::{GraphicsDriver, NullGraphicsDriver, SharedDriver};
pub use event::{Event, EventCode, RedrawEvent, RedrawQueue};
pub use server::{WindowServer, SERVER_NAME as WINDOW_SERVER_NAME};
pub use window::{ClientObject, Window, WindowFlags, WindowKind};
