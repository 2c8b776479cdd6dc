//! Window server wire constants.
//!
//! A window server message is either a connection-level request (init,
//! command buffer) or an asynchronous readiness request. Command buffers
//! carry batched commands `{opcode:u16, len:u16, [handle:u32], payload}`;
//! bit 15 of the opcode marks the presence of the object handle, and the
//! opcode namespaces below are per object kind.

/// Message-level function codes.
pub mod ws_msg {
    #![allow(missing_docs)]

    pub const INIT: u16 = 0x00;
    pub const COMMAND_BUFFER: u16 = 0x01;
    pub const SYNC_MSG_BUF: u16 = 0x02;
    /// Asynchronous: completes when an event is queued.
    pub const EVENT_READY: u16 = 0x03;
    /// Asynchronous: completes when a redraw is queued.
    pub const REDRAW_READY: u16 = 0x04;
}

/// Bit 15 of a command opcode: an object handle follows the header.
pub const CMD_HANDLE_BIT: u16 = 0x8000;

/// Argument slot carrying the command buffer.
pub const CMD_SLOT: usize = 0;
/// Argument slot replies are written to.
pub const REPLY_SLOT: usize = 1;
/// Argument slot carrying out-of-band descriptor payloads (e.g. group
/// names too long for the command buffer).
pub const REMOTE_SLOT: usize = 2;

/// Client-scope command opcodes.
pub mod client_op {
    #![allow(missing_docs)]

    pub const NUM_WINDOW_GROUPS: u16 = 0x00;
    pub const NUM_WINDOW_GROUPS_ALL: u16 = 0x01;
    pub const SEND_EVENT_TO_WINDOW_GROUP: u16 = 0x02;
    pub const COMPUTE_MODE: u16 = 0x03;
    pub const SET_POINTER_CURSOR_MODE: u16 = 0x04;
    pub const GET_WINDOW_GROUP_CLIENT_THREAD_ID: u16 = 0x05;
    pub const GET_REDRAW: u16 = 0x06;
    pub const GET_EVENT: u16 = 0x07;
    pub const CREATE_SCREEN_DEVICE: u16 = 0x08;
    pub const CREATE_WINDOW_GROUP: u16 = 0x09;
    pub const CREATE_WINDOW: u16 = 0x0a;
    pub const CREATE_GC: u16 = 0x0b;
    pub const CREATE_SPRITE: u16 = 0x0c;
    pub const CREATE_ANIM_DLL: u16 = 0x0d;
    pub const CREATE_CLICK: u16 = 0x0e;
    pub const RESTORE_DEFAULT_HOTKEY: u16 = 0x0f;
    pub const GET_FOCUS_WINDOW_GROUP: u16 = 0x10;
    pub const FIND_WINDOW_GROUP_IDENTIFIER: u16 = 0x11;
    pub const GET_WINDOW_GROUP_NAME_FROM_IDENTIFIER: u16 = 0x12;
    pub const WINDOW_GROUP_LIST_AND_CHAIN: u16 = 0x13;
}

/// Window command opcodes (groups and user windows).
pub mod window_op {
    #![allow(missing_docs)]

    pub const SET_EXTENT: u16 = 0x00;
    pub const SET_VISIBLE: u16 = 0x01;
    pub const SET_SHADOW_HEIGHT: u16 = 0x02;
    pub const SHADOW_DISABLED: u16 = 0x03;
    pub const SET_BACKGROUND_COLOR: u16 = 0x04;
    pub const POINTER_FILTER: u16 = 0x05;
    pub const SET_POINTER_GRAB: u16 = 0x06;
    pub const ACTIVATE: u16 = 0x07;
    pub const INVALIDATE: u16 = 0x08;
    pub const BEGIN_REDRAW: u16 = 0x09;
    pub const END_REDRAW: u16 = 0x0a;
    pub const SET_ORDINAL_POSITION: u16 = 0x0b;
    pub const SET_ORDINAL_POSITION_PRI: u16 = 0x0c;
    pub const IDENTIFIER: u16 = 0x0d;
    pub const ENABLE_MODIFIER_CHANGED_EVENTS: u16 = 0x0e;
    pub const ENABLE_ERROR_MESSAGES: u16 = 0x0f;
    pub const ENABLE_SCREEN_CHANGE_EVENTS: u16 = 0x10;
    pub const SET_NAME: u16 = 0x11;
    pub const RECEIVE_FOCUS: u16 = 0x12;
    pub const SET_TEXT_CURSOR: u16 = 0x13;
    pub const ORDINAL_POSITION: u16 = 0x14;
    pub const ORDINAL_PRIORITY: u16 = 0x15;
    pub const ENABLE_ON_EVENTS: u16 = 0x16;
}

/// Graphic context command opcodes.
pub mod gc_op {
    #![allow(missing_docs)]

    pub const ACTIVATE: u16 = 0x00;
    pub const DEACTIVATE: u16 = 0x01;
    pub const SET_BRUSH_COLOR: u16 = 0x02;
    pub const SET_BRUSH_STYLE: u16 = 0x03;
    pub const SET_PEN_COLOR: u16 = 0x04;
    pub const SET_PEN_STYLE: u16 = 0x05;
    pub const DRAW_TEXT: u16 = 0x06;
    pub const DRAW_TEXT_VERTICAL: u16 = 0x07;
    pub const DRAW_BOX_TEXT: u16 = 0x08;
}

/// Screen device command opcodes.
pub mod screen_op {
    #![allow(missing_docs)]

    pub const PIXEL_SIZE: u16 = 0x00;
    pub const TWIPS_SIZE: u16 = 0x01;
    pub const GET_NUM_SCREEN_MODES: u16 = 0x02;
    pub const GET_SCREEN_MODE: u16 = 0x03;
    pub const SET_SCREEN_MODE: u16 = 0x04;
    pub const SET_SCREEN_SIZE_AND_ROTATION: u16 = 0x05;
    pub const GET_SCREEN_SIZE_MODE_LIST: u16 = 0x06;
    pub const GET_SCREEN_MODE_SIZE_AND_ROTATION: u16 = 0x07;
    pub const GET_SCREEN_MODE_SIZE_AND_ROTATION2: u16 = 0x08;
    pub const GET_SCREEN_MODE_DISPLAY_MODE: u16 = 0x09;
    pub const FREE: u16 = 0x0a;
}

/// Animation-DLL command opcodes.
pub mod anim_op {
    #![allow(missing_docs)]

    pub const CREATE_INSTANCE: u16 = 0x00;
    pub const COMMAND_REPLY: u16 = 0x01;
}

/// Key-click plugin command opcodes.
pub mod click_op {
    #![allow(missing_docs)]

    pub const IS_LOADED: u16 = 0x00;
    pub const LOAD: u16 = 0x01;
    pub const COMMAND_REPLY: u16 = 0x02;
}

/// Pixels-to-twips multiplier used by the twips queries.
pub const TWIPS_MUL: i32 = 15;

/// Display mode reported for every screen: true colour plus alpha.
pub const DISPLAY_MODE_COLOR16MA: u32 = 12;
