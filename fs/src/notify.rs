//! Change notifications.
//!
//! Clients register a wildcard pattern plus a kind mask; filesystem
//! mutations with a matching kind and path complete the registration
//! with status 0 and remove it.

use bitflags::bitflags;
use log::trace;
use regex::Regex;

use karst_kernel::{NotifyInfo, SessionId};

use crate::path;

bitflags! {
    /// What kinds of change a notification watches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NotifyKind: u32 {
        /// Any change at all.
        const ALL = 0x01;
        /// An entry was created, deleted or renamed.
        const ENTRY = 0x02;
        /// A file-specific change.
        const FILE = 0x04;
        /// A directory-specific change.
        const DIR = 0x08;
        /// Attributes changed.
        const ATTRIBUTES = 0x10;
        /// File content grew or was truncated.
        const WRITE = 0x20;
        /// Media-level change.
        const DISK = 0x40;
    }
}

/// One registered change notification.
pub struct NotifyEntry {
    /// Compiled wildcard pattern.
    pub pattern: Regex,
    /// Watched change kinds.
    pub kinds: NotifyKind,
    /// Deferred completion for the requester.
    pub notify: NotifyInfo,
    /// Session the registration belongs to (for teardown).
    pub session: SessionId,
}

impl NotifyEntry {
    /// True when a mutation of `kind` at `guest_path` fires this entry.
    pub fn matches(&self, guest_path: &str, kind: NotifyKind) -> bool {
        let kind_hit = self.kinds.contains(NotifyKind::ALL) || self.kinds.intersects(kind);
        kind_hit && self.pattern.is_match(&path::fold(guest_path))
    }
}

/// Converts a shell wildcard (`?`, `*`) into a case-insensitive regex.
///
/// Regex metacharacters in the pattern are escaped first, then the two
/// wildcards expand to `.` and `.*`.
pub fn wildcard_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?i)");
    for c in pattern.chars() {
        match c {
            '?' => out.push('.'),
            '*' => out.push_str(".*"),
            c if "\\.+()[]{}^$|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    trace!("wildcard {pattern:?} compiled to {out:?}");
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").expect("never-matching regex"))
}

/// The always-matching pattern used by the non-Ex notification opcode.
pub fn match_all() -> Regex {
    Regex::new(".*").expect("wildcard regex")
}
