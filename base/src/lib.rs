//! Shared guest-facing primitives.
//!
//! Everything in this crate is part of the guest ABI or is needed by more
//! than one subsystem crate: status codes, UID triples, UCS-2 text
//! handling, screen geometry and the guest OS version.

pub mod geometry;
pub mod status;
pub mod ucs2;
pub mod uid;
pub mod version;

pub use geometry::{Rect, Vec2};
pub use uid::UidTriple;
pub use version::GuestVersion;
