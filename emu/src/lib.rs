//! System assembly and main loop of the karst emulator.
//!
//! Everything guest-visible lives in the subsystem crates; this crate
//! owns the seams to the external collaborators (CPU engine, image
//! loader, graphics driver), wires the subsystems into a [`System`] and
//! drives the execute/advance/serve/reschedule loop.

pub mod config;
pub mod cpu;
pub mod loader;
pub mod system;

pub use config::SystemConfig;
pub use cpu::{CpuEngine, NullCpu};
pub use loader::{ImageLoader, RomImage, StubLoader};
pub use system::System;
