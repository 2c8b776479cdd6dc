//! Emulator configuration.
//!
//! The on-disk representation is owned by the front-end; the core only
//! defines the shape (with serde derives so front-ends can persist it)
//! and the defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use karst_base::GuestVersion;

/// Assembly-time configuration of a [`System`](crate::System).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Device firmware name, informational.
    pub device_name: String,
    /// Guest OS version: 6, 93, 94 or 10.
    pub guest_version: u16,
    /// Executables spawned before the requested process.
    pub startup: Vec<String>,
    /// Host directory backing drive C; in-memory storage when absent.
    pub drive_c_host_path: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            device_name: "generic".to_owned(),
            guest_version: 94,
            startup: Vec::new(),
            drive_c_host_path: None,
        }
    }
}

impl SystemConfig {
    /// The typed guest version; unknown numbers fall back to the
    /// default release.
    pub fn version(&self) -> GuestVersion {
        match self.guest_version {
            0..=6 => GuestVersion::V6,
            93 => GuestVersion::V93,
            10 | 100 => GuestVersion::V10,
            _ => GuestVersion::V94,
        }
    }
}
