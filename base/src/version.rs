//! Guest OS version.

/// The guest OS release the emulated device reports.
///
/// Ordered comparisons are meaningful: releases before [`GuestVersion::V6`]
/// use the legacy RAM-code / shared-data split, and [`GuestVersion::V10`]
/// onwards report 64-bit file sizes and seek results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GuestVersion {
    /// Legacy release with the early memory split.
    V6,
    /// 9.3-era release.
    V93,
    /// 9.4-era release, the default device target.
    V94,
    /// First release with 64-bit file APIs.
    V10,
}

impl Default for GuestVersion {
    fn default() -> Self {
        GuestVersion::V94
    }
}

impl GuestVersion {
    /// True for releases that use the legacy memory split.
    pub fn legacy_memory_split(self) -> bool {
        self <= GuestVersion::V6
    }

    /// True for releases that report 64-bit file sizes.
    pub fn wide_file_sizes(self) -> bool {
        self >= GuestVersion::V10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_drives_feature_gates() {
        assert!(GuestVersion::V6.legacy_memory_split());
        assert!(!GuestVersion::V94.legacy_memory_split());
        assert!(GuestVersion::V10.wide_file_sizes());
        assert!(!GuestVersion::V94.wide_file_sizes());
    }
}
