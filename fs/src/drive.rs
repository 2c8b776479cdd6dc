//! Drives: letters, media kinds and attributes.

use bitflags::bitflags;

/// Number of drive letters.
pub const DRIVE_COUNT: usize = 26;

/// A drive letter, A through Z.
///
/// By convention drive Z carries the ROM image and drive C the
/// persistent writable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum DriveNumber {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
}

impl DriveNumber {
    /// Parses a drive letter (either case).
    pub fn from_letter(c: char) -> Option<Self> {
        let idx = (c.to_ascii_lowercase() as u8).checked_sub(b'a')?;
        Self::from_index(idx as usize)
    }

    /// Drive for a zero-based index (0 = A).
    pub fn from_index(idx: usize) -> Option<Self> {
        const ALL: [DriveNumber; DRIVE_COUNT] = [
            DriveNumber::A, DriveNumber::B, DriveNumber::C, DriveNumber::D,
            DriveNumber::E, DriveNumber::F, DriveNumber::G, DriveNumber::H,
            DriveNumber::I, DriveNumber::J, DriveNumber::K, DriveNumber::L,
            DriveNumber::M, DriveNumber::N, DriveNumber::O, DriveNumber::P,
            DriveNumber::Q, DriveNumber::R, DriveNumber::S, DriveNumber::T,
            DriveNumber::U, DriveNumber::V, DriveNumber::W, DriveNumber::X,
            DriveNumber::Y, DriveNumber::Z,
        ];
        ALL.get(idx).copied()
    }

    /// Zero-based index (A = 0).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case letter.
    pub fn letter(self) -> char {
        (b'a' + self as u8) as char
    }
}

/// What backs a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMedia {
    /// Nothing mounted.
    #[default]
    None,
    /// Writable storage (host directory or in-memory).
    Physical,
    /// The execute-in-place ROM.
    Rom,
    /// A drive reflecting another one.
    Reflected,
}

bitflags! {
    /// Mount attributes of a drive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IoAttrib: u32 {
        /// Fixed internal media.
        const INTERNAL = 0b0001;
        /// Removable media.
        const REMOVABLE = 0b0010;
        /// Hidden from ordinary drive lists.
        const HIDDEN = 0b0100;
        /// Mounted read-only.
        const WRITE_PROTECTED = 0b1000;
    }
}

/// One mounted drive.
#[derive(Debug, Clone, Default)]
pub struct Drive {
    /// Backing media kind.
    pub media: DriveMedia,
    /// Mount attributes.
    pub attrib: IoAttrib,
    /// Host directory backing a physical mount, when applicable.
    pub host_root: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_roundtrip() {
        assert_eq!(DriveNumber::from_letter('c'), Some(DriveNumber::C));
        assert_eq!(DriveNumber::from_letter('Z'), Some(DriveNumber::Z));
        assert_eq!(DriveNumber::from_letter('1'), None);
        assert_eq!(DriveNumber::Z.index(), 25);
        assert_eq!(DriveNumber::C.letter(), 'c');
    }
}
