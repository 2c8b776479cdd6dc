//! UCS-2 text handling.
//!
//! Guest-boundary strings are 16-bit code units. Conversions here are
//! lossy only for code points outside the BMP, which the guest OS never
//! produces.

/// Converts a host string to guest UCS-2 code units.
pub fn from_utf8(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Converts guest UCS-2 code units to a host string.
///
/// Unpaired surrogates are replaced with U+FFFD rather than failing:
/// guest text buffers are frequently uninitialised padding.
pub fn to_utf8(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// Reinterprets UCS-2 code units as little-endian bytes.
pub fn to_bytes(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() * 2);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Reinterprets little-endian bytes as UCS-2 code units.
///
/// A trailing odd byte is dropped.
pub fn from_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Case-insensitive string equality, the comparison the guest uses for
/// every path and window-group name.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.len() == b.len() && a.eq_ignore_ascii_case(b) {
        return true;
    }
    let mut ac = a.chars().flat_map(char::to_lowercase);
    let mut bc = b.chars().flat_map(char::to_lowercase);
    loop {
        match (ac.next(), bc.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
}

/// Lower-cases a string for use as a case-insensitive map key.
pub fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_roundtrip() {
        let units = from_utf8("c:\\system\\data");
        assert_eq!(to_utf8(&units), "c:\\system\\data");
    }

    #[test]
    fn byte_roundtrip() {
        let units = from_utf8("hello");
        let bytes = to_bytes(&units);
        assert_eq!(bytes.len(), 10);
        assert_eq!(from_bytes(&bytes), units);
    }

    #[test]
    fn odd_trailing_byte_dropped() {
        assert_eq!(from_bytes(&[0x61, 0x00, 0x7f]), vec![0x61]);
    }

    #[test]
    fn case_insensitive_compare() {
        assert!(eq_ignore_case("C:\\Test.TXT", "c:\\test.txt"));
        assert!(!eq_ignore_case("c:\\a", "c:\\b"));
        assert!(eq_ignore_case("", ""));
    }
}
