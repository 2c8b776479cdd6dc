//! Published properties: small typed values keyed by `{category, key}`.

use std::collections::BTreeMap;

/// The payload kind a property was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// A single 32-bit integer.
    Int,
    /// An opaque byte blob with a fixed maximum size.
    Bin,
}

/// A published property.
#[derive(Debug, Clone)]
pub struct Property {
    /// Payload kind.
    pub ptype: PropertyType,
    /// Maximum payload size in bytes (integers are always 4).
    pub max_size: usize,
    data: Vec<u8>,
}

impl Property {
    /// Current integer value; zero until first set.
    pub fn as_int(&self) -> i32 {
        let mut raw = [0u8; 4];
        let n = self.data.len().min(4);
        raw[..n].copy_from_slice(&self.data[..n]);
        i32::from_le_bytes(raw)
    }

    /// Current raw payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// The kernel-wide property store.
#[derive(Debug, Default)]
pub struct PropertyStore {
    props: BTreeMap<(u32, u32), Property>,
}

impl PropertyStore {
    /// Defines a property. At most one may exist per `{category, key}`;
    /// a duplicate definition returns `false` and leaves the original.
    pub fn define(&mut self, category: u32, key: u32, ptype: PropertyType, max_size: usize) -> bool {
        let max_size = match ptype {
            PropertyType::Int => 4,
            PropertyType::Bin => max_size,
        };
        match self.props.entry((category, key)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Property {
                    ptype,
                    max_size,
                    data: Vec::new(),
                });
                true
            }
        }
    }

    /// Sets an integer property.
    pub fn set_int(&mut self, category: u32, key: u32, value: i32) -> bool {
        match self.props.get_mut(&(category, key)) {
            Some(prop) if prop.ptype == PropertyType::Int => {
                prop.data = value.to_le_bytes().to_vec();
                true
            }
            _ => false,
        }
    }

    /// Sets a binary property; payloads over `max_size` are rejected.
    pub fn set_bin(&mut self, category: u32, key: u32, value: &[u8]) -> bool {
        match self.props.get_mut(&(category, key)) {
            Some(prop) if prop.ptype == PropertyType::Bin && value.len() <= prop.max_size => {
                prop.data = value.to_vec();
                true
            }
            _ => false,
        }
    }

    /// Looks up a property.
    pub fn get(&self, category: u32, key: u32) -> Option<&Property> {
        self.props.get(&(category, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_is_exclusive_per_key() {
        let mut store = PropertyStore::default();
        assert!(store.define(0x101f_75b6, 1, PropertyType::Int, 0));
        assert!(!store.define(0x101f_75b6, 1, PropertyType::Bin, 16));
        assert_eq!(store.get(0x101f_75b6, 1).unwrap().ptype, PropertyType::Int);
    }

    #[test]
    fn int_roundtrip() {
        let mut store = PropertyStore::default();
        store.define(1, 2, PropertyType::Int, 0);
        assert!(store.set_int(1, 2, 65535));
        assert_eq!(store.get(1, 2).unwrap().as_int(), 65535);
    }

    #[test]
    fn bin_respects_max_size() {
        let mut store = PropertyStore::default();
        store.define(1, 3, PropertyType::Bin, 4);
        assert!(store.set_bin(1, 3, b"abcd"));
        assert!(!store.set_bin(1, 3, b"abcde"));
        assert_eq!(store.get(1, 3).unwrap().as_bytes(), b"abcd");
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut store = PropertyStore::default();
        store.define(1, 4, PropertyType::Bin, 8);
        assert!(!store.set_int(1, 4, 9));
    }
}
