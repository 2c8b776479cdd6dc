//! Guest descriptor codec.
//!
//! Descriptors are the guest's length-prefixed string/buffer objects,
//! passed by pointer in message argument slots. The first word encodes
//! the descriptor type in the top 4 bits and the current length (in code
//! units) in the low 28. Modifiable types additionally carry a maximum
//! length word. Five layouts exist:
//!
//! | type | layout after the length word |
//! |---|---|
//! | 0 constant buffer    | payload |
//! | 1 constant pointer   | pointer to payload |
//! | 2 modifiable buffer  | max-length, payload |
//! | 3 modifiable pointer | max-length, pointer to payload |
//! | 4 buffer pointer     | max-length, pointer to a constant buffer |
//!
//! Payload units are bytes for narrow descriptors and 16-bit code units
//! for wide ones; which width applies is a property of the argument slot,
//! not of the descriptor header.

use karst_base::ucs2;

use crate::space::AddressSpace;
use crate::{GuestAddr, MemError};

/// Code-unit width of a descriptor argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesWidth {
    /// 8-bit code units.
    Narrow,
    /// 16-bit code units.
    Wide,
}

impl DesWidth {
    fn unit_bytes(self) -> u32 {
        match self {
            DesWidth::Narrow => 1,
            DesWidth::Wide => 2,
        }
    }
}

const TYPE_SHIFT: u32 = 28;
const LEN_MASK: u32 = (1 << TYPE_SHIFT) - 1;

const T_BUF_CONST: u32 = 0;
const T_PTR_CONST: u32 = 1;
const T_BUF: u32 = 2;
const T_PTR: u32 = 3;
const T_BUF_CONST_PTR: u32 = 4;

/// A decoded descriptor header.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Guest address of the descriptor object itself.
    pub addr: GuestAddr,
    des_type: u32,
    /// Current length in code units.
    pub len: u32,
    /// Maximum length in code units; equals `len` for constant types.
    pub max_len: u32,
    /// Guest address of the payload.
    pub data: GuestAddr,
}

impl Descriptor {
    /// Parses the descriptor object at `addr`.
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::BadDescriptor`] for unknown type nibbles and
    /// propagates [`MemError::BadAddress`] for unmapped headers.
    pub fn parse(mem: &AddressSpace, addr: GuestAddr) -> Result<Self, MemError> {
        let word0 = mem.read_u32(addr)?;
        let des_type = word0 >> TYPE_SHIFT;
        let len = word0 & LEN_MASK;

        let (max_len, data) = match des_type {
            T_BUF_CONST => (len, addr + 4),
            T_PTR_CONST => (len, mem.read_u32(addr + 4)?),
            T_BUF => (mem.read_u32(addr + 4)?, addr + 8),
            T_PTR => (mem.read_u32(addr + 4)?, mem.read_u32(addr + 8)?),
            T_BUF_CONST_PTR => {
                // Points at an inner constant buffer; payload follows the
                // inner length word.
                let inner = mem.read_u32(addr + 8)?;
                (mem.read_u32(addr + 4)?, inner + 4)
            }
            _ => return Err(MemError::BadDescriptor(addr)),
        };

        Ok(Self {
            addr,
            des_type,
            len,
            max_len,
            data,
        })
    }

    /// True for types whose contents may be rewritten through the header.
    pub fn modifiable(&self) -> bool {
        matches!(self.des_type, T_BUF | T_PTR | T_BUF_CONST_PTR)
    }

    /// Reads the payload as raw bytes (`len` code units of `width`).
    pub fn read(&self, mem: &AddressSpace, width: DesWidth) -> Result<Vec<u8>, MemError> {
        mem.read_bytes(self.data, (self.len * width.unit_bytes()) as usize)
    }

    /// Overwrites the payload and updates the stored length.
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::Overflow`] — without touching guest memory —
    /// when the payload exceeds `max_len` code units, or when the target
    /// descriptor is a constant type.
    pub fn write(
        &self,
        mem: &mut AddressSpace,
        payload: &[u8],
        width: DesWidth,
    ) -> Result<(), MemError> {
        let units = payload.len() as u32 / width.unit_bytes();
        if !self.modifiable() || units > self.max_len {
            return Err(MemError::Overflow);
        }

        mem.write_bytes(self.data, payload)?;
        let new_word = (self.des_type << TYPE_SHIFT) | units;
        mem.write_u32(self.addr, new_word)?;
        if self.des_type == T_BUF_CONST_PTR {
            // The inner constant buffer carries its own length word.
            mem.write_u32(self.data - 4, units)?;
        }
        Ok(())
    }
}

/// Reads a wide descriptor as a host string.
pub fn read_string(mem: &AddressSpace, addr: GuestAddr) -> Result<String, MemError> {
    let des = Descriptor::parse(mem, addr)?;
    let bytes = des.read(mem, DesWidth::Wide)?;
    Ok(ucs2::to_utf8(&ucs2::from_bytes(&bytes)))
}

/// Reads a narrow descriptor as raw bytes.
pub fn read_bytes(mem: &AddressSpace, addr: GuestAddr) -> Result<Vec<u8>, MemError> {
    let des = Descriptor::parse(mem, addr)?;
    des.read(mem, DesWidth::Narrow)
}

/// Writes a host string into a wide descriptor.
pub fn write_string(mem: &mut AddressSpace, addr: GuestAddr, s: &str) -> Result<(), MemError> {
    let des = Descriptor::parse(mem, addr)?;
    des.write(mem, &ucs2::to_bytes(&ucs2::from_utf8(s)), DesWidth::Wide)
}

/// Writes raw bytes into a narrow descriptor.
pub fn write_bytes(mem: &mut AddressSpace, addr: GuestAddr, bytes: &[u8]) -> Result<(), MemError> {
    let des = Descriptor::parse(mem, addr)?;
    des.write(mem, bytes, DesWidth::Narrow)
}

#[cfg(test)]
mod tests {
    use karst_base::GuestVersion;

    use super::*;
    use crate::chunk::{ChunkAttrib, Region};

    fn scratch() -> (AddressSpace, GuestAddr) {
        let mut mem = AddressSpace::new(GuestVersion::V94);
        let id = mem
            .alloc_chunk(
                "scratch",
                Region::LocalData,
                0x1000,
                ChunkAttrib::READ | ChunkAttrib::WRITE,
            )
            .unwrap();
        let base = mem.chunk(id).unwrap().base;
        (mem, base)
    }

    /// Lays out a modifiable narrow buffer descriptor at `addr`.
    fn make_buf(mem: &mut AddressSpace, addr: GuestAddr, max: u32, content: &[u8]) {
        mem.write_u32(addr, (T_BUF << TYPE_SHIFT) | content.len() as u32)
            .unwrap();
        mem.write_u32(addr + 4, max).unwrap();
        mem.write_bytes(addr + 8, content).unwrap();
    }

    #[test]
    fn constant_buffer_reads() {
        let (mut mem, base) = scratch();
        mem.write_u32(base, 5).unwrap(); // type 0, len 5
        mem.write_bytes(base + 4, b"hello").unwrap();

        assert_eq!(read_bytes(&mem, base).unwrap(), b"hello");
    }

    #[test]
    fn pointer_descriptor_follows_indirection() {
        let (mut mem, base) = scratch();
        let payload = base + 0x100;
        mem.write_bytes(payload, b"abc").unwrap();
        mem.write_u32(base, (T_PTR_CONST << TYPE_SHIFT) | 3).unwrap();
        mem.write_u32(base + 4, payload).unwrap();

        assert_eq!(read_bytes(&mem, base).unwrap(), b"abc");
    }

    #[test]
    fn modifiable_write_updates_length() {
        let (mut mem, base) = scratch();
        make_buf(&mut mem, base, 16, b"old");

        write_bytes(&mut mem, base, b"longer payload").unwrap();
        assert_eq!(read_bytes(&mem, base).unwrap(), b"longer payload");
        assert_eq!(mem.read_u32(base).unwrap() & LEN_MASK, 14);
    }

    #[test]
    fn overflow_leaves_guest_memory_untouched() {
        let (mut mem, base) = scratch();
        make_buf(&mut mem, base, 4, b"orig");

        assert_eq!(
            write_bytes(&mut mem, base, b"way too long"),
            Err(MemError::Overflow)
        );
        assert_eq!(read_bytes(&mem, base).unwrap(), b"orig");
    }

    #[test]
    fn constant_descriptor_rejects_writes() {
        let (mut mem, base) = scratch();
        mem.write_u32(base, 4).unwrap();
        mem.write_bytes(base + 4, b"data").unwrap();

        assert_eq!(
            write_bytes(&mut mem, base, b"x"),
            Err(MemError::Overflow)
        );
    }

    #[test]
    fn wide_string_roundtrip() {
        let (mut mem, base) = scratch();
        // Modifiable wide buffer with room for 32 units.
        mem.write_u32(base, T_BUF << TYPE_SHIFT).unwrap();
        mem.write_u32(base + 4, 32).unwrap();

        write_string(&mut mem, base, "z:\\test.txt").unwrap();
        assert_eq!(read_string(&mem, base).unwrap(), "z:\\test.txt");
    }

    #[test]
    fn unknown_type_nibble_is_rejected() {
        let (mut mem, base) = scratch();
        mem.write_u32(base, 7 << TYPE_SHIFT).unwrap();
        assert_eq!(
            Descriptor::parse(&mem, base).unwrap_err(),
            MemError::BadDescriptor(base)
        );
    }
}
