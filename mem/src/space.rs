//! The guest address space: chunk registry and typed access surface.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use karst_base::GuestVersion;

use crate::chunk::{Chunk, ChunkAttrib, ChunkId, Region};
use crate::{GuestAddr, MemError, PAGE_SIZE};

/// Default ROM base when no image dictates one.
pub const ROM_BASE: GuestAddr = 0x8000_0000;

/// RAM-code region base (v6 onwards).
const RAM_CODE_BASE: GuestAddr = 0x7000_0000;
/// RAM-code region base on legacy releases.
const RAM_CODE_BASE_LEGACY: GuestAddr = 0x5000_0000;
/// Shared-data region base (v6 onwards).
const SHARED_DATA_BASE: GuestAddr = 0x3800_0000;
/// Shared-data region base on legacy releases.
const SHARED_DATA_BASE_LEGACY: GuestAddr = 0x1000_0000;
/// Local-data region base (all releases).
const LOCAL_DATA_BASE: GuestAddr = 0x0040_0000;

/// A per-region bump allocator cursor.
#[derive(Debug, Clone, Copy)]
struct RegionCursor {
    next: GuestAddr,
    limit: GuestAddr,
}

/// The emulated guest address space.
///
/// Chunks are keyed by dense [`ChunkId`]s; an ordered map from base
/// address to id resolves guest addresses. Accesses never mutate on
/// failure: an unmapped or read-only range fails before any byte moves.
pub struct AddressSpace {
    chunks: Vec<Option<Chunk>>,
    layout: BTreeMap<GuestAddr, ChunkId>,
    local: RegionCursor,
    shared: RegionCursor,
    ram_code: RegionCursor,
}

impl AddressSpace {
    /// Creates an empty address space laid out for `version`.
    ///
    /// The legacy split (releases before v6) moves the RAM-code and
    /// shared-data regions; this is fixed for the lifetime of the space.
    pub fn new(version: GuestVersion) -> Self {
        let (ram_code_base, shared_base, shared_limit) = if version.legacy_memory_split() {
            (
                RAM_CODE_BASE_LEGACY,
                SHARED_DATA_BASE_LEGACY,
                RAM_CODE_BASE_LEGACY,
            )
        } else {
            (RAM_CODE_BASE, SHARED_DATA_BASE, RAM_CODE_BASE)
        };

        Self {
            chunks: Vec::new(),
            layout: BTreeMap::new(),
            local: RegionCursor {
                next: LOCAL_DATA_BASE,
                limit: SHARED_DATA_BASE_LEGACY,
            },
            shared: RegionCursor {
                next: shared_base,
                limit: shared_limit,
            },
            ram_code: RegionCursor {
                next: ram_code_base,
                limit: ROM_BASE,
            },
        }
    }

    /// Maps the immutable ROM image at `base`.
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::Overlap`] if the range collides with an
    /// existing chunk.
    pub fn map_rom(&mut self, base: GuestAddr, image: Vec<u8>) -> Result<ChunkId, MemError> {
        let id = self.install(Chunk {
            id: ChunkId(0),
            name: "rom".into(),
            base,
            attrib: ChunkAttrib::READ | ChunkAttrib::EXECUTE,
            data: image,
            refs: 1,
        })?;
        debug!("mapped ROM chunk at {base:#010x}");
        Ok(id)
    }

    /// Allocates a chunk of `size` bytes in `region`.
    ///
    /// The size is rounded up to a whole number of pages and the chunk is
    /// fully committed (commit-on-demand chunks still reserve their backing
    /// eagerly in the emulator).
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::RegionFull`] when the region cannot fit the
    /// rounded size.
    pub fn alloc_chunk(
        &mut self,
        name: &str,
        region: Region,
        size: u32,
        attrib: ChunkAttrib,
    ) -> Result<ChunkId, MemError> {
        let size = size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let cursor = match region {
            Region::LocalData => &mut self.local,
            Region::SharedData => &mut self.shared,
            Region::RamCode => &mut self.ram_code,
            Region::Rom => return Err(MemError::RegionFull(Region::Rom)),
        };

        let base = cursor.next;
        let end = base.checked_add(size).ok_or(MemError::RegionFull(region))?;
        if end > cursor.limit {
            return Err(MemError::RegionFull(region));
        }
        cursor.next = end;

        let id = self.install(Chunk {
            id: ChunkId(0),
            name: name.to_owned(),
            base,
            attrib,
            data: vec![0; size as usize],
            refs: 1,
        })?;
        trace!("chunk \"{name}\" at {base:#010x}+{size:#x}");
        Ok(id)
    }

    /// Adds a reference to a chunk.
    pub fn retain_chunk(&mut self, id: ChunkId) -> Result<(), MemError> {
        self.chunk_mut(id)?.refs += 1;
        Ok(())
    }

    /// Drops a reference to a chunk, unmapping it at zero.
    ///
    /// Returns `true` when the chunk was actually unmapped.
    pub fn free_chunk(&mut self, id: ChunkId) -> Result<bool, MemError> {
        let chunk = self.chunk_mut(id)?;
        chunk.refs -= 1;
        if chunk.refs > 0 {
            return Ok(false);
        }
        let base = chunk.base;
        self.layout.remove(&base);
        self.chunks[id.0 as usize] = None;
        trace!("chunk {id:?} unmapped");
        Ok(true)
    }

    /// Looks up the chunk covering `addr`.
    pub fn chunk_at(&self, addr: GuestAddr) -> Option<&Chunk> {
        let (_, id) = self.layout.range(..=addr).next_back()?;
        let chunk = self.chunks[id.0 as usize].as_ref()?;
        chunk.contains(addr).then_some(chunk)
    }

    /// Borrows a chunk by id.
    pub fn chunk(&self, id: ChunkId) -> Result<&Chunk, MemError> {
        self.chunks
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(MemError::BadChunk(id))
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, MemError> {
        self.chunks
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(MemError::BadChunk(id))
    }

    /// Copies `len` bytes out of guest memory.
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::BadAddress`] if any byte of the range is
    /// unmapped. The range must lie within a single chunk; chunks are
    /// contiguous so a spanning access necessarily crosses a hole.
    pub fn read_bytes(&self, addr: GuestAddr, len: usize) -> Result<Vec<u8>, MemError> {
        let (chunk, off) = self.resolve(addr, len)?;
        Ok(chunk.data[off..off + len].to_vec())
    }

    /// Copies bytes into guest memory.
    ///
    /// # Errors
    ///
    /// Fails with [`MemError::BadAddress`] for unmapped ranges and
    /// [`MemError::ReadOnly`] for the ROM chunk, in both cases without
    /// partial writes.
    pub fn write_bytes(&mut self, addr: GuestAddr, bytes: &[u8]) -> Result<(), MemError> {
        let (chunk_id, off) = {
            let (chunk, off) = self.resolve(addr, bytes.len())?;
            if !chunk.attrib.contains(ChunkAttrib::WRITE) {
                return Err(MemError::ReadOnly(addr));
            }
            (chunk.id, off)
        };
        let chunk = self.chunk_mut(chunk_id)?;
        chunk.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&self, addr: GuestAddr) -> Result<u8, MemError> {
        let (chunk, off) = self.resolve(addr, 1)?;
        Ok(chunk.data[off])
    }

    /// Reads a little-endian 16-bit value.
    pub fn read_u16(&self, addr: GuestAddr) -> Result<u16, MemError> {
        let (chunk, off) = self.resolve(addr, 2)?;
        Ok(LittleEndian::read_u16(&chunk.data[off..off + 2]))
    }

    /// Reads a little-endian 32-bit value.
    pub fn read_u32(&self, addr: GuestAddr) -> Result<u32, MemError> {
        let (chunk, off) = self.resolve(addr, 4)?;
        Ok(LittleEndian::read_u32(&chunk.data[off..off + 4]))
    }

    /// Reads a little-endian 64-bit value.
    pub fn read_u64(&self, addr: GuestAddr) -> Result<u64, MemError> {
        let (chunk, off) = self.resolve(addr, 8)?;
        Ok(LittleEndian::read_u64(&chunk.data[off..off + 8]))
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, addr: GuestAddr, value: u8) -> Result<(), MemError> {
        self.write_bytes(addr, &[value])
    }

    /// Writes a little-endian 16-bit value.
    pub fn write_u16(&mut self, addr: GuestAddr, value: u16) -> Result<(), MemError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Writes a little-endian 32-bit value.
    pub fn write_u32(&mut self, addr: GuestAddr, value: u32) -> Result<(), MemError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Writes a little-endian 64-bit value.
    pub fn write_u64(&mut self, addr: GuestAddr, value: u64) -> Result<(), MemError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn resolve(&self, addr: GuestAddr, len: usize) -> Result<(&Chunk, usize), MemError> {
        let chunk = self.chunk_at(addr).ok_or(MemError::BadAddress(addr))?;
        let off = (addr - chunk.base) as usize;
        if off + len > chunk.data.len() {
            return Err(MemError::BadAddress(addr));
        }
        Ok((chunk, off))
    }

    fn install(&mut self, mut chunk: Chunk) -> Result<ChunkId, MemError> {
        let new_end = chunk.end();
        let overlaps = self
            .layout
            .values()
            .filter_map(|id| self.chunks[id.0 as usize].as_ref())
            .any(|other| u64::from(chunk.base) < other.end() && u64::from(other.base) < new_end);
        if overlaps {
            return Err(MemError::Overlap(chunk.name));
        }

        let id = ChunkId(self.chunks.len() as u32);
        chunk.id = id;
        self.layout.insert(chunk.base, id);
        self.chunks.push(Some(chunk));
        Ok(id)
    }
}
