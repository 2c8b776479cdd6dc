//! The virtual file system: provider registry and drive routing.
//!
//! The VFS holds an ordered list of filesystem providers and the drive
//! mount table. Guest operations arrive with absolute drive-letter paths
//! and are routed to the first provider claiming the path's drive.

use std::path::PathBuf;

use log::{info, warn};
use thiserror::Error;

use bitflags::bitflags;

use karst_mem::GuestAddr;

use crate::drive::{Drive, DriveMedia, DriveNumber, IoAttrib, DRIVE_COUNT};
use crate::path;

/// Failures from VFS and provider operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// The entry does not exist.
    #[error("not found")]
    NotFound,
    /// A parent directory does not exist.
    #[error("path not found")]
    PathNotFound,
    /// The entry already exists.
    #[error("already exists")]
    AlreadyExists,
    /// The operation conflicts with the open or mount mode.
    #[error("access denied")]
    AccessDenied,
    /// The media or provider cannot perform this operation.
    #[error("not supported")]
    NotSupported,
    /// Host I/O failed; mapped to a general error at the server boundary.
    #[error("host i/o: {0}")]
    HostIo(String),
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound,
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => FsError::AccessDenied,
            _ => FsError::HostIo(err.to_string()),
        }
    }
}

bitflags! {
    /// How a VFS file is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        /// Readable.
        const READ = 0b0001;
        /// Writable; creates the file and truncates existing content.
        const WRITE = 0b0010;
        /// Writable without truncation; creates the file if missing.
        const APPEND = 0b0100;
        /// Binary (as opposed to text-translated) access.
        const BIN = 0b1000;
    }
}

impl OpenMode {
    /// True when the mode grants any write access.
    pub fn writable(self) -> bool {
        self.intersects(OpenMode::WRITE | OpenMode::APPEND)
    }
}

/// Seek origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Resolve to the file's address in the ROM image (ROM files only).
    Address,
    /// From the start of the file.
    Begin,
    /// From the current position.
    Current,
    /// From the end of the file.
    End,
}

/// Metadata for one directory entry or path.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Leaf name.
    pub name: String,
    /// Absolute guest path.
    pub full_path: String,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// True for directories.
    pub is_dir: bool,
    /// Raw guest attribute word when the provider tracks one.
    pub raw_attrib: Option<u32>,
    /// Mount attributes inherited from the drive.
    pub attrib: IoAttrib,
    /// Last write time, in virtual ticks.
    pub last_write: u64,
}

/// An open file.
pub trait VfsFile: std::fmt::Debug {
    /// Absolute guest path this file was opened from.
    fn path(&self) -> &str;
    /// Current size in bytes.
    fn size(&self) -> u64;
    /// Current offset.
    fn tell(&self) -> u64;
    /// Moves the offset; returns the new position, or the ROM address
    /// for [`SeekMode::Address`]. `None` when the target is invalid.
    fn seek(&mut self, offset: i64, whence: SeekMode) -> Option<u64>;
    /// Reads at the current offset, advancing it.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    /// Writes at the current offset, advancing it and growing the file.
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;
    /// Truncates or extends to `size`.
    fn resize(&mut self, size: u64) -> Result<(), FsError>;
    /// Flushes buffered writes.
    fn flush(&mut self) -> Result<(), FsError>;
    /// The execute-in-place address for ROM-backed files.
    fn rom_address(&self) -> Option<GuestAddr>;
}

/// An open directory iterator.
pub trait VfsDir {
    /// Absolute guest path of the directory.
    fn path(&self) -> &str;
    /// Peeks the next entry without consuming it.
    fn peek(&mut self) -> Option<EntryInfo>;
    /// Consumes and returns the next entry.
    fn next_entry(&mut self) -> Option<EntryInfo>;
}

bitflags! {
    /// Directory iteration filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirFilter: u32 {
        /// Include subdirectory entries.
        const INCLUDE_DIRS = 0b0001;
        /// Include hidden entries.
        const INCLUDE_HIDDEN = 0b0010;
    }
}

/// A mounted filesystem implementation.
pub trait Filesystem {
    /// Short name for logs.
    fn name(&self) -> &str;
    /// True when this provider can back `media`.
    fn supports(&self, media: DriveMedia) -> bool;
    /// Claims a drive, optionally rooted at a host directory. Returns
    /// `false` to decline (e.g. a host-backed provider without a root),
    /// letting the next provider in order take the drive.
    fn mount(&mut self, drive: DriveNumber, host_root: Option<PathBuf>) -> bool;
    /// Releases a drive.
    fn unmount(&mut self, drive: DriveNumber);
    /// True when this provider currently serves `drive`.
    fn handles(&self, drive: DriveNumber) -> bool;

    /// Opens a file.
    fn open_file(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn VfsFile>, FsError>;
    /// True when a file or directory exists at `path`.
    fn exist(&self, path: &str) -> bool;
    /// Deletes a file or empty directory.
    fn delete_entry(&mut self, path: &str) -> bool;
    /// Renames within this provider.
    fn rename(&mut self, src: &str, dst: &str) -> bool;
    /// Metadata for a path.
    fn entry_info(&self, path: &str) -> Option<EntryInfo>;
    /// Opens a directory for iteration.
    fn open_dir(&self, path: &str, filter: DirFilter) -> Option<Box<dyn VfsDir>>;
    /// Creates one directory; the parent must exist.
    fn create_dir(&mut self, path: &str) -> bool;
    /// Creates a directory and any missing parents.
    fn create_dirs(&mut self, path: &str) -> bool;
}

/// Identifies a registered provider for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemId(u32);

/// The VFS: drive table plus ordered providers.
pub struct Vfs {
    drives: [Drive; DRIVE_COUNT],
    providers: Vec<(FilesystemId, Box<dyn Filesystem>)>,
    next_id: u32,
    /// Mutation counter used as the virtual "last write" stamp.
    write_stamp: u64,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Creates an empty VFS with no drives mounted.
    pub fn new() -> Self {
        Self {
            drives: Default::default(),
            providers: Vec::new(),
            next_id: 0,
            write_stamp: 0,
        }
    }

    /// Registers a provider at the end of the search order.
    pub fn add_filesystem(&mut self, fs: Box<dyn Filesystem>) -> FilesystemId {
        let id = FilesystemId(self.next_id);
        self.next_id += 1;
        info!("filesystem {} registered", fs.name());
        self.providers.push((id, fs));
        id
    }

    /// Removes a provider; its drives become unmounted.
    pub fn remove_filesystem(&mut self, id: FilesystemId) -> bool {
        let before = self.providers.len();
        self.providers.retain(|(pid, _)| *pid != id);
        before != self.providers.len()
    }

    /// Mounts a drive: records it in the drive table and hands it to the
    /// first provider supporting the media kind.
    pub fn mount(
        &mut self,
        drive: DriveNumber,
        media: DriveMedia,
        attrib: IoAttrib,
        host_root: Option<PathBuf>,
    ) -> bool {
        let accepted = self
            .providers
            .iter_mut()
            .any(|(_, p)| p.supports(media) && p.mount(drive, host_root.clone()));
        if !accepted {
            warn!("no filesystem accepts media {media:?} for {drive:?}");
            return false;
        }
        self.drives[drive.index()] = Drive {
            media,
            attrib,
            host_root,
        };
        info!("drive {} mounted as {media:?}", drive.letter());
        true
    }

    /// Unmounts a drive everywhere.
    pub fn unmount(&mut self, drive: DriveNumber) {
        for (_, provider) in &mut self.providers {
            provider.unmount(drive);
        }
        self.drives[drive.index()] = Drive::default();
    }

    /// The drive entry, or `None` when nothing is mounted.
    pub fn drive(&self, drive: DriveNumber) -> Option<&Drive> {
        let entry = &self.drives[drive.index()];
        (entry.media != DriveMedia::None).then_some(entry)
    }

    /// Iterates over all drive slots in letter order.
    pub fn drive_table(&self) -> &[Drive; DRIVE_COUNT] {
        &self.drives
    }

    /// The highest mounted ROM drive, conventionally Z.
    pub fn rom_drive(&self) -> Option<DriveNumber> {
        (0..DRIVE_COUNT)
            .rev()
            .find(|i| self.drives[*i].media == DriveMedia::Rom)
            .and_then(DriveNumber::from_index)
    }

    fn provider_for(&mut self, guest_path: &str) -> Option<&mut Box<dyn Filesystem>> {
        let drive = path::drive_of(guest_path)?;
        self.providers
            .iter_mut()
            .find(|(_, p)| p.handles(drive))
            .map(|(_, p)| p)
    }

    fn provider_for_ref(&self, guest_path: &str) -> Option<&dyn Filesystem> {
        let drive = path::drive_of(guest_path)?;
        self.providers
            .iter()
            .find(|(_, p)| p.handles(drive))
            .map(|(_, p)| p.as_ref())
    }

    fn writable_drive(&self, guest_path: &str) -> bool {
        match path::drive_of(guest_path).map(|d| &self.drives[d.index()]) {
            Some(drive) => {
                drive.media != DriveMedia::Rom
                    && !drive.attrib.contains(IoAttrib::WRITE_PROTECTED)
            }
            None => false,
        }
    }

    /// Monotonic stamp used as entry modification time.
    pub fn touch(&mut self) -> u64 {
        self.write_stamp += 1;
        self.write_stamp
    }

    // ── Guest-facing operations (absolute paths) ────────────────────────

    /// Opens a file.
    pub fn open_file(&mut self, guest_path: &str, mode: OpenMode) -> Result<Box<dyn VfsFile>, FsError> {
        if mode.writable() && !self.writable_drive(guest_path) {
            return Err(FsError::AccessDenied);
        }
        self.provider_for(guest_path)
            .ok_or(FsError::NotFound)?
            .open_file(guest_path, mode)
    }

    /// True when the path names a file or directory.
    pub fn exist(&self, guest_path: &str) -> bool {
        self.provider_for_ref(guest_path)
            .is_some_and(|p| p.exist(guest_path))
    }

    /// Deletes a file or empty directory.
    pub fn delete_entry(&mut self, guest_path: &str) -> bool {
        if !self.writable_drive(guest_path) {
            return false;
        }
        match self.provider_for(guest_path) {
            Some(p) => p.delete_entry(guest_path),
            None => false,
        }
    }

    /// Renames within one drive.
    pub fn rename(&mut self, src: &str, dst: &str) -> bool {
        if path::drive_of(src) != path::drive_of(dst) || !self.writable_drive(dst) {
            return false;
        }
        match self.provider_for(src) {
            Some(p) => p.rename(src, dst),
            None => false,
        }
    }

    /// Metadata for a path.
    pub fn entry_info(&self, guest_path: &str) -> Option<EntryInfo> {
        let drive_attrib = path::drive_of(guest_path)
            .map(|d| self.drives[d.index()].attrib)
            .unwrap_or_default();
        self.provider_for_ref(guest_path)?
            .entry_info(guest_path)
            .map(|mut info| {
                info.attrib |= drive_attrib;
                info
            })
    }

    /// Opens a directory for iteration.
    pub fn open_dir(&self, guest_path: &str, filter: DirFilter) -> Option<Box<dyn VfsDir>> {
        self.provider_for_ref(guest_path)?.open_dir(guest_path, filter)
    }

    /// Creates one directory.
    pub fn create_dir(&mut self, guest_path: &str) -> bool {
        if !self.writable_drive(guest_path) {
            return false;
        }
        match self.provider_for(guest_path) {
            Some(p) => p.create_dir(guest_path),
            None => false,
        }
    }

    /// Creates a directory chain.
    pub fn create_dirs(&mut self, guest_path: &str) -> bool {
        if !self.writable_drive(guest_path) {
            return false;
        }
        match self.provider_for(guest_path) {
            Some(p) => p.create_dirs(guest_path),
            None => false,
        }
    }
}
