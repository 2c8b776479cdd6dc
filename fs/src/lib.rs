//! Virtual file system and the guest file server.
//!
//! The VFS layer routes drive-letter guest paths to pluggable
//! filesystem providers (ROM image, host directory, in-memory). The
//! file server sits on top and speaks the guest protocol: file and
//! directory subsessions, share-mode arbitration, drive queries and
//! change notifications.

pub mod drive;
pub mod node;
pub mod notify;
pub mod ops;
pub mod path;
pub mod physical;
pub mod ramfs;
pub mod romfs;
pub mod server;
pub mod vfs;

pub use drive::{Drive, DriveMedia, DriveNumber, IoAttrib, DRIVE_COUNT};
pub use physical::PhysicalFs;
pub use ramfs::RamFs;
pub use romfs::{RomEntry, RomFs, RomManifest};
pub use server::{FsServer, SERVER_NAME as FS_SERVER_NAME};
pub use vfs::{
    DirFilter, EntryInfo, Filesystem, FilesystemId, FsError, OpenMode, SeekMode, Vfs, VfsDir,
    VfsFile,
};
