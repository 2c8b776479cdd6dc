//! Read-only filesystem over the parsed ROM manifest.
//!
//! The external image loader parses the ROM and hands the core a flat
//! manifest of files with their execute-in-place addresses. Directories
//! are implicit in the paths.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use karst_mem::GuestAddr;

use crate::drive::{DriveMedia, DriveNumber};
use crate::path;
use crate::ramfs::ListedDir;
use crate::vfs::{
    DirFilter, EntryInfo, Filesystem, FsError, OpenMode, SeekMode, VfsDir, VfsFile,
};

/// One file in the ROM image.
#[derive(Debug, Clone)]
pub struct RomEntry {
    /// Absolute guest path (on the ROM drive).
    pub path: String,
    /// File content.
    pub data: Vec<u8>,
    /// Execute-in-place address of the content.
    pub rom_address: GuestAddr,
}

/// The flat file listing of a parsed ROM.
#[derive(Debug, Clone, Default)]
pub struct RomManifest {
    /// Files in the image.
    pub entries: Vec<RomEntry>,
}

struct RomNode {
    display: String,
    data: Rc<Vec<u8>>,
    rom_address: GuestAddr,
}

/// The ROM provider.
#[derive(Default)]
pub struct RomFs {
    drives: Vec<DriveNumber>,
    nodes: BTreeMap<String, RomNode>,
    dirs: BTreeMap<String, String>,
}

impl RomFs {
    /// Builds the provider from a manifest.
    pub fn new(manifest: &RomManifest) -> Self {
        let mut fs = Self::default();
        for entry in &manifest.entries {
            let display = path::normalize(&entry.path);
            // Register every ancestor directory.
            let mut dir = path::file_directory(&display);
            while dir.len() > 3 {
                let trimmed = dir.trim_end_matches('\\').to_owned();
                fs.dirs.insert(path::fold(&trimmed), trimmed.clone());
                dir = path::file_directory(&trimmed);
            }
            fs.nodes.insert(
                path::fold(&display),
                RomNode {
                    display,
                    data: Rc::new(entry.data.clone()),
                    rom_address: entry.rom_address,
                },
            );
        }
        fs
    }

    fn dir_children(&self, folded: &str, filter: DirFilter) -> Vec<EntryInfo> {
        let prefix = format!("{}\\", folded.trim_end_matches('\\'));
        let mut out = Vec::new();
        if filter.contains(DirFilter::INCLUDE_DIRS) {
            for (key, display) in self.dirs.range(prefix.clone()..) {
                if !key.starts_with(&prefix) {
                    break;
                }
                if !key[prefix.len()..].contains('\\') {
                    out.push(EntryInfo {
                        name: path::filename(display),
                        full_path: display.clone(),
                        size: 0,
                        is_dir: true,
                        raw_attrib: None,
                        attrib: Default::default(),
                        last_write: 0,
                    });
                }
            }
        }
        for (key, node) in self.nodes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if !key[prefix.len()..].contains('\\') {
                out.push(node_info(node));
            }
        }
        out
    }
}

fn node_info(node: &RomNode) -> EntryInfo {
    EntryInfo {
        name: path::filename(&node.display),
        full_path: node.display.clone(),
        size: node.data.len() as u64,
        is_dir: false,
        raw_attrib: None,
        attrib: Default::default(),
        last_write: 0,
    }
}

impl Filesystem for RomFs {
    fn name(&self) -> &str {
        "romfs"
    }

    fn supports(&self, media: DriveMedia) -> bool {
        media == DriveMedia::Rom
    }

    fn mount(&mut self, drive: DriveNumber, _host_root: Option<PathBuf>) -> bool {
        if !self.drives.contains(&drive) {
            self.drives.push(drive);
        }
        true
    }

    fn unmount(&mut self, drive: DriveNumber) {
        self.drives.retain(|d| *d != drive);
    }

    fn handles(&self, drive: DriveNumber) -> bool {
        self.drives.contains(&drive)
    }

    fn open_file(&mut self, guest_path: &str, mode: OpenMode) -> Result<Box<dyn VfsFile>, FsError> {
        if mode.writable() {
            return Err(FsError::AccessDenied);
        }
        let node = self
            .nodes
            .get(&path::fold(guest_path))
            .ok_or(FsError::NotFound)?;
        Ok(Box::new(RomFile {
            path: node.display.clone(),
            data: node.data.clone(),
            rom_address: node.rom_address,
            pos: 0,
        }))
    }

    fn exist(&self, guest_path: &str) -> bool {
        let folded = path::fold(guest_path);
        let folded = folded.trim_end_matches('\\');
        if folded.len() == 2 {
            return path::drive_of(folded).is_some_and(|d| self.drives.contains(&d));
        }
        self.nodes.contains_key(folded) || self.dirs.contains_key(folded)
    }

    fn delete_entry(&mut self, _guest_path: &str) -> bool {
        false
    }

    fn rename(&mut self, _src: &str, _dst: &str) -> bool {
        false
    }

    fn entry_info(&self, guest_path: &str) -> Option<EntryInfo> {
        let folded = path::fold(guest_path);
        let folded = folded.trim_end_matches('\\').to_owned();
        if let Some(node) = self.nodes.get(&folded) {
            return Some(node_info(node));
        }
        self.dirs.get(&folded).map(|display| EntryInfo {
            name: path::filename(display),
            full_path: display.clone(),
            size: 0,
            is_dir: true,
            raw_attrib: None,
            attrib: Default::default(),
            last_write: 0,
        })
    }

    fn open_dir(&self, guest_path: &str, filter: DirFilter) -> Option<Box<dyn VfsDir>> {
        let folded = path::fold(guest_path);
        let folded = folded.trim_end_matches('\\').to_owned();
        let is_root = folded.len() == 2
            && path::drive_of(&folded).is_some_and(|d| self.drives.contains(&d));
        if !is_root && !self.dirs.contains_key(&folded) {
            return None;
        }
        Some(Box::new(ListedDir {
            path: path::normalize(guest_path),
            entries: self.dir_children(&folded, filter),
            cursor: 0,
        }))
    }

    fn create_dir(&mut self, _guest_path: &str) -> bool {
        false
    }

    fn create_dirs(&mut self, _guest_path: &str) -> bool {
        false
    }
}

#[derive(Debug)]
struct RomFile {
    path: String,
    data: Rc<Vec<u8>>,
    rom_address: GuestAddr,
    pos: u64,
}

impl VfsFile for RomFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: i64, whence: SeekMode) -> Option<u64> {
        let base = match whence {
            SeekMode::Address => {
                // Resolve to the execute-in-place address of the offset.
                let target = i64::from(self.rom_address) + offset;
                return u64::try_from(target).ok();
            }
            SeekMode::Begin => 0,
            SeekMode::Current => self.pos as i64,
            SeekMode::End => self.size() as i64,
        };
        let target = base.checked_add(offset)?;
        if target < 0 {
            return None;
        }
        self.pos = target as u64;
        Some(self.pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize, FsError> {
        Err(FsError::AccessDenied)
    }

    fn resize(&mut self, _size: u64) -> Result<(), FsError> {
        Err(FsError::AccessDenied)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }

    fn rom_address(&self) -> Option<GuestAddr> {
        Some(self.rom_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> RomManifest {
        RomManifest {
            entries: vec![
                RomEntry {
                    path: "z:\\test.txt".into(),
                    data: b"hello".to_vec(),
                    rom_address: 0x8000_1000,
                },
                RomEntry {
                    path: "z:\\system\\data\\wsini.ini".into(),
                    data: b"[SCREEN0]".to_vec(),
                    rom_address: 0x8000_2000,
                },
            ],
        }
    }

    fn mounted() -> RomFs {
        let mut fs = RomFs::new(&manifest());
        fs.mount(DriveNumber::Z, None);
        fs
    }

    #[test]
    fn files_and_implicit_dirs_exist() {
        let fs = mounted();
        assert!(fs.exist("z:\\test.txt"));
        assert!(fs.exist("Z:\\SYSTEM"));
        assert!(fs.exist("z:\\system\\data\\"));
        assert!(!fs.exist("z:\\nope"));
    }

    #[test]
    fn read_and_rom_address() {
        let mut fs = mounted();
        let mut f = fs.open_file("z:\\test.txt", OpenMode::READ).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(f.rom_address(), Some(0x8000_1000));
        assert_eq!(f.seek(2, SeekMode::Address), Some(0x8000_1002));
    }

    #[test]
    fn writes_are_denied() {
        let mut fs = mounted();
        assert_eq!(
            fs.open_file("z:\\test.txt", OpenMode::WRITE).unwrap_err(),
            FsError::AccessDenied
        );
        let mut f = fs.open_file("z:\\test.txt", OpenMode::READ).unwrap();
        assert_eq!(f.write(b"x").unwrap_err(), FsError::AccessDenied);
        assert!(!fs.delete_entry("z:\\test.txt"));
    }

    #[test]
    fn dir_iteration_lists_children() {
        let fs = mounted();
        let mut dir = fs
            .open_dir("z:\\system\\data", DirFilter::INCLUDE_DIRS)
            .unwrap();
        assert_eq!(dir.next_entry().unwrap().name, "wsini.ini");
        assert!(dir.next_entry().is_none());

        let mut root = fs.open_dir("z:", DirFilter::INCLUDE_DIRS).unwrap();
        let names: Vec<String> = std::iter::from_fn(|| root.next_entry().map(|e| e.name)).collect();
        assert_eq!(names, vec!["system".to_string(), "test.txt".to_string()]);
    }
}
