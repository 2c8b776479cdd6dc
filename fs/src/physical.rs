//! Host-directory-backed filesystem provider.
//!
//! Maps a guest drive onto a directory of the host filesystem. Guest
//! path comparisons are case-insensitive, so each component is resolved
//! against the host directory listing when an exact match is missing.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use karst_base::ucs2;
use karst_mem::GuestAddr;

use crate::drive::{DriveMedia, DriveNumber};
use crate::path as gpath;
use crate::ramfs::ListedDir;
use crate::vfs::{
    DirFilter, EntryInfo, Filesystem, FsError, OpenMode, SeekMode, VfsDir, VfsFile,
};

/// The host-backed provider.
#[derive(Default)]
pub struct PhysicalFs {
    roots: HashMap<DriveNumber, PathBuf>,
}

impl PhysicalFs {
    /// Creates a provider with no drives attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps an absolute guest path to a host path, resolving each
    /// component case-insensitively against what is on disk. Components
    /// that do not exist keep their guest casing (for creation).
    fn host_path(&self, guest_path: &str) -> Option<PathBuf> {
        let drive = gpath::drive_of(guest_path)?;
        let root = self.roots.get(&drive)?;
        let norm = gpath::normalize(guest_path);
        let rest = &norm[gpath::root_name(&norm).len()..];

        let mut host = root.clone();
        for part in rest.split('\\').filter(|p| !p.is_empty()) {
            let exact = host.join(part);
            if exact.exists() {
                host = exact;
                continue;
            }
            host = match find_insensitive(&host, part) {
                Some(found) => found,
                None => exact,
            };
        }
        Some(host)
    }
}

/// Scans `dir` for an entry matching `name` case-insensitively.
fn find_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let want = ucs2::fold_case(name);
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        if ucs2::fold_case(&entry.file_name().to_string_lossy()) == want {
            return Some(entry.path());
        }
    }
    None
}

impl Filesystem for PhysicalFs {
    fn name(&self) -> &str {
        "physical"
    }

    fn supports(&self, media: DriveMedia) -> bool {
        media == DriveMedia::Physical
    }

    fn mount(&mut self, drive: DriveNumber, host_root: Option<PathBuf>) -> bool {
        match host_root {
            Some(root) => {
                self.roots.insert(drive, root);
                true
            }
            None => {
                warn!("declining physical mount of {drive:?} without a host root");
                false
            }
        }
    }

    fn unmount(&mut self, drive: DriveNumber) {
        self.roots.remove(&drive);
    }

    fn handles(&self, drive: DriveNumber) -> bool {
        self.roots.contains_key(&drive)
    }

    fn open_file(&mut self, guest_path: &str, mode: OpenMode) -> Result<Box<dyn VfsFile>, FsError> {
        let host = self.host_path(guest_path).ok_or(FsError::NotFound)?;
        if !host.exists() {
            if !mode.writable() {
                return Err(FsError::NotFound);
            }
            if !host.parent().is_some_and(Path::exists) {
                return Err(FsError::PathNotFound);
            }
        }

        let mut options = fs::OpenOptions::new();
        options.read(mode.contains(OpenMode::READ) || !mode.writable());
        if mode.contains(OpenMode::WRITE) {
            options.write(true).create(true).truncate(true);
        } else if mode.contains(OpenMode::APPEND) {
            options.write(true).create(true);
        }
        let file = options.open(&host)?;
        Ok(Box::new(PhysicalFile {
            guest: gpath::normalize(guest_path),
            file,
            mode,
        }))
    }

    fn exist(&self, guest_path: &str) -> bool {
        self.host_path(guest_path).is_some_and(|p| p.exists())
    }

    fn delete_entry(&mut self, guest_path: &str) -> bool {
        let Some(host) = self.host_path(guest_path) else {
            return false;
        };
        if host.is_dir() {
            fs::remove_dir(&host).is_ok()
        } else {
            fs::remove_file(&host).is_ok()
        }
    }

    fn rename(&mut self, src: &str, dst: &str) -> bool {
        let (Some(src_host), Some(dst_host)) = (self.host_path(src), self.host_path(dst)) else {
            return false;
        };
        if !src_host.exists() || dst_host.exists() {
            return false;
        }
        fs::rename(src_host, dst_host).is_ok()
    }

    fn entry_info(&self, guest_path: &str) -> Option<EntryInfo> {
        let host = self.host_path(guest_path)?;
        let meta = fs::metadata(&host).ok()?;
        let norm = gpath::normalize(guest_path);
        Some(EntryInfo {
            name: gpath::filename(&norm),
            full_path: norm,
            size: meta.len(),
            is_dir: meta.is_dir(),
            raw_attrib: None,
            attrib: Default::default(),
            last_write: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
        })
    }

    fn open_dir(&self, guest_path: &str, filter: DirFilter) -> Option<Box<dyn VfsDir>> {
        let host = self.host_path(guest_path)?;
        if !host.is_dir() {
            return None;
        }
        let norm = gpath::normalize(guest_path);
        let mut entries: Vec<EntryInfo> = fs::read_dir(&host)
            .ok()?
            .flatten()
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if meta.is_dir() && !filter.contains(DirFilter::INCLUDE_DIRS) {
                    return None;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                Some(EntryInfo {
                    full_path: gpath::add_path(&norm, &name),
                    name,
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                    raw_attrib: None,
                    attrib: Default::default(),
                    last_write: 0,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Some(Box::new(ListedDir {
            path: norm,
            entries,
            cursor: 0,
        }))
    }

    fn create_dir(&mut self, guest_path: &str) -> bool {
        match self.host_path(guest_path) {
            Some(host) if !host.exists() => fs::create_dir(host).is_ok(),
            _ => false,
        }
    }

    fn create_dirs(&mut self, guest_path: &str) -> bool {
        match self.host_path(guest_path) {
            Some(host) if !host.exists() => fs::create_dir_all(host).is_ok(),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct PhysicalFile {
    guest: String,
    file: fs::File,
    mode: OpenMode,
}

impl VfsFile for PhysicalFile {
    fn path(&self) -> &str {
        &self.guest
    }

    fn size(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn tell(&self) -> u64 {
        // Stream position without moving it.
        self.file
            .try_clone()
            .and_then(|mut f| f.seek(SeekFrom::Current(0)))
            .unwrap_or(0)
    }

    fn seek(&mut self, offset: i64, whence: SeekMode) -> Option<u64> {
        let target = match whence {
            SeekMode::Address => return None,
            SeekMode::Begin => SeekFrom::Start(u64::try_from(offset).ok()?),
            SeekMode::Current => SeekFrom::Current(offset),
            SeekMode::End => SeekFrom::End(offset),
        };
        self.file.seek(target).ok()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.mode.contains(OpenMode::READ) && self.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        if !self.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        Ok(self.file.write(data)?)
    }

    fn resize(&mut self, size: u64) -> Result<(), FsError> {
        if !self.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        Ok(self.file.set_len(size)?)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(self.file.flush()?)
    }

    fn rom_address(&self) -> Option<GuestAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> (PhysicalFs, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "karst-physfs-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        let mut pfs = PhysicalFs::new();
        pfs.mount(DriveNumber::C, Some(root.clone()));
        (pfs, root)
    }

    #[test]
    fn create_write_reopen_read() {
        let (mut pfs, root) = mounted();
        let mut f = pfs.open_file("c:\\host.txt", OpenMode::WRITE).unwrap();
        f.write(b"guest data").unwrap();
        f.flush().unwrap();
        drop(f);

        let mut f = pfs.open_file("C:\\HOST.TXT", OpenMode::READ).unwrap();
        let mut buf = Vec::new();
        let mut tmp = [0u8; 32];
        let n = f.read(&mut tmp).unwrap();
        buf.extend_from_slice(&tmp[..n]);
        assert_eq!(buf, b"guest data");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn case_insensitive_resolution() {
        let (mut pfs, root) = mounted();
        fs::create_dir(root.join("MixedCase")).unwrap();
        fs::write(root.join("MixedCase/File.Bin"), b"x").unwrap();

        assert!(pfs.exist("c:\\mixedcase\\file.bin"));
        assert!(pfs
            .open_file("c:\\MIXEDCASE\\FILE.BIN", OpenMode::READ)
            .is_ok());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_parent_reports_path_not_found() {
        let (mut pfs, root) = mounted();
        assert_eq!(
            pfs.open_file("c:\\no\\such\\file", OpenMode::WRITE)
                .unwrap_err(),
            FsError::PathNotFound
        );
        let _ = fs::remove_dir_all(root);
    }
}
