//! In-memory filesystem provider.
//!
//! Backs writable drives when no host directory is attached, and gives
//! the test suites a hermetic medium. File content is shared between
//! open handles, so concurrent opens observe each other's writes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::trace;

use karst_mem::GuestAddr;

use crate::drive::{DriveMedia, DriveNumber};
use crate::path;
use crate::vfs::{
    DirFilter, EntryInfo, Filesystem, FsError, OpenMode, SeekMode, VfsDir, VfsFile,
};

type SharedContent = Rc<RefCell<Vec<u8>>>;

#[derive(Debug, Clone)]
struct RamNode {
    /// Original-case absolute path.
    display: String,
    is_dir: bool,
    content: SharedContent,
    last_write: u64,
}

/// The in-memory provider.
#[derive(Default)]
pub struct RamFs {
    drives: Vec<DriveNumber>,
    /// Nodes keyed by case-folded absolute path.
    nodes: BTreeMap<String, RamNode>,
    stamp: u64,
}

impl RamFs {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    fn is_drive_root(&self, folded: &str) -> bool {
        let trimmed = folded.trim_end_matches('\\');
        trimmed.len() == 2
            && path::drive_of(trimmed).is_some_and(|d| self.drives.contains(&d))
    }

    fn parent_exists(&self, folded: &str) -> bool {
        let parent = path::fold(&path::file_directory(folded));
        self.is_drive_root(&parent)
            || self
                .nodes
                .get(parent.trim_end_matches('\\'))
                .is_some_and(|n| n.is_dir)
    }

    fn children_of<'a>(&'a self, folded_dir: &'a str) -> impl Iterator<Item = &'a RamNode> + 'a {
        let prefix = format!("{}\\", folded_dir.trim_end_matches('\\'));
        let prefix_len = prefix.len();
        self.nodes.range(prefix.clone()..).take_while(move |(k, _)| k.starts_with(&prefix)).filter_map(
            move |(k, node)| {
                // Direct children only.
                (!k[prefix_len..].contains('\\')).then_some(node)
            },
        )
    }
}

impl Filesystem for RamFs {
    fn name(&self) -> &str {
        "ramfs"
    }

    fn supports(&self, media: DriveMedia) -> bool {
        media == DriveMedia::Physical
    }

    fn mount(&mut self, drive: DriveNumber, _host_root: Option<PathBuf>) -> bool {
        if !self.drives.contains(&drive) {
            self.drives.push(drive);
        }
        true
    }

    fn unmount(&mut self, drive: DriveNumber) {
        self.drives.retain(|d| *d != drive);
        let prefix = format!("{}:", drive.letter());
        self.nodes.retain(|k, _| !k.starts_with(&prefix));
    }

    fn handles(&self, drive: DriveNumber) -> bool {
        self.drives.contains(&drive)
    }

    fn open_file(&mut self, guest_path: &str, mode: OpenMode) -> Result<Box<dyn VfsFile>, FsError> {
        let folded = path::fold(guest_path);
        if let Some(node) = self.nodes.get(&folded) {
            if node.is_dir {
                return Err(FsError::AccessDenied);
            }
            if mode.contains(OpenMode::WRITE) {
                node.content.borrow_mut().clear();
            }
            let content = node.content.clone();
            let display = node.display.clone();
            if mode.writable() {
                let stamp = self.stamp();
                if let Some(node) = self.nodes.get_mut(&folded) {
                    node.last_write = stamp;
                }
            }
            return Ok(Box::new(RamFile::new(display, content, mode)));
        }

        if !mode.writable() {
            return Err(FsError::NotFound);
        }
        if !self.parent_exists(&folded) {
            return Err(FsError::PathNotFound);
        }

        trace!("ramfs: creating {guest_path}");
        let content: SharedContent = Rc::new(RefCell::new(Vec::new()));
        let stamp = self.stamp();
        self.nodes.insert(
            folded,
            RamNode {
                display: path::normalize(guest_path),
                is_dir: false,
                content: content.clone(),
                last_write: stamp,
            },
        );
        Ok(Box::new(RamFile::new(
            path::normalize(guest_path),
            content,
            mode,
        )))
    }

    fn exist(&self, guest_path: &str) -> bool {
        let folded = path::fold(guest_path);
        self.is_drive_root(&folded) || self.nodes.contains_key(folded.trim_end_matches('\\'))
    }

    fn delete_entry(&mut self, guest_path: &str) -> bool {
        let folded = path::fold(guest_path);
        match self.nodes.get(&folded) {
            Some(node) if node.is_dir => {
                if self.children_of(&folded).next().is_some() {
                    return false;
                }
                self.nodes.remove(&folded).is_some()
            }
            Some(_) => self.nodes.remove(&folded).is_some(),
            None => false,
        }
    }

    fn rename(&mut self, src: &str, dst: &str) -> bool {
        let src_key = path::fold(src);
        let dst_key = path::fold(dst);
        if self.nodes.contains_key(&dst_key) || !self.parent_exists(&dst_key) {
            return false;
        }
        let Some(mut node) = self.nodes.remove(&src_key) else {
            return false;
        };
        node.display = path::normalize(dst);
        node.last_write = self.stamp();
        self.nodes.insert(dst_key, node);
        true
    }

    fn entry_info(&self, guest_path: &str) -> Option<EntryInfo> {
        let folded = path::fold(guest_path);
        if self.is_drive_root(&folded) {
            return Some(dir_info(&path::normalize(guest_path), 0));
        }
        let node = self.nodes.get(folded.trim_end_matches('\\'))?;
        Some(node_info(node))
    }

    fn open_dir(&self, guest_path: &str, filter: DirFilter) -> Option<Box<dyn VfsDir>> {
        let folded = path::fold(guest_path);
        let folded = folded.trim_end_matches('\\').to_owned();
        let is_root = self.is_drive_root(&folded);
        if !is_root && !self.nodes.get(&folded).is_some_and(|n| n.is_dir) {
            return None;
        }

        let entries: Vec<EntryInfo> = self
            .children_of(&folded)
            .filter(|node| !node.is_dir || filter.contains(DirFilter::INCLUDE_DIRS))
            .map(node_info)
            .collect();
        Some(Box::new(ListedDir {
            path: path::normalize(guest_path),
            entries,
            cursor: 0,
        }))
    }

    fn create_dir(&mut self, guest_path: &str) -> bool {
        let folded = path::fold(guest_path);
        let folded = folded.trim_end_matches('\\').to_owned();
        if self.nodes.contains_key(&folded) || self.is_drive_root(&folded) {
            return false;
        }
        if !self.parent_exists(&folded) {
            return false;
        }
        let stamp = self.stamp();
        self.nodes.insert(
            folded,
            RamNode {
                display: path::normalize(guest_path.trim_end_matches('\\')),
                is_dir: true,
                content: Rc::new(RefCell::new(Vec::new())),
                last_write: stamp,
            },
        );
        true
    }

    fn create_dirs(&mut self, guest_path: &str) -> bool {
        let norm = path::normalize(guest_path.trim_end_matches('\\'));
        let root = path::root_name(&norm);
        if root.is_empty() {
            return false;
        }
        let rest = &norm[root.len()..];
        let mut current = root.trim_end_matches('\\').to_owned();
        let mut created = false;
        for part in rest.split('\\').filter(|p| !p.is_empty()) {
            current = format!("{current}\\{part}");
            let folded = path::fold(&current);
            if !self.nodes.contains_key(&folded) {
                if !self.create_dir(&current) {
                    return false;
                }
                created = true;
            }
        }
        created
    }
}

fn node_info(node: &RamNode) -> EntryInfo {
    EntryInfo {
        name: path::filename(&node.display),
        full_path: node.display.clone(),
        size: node.content.borrow().len() as u64,
        is_dir: node.is_dir,
        raw_attrib: None,
        attrib: Default::default(),
        last_write: node.last_write,
    }
}

fn dir_info(full_path: &str, last_write: u64) -> EntryInfo {
    EntryInfo {
        name: path::filename(full_path),
        full_path: full_path.to_owned(),
        size: 0,
        is_dir: true,
        raw_attrib: None,
        attrib: Default::default(),
        last_write,
    }
}

/// Directory iterator over a pre-collected entry list.
pub(crate) struct ListedDir {
    pub(crate) path: String,
    pub(crate) entries: Vec<EntryInfo>,
    pub(crate) cursor: usize,
}

impl VfsDir for ListedDir {
    fn path(&self) -> &str {
        &self.path
    }

    fn peek(&mut self) -> Option<EntryInfo> {
        self.entries.get(self.cursor).cloned()
    }

    fn next_entry(&mut self) -> Option<EntryInfo> {
        let entry = self.entries.get(self.cursor).cloned();
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }
}

#[derive(Debug)]
struct RamFile {
    path: String,
    content: SharedContent,
    pos: u64,
    mode: OpenMode,
}

impl RamFile {
    fn new(path: String, content: SharedContent, mode: OpenMode) -> Self {
        Self {
            path,
            content,
            pos: 0,
            mode,
        }
    }
}

impl VfsFile for RamFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> u64 {
        self.content.borrow().len() as u64
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: i64, whence: SeekMode) -> Option<u64> {
        let base = match whence {
            SeekMode::Address => return None,
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
        if !self.mode.contains(OpenMode::READ) {
            return Err(FsError::AccessDenied);
        }
        let content = self.content.borrow();
        let start = (self.pos as usize).min(content.len());
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        drop(content);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        if !self.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        let mut content = self.content.borrow_mut();
        let end = self.pos as usize + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[self.pos as usize..end].copy_from_slice(data);
        drop(content);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn resize(&mut self, size: u64) -> Result<(), FsError> {
        if !self.mode.writable() {
            return Err(FsError::AccessDenied);
        }
        self.content.borrow_mut().resize(size as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }

    fn rom_address(&self) -> Option<GuestAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> RamFs {
        let mut fs = RamFs::new();
        fs.mount(DriveNumber::C, None);
        fs
    }

    #[test]
    fn create_write_read_roundtrip() {
        let mut fs = mounted();
        let mut f = fs
            .open_file("c:\\a.txt", OpenMode::WRITE | OpenMode::READ)
            .unwrap();
        f.write(b"hello").unwrap();
        f.seek(0, SeekMode::Begin).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert!(fs.exist("C:\\A.TXT"));
    }

    #[test]
    fn missing_file_and_missing_parent() {
        let mut fs = mounted();
        assert_eq!(
            fs.open_file("c:\\none", OpenMode::READ).unwrap_err(),
            FsError::NotFound
        );
        assert_eq!(
            fs.open_file("c:\\no\\dir\\f", OpenMode::WRITE).unwrap_err(),
            FsError::PathNotFound
        );
    }

    #[test]
    fn shared_content_between_handles() {
        let mut fs = mounted();
        let mut w = fs.open_file("c:\\s.bin", OpenMode::WRITE).unwrap();
        w.write(b"abc").unwrap();
        let mut r = fs.open_file("c:\\s.bin", OpenMode::READ).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(r.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn write_mode_truncates_append_does_not() {
        let mut fs = mounted();
        fs.open_file("c:\\t", OpenMode::WRITE)
            .unwrap()
            .write(b"abcdef")
            .unwrap();

        let f = fs.open_file("c:\\t", OpenMode::APPEND).unwrap();
        assert_eq!(f.size(), 6);
        drop(f);

        let f = fs.open_file("c:\\t", OpenMode::WRITE).unwrap();
        assert_eq!(f.size(), 0);
    }

    #[test]
    fn directories_and_iteration() {
        let mut fs = mounted();
        assert!(fs.create_dir("c:\\docs"));
        assert!(!fs.create_dir("c:\\docs"));
        assert!(fs.create_dirs("c:\\deep\\nest\\dir"));
        fs.open_file("c:\\docs\\a.txt", OpenMode::WRITE).unwrap();
        fs.open_file("c:\\docs\\b.txt", OpenMode::WRITE).unwrap();

        let mut dir = fs.open_dir("c:\\docs", DirFilter::empty()).unwrap();
        assert_eq!(dir.next_entry().unwrap().name, "a.txt");
        assert_eq!(dir.next_entry().unwrap().name, "b.txt");
        assert!(dir.next_entry().is_none());
    }

    #[test]
    fn rename_and_delete() {
        let mut fs = mounted();
        fs.open_file("c:\\old", OpenMode::WRITE)
            .unwrap()
            .write(b"x")
            .unwrap();
        assert!(fs.rename("c:\\old", "c:\\new"));
        assert!(!fs.exist("c:\\old"));
        assert!(fs.exist("c:\\new"));
        assert!(fs.delete_entry("c:\\new"));
        assert!(!fs.delete_entry("c:\\new"));
    }

    #[test]
    fn delete_refuses_nonempty_dir() {
        let mut fs = mounted();
        fs.create_dir("c:\\d");
        fs.open_file("c:\\d\\f", OpenMode::WRITE).unwrap();
        assert!(!fs.delete_entry("c:\\d"));
        assert!(fs.delete_entry("c:\\d\\f"));
        assert!(fs.delete_entry("c:\\d"));
    }
}
