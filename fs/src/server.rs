//! The guest file server.
//!
//! Owns the session working directories, the FS node table and the
//! change-notification registry, and translates every guest request into
//! VFS operations plus exactly one request-status write.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, trace, warn};

use karst_base::status;
use karst_kernel::{IpcContext, Kernel, NotifyInfo, OpcodeTable, ProcessId, Service, SessionId};
use karst_mem::AddressSpace;

use crate::drive::{Drive, DriveMedia, DriveNumber, IoAttrib, DRIVE_COUNT};
use crate::node::{
    compose_share, guest_mode, FsNode, FsNodeTable, NodeHandle, ShareMode,
};
use crate::notify::{match_all, wildcard_to_regex, NotifyEntry, NotifyKind};
use crate::ops::{drive_attrib, drive_list_flag, entry_attrib, fs_op, media_attrib, media_type, volume_query};
use crate::path;
use crate::ramfs::ListedDir;
use crate::vfs::{DirFilter, EntryInfo, FsError, OpenMode, SeekMode, Vfs};

/// The kernel-wide name of the file server.
pub const SERVER_NAME: &str = "!FileServer";

/// Position sentinel meaning "use the current offset".
const CURRENT_POSITION: i32 = i32::MIN;

/// Largest size `FileSetSize` accepts, exclusive.
const MAX_SET_SIZE: i64 = 1 << 30;

/// Entry package size without the name payload.
const ENTRY_BASE_SIZE: usize = 24;

/// The file server.
pub struct FsServer {
    vfs: Rc<RefCell<Vfs>>,
    session_paths: HashMap<SessionId, String>,
    nodes: FsNodeTable,
    notify_entries: Vec<NotifyEntry>,
    should_notify_failures: bool,
    temp_counter: u32,
}

impl FsServer {
    /// Creates the server over a shared VFS.
    pub fn new(vfs: Rc<RefCell<Vfs>>) -> Self {
        Self {
            vfs,
            session_paths: HashMap::new(),
            nodes: FsNodeTable::new(),
            notify_entries: Vec::new(),
            should_notify_failures: false,
            temp_counter: 0,
        }
    }

    const OPS: OpcodeTable<FsServer> = OpcodeTable {
        entries: &[
            (fs_op::ENTRY, FsServer::entry),
            (fs_op::FILE_OPEN, FsServer::file_open),
            (fs_op::FILE_CREATE, FsServer::file_create),
            (fs_op::FILE_REPLACE, FsServer::file_replace),
            (fs_op::FILE_TEMP, FsServer::file_temp),
            (fs_op::FILE_READ, FsServer::file_read),
            (fs_op::FILE_WRITE, FsServer::file_write),
            (fs_op::FILE_SIZE, FsServer::file_size),
            (fs_op::FILE_SET_SIZE, FsServer::file_set_size),
            (fs_op::FILE_SEEK, FsServer::file_seek),
            (fs_op::FILE_FLUSH, FsServer::file_flush),
            (fs_op::FILE_RENAME, FsServer::file_rename),
            (fs_op::FILE_DUPLICATE, FsServer::file_duplicate),
            (fs_op::FILE_ADOPT, FsServer::file_adopt),
            (fs_op::FILE_SUB_CLOSE, FsServer::file_close),
            (fs_op::FILE_DRIVE, FsServer::file_drive),
            (fs_op::FILE_NAME, FsServer::file_name),
            (fs_op::FILE_FULL_NAME, FsServer::file_full_name),
            (fs_op::IS_FILE_IN_ROM, FsServer::is_file_in_rom),
            (fs_op::DIR_OPEN, FsServer::open_dir),
            (fs_op::DIR_SUB_CLOSE, FsServer::close_dir),
            (fs_op::DIR_READ_ONE, FsServer::read_dir),
            (fs_op::DIR_READ_PACKED, FsServer::read_dir_packed),
            (fs_op::DRIVE_LIST, FsServer::drive_list),
            (fs_op::DRIVE, FsServer::drive),
            (fs_op::VOLUME, FsServer::volume),
            (fs_op::QUERY_VOLUME_INFO_EXT, FsServer::query_drive_info_ext),
            (fs_op::SESSION_PATH, FsServer::session_path_op),
            (fs_op::SET_SESSION_PATH, FsServer::set_session_path),
            (fs_op::SESSION_TO_PRIVATE, FsServer::set_session_to_private),
            (fs_op::PRIVATE_PATH, FsServer::private_path),
            (fs_op::SYNCHRONISE_DRIVE_THREAD, FsServer::synchronize_driver),
            (fs_op::NOTIFY_CHANGE, FsServer::notify_change),
            (fs_op::NOTIFY_CHANGE_EX, FsServer::notify_change_ex),
            (fs_op::MK_DIR, FsServer::mkdir),
            (fs_op::DELETE, FsServer::delete_entry),
            (fs_op::RENAME, FsServer::rename),
            (fs_op::REPLACE, FsServer::replace),
            (fs_op::SET_NOTIFY_USER, FsServer::set_should_notify_failure),
        ],
    };

    // ── Helpers ─────────────────────────────────────────────────────────

    fn session_path(&self, session: SessionId) -> String {
        self.session_paths
            .get(&session)
            .cloned()
            .unwrap_or_else(|| "c:\\".to_owned())
    }

    /// Resolves a wide descriptor argument against the session path.
    fn resolve_arg(&self, ctx: &IpcContext<'_>, slot: usize) -> Option<String> {
        let raw = ctx.get_str(slot)?;
        Some(path::absolute_path(&raw, &self.session_path(ctx.session())))
    }

    /// Fetches the file node named by the handle in `slot`.
    fn file_handle(&mut self, ctx: &IpcContext<'_>, slot: usize) -> Result<u32, i32> {
        let handle = ctx.get_u32(slot).ok_or(status::ARGUMENT)?;
        match self.nodes.get(handle) {
            Some(node) if node.is_file() => Ok(handle),
            _ => Err(status::BAD_HANDLE),
        }
    }

    fn dir_handle(&mut self, ctx: &IpcContext<'_>, slot: usize) -> Result<u32, i32> {
        let handle = ctx.get_u32(slot).ok_or(status::ARGUMENT)?;
        match self.nodes.get(handle) {
            Some(node) if node.is_dir() => Ok(handle),
            _ => Err(status::BAD_HANDLE),
        }
    }

    fn fire_notifies(
        &mut self,
        mem: &mut AddressSpace,
        kernel: &mut Kernel,
        guest_path: &str,
        kind: NotifyKind,
    ) {
        let mut idx = 0;
        while idx < self.notify_entries.len() {
            if self.notify_entries[idx].matches(guest_path, kind) {
                let entry = self.notify_entries.remove(idx);
                debug!("change notify fired for {guest_path}");
                kernel.complete(mem, entry.notify, status::NONE);
            } else {
                idx += 1;
            }
        }
    }

    /// Opens (or shares) a node for `path`, enforcing the share-mode
    /// composition rules. Returns the 1-based FS handle.
    fn new_node(
        &mut self,
        owner: ProcessId,
        guest_path: &str,
        mode: u32,
        overwrite: bool,
        temporary: bool,
    ) -> Result<u32, i32> {
        let real_mode = mode & !guest_mode::IDENTITY_IGNORED;
        let share = ShareMode::from_guest_mode(real_mode);

        let mut access = if mode & guest_mode::STREAM_TEXT == 0 {
            OpenMode::BIN
        } else {
            OpenMode::empty()
        };
        if real_mode & guest_mode::WRITE != 0 {
            access |= if overwrite {
                OpenMode::WRITE
            } else {
                OpenMode::APPEND
            };
        } else {
            access |= OpenMode::READ;
        }

        if access.writable() && share == ShareMode::ReadersOnly {
            return Err(status::ACCESS_DENIED);
        }

        let existing = self.nodes.find_file(guest_path);
        let Some(existing_handle) = existing else {
            let file = self
                .vfs
                .borrow_mut()
                .open_file(guest_path, access)
                .map_err(fs_error_to_status)?;
            let handle = self.nodes.add(FsNode {
                handle: NodeHandle::File(file),
                open_mode: access,
                guest_mode: real_mode,
                share,
                owner,
                temporary,
            });
            return if handle == 0 {
                Err(status::NO_MEMORY)
            } else {
                Ok(handle)
            };
        };

        let (existing_share, existing_writer, existing_owner, existing_mode) = {
            let node = self.nodes.get(existing_handle).expect("found above");
            (
                node.share,
                node.open_mode.writable(),
                node.owner,
                node.guest_mode,
            )
        };

        let composed = compose_share(
            share,
            access.writable(),
            existing_share,
            existing_writer,
            owner == existing_owner,
        )
        .ok_or_else(|| {
            trace!("share composition denied for {guest_path}");
            status::ACCESS_DENIED
        })?;

        if let Some(node) = self.nodes.get(existing_handle) {
            node.share = composed;
        }

        // Identical modes share the very same handle.
        if existing_mode == real_mode {
            return Ok(existing_handle);
        }

        let file = self
            .vfs
            .borrow_mut()
            .open_file(guest_path, access)
            .map_err(fs_error_to_status)?;
        let handle = self.nodes.add(FsNode {
            handle: NodeHandle::File(file),
            open_mode: access,
            guest_mode: real_mode,
            share: composed,
            owner,
            temporary,
        });
        if handle == 0 {
            Err(status::NO_MEMORY)
        } else {
            Ok(handle)
        }
    }

    fn new_subsession(
        &mut self,
        ctx: &mut IpcContext<'_>,
        guest_path: String,
        mode: u32,
        overwrite: bool,
        temporary: bool,
    ) {
        let parent = path::file_directory(&guest_path);
        if !self.vfs.borrow().exist(&parent) {
            trace!("base directory of {guest_path} not found");
            ctx.set_status(status::PATH_NOT_FOUND);
            return;
        }

        let Some(owner) = ctx.sender_process() else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        info!("opening file: {guest_path}");
        match self.new_node(owner, &guest_path, mode, overwrite, temporary) {
            Ok(handle) => {
                write_i32_pkg(ctx, 3, handle as i32);
                if overwrite {
                    self.fire_notifies(
                        &mut *ctx.mem,
                        &mut *ctx.kernel,
                        &guest_path,
                        NotifyKind::ENTRY | NotifyKind::FILE,
                    );
                }
                ctx.set_status(status::NONE);
            }
            Err(code) => ctx.set_status(code),
        }
    }

    // ── File subsessions ────────────────────────────────────────────────

    fn file_open(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(name), Some(mode)) = (self.resolve_arg(ctx, 0), ctx.get_u32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        if !self.vfs.borrow().exist(&name) {
            trace!("open of missing path {name}");
            ctx.set_status(status::NOT_FOUND);
            return;
        }
        self.new_subsession(ctx, name, mode, false, false);
    }

    fn file_create(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(name), Some(mode)) = (self.resolve_arg(ctx, 0), ctx.get_u32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        if self.vfs.borrow().exist(&name) {
            ctx.set_status(status::ALREADY_EXISTS);
            return;
        }
        self.new_subsession(ctx, name, mode, true, false);
    }

    fn file_replace(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(name), Some(mode)) = (self.resolve_arg(ctx, 0), ctx.get_u32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        self.new_subsession(ctx, name, mode, true, false);
    }

    fn file_temp(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(dir), Some(mode)) = (self.resolve_arg(ctx, 0), ctx.get_u32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        if !self.vfs.borrow().exist(&dir) {
            ctx.set_status(status::PATH_NOT_FOUND);
            return;
        }

        self.temp_counter += 1;
        let name = path::add_path(&dir, &format!("temp{:08x}", self.temp_counter));
        write_wide_out(ctx, 2, &name);
        self.new_subsession(ctx, name, mode | guest_mode::WRITE, true, true);
    }

    fn file_read(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let (Some(len), Some(pos_arg)) = (ctx.get_i32(1), ctx.get_i32(2)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let data = {
            let node = self.nodes.get(handle).expect("validated handle");
            if !node.open_mode.contains(OpenMode::READ) {
                ctx.set_status(status::ACCESS_DENIED);
                return;
            }
            let file = node.file().expect("file node");
            let pos = if pos_arg == CURRENT_POSITION || pos_arg < 0 {
                file.tell()
            } else {
                pos_arg as u64
            };
            file.seek(pos as i64, SeekMode::Begin);

            let size = file.size();
            let want = len.max(0) as u64;
            let clamped = want.min(size.saturating_sub(pos.min(size)));
            let mut buf = vec![0u8; clamped as usize];
            match file.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    buf
                }
                Err(err) => {
                    warn!("read failed: {err}");
                    ctx.set_status(status::GENERAL);
                    return;
                }
            }
        };

        let wrote = ctx.write_bytes(0, &data);
        if wrote != status::NONE {
            ctx.set_status(wrote);
            return;
        }
        ctx.set_status(status::NONE);
    }

    fn file_write(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let Some(data) = ctx.get_bytes(0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let (Some(len), Some(pos_arg)) = (ctx.get_i32(1), ctx.get_i32(2)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let (grew, written_path) = {
            let node = self.nodes.get(handle).expect("validated handle");
            if !node.open_mode.writable() {
                ctx.set_status(status::ACCESS_DENIED);
                return;
            }
            let file = node.file().expect("file node");
            let before = file.size();
            let pos = if pos_arg == CURRENT_POSITION || pos_arg < 0 {
                file.tell()
            } else {
                pos_arg as u64
            };
            // Never seek past the current end of file.
            let target = if pos > before { file.tell().min(before) } else { pos };
            file.seek(target as i64, SeekMode::Begin);

            let len = (len.max(0) as usize).min(data.len());
            if let Err(err) = file.write(&data[..len]) {
                warn!("write failed: {err}");
                ctx.set_status(status::GENERAL);
                return;
            }
            trace!("wrote {len} bytes to {}", file.path());
            (file.size() > before, file.path().to_owned())
        };

        if grew {
            self.fire_notifies(&mut *ctx.mem, &mut *ctx.kernel, &written_path, NotifyKind::WRITE);
        }
        ctx.set_status(status::NONE);
    }

    fn file_size(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let size = {
            let node = self.nodes.get(handle).expect("validated handle");
            node.file().expect("file node").size()
        };

        // 64-bit sizes on v10 onwards.
        if ctx.kernel.version().wide_file_sizes() {
            let mut pkg = [0u8; 8];
            LittleEndian::write_u64(&mut pkg, size);
            write_pkg_checked(ctx, 0, &pkg);
        } else {
            let mut pkg = [0u8; 4];
            LittleEndian::write_u32(&mut pkg, size as u32);
            write_pkg_checked(ctx, 0, &pkg);
        }
    }

    fn file_set_size(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let Some(size) = ctx.get_i32(0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let touched_path = {
            let node = self.nodes.get(handle).expect("validated handle");
            if !node.open_mode.writable() {
                ctx.set_status(status::PERMISSION_DENIED);
                return;
            }
            let file = node.file().expect("file node");
            let current = file.size();
            if size as i64 == current as i64 {
                ctx.set_status(status::NONE);
                return;
            }
            if i64::from(size) >= MAX_SET_SIZE {
                warn!("refusing resize to {size} bytes");
                ctx.set_status(status::TOO_BIG);
                return;
            }
            if file.resize(size.max(0) as u64).is_err() {
                ctx.set_status(status::GENERAL);
                return;
            }
            // Truncation clamps the offset.
            if (size.max(0) as u64) < current && file.tell() > size.max(0) as u64 {
                file.seek(i64::from(size.max(0)), SeekMode::Begin);
            }
            file.path().to_owned()
        };

        self.fire_notifies(&mut *ctx.mem, &mut *ctx.kernel, &touched_path, NotifyKind::WRITE);
        ctx.set_status(status::NONE);
    }

    fn file_seek(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let (Some(offset), Some(mode)) = (ctx.get_i32(0), ctx.get_i32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let whence = match mode {
            0 => SeekMode::Address,
            1 => SeekMode::Begin,
            2 => SeekMode::Current,
            3 => SeekMode::End,
            _ => {
                ctx.set_status(status::ARGUMENT);
                return;
            }
        };

        let result = {
            let node = self.nodes.get(handle).expect("validated handle");
            node.file().expect("file node").seek(i64::from(offset), whence)
        };
        let Some(new_pos) = result else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        if ctx.kernel.version().wide_file_sizes() {
            let mut pkg = [0u8; 8];
            LittleEndian::write_u64(&mut pkg, new_pos);
            write_pkg_checked(ctx, 2, &pkg);
        } else {
            let mut pkg = [0u8; 4];
            LittleEndian::write_u32(&mut pkg, new_pos as u32);
            write_pkg_checked(ctx, 2, &pkg);
        }
    }

    fn file_flush(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let node = self.nodes.get(handle).expect("validated handle");
        match node.file().expect("file node").flush() {
            Ok(()) => ctx.set_status(status::NONE),
            Err(_) => ctx.set_status(status::GENERAL),
        }
    }

    fn file_rename(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let Some(new_path) = self.resolve_arg(ctx, 0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let (old_path, last_pos, reopen_mode) = {
            let node = self.nodes.get(handle).expect("validated handle");
            let file = node.file().expect("file node");
            (file.path().to_owned(), file.tell(), reopen_mode(node.open_mode))
        };

        if !self.vfs.borrow_mut().rename(&old_path, &new_path) {
            ctx.set_status(status::GENERAL);
            return;
        }

        // Reopen under the new name, restoring the offset.
        match self.vfs.borrow_mut().open_file(&new_path, reopen_mode) {
            Ok(mut file) => {
                file.seek(last_pos as i64, SeekMode::Begin);
                let node = self.nodes.get(handle).expect("validated handle");
                node.handle = NodeHandle::File(file);
            }
            Err(err) => {
                warn!("reopen after rename failed: {err}");
                ctx.set_status(status::GENERAL);
                return;
            }
        }

        self.fire_notifies(&mut *ctx.mem, &mut *ctx.kernel, &new_path, NotifyKind::ENTRY);
        ctx.set_status(status::NONE);
    }

    fn file_duplicate(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(target) = ctx.get_u32(0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let Some((dup_path, pos, mode, guest_mode_word, share, owner, temporary)) =
            self.nodes.get(target).and_then(|node| {
                let open_mode = node.open_mode;
                let guest_mode_word = node.guest_mode;
                let share = node.share;
                let owner = node.owner;
                let temporary = node.temporary;
                let file = node.file()?;
                Some((
                    file.path().to_owned(),
                    file.tell(),
                    open_mode,
                    guest_mode_word,
                    share,
                    owner,
                    temporary,
                ))
            })
        else {
            ctx.set_status(status::NOT_FOUND);
            return;
        };

        // The duplicate is a full copy of the node record, offset
        // included, backed by its own VFS handle.
        match self.vfs.borrow_mut().open_file(&dup_path, reopen_mode(mode)) {
            Ok(mut file) => {
                file.seek(pos as i64, SeekMode::Begin);
                let handle = self.nodes.add(FsNode {
                    handle: NodeHandle::File(file),
                    open_mode: mode,
                    guest_mode: guest_mode_word,
                    share,
                    owner,
                    temporary,
                });
                if handle == 0 {
                    ctx.set_status(status::NO_MEMORY);
                    return;
                }
                write_i32_pkg(ctx, 3, handle as i32);
                ctx.set_status(status::NONE);
            }
            Err(err) => ctx.set_status(fs_error_to_status(err)),
        }
    }

    fn file_adopt(&mut self, ctx: &mut IpcContext<'_>) {
        trace!("FileAdopt stubbed");
        ctx.set_status(status::NONE);
    }

    fn file_close(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let node = self.nodes.close(handle).expect("validated handle");
        if node.temporary {
            // Idempotent: the path may already be gone if the session was
            // torn down concurrently.
            self.vfs.borrow_mut().delete_entry(node.path());
        }
        ctx.set_status(status::NONE);
    }

    fn file_drive(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let drive_num = {
            let node = self.nodes.get(handle).expect("validated handle");
            path::drive_of(node.path())
        };
        let Some(drive_num) = drive_num else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let info = {
            let vfs = self.vfs.borrow();
            encode_drive_info(vfs.drive(drive_num))
        };
        write_i32_pkg(ctx, 0, drive_num.index() as i32);
        let wrote = ctx.write_pkg(1, &info);
        if wrote != status::NONE {
            ctx.set_status(wrote);
            return;
        }
        ctx.set_status(status::NONE);
    }

    fn file_name(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let name = {
            let node = self.nodes.get(handle).expect("validated handle");
            path::filename(node.path())
        };
        let wrote = ctx.write_str(0, &name);
        ctx.set_status(wrote);
    }

    fn file_full_name(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.file_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let name = {
            let node = self.nodes.get(handle).expect("validated handle");
            node.path().to_owned()
        };
        let wrote = ctx.write_str(0, &name);
        ctx.set_status(wrote);
    }

    fn is_file_in_rom(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(name) = self.resolve_arg(ctx, 0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let rom_addr = match self.vfs.borrow_mut().open_file(&name, OpenMode::READ | OpenMode::BIN)
        {
            Ok(file) => file.rom_address().unwrap_or(0),
            Err(err) => {
                ctx.set_status(fs_error_to_status(err));
                return;
            }
        };
        let mut pkg = [0u8; 4];
        LittleEndian::write_u32(&mut pkg, rom_addr);
        write_pkg_checked(ctx, 1, &pkg);
    }

    // ── Directories ─────────────────────────────────────────────────────

    fn open_dir(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(raw), Some(attrib)) = (self.resolve_arg(ctx, 0), ctx.get_u32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        trace!("opening directory: {raw}");

        let mut filter = DirFilter::empty();
        if attrib & entry_attrib::DIR != 0 {
            filter |= DirFilter::INCLUDE_DIRS;
        }
        if attrib & entry_attrib::HIDDEN != 0 {
            filter |= DirFilter::INCLUDE_HIDDEN;
        }

        // A wildcard leaf iterates its parent with the pattern applied.
        let leaf = path::filename(&raw);
        let (dir_path, pattern) = if leaf.contains('*') || leaf.contains('?') {
            (path::file_directory(&raw), Some(wildcard_to_regex(&leaf)))
        } else {
            (raw.clone(), None)
        };

        let Some(mut dir) = self.vfs.borrow().open_dir(&dir_path, filter) else {
            ctx.set_status(status::PATH_NOT_FOUND);
            return;
        };

        let dir: Box<dyn crate::vfs::VfsDir> = match pattern {
            Some(regex) => {
                let mut entries = Vec::new();
                while let Some(entry) = dir.next_entry() {
                    if regex.is_match(&path::fold(&entry.name)) {
                        entries.push(entry);
                    }
                }
                Box::new(ListedDir {
                    path: dir_path,
                    entries,
                    cursor: 0,
                })
            }
            None => dir,
        };

        let Some(owner) = ctx.sender_process() else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let handle = self.nodes.add(FsNode {
            handle: NodeHandle::Dir(dir),
            open_mode: OpenMode::READ,
            guest_mode: 0,
            share: ShareMode::Any,
            owner,
            temporary: false,
        });
        if handle == 0 {
            ctx.set_status(status::NO_MEMORY);
            return;
        }
        write_i32_pkg(ctx, 3, handle as i32);
        ctx.set_status(status::NONE);
    }

    fn close_dir(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.dir_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        self.nodes.close(handle);
        ctx.set_status(status::NONE);
    }

    fn read_dir(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.dir_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let entry = {
            let node = self.nodes.get(handle).expect("validated handle");
            node.dir().expect("dir node").next_entry()
        };
        let Some(entry) = entry else {
            ctx.set_status(status::EOF);
            return;
        };

        let pkg = encode_entry(&entry, &entry.name);
        write_pkg_checked(ctx, 0, &pkg);
    }

    fn read_dir_packed(&mut self, ctx: &mut IpcContext<'_>) {
        let handle = match self.dir_handle(ctx, 3) {
            Ok(h) => h,
            Err(code) => return ctx.set_status(code),
        };
        let Some(max_bytes) = ctx.get_u32(0).and_then(|addr| {
            karst_mem::Descriptor::parse(ctx.mem, addr)
                .ok()
                .map(|d| d.max_len as usize)
        }) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let wide_tail = ctx.kernel.version().wide_file_sizes();
        let mut out = Vec::new();
        let mut hit_end = false;
        loop {
            let entry = {
                let node = self.nodes.get(handle).expect("validated handle");
                node.dir().expect("dir node").peek()
            };
            let Some(entry) = entry else {
                hit_end = true;
                break;
            };

            let mut pkg = encode_entry(&entry, &entry.name);
            // Entries are 4-byte aligned in the packed stream.
            while pkg.len() % 4 != 0 {
                pkg.push(0);
            }
            if wide_tail {
                pkg.extend_from_slice(&[0u8; 8]);
            }
            if out.len() + pkg.len() > max_bytes {
                break;
            }
            out.extend_from_slice(&pkg);
            let node = self.nodes.get(handle).expect("validated handle");
            node.dir().expect("dir node").next_entry();
        }

        let wrote = ctx.write_bytes(0, &out);
        if wrote != status::NONE {
            ctx.set_status(wrote);
            return;
        }
        trace!("packed {} bytes of directory entries", out.len());
        ctx.set_status(if hit_end { status::EOF } else { status::NONE });
    }

    // ── Drives & volumes ────────────────────────────────────────────────

    fn drive_list(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(flags) = ctx.get_u32(1) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let mut list = [0u8; DRIVE_COUNT];
        {
            let vfs = self.vfs.borrow();
            for (idx, slot) in vfs.drive_table().iter().enumerate() {
                if slot.media == DriveMedia::None {
                    continue;
                }
                let hidden = slot.attrib.contains(IoAttrib::HIDDEN);
                let include = if flags & drive_list_flag::HIDDEN != 0 {
                    if flags & drive_list_flag::EXCLUDE != 0 {
                        !hidden
                    } else {
                        hidden
                    }
                } else {
                    !hidden
                };
                if include {
                    list[idx] = 1;
                }
            }
        }

        let wrote = ctx.write_bytes(0, &list);
        if wrote != status::NONE {
            ctx.set_status(status::ARGUMENT);
            return;
        }
        ctx.set_status(status::NONE);
    }

    fn drive(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(drive_idx) = ctx.get_i32(1) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let info = {
            let vfs = self.vfs.borrow();
            let drive = DriveNumber::from_index(drive_idx.max(0) as usize)
                .and_then(|d| vfs.drive(d));
            encode_drive_info(drive)
        };
        write_pkg_checked(ctx, 0, &info);
    }

    fn volume(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(drive_idx) = ctx.get_i32(1) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };

        let mut pkg = [0u8; 40];
        {
            let vfs = self.vfs.borrow();
            let drive = DriveNumber::from_index(drive_idx.max(0) as usize)
                .and_then(|d| vfs.drive(d));
            pkg[..20].copy_from_slice(&encode_drive_info(drive));
        }
        LittleEndian::write_u32(&mut pkg[20..24], drive_idx.max(0) as u32);
        // Capacity figures are synthesised; nothing tracks real usage.
        LittleEndian::write_u64(&mut pkg[24..32], 1 << 30);
        LittleEndian::write_u64(&mut pkg[32..40], 1 << 30);

        write_pkg_checked(ctx, 0, &pkg);
    }

    fn query_drive_info_ext(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(drive_idx), Some(cmd)) = (ctx.get_i32(0), ctx.get_i32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let mounted = {
            let vfs = self.vfs.borrow();
            DriveNumber::from_index(drive_idx.max(0) as usize)
                .and_then(|d| vfs.drive(d))
                .is_some()
        };
        if !mounted {
            ctx.set_status(status::NOT_FOUND);
            return;
        }

        match cmd {
            volume_query::FILE_SYSTEM_SUB_TYPE => {
                let wrote = ctx.write_str(2, "FAT32");
                ctx.set_status(wrote);
            }
            volume_query::IS_DRIVE_SYNC | volume_query::IS_DRIVE_FINALISED => {
                let mut pkg = [0u8; 4];
                LittleEndian::write_u32(&mut pkg, 1);
                write_pkg_checked(ctx, 2, &pkg);
            }
            volume_query::IO_PARAM_INFO => {
                let mut pkg = [0u8; 24];
                LittleEndian::write_i32(&mut pkg[0..4], 512);
                LittleEndian::write_i32(&mut pkg[4..8], 4096);
                LittleEndian::write_i32(&mut pkg[8..12], 8192);
                LittleEndian::write_i32(&mut pkg[12..16], 16384);
                LittleEndian::write_u64(&mut pkg[16..24], 0xFFFF_FFFF);
                write_pkg_checked(ctx, 2, &pkg);
            }
            other => {
                warn!("unimplemented extended drive query {other}");
                ctx.set_status(status::NONE);
            }
        }
    }

    // ── Session state ───────────────────────────────────────────────────

    fn session_path_op(&mut self, ctx: &mut IpcContext<'_>) {
        let sp = self.session_path(ctx.session());
        let wrote = ctx.write_str(0, &sp);
        ctx.set_status(wrote);
    }

    fn set_session_path(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(new_path) = ctx.get_str(0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        self.session_paths.insert(ctx.session(), new_path);
        ctx.set_status(status::NONE);
    }

    fn set_session_to_private(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(ordinal) = ctx.get_i32(0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let Some(drive) = DriveNumber::from_index(ordinal.max(0) as usize) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let uid3 = ctx
            .sender_process()
            .and_then(|pid| ctx.kernel.process(pid))
            .map(|p| p.uids.uid3)
            .unwrap_or(0);

        let private = format!("{}:\\private\\{uid3:08x}\\", drive.letter());
        self.session_paths.insert(ctx.session(), private);
        ctx.set_status(status::NONE);
    }

    fn private_path(&mut self, ctx: &mut IpcContext<'_>) {
        let uid3 = ctx
            .sender_process()
            .and_then(|pid| ctx.kernel.process(pid))
            .map(|p| p.uids.uid3)
            .unwrap_or(0);
        let wrote = ctx.write_str(0, &format!("\\private\\{uid3:08x}\\"));
        ctx.set_status(wrote);
    }

    fn synchronize_driver(&mut self, ctx: &mut IpcContext<'_>) {
        ctx.set_status(status::NONE);
    }

    // ── Change notifications ────────────────────────────────────────────

    fn notify_change(&mut self, ctx: &mut IpcContext<'_>) {
        let kinds = NotifyKind::from_bits_truncate(ctx.get_u32(0).unwrap_or(NotifyKind::ALL.bits()));
        let notify = ctx.defer();
        self.notify_entries.push(NotifyEntry {
            pattern: match_all(),
            kinds,
            notify,
            session: ctx.session(),
        });
    }

    fn notify_change_ex(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(wildcard) = ctx.get_str(1) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        let kinds = NotifyKind::from_bits_truncate(ctx.get_u32(0).unwrap_or(NotifyKind::ALL.bits()));
        let notify = ctx.defer();
        trace!("notify requested with wildcard {wildcard:?}");
        self.notify_entries.push(NotifyEntry {
            pattern: wildcard_to_regex(&wildcard),
            kinds,
            notify,
            session: ctx.session(),
        });
    }

    // ── Entry-level operations ──────────────────────────────────────────

    fn entry(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(name) = self.resolve_arg(ctx, 0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        debug!("get entry of: {name}");

        let info = self.vfs.borrow().entry_info(&name);
        let Some(info) = info else {
            ctx.set_status(status::NOT_FOUND);
            return;
        };

        // The entry opcode reports the queried path, not the leaf.
        let pkg = encode_entry(&info, &info.full_path);
        write_pkg_checked(ctx, 1, &pkg);
    }

    fn mkdir(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(raw), Some(all)) = (ctx.get_str(0), ctx.get_i32(1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        // A trailing separator names the directory itself; otherwise the
        // leaf is a file name and only the directory part is created.
        let resolved = path::absolute_path(&raw, &self.session_path(ctx.session()));
        let target = if raw.ends_with('\\') || raw.ends_with('/') {
            resolved
        } else {
            path::file_directory(&resolved)
                .trim_end_matches('\\')
                .to_owned()
        };

        let created = if all != 0 {
            self.vfs.borrow_mut().create_dirs(&target)
        } else {
            self.vfs.borrow_mut().create_dir(&target)
        };
        if !created {
            ctx.set_status(status::ALREADY_EXISTS);
            return;
        }

        self.fire_notifies(
            &mut *ctx.mem,
            &mut *ctx.kernel,
            target.trim_end_matches('\\'),
            NotifyKind::ENTRY | NotifyKind::DIR,
        );
        ctx.set_status(status::NONE);
    }

    fn delete_entry(&mut self, ctx: &mut IpcContext<'_>) {
        let Some(name) = self.resolve_arg(ctx, 0) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        if !self.vfs.borrow_mut().delete_entry(&name) {
            ctx.set_status(status::NOT_FOUND);
            return;
        }
        self.fire_notifies(
            &mut *ctx.mem,
            &mut *ctx.kernel,
            &name,
            NotifyKind::ENTRY | NotifyKind::FILE,
        );
        ctx.set_status(status::NONE);
    }

    fn rename(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(src), Some(dst)) = (self.resolve_arg(ctx, 0), self.resolve_arg(ctx, 1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        if self.vfs.borrow().exist(&dst) {
            ctx.set_status(status::ALREADY_EXISTS);
            return;
        }
        if !self.vfs.borrow_mut().rename(&src, &dst) {
            ctx.set_status(status::GENERAL);
            return;
        }
        self.fire_notifies(&mut *ctx.mem, &mut *ctx.kernel, &dst, NotifyKind::ENTRY);
        ctx.set_status(status::NONE);
    }

    fn replace(&mut self, ctx: &mut IpcContext<'_>) {
        let (Some(src), Some(dst)) = (self.resolve_arg(ctx, 0), self.resolve_arg(ctx, 1)) else {
            ctx.set_status(status::ARGUMENT);
            return;
        };
        {
            let mut vfs = self.vfs.borrow_mut();
            // The destination is overwritten unconditionally.
            if vfs.exist(&dst) {
                vfs.delete_entry(&dst);
            }
            if !vfs.rename(&src, &dst) {
                ctx.set_status(status::GENERAL);
                return;
            }
        }
        self.fire_notifies(&mut *ctx.mem, &mut *ctx.kernel, &dst, NotifyKind::ENTRY);
        ctx.set_status(status::NONE);
    }

    fn set_should_notify_failure(&mut self, ctx: &mut IpcContext<'_>) {
        self.should_notify_failures = ctx.get_i32(0).unwrap_or(0) != 0;
        ctx.set_status(status::NONE);
    }
}

impl Service for FsServer {
    fn name(&self) -> &str {
        SERVER_NAME
    }

    fn connect(&mut self, ctx: &mut IpcContext<'_>) {
        // The session path seeds from the owning process's executable
        // root; the separator is load-bearing for root-relative paths.
        let root = ctx
            .sender_process()
            .and_then(|pid| ctx.kernel.process(pid))
            .map(|p| path::root_name(&p.exe_path))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "c:\\".to_owned());
        self.session_paths.insert(ctx.session(), root);
        ctx.set_status(status::NONE);
    }

    fn disconnect(&mut self, ctx: &mut IpcContext<'_>) {
        let session = ctx.session();
        self.session_paths.remove(&session);
        let cancelled: Vec<NotifyInfo> = {
            let mut kept = Vec::new();
            let mut cancelled = Vec::new();
            for entry in self.notify_entries.drain(..) {
                if entry.session == session {
                    cancelled.push(entry.notify);
                } else {
                    kept.push(entry);
                }
            }
            self.notify_entries = kept;
            cancelled
        };
        for notify in cancelled {
            ctx.kernel.complete(ctx.mem, notify, status::CANCEL);
        }
        ctx.set_status(status::NONE);
    }

    fn handle(&mut self, ctx: &mut IpcContext<'_>) {
        if !Self::OPS.dispatch(self, ctx) {
            self.on_unhandled(ctx);
        }
    }

    fn cancel_session(&mut self, mem: &mut AddressSpace, kernel: &mut Kernel, session: SessionId) {
        self.session_paths.remove(&session);
        let mut kept = Vec::new();
        for entry in self.notify_entries.drain(..) {
            if entry.session == session {
                kernel.complete(mem, entry.notify, status::CANCEL);
            } else {
                kept.push(entry);
            }
        }
        self.notify_entries = kept;
    }
}

// ── Wire helpers ────────────────────────────────────────────────────────

fn fs_error_to_status(err: FsError) -> i32 {
    match err {
        FsError::NotFound => status::NOT_FOUND,
        FsError::PathNotFound => status::PATH_NOT_FOUND,
        FsError::AlreadyExists => status::ALREADY_EXISTS,
        FsError::AccessDenied => status::ACCESS_DENIED,
        FsError::NotSupported => status::NOT_SUPPORTED,
        FsError::HostIo(msg) => {
            warn!("host i/o failure: {msg}");
            status::GENERAL
        }
    }
}

/// The open mode to use when reopening an existing node's file: write
/// access without the truncation of a fresh `WRITE` open.
fn reopen_mode(mode: OpenMode) -> OpenMode {
    if mode.contains(OpenMode::WRITE) {
        (mode - OpenMode::WRITE) | OpenMode::APPEND
    } else {
        mode
    }
}

fn write_i32_pkg(ctx: &mut IpcContext<'_>, slot: usize, value: i32) {
    let mut pkg = [0u8; 4];
    LittleEndian::write_i32(&mut pkg, value);
    if ctx.write_pkg(slot, &pkg) != status::NONE {
        warn!("package write to slot {slot} failed");
    }
}

fn write_wide_out(ctx: &mut IpcContext<'_>, slot: usize, value: &str) {
    if ctx.write_str(slot, value) != status::NONE {
        warn!("descriptor write to slot {slot} failed");
    }
}

/// Writes a package and completes with its status (NONE on success).
fn write_pkg_checked(ctx: &mut IpcContext<'_>, slot: usize, pkg: &[u8]) {
    let wrote = ctx.write_pkg(slot, pkg);
    ctx.set_status(wrote);
}

/// Computes the guest attribute word of an entry.
fn entry_attrib_of(info: &EntryInfo) -> u32 {
    if let Some(raw) = info.raw_attrib {
        return raw;
    }
    let mut attrib = 0;
    if info.attrib.contains(IoAttrib::INTERNAL) {
        attrib |= entry_attrib::READ_ONLY | entry_attrib::SYSTEM;
    }
    if info.attrib.contains(IoAttrib::HIDDEN) {
        attrib |= entry_attrib::HIDDEN;
    }
    if info.is_dir {
        attrib |= entry_attrib::DIR;
    } else {
        attrib |= entry_attrib::ARCHIVE;
    }
    attrib
}

/// Encodes the guest entry package:
/// `{attrib, size, modified, size-high, name-length, name[]}`.
fn encode_entry(info: &EntryInfo, name: &str) -> Vec<u8> {
    let units: Vec<u16> = karst_base::ucs2::from_utf8(name);
    let units = &units[..units.len().min(256)];

    let mut pkg = vec![0u8; ENTRY_BASE_SIZE + units.len() * 2];
    LittleEndian::write_u32(&mut pkg[0..4], entry_attrib_of(info));
    LittleEndian::write_u32(&mut pkg[4..8], info.size as u32);
    LittleEndian::write_u64(&mut pkg[8..16], info.last_write);
    LittleEndian::write_u32(&mut pkg[16..20], (info.size >> 32) as u32);
    LittleEndian::write_u32(&mut pkg[20..24], units.len() as u32);
    for (idx, unit) in units.iter().enumerate() {
        LittleEndian::write_u16(&mut pkg[ENTRY_BASE_SIZE + idx * 2..], *unit);
    }
    pkg
}

/// Encodes the drive-info package:
/// `{media-type, battery, drive-attrs, media-attrs, bus-type}`.
fn encode_drive_info(drive: Option<&Drive>) -> [u8; 20] {
    let mut pkg = [0u8; 20];
    let Some(drive) = drive else {
        LittleEndian::write_u32(&mut pkg[0..4], media_type::UNKNOWN);
        return pkg;
    };

    let (mtype, mut datt) = match drive.media {
        DriveMedia::Physical => (media_type::HARD_DISK, drive_attrib::LOCAL),
        DriveMedia::Rom => (media_type::ROM, drive_attrib::ROM),
        DriveMedia::Reflected => (media_type::ROTATING, drive_attrib::REDIRECTED),
        DriveMedia::None => (media_type::UNKNOWN, 0),
    };
    let mut matt = 0;
    if drive.attrib.contains(IoAttrib::HIDDEN) {
        datt |= drive_attrib::HIDDEN;
    }
    if drive.attrib.contains(IoAttrib::INTERNAL) {
        datt |= drive_attrib::INTERNAL;
    }
    if drive.attrib.contains(IoAttrib::REMOVABLE) {
        datt |= drive_attrib::LOGICALLY_REMOVABLE;
    }
    if drive.attrib.contains(IoAttrib::WRITE_PROTECTED) {
        matt |= media_attrib::WRITE_PROTECTED;
    }

    LittleEndian::write_u32(&mut pkg[0..4], mtype);
    LittleEndian::write_u32(&mut pkg[4..8], 0); // battery not supported
    LittleEndian::write_u32(&mut pkg[8..12], datt);
    LittleEndian::write_u32(&mut pkg[12..16], matt);
    LittleEndian::write_u32(&mut pkg[16..20], 0); // internal bus
    pkg
}

#[cfg(test)]
mod tests {
    use karst_base::{status, ucs2, GuestVersion, UidTriple};
    use karst_kernel::{IpcArgs, Kernel, LoadedImage, MessageKind, ProcessId, ServerId, ThreadId};
    use karst_mem::{AddressSpace, ChunkAttrib, DesWidth, GuestAddr, Region};

    use super::*;
    use crate::ramfs::RamFs;
    use crate::romfs::{RomEntry, RomFs, RomManifest};

    struct Fix {
        mem: AddressSpace,
        kernel: Kernel,
        server: FsServer,
        server_id: ServerId,
        session: karst_kernel::SessionId,
        thread: ThreadId,
        pid: ProcessId,
        cursor: GuestAddr,
        limit: GuestAddr,
    }

    fn image(path: &str) -> LoadedImage {
        LoadedImage {
            uids: UidTriple::new(0x1000_007a, 0, 0x1020_3044),
            path: path.into(),
            code: vec![0; 16],
            data: Vec::new(),
            bss_size: 0,
            entry_offset: 0,
            stack_size: 0x1000,
        }
    }

    impl Fix {
        fn new() -> Self {
            let mut vfs = Vfs::new();
            vfs.add_filesystem(Box::new(RamFs::new()));
            vfs.add_filesystem(Box::new(RomFs::new(&RomManifest {
                entries: vec![RomEntry {
                    path: "z:\\test.txt".into(),
                    data: b"hello".to_vec(),
                    rom_address: 0x8000_4000,
                }],
            })));
            vfs.mount(DriveNumber::C, DriveMedia::Physical, IoAttrib::INTERNAL, None);
            vfs.mount(DriveNumber::Z, DriveMedia::Rom, IoAttrib::INTERNAL, None);
            let vfs = Rc::new(RefCell::new(vfs));

            let mut kernel = Kernel::new(GuestVersion::V94);
            let mut mem = AddressSpace::new(GuestVersion::V94);
            let server_id = kernel.register_server(SERVER_NAME).unwrap();
            let pid = kernel
                .spawn_process(&mut mem, &image("c:\\sys\\bin\\shell.exe"), "")
                .unwrap();
            kernel.run_process(pid).unwrap();
            let thread = kernel.process(pid).unwrap().primary_thread().unwrap();

            let scratch = mem
                .alloc_chunk(
                    "ipc-scratch",
                    Region::SharedData,
                    0x8000,
                    ChunkAttrib::READ | ChunkAttrib::WRITE,
                )
                .unwrap();
            let base = mem.chunk(scratch).unwrap().base;

            let mut fix = Fix {
                mem,
                kernel,
                server: FsServer::new(vfs),
                server_id,
                session: karst_kernel::SessionId(0),
                thread,
                pid,
                cursor: base,
                limit: base + 0x8000,
            };
            let alloc = fix.alloc(4);
            fix.session = fix
                .kernel
                .create_session(fix.thread, SERVER_NAME, IpcArgs::new(), alloc)
                .unwrap();
            fix.pump();
            fix
        }

        /// Bump-allocates scratch guest memory, 4-byte aligned.
        fn alloc(&mut self, len: u32) -> GuestAddr {
            let addr = self.cursor;
            self.cursor += (len + 3) & !3;
            assert!(self.cursor <= self.limit, "scratch exhausted");
            addr
        }

        /// Lays out a constant wide descriptor holding `s`.
        fn in_str(&mut self, s: &str) -> GuestAddr {
            let units = ucs2::from_utf8(s);
            let addr = self.alloc(4 + units.len() as u32 * 2);
            self.mem.write_u32(addr, units.len() as u32).unwrap();
            self.mem
                .write_bytes(addr + 4, &ucs2::to_bytes(&units))
                .unwrap();
            addr
        }

        /// Lays out an empty modifiable descriptor with room for
        /// `max_units` code units of the given width.
        fn out_des(&mut self, max_units: u32, width: DesWidth) -> GuestAddr {
            let bytes = match width {
                DesWidth::Narrow => max_units,
                DesWidth::Wide => max_units * 2,
            };
            let addr = self.alloc(8 + bytes);
            self.mem.write_u32(addr, 2 << 28).unwrap();
            self.mem.write_u32(addr + 4, max_units).unwrap();
            addr
        }

        /// Lays out a constant narrow descriptor holding raw bytes.
        fn in_bytes(&mut self, data: &[u8]) -> GuestAddr {
            let addr = self.alloc(4 + data.len() as u32);
            self.mem.write_u32(addr, data.len() as u32).unwrap();
            self.mem.write_bytes(addr + 4, data).unwrap();
            addr
        }

        fn read_out(&self, des: GuestAddr) -> Vec<u8> {
            karst_mem::descriptor::read_bytes(&self.mem, des).unwrap()
        }

        fn read_out_str(&self, des: GuestAddr) -> String {
            karst_mem::descriptor::read_string(&self.mem, des).unwrap()
        }

        /// Drains queued messages into the server.
        fn pump(&mut self) {
            while let Some(msg) = self.kernel.pop_request(self.server_id) {
                let mut ctx = karst_kernel::IpcContext::new(&mut self.mem, &mut self.kernel, &msg);
                match msg.kind {
                    MessageKind::Connect => self.server.connect(&mut ctx),
                    MessageKind::Disconnect => self.server.disconnect(&mut ctx),
                    MessageKind::Request => self.server.handle(&mut ctx),
                }
            }
        }

        /// Sends a request from the primary thread and services it,
        /// returning the completion status.
        fn call(&mut self, function: u16, args: IpcArgs) -> i32 {
            self.call_from(self.thread, self.session, function, args)
        }

        fn call_from(
            &mut self,
            thread: ThreadId,
            session: karst_kernel::SessionId,
            function: u16,
            args: IpcArgs,
        ) -> i32 {
            let status_addr = self.alloc(4);
            self.mem.write_u32(status_addr, 0x7fff_ffff).unwrap();
            self.kernel
                .send(thread, session, function, args, status_addr)
                .unwrap();
            self.pump();
            self.mem.read_u32(status_addr).unwrap() as i32
        }

        /// Sends an async request; returns its still-pending status cell.
        fn call_async(&mut self, function: u16, args: IpcArgs) -> GuestAddr {
            let status_addr = self.alloc(4);
            self.mem.write_u32(status_addr, 0x7fff_ffff).unwrap();
            self.kernel
                .send(
                    self.thread,
                    self.session,
                    function | karst_kernel::ASYNC_FUNC_BIT,
                    args,
                    status_addr,
                )
                .unwrap();
            self.pump();
            status_addr
        }

        fn open(&mut self, path: &str, mode: u32) -> (i32, u32) {
            let name = self.in_str(path);
            let handle_out = self.out_des(4, DesWidth::Narrow);
            let st = self.call(
                fs_op::FILE_OPEN,
                IpcArgs::new()
                    .des_in(0, name, DesWidth::Wide)
                    .int(1, mode)
                    .des_out(3, handle_out, DesWidth::Narrow),
            );
            let handle = if st == status::NONE {
                LittleEndian::read_i32(&self.read_out(handle_out)) as u32
            } else {
                0
            };
            (st, handle)
        }

        fn create(&mut self, path: &str, mode: u32) -> (i32, u32) {
            let name = self.in_str(path);
            let handle_out = self.out_des(4, DesWidth::Narrow);
            let st = self.call(
                fs_op::FILE_CREATE,
                IpcArgs::new()
                    .des_in(0, name, DesWidth::Wide)
                    .int(1, mode)
                    .des_out(3, handle_out, DesWidth::Narrow),
            );
            let handle = if st == status::NONE {
                LittleEndian::read_i32(&self.read_out(handle_out)) as u32
            } else {
                0
            };
            (st, handle)
        }

        fn close(&mut self, handle: u32) -> i32 {
            self.call(fs_op::FILE_SUB_CLOSE, IpcArgs::new().int(3, handle))
        }

        fn read(&mut self, handle: u32, len: u32, pos: i32) -> (i32, Vec<u8>) {
            let buf = self.out_des(len.max(8), DesWidth::Narrow);
            let st = self.call(
                fs_op::FILE_READ,
                IpcArgs::new()
                    .des_out(0, buf, DesWidth::Narrow)
                    .int(1, len)
                    .int(2, pos as u32)
                    .int(3, handle),
            );
            (st, self.read_out(buf))
        }

        fn write(&mut self, handle: u32, data: &[u8], pos: i32) -> i32 {
            let buf = self.in_bytes(data);
            self.call(
                fs_op::FILE_WRITE,
                IpcArgs::new()
                    .des_in(0, buf, DesWidth::Narrow)
                    .int(1, data.len() as u32)
                    .int(2, pos as u32)
                    .int(3, handle),
            )
        }

        fn size(&mut self, handle: u32) -> (i32, u64) {
            let out = self.out_des(8, DesWidth::Narrow);
            let st = self.call(
                fs_op::FILE_SIZE,
                IpcArgs::new()
                    .des_out(0, out, DesWidth::Narrow)
                    .int(3, handle),
            );
            let raw = self.read_out(out);
            let size = if raw.len() >= 8 {
                LittleEndian::read_u64(&raw)
            } else {
                u64::from(LittleEndian::read_u32(&raw))
            };
            (st, size)
        }

        /// Spawns a second process with its own session.
        fn second_process(&mut self) -> (ThreadId, karst_kernel::SessionId) {
            let pid = self
                .kernel
                .spawn_process(&mut self.mem, &image("c:\\sys\\bin\\other.exe"), "")
                .unwrap();
            self.kernel.run_process(pid).unwrap();
            let thread = self.kernel.process(pid).unwrap().primary_thread().unwrap();
            let status_addr = self.alloc(4);
            let session = self
                .kernel
                .create_session(thread, SERVER_NAME, IpcArgs::new(), status_addr)
                .unwrap();
            self.pump();
            (thread, session)
        }
    }

    #[test]
    fn open_read_size_close_roundtrip() {
        let mut fix = Fix::new();
        let (st, handle) = fix.open("z:\\test.txt", 0);
        assert_eq!(st, status::NONE);
        assert!(handle > 0);

        let (st, data) = fix.read(handle, 5, -1);
        assert_eq!(st, status::NONE);
        assert_eq!(data, b"hello");

        let (st, size) = fix.size(handle);
        assert_eq!(st, status::NONE);
        assert_eq!(size, 5);

        assert_eq!(fix.close(handle), status::NONE);
        // The handle is dead afterwards.
        let (st, _) = fix.read(handle, 1, 0);
        assert_eq!(st, status::BAD_HANDLE);
    }

    #[test]
    fn open_missing_file_not_found() {
        let mut fix = Fix::new();
        let (st, _) = fix.open("c:\\missing.txt", 0);
        assert_eq!(st, status::NOT_FOUND);
    }

    #[test]
    fn create_in_missing_directory_is_path_not_found() {
        let mut fix = Fix::new();
        let (st, _) = fix.create("c:\\no\\such\\dir\\f.txt", guest_mode::WRITE);
        assert_eq!(st, status::PATH_NOT_FOUND);
    }

    #[test]
    fn create_fails_on_existing_path() {
        let mut fix = Fix::new();
        let (st, h) = fix.create("c:\\once.txt", guest_mode::WRITE);
        assert_eq!(st, status::NONE);
        fix.close(h);
        let (st, _) = fix.create("c:\\once.txt", guest_mode::WRITE);
        assert_eq!(st, status::ALREADY_EXISTS);
    }

    #[test]
    fn exclusive_share_denies_other_process_until_close() {
        let mut fix = Fix::new();
        let (st, h1) = fix.create("c:\\a.txt", guest_mode::WRITE | guest_mode::SHARE_EXCLUSIVE);
        assert_eq!(st, status::NONE);
        fix.close(h1);
        let (st, h1) = fix.open("c:\\a.txt", guest_mode::WRITE | guest_mode::SHARE_EXCLUSIVE);
        assert_eq!(st, status::NONE);

        // Same path, exclusive, from a different process: denied.
        let (thread2, session2) = fix.second_process();
        let name = fix.in_str("c:\\a.txt");
        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call_from(
            thread2,
            session2,
            fs_op::FILE_OPEN,
            IpcArgs::new()
                .des_in(0, name, DesWidth::Wide)
                .int(1, guest_mode::WRITE | guest_mode::SHARE_EXCLUSIVE)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::ACCESS_DENIED);

        // After the owner closes, the other process succeeds.
        fix.close(h1);
        let name = fix.in_str("c:\\a.txt");
        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call_from(
            thread2,
            session2,
            fs_op::FILE_OPEN,
            IpcArgs::new()
                .des_in(0, name, DesWidth::Wide)
                .int(1, guest_mode::WRITE | guest_mode::SHARE_EXCLUSIVE)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
    }

    #[test]
    fn replace_truncates_existing_content() {
        let mut fix = Fix::new();
        let (st, h) = fix.create("c:\\x", guest_mode::WRITE);
        assert_eq!(st, status::NONE);
        assert_eq!(fix.write(h, b"abcdef", -1), status::NONE);
        let (_, size) = fix.size(h);
        assert_eq!(size, 6);
        fix.close(h);

        let name = fix.in_str("c:\\x");
        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_REPLACE,
            IpcArgs::new()
                .des_in(0, name, DesWidth::Wide)
                .int(1, guest_mode::WRITE)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
        let h = LittleEndian::read_i32(&fix.read_out(handle_out)) as u32;
        let (st, size) = fix.size(h);
        assert_eq!(st, status::NONE);
        assert_eq!(size, 0);
    }

    #[test]
    fn write_requires_write_access() {
        let mut fix = Fix::new();
        let (st, h) = fix.open("z:\\test.txt", 0);
        assert_eq!(st, status::NONE);
        assert_eq!(fix.write(h, b"nope", -1), status::ACCESS_DENIED);
    }

    #[test]
    fn read_requires_read_access() {
        let mut fix = Fix::new();
        let (_, h) = fix.create("c:\\wr.bin", guest_mode::WRITE);
        let (st, _) = fix.read(h, 4, 0);
        assert_eq!(st, status::ACCESS_DENIED);
    }

    #[test]
    fn read_clamps_to_remaining_size() {
        let mut fix = Fix::new();
        let (_, h) = fix.open("z:\\test.txt", 0);
        let (st, data) = fix.read(h, 100, 2);
        assert_eq!(st, status::NONE);
        assert_eq!(data, b"llo");
    }

    #[test]
    fn set_size_rules() {
        let mut fix = Fix::new();
        let (_, h) = fix.create("c:\\sz", guest_mode::WRITE);
        fix.write(h, b"0123456789", -1);

        // Read-only handles are refused.
        let (_, ro) = fix.open("z:\\test.txt", 0);
        let st = fix.call(
            fs_op::FILE_SET_SIZE,
            IpcArgs::new().int(0, 4).int(3, ro),
        );
        assert_eq!(st, status::PERMISSION_DENIED);

        // Oversize is refused.
        let st = fix.call(
            fs_op::FILE_SET_SIZE,
            IpcArgs::new().int(0, 1 << 30).int(3, h),
        );
        assert_eq!(st, status::TOO_BIG);

        // Truncation clamps the offset.
        let st = fix.call(fs_op::FILE_SET_SIZE, IpcArgs::new().int(0, 4).int(3, h));
        assert_eq!(st, status::NONE);
        let (_, size) = fix.size(h);
        assert_eq!(size, 4);
        let out = fix.out_des(8, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_SEEK,
            IpcArgs::new()
                .int(0, 0)
                .int(1, 2) // current
                .des_out(2, out, DesWidth::Narrow)
                .int(3, h),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(LittleEndian::read_u32(&fix.read_out(out)), 4);
    }

    #[test]
    fn seek_modes_and_rom_address() {
        let mut fix = Fix::new();
        let (_, h) = fix.open("z:\\test.txt", 0);

        let out = fix.out_des(8, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_SEEK,
            IpcArgs::new()
                .int(0, 3)
                .int(1, 1) // begin
                .des_out(2, out, DesWidth::Narrow)
                .int(3, h),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(LittleEndian::read_u32(&fix.read_out(out)), 3);

        let out = fix.out_des(8, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_SEEK,
            IpcArgs::new()
                .int(0, -2i32 as u32)
                .int(1, 3) // end
                .des_out(2, out, DesWidth::Narrow)
                .int(3, h),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(LittleEndian::read_u32(&fix.read_out(out)), 3);

        // Address mode resolves to the ROM address.
        let out = fix.out_des(8, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_SEEK,
            IpcArgs::new()
                .int(0, 1)
                .int(1, 0) // address
                .des_out(2, out, DesWidth::Narrow)
                .int(3, h),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(LittleEndian::read_u32(&fix.read_out(out)), 0x8000_4001);
    }

    #[test]
    fn notify_change_ex_fires_on_matching_create() {
        let mut fix = Fix::new();
        let pattern = fix.in_str("*.txt");
        let cell = fix.call_async(
            fs_op::NOTIFY_CHANGE_EX,
            IpcArgs::new()
                .int(0, NotifyKind::ALL.bits())
                .des_in(1, pattern, DesWidth::Wide),
        );
        // Still pending.
        assert_eq!(fix.mem.read_u32(cell).unwrap(), 0x7fff_ffff);

        let (st, h) = fix.create("c:\\foo.txt", guest_mode::WRITE);
        assert_eq!(st, status::NONE);
        fix.close(h);
        assert_eq!(fix.mem.read_u32(cell).unwrap(), 0);

        // A non-matching create leaves a fresh registration pending.
        let pattern = fix.in_str("*.txt");
        let cell = fix.call_async(
            fs_op::NOTIFY_CHANGE_EX,
            IpcArgs::new()
                .int(0, NotifyKind::ALL.bits())
                .des_in(1, pattern, DesWidth::Wide),
        );
        let (st, h) = fix.create("c:\\bar.log", guest_mode::WRITE);
        assert_eq!(st, status::NONE);
        fix.close(h);
        assert_eq!(fix.mem.read_u32(cell).unwrap(), 0x7fff_ffff);
    }

    #[test]
    fn disconnect_cancels_pending_notifies() {
        let mut fix = Fix::new();
        let (thread2, session2) = fix.second_process();
        let pattern = fix.in_str("*");
        let cell = fix.alloc(4);
        fix.mem.write_u32(cell, 0x7fff_ffff).unwrap();
        fix.kernel
            .send(
                thread2,
                session2,
                fs_op::NOTIFY_CHANGE_EX | karst_kernel::ASYNC_FUNC_BIT,
                IpcArgs::new()
                    .int(0, NotifyKind::ALL.bits())
                    .des_in(1, pattern, DesWidth::Wide),
                cell,
            )
            .unwrap();
        fix.pump();

        let close_cell = fix.alloc(4);
        fix.kernel
            .close_session(thread2, session2, close_cell)
            .unwrap();
        fix.pump();
        fix.kernel.remove_session(session2);

        assert_eq!(fix.mem.read_u32(cell).unwrap(), status::CANCEL as u32);
    }

    #[test]
    fn rename_and_replace_postconditions() {
        let mut fix = Fix::new();
        let (_, h) = fix.create("c:\\a", guest_mode::WRITE);
        fix.write(h, b"from-a", -1);
        fix.close(h);

        // rename a -> b with b absent.
        let src = fix.in_str("c:\\a");
        let dst = fix.in_str("c:\\b");
        let st = fix.call(
            fs_op::RENAME,
            IpcArgs::new()
                .des_in(0, src, DesWidth::Wide)
                .des_in(1, dst, DesWidth::Wide),
        );
        assert_eq!(st, status::NONE);
        assert!(!fix.server.vfs.borrow().exist("c:\\a"));
        assert!(fix.server.vfs.borrow().exist("c:\\b"));

        // rename onto an existing destination fails.
        let (_, h) = fix.create("c:\\c", guest_mode::WRITE);
        fix.write(h, b"from-c", -1);
        fix.close(h);
        let src = fix.in_str("c:\\c");
        let dst = fix.in_str("c:\\b");
        let st = fix.call(
            fs_op::RENAME,
            IpcArgs::new()
                .des_in(0, src, DesWidth::Wide)
                .des_in(1, dst, DesWidth::Wide),
        );
        assert_eq!(st, status::ALREADY_EXISTS);

        // replace overwrites and discards the old content.
        let src = fix.in_str("c:\\c");
        let dst = fix.in_str("c:\\b");
        let st = fix.call(
            fs_op::REPLACE,
            IpcArgs::new()
                .des_in(0, src, DesWidth::Wide)
                .des_in(1, dst, DesWidth::Wide),
        );
        assert_eq!(st, status::NONE);
        assert!(!fix.server.vfs.borrow().exist("c:\\c"));
        let (_, h) = fix.open("c:\\b", 0);
        let (_, data) = fix.read(h, 16, 0);
        assert_eq!(data, b"from-c");
    }

    #[test]
    fn directory_iteration_with_wildcard() {
        let mut fix = Fix::new();
        for name in ["c:\\docs\\one.txt", "c:\\docs\\two.txt", "c:\\docs\\skip.log"] {
            let mkdir = fix.in_str("c:\\docs\\");
            fix.call(
                fs_op::MK_DIR,
                IpcArgs::new().des_in(0, mkdir, DesWidth::Wide).int(1, 0),
            );
            let (_, h) = fix.create(name, guest_mode::WRITE);
            if h != 0 {
                fix.close(h);
            }
        }

        let dir_name = fix.in_str("c:\\docs\\*.txt");
        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call(
            fs_op::DIR_OPEN,
            IpcArgs::new()
                .des_in(0, dir_name, DesWidth::Wide)
                .int(1, 0)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
        let dh = LittleEndian::read_i32(&fix.read_out(handle_out)) as u32;

        let mut names = Vec::new();
        loop {
            let entry_out = fix.out_des(600, DesWidth::Narrow);
            let st = fix.call(
                fs_op::DIR_READ_ONE,
                IpcArgs::new()
                    .des_out(0, entry_out, DesWidth::Narrow)
                    .int(3, dh),
            );
            if st == status::EOF {
                break;
            }
            assert_eq!(st, status::NONE);
            let pkg = fix.read_out(entry_out);
            let name_len = LittleEndian::read_u32(&pkg[20..24]) as usize;
            let units: Vec<u16> = (0..name_len)
                .map(|i| LittleEndian::read_u16(&pkg[24 + i * 2..]))
                .collect();
            names.push(ucs2::to_utf8(&units));
        }
        assert_eq!(names, vec!["one.txt", "two.txt"]);

        let st = fix.call(fs_op::DIR_SUB_CLOSE, IpcArgs::new().int(3, dh));
        assert_eq!(st, status::NONE);
    }

    #[test]
    fn temp_files_are_deleted_on_close() {
        let mut fix = Fix::new();
        let dir = fix.in_str("c:\\");
        let path_out = fix.out_des(64, DesWidth::Wide);
        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_TEMP,
            IpcArgs::new()
                .des_in(0, dir, DesWidth::Wide)
                .int(1, guest_mode::WRITE)
                .des_out(2, path_out, DesWidth::Wide)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
        let temp_path = fix.read_out_str(path_out);
        let h = LittleEndian::read_i32(&fix.read_out(handle_out)) as u32;
        assert!(fix.server.vfs.borrow().exist(&temp_path));

        fix.close(h);
        assert!(!fix.server.vfs.borrow().exist(&temp_path));
    }

    #[test]
    fn duplicate_has_independent_offset() {
        let mut fix = Fix::new();
        let (_, h) = fix.open("z:\\test.txt", 0);
        let (_, data) = fix.read(h, 2, -1);
        assert_eq!(data, b"he");

        let handle_out = fix.out_des(4, DesWidth::Narrow);
        let st = fix.call(
            fs_op::FILE_DUPLICATE,
            IpcArgs::new()
                .int(0, h)
                .des_out(3, handle_out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
        let dup = LittleEndian::read_i32(&fix.read_out(handle_out)) as u32;
        assert_ne!(dup, h);

        // Advancing the duplicate leaves the original alone.
        let (_, data) = fix.read(dup, 3, -1);
        assert_eq!(data, b"llo");
        let (_, data) = fix.read(h, 3, -1);
        assert_eq!(data, b"llo");
    }

    #[test]
    fn session_paths_and_private_path() {
        let mut fix = Fix::new();
        let out = fix.out_des(64, DesWidth::Wide);
        let st = fix.call(
            fs_op::SESSION_PATH,
            IpcArgs::new().des_out(0, out, DesWidth::Wide),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(fix.read_out_str(out), "c:\\");

        let new_path = fix.in_str("c:\\workdir\\");
        let st = fix.call(
            fs_op::SET_SESSION_PATH,
            IpcArgs::new().des_in(0, new_path, DesWidth::Wide),
        );
        assert_eq!(st, status::NONE);

        // Relative opens now resolve under the session path.
        let mkdir = fix.in_str("c:\\workdir\\");
        fix.call(
            fs_op::MK_DIR,
            IpcArgs::new().des_in(0, mkdir, DesWidth::Wide).int(1, 0),
        );
        let (st, h) = fix.create("rel.txt", guest_mode::WRITE);
        assert_eq!(st, status::NONE);
        fix.close(h);
        assert!(fix.server.vfs.borrow().exist("c:\\workdir\\rel.txt"));

        let out = fix.out_des(64, DesWidth::Wide);
        let st = fix.call(
            fs_op::PRIVATE_PATH,
            IpcArgs::new().des_out(0, out, DesWidth::Wide),
        );
        assert_eq!(st, status::NONE);
        assert_eq!(fix.read_out_str(out), "\\private\\10203044\\");
    }

    #[test]
    fn drive_list_and_drive_info() {
        let mut fix = Fix::new();
        let out = fix.out_des(26, DesWidth::Narrow);
        let st = fix.call(
            fs_op::DRIVE_LIST,
            IpcArgs::new()
                .des_out(0, out, DesWidth::Narrow)
                .int(1, 0),
        );
        assert_eq!(st, status::NONE);
        let list = fix.read_out(out);
        assert_eq!(list[DriveNumber::C.index()], 1);
        assert_eq!(list[DriveNumber::Z.index()], 1);
        assert_eq!(list[DriveNumber::D.index()], 0);

        let out = fix.out_des(20, DesWidth::Narrow);
        let st = fix.call(
            fs_op::DRIVE,
            IpcArgs::new()
                .des_out(0, out, DesWidth::Narrow)
                .int(1, DriveNumber::Z.index() as u32),
        );
        assert_eq!(st, status::NONE);
        let pkg = fix.read_out(out);
        assert_eq!(LittleEndian::read_u32(&pkg[0..4]), media_type::ROM);
        assert_ne!(LittleEndian::read_u32(&pkg[8..12]) & drive_attrib::ROM, 0);
    }

    #[test]
    fn entry_reports_metadata() {
        let mut fix = Fix::new();
        let name = fix.in_str("z:\\test.txt");
        let out = fix.out_des(600, DesWidth::Narrow);
        let st = fix.call(
            fs_op::ENTRY,
            IpcArgs::new()
                .des_in(0, name, DesWidth::Wide)
                .des_out(1, out, DesWidth::Narrow),
        );
        assert_eq!(st, status::NONE);
        let pkg = fix.read_out(out);
        assert_eq!(LittleEndian::read_u32(&pkg[4..8]), 5);
        let attrib = LittleEndian::read_u32(&pkg[0..4]);
        assert_ne!(attrib & entry_attrib::SYSTEM, 0); // internal drive
    }

    #[test]
    fn node_activity_invariant_holds() {
        let mut fix = Fix::new();
        let (_, a) = fix.open("z:\\test.txt", 0);
        let (_, b) = fix.create("c:\\inv.bin", guest_mode::WRITE);
        assert!(a > 0 && b > 0);
        for (_, node) in fix.server.nodes.iter_mut() {
            assert!(
                node.open_mode
                    .intersects(OpenMode::READ | OpenMode::WRITE | OpenMode::APPEND),
                "active node without access bits"
            );
        }
    }
}
