//! The assembled emulator.
//!
//! `System` wires the address space, kernel, VFS and the built-in
//! servers together with the three external collaborators (CPU engine,
//! image loader, graphics driver) and drives the main loop: guest
//! execution, virtual time, request processing, rescheduling.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};

use karst_fs::{
    DriveMedia, DriveNumber, FilesystemId, FsServer, IoAttrib, PhysicalFs, RamFs, RomFs, Vfs,
};
use karst_kernel::{
    IpcArgs, IpcContext, Kernel, MessageKind, ProcessId, PropertyType, ServerId, Service,
    SessionId, ThreadId,
};
use karst_mem::{AddressSpace, ChunkId, GuestAddr};
use karst_wserv::{SharedDriver, WindowServer};

use crate::config::SystemConfig;
use crate::cpu::CpuEngine;
use crate::loader::ImageLoader;

/// System category for the bootstrap properties.
const SYS_CATEGORY: u32 = 0x101f_75b6;
/// Miscellaneous HAL key; observed to read as 65535.
const HAL_MISC_KEY: u32 = 0x1020_e34e;
/// Locale language property key.
const LOCALE_LANG_KEY: u32 = 0x1020_8903;
/// Locale data property key.
const LOCALE_DATA_KEY: u32 = 0x1020_8904;

/// A registered server: the built-ins keep their concrete types so the
/// system can reach their non-protocol surfaces (input routing).
enum ServiceSlot {
    Fs(FsServer),
    Window(WindowServer),
    Custom(Box<dyn Service>),
}

impl ServiceSlot {
    fn as_service_mut(&mut self) -> &mut dyn Service {
        match self {
            ServiceSlot::Fs(fs) => fs,
            ServiceSlot::Window(ws) => ws,
            ServiceSlot::Custom(custom) => custom.as_mut(),
        }
    }
}

/// The whole emulated machine.
pub struct System {
    config: SystemConfig,
    mem: AddressSpace,
    kernel: Kernel,
    vfs: Rc<RefCell<Vfs>>,
    services: Vec<ServiceSlot>,
    cpu: Box<dyn CpuEngine>,
    loader: Box<dyn ImageLoader>,
    driver: SharedDriver,
    rom_fs_id: Option<FilesystemId>,
    rom_chunk: Option<ChunkId>,
    startup_spawned: bool,
    exit: bool,
}

impl System {
    /// Assembles a system; [`init`](Self::init) must run before use.
    pub fn new(
        cpu: Box<dyn CpuEngine>,
        loader: Box<dyn ImageLoader>,
        driver: SharedDriver,
        config: SystemConfig,
    ) -> Self {
        let version = config.version();
        Self {
            config,
            mem: AddressSpace::new(version),
            kernel: Kernel::new(version),
            vfs: Rc::new(RefCell::new(Vfs::new())),
            services: Vec::new(),
            cpu,
            loader,
            driver,
            rom_fs_id: None,
            rom_chunk: None,
            startup_spawned: false,
            exit: false,
        }
    }

    /// Brings up filesystems, servers and bootstrap properties.
    pub fn init(&mut self) -> Result<()> {
        self.exit = false;

        {
            let mut vfs = self.vfs.borrow_mut();
            vfs.add_filesystem(Box::new(PhysicalFs::new()));
            vfs.add_filesystem(Box::new(RamFs::new()));
            // Drive Z waits for a ROM; an empty provider keeps the drive
            // table consistent until then.
            self.rom_fs_id = Some(vfs.add_filesystem(Box::new(RomFs::new(&Default::default()))));

            // PhysicalFs declines a drive without a host root, so C falls
            // through to the in-memory provider when none is configured.
            let host_c = self.config.drive_c_host_path.clone();
            vfs.mount(DriveNumber::C, DriveMedia::Physical, IoAttrib::INTERNAL, host_c);
            vfs.mount(DriveNumber::Z, DriveMedia::Rom, IoAttrib::INTERNAL, None);
        }

        let fs = FsServer::new(self.vfs.clone());
        self.register_slot(ServiceSlot::Fs(fs))?;
        let ws = WindowServer::new(self.vfs.clone(), self.driver.clone());
        self.register_slot(ServiceSlot::Window(ws))?;

        self.init_properties();
        info!("system initialised ({})", self.config.device_name);
        Ok(())
    }

    fn register_slot(&mut self, mut slot: ServiceSlot) -> Result<()> {
        let name = slot.as_service_mut().name().to_owned();
        let id = self
            .kernel
            .register_server(&name)
            .with_context(|| format!("registering {name}"))?;
        if id.0 != self.services.len() {
            bail!("server registry out of step for {name}");
        }
        self.services.push(slot);
        Ok(())
    }

    /// Registers an additional (front-end supplied) server.
    pub fn add_custom_server(&mut self, service: Box<dyn Service>) -> Result<()> {
        self.register_slot(ServiceSlot::Custom(service))
    }

    /// Defines the locale and HAL properties guest libraries read at
    /// boot.
    fn init_properties(&mut self) {
        let props = &mut self.kernel.properties;
        props.define(SYS_CATEGORY, HAL_MISC_KEY, PropertyType::Int, 0);
        props.set_int(SYS_CATEGORY, HAL_MISC_KEY, 65535);

        // Locale language record: language code followed by the (null)
        // table pointers.
        let mut lang = [0u8; 32];
        LittleEndian::write_u32(&mut lang[0..4], 1);
        props.define(SYS_CATEGORY, LOCALE_LANG_KEY, PropertyType::Bin, lang.len());
        props.set_bin(SYS_CATEGORY, LOCALE_LANG_KEY, &lang);

        // Locale data blob, sized for the guest locale record; only the
        // UTC offset field is meaningful to the services we host.
        let mut locale = [0u8; 256];
        LittleEndian::write_i32(&mut locale[4..8], -14400);
        props.define(SYS_CATEGORY, LOCALE_DATA_KEY, PropertyType::Bin, locale.len());
        props.set_bin(SYS_CATEGORY, LOCALE_DATA_KEY, &locale);
    }

    // ── Mounting & ROM ──────────────────────────────────────────────────

    /// Mounts a drive.
    pub fn mount(
        &mut self,
        drive: DriveNumber,
        media: DriveMedia,
        attrib: IoAttrib,
        host_root: Option<std::path::PathBuf>,
    ) -> bool {
        self.vfs.borrow_mut().mount(drive, media, attrib, host_root)
    }

    /// Loads a ROM image: swaps the ROM filesystem and maps the image.
    pub fn load_rom(&mut self, host_path: &str) -> Result<()> {
        let rom = self.loader.load_rom(host_path)?;

        {
            let mut vfs = self.vfs.borrow_mut();
            if let Some(old) = self.rom_fs_id.take() {
                vfs.remove_filesystem(old);
            }
            self.rom_fs_id = Some(vfs.add_filesystem(Box::new(RomFs::new(&rom.manifest))));
            vfs.mount(DriveNumber::Z, DriveMedia::Rom, IoAttrib::INTERNAL, None);
        }

        if let Some(old) = self.rom_chunk.take() {
            let _ = self.mem.free_chunk(old);
        }
        let chunk = self
            .mem
            .map_rom(rom.base, rom.data)
            .context("mapping ROM image")?;
        self.rom_chunk = Some(chunk);
        info!("ROM loaded from {host_path}");
        Ok(())
    }

    // ── Processes ───────────────────────────────────────────────────────

    /// Spawns the configured startup processes (once), then the
    /// requested executable, and marks them runnable.
    pub fn load(&mut self, path: &str) -> Result<ProcessId> {
        if !self.startup_spawned {
            self.startup_spawned = true;
            for app in self.config.startup.clone() {
                match self.spawn(&app) {
                    Ok(pid) => self.kernel.run_process(pid)?,
                    Err(err) => warn!("startup {app:?} failed: {err:#}"),
                }
            }
        }

        let pid = self.spawn(path)?;
        self.kernel.run_process(pid)?;
        Ok(pid)
    }

    fn spawn(&mut self, path: &str) -> Result<ProcessId> {
        let image = {
            let mut vfs = self.vfs.borrow_mut();
            self.loader
                .load_executable(&mut vfs, path)
                .with_context(|| format!("loading {path:?}"))?
        };
        let pid = self.kernel.spawn_process(&mut self.mem, &image, "")?;
        Ok(pid)
    }

    /// Kills a thread, then lets every server drop session-scoped state
    /// for sessions that died with it.
    pub fn kill_thread(&mut self, thread: ThreadId) {
        let dead_sessions = self.kernel.kill_thread(&mut self.mem, thread);
        for session in dead_sessions {
            for slot in &mut self.services {
                slot.as_service_mut()
                    .cancel_session(&mut self.mem, &mut self.kernel, session);
            }
        }
    }

    // ── Request processing ──────────────────────────────────────────────

    /// Drains every server's message queue.
    pub fn pump(&mut self) {
        loop {
            let mut progressed = false;
            for idx in 0..self.services.len() {
                while let Some(msg) = self.kernel.pop_request(ServerId(idx)) {
                    progressed = true;
                    {
                        let mut ctx = IpcContext::new(&mut self.mem, &mut self.kernel, &msg);
                        let service = self.services[idx].as_service_mut();
                        match msg.kind {
                            MessageKind::Connect => service.connect(&mut ctx),
                            MessageKind::Disconnect => service.disconnect(&mut ctx),
                            MessageKind::Request => {
                                service.handle(&mut ctx);
                                if !ctx.responded() {
                                    warn!(
                                        "handler for {:#06x} neither completed nor deferred",
                                        msg.function
                                    );
                                }
                            }
                        }
                    }
                    if msg.kind == MessageKind::Disconnect {
                        self.kernel.remove_session(msg.session);
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Creates a session to a named server.
    pub fn connect(
        &mut self,
        thread: ThreadId,
        server: &str,
        status_addr: GuestAddr,
    ) -> Result<SessionId> {
        let session = self
            .kernel
            .create_session(thread, server, IpcArgs::new(), status_addr)?;
        Ok(session)
    }

    /// Sends a request on a session.
    pub fn send(
        &mut self,
        thread: ThreadId,
        session: SessionId,
        function: u16,
        args: IpcArgs,
        status_addr: GuestAddr,
    ) -> Result<()> {
        self.kernel.send(thread, session, function, args, status_addr)?;
        Ok(())
    }

    // ── Main loop ───────────────────────────────────────────────────────

    /// Runs one scheduling turn.
    ///
    /// Returns 1 while the system lives, 0 once it has terminated (the
    /// last process exited or an exit was requested).
    pub fn step_loop(&mut self) -> i32 {
        if self.exit {
            return 0;
        }

        if self.kernel.current_thread().is_none() {
            // Nothing runnable: fold time forward to the next deadline.
            self.kernel.timing.idle();
            self.kernel.advance_time(&mut self.mem, 0);
            self.prepare_reschedule();
        } else {
            let ticks = self.cpu.run();
            self.kernel.advance_time(&mut self.mem, ticks);
        }

        if self.kernel.should_terminate() {
            self.exit = true;
            return 0;
        }

        self.pump();
        self.reschedule();
        1
    }

    /// Runs until termination; returns the exit status (always 0).
    pub fn run(&mut self) -> i32 {
        while self.step_loop() != 0 {}
        0
    }

    /// Requests that the CPU engine leave its loop for a reschedule.
    pub fn prepare_reschedule(&mut self) {
        self.cpu.prepare_rescheduling();
        self.kernel.prepare_reschedule();
    }

    /// Picks the next thread and swaps register state with the engine.
    pub fn reschedule(&mut self) {
        let previous = self.kernel.current_thread();
        let next = self.kernel.reschedule();
        if previous == next {
            return;
        }

        if let Some(prev) = previous {
            if let Some(thread) = self.kernel.thread_mut(prev) {
                self.cpu.save_state(&mut thread.cpu);
            }
        }
        if let Some(next) = next {
            if let Some(thread) = self.kernel.thread(next) {
                self.cpu.load_state(&thread.cpu);
            }
        }
    }

    /// Stops the CPU engine and flags the loop for exit.
    pub fn request_exit(&mut self) {
        self.cpu.stop();
        self.exit = true;
    }

    /// True once [`request_exit`](Self::request_exit) was called or the
    /// last process exited.
    pub fn should_exit(&self) -> bool {
        self.exit
    }

    /// Tears the system down.
    pub fn shutdown(&mut self) {
        info!("system shutting down");
        self.exit = false;
        self.services.clear();
    }

    // ── Input ───────────────────────────────────────────────────────────

    /// Injects a key event; the window server routes it to the focused
    /// group.
    pub fn inject_key(&mut self, scancode: u32) {
        for slot in &mut self.services {
            if let ServiceSlot::Window(ws) = slot {
                ws.route_key(&mut self.mem, &mut self.kernel, scancode);
                return;
            }
        }
    }

    /// Injects a pointer event.
    pub fn inject_pointer(&mut self) {
        for slot in &mut self.services {
            if let ServiceSlot::Window(ws) = slot {
                ws.route_pointer(&mut self.mem, &mut self.kernel);
                return;
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// The guest address space.
    pub fn mem(&self) -> &AddressSpace {
        &self.mem
    }

    /// The guest address space, mutably.
    pub fn mem_mut(&mut self) -> &mut AddressSpace {
        &mut self.mem
    }

    /// The kernel.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// The kernel, mutably.
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// A handle to the VFS.
    pub fn vfs(&self) -> Rc<RefCell<Vfs>> {
        self.vfs.clone()
    }

    /// The assembly configuration.
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }
}
