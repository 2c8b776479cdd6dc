//! The kernel: object arenas, request routing and lifecycle.
//!
//! The kernel owns every guest-visible object (processes, threads,
//! sessions, server registrations, properties, sync objects) but not the
//! address space or the servers themselves — those are passed in
//! explicitly where an operation needs them, so there is no process-wide
//! aggregate state.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info, trace, warn};
use thiserror::Error;

use karst_base::{status, GuestVersion};
use karst_mem::{AddressSpace, ChunkAttrib, GuestAddr, MemError, Region};

use crate::message::{IpcArgs, Message, MessageKind, NotifyInfo};
use crate::object::{IdGen, ProcessId, ServerId, SessionId, ThreadId};
use crate::process::{LoadedImage, Process};
use crate::sched::Scheduler;
use crate::sync::{KMutex, KSemaphore};
use crate::thread::{CpuState, Thread, ThreadState, DEFAULT_PRIORITY};
use crate::timing::Timing;
use crate::{handles::HandleTable, property::PropertyStore};

/// Default local-data chunk size for new processes.
const LOCAL_CHUNK_SIZE: u32 = 0x1_0000;
/// Minimum thread stack size.
const MIN_STACK_SIZE: u32 = 0x2000;

/// Failures surfaced by kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// No server is registered under the requested name.
    #[error("no server named {0:?}")]
    ServerNotFound(String),
    /// A server with this name already exists.
    #[error("server {0:?} already registered")]
    ServerExists(String),
    /// An id did not name a live object.
    #[error("stale or unknown object id")]
    BadObject,
    /// The sending thread already has a request in flight.
    #[error("thread already waiting on a request")]
    RequestInFlight,
    /// Chunk allocation failed.
    #[error("out of guest memory: {0}")]
    OutOfMemory(#[from] MemError),
}

/// A connection between a process and a server.
#[derive(Debug)]
pub struct Session {
    /// Unique id, monotonic across the kernel.
    pub id: SessionId,
    /// Owning process.
    pub process: ProcessId,
    /// Target server.
    pub server: ServerId,
}

/// Payload for kernel timeout events: complete a notify with
/// [`status::TIMED_OUT`].
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEvent {
    /// The deferred completion to fire.
    pub notify: NotifyInfo,
}

#[derive(Debug)]
struct ServerRecord {
    name: String,
    queue: VecDeque<Message>,
}

/// The emulated kernel.
pub struct Kernel {
    version: GuestVersion,
    ids: IdGen,
    processes: BTreeMap<ProcessId, Process>,
    threads: BTreeMap<ThreadId, Thread>,
    sessions: BTreeMap<SessionId, Session>,
    servers: Vec<ServerRecord>,
    mutexes: BTreeMap<u64, KMutex>,
    semaphores: BTreeMap<u64, KSemaphore>,
    /// Published properties.
    pub properties: PropertyStore,
    /// The virtual clock; timeouts complete notifies.
    pub timing: Timing<TimeoutEvent>,
    sched: Scheduler,
    started: bool,
    reschedule_pending: bool,
}

impl Kernel {
    /// Creates a kernel for the given guest version.
    pub fn new(version: GuestVersion) -> Self {
        Self {
            version,
            ids: IdGen::default(),
            processes: BTreeMap::new(),
            threads: BTreeMap::new(),
            sessions: BTreeMap::new(),
            servers: Vec::new(),
            mutexes: BTreeMap::new(),
            semaphores: BTreeMap::new(),
            properties: PropertyStore::default(),
            timing: Timing::new(),
            sched: Scheduler::new(),
            started: false,
            reschedule_pending: false,
        }
    }

    /// The guest version this kernel emulates.
    pub fn version(&self) -> GuestVersion {
        self.version
    }

    // ── Servers ─────────────────────────────────────────────────────────

    /// Registers a server name. Duplicate names fail.
    pub fn register_server(&mut self, name: &str) -> Result<ServerId, KernelError> {
        if self.servers.iter().any(|s| s.name == name) {
            return Err(KernelError::ServerExists(name.to_owned()));
        }
        let id = ServerId(self.servers.len());
        self.servers.push(ServerRecord {
            name: name.to_owned(),
            queue: VecDeque::new(),
        });
        info!("server {name:?} registered as {id:?}");
        Ok(id)
    }

    /// Looks up a server by name.
    pub fn server_by_name(&self, name: &str) -> Option<ServerId> {
        self.servers
            .iter()
            .position(|s| s.name == name)
            .map(ServerId)
    }

    /// Number of registered servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Pops the oldest pending message for a server.
    pub fn pop_request(&mut self, server: ServerId) -> Option<Message> {
        self.servers.get_mut(server.0)?.queue.pop_front()
    }

    /// True when any server has queued work.
    pub fn has_pending_requests(&self) -> bool {
        self.servers.iter().any(|s| !s.queue.is_empty())
    }

    // ── Processes & threads ─────────────────────────────────────────────

    /// Creates a process (and its primary thread) from a parsed image.
    ///
    /// Allocates the code, local-data and stack chunks, copies the image
    /// payload and leaves the primary thread in
    /// [`ThreadState::Created`]; [`run_process`](Self::run_process)
    /// releases it to the scheduler.
    pub fn spawn_process(
        &mut self,
        mem: &mut AddressSpace,
        image: &LoadedImage,
        args: &str,
    ) -> Result<ProcessId, KernelError> {
        let pid = ProcessId(self.ids.next());

        let image_size = image.code.len() as u32 + image.data.len() as u32 + image.bss_size;
        let code_chunk = mem.alloc_chunk(
            &format!("code${}", pid.0),
            Region::RamCode,
            image_size,
            ChunkAttrib::READ | ChunkAttrib::WRITE | ChunkAttrib::EXECUTE,
        )?;
        let code_base = mem.chunk(code_chunk)?.base;
        mem.write_bytes(code_base, &image.code)?;
        mem.write_bytes(code_base + image.code.len() as u32, &image.data)?;

        let local_chunk = mem.alloc_chunk(
            &format!("local${}", pid.0),
            Region::LocalData,
            LOCAL_CHUNK_SIZE,
            ChunkAttrib::READ | ChunkAttrib::WRITE,
        )?;

        let stack_size = image.stack_size.max(MIN_STACK_SIZE);
        let stack_chunk = mem.alloc_chunk(
            &format!("stack${}", pid.0),
            Region::LocalData,
            stack_size,
            ChunkAttrib::READ | ChunkAttrib::WRITE,
        )?;
        let stack = mem.chunk(stack_chunk)?;
        let stack_top = stack.base + stack.data.len() as u32;

        let entry = code_base + image.entry_offset;
        let tid = ThreadId(self.ids.next());
        self.threads.insert(
            tid,
            Thread {
                id: tid,
                process: pid,
                state: ThreadState::Created,
                priority: DEFAULT_PRIORITY,
                cpu: CpuState::at_entry(entry, stack_top),
                stack_chunk,
                pending_request: None,
            },
        );

        self.processes.insert(
            pid,
            Process {
                id: pid,
                uids: image.uids,
                exe_path: image.path.clone(),
                args: args.to_owned(),
                local_chunk,
                code_chunk,
                entry_point: entry,
                handles: HandleTable::new(),
                threads: vec![tid],
                sessions: Vec::new(),
            },
        );

        info!(
            "process {} spawned from {:?} (entry {entry:#010x})",
            pid.0, image.path
        );
        Ok(pid)
    }

    /// Releases a process's primary thread to the scheduler.
    pub fn run_process(&mut self, pid: ProcessId) -> Result<(), KernelError> {
        let tid = self
            .processes
            .get(&pid)
            .and_then(Process::primary_thread)
            .ok_or(KernelError::BadObject)?;
        let thread = self.threads.get_mut(&tid).ok_or(KernelError::BadObject)?;
        if thread.state == ThreadState::Created {
            thread.state = ThreadState::Ready;
            self.sched.make_ready(tid, thread.priority);
            self.started = true;
        }
        Ok(())
    }

    /// Borrows a process.
    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Mutably borrows a process.
    pub fn process_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Borrows a thread.
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    /// Mutably borrows a thread.
    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&tid)
    }

    /// The process owning `tid`.
    pub fn process_of(&self, tid: ThreadId) -> Option<&Process> {
        self.threads
            .get(&tid)
            .and_then(|t| self.processes.get(&t.process))
    }

    /// Kills a thread: cancels its pending request, frees its handles and
    /// removes it from scheduling. When this was the process's last live
    /// thread the process dies too; the ids of its sessions are returned
    /// so the caller can tear them down at the servers.
    pub fn kill_thread(
        &mut self,
        mem: &mut AddressSpace,
        tid: ThreadId,
    ) -> Vec<SessionId> {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return Vec::new();
        };
        let pid = thread.process;

        if let Some(status_addr) = thread.pending_request.take() {
            // The cell must still be resolved: cancellation is a real
            // completion from the guest's point of view.
            if let Err(err) = mem.write_u32(status_addr, status::CANCEL as u32) {
                warn!("cancel write for dead thread {tid:?} failed: {err}");
            }
        }
        thread.state = ThreadState::Dead;
        let stack_chunk = thread.stack_chunk;
        self.sched.remove(tid);
        let _ = mem.free_chunk(stack_chunk);

        if let Some(process) = self.processes.get_mut(&pid) {
            process.handles.free_all_by_owner(tid.0);
        }
        let all_dead = match self.processes.get(&pid) {
            Some(process) => process
                .threads
                .iter()
                .all(|t| self.threads.get(t).map_or(true, |t| !t.alive())),
            None => return Vec::new(),
        };
        if !all_dead {
            return Vec::new();
        }

        // Last thread gone: the process goes with it.
        let process = self.processes.remove(&pid).expect("checked above");
        debug!("process {} exited", pid.0);
        let _ = mem.free_chunk(process.local_chunk);
        let _ = mem.free_chunk(process.code_chunk);
        let sessions = process.sessions.clone();
        for sid in &sessions {
            self.sessions.remove(sid);
        }
        sessions
    }

    // ── Sessions & messages ─────────────────────────────────────────────

    /// Creates a session from `thread`'s process to a named server and
    /// queues the connect message (the connect handler runs on the next
    /// request-processing pass, completing into `status_addr`).
    pub fn create_session(
        &mut self,
        thread: ThreadId,
        server_name: &str,
        args: IpcArgs,
        status_addr: GuestAddr,
    ) -> Result<SessionId, KernelError> {
        let server = self
            .server_by_name(server_name)
            .ok_or_else(|| KernelError::ServerNotFound(server_name.to_owned()))?;
        let pid = self
            .threads
            .get(&thread)
            .map(|t| t.process)
            .ok_or(KernelError::BadObject)?;

        let sid = SessionId(self.ids.next());
        self.sessions.insert(
            sid,
            Session {
                id: sid,
                process: pid,
                server,
            },
        );
        if let Some(process) = self.processes.get_mut(&pid) {
            process.sessions.push(sid);
        }

        self.enqueue(Message {
            kind: MessageKind::Connect,
            function: 0,
            args,
            session: sid,
            thread,
            status_addr,
        })?;
        trace!("session {} -> {server_name:?}", sid.0);
        Ok(sid)
    }

    /// Sends a request on a session, blocking the sending thread until a
    /// handler completes the message.
    pub fn send(
        &mut self,
        thread: ThreadId,
        session: SessionId,
        function: u16,
        args: IpcArgs,
        status_addr: GuestAddr,
    ) -> Result<(), KernelError> {
        if !self.sessions.contains_key(&session) {
            return Err(KernelError::BadObject);
        }
        self.enqueue(Message {
            kind: MessageKind::Request,
            function,
            args,
            session,
            thread,
            status_addr,
        })
    }

    /// Queues the disconnect message for a session and unlinks it from
    /// its process. The caller must also give the owning server a chance
    /// to cancel session-scoped notifies.
    pub fn close_session(
        &mut self,
        thread: ThreadId,
        session: SessionId,
        status_addr: GuestAddr,
    ) -> Result<(), KernelError> {
        if !self.sessions.contains_key(&session) {
            return Err(KernelError::BadObject);
        }
        self.enqueue(Message {
            kind: MessageKind::Disconnect,
            function: 0,
            args: IpcArgs::new(),
            session,
            thread,
            status_addr,
        })
    }

    /// Removes a session record (after the server saw the disconnect).
    pub fn remove_session(&mut self, session: SessionId) {
        if let Some(sess) = self.sessions.remove(&session) {
            if let Some(process) = self.processes.get_mut(&sess.process) {
                process.sessions.retain(|s| *s != session);
            }
        }
    }

    /// Borrows a session.
    pub fn session(&self, session: SessionId) -> Option<&Session> {
        self.sessions.get(&session)
    }

    fn enqueue(&mut self, msg: Message) -> Result<(), KernelError> {
        let session = self
            .sessions
            .get(&msg.session)
            .ok_or(KernelError::BadObject)?;
        let server = session.server;

        let thread = self
            .threads
            .get_mut(&msg.thread)
            .ok_or(KernelError::BadObject)?;

        // Asynchronous requests leave the sender running; the handler
        // registers a notify and the status cell is written when it
        // fires. Everything else blocks the sender until completion.
        let blocking = msg.kind != MessageKind::Request || !msg.is_async();
        if blocking {
            if thread.pending_request.is_some() {
                return Err(KernelError::RequestInFlight);
            }
            thread.pending_request = Some(msg.status_addr);
            if thread.state == ThreadState::Running || thread.state == ThreadState::Ready {
                thread.state = ThreadState::WaitingOnRequest;
            }
            self.sched.remove(msg.thread);
        }

        self.servers[server.0].queue.push_back(msg);
        Ok(())
    }

    /// Completes a deferred notify: writes the status cell and makes the
    /// thread runnable again.
    pub fn complete(&mut self, mem: &mut AddressSpace, notify: NotifyInfo, code: i32) {
        trace!(
            "complete {:?} <- {}",
            notify.thread,
            status::name(code)
        );
        if let Err(err) = mem.write_u32(notify.status_addr, code as u32) {
            warn!("status write at {:#010x} failed: {err}", notify.status_addr);
        }

        let Some(thread) = self.threads.get_mut(&notify.thread) else {
            return;
        };
        // Only the thread's own blocking request unblocks it; an async
        // notify completing for a running thread just writes the cell.
        if thread.pending_request == Some(notify.status_addr) {
            thread.pending_request = None;
            if thread.state == ThreadState::WaitingOnRequest {
                thread.state = ThreadState::Ready;
                let priority = thread.priority;
                self.sched.make_ready(notify.thread, priority);
            }
        }
    }

    // ── Timing ──────────────────────────────────────────────────────────

    /// Advances the virtual clock and fires due timeouts.
    pub fn advance_time(&mut self, mem: &mut AddressSpace, elapsed: u64) {
        for event in self.timing.advance(elapsed) {
            self.complete(mem, event.notify, status::TIMED_OUT);
        }
    }

    // ── Scheduling ──────────────────────────────────────────────────────

    /// The thread currently bound to the CPU engine.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.sched.current()
    }

    /// The process of the current thread.
    pub fn current_process(&self) -> Option<ProcessId> {
        self.sched
            .current()
            .and_then(|t| self.threads.get(&t))
            .map(|t| t.process)
    }

    /// Picks the next runnable thread.
    ///
    /// A still-running current thread is rotated to the back of its
    /// priority class (cooperative quantum end). Returns the new current
    /// thread, or `None` when everything is blocked.
    pub fn reschedule(&mut self) -> Option<ThreadId> {
        self.reschedule_pending = false;

        if let Some(current) = self.sched.current() {
            if let Some(thread) = self.threads.get_mut(&current) {
                if thread.state == ThreadState::Running {
                    thread.state = ThreadState::Ready;
                    let priority = thread.priority;
                    self.sched.make_ready(current, priority);
                }
            }
            self.sched.clear_current();
        }

        let next = self.sched.pick()?;
        if let Some(thread) = self.threads.get_mut(&next) {
            thread.state = ThreadState::Running;
        }
        Some(next)
    }

    /// Requests that the CPU engine leave its run loop at the next safe
    /// point.
    pub fn prepare_reschedule(&mut self) {
        self.reschedule_pending = true;
    }

    /// True when a reschedule has been requested but not performed.
    pub fn reschedule_pending(&self) -> bool {
        self.reschedule_pending
    }

    /// True once every thread has died after at least one process ran.
    pub fn should_terminate(&self) -> bool {
        self.started && self.threads.values().all(|t| !t.alive())
    }

    // ── Sync objects ────────────────────────────────────────────────────

    /// Creates a named mutex, returning its id.
    pub fn create_mutex(&mut self, name: &str) -> u64 {
        let id = self.ids.next();
        self.mutexes.insert(id, KMutex::new(name));
        id
    }

    /// Waits on a mutex; parks the thread when contended.
    pub fn wait_mutex(&mut self, thread: ThreadId, id: u64) -> Result<(), KernelError> {
        let mutex = self.mutexes.get_mut(&id).ok_or(KernelError::BadObject)?;
        if !mutex.wait(thread) {
            self.park(thread);
        }
        Ok(())
    }

    /// Signals a mutex, waking the next waiter if the lock freed up.
    pub fn signal_mutex(&mut self, thread: ThreadId, id: u64) -> Result<(), KernelError> {
        let mutex = self.mutexes.get_mut(&id).ok_or(KernelError::BadObject)?;
        if let Some(next) = mutex.signal(thread) {
            self.unpark(next);
        }
        Ok(())
    }

    /// Creates a named semaphore, returning its id.
    pub fn create_semaphore(&mut self, name: &str, initial: i32) -> u64 {
        let id = self.ids.next();
        self.semaphores.insert(id, KSemaphore::new(name, initial));
        id
    }

    /// Waits on a semaphore; parks the thread when empty.
    pub fn wait_semaphore(&mut self, thread: ThreadId, id: u64) -> Result<(), KernelError> {
        let sem = self.semaphores.get_mut(&id).ok_or(KernelError::BadObject)?;
        if !sem.wait(thread) {
            self.park(thread);
        }
        Ok(())
    }

    /// Signals a semaphore, waking the next waiter if one was parked.
    pub fn signal_semaphore(&mut self, id: u64) -> Result<(), KernelError> {
        let sem = self.semaphores.get_mut(&id).ok_or(KernelError::BadObject)?;
        if let Some(next) = sem.signal() {
            self.unpark(next);
        }
        Ok(())
    }

    fn park(&mut self, thread: ThreadId) {
        if let Some(t) = self.threads.get_mut(&thread) {
            t.state = ThreadState::WaitingOnObject;
        }
        self.sched.remove(thread);
    }

    fn unpark(&mut self, thread: ThreadId) {
        if let Some(t) = self.threads.get_mut(&thread) {
            if t.state == ThreadState::WaitingOnObject {
                t.state = ThreadState::Ready;
                let priority = t.priority;
                self.sched.make_ready(thread, priority);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use karst_base::UidTriple;

    use super::*;

    fn image() -> LoadedImage {
        LoadedImage {
            uids: UidTriple::new(0x1000_007a, 0x2000_0000, 0x3000_0000),
            path: "c:\\sys\\bin\\app.exe".into(),
            code: vec![0xde, 0xad, 0xbe, 0xef],
            data: vec![1, 2, 3],
            bss_size: 16,
            entry_offset: 0,
            stack_size: 0x1000,
        }
    }

    fn setup() -> (Kernel, AddressSpace, ProcessId, ThreadId) {
        let mut kernel = Kernel::new(GuestVersion::V94);
        let mut mem = AddressSpace::new(GuestVersion::V94);
        let pid = kernel.spawn_process(&mut mem, &image(), "").unwrap();
        kernel.run_process(pid).unwrap();
        let tid = kernel.process(pid).unwrap().primary_thread().unwrap();
        (kernel, mem, pid, tid)
    }

    #[test]
    fn spawn_lays_out_chunks_and_primary_thread() {
        let (kernel, mem, pid, tid) = setup();
        let process = kernel.process(pid).unwrap();
        let code = mem.chunk(process.code_chunk).unwrap();
        assert_eq!(&code.data[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&code.data[4..7], &[1, 2, 3]);

        let thread = kernel.thread(tid).unwrap();
        assert_eq!(thread.state, ThreadState::Ready);
        assert_eq!(thread.cpu.regs[15], process.entry_point);
        assert_ne!(thread.cpu.regs[13], 0);
    }

    #[test]
    fn duplicate_server_names_fail() {
        let mut kernel = Kernel::new(GuestVersion::V94);
        kernel.register_server("!FileServer").unwrap();
        assert!(matches!(
            kernel.register_server("!FileServer"),
            Err(KernelError::ServerExists(_))
        ));
    }

    #[test]
    fn session_to_unknown_server_fails() {
        let (mut kernel, _mem, _pid, tid) = setup();
        assert!(matches!(
            kernel.create_session(tid, "!NoSuch", IpcArgs::new(), 0),
            Err(KernelError::ServerNotFound(_))
        ));
    }

    #[test]
    fn send_blocks_and_complete_unblocks() {
        let (mut kernel, mut mem, pid, tid) = setup();
        let server = kernel.register_server("!Echo").unwrap();
        let status_addr = {
            let local = kernel.process(pid).unwrap().local_chunk;
            mem.chunk(local).unwrap().base
        };

        let sid = kernel
            .create_session(tid, "!Echo", IpcArgs::new(), status_addr)
            .unwrap();
        assert_eq!(
            kernel.thread(tid).unwrap().state,
            ThreadState::WaitingOnRequest
        );

        // A second request while blocked is a protocol violation.
        assert!(matches!(
            kernel.send(tid, sid, 1, IpcArgs::new(), status_addr),
            Err(KernelError::RequestInFlight)
        ));

        let msg = kernel.pop_request(server).unwrap();
        assert_eq!(msg.kind, MessageKind::Connect);
        kernel.complete(
            &mut mem,
            NotifyInfo {
                thread: tid,
                status_addr,
            },
            status::NONE,
        );
        assert_eq!(kernel.thread(tid).unwrap().state, ThreadState::Ready);
        assert_eq!(mem.read_u32(status_addr).unwrap(), 0);
    }

    #[test]
    fn fifo_order_per_server() {
        let (mut kernel, mut mem, _pid, tid) = setup();
        let server = kernel.register_server("!Echo").unwrap();
        let sid = kernel
            .create_session(tid, "!Echo", IpcArgs::new(), 0x0040_0000)
            .unwrap();
        // Drain the connect, unblock, then queue two requests from two
        // fresh threads of the same process.
        let connect = kernel.pop_request(server).unwrap();
        kernel.complete(
            &mut mem,
            NotifyInfo {
                thread: connect.thread,
                status_addr: connect.status_addr,
            },
            status::NONE,
        );

        kernel.send(tid, sid, 7, IpcArgs::new(), 0x0040_0004).unwrap();
        let first = kernel.pop_request(server).unwrap();
        kernel.complete(
            &mut mem,
            NotifyInfo {
                thread: tid,
                status_addr: first.status_addr,
            },
            status::NONE,
        );
        kernel.send(tid, sid, 8, IpcArgs::new(), 0x0040_0008).unwrap();
        let second = kernel.pop_request(server).unwrap();

        assert_eq!(first.function, 7);
        assert_eq!(second.function, 8);
    }

    #[test]
    fn kill_last_thread_tears_down_process() {
        let (mut kernel, mut mem, pid, tid) = setup();
        kernel.register_server("!Echo").unwrap();
        let sid = kernel
            .create_session(tid, "!Echo", IpcArgs::new(), 0x0040_0000)
            .unwrap();

        let closed = kernel.kill_thread(&mut mem, tid);
        assert_eq!(closed, vec![sid]);
        assert!(kernel.process(pid).is_none());
        assert!(kernel.should_terminate());
        // The cancelled request's cell observed the cancellation.
        assert_eq!(mem.read_u32(0x0040_0000).unwrap(), status::CANCEL as u32);
    }

    #[test]
    fn reschedule_rotates_equal_priorities() {
        let (mut kernel, mut mem, _pid, tid_a) = setup();
        let pid_b = kernel.spawn_process(&mut mem, &image(), "").unwrap();
        kernel.run_process(pid_b).unwrap();
        let tid_b = kernel.process(pid_b).unwrap().primary_thread().unwrap();

        assert_eq!(kernel.reschedule(), Some(tid_a));
        assert_eq!(kernel.reschedule(), Some(tid_b));
        assert_eq!(kernel.reschedule(), Some(tid_a));
    }

    #[test]
    fn timeouts_complete_with_timed_out() {
        let (mut kernel, mut mem, pid, tid) = setup();
        let status_addr = {
            let local = kernel.process(pid).unwrap().local_chunk;
            mem.chunk(local).unwrap().base + 0x20
        };
        // Park the thread as if an async request had registered a notify.
        kernel.thread_mut(tid).unwrap().state = ThreadState::WaitingOnRequest;
        kernel.thread_mut(tid).unwrap().pending_request = Some(status_addr);
        kernel.timing.schedule(
            50,
            TimeoutEvent {
                notify: NotifyInfo {
                    thread: tid,
                    status_addr,
                },
            },
        );

        kernel.advance_time(&mut mem, 49);
        assert_eq!(
            kernel.thread(tid).unwrap().state,
            ThreadState::WaitingOnRequest
        );
        kernel.advance_time(&mut mem, 1);
        assert_eq!(kernel.thread(tid).unwrap().state, ThreadState::Ready);
        assert_eq!(
            mem.read_u32(status_addr).unwrap(),
            status::TIMED_OUT as u32
        );
    }

    #[test]
    fn mutex_contention_parks_and_hands_off() {
        let (mut kernel, mut mem, _pid, tid_a) = setup();
        let pid_b = kernel.spawn_process(&mut mem, &image(), "").unwrap();
        kernel.run_process(pid_b).unwrap();
        let tid_b = kernel.process(pid_b).unwrap().primary_thread().unwrap();

        let mutex = kernel.create_mutex("dfs lock");
        kernel.wait_mutex(tid_a, mutex).unwrap();
        kernel.wait_mutex(tid_b, mutex).unwrap();
        assert_eq!(
            kernel.thread(tid_b).unwrap().state,
            ThreadState::WaitingOnObject
        );

        kernel.signal_mutex(tid_a, mutex).unwrap();
        assert_eq!(kernel.thread(tid_b).unwrap().state, ThreadState::Ready);
    }
}
