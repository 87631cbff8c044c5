use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cellua_abi::exit::ABORTED;
use cellua_abi::{codes, Bounds, HashType, Place, ProcessId, Source, SpawnArgs, HASH_LEN};

use crate::abi::{HostAbi, Program};
use crate::error::MachineError;
use crate::replay::{Event, EventLog};
use crate::tx::{data_hash, Transaction};

/// Limits of one simulated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Including the root instance.
    pub max_processes: usize,
    /// Pipe ends ever created.
    pub max_channels: usize,
    /// Bytes a pipe buffers before writers block.
    pub pipe_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            max_processes: 16,
            max_channels: 64,
            pipe_capacity: 4096,
        }
    }
}

/// Process lifecycle.
enum ProcessState {
    Pending(Arc<dyn Program>),
    Running,
    /// Parked in a primitive that could not complete at progress epoch `since`.
    Blocked { since: u64 },
    Exited(i8),
}

struct Process {
    parent: Option<u64>,
    argv: Vec<String>,
    inherited: Vec<u64>,
    state: ProcessState,
    exit_request: Option<i8>,
    waited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Read,
    Write,
}

struct Channel {
    pipe: usize,
    end: End,
    owner: u64,
    closed: bool,
}

struct Pipe {
    buffer: VecDeque<u8>,
    read_fd: u64,
    write_fd: u64,
}

/// Outcome of one attempt at a possibly-blocking primitive.
enum Step {
    Done(u64),
    Blocked,
}

struct MachineState {
    tx: Transaction,
    config: MachineConfig,
    programs: BTreeMap<[u8; HASH_LEN], Arc<dyn Program>>,
    processes: BTreeMap<u64, Process>,
    next_pid: u64,
    channels: BTreeMap<u64, Channel>,
    pipes: Vec<Pipe>,
    next_fd: u64,
    local_file: Option<Vec<u8>>,
    log: EventLog,
    /// The only instance allowed to run.
    current: Option<u64>,
    /// Bumped by every primitive that may unblock another instance.
    epoch: u64,
    /// Set once the root instance has ended.
    halted: bool,
}

struct Shared {
    state: Mutex<MachineState>,
    turn: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unwinds instances that are still parked when the root instance ends.
struct Halted;

/// Deterministic host.
///
/// Every instance gets a thread, but only the holder of the baton runs. An
/// instance that would block hands the baton to the lowest-numbered instance
/// that can make progress: one that has not started yet, or one parked since
/// before the last state change. When there is none the primitive fails with
/// `WOULD_BLOCK` instead of hanging. The transaction ends with the root
/// instance; instances still parked at that point are unwound.
pub struct Machine {
    shared: Arc<Shared>,
}

impl Machine {
    pub fn new(tx: Transaction) -> Self {
        Self::with_config(tx, MachineConfig::default())
    }

    pub fn with_config(tx: Transaction, config: MachineConfig) -> Self {
        Machine {
            shared: Arc::new(Shared {
                state: Mutex::new(MachineState {
                    tx,
                    config,
                    programs: BTreeMap::new(),
                    processes: BTreeMap::new(),
                    next_pid: ProcessId::ROOT.0,
                    channels: BTreeMap::new(),
                    pipes: Vec::new(),
                    next_fd: 2,
                    local_file: None,
                    log: EventLog::new(),
                    current: None,
                    epoch: 0,
                    halted: false,
                }),
                turn: Condvar::new(),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make `program` runnable from any cell whose data is exactly `code`.
    pub fn install(&self, code: &[u8], program: Arc<dyn Program>) -> [u8; HASH_LEN] {
        let hash = data_hash(code);
        self.shared.lock().programs.insert(hash, program);
        hash
    }

    /// Contents served by the native local-file primitive.
    pub fn set_local_file(&self, contents: Vec<u8>) {
        self.shared.lock().local_file = Some(contents);
    }

    /// Run `program` as the root instance and return its exit code once the
    /// root instance has ended.
    pub fn run(&self, program: Arc<dyn Program>, argv: Vec<String>) -> Result<i8, MachineError> {
        let root = ProcessId::ROOT.0;
        let mut state = self.shared.lock();
        if !state.processes.is_empty() {
            return Err(MachineError::AlreadyRun);
        }
        state.next_pid = root + 1;
        state.processes.insert(root, Process::pending(None, argv, Vec::new(), program));
        state.current = Some(root);
        launch(&self.shared, &mut state, root)?;
        while !state.halted {
            state = self.shared.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        let exit_code = match state.processes.get(&root).map(|p| &p.state) {
            Some(ProcessState::Exited(code)) => *code,
            _ => ABORTED,
        };
        drop(state);

        let handles = std::mem::take(&mut *self.shared.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            let _ = handle.join();
        }
        Ok(exit_code)
    }

    /// Locate the transaction script's code among the cell deps, the way a
    /// real host would, and run the program installed for it.
    pub fn verify(&self) -> Result<i8, MachineError> {
        let program = {
            let state = self.shared.lock();
            let script = &state.tx.script;
            let missing = || MachineError::ScriptCodeNotFound {
                code_hash: hex::encode(script.code_hash),
                hash_type: script.hash_type,
            };
            let hash_type = HashType::from_u8(script.hash_type).ok_or_else(missing)?;
            let cell = state
                .tx
                .find_dependency(&script.code_hash, hash_type)
                .and_then(|index| state.tx.cell_deps.get(index))
                .ok_or_else(missing)?;
            let hash = data_hash(&cell.data);
            state
                .programs
                .get(&hash)
                .cloned()
                .ok_or_else(|| MachineError::ProgramNotInstalled(hex::encode(hash)))?
        };
        self.run(program, Vec::new())
    }

    pub fn exit_code(&self, pid: ProcessId) -> Option<i8> {
        match self.shared.lock().processes.get(&pid.0)?.state {
            ProcessState::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn process_count(&self) -> usize {
        self.shared.lock().processes.len()
    }

    /// Snapshot of the syscall log.
    pub fn log(&self) -> EventLog {
        self.shared.lock().log.clone()
    }

    pub fn transaction(&self) -> Transaction {
        self.shared.lock().tx.clone()
    }
}

impl Process {
    fn pending(parent: Option<u64>, argv: Vec<String>, inherited: Vec<u64>, program: Arc<dyn Program>) -> Self {
        Process {
            parent,
            argv,
            inherited,
            state: ProcessState::Pending(program),
            exit_request: None,
            waited: false,
        }
    }
}

/// Start the thread of a pending instance. The caller has already given it
/// the baton.
fn launch(shared: &Arc<Shared>, state: &mut MachineState, pid: u64) -> Result<(), MachineError> {
    let Some((program, argv)) = state.start(pid) else {
        return Ok(());
    };
    let worker = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("instance-{pid}"))
        .spawn(move || instance_main(worker, pid, program, argv))?;
    shared
        .threads
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(handle);
    Ok(())
}

fn instance_main(shared: Arc<Shared>, pid: u64, program: Arc<dyn Program>, argv: Vec<String>) {
    tracing::debug!(pid, argc = argv.len(), "instance started");
    let host = InstanceHost {
        shared: Arc::clone(&shared),
        pid,
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| program.run(Box::new(host), argv)));

    let mut state = shared.lock();
    if state.halted {
        return;
    }
    state.finish(pid, outcome.is_err());
    if pid == ProcessId::ROOT.0 {
        state.halted = true;
        state.current = None;
        shared.turn.notify_all();
    } else {
        pass_baton(&shared, &mut state, pid);
    }
}

/// Hand the baton from `from` to the next instance able to make progress,
/// starting it if it is still pending. Returns the new holder.
fn pass_baton(shared: &Arc<Shared>, state: &mut MachineState, from: u64) -> Option<u64> {
    while let Some(next) = state.next_runnable(from) {
        state.log.record(Event::Handoff { from, to: next });
        state.current = Some(next);
        if let Err(e) = launch(shared, state, next) {
            tracing::warn!(pid = next, error = %e, "instance could not be started");
            state.finish(next, true);
            continue;
        }
        shared.turn.notify_all();
        return Some(next);
    }
    state.current = None;
    shared.turn.notify_all();
    None
}

/// Copy `data[offset..]` into `buf`, reporting the full remaining length.
fn copy_out(data: &[u8], buf: &mut [u8], len: &mut u64, offset: u64) -> u64 {
    let rest = match usize::try_from(offset).ok().and_then(|o| data.get(o..)) {
        Some(rest) => rest,
        None => return codes::SLICE_OUT_OF_BOUND,
    };
    let n = rest.len().min(buf.len()).min(*len as usize);
    buf[..n].copy_from_slice(&rest[..n]);
    *len = rest.len() as u64;
    codes::SUCCESS
}

impl MachineState {
    fn start(&mut self, pid: u64) -> Option<(Arc<dyn Program>, Vec<String>)> {
        let process = self.processes.get_mut(&pid)?;
        match std::mem::replace(&mut process.state, ProcessState::Running) {
            ProcessState::Pending(program) => Some((program, process.argv.clone())),
            other => {
                process.state = other;
                None
            }
        }
    }

    fn finish(&mut self, pid: u64, panicked: bool) {
        let Some(process) = self.processes.get_mut(&pid) else {
            return;
        };
        let (exit_code, aborted) = match process.exit_request {
            Some(code) => (code, false),
            None => (ABORTED, true),
        };
        process.state = ProcessState::Exited(exit_code);
        self.epoch += 1;
        for channel in self.channels.values_mut().filter(|c| c.owner == pid) {
            channel.closed = true;
        }
        if aborted {
            tracing::warn!(pid, panicked, "instance ended without a controlled exit");
        } else {
            tracing::debug!(pid, exit_code, "instance exited");
        }
        self.log.record(Event::Terminated { pid, exit_code, aborted });
    }

    /// Lowest instance other than `from` that has not started yet or has
    /// been parked since before the last state change.
    fn next_runnable(&self, from: u64) -> Option<u64> {
        let epoch = self.epoch;
        self.processes
            .iter()
            .find(|(pid, p)| {
                **pid != from
                    && match p.state {
                        ProcessState::Pending(_) => true,
                        ProcessState::Blocked { since } => since < epoch,
                        _ => false,
                    }
            })
            .map(|(pid, _)| *pid)
    }

    fn set_state(&mut self, pid: u64, state: ProcessState) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.state = state;
        }
    }

    /// The pipe behind an end `pid` owns and has not closed.
    fn owned(&self, pid: u64, fd: u64, end: End) -> Result<usize, u64> {
        let channel = self
            .channels
            .get(&fd)
            .filter(|c| c.owner == pid && c.end == end)
            .ok_or(codes::INVALID_FD)?;
        if channel.closed {
            return Err(codes::OTHER_END_CLOSED);
        }
        Ok(channel.pipe)
    }

    fn is_closed(&self, fd: u64) -> bool {
        self.channels.get(&fd).map_or(true, |c| c.closed)
    }

    fn load_cell_data(&self, buf: &mut [u8], len: &mut u64, offset: u64, index: u64, source: u64) -> u64 {
        let Some(source) = Source::from_raw(source) else {
            return codes::INDEX_OUT_OF_BOUND;
        };
        match self.tx.cell(source, index) {
            Some(cell) => copy_out(&cell.data, buf, len, offset),
            None => codes::INDEX_OUT_OF_BOUND,
        }
    }

    fn spawn(
        &mut self,
        parent: u64,
        index: u64,
        source: u64,
        place: u64,
        bounds: u64,
        args: &SpawnArgs,
    ) -> Result<u64, u64> {
        if self.processes.len() >= self.config.max_processes {
            return Err(codes::MAX_VMS_SPAWNED);
        }
        let source = Source::from_raw(source).ok_or(codes::INDEX_OUT_OF_BOUND)?;
        let place = Place::from_raw(place).ok_or(codes::WRONG_FORMAT)?;
        let blob = match place {
            Place::CellData => self.tx.cell(source, index).map(|c| c.data.as_slice()),
            Place::Witness => self.tx.witness(source, index),
        }
        .ok_or(codes::INDEX_OUT_OF_BOUND)?;
        let code = Bounds::from_raw(bounds).apply(blob).ok_or(codes::SLICE_OUT_OF_BOUND)?;
        let program = self.programs.get(&data_hash(code)).cloned().ok_or(codes::WRONG_FORMAT)?;

        let mut inherited = Vec::with_capacity(args.inherited.len());
        for fd in &args.inherited {
            let owned = self
                .channels
                .get(&fd.0)
                .is_some_and(|c| c.owner == parent && !c.closed);
            if !owned || inherited.contains(&fd.0) {
                return Err(codes::INVALID_FD);
            }
            inherited.push(fd.0);
        }

        let child = self.next_pid;
        self.next_pid += 1;
        for fd in &inherited {
            if let Some(channel) = self.channels.get_mut(fd) {
                channel.owner = child;
            }
        }
        self.processes.insert(
            child,
            Process::pending(Some(parent), args.argv.clone(), inherited, program),
        );
        tracing::debug!(parent, child, "instance spawned");
        Ok(child)
    }

    fn pipe(&mut self, pid: u64) -> Result<[u64; 2], u64> {
        if self.channels.len() + 2 > self.config.max_channels {
            return Err(codes::MAX_FDS_CREATED);
        }
        let read_fd = self.next_fd;
        let write_fd = read_fd + 1;
        self.next_fd += 2;
        let pipe = self.pipes.len();
        self.pipes.push(Pipe {
            buffer: VecDeque::new(),
            read_fd,
            write_fd,
        });
        for (fd, end) in [(read_fd, End::Read), (write_fd, End::Write)] {
            self.channels.insert(fd, Channel { pipe, end, owner: pid, closed: false });
        }
        Ok([read_fd, write_fd])
    }

    fn try_read(&mut self, pid: u64, fd: u64, buf: &mut [u8], len: &mut u64) -> Step {
        let pipe = match self.owned(pid, fd, End::Read) {
            Ok(pipe) => pipe,
            Err(code) => return Step::Done(code),
        };
        let writer_closed = match self.pipes.get(pipe) {
            Some(p) => self.is_closed(p.write_fd),
            None => return Step::Done(codes::INVALID_FD),
        };
        let Some(pipe) = self.pipes.get_mut(pipe) else {
            return Step::Done(codes::INVALID_FD);
        };
        let want = buf.len().min(*len as usize);
        if want == 0 {
            *len = 0;
            return Step::Done(codes::SUCCESS);
        }
        if !pipe.buffer.is_empty() {
            let n = want.min(pipe.buffer.len());
            for (slot, byte) in buf.iter_mut().zip(pipe.buffer.drain(..n)) {
                *slot = byte;
            }
            *len = n as u64;
            return Step::Done(codes::SUCCESS);
        }
        if writer_closed {
            return Step::Done(codes::OTHER_END_CLOSED);
        }
        Step::Blocked
    }

    fn try_write(&mut self, pid: u64, fd: u64, buf: &[u8], len: &mut u64) -> Step {
        let pipe = match self.owned(pid, fd, End::Write) {
            Ok(pipe) => pipe,
            Err(code) => return Step::Done(code),
        };
        let reader_closed = match self.pipes.get(pipe) {
            Some(p) => self.is_closed(p.read_fd),
            None => return Step::Done(codes::INVALID_FD),
        };
        if reader_closed {
            return Step::Done(codes::OTHER_END_CLOSED);
        }
        let capacity = self.config.pipe_capacity;
        let Some(pipe) = self.pipes.get_mut(pipe) else {
            return Step::Done(codes::INVALID_FD);
        };
        let want = buf.len().min(*len as usize);
        if want == 0 {
            *len = 0;
            return Step::Done(codes::SUCCESS);
        }
        let space = capacity.saturating_sub(pipe.buffer.len());
        if space == 0 {
            return Step::Blocked;
        }
        let n = want.min(space);
        pipe.buffer.extend(&buf[..n]);
        *len = n as u64;
        Step::Done(codes::SUCCESS)
    }

    fn try_wait(&mut self, pid: u64, target: u64, exit_code: &mut i8) -> Step {
        let Some(child) = self.processes.get_mut(&target) else {
            return Step::Done(codes::WAIT_FAILURE);
        };
        if child.parent != Some(pid) || child.waited {
            return Step::Done(codes::WAIT_FAILURE);
        }
        match child.state {
            ProcessState::Exited(code) => {
                child.waited = true;
                *exit_code = code;
                Step::Done(codes::SUCCESS)
            }
            _ => Step::Blocked,
        }
    }

    fn close(&mut self, pid: u64, fd: u64) -> u64 {
        match self.channels.get_mut(&fd) {
            Some(channel) if channel.owner == pid => {
                if channel.closed {
                    codes::OTHER_END_CLOSED
                } else {
                    channel.closed = true;
                    self.epoch += 1;
                    codes::SUCCESS
                }
            }
            _ => codes::INVALID_FD,
        }
    }
}

/// The syscall table handed to one running instance.
struct InstanceHost {
    shared: Arc<Shared>,
    pid: u64,
}

impl InstanceHost {
    /// Retry `attempt` until it completes, handing the baton to other
    /// instances in between.
    fn drive(&mut self, mut attempt: impl FnMut(&mut MachineState) -> Step) -> u64 {
        let pid = self.pid;
        let mut state = self.shared.lock();
        loop {
            let blocked_at = match attempt(&mut state) {
                Step::Done(code) => {
                    if code == codes::SUCCESS {
                        state.epoch += 1;
                    }
                    return code;
                }
                Step::Blocked => state.epoch,
            };
            state.set_state(pid, ProcessState::Blocked { since: blocked_at });
            let Some(next) = pass_baton(&self.shared, &mut state, pid) else {
                tracing::debug!(pid, "no instance can make progress");
                state.current = Some(pid);
                state.set_state(pid, ProcessState::Running);
                return codes::WOULD_BLOCK;
            };
            tracing::debug!(from = pid, to = next, "blocked, handing off");
            state = self.wait_turn(state);
            state.set_state(pid, ProcessState::Running);
        }
    }

    /// Park until the baton comes back. Unwinds once the transaction is over.
    fn wait_turn<'a>(&self, mut state: MutexGuard<'a, MachineState>) -> MutexGuard<'a, MachineState> {
        while state.current != Some(self.pid) && !state.halted {
            state = self.shared.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.halted {
            drop(state);
            panic::resume_unwind(Box::new(Halted));
        }
        state
    }

    fn record(&self, event: Event) {
        self.shared.lock().log.record(event);
    }
}

impl HostAbi for InstanceHost {
    fn load_script(&mut self, buf: &mut [u8], len: &mut u64, offset: u64) -> u64 {
        let mut state = self.shared.lock();
        let bytes = state.tx.script.to_bytes();
        let code = copy_out(&bytes, buf, len, offset);
        state.log.record(Event::LoadScript { pid: self.pid, offset, code });
        code
    }

    fn load_cell_data(&mut self, buf: &mut [u8], len: &mut u64, offset: u64, index: u64, source: u64) -> u64 {
        let mut state = self.shared.lock();
        let code = state.load_cell_data(buf, len, offset, index, source);
        state.log.record(Event::LoadCellData {
            pid: self.pid,
            source,
            index,
            offset,
            code,
        });
        code
    }

    fn find_dependency_by_hash(&mut self, code_hash: &[u8; 32], hash_type: u8, index: &mut u64) -> u64 {
        let mut state = self.shared.lock();
        let found = match HashType::from_u8(hash_type) {
            Some(ht) => state.tx.find_dependency(code_hash, ht).ok_or(codes::ITEM_MISSING),
            None => Err(codes::WRONG_FORMAT),
        };
        let (found, code) = match found {
            Ok(i) => {
                *index = i as u64;
                (Some(i as u64), codes::SUCCESS)
            }
            Err(code) => (None, code),
        };
        state.log.record(Event::FindDependency {
            pid: self.pid,
            code_hash: hex::encode(code_hash),
            hash_type,
            index: found,
            code,
        });
        code
    }

    fn spawn(
        &mut self,
        index: u64,
        source: u64,
        place: u64,
        bounds: u64,
        args: &SpawnArgs,
        pid: &mut u64,
    ) -> u64 {
        let mut state = self.shared.lock();
        let (child, code) = match state.spawn(self.pid, index, source, place, bounds, args) {
            Ok(child) => {
                *pid = child;
                (Some(child), codes::SUCCESS)
            }
            Err(code) => (None, code),
        };
        state.log.record(Event::Spawn {
            parent: self.pid,
            child,
            argv: args.argv.clone(),
            inherited: args.inherited.iter().map(|c| c.0).collect(),
            code,
        });
        code
    }

    fn pipe(&mut self, fds: &mut [u64; 2]) -> u64 {
        let mut state = self.shared.lock();
        let (created, code) = match state.pipe(self.pid) {
            Ok(pair) => {
                *fds = pair;
                (Some(pair), codes::SUCCESS)
            }
            Err(code) => (None, code),
        };
        state.log.record(Event::Pipe { pid: self.pid, fds: created, code });
        code
    }

    fn read(&mut self, fd: u64, buf: &mut [u8], len: &mut u64) -> u64 {
        let pid = self.pid;
        let requested = *len;
        let code = self.drive(|state| state.try_read(pid, fd, buf, len));
        if code != codes::SUCCESS {
            *len = 0;
        }
        self.record(Event::Read {
            pid,
            fd,
            requested,
            transferred: *len,
            code,
        });
        code
    }

    fn write(&mut self, fd: u64, buf: &[u8], len: &mut u64) -> u64 {
        let pid = self.pid;
        let requested = *len;
        let code = self.drive(|state| state.try_write(pid, fd, buf, len));
        if code != codes::SUCCESS {
            *len = 0;
        }
        self.record(Event::Write {
            pid,
            fd,
            requested,
            transferred: *len,
            code,
        });
        code
    }

    fn close(&mut self, fd: u64) -> u64 {
        let mut state = self.shared.lock();
        let code = state.close(self.pid, fd);
        state.log.record(Event::Close { pid: self.pid, fd, code });
        code
    }

    fn wait(&mut self, target: u64, exit_code: &mut i8) -> u64 {
        let pid = self.pid;
        let code = self.drive(|state| state.try_wait(pid, target, exit_code));
        self.record(Event::Wait {
            pid,
            target,
            exit_code: (code == codes::SUCCESS).then_some(*exit_code),
            code,
        });
        code
    }

    fn inherited_fds(&mut self, fds: &mut [u64], len: &mut u64) -> u64 {
        let state = self.shared.lock();
        let Some(process) = state.processes.get(&self.pid) else {
            return codes::INDEX_OUT_OF_BOUND;
        };
        let n = process.inherited.len().min(fds.len()).min(*len as usize);
        fds[..n].copy_from_slice(&process.inherited[..n]);
        *len = process.inherited.len() as u64;
        codes::SUCCESS
    }

    fn process_id(&mut self) -> u64 {
        self.pid
    }

    fn debug(&mut self, message: &str) {
        tracing::debug!(pid = self.pid, "{message}");
        self.record(Event::Debug {
            pid: self.pid,
            message: message.to_string(),
        });
    }

    fn read_local_file(&mut self, buf: &mut [u8]) -> i64 {
        let state = self.shared.lock();
        match &state.local_file {
            Some(contents) => {
                let n = contents.len().min(buf.len());
                buf[..n].copy_from_slice(&contents[..n]);
                n as i64
            }
            None => -1,
        }
    }

    fn exit(&mut self, code: i8) {
        let mut state = self.shared.lock();
        let Some(process) = state.processes.get_mut(&self.pid) else {
            return;
        };
        if process.exit_request.is_none() {
            process.exit_request = Some(code);
            state.log.record(Event::Exit { pid: self.pid, code });
        }
    }
}
