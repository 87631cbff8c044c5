use std::collections::BTreeSet;

use cellua_abi::{Bounds, CellReference, ChannelId, Place, ProcessId, SpawnArgs, SyscallError};

use crate::syscalls::Syscalls;

/// A spawned instance this one may wait on. Consumed by [`Processes::wait`],
/// so a handle can be waited at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: ProcessId,
    inherited: Vec<ChannelId>,
}

impl ProcessHandle {
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Channel ends that moved to the child at spawn time.
    pub fn inherited(&self) -> &[ChannelId] {
        &self.inherited
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeChannel {
    pub read_end: ChannelId,
    pub write_end: ChannelId,
}

/// Where a child instance's code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSource {
    pub cell: CellReference,
    pub place: Place,
    pub bounds: Bounds,
}

impl CodeSource {
    /// The whole data blob of `cell`.
    pub fn cell_data(cell: CellReference) -> Self {
        CodeSource {
            cell,
            place: Place::CellData,
            bounds: Bounds::WHOLE,
        }
    }
}

/// Children of the current instance and the pipes between them.
pub struct Processes {
    sys: Syscalls,
    /// Spawned by us and not yet waited.
    live: BTreeSet<ProcessId>,
}

impl Processes {
    pub fn new(sys: Syscalls) -> Self {
        Processes {
            sys,
            live: BTreeSet::new(),
        }
    }

    /// Start a child. Returns as soon as the host has registered it.
    pub fn spawn(
        &mut self,
        argv: Vec<String>,
        inherited: Vec<ChannelId>,
        code: CodeSource,
    ) -> Result<ProcessHandle, SyscallError> {
        let args = SpawnArgs { argv, inherited };
        let pid = self.sys.spawn(code.cell, code.place, code.bounds, &args)?;
        tracing::debug!(%pid, from = %code.cell, "spawned child");
        self.live.insert(pid);
        Ok(ProcessHandle {
            pid,
            inherited: args.inherited,
        })
    }

    pub fn pipe(&self) -> Result<PipeChannel, SyscallError> {
        let (read_end, write_end) = self.sys.pipe()?;
        Ok(PipeChannel { read_end, write_end })
    }

    pub fn read(&self, channel: ChannelId, max_len: usize) -> Result<Vec<u8>, SyscallError> {
        self.sys.read(channel, max_len)
    }

    pub fn write(&self, channel: ChannelId, bytes: &[u8]) -> Result<usize, SyscallError> {
        self.sys.write(channel, bytes)
    }

    /// Keep writing until every byte is accepted.
    pub fn write_all(&self, channel: ChannelId, mut bytes: &[u8]) -> Result<(), SyscallError> {
        while !bytes.is_empty() {
            let n = self.sys.write(channel, bytes)?;
            if n == 0 {
                return Err(SyscallError::WouldBlock);
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Read until the writer closes its end.
    pub fn read_to_end(&self, channel: ChannelId) -> Result<Vec<u8>, SyscallError> {
        let mut out = Vec::new();
        loop {
            match self.sys.read(channel, 4096) {
                Ok(chunk) if chunk.is_empty() => return Err(SyscallError::WouldBlock),
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(SyscallError::Closed) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    pub fn close(&self, channel: ChannelId) -> Result<(), SyscallError> {
        self.sys.close(channel)
    }

    pub fn wait(&mut self, handle: ProcessHandle) -> Result<i8, SyscallError> {
        self.wait_pid(handle.pid)
    }

    /// Wait on a plain pid. Pids this instance never spawned, or has already
    /// waited, are rejected without asking the host.
    pub fn wait_pid(&mut self, pid: ProcessId) -> Result<i8, SyscallError> {
        if !self.live.contains(&pid) {
            return Err(SyscallError::InvalidArgument);
        }
        let code = self.sys.wait(pid)?;
        self.live.remove(&pid);
        tracing::debug!(%pid, code, "child exited");
        Ok(code)
    }

    pub fn inherited(&self) -> Result<Vec<ChannelId>, SyscallError> {
        self.sys.inherited_channels()
    }

    pub fn current(&self) -> ProcessId {
        self.sys.process_id()
    }
}
