use std::cell::RefCell;
use std::rc::Rc;

use cellua_abi::{
    Bounds, CellReference, ChannelId, HashType, Place, ProcessId, SpawnArgs, SyscallError, HASH_LEN,
};
use cellua_hostvm::HostAbi;

/// Largest buffer a single pipe read allocates. A read may always return
/// fewer bytes than asked for.
pub const READ_CHUNK: usize = 64 * 1024;

/// Shared handle over one instance's host connection. Argument shapes are
/// checked before anything crosses the boundary and raw codes come back as
/// [`SyscallError`].
#[derive(Clone)]
pub struct Syscalls {
    host: Rc<RefCell<Box<dyn HostAbi>>>,
}

impl Syscalls {
    pub fn new(host: Box<dyn HostAbi>) -> Self {
        Syscalls {
            host: Rc::new(RefCell::new(host)),
        }
    }

    /// Fill `buf` with the script descriptor and return its full length,
    /// which may exceed `buf.len()`.
    pub fn load_script(&self, buf: &mut [u8]) -> Result<u64, SyscallError> {
        let mut len = buf.len() as u64;
        SyscallError::check(self.host.borrow_mut().load_script(buf, &mut len, 0))?;
        Ok(len)
    }

    /// Whole data blob of one cell: length query, then a sized load.
    pub fn load_cell_data(&self, cell: CellReference) -> Result<Vec<u8>, SyscallError> {
        let index = cell.index as u64;
        let source = cell.source.raw();
        let mut len = 0u64;
        SyscallError::check(self.host.borrow_mut().load_cell_data(&mut [], &mut len, 0, index, source))?;
        let mut buf = vec![0u8; len as usize];
        let mut filled = len;
        SyscallError::check(
            self.host
                .borrow_mut()
                .load_cell_data(&mut buf, &mut filled, 0, index, source),
        )?;
        if filled != len {
            // The cell changed size between the two calls.
            return Err(SyscallError::InvalidArgument);
        }
        Ok(buf)
    }

    /// Index of the first cell dependency matching `code_hash`.
    pub fn find_dependency(&self, code_hash: &[u8; HASH_LEN], hash_type: HashType) -> Result<u32, SyscallError> {
        let mut index = 0u64;
        SyscallError::check(
            self.host
                .borrow_mut()
                .find_dependency_by_hash(code_hash, hash_type.as_u8(), &mut index),
        )?;
        u32::try_from(index).map_err(|_| SyscallError::InvalidArgument)
    }

    pub fn spawn(
        &self,
        cell: CellReference,
        place: Place,
        bounds: Bounds,
        args: &SpawnArgs,
    ) -> Result<ProcessId, SyscallError> {
        if args.argv.iter().any(|a| a.contains('\0')) {
            return Err(SyscallError::InvalidArgument);
        }
        let mut pid = 0u64;
        SyscallError::check(self.host.borrow_mut().spawn(
            cell.index as u64,
            cell.source.raw(),
            place.raw(),
            bounds.raw(),
            args,
            &mut pid,
        ))?;
        Ok(ProcessId(pid))
    }

    /// Returns `(read_end, write_end)`.
    pub fn pipe(&self) -> Result<(ChannelId, ChannelId), SyscallError> {
        let mut fds = [0u64; 2];
        SyscallError::check(self.host.borrow_mut().pipe(&mut fds))?;
        Ok((ChannelId(fds[0]), ChannelId(fds[1])))
    }

    /// Up to `max_len` bytes, capped at [`READ_CHUNK`]; may return fewer.
    pub fn read(&self, channel: ChannelId, max_len: usize) -> Result<Vec<u8>, SyscallError> {
        if max_len == 0 {
            return Err(SyscallError::InvalidArgument);
        }
        let max_len = max_len.min(READ_CHUNK);
        let mut buf = vec![0u8; max_len];
        let mut len = max_len as u64;
        SyscallError::check(self.host.borrow_mut().read(channel.0, &mut buf, &mut len))?;
        buf.truncate(len as usize);
        Ok(buf)
    }

    /// Number of bytes the host accepted. An empty write never reaches the host.
    pub fn write(&self, channel: ChannelId, bytes: &[u8]) -> Result<usize, SyscallError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut len = bytes.len() as u64;
        SyscallError::check(self.host.borrow_mut().write(channel.0, bytes, &mut len))?;
        Ok(len as usize)
    }

    pub fn close(&self, channel: ChannelId) -> Result<(), SyscallError> {
        SyscallError::check(self.host.borrow_mut().close(channel.0))
    }

    pub fn wait(&self, pid: ProcessId) -> Result<i8, SyscallError> {
        let mut exit_code = 0i8;
        SyscallError::check(self.host.borrow_mut().wait(pid.0, &mut exit_code))?;
        Ok(exit_code)
    }

    /// Channels handed to this instance at spawn: length query, then fill.
    pub fn inherited_channels(&self) -> Result<Vec<ChannelId>, SyscallError> {
        let mut len = 0u64;
        SyscallError::check(self.host.borrow_mut().inherited_fds(&mut [], &mut len))?;
        let mut fds = vec![0u64; len as usize];
        let mut filled = len;
        SyscallError::check(self.host.borrow_mut().inherited_fds(&mut fds, &mut filled))?;
        fds.truncate(filled.min(len) as usize);
        Ok(fds.into_iter().map(ChannelId).collect())
    }

    pub fn process_id(&self) -> ProcessId {
        ProcessId(self.host.borrow_mut().process_id())
    }

    pub fn debug(&self, message: &str) {
        self.host.borrow_mut().debug(message);
    }

    /// Contents of the host-supplied local file, at most `capacity` bytes.
    /// `None` when the host has nothing to serve.
    pub fn read_local_file(&self, capacity: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; capacity];
        let count = self.host.borrow_mut().read_local_file(&mut buf);
        let count = usize::try_from(count).ok()?;
        buf.truncate(count);
        Some(buf)
    }

    pub fn exit(&self, code: i8) {
        self.host.borrow_mut().exit(code);
    }
}

