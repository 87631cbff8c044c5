use cellua_abi::SpawnArgs;

/// The raw syscall table a script instance sees.
///
/// Every method returns a raw host code from [`cellua_abi::codes`]; callers
/// normalize it with `SyscallError::from_code`. Length arguments are in/out:
/// on entry they hold the caller's capacity (or the number of bytes offered),
/// on return the amount the host has available (or actually moved).
pub trait HostAbi {
    /// Copy the current script descriptor, starting at `offset`.
    /// `len` comes back as the full remaining length, which may exceed `buf`.
    fn load_script(&mut self, buf: &mut [u8], len: &mut u64, offset: u64) -> u64;

    /// Copy one cell's data blob, with the same length protocol as `load_script`.
    fn load_cell_data(
        &mut self,
        buf: &mut [u8],
        len: &mut u64,
        offset: u64,
        index: u64,
        source: u64,
    ) -> u64;

    /// Index of the first cell dependency whose hash matches.
    fn find_dependency_by_hash(&mut self, code_hash: &[u8; 32], hash_type: u8, index: &mut u64) -> u64;

    fn spawn(
        &mut self,
        index: u64,
        source: u64,
        place: u64,
        bounds: u64,
        args: &SpawnArgs,
        pid: &mut u64,
    ) -> u64;

    /// `fds[0]` is the read end, `fds[1]` the write end.
    fn pipe(&mut self, fds: &mut [u64; 2]) -> u64;

    fn read(&mut self, fd: u64, buf: &mut [u8], len: &mut u64) -> u64;

    fn write(&mut self, fd: u64, buf: &[u8], len: &mut u64) -> u64;

    fn close(&mut self, fd: u64) -> u64;

    fn wait(&mut self, pid: u64, exit_code: &mut i8) -> u64;

    /// Channels handed over at spawn time. `len` follows the load protocol,
    /// counted in entries.
    fn inherited_fds(&mut self, fds: &mut [u64], len: &mut u64) -> u64;

    fn process_id(&mut self) -> u64;

    /// Operator channel.
    fn debug(&mut self, message: &str);

    /// Native local-file primitive. Returns the number of bytes copied, or a
    /// negative value when no file is available.
    fn read_local_file(&mut self, buf: &mut [u8]) -> i64;

    /// Terminate the calling instance. Only the first call counts.
    fn exit(&mut self, code: i8);
}

/// Native code installed in the host, addressed by the hash of the cell data
/// that carries it.
pub trait Program: Send + Sync {
    fn run(&self, host: Box<dyn HostAbi>, argv: Vec<String>);
}
