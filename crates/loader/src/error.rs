use cellua_abi::{ArgumentsError, EncodingError, LoaderFault, SyscallError};
use thiserror::Error;

/// Failures detected by the loader itself, before or around running a chunk.
/// Failures raised by script code go through `ReturnSignal` instead.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("syscall failed: {0}")]
    Syscall(#[from] SyscallError),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("script descriptor is {0} bytes, larger than the load buffer")]
    ScriptTooLong(u64),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("lua runtime: {0}")]
    Lua(#[from] mlua::Error),
}

impl From<ArgumentsError> for LoaderError {
    fn from(e: ArgumentsError) -> Self {
        LoaderError::InvalidArgument(e.to_string())
    }
}

impl LoaderError {
    pub fn fault(&self) -> LoaderFault {
        match self {
            LoaderError::Syscall(_) => LoaderFault::Syscall,
            LoaderError::OutOfMemory(_) => LoaderFault::OutOfMemory,
            LoaderError::Encoding(_) => LoaderFault::Encoding,
            LoaderError::InvalidArgument(_) => LoaderFault::InvalidArgument,
            LoaderError::ScriptTooLong(_) => LoaderFault::ScriptTooLong,
            LoaderError::InvalidState(_) => LoaderFault::InvalidState,
            LoaderError::Lua(mlua::Error::MemoryError(_)) => LoaderFault::OutOfMemory,
            LoaderError::Lua(_) => LoaderFault::InvalidState,
        }
    }

    pub fn exit_code(&self) -> i8 {
        self.fault().exit_code()
    }
}
