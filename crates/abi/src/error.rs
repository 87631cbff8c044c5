use thiserror::Error;

/// Raw error codes returned by host primitives.
pub mod codes {
    pub const SUCCESS: u64 = 0;
    pub const INDEX_OUT_OF_BOUND: u64 = 1;
    pub const ITEM_MISSING: u64 = 2;
    pub const SLICE_OUT_OF_BOUND: u64 = 3;
    pub const WRONG_FORMAT: u64 = 4;
    pub const WAIT_FAILURE: u64 = 5;
    pub const INVALID_FD: u64 = 6;
    pub const OTHER_END_CLOSED: u64 = 7;
    pub const MAX_VMS_SPAWNED: u64 = 8;
    pub const MAX_FDS_CREATED: u64 = 9;
    /// Every instance that could make progress is blocked.
    pub const WOULD_BLOCK: u64 = 10;
}

/// Closed set of failures a host primitive can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyscallError {
    #[error("not found")]
    NotFound,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of memory")]
    OutOfMemory,
    #[error("would block")]
    WouldBlock,
    #[error("channel closed")]
    Closed,
    #[error("unknown host error {0}")]
    Unknown(u64),
}

impl SyscallError {
    /// Normalize a raw host code. `SUCCESS` is not an error and maps to `None`.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            codes::SUCCESS => None,
            codes::INDEX_OUT_OF_BOUND | codes::ITEM_MISSING => Some(SyscallError::NotFound),
            codes::SLICE_OUT_OF_BOUND
            | codes::WRONG_FORMAT
            | codes::WAIT_FAILURE
            | codes::INVALID_FD => Some(SyscallError::InvalidArgument),
            codes::OTHER_END_CLOSED => Some(SyscallError::Closed),
            codes::MAX_VMS_SPAWNED | codes::MAX_FDS_CREATED => Some(SyscallError::OutOfMemory),
            codes::WOULD_BLOCK => Some(SyscallError::WouldBlock),
            other => Some(SyscallError::Unknown(other)),
        }
    }

    /// Turn a raw return value into a `Result`.
    pub fn check(code: u64) -> Result<(), SyscallError> {
        match SyscallError::from_code(code) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Representative raw code, as surfaced to scripts.
    pub fn code(&self) -> u64 {
        match self {
            SyscallError::NotFound => codes::INDEX_OUT_OF_BOUND,
            SyscallError::InvalidArgument => codes::INVALID_FD,
            SyscallError::OutOfMemory => codes::MAX_VMS_SPAWNED,
            SyscallError::WouldBlock => codes::WOULD_BLOCK,
            SyscallError::Closed => codes::OTHER_END_CLOSED,
            SyscallError::Unknown(code) => *code,
        }
    }
}

/// Structural violation in a binary record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("declared size {declared} does not match buffer length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("malformed header: {0}")]
    Header(String),

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{field}` has size {got}, expected {expected}")]
    FieldSize {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid data: {0}")]
    Invalid(String),
}

/// Script arguments that decode fine but cannot be acted on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentsError {
    #[error("arguments too short: {0} bytes, loader flags need 2")]
    MissingFlags(usize),

    #[error("arguments length {0} is neither 2 (own cell) nor at least 35 (code hash + hash type)")]
    TruncatedHash(usize),

    #[error("unknown hash type {0}")]
    UnknownHashType(u8),
}
