use std::fmt;

/// Successful termination.
pub const SUCCESS: i8 = 0;
/// The host caught an uncontrolled termination (panic) and recorded it.
pub const ABORTED: i8 = -1;

/// Loader-detected failures. Each maps to a fixed negative exit code that
/// never collides with a runtime status (those stay in `-2..=-5`).
///
/// Scripts can only request non-negative exit codes, so a negative code at
/// the host always means a fault or a runtime failure. An explicit code the
/// host cannot carry becomes [`LoaderFault::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderFault {
    Syscall,
    OutOfMemory,
    Encoding,
    InvalidArgument,
    ScriptTooLong,
    InvalidState,
}

impl LoaderFault {
    pub const ALL: [LoaderFault; 6] = [
        LoaderFault::Syscall,
        LoaderFault::OutOfMemory,
        LoaderFault::Encoding,
        LoaderFault::InvalidArgument,
        LoaderFault::ScriptTooLong,
        LoaderFault::InvalidState,
    ];

    pub fn exit_code(&self) -> i8 {
        match self {
            LoaderFault::Syscall => -10,
            LoaderFault::OutOfMemory => -11,
            LoaderFault::Encoding => -12,
            LoaderFault::InvalidArgument => -13,
            LoaderFault::ScriptTooLong => -14,
            LoaderFault::InvalidState => -15,
        }
    }

    pub fn from_exit_code(code: i8) -> Option<Self> {
        LoaderFault::ALL.into_iter().find(|f| f.exit_code() == code)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoaderFault::Syscall => "syscall",
            LoaderFault::OutOfMemory => "out_of_memory",
            LoaderFault::Encoding => "encoding",
            LoaderFault::InvalidArgument => "invalid_argument",
            LoaderFault::ScriptTooLong => "script_too_long",
            LoaderFault::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for LoaderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.exit_code())
    }
}
