pub mod cellfs;
pub mod entry;
pub mod error;
pub mod instance;
pub mod lua_ckb;
pub mod process;
pub mod resolve;
pub mod sandbox;
pub mod signal;
pub mod syscalls;
pub mod testing;

pub use cellfs::CellFs;
pub use entry::LoaderProgram;
pub use error::LoaderError;
pub use instance::Instance;
pub use process::{CodeSource, PipeChannel, ProcessHandle, Processes};
pub use resolve::{resolve_code, ResolvedCode};
pub use sandbox::{Gate, ResourceBudget, Sandbox, SandboxConfig};
pub use signal::{ReturnSignal, RuntimeStatus};
pub use syscalls::Syscalls;
