pub mod error;
pub mod exit;
pub mod hex_bytes;
pub mod ids;
pub mod script;
pub mod source;
#[cfg(test)]
mod tests;

pub use error::{codes, ArgumentsError, EncodingError, SyscallError};
pub use exit::LoaderFault;
pub use ids::{ChannelId, ProcessId, SpawnArgs};
pub use script::{CodeLocation, HashType, LoaderFlags, Script, ScriptArguments, HASH_LEN};
pub use source::{Bounds, CellReference, Place, Source};
