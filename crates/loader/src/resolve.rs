use cellua_abi::{CellReference, CodeLocation, LoaderFlags, Script, ScriptArguments, Source, SyscallError};

use crate::error::LoaderError;
use crate::syscalls::Syscalls;

/// Size of the descriptor load buffer.
pub const SCRIPT_SIZE: usize = 32 * 1024;

/// Code bytes plus where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    pub flags: LoaderFlags,
    pub origin: CellReference,
    pub bytes: Vec<u8>,
}

/// Load the executing script's descriptor, decode its arguments and load
/// the code they select.
pub fn resolve_code(sys: &Syscalls) -> Result<ResolvedCode, LoaderError> {
    let mut buf = vec![0u8; SCRIPT_SIZE];
    let len = sys.load_script(&mut buf)?;
    if len > SCRIPT_SIZE as u64 {
        return Err(LoaderError::ScriptTooLong(len));
    }
    buf.truncate(len as usize);

    let script = Script::from_slice(&buf)?;
    let args = ScriptArguments::parse(&script.args)?;

    let (origin, bytes) = match args.code {
        CodeLocation::OwnCell => load_own_cell(sys)?,
        CodeLocation::Dependency { code_hash, hash_type } => {
            let index = sys.find_dependency(&code_hash, hash_type)?;
            tracing::debug!(index, %hash_type, code_hash = %hex_prefix(&code_hash), "dependency found");
            let origin = CellReference::new(Source::CellDep, index);
            (origin, sys.load_cell_data(origin)?)
        }
    };
    tracing::debug!(%origin, len = bytes.len(), flags = args.flags.0, "code resolved");
    Ok(ResolvedCode {
        flags: args.flags,
        origin,
        bytes,
    })
}

/// The invoking cell: first cell of the input group, or of the output group
/// when the script only guards outputs.
fn load_own_cell(sys: &Syscalls) -> Result<(CellReference, Vec<u8>), SyscallError> {
    let input = CellReference::new(Source::GroupInput, 0);
    match sys.load_cell_data(input) {
        Ok(bytes) => Ok((input, bytes)),
        Err(SyscallError::NotFound) => {
            let output = CellReference::new(Source::GroupOutput, 0);
            Ok((output, sys.load_cell_data(output)?))
        }
        Err(e) => Err(e),
    }
}

fn hex_prefix(hash: &[u8]) -> String {
    hex::encode(&hash[..4])
}
