use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ArgumentsError, EncodingError};

pub const HASH_LEN: usize = 32;
/// Leading loader-flag bytes of every argument tail.
pub const LOADER_FLAGS_LEN: usize = 2;
/// Flags + code hash + hash type.
pub const DEPENDENCY_ARGS_LEN: usize = LOADER_FLAGS_LEN + HASH_LEN + 1;

const SCRIPT_FIELD_COUNT: usize = 3;
const NUMBER_SIZE: usize = 4;

/// How a dependency cell's hash is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(HashType::Data),
            1 => Some(HashType::Type),
            2 => Some(HashType::Data1),
            4 => Some(HashType::Data2),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HashType::Data => 0,
            HashType::Type => 1,
            HashType::Data1 => 2,
            HashType::Data2 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashType::Data => "data",
            HashType::Type => "type",
            HashType::Data1 => "data1",
            HashType::Data2 => "data2",
        }
    }

    /// Whether the hash is taken over the cell's data (as opposed to its type script).
    pub fn matches_data(&self) -> bool {
        !matches!(self, HashType::Type)
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A script descriptor: `table Script { code_hash: Byte32, hash_type: byte, args: Bytes }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    #[serde(with = "crate::hex_bytes::array")]
    pub code_hash: [u8; HASH_LEN],
    pub hash_type: u8,
    #[serde(with = "crate::hex_bytes")]
    pub args: Vec<u8>,
}

fn read_u32(data: &[u8], at: usize) -> Result<usize, EncodingError> {
    let bytes = data
        .get(at..at + NUMBER_SIZE)
        .ok_or(EncodingError::TooShort { need: at + NUMBER_SIZE, have: data.len() })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

impl Script {
    pub fn new(code_hash: [u8; HASH_LEN], hash_type: u8, args: Vec<u8>) -> Self {
        Script { code_hash, hash_type, args }
    }

    /// Decode and strictly verify a serialized descriptor. Extra fields are
    /// rejected, as is any offset or length that does not line up exactly.
    pub fn from_slice(data: &[u8]) -> Result<Self, EncodingError> {
        let len = data.len();
        let total = read_u32(data, 0)?;
        if total != len {
            return Err(EncodingError::SizeMismatch { declared: total, actual: len });
        }
        if len == NUMBER_SIZE {
            return Err(EncodingError::FieldCount { expected: SCRIPT_FIELD_COUNT, found: 0 });
        }
        let first = read_u32(data, NUMBER_SIZE)?;
        if first % NUMBER_SIZE != 0 || first < NUMBER_SIZE * 2 {
            return Err(EncodingError::Header(format!("first offset {first} is not a valid header size")));
        }
        let field_count = first / NUMBER_SIZE - 1;
        if field_count != SCRIPT_FIELD_COUNT {
            return Err(EncodingError::FieldCount { expected: SCRIPT_FIELD_COUNT, found: field_count });
        }
        if len < first {
            return Err(EncodingError::TooShort { need: first, have: len });
        }

        let mut offsets = Vec::with_capacity(SCRIPT_FIELD_COUNT + 1);
        for i in 0..SCRIPT_FIELD_COUNT {
            offsets.push(read_u32(data, NUMBER_SIZE * (i + 1))?);
        }
        offsets.push(len);
        for pair in offsets.windows(2) {
            if pair[0] > pair[1] {
                return Err(EncodingError::Header(format!(
                    "offset {} is past offset {}",
                    pair[0], pair[1]
                )));
            }
        }

        let code_hash_bytes = &data[offsets[0]..offsets[1]];
        if code_hash_bytes.len() != HASH_LEN {
            return Err(EncodingError::FieldSize {
                field: "code_hash",
                expected: HASH_LEN,
                got: code_hash_bytes.len(),
            });
        }
        let hash_type_bytes = &data[offsets[1]..offsets[2]];
        if hash_type_bytes.len() != 1 {
            return Err(EncodingError::FieldSize {
                field: "hash_type",
                expected: 1,
                got: hash_type_bytes.len(),
            });
        }
        let args = decode_bytes(&data[offsets[2]..offsets[3]])?;

        let mut code_hash = [0u8; HASH_LEN];
        code_hash.copy_from_slice(code_hash_bytes);
        Ok(Script {
            code_hash,
            hash_type: hash_type_bytes[0],
            args: args.to_vec(),
        })
    }

    /// Canonical serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = NUMBER_SIZE * (SCRIPT_FIELD_COUNT + 1);
        let args_size = NUMBER_SIZE + self.args.len();
        let total = header + HASH_LEN + 1 + args_size;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&(header as u32).to_le_bytes());
        buf.extend_from_slice(&((header + HASH_LEN) as u32).to_le_bytes());
        buf.extend_from_slice(&((header + HASH_LEN + 1) as u32).to_le_bytes());
        buf.extend_from_slice(&self.code_hash);
        buf.push(self.hash_type);
        buf.extend_from_slice(&(self.args.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.args);
        buf
    }
}

/// `Bytes` is a fixvec of single bytes: a u32 item count then the items.
fn decode_bytes(field: &[u8]) -> Result<&[u8], EncodingError> {
    let count = read_u32(field, 0)?;
    let payload = &field[NUMBER_SIZE..];
    if payload.len() != count {
        return Err(EncodingError::FieldSize {
            field: "args",
            expected: NUMBER_SIZE + count,
            got: field.len(),
        });
    }
    Ok(payload)
}

/// Loader flag bits carried in the first two argument bytes (little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoaderFlags(pub u16);

impl LoaderFlags {
    /// Treat the loaded code as a filesystem image and run `main.lua` from it.
    pub const FILE_SYSTEM: u16 = 0x0001;

    pub fn file_system(&self) -> bool {
        self.0 & Self::FILE_SYSTEM != 0
    }
}

/// Where the executable code lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLocation {
    /// Embedded in the invoking cell's own data.
    OwnCell,
    /// In a dependency cell selected by hash.
    Dependency {
        code_hash: [u8; HASH_LEN],
        hash_type: HashType,
    },
}

/// Decoded argument tail of a loader script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptArguments {
    pub flags: LoaderFlags,
    pub code: CodeLocation,
}

impl ScriptArguments {
    /// Exactly two bytes select the own-cell layout; anything between that
    /// and a full hash suffix is rejected rather than read as a short hash.
    pub fn parse(args: &[u8]) -> Result<Self, ArgumentsError> {
        if args.len() < LOADER_FLAGS_LEN {
            return Err(ArgumentsError::MissingFlags(args.len()));
        }
        let flags = LoaderFlags(u16::from_le_bytes([args[0], args[1]]));
        if args.len() == LOADER_FLAGS_LEN {
            return Ok(ScriptArguments { flags, code: CodeLocation::OwnCell });
        }
        if args.len() < DEPENDENCY_ARGS_LEN {
            return Err(ArgumentsError::TruncatedHash(args.len()));
        }
        let mut code_hash = [0u8; HASH_LEN];
        code_hash.copy_from_slice(&args[LOADER_FLAGS_LEN..LOADER_FLAGS_LEN + HASH_LEN]);
        let raw_type = args[LOADER_FLAGS_LEN + HASH_LEN];
        let hash_type = HashType::from_u8(raw_type).ok_or(ArgumentsError::UnknownHashType(raw_type))?;
        Ok(ScriptArguments {
            flags,
            code: CodeLocation::Dependency { code_hash, hash_type },
        })
    }

    pub fn own_cell(flags: u16) -> Vec<u8> {
        flags.to_le_bytes().to_vec()
    }

    pub fn dependency(flags: u16, code_hash: &[u8; HASH_LEN], hash_type: HashType) -> Vec<u8> {
        let mut out = Vec::with_capacity(DEPENDENCY_ARGS_LEN);
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(code_hash);
        out.push(hash_type.as_u8());
        out
    }
}
