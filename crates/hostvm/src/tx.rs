use cellua_abi::{hex_bytes, HashType, Script, Source, HASH_LEN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MachineError;

/// Hash used for `data*` matching and for addressing installed programs.
pub fn data_hash(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(
        default,
        with = "hex_bytes::option_array",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_hash: Option<[u8; HASH_LEN]>,
}

impl Cell {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Cell { data: data.into(), type_hash: None }
    }

    pub fn with_type_hash(mut self, type_hash: [u8; HASH_LEN]) -> Self {
        self.type_hash = Some(type_hash);
        self
    }

    fn matches(&self, code_hash: &[u8; HASH_LEN], hash_type: HashType) -> bool {
        if hash_type.matches_data() {
            &data_hash(&self.data) == code_hash
        } else {
            self.type_hash.as_ref() == Some(code_hash)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Witness(#[serde(with = "hex_bytes")] pub Vec<u8>);

/// The visible world of one verification: the executing script and the cells
/// it may load. Group lists hold indices into `inputs` / `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub script: Script,
    #[serde(default)]
    pub inputs: Vec<Cell>,
    #[serde(default)]
    pub outputs: Vec<Cell>,
    #[serde(default)]
    pub cell_deps: Vec<Cell>,
    #[serde(default)]
    pub witnesses: Vec<Witness>,
    #[serde(default)]
    pub group_inputs: Vec<u32>,
    #[serde(default)]
    pub group_outputs: Vec<u32>,
}

impl Transaction {
    pub fn new(script: Script) -> Self {
        Transaction {
            script,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cell_deps: Vec::new(),
            witnesses: Vec::new(),
            group_inputs: Vec::new(),
            group_outputs: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MachineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, MachineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Translate a group-relative index into an absolute one.
    fn absolute(&self, source: Source, index: u64) -> Option<(Source, usize)> {
        let index = usize::try_from(index).ok()?;
        match source {
            Source::GroupInput => Some((Source::Input, *self.group_inputs.get(index)? as usize)),
            Source::GroupOutput => Some((Source::Output, *self.group_outputs.get(index)? as usize)),
            other => Some((other, index)),
        }
    }

    pub fn cell(&self, source: Source, index: u64) -> Option<&Cell> {
        let (source, index) = self.absolute(source, index)?;
        match source {
            Source::Input => self.inputs.get(index),
            Source::Output => self.outputs.get(index),
            Source::CellDep => self.cell_deps.get(index),
            _ => None,
        }
    }

    /// Witnesses line up with inputs; group sources go through the group map.
    pub fn witness(&self, source: Source, index: u64) -> Option<&[u8]> {
        let (_, index) = self.absolute(source, index)?;
        self.witnesses.get(index).map(|w| w.0.as_slice())
    }

    /// First cell dependency matching `code_hash` under `hash_type`.
    pub fn find_dependency(&self, code_hash: &[u8; HASH_LEN], hash_type: HashType) -> Option<usize> {
        self.cell_deps.iter().position(|cell| cell.matches(code_hash, hash_type))
    }
}
