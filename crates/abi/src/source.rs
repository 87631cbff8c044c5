use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a cell lives inside the current transaction's visible set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    Input,
    Output,
    CellDep,
    HeaderDep,
    GroupInput,
    GroupOutput,
}

const GROUP_FLAG: u64 = 0x0100_0000_0000_0000;

impl Source {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(Source::Input),
            2 => Some(Source::Output),
            3 => Some(Source::CellDep),
            4 => Some(Source::HeaderDep),
            r if r == GROUP_FLAG | 1 => Some(Source::GroupInput),
            r if r == GROUP_FLAG | 2 => Some(Source::GroupOutput),
            _ => None,
        }
    }

    pub fn raw(&self) -> u64 {
        match self {
            Source::Input => 1,
            Source::Output => 2,
            Source::CellDep => 3,
            Source::HeaderDep => 4,
            Source::GroupInput => GROUP_FLAG | 1,
            Source::GroupOutput => GROUP_FLAG | 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::Input => "input",
            Source::Output => "output",
            Source::CellDep => "cell_dep",
            Source::HeaderDep => "header_dep",
            Source::GroupInput => "group_input",
            Source::GroupOutput => "group_output",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "input" => Some(Source::Input),
            "output" => Some(Source::Output),
            "cell_dep" | "dep" => Some(Source::CellDep),
            "header_dep" => Some(Source::HeaderDep),
            "group_input" => Some(Source::GroupInput),
            "group_output" => Some(Source::GroupOutput),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One cell's data blob within the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellReference {
    pub source: Source,
    pub index: u32,
}

impl CellReference {
    pub fn new(source: Source, index: u32) -> Self {
        CellReference { source, index }
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.source, self.index)
    }
}

/// Which part of a cell a spawned instance takes its code from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Place {
    #[default]
    CellData,
    Witness,
}

impl Place {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Place::CellData),
            1 => Some(Place::Witness),
            _ => None,
        }
    }

    pub fn raw(&self) -> u64 {
        match self {
            Place::CellData => 0,
            Place::Witness => 1,
        }
    }
}

/// Byte window of the code blob handed to `spawn`. A zero length means
/// "up to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub offset: u32,
    pub length: u32,
}

impl Bounds {
    pub const WHOLE: Bounds = Bounds { offset: 0, length: 0 };

    pub fn new(offset: u32, length: u32) -> Self {
        Bounds { offset, length }
    }

    pub fn from_raw(raw: u64) -> Self {
        Bounds {
            offset: (raw >> 32) as u32,
            length: raw as u32,
        }
    }

    pub fn raw(&self) -> u64 {
        ((self.offset as u64) << 32) | self.length as u64
    }

    /// Slice `data` to this window, or `None` when the window falls outside it.
    pub fn apply<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.offset as usize;
        if start > data.len() {
            return None;
        }
        if self.length == 0 {
            return Some(&data[start..]);
        }
        let end = start.checked_add(self.length as usize)?;
        data.get(start..end)
    }
}
