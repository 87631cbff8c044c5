use std::sync::Arc;

use cellua_abi::{HashType, ProcessId, Script, ScriptArguments, HASH_LEN};
use cellua_hostvm::{data_hash, Cell, Event, EventLog, Machine, MachineConfig, MachineError, Transaction, Witness};

use crate::entry::LoaderProgram;
use crate::sandbox::ResourceBudget;

/// Cell data the loader program is installed under.
pub const LOADER_CODE: &[u8] = b"\x7fELF cellua-loader";

/// Builds a transaction whose script runs the loader, with the loader in
/// `cell_deps[0]`.
pub struct TxBuilder {
    tx: Transaction,
    args: Vec<u8>,
    local_file: Option<Vec<u8>>,
    budget: ResourceBudget,
    config: MachineConfig,
}

impl Default for TxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TxBuilder {
    pub fn new() -> Self {
        let script = Script::new(data_hash(LOADER_CODE), HashType::Data1.as_u8(), Vec::new());
        let mut tx = Transaction::new(script);
        tx.cell_deps.push(Cell::new(LOADER_CODE));
        TxBuilder {
            tx,
            args: ScriptArguments::own_cell(0),
            local_file: None,
            budget: ResourceBudget::default(),
            config: MachineConfig::default(),
        }
    }

    /// Code embedded in the invoking cell (first input of the group).
    pub fn own_cell(code: &[u8]) -> Self {
        Self::own_cell_with_flags(code, 0)
    }

    pub fn own_cell_with_flags(code: &[u8], flags: u16) -> Self {
        let mut builder = Self::new().input(Cell::new(code)).group_input(0);
        builder.args = ScriptArguments::own_cell(flags);
        builder
    }

    /// Code in a dependency cell selected by hash. For `HashType::Type` the
    /// cell's type hash is set to the hash of its data.
    pub fn dependency(code: &[u8], hash_type: HashType) -> Self {
        Self::dependency_with_flags(code, hash_type, 0)
    }

    pub fn dependency_with_flags(code: &[u8], hash_type: HashType, flags: u16) -> Self {
        let hash = data_hash(code);
        let mut cell = Cell::new(code);
        if !hash_type.matches_data() {
            cell = cell.with_type_hash(hash);
        }
        let mut builder = Self::new().cell_dep(cell);
        builder.args = ScriptArguments::dependency(flags, &hash, hash_type);
        builder
    }

    /// Replace the script arguments verbatim.
    pub fn args(mut self, args: Vec<u8>) -> Self {
        self.args = args;
        self
    }

    pub fn input(mut self, cell: Cell) -> Self {
        self.tx.inputs.push(cell);
        self
    }

    pub fn output(mut self, cell: Cell) -> Self {
        self.tx.outputs.push(cell);
        self
    }

    pub fn cell_dep(mut self, cell: Cell) -> Self {
        self.tx.cell_deps.push(cell);
        self
    }

    pub fn witness(mut self, bytes: &[u8]) -> Self {
        self.tx.witnesses.push(Witness(bytes.to_vec()));
        self
    }

    pub fn group_input(mut self, index: u32) -> Self {
        self.tx.group_inputs.push(index);
        self
    }

    pub fn group_output(mut self, index: u32) -> Self {
        self.tx.group_outputs.push(index);
        self
    }

    pub fn local_file(mut self, contents: &[u8]) -> Self {
        self.local_file = Some(contents.to_vec());
        self
    }

    pub fn budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(&self) -> Transaction {
        let mut tx = self.tx.clone();
        tx.script.args = self.args.clone();
        tx
    }

    /// A host with the transaction loaded and the loader installed.
    pub fn machine(&self) -> Machine {
        let machine = Machine::with_config(self.build(), self.config);
        machine.install(LOADER_CODE, Arc::new(LoaderProgram::with_budget(self.budget)));
        if let Some(contents) = &self.local_file {
            machine.set_local_file(contents.clone());
        }
        machine
    }

    /// Verify the transaction: the host finds the loader through the script.
    pub fn verify(&self) -> Result<Outcome, MachineError> {
        let machine = self.machine();
        let exit_code = machine.verify()?;
        Ok(Outcome::new(exit_code, &machine))
    }

    /// Run the loader as the root instance with explicit arguments.
    pub fn run(&self, argv: &[&str]) -> Result<Outcome, MachineError> {
        let machine = self.machine();
        let argv = argv.iter().map(|a| a.to_string()).collect();
        let exit_code = machine.run(Arc::new(LoaderProgram::with_budget(self.budget)), argv)?;
        Ok(Outcome::new(exit_code, &machine))
    }
}

/// Result of one verification.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub exit_code: i8,
    pub log: EventLog,
    pub processes: usize,
}

impl Outcome {
    fn new(exit_code: i8, machine: &Machine) -> Self {
        Outcome {
            exit_code,
            log: machine.log(),
            processes: machine.process_count(),
        }
    }

    /// Operator messages from the root instance.
    pub fn messages(&self) -> Vec<&str> {
        self.log.debug_messages(ProcessId::ROOT.0)
    }

    /// Operator messages from any instance.
    pub fn messages_of(&self, pid: u64) -> Vec<&str> {
        self.log.debug_messages(pid)
    }

    /// Dependency lookups made by any instance, with the hash they asked for.
    pub fn lookups(&self) -> Vec<(String, u8)> {
        self.log
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::FindDependency {
                    code_hash, hash_type, ..
                } => Some((code_hash.clone(), *hash_type)),
                _ => None,
            })
            .collect()
    }

    pub fn exit_of(&self, pid: u64) -> Option<i8> {
        self.log.events().iter().find_map(|e| match e {
            Event::Terminated { pid: p, exit_code, .. } if *p == pid => Some(*exit_code),
            _ => None,
        })
    }
}

/// Hex form of a hash as it appears in the event log.
pub fn hash_hex(hash: &[u8; HASH_LEN]) -> String {
    hex::encode(hash)
}
