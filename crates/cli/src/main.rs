use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cellua_abi::{HashType, Script, ScriptArguments};
use cellua_hostvm::{data_hash, Cell, Machine, MachineConfig, Transaction};
use cellua_loader::sandbox::{DEFAULT_MAX_BYTES, DEFAULT_MIN_BYTES};
use cellua_loader::testing::LOADER_CODE;
use cellua_loader::{LoaderProgram, ResourceBudget};

#[derive(Parser)]
#[command(
    name = "cellua",
    about = "Run Lua cell scripts through the cellua loader in a simulated host"
)]
struct Cli {
    /// Transaction fixture (JSON). Its script must point at the loader.
    #[arg(long, conflicts_with = "cell")]
    tx: Option<PathBuf>,
    /// Lua file placed in the first input cell, run through the own-cell layout.
    #[arg(long)]
    cell: Option<PathBuf>,
    /// Run a string of Lua code.
    #[arg(short = 'e', value_name = "CODE")]
    execute: Option<String>,
    /// Serve this file through the host's local-file primitive and run it.
    #[arg(short = 'r', value_name = "FILE")]
    read_file: Option<PathBuf>,
    /// Enable the cell file system.
    #[arg(short = 'f')]
    filesystem: bool,
    /// Run the cell file system self-test.
    #[arg(short = 't')]
    self_test: bool,
    /// Lower bound of the Lua heap budget in bytes.
    #[arg(long, default_value_t = DEFAULT_MIN_BYTES)]
    min_memory: usize,
    /// Upper bound of the Lua heap budget in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    max_memory: usize,
    /// Maximum number of instances, the root included.
    #[arg(long)]
    max_processes: Option<usize>,
    /// Record every syscall to this file.
    #[arg(long)]
    record: Option<PathBuf>,
    /// Print the outcome as JSON instead of plain text.
    #[arg(long)]
    json: bool,
    /// Arguments passed on to the script.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl Cli {
    /// Loader argv, or `None` when the host should verify the transaction
    /// the way a node would.
    fn loader_argv(&self) -> Option<Vec<String>> {
        let mut argv = Vec::new();
        if self.filesystem {
            argv.push("-f".to_string());
        }
        if let Some(code) = &self.execute {
            argv.push("-e".to_string());
            argv.push(code.clone());
        } else if self.self_test {
            argv.push("-t".to_string());
        } else if self.read_file.is_some() {
            argv.push("-r".to_string());
        }
        if argv.is_empty() && self.args.is_empty() {
            return None;
        }
        argv.extend(self.args.iter().cloned());
        Some(argv)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(i32::from(code)),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i8, Box<dyn std::error::Error>> {
    let budget = ResourceBudget::new(cli.min_memory, cli.max_memory)?;
    let tx = match (&cli.tx, &cli.cell) {
        (Some(path), _) => Transaction::from_json(&fs::read_to_string(path)?)?,
        (None, Some(path)) => own_cell_transaction(fs::read(path)?),
        (None, None) => own_cell_transaction(Vec::new()),
    };

    let mut config = MachineConfig::default();
    if let Some(max) = cli.max_processes {
        config.max_processes = max;
    }
    let machine = Machine::with_config(tx, config);
    let program = Arc::new(LoaderProgram::with_budget(budget));
    machine.install(LOADER_CODE, program.clone());
    if let Some(path) = &cli.read_file {
        machine.set_local_file(fs::read(path)?);
    }

    let exit_code = match cli.loader_argv() {
        Some(argv) => {
            tracing::debug!(?argv, "running loader");
            machine.run(program, argv)?
        }
        None => machine.verify()?,
    };

    let log = machine.log();
    if let Some(path) = &cli.record {
        let json = log
            .to_json()
            .map_err(|e| format!("failed to serialize event log: {e}"))?;
        fs::write(path, json)?;
    }

    let mut messages = Vec::new();
    for pid in 0..machine.process_count() as u64 {
        for message in log.debug_messages(pid) {
            messages.push((pid, message.to_string()));
        }
    }

    if cli.json {
        let outcome = serde_json::json!({
            "exit_code": exit_code,
            "processes": machine.process_count(),
            "messages": messages
                .iter()
                .map(|(pid, message)| serde_json::json!({ "pid": pid, "message": message }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for (pid, message) in &messages {
            if *pid == 0 {
                eprintln!("{message}");
            } else {
                eprintln!("[{pid}] {message}");
            }
        }
        println!("exit code: {exit_code}");
    }
    Ok(exit_code)
}

/// A transaction with `code` in its only input cell and the loader in
/// `cell_deps[0]`.
fn own_cell_transaction(code: Vec<u8>) -> Transaction {
    let script = Script::new(
        data_hash(LOADER_CODE),
        HashType::Data1.as_u8(),
        ScriptArguments::own_cell(0),
    );
    let mut tx = Transaction::new(script);
    tx.cell_deps.push(Cell::new(LOADER_CODE));
    tx.inputs.push(Cell::new(code));
    tx.group_inputs.push(0);
    tx
}
