use cellua_hostvm::{HostAbi, Program};
use clap::Parser;

use crate::cellfs::{self_test_image, MAIN_FILE};
use crate::error::LoaderError;
use crate::instance::Instance;
use crate::resolve::resolve_code;
use crate::sandbox::{host_exit_code, ResourceBudget, Sandbox, SandboxConfig};
use crate::syscalls::Syscalls;

/// Buffer for `-r`. A file that fills it completely is rejected.
pub const LOCAL_FILE_CAPACITY: usize = 512 * 1024;

const USAGE: &str = "usage: lua [options] [script [args]]
Available options are:
  -e stat   execute string 'stat'
  -r        execute the host's local file
  -f        enable the cell file system
  -t        run the cell file system self-test";

#[derive(Parser, Debug)]
#[command(
    name = "lua",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct LoaderArgs {
    /// Run the first positional argument as code.
    #[arg(short = 'e')]
    execute: bool,
    /// Run the file served by the host's local-file primitive.
    #[arg(short = 'r')]
    read_file: bool,
    /// Enable the cell file system.
    #[arg(short = 'f')]
    filesystem: bool,
    /// Run the file system self-test.
    #[arg(short = 't')]
    self_test: bool,
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

/// The loader program installed in a cell.
///
/// ```text
/// lua [-e code | -r | -t] [-f] [args...]
/// ```
///
/// Without an option the code comes from the executing script's descriptor.
/// Whatever happens, the instance ends through [`Sandbox::terminate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderProgram {
    budget: ResourceBudget,
}

impl LoaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: ResourceBudget) -> Self {
        LoaderProgram { budget }
    }
}

impl Program for LoaderProgram {
    fn run(&self, host: Box<dyn HostAbi>, argv: Vec<String>) {
        let sys = Syscalls::new(host);
        let sandbox = Sandbox::new(sys.clone(), SandboxConfig::standalone(self.budget));
        let code = match execute(&sandbox, &argv) {
            Ok(code) => host_exit_code(code),
            Err(e) => {
                tracing::debug!(error = %e, "loader failed");
                if sandbox.exit_status().is_none() {
                    sys.debug(&format!("lua: {e}"));
                }
                e.exit_code()
            }
        };
        sandbox.terminate(code);
    }
}

fn parse_args(argv: &[String]) -> Result<LoaderArgs, LoaderError> {
    LoaderArgs::try_parse_from(argv).map_err(|e| {
        let rendered = e.to_string();
        let reason = rendered
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string();
        LoaderError::InvalidArgument(format!("{reason}\n{USAGE}"))
    })
}

/// Parse `argv`, build the runtime and run the selected code.
pub fn execute(sandbox: &Sandbox, argv: &[String]) -> Result<i32, LoaderError> {
    let args = parse_args(argv)?;
    if args.execute && args.rest.is_empty() {
        return Err(LoaderError::InvalidArgument(format!("'-e' needs argument\n{USAGE}")));
    }
    let script = match args.rest.len() {
        0 => 0,
        n => argv.len() - n,
    };

    let instance = Instance::from_sandbox(sandbox.clone())?;
    instance.set_arg_table(argv, script)?;
    if args.filesystem {
        instance.enable_filesystem();
    }

    let code = if let Some(code) = args.rest.first().filter(|_| args.execute) {
        instance.run_code(code.as_bytes(), "=(command line)")
    } else if args.self_test {
        instance.enable_filesystem();
        instance.mount(&self_test_image())?;
        instance.run_file(MAIN_FILE)?
    } else if args.read_file {
        instance.enable_local_access();
        let source = sandbox.read_local_file(LOCAL_FILE_CAPACITY)?;
        instance.run_code(&source, "=(read file)")
    } else {
        let resolved = resolve_code(sandbox.syscalls())?;
        instance.run_resolved(&resolved)?
    };
    instance.close();
    Ok(code)
}
