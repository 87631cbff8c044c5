use std::cell::RefCell;
use std::rc::Rc;

use cellua_abi::EncodingError;
use mlua::{Function, Lua};

use crate::cellfs::{self, MAIN_FILE};
use crate::error::LoaderError;
use crate::lua_ckb;
use crate::process::Processes;
use crate::resolve::ResolvedCode;
use crate::sandbox::{runtime_error, ResourceBudget, Sandbox, SandboxConfig};
use crate::signal::{self, ReturnSignal};
use crate::syscalls::Syscalls;

/// Embeddable runtime handle. The standalone loader builds its runtime
/// through the same path, so an embedding host sees exactly the behavior a
/// cell script does.
pub struct Instance {
    lua: Lua,
    sandbox: Sandbox,
    /// Captured at creation so scripts cannot swap out the protected call.
    xpcall: Function,
    processes: Rc<RefCell<Processes>>,
}

impl Instance {
    /// Embedded runtime: `ckb.exit` unwinds to the caller instead of ending
    /// the host instance.
    pub fn create(sys: Syscalls, min_bytes: usize, max_bytes: usize) -> Result<Self, LoaderError> {
        let budget = ResourceBudget::new(min_bytes, max_bytes)?;
        Self::with_config(sys, SandboxConfig::embedded(budget))
    }

    pub fn with_config(sys: Syscalls, config: SandboxConfig) -> Result<Self, LoaderError> {
        Self::from_sandbox(Sandbox::new(sys, config))
    }

    pub fn from_sandbox(sandbox: Sandbox) -> Result<Self, LoaderError> {
        let lua = sandbox.create_runtime()?;
        let processes = Rc::new(RefCell::new(Processes::new(sandbox.syscalls().clone())));
        lua_ckb::register(&lua, &sandbox, Rc::clone(&processes)).map_err(runtime_error)?;
        cellfs::install(&lua, &sandbox).map_err(runtime_error)?;
        let xpcall: Function = lua.globals().get("xpcall").map_err(runtime_error)?;
        tracing::debug!(used = lua.used_memory(), "instance ready");
        Ok(Instance {
            lua,
            sandbox,
            xpcall,
            processes,
        })
    }

    /// Run one chunk and reduce its outcome. Failures are reported on the
    /// host debug channel.
    pub fn run_code(&self, code: &[u8], name: &str) -> i32 {
        let sys = self.sandbox.syscalls();
        self.run_signal(code, name).reduce(|message| sys.debug(message))
    }

    /// Run one chunk without reducing the outcome. Once the instance has
    /// terminated, the outcome is always the code it terminated with.
    pub fn run_signal(&self, code: &[u8], name: &str) -> ReturnSignal {
        if let Some(code) = self.sandbox.exit_status() {
            return ReturnSignal::ExitCode(i32::from(code));
        }
        let signal = signal::run_chunk(&self.lua, &self.xpcall, code, name);
        match self.sandbox.exit_status() {
            Some(code) => ReturnSignal::ExitCode(i32::from(code)),
            None => signal,
        }
    }

    /// Add a filesystem image to the mounted tree.
    pub fn mount(&self, image: &[u8]) -> Result<usize, LoaderError> {
        if !self.sandbox.filesystem().is_enabled() {
            return Err(LoaderError::InvalidState("file system access is disabled".into()));
        }
        let count = self.sandbox.fs().borrow_mut().mount(image)?;
        tracing::debug!(files = count, "image mounted");
        Ok(count)
    }

    /// Run a file from the mounted tree. A file that is not there is a
    /// malformed image, not a script failure.
    pub fn run_file(&self, name: &str) -> Result<i32, LoaderError> {
        if !self.sandbox.filesystem().is_enabled() {
            return Err(LoaderError::InvalidState("file system access is disabled".into()));
        }
        let source = self
            .sandbox
            .fs()
            .borrow()
            .get(name)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| EncodingError::Invalid(format!("image has no {name}")))?;
        Ok(self.run_code(&source, &format!("@{name}")))
    }

    /// Run code found by descriptor resolution. With the filesystem gate on
    /// (or requested by the loader flags) the code is an image and its
    /// `main.lua` is run.
    pub fn run_resolved(&self, code: &ResolvedCode) -> Result<i32, LoaderError> {
        if code.flags.file_system() {
            self.sandbox.enable_filesystem();
        }
        if self.sandbox.filesystem().is_enabled() {
            self.mount(&code.bytes)?;
            return self.run_file(MAIN_FILE);
        }
        Ok(self.run_code(&code.bytes, &format!("={}", code.origin)))
    }

    /// Build the global `arg` table. `script` is the index of the first
    /// positional argument; the program name lands just before it.
    pub fn set_arg_table(&self, argv: &[String], script: usize) -> Result<(), LoaderError> {
        let arg = self.lua.create_table().map_err(runtime_error)?;
        let base = script as i64;
        arg.raw_set(-base, "lua").map_err(runtime_error)?;
        for (i, value) in argv.iter().enumerate() {
            arg.raw_set(1 + i as i64 - base, value.as_str())
                .map_err(runtime_error)?;
        }
        self.lua.globals().set("arg", arg).map_err(runtime_error)
    }

    pub fn set_exit_enabled(&self, enabled: bool) {
        self.sandbox.set_exit_enabled(enabled);
    }

    pub fn enable_filesystem(&self) {
        self.sandbox.enable_filesystem();
    }

    pub fn enable_local_access(&self) {
        self.sandbox.enable_local_access();
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn processes(&self) -> &Rc<RefCell<Processes>> {
        &self.processes
    }

    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }

    /// Release the runtime.
    pub fn close(self) {
        tracing::debug!(used = self.lua.used_memory(), "instance closed");
    }
}
