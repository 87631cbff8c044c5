use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cellua_abi::LoaderFault;
use mlua::{Lua, LuaOptions, StdLib};

use crate::cellfs::CellFs;
use crate::error::LoaderError;
use crate::syscalls::Syscalls;

pub const DEFAULT_MIN_BYTES: usize = 512 * 1024;
pub const DEFAULT_MAX_BYTES: usize = 3 * 1024 * 1024;

/// Libraries a script may use. `io`, `os` and `debug` stay out: the host
/// decides what a script can reach.
fn safe_libs() -> StdLib {
    StdLib::COROUTINE | StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH | StdLib::PACKAGE
}

/// Heap bounds of one runtime. Fixed before the runtime exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    min_bytes: usize,
    max_bytes: usize,
}

impl ResourceBudget {
    pub fn new(min_bytes: usize, max_bytes: usize) -> Result<Self, LoaderError> {
        if min_bytes == 0 || min_bytes > max_bytes {
            return Err(LoaderError::InvalidArgument(format!(
                "memory bounds must satisfy 0 < min <= max, got {min_bytes}..{max_bytes}"
            )));
        }
        Ok(ResourceBudget { min_bytes, max_bytes })
    }

    pub fn min_bytes(&self) -> usize {
        self.min_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        ResourceBudget {
            min_bytes: DEFAULT_MIN_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// A capability switch that can be turned on but never off again.
#[derive(Debug, Default)]
pub struct Gate(Cell<bool>);

impl Gate {
    pub fn enable(&self) {
        self.0.set(true);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug)]
pub struct SandboxConfig {
    pub budget: ResourceBudget,
    pub filesystem: Gate,
    pub local_access: Gate,
    pub exit_enabled: bool,
}

impl SandboxConfig {
    /// Loader running as a program of its own: `ckb.exit` ends the instance.
    pub fn standalone(budget: ResourceBudget) -> Self {
        SandboxConfig {
            budget,
            filesystem: Gate::default(),
            local_access: Gate::default(),
            exit_enabled: true,
        }
    }

    /// Runtime embedded in a host program: `ckb.exit` only unwinds to the
    /// caller of `run_code`.
    pub fn embedded(budget: ResourceBudget) -> Self {
        SandboxConfig {
            exit_enabled: false,
            ..Self::standalone(budget)
        }
    }
}

struct SandboxInner {
    sys: Syscalls,
    budget: ResourceBudget,
    filesystem: Gate,
    local_access: Gate,
    exit_enabled: Cell<bool>,
    exited: Cell<Option<i8>>,
    fs: RefCell<CellFs>,
}

/// Capabilities and limits shared by an instance and the Lua functions it
/// exposes. Cloning shares the same state.
#[derive(Clone)]
pub struct Sandbox {
    inner: Rc<SandboxInner>,
}

impl Sandbox {
    pub fn new(sys: Syscalls, config: SandboxConfig) -> Self {
        Sandbox {
            inner: Rc::new(SandboxInner {
                sys,
                budget: config.budget,
                filesystem: config.filesystem,
                local_access: config.local_access,
                exit_enabled: Cell::new(config.exit_enabled),
                exited: Cell::new(None),
                fs: RefCell::new(CellFs::new()),
            }),
        }
    }

    pub fn syscalls(&self) -> &Syscalls {
        &self.inner.sys
    }

    pub fn budget(&self) -> ResourceBudget {
        self.inner.budget
    }

    pub fn filesystem(&self) -> &Gate {
        &self.inner.filesystem
    }

    pub fn local_access(&self) -> &Gate {
        &self.inner.local_access
    }

    pub fn enable_filesystem(&self) {
        tracing::debug!("filesystem gate enabled");
        self.inner.filesystem.enable();
    }

    pub fn enable_local_access(&self) {
        tracing::debug!("local access gate enabled");
        self.inner.local_access.enable();
    }

    pub fn exit_enabled(&self) -> bool {
        self.inner.exit_enabled.get()
    }

    pub fn set_exit_enabled(&self, enabled: bool) {
        self.inner.exit_enabled.set(enabled);
    }

    pub fn fs(&self) -> &RefCell<CellFs> {
        &self.inner.fs
    }

    /// Contents of the host's local file. Needs the local-access gate; an
    /// unreadable file or one that fills the whole buffer is rejected.
    pub fn read_local_file(&self, capacity: usize) -> Result<Vec<u8>, LoaderError> {
        if !self.inner.local_access.is_enabled() {
            return Err(LoaderError::InvalidState("local file access is disabled".into()));
        }
        let contents = self
            .inner
            .sys
            .read_local_file(capacity)
            .ok_or_else(|| LoaderError::InvalidState("cannot read local file".into()))?;
        if contents.len() >= capacity {
            return Err(LoaderError::InvalidState(format!(
                "local file too large, limit is {capacity} bytes"
            )));
        }
        Ok(contents)
    }

    /// End the instance through the host's exit primitive. Nothing else in
    /// the loader calls it, and only the first call reaches the host. Once
    /// it has run, every script-facing function refuses to touch the host.
    pub fn terminate(&self, code: i8) {
        if self.inner.exited.get().is_some() {
            return;
        }
        tracing::debug!(code, "terminating instance");
        self.inner.exited.set(Some(code));
        self.inner.sys.exit(code);
    }

    /// Code the instance terminated with, if it has.
    pub fn exit_status(&self) -> Option<i8> {
        self.inner.exited.get()
    }

    /// An empty runtime with the heap limit installed, then the safe
    /// libraries, so that everything loaded counts against the budget.
    pub fn create_runtime(&self) -> Result<Lua, LoaderError> {
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::default()).map_err(runtime_error)?;
        lua.set_memory_limit(self.inner.budget.max_bytes)
            .map_err(runtime_error)?;
        lua.load_std_libs(safe_libs()).map_err(runtime_error)?;
        let _ = lua.gc_gen(0, 0);
        tracing::debug!(
            used = lua.used_memory(),
            max = self.inner.budget.max_bytes,
            "runtime created"
        );
        Ok(lua)
    }
}

/// Narrow an explicit exit code to what the host exit primitive carries.
/// Codes it cannot represent become an invalid-state fault.
pub fn host_exit_code(code: i32) -> i8 {
    i8::try_from(code).unwrap_or(LoaderFault::InvalidState.exit_code())
}

/// Allocation failures inside the runtime are loader-level out-of-memory
/// faults; anything else is kept as a Lua error.
pub(crate) fn runtime_error(err: mlua::Error) -> LoaderError {
    match err {
        mlua::Error::MemoryError(msg) => LoaderError::OutOfMemory(msg),
        other => LoaderError::Lua(other),
    }
}
