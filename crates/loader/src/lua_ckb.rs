use std::cell::RefCell;
use std::rc::Rc;

use cellua_abi::{
    Bounds, CellReference, ChannelId, HashType, Place, ProcessId, Source, SyscallError, HASH_LEN,
};
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, MultiValue, Table, Value, Variadic};

use crate::process::{CodeSource, Processes};
use crate::sandbox::{host_exit_code, Sandbox};
use crate::signal::ExitRequest;

/// Options table accepted by `spawn` and `spawn_cell`.
struct SpawnOptions {
    argv: Vec<String>,
    inherited: Vec<ChannelId>,
    place: Place,
    bounds: Bounds,
}

impl SpawnOptions {
    fn from_table(opts: Option<Table>) -> mlua::Result<Self> {
        let Some(opts) = opts else {
            return Ok(SpawnOptions {
                argv: Vec::new(),
                inherited: Vec::new(),
                place: Place::CellData,
                bounds: Bounds::WHOLE,
            });
        };
        let argv: Option<Vec<String>> = opts.get("argv")?;
        let inherited: Option<Vec<u64>> = opts.get("inherited_fds")?;
        let place = match opts.get::<Option<u64>>("place")? {
            None => Place::CellData,
            Some(raw) => Place::from_raw(raw)
                .ok_or_else(|| mlua::Error::RuntimeError(format!("invalid place {raw}")))?,
        };
        let bounds = opts
            .get::<Option<u64>>("bounds")?
            .map_or(Bounds::WHOLE, Bounds::from_raw);
        Ok(SpawnOptions {
            argv: argv.unwrap_or_default(),
            inherited: inherited.unwrap_or_default().into_iter().map(ChannelId).collect(),
            place,
            bounds,
        })
    }
}

fn failure(lua: &Lua, err: SyscallError) -> mlua::Result<MultiValue> {
    (Value::Nil, err.code() as i64).into_lua_multi(lua)
}

fn fallible<T: IntoLuaMulti>(lua: &Lua, result: Result<T, SyscallError>) -> mlua::Result<MultiValue> {
    match result {
        Ok(value) => value.into_lua_multi(lua),
        Err(err) => failure(lua, err),
    }
}

fn cell_reference(index: u32, source: u64) -> Result<CellReference, SyscallError> {
    let source = Source::from_raw(source).ok_or(SyscallError::InvalidArgument)?;
    Ok(CellReference::new(source, index))
}

fn set_constants(ckb: &Table) -> mlua::Result<()> {
    for source in [
        Source::Input,
        Source::Output,
        Source::CellDep,
        Source::HeaderDep,
        Source::GroupInput,
        Source::GroupOutput,
    ] {
        let name = format!("SOURCE_{}", source.name().to_ascii_uppercase());
        ckb.set(name, source.raw() as i64)?;
    }
    for hash_type in [HashType::Data, HashType::Type, HashType::Data1, HashType::Data2] {
        let name = format!("HASH_TYPE_{}", hash_type.name().to_ascii_uppercase());
        ckb.set(name, hash_type.as_u8())?;
    }
    ckb.set("PLACE_CELL_DATA", Place::CellData.raw())?;
    ckb.set("PLACE_WITNESS", Place::Witness.raw())?;
    ckb.set("HASH_LEN", HASH_LEN)?;
    Ok(())
}

/// `lua.create_function`, except that the function refuses to run once the
/// instance has terminated and raises the exit again instead.
fn function<A, R, F>(lua: &Lua, sandbox: &Sandbox, func: F) -> mlua::Result<Function>
where
    A: FromLuaMulti,
    R: IntoLuaMulti,
    F: Fn(&Lua, A) -> mlua::Result<R> + 'static,
{
    let sb = sandbox.clone();
    lua.create_function(move |lua, args: A| {
        if let Some(code) = sb.exit_status() {
            return Err(mlua::Error::external(ExitRequest(i32::from(code))));
        }
        func(lua, args)
    })
}

/// Install the `ckb` global (also reachable through `require("ckb")`) and
/// route `print` to the host debug channel.
pub fn register(lua: &Lua, sandbox: &Sandbox, processes: Rc<RefCell<Processes>>) -> mlua::Result<()> {
    let ckb = lua.create_table()?;
    set_constants(&ckb)?;

    let sb = sandbox.clone();
    ckb.set(
        "exit",
        function(lua, sandbox, move |_, code: i64| -> mlua::Result<()> {
            let code = i32::try_from(code)
                .ok()
                .filter(|code| *code >= 0)
                .ok_or_else(|| mlua::Error::RuntimeError(format!("exit code {code} is out of range")))?;
            if sb.exit_enabled() {
                sb.terminate(host_exit_code(code));
            }
            Err(mlua::Error::external(ExitRequest(code)))
        })?,
    )?;

    let sys = sandbox.syscalls().clone();
    ckb.set(
        "debug",
        function(lua, sandbox, move |_, message: String| {
            sys.debug(&message);
            Ok(())
        })?,
    )?;

    let sys = sandbox.syscalls().clone();
    ckb.set(
        "load_script",
        function(lua, sandbox, move |lua, ()| {
            let loaded = sys.load_script(&mut []).and_then(|len| {
                let mut buf = vec![0u8; len as usize];
                sys.load_script(&mut buf)?;
                Ok(buf)
            });
            match loaded {
                Ok(bytes) => lua.create_string(bytes)?.into_lua_multi(lua),
                Err(err) => failure(lua, err),
            }
        })?,
    )?;

    let sys = sandbox.syscalls().clone();
    ckb.set(
        "load_cell_data",
        function(lua, sandbox, move |lua, (index, source): (u32, u64)| {
            match cell_reference(index, source).and_then(|cell| sys.load_cell_data(cell)) {
                Ok(bytes) => lua.create_string(bytes)?.into_lua_multi(lua),
                Err(err) => failure(lua, err),
            }
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "spawn",
        function(lua, sandbox, move |lua, (index, source, opts): (u32, u64, Option<Table>)| {
            let opts = SpawnOptions::from_table(opts)?;
            let spawned = cell_reference(index, source).and_then(|cell| {
                let code = CodeSource {
                    cell,
                    place: opts.place,
                    bounds: opts.bounds,
                };
                procs.borrow_mut().spawn(opts.argv, opts.inherited, code)
            });
            fallible(lua, spawned.map(|handle| handle.pid().0))
        })?,
    )?;

    let procs = Rc::clone(&processes);
    let sys = sandbox.syscalls().clone();
    ckb.set(
        "spawn_cell",
        function(
            lua,
            sandbox,
            move |lua, (code_hash, hash_type, opts): (mlua::String, u8, Option<Table>)| {
                let code_hash = <[u8; HASH_LEN]>::try_from(&code_hash.as_bytes()[..]).map_err(|_| {
                    mlua::Error::RuntimeError(format!("code hash must be {HASH_LEN} bytes"))
                })?;
                let Some(hash_type) = HashType::from_u8(hash_type) else {
                    return failure(lua, SyscallError::InvalidArgument);
                };
                let opts = SpawnOptions::from_table(opts)?;
                let spawned = sys.find_dependency(&code_hash, hash_type).and_then(|index| {
                    let code = CodeSource {
                        cell: CellReference::new(Source::CellDep, index),
                        place: opts.place,
                        bounds: opts.bounds,
                    };
                    procs.borrow_mut().spawn(opts.argv, opts.inherited, code)
                });
                fallible(lua, spawned.map(|handle| handle.pid().0))
            },
        )?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "pipe",
        function(lua, sandbox, move |lua, ()| {
            let pipe = procs.borrow().pipe();
            fallible(lua, pipe.map(|p| (p.read_end.0, p.write_end.0)))
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "read",
        function(lua, sandbox, move |lua, (fd, len): (u64, usize)| {
            let read = procs.borrow().read(ChannelId(fd), len);
            match read {
                Ok(bytes) => lua.create_string(bytes)?.into_lua_multi(lua),
                Err(err) => failure(lua, err),
            }
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "write",
        function(lua, sandbox, move |lua, (fd, bytes): (u64, mlua::String)| {
            let written = procs.borrow().write(ChannelId(fd), &bytes.as_bytes()[..]);
            fallible(lua, written)
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "close",
        function(lua, sandbox, move |lua, fd: u64| {
            let closed = procs.borrow().close(ChannelId(fd));
            fallible(lua, closed.map(|()| true))
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "wait",
        function(lua, sandbox, move |lua, pid: u64| {
            let waited = procs.borrow_mut().wait_pid(ProcessId(pid));
            fallible(lua, waited)
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "inherited_fds",
        function(lua, sandbox, move |lua, ()| match procs.borrow().inherited() {
            Ok(fds) => lua
                .create_sequence_from(fds.into_iter().map(|fd| fd.0))?
                .into_lua_multi(lua),
            Err(err) => failure(lua, err),
        })?,
    )?;

    let procs = Rc::clone(&processes);
    ckb.set(
        "process_id",
        function(lua, sandbox, move |_, ()| Ok(procs.borrow().current().0))?,
    )?;

    let sb = sandbox.clone();
    ckb.set(
        "mount",
        function(lua, sandbox, move |lua, (index, source): (u32, u64)| {
            if !sb.filesystem().is_enabled() {
                return Err(mlua::Error::RuntimeError("file system access is disabled".into()));
            }
            let data = match cell_reference(index, source).and_then(|cell| sb.syscalls().load_cell_data(cell)) {
                Ok(data) => data,
                Err(err) => return failure(lua, err),
            };
            let mounted = sb
                .fs()
                .borrow_mut()
                .mount(&data)
                .map_err(|e| mlua::Error::RuntimeError(format!("cannot mount {index}: {e}")))?;
            mounted.into_lua_multi(lua)
        })?,
    )?;

    let globals = lua.globals();
    globals.set("ckb", ckb.clone())?;
    let loaded: Table = globals.get::<Table>("package")?.get("loaded")?;
    loaded.set("ckb", ckb)?;

    let sys = sandbox.syscalls().clone();
    let print = function(lua, sandbox, move |lua, values: Variadic<Value>| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            let text: mlua::String = tostring.call(value)?;
            parts.push(text.to_string_lossy().to_string());
        }
        sys.debug(&parts.join("\t"));
        Ok(())
    })?;
    globals.set("print", print)?;
    Ok(())
}
