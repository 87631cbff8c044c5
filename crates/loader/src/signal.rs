use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Table, Value};

/// Reserved key of the early-return table.
pub const RETURN_CODE_KEY: &str = "__cellua_return_code";

/// Lua thread statuses a failed run can report.
///
/// Every chunk runs under `xpcall` with a message handler written in Rust. A
/// script that wants to stop early with a specific code raises a table
/// holding [`RETURN_CODE_KEY`]; the handler passes such tables through and
/// renders every other error object into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Runtime,
    Syntax,
    Memory,
}

impl RuntimeStatus {
    pub fn code(&self) -> i32 {
        match self {
            RuntimeStatus::Runtime => 2,
            RuntimeStatus::Syntax => 3,
            RuntimeStatus::Memory => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnSignal {
    Ok,
    Error { status: RuntimeStatus, message: String },
    ExitCode(i32),
}

impl ReturnSignal {
    /// `Ok` is 0, an explicit exit code passes through unchanged, and an
    /// error reports its message on `operator` and yields `-status`.
    pub fn reduce(self, operator: impl FnOnce(&str)) -> i32 {
        match self {
            ReturnSignal::Ok => 0,
            ReturnSignal::ExitCode(code) => code,
            ReturnSignal::Error { status, message } => {
                operator(&format!("lua: {message}"));
                -status.code()
            }
        }
    }

    fn error(status: RuntimeStatus, message: impl Into<String>) -> Self {
        ReturnSignal::Error {
            status,
            message: message.into(),
        }
    }
}

/// Error object raised by `ckb.exit`, and by every `ckb` function once the
/// instance has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest(pub i32);

impl fmt::Display for ExitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit requested with code {}", self.0)
    }
}

impl std::error::Error for ExitRequest {}

pub fn sentinel_table(lua: &Lua, code: i32) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.raw_set(RETURN_CODE_KEY, i64::from(code))?;
    Ok(table)
}

/// The exit code carried by an early-return table, if `value` is one.
/// Only non-negative integers count, so an explicit code can never be
/// mistaken for a failure.
pub fn sentinel_code(value: &Value) -> Option<i32> {
    let Value::Table(table) = value else {
        return None;
    };
    match table.raw_get::<Value>(RETURN_CODE_KEY).ok()? {
        Value::Integer(code) => i32::try_from(code).ok().filter(|code| *code >= 0),
        _ => None,
    }
}

/// Find an `ExitRequest` under the wrappers mlua puts around callback errors.
pub fn exit_request(err: &mlua::Error) -> Option<i32> {
    match err {
        mlua::Error::CallbackError { cause, .. } => exit_request(cause),
        mlua::Error::WithContext { cause, .. } => exit_request(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ExitRequest>().map(|r| r.0),
        _ => None,
    }
}

fn error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Render an arbitrary error object the way the standalone interpreter does.
fn render(value: &Value) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Error(err) => Ok(error_message(err)),
        Value::Table(table) => {
            if let Some(meta) = table.metatable() {
                if let Ok(tostring) = meta.raw_get::<Function>("__tostring") {
                    if let Value::String(s) = tostring.call::<Value>(table.clone())? {
                        return Ok(s.to_string_lossy().to_string());
                    }
                }
            }
            Ok(format!("(error object is a {} value)", value.type_name()))
        }
        other => Ok(format!("(error object is a {} value)", other.type_name())),
    }
}

fn message_handler(lua: &Lua, err: Value) -> mlua::Result<Value> {
    if sentinel_code(&err).is_some() {
        return Ok(err);
    }
    if let Value::Error(inner) = &err {
        if let Some(code) = exit_request(inner) {
            return Ok(Value::Table(sentinel_table(lua, code)?));
        }
    }
    let message = render(&err)?;
    Ok(Value::String(lua.create_string(message)?))
}

/// Classify a failure to compile a chunk.
pub fn load_failure(err: mlua::Error) -> ReturnSignal {
    match err {
        mlua::Error::MemoryError(msg) => ReturnSignal::error(RuntimeStatus::Memory, msg),
        mlua::Error::SyntaxError { message, .. } => ReturnSignal::error(RuntimeStatus::Syntax, message),
        other => ReturnSignal::error(RuntimeStatus::Syntax, other.to_string()),
    }
}

/// Call `func` with no arguments under `xpcall` and classify the outcome.
/// Values returned by the chunk are discarded.
pub fn protected_call(lua: &Lua, xpcall: &Function, func: Function) -> ReturnSignal {
    let handled = Rc::new(Cell::new(false));
    let flag = Rc::clone(&handled);
    let handler = match lua.create_function(move |lua, err: Value| {
        flag.set(true);
        message_handler(lua, err)
    }) {
        Ok(handler) => handler,
        Err(e) => return ReturnSignal::error(RuntimeStatus::Memory, error_message(&e)),
    };

    let results = match xpcall.call::<MultiValue>((func, handler)) {
        Ok(results) => results,
        Err(mlua::Error::MemoryError(msg)) => return ReturnSignal::error(RuntimeStatus::Memory, msg),
        Err(e) => return ReturnSignal::error(RuntimeStatus::Runtime, error_message(&e)),
    };

    let mut results = results.into_iter();
    if matches!(results.next(), Some(Value::Boolean(true))) {
        return ReturnSignal::Ok;
    }
    let err = results.next().unwrap_or(Value::Nil);
    if !handled.get() {
        // Lua skips the handler only when it could not allocate.
        let message = render(&err).unwrap_or_else(|_| "not enough memory".to_string());
        return ReturnSignal::error(RuntimeStatus::Memory, message);
    }
    if let Some(code) = sentinel_code(&err) {
        return ReturnSignal::ExitCode(code);
    }
    let message = render(&err).unwrap_or_else(|e| error_message(&e));
    ReturnSignal::error(RuntimeStatus::Runtime, message)
}

/// Compile and run one chunk.
pub fn run_chunk(lua: &Lua, xpcall: &Function, code: &[u8], name: &str) -> ReturnSignal {
    match lua.load(code).set_name(name).into_function() {
        Ok(func) => protected_call(lua, xpcall, func),
        Err(e) => load_failure(e),
    }
}
