use std::collections::BTreeMap;

use cellua_abi::EncodingError;
use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table, Value};

use crate::sandbox::Sandbox;

/// File run when the loaded code is a filesystem image.
pub const MAIN_FILE: &str = "main.lua";

const WORD: usize = 4;
const ENTRY_SIZE: usize = 4 * WORD;

/// A read-only filesystem packed into a single cell.
///
/// Image layout, all integers little-endian u32, offsets relative to the
/// start of the blob:
///
/// ```text
/// file_count
/// file_count x { name_offset, name_length, content_offset, content_length }
/// blob
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellFs {
    files: BTreeMap<String, Vec<u8>>,
}

fn word(data: &[u8], at: usize) -> Result<usize, EncodingError> {
    let bytes = data
        .get(at..at + WORD)
        .ok_or(EncodingError::TooShort { need: at + WORD, have: data.len() })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

fn range<'a>(blob: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8], EncodingError> {
    offset
        .checked_add(len)
        .and_then(|end| blob.get(offset..end))
        .ok_or_else(|| EncodingError::Invalid(format!("{what} at {offset}+{len} is outside the blob")))
}

impl CellFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an image. Names must be UTF-8 and unique within the image.
    pub fn parse(image: &[u8]) -> Result<Vec<(String, Vec<u8>)>, EncodingError> {
        let count = word(image, 0)?;
        let table_end = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(WORD))
            .ok_or_else(|| EncodingError::Invalid(format!("file count {count} overflows")))?;
        if image.len() < table_end {
            return Err(EncodingError::TooShort { need: table_end, have: image.len() });
        }
        let blob = &image[table_end..];

        let mut files: Vec<(String, Vec<u8>)> = Vec::with_capacity(count);
        for i in 0..count {
            let at = WORD + i * ENTRY_SIZE;
            let name = range(blob, word(image, at)?, word(image, at + WORD)?, "name")?;
            let content = range(blob, word(image, at + 2 * WORD)?, word(image, at + 3 * WORD)?, "content")?;
            let name = std::str::from_utf8(name)
                .map_err(|_| EncodingError::Invalid(format!("file #{i} has a non-UTF-8 name")))?;
            if files.iter().any(|(n, _)| n == name) {
                return Err(EncodingError::Invalid(format!("duplicate file `{name}`")));
            }
            files.push((name.to_string(), content.to_vec()));
        }
        Ok(files)
    }

    /// Build an image. Inverse of [`CellFs::parse`].
    pub fn pack(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut table = Vec::with_capacity(WORD + files.len() * ENTRY_SIZE);
        let mut blob = Vec::new();
        table.extend_from_slice(&(files.len() as u32).to_le_bytes());
        for (name, content) in files {
            for part in [name.as_bytes(), *content] {
                table.extend_from_slice(&(blob.len() as u32).to_le_bytes());
                table.extend_from_slice(&(part.len() as u32).to_le_bytes());
                blob.extend_from_slice(part);
            }
        }
        table.extend_from_slice(&blob);
        table
    }

    /// Merge an image into the tree. Files already present are shadowed.
    pub fn mount(&mut self, image: &[u8]) -> Result<usize, EncodingError> {
        let files = Self::parse(image)?;
        let count = files.len();
        self.files.extend(files);
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

const DISABLED: &str = "file system access is disabled";

/// Compile `name` from the mounted tree.
pub(crate) fn load_file(lua: &Lua, sandbox: &Sandbox, name: &str) -> mlua::Result<Function> {
    if !sandbox.filesystem().is_enabled() {
        return Err(mlua::Error::RuntimeError(DISABLED.to_string()));
    }
    let source = sandbox
        .fs()
        .borrow()
        .get(name)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| mlua::Error::RuntimeError(format!("cannot open {name}")))?;
    lua.load(source).set_name(format!("@{name}")).into_function()
}

fn describe(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Replace the host-file based `loadfile`, `dofile` and package searchers
/// with ones that read the mounted tree.
pub fn install(lua: &Lua, sandbox: &Sandbox) -> mlua::Result<()> {
    let globals = lua.globals();

    let sb = sandbox.clone();
    let loadfile = lua.create_function(move |lua, name: String| -> mlua::Result<MultiValue> {
        match load_file(lua, &sb, &name) {
            Ok(func) => func.into_lua_multi(lua),
            Err(err) => (Value::Nil, describe(&err)).into_lua_multi(lua),
        }
    })?;
    globals.set("loadfile", loadfile)?;

    let sb = sandbox.clone();
    let dofile = lua.create_function(move |lua, name: String| -> mlua::Result<MultiValue> {
        load_file(lua, &sb, &name)?.call(())
    })?;
    globals.set("dofile", dofile)?;

    let package: Table = globals.get("package")?;
    let searchers: Table = package.get("searchers")?;
    let preload: Value = searchers.raw_get(1)?;
    let sb = sandbox.clone();
    let searcher = lua.create_function(move |lua, module: String| -> mlua::Result<MultiValue> {
        if !sb.filesystem().is_enabled() {
            return format!("\n\t{DISABLED}").into_lua_multi(lua);
        }
        let base = module.replace('.', "/");
        let candidates = [format!("{base}.lua"), format!("{base}/init.lua")];
        for path in &candidates {
            if sb.fs().borrow().get(path).is_some() {
                return match load_file(lua, &sb, path) {
                    Ok(func) => (func, path.clone()).into_lua_multi(lua),
                    Err(err) => Err(mlua::Error::RuntimeError(format!(
                        "error loading module '{module}' from file '{path}':\n\t{}",
                        describe(&err)
                    ))),
                };
            }
        }
        let tried: Vec<String> = candidates
            .iter()
            .map(|p| format!("\n\tno file '{p}' in cell filesystem"))
            .collect();
        tried.concat().into_lua_multi(lua)
    })?;
    let replacement = lua.create_sequence_from([preload, Value::Function(searcher)])?;
    package.set("searchers", replacement)?;
    package.set("path", "")?;
    package.set("cpath", "")?;
    package.set("loadlib", Value::Nil)?;
    Ok(())
}

/// Image exercised by `-t`.
pub fn self_test_image() -> Vec<u8> {
    CellFs::pack(&[
        (
            MAIN_FILE,
            br#"
local greet = require("lib.greet")
assert(greet.hello("cell") == "hello, cell", "require through the cell filesystem")
assert(require("lib.greet") == greet, "modules are cached")
local chunk = assert(loadfile("data.lua"))
assert(chunk().answer == 42, "loadfile")
assert(dofile("data.lua").answer == 42, "dofile")
local missing, err = loadfile("nope.lua")
assert(missing == nil and err:find("cannot open"), "missing files are reported")
assert(not pcall(require, "nope"), "unknown modules fail")
"#,
        ),
        (
            "lib/greet.lua",
            br#"
local M = {}
function M.hello(name) return "hello, " .. name end
return M
"#,
        ),
        ("data.lua", b"return { answer = 42 }"),
    ])
}
