//! Lua handler modules
//!
//! A handler module is a Lua script that evaluates to a table exposing the
//! required API surface: `chunk_size`, `transform`, and `on_reload`. The
//! table may also export `handlers`, an ordered array of
//! `{ opcode = <byte>, handler = <function(payload)> }` entries; the opcode
//! registry is built from it at load time, with the module's `transform`
//! serving as the fallback for unmapped opcodes (it receives the full
//! chunk so it can report the opcode byte).

use std::path::Path;

use bytes::Bytes;
use mlua::{Function, Lua, Table, Value};

use crate::core::registry::{FallbackFn, HandlerFn, HandlerRegistry};
use crate::error::{Result, TaplineError};

/// API names every handler module must expose as functions
pub const REQUIRED_APIS: [&str; 3] = ["chunk_size", "transform", "on_reload"];

/// One loaded handler module: the table the script evaluated to, the
/// pre-resolved function handles, and the opcode registry built from its
/// `handlers` export.
pub struct LuaModule {
    table: Table,
    chunk_size_fn: Function,
    on_reload_fn: Function,
    registry: HandlerRegistry,
}

impl LuaModule {
    /// Execute the script at `path` inside `lua` and validate the module
    /// it evaluates to. Validation is atomic with the load: on any
    /// failure no `LuaModule` is produced and the caller's previously
    /// active module (if any) stays untouched.
    pub fn load(lua: &Lua, path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| TaplineError::PluginLoad(format!("{}: {}", path.display(), e)))?;
        let table: Table = lua
            .load(&source)
            .set_name(path.display().to_string())
            .eval()
            .map_err(|e| TaplineError::PluginLoad(format!("{}: {}", path.display(), e)))?;
        Self::validate(lua, table, path)
    }

    /// Check the required API surface and build the opcode registry.
    fn validate(lua: &Lua, table: Table, path: &Path) -> Result<Self> {
        for name in REQUIRED_APIS {
            match table.get::<Value>(name) {
                Ok(Value::Function(_)) => {}
                _ => {
                    return Err(TaplineError::PluginValidation(format!(
                        "{}: missing required function '{}'",
                        path.display(),
                        name
                    )))
                }
            }
        }

        let chunk_size_fn: Function = table.get("chunk_size")?;
        let on_reload_fn: Function = table.get("on_reload")?;
        let transform_fn: Function = table.get("transform")?;
        let registry = build_registry(lua, &table, transform_fn, path)?;

        Ok(Self {
            table,
            chunk_size_fn,
            on_reload_fn,
            registry,
        })
    }

    /// Preferred read size; must be a positive integer.
    pub fn chunk_size(&self) -> Result<usize> {
        let size: i64 = self.chunk_size_fn.call(())?;
        if size <= 0 {
            return Err(TaplineError::PluginValidation(format!(
                "chunk_size returned {}, expected a positive integer",
                size
            )));
        }
        Ok(size as usize)
    }

    /// Route one chunk through the opcode registry.
    pub fn dispatch(&self, chunk: &[u8]) -> Result<Option<Bytes>> {
        self.registry.dispatch(chunk)
    }

    /// Invoke this module's reload notification with the module it
    /// replaced, so in-memory state can be migrated.
    pub fn notify_reload(&self, previous: &LuaModule) -> Result<()> {
        self.on_reload_fn.call::<()>(previous.table.clone())?;
        Ok(())
    }

    /// The opcode registry built from this module's `handlers` export.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for LuaModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaModule")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Build the opcode registry from the module's optional `handlers` export.
fn build_registry(
    lua: &Lua,
    module: &Table,
    transform_fn: Function,
    path: &Path,
) -> Result<HandlerRegistry> {
    let mut pairs: Vec<(u8, HandlerFn)> = Vec::new();

    let handlers: Option<Table> = module.get("handlers")?;
    if let Some(handlers) = handlers {
        for i in 1..=handlers.raw_len() {
            let entry: Table = handlers.raw_get(i).map_err(|e| {
                TaplineError::PluginValidation(format!(
                    "{}: handlers[{}] is not a table: {}",
                    path.display(),
                    i,
                    e
                ))
            })?;
            let opcode: u8 = entry.get("opcode").map_err(|e| {
                TaplineError::PluginValidation(format!(
                    "{}: handlers[{}].opcode: {}",
                    path.display(),
                    i,
                    e
                ))
            })?;
            let func: Function = entry.get("handler").map_err(|e| {
                TaplineError::PluginValidation(format!(
                    "{}: handlers[{}].handler: {}",
                    path.display(),
                    i,
                    e
                ))
            })?;
            let lua = lua.clone();
            pairs.push((
                opcode,
                Box::new(move |payload: &[u8]| {
                    let arg = lua.create_string(payload)?;
                    let out: Option<mlua::String> = func.call(arg)?;
                    Ok(out.map(|s| Bytes::copy_from_slice(&s.as_bytes())))
                }),
            ));
        }
    }

    // The module's transform doubles as the registry fallback. It sees the
    // whole chunk, opcode byte included.
    let lua = lua.clone();
    let fallback: FallbackFn = Box::new(move |opcode, payload| {
        let mut chunk = Vec::with_capacity(payload.len() + 1);
        chunk.push(opcode);
        chunk.extend_from_slice(payload);
        let arg = lua.create_string(&chunk)?;
        let out: Option<mlua::String> = transform_fn.call(arg)?;
        Ok(out.map(|s| Bytes::copy_from_slice(&s.as_bytes())))
    });

    HandlerRegistry::new(pairs, fallback)
}

/// Register the host primitives available to handler scripts: a global
/// `log` table whose messages are routed into tracing with the handler's
/// identity attached.
pub fn register_host_fns(lua: &Lua, plugin: &str) -> Result<()> {
    let log_table = lua.create_table()?;

    let name = plugin.to_string();
    log_table.set(
        "debug",
        lua.create_function(move |_, msg: mlua::String| {
            tracing::debug!(plugin = %name, "{}", msg.to_string_lossy());
            Ok(())
        })?,
    )?;

    let name = plugin.to_string();
    log_table.set(
        "info",
        lua.create_function(move |_, msg: mlua::String| {
            tracing::info!(plugin = %name, "{}", msg.to_string_lossy());
            Ok(())
        })?,
    )?;

    let name = plugin.to_string();
    log_table.set(
        "warn",
        lua.create_function(move |_, msg: mlua::String| {
            tracing::warn!(plugin = %name, "{}", msg.to_string_lossy());
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log_table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const MINIMAL: &str = r#"
local M = {}
function M.chunk_size() return 512 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#;

    #[test]
    fn test_load_minimal_module() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "cl.lua", MINIMAL);
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert_eq!(module.chunk_size().unwrap(), 512);
        assert!(module.registry().is_empty());
    }

    #[test]
    fn test_transform_nil_means_passthrough() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "cl.lua", MINIMAL);
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert!(module.dispatch(&[0x01, 0xAA]).unwrap().is_none());
    }

    #[test]
    fn test_missing_api_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        let err = LuaModule::load(&lua, &path).unwrap_err();
        match err {
            TaplineError::PluginValidation(msg) => assert!(msg.contains("chunk_size")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_function_api_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
M.chunk_size = 512
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        assert!(matches!(
            LuaModule::load(&lua, &path),
            Err(TaplineError::PluginValidation(_))
        ));
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let lua = Lua::new();
        assert!(matches!(
            LuaModule::load(&lua, &dir.path().join("absent.lua")),
            Err(TaplineError::PluginLoad(_))
        ));
    }

    #[test]
    fn test_script_syntax_error_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "cl.lua", "local M = {{{");
        let lua = Lua::new();
        assert!(matches!(
            LuaModule::load(&lua, &path),
            Err(TaplineError::PluginLoad(_))
        ));
    }

    #[test]
    fn test_registered_handler_receives_payload_only() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
local function double(payload) return payload .. payload end
M.handlers = {
  { opcode = 0x10, handler = double },
}
function M.chunk_size() return 128 end
function M.transform(data) return "fb:" .. data end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert_eq!(module.registry().len(), 1);

        // Registered opcode: handler sees the payload, not the opcode
        let out = module.dispatch(&[0x10, b'a', b'b']).unwrap().unwrap();
        assert_eq!(out.as_ref(), b"abab");

        // Unregistered opcode: transform fallback sees the full chunk
        let out = module.dispatch(&[0x2A, b'z', b'z']).unwrap().unwrap();
        assert_eq!(out.as_ref(), b"fb:*zz");
    }

    #[test]
    fn test_duplicate_opcode_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
local function noop(payload) end
M.handlers = {
  { opcode = 1, handler = noop },
  { opcode = 1, handler = noop },
}
function M.chunk_size() return 128 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        assert!(matches!(
            LuaModule::load(&lua, &path),
            Err(TaplineError::PluginValidation(_))
        ));
    }

    #[test]
    fn test_opcode_out_of_byte_range_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
M.handlers = {
  { opcode = 300, handler = function(payload) end },
}
function M.chunk_size() return 128 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        assert!(matches!(
            LuaModule::load(&lua, &path),
            Err(TaplineError::PluginValidation(_))
        ));
    }

    #[test]
    fn test_chunk_size_must_be_positive() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
function M.chunk_size() return 0 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert!(matches!(
            module.chunk_size(),
            Err(TaplineError::PluginValidation(_))
        ));
    }

    #[test]
    fn test_handler_runtime_error_surfaces_as_script_error() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
M.handlers = {
  { opcode = 1, handler = function(payload) error("malformed payload") end },
}
function M.chunk_size() return 128 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert!(matches!(
            module.dispatch(&[0x01, 0xFF]),
            Err(TaplineError::Script(_))
        ));
    }

    #[test]
    fn test_binary_safe_payloads() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
M.handlers = {
  { opcode = 0, handler = function(payload) return payload end },
}
function M.chunk_size() return 128 end
function M.transform(data) end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        let module = LuaModule::load(&lua, &path).unwrap();
        // NUL and high bytes survive the Lua round trip untouched
        let payload = [0x00, 0xFF, 0x7F, 0x00, 0x01];
        let mut chunk = vec![0x00];
        chunk.extend_from_slice(&payload);
        let out = module.dispatch(&chunk).unwrap().unwrap();
        assert_eq!(out.as_ref(), &payload);
    }

    #[test]
    fn test_host_log_table_is_callable() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "cl.lua",
            r#"
local M = {}
function M.chunk_size() return 16 end
function M.transform(data) log.info("saw " .. #data .. " bytes") end
function M.on_reload(old) end
return M
"#,
        );
        let lua = Lua::new();
        register_host_fns(&lua, "test/cl").unwrap();
        let module = LuaModule::load(&lua, &path).unwrap();
        assert!(module.dispatch(&[0x01, 0x02]).unwrap().is_none());
    }
}
