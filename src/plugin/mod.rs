//! Hot-reloadable packet handlers
//!
//! `PluginHandler` wraps one handler module's lifecycle: load, API
//! validation, opcode dispatch, and lazy hot reload. Before serving any
//! call it compares the backing file's modification time to the last-seen
//! baseline; a strictly newer timestamp triggers a reload of the module in
//! place. Equal or earlier timestamps never do, so filesystem time
//! resolution cannot cause reload storms.

mod lua;

pub use lua::{register_host_fns, LuaModule, REQUIRED_APIS};

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use mlua::Lua;

use crate::core::hooks::PacketHandler;
use crate::error::Result;
use crate::logger::log;

/// The hot-reloadable wrapper around one handler module.
///
/// Owns a dedicated Lua VM so the two directions of a session cannot
/// interfere with each other. A reload re-executes the script in the same
/// VM, which is what lets the previous module table be handed to the new
/// module's `on_reload` for state migration.
pub struct PluginHandler {
    lua: Lua,
    path: PathBuf,
    name: String,
    baseline: SystemTime,
    module: LuaModule,
}

impl PluginHandler {
    /// Load and validate the handler module at `path`. Load or validation
    /// failure here aborts the caller's session before any bridging
    /// begins.
    pub fn open(path: PathBuf) -> Result<Self> {
        let lua = Lua::new();
        let name = display_name(&path);
        register_host_fns(&lua, &name)?;

        let baseline = modified_time(&path)?;
        let module = LuaModule::load(&lua, &path)?;
        log::plugin(&name, "loaded");

        Ok(Self {
            lua,
            path,
            name,
            baseline,
            module,
        })
    }

    /// Reload the module if the backing file changed since the last check.
    ///
    /// The baseline is advanced before the reload attempt, so a broken
    /// save fails only the call that observed it; subsequent calls are
    /// served by the retained module until the file changes again. On
    /// success the new module is activated first, then its `on_reload`
    /// runs with the previous module table, then the previous module is
    /// released.
    fn refresh(&mut self) -> Result<()> {
        let mtime = modified_time(&self.path)?;
        if mtime <= self.baseline {
            return Ok(());
        }
        self.baseline = mtime;

        let fresh = LuaModule::load(&self.lua, &self.path)?;
        let previous = std::mem::replace(&mut self.module, fresh);
        log::plugin(&self.name, "reloaded");
        self.module.notify_reload(&previous)
    }

    /// Identity of this handler, e.g. "7777-localhost-25565/cl.lua"
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PacketHandler for PluginHandler {
    fn chunk_size(&mut self) -> Result<usize> {
        self.refresh()?;
        self.module.chunk_size()
    }

    fn transform(&mut self, chunk: &[u8]) -> Result<Option<Bytes>> {
        self.refresh()?;
        self.module.dispatch(chunk)
    }
}

impl std::fmt::Debug for PluginHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandler")
            .field("name", &self.name)
            .field("baseline", &self.baseline)
            .finish_non_exhaustive()
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    Ok(std::fs::metadata(path)?.modified()?)
}

/// Bundle-relative handler identity for log context: the script file name
/// prefixed with its endpoint directory.
fn display_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    match path.parent().and_then(|p| p.file_name()) {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), file),
        None => file,
    }
}
