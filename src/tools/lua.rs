/// Sandboxed Lua runtime for server tools
///
/// A fresh interpreter is created for every call. Globals that reach the host
/// (os, io, debug, package, module loading) are removed and a few safe time
/// helpers are installed instead. An instruction hook aborts scripts that run
/// past their time limit.

use chrono::format::StrftimeItems;
use mlua::{HookTriggers, Lua, LuaSerdeExt, VmState};
use serde_json::Value;
use std::fmt::Write;
use std::time::{Duration, Instant};

/// Memory ceiling of a single tool invocation
const LUA_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Wall-clock budget of a single tool invocation
pub const LUA_TIME_LIMIT: Duration = Duration::from_secs(5);

/// VM instructions between two deadline checks
const DEADLINE_CHECK_INTERVAL: u32 = 10_000;

const BLOCKED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "require",
    "load",
    "loadfile",
    "loadstring",
    "dofile",
    "collectgarbage",
];

/// Run `script` with `args` bound to the global `args` table
pub fn run_script(script: &str, args: &Value) -> Result<Value, String> {
    run_script_with_limit(script, args, LUA_TIME_LIMIT)
}

/// Same as [`run_script`] with an explicit time limit
pub fn run_script_with_limit(script: &str, args: &Value, time_limit: Duration) -> Result<Value, String> {
    let lua = Lua::new();
    lua.set_memory_limit(LUA_MEMORY_LIMIT)
        .map_err(|e| format!("failed to set memory limit: {}", e))?;

    let deadline = Instant::now() + time_limit;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INTERVAL),
        move |_, _| {
            if Instant::now() >= deadline {
                return Err(mlua::Error::RuntimeError(format!(
                    "time limit of {:?} exceeded",
                    time_limit
                )));
            }
            Ok(VmState::Continue)
        },
    )
    .map_err(|e| format!("failed to install time limit: {}", e))?;

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals
            .set(*name, mlua::Nil)
            .map_err(|e| format!("failed to remove global '{}': {}", name, e))?;
    }
    install_helpers(&lua).map_err(|e| format!("failed to install helpers: {}", e))?;

    let lua_args = lua
        .to_value(args)
        .map_err(|e| format!("failed to convert arguments: {}", e))?;
    globals
        .set("args", lua_args)
        .map_err(|e| format!("failed to bind arguments: {}", e))?;

    tracing::debug!("🏃 Executing Lua tool script ({} bytes)", script.len());
    let result: mlua::Value = lua
        .load(script)
        .eval()
        .map_err(|e| format!("script failed: {}", e))?;

    lua_to_json(result)
}

fn install_helpers(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("date", lua.create_function(|_, format: String| format_now(&format))?)?;
    globals.set(
        "time",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?,
    )?;
    globals.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;
    Ok(())
}

/// Current UTC time in a strftime `format`; bad specifiers become Lua errors
fn format_now(format: &str) -> mlua::Result<String> {
    let items = StrftimeItems::new(format)
        .parse()
        .map_err(|e| mlua::Error::RuntimeError(format!("invalid date format '{}': {}", format, e)))?;

    let mut formatted = String::new();
    write!(formatted, "{}", chrono::Utc::now().format_with_items(items.iter()))
        .map_err(|_| mlua::Error::RuntimeError(format!("cannot format date with '{}'", format)))?;
    Ok(formatted)
}

/// Convert a Lua value back to JSON; sequence tables become arrays
fn lua_to_json(value: mlua::Value) -> Result<Value, String> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(serde_json::Number::from(i))),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => Ok(Value::String(s.to_string_lossy().to_string())),
        mlua::Value::Table(table) => {
            let mut is_array = true;
            let mut max_index = 0usize;
            let mut count = 0usize;

            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair.map_err(|e| format!("failed to iterate table: {}", e))?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut items = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let item = table
                        .get::<mlua::Value>(i as i64)
                        .map_err(|e| format!("failed to read table index {}: {}", i, e))?;
                    items.push(lua_to_json(item)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut object = serde_json::Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, item) = pair.map_err(|e| format!("failed to iterate table: {}", e))?;
                    let key = match key {
                        mlua::Value::String(s) => s.to_string_lossy().to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    object.insert(key, lua_to_json(item)?);
                }
                Ok(Value::Object(object))
            }
        }
        _ => Ok(Value::Null),
    }
}
