//! Lua sandbox - isolated execution context for worker programs
//!
//! Each worker thread owns exactly one sandbox. The VM never leaves the thread
//! that created it, so nothing inside it is shared with the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{Function, HookTriggers, Lua, Result as LuaResult, StdLib, Table, Value, VmState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::Metering;

/// Instructions executed between two hook invocations
const HOOK_INTERVAL: u32 = 1000;

/// Resource limits applied to a worker program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Maximum instructions per invocation (default: 100,000,000)
    pub max_instructions: u64,
    /// Maximum VM memory in bytes (default: 64MB)
    pub max_memory: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_instructions: 100_000_000,
            max_memory: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Errors that can occur while running a worker program
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("instruction limit exceeded ({0} > {1})")]
    InstructionLimitExceeded(u64, u64),

    #[error("worker terminated during execution")]
    Cancelled,

    #[error("program does not define entry point '{0}'")]
    MissingEntryPoint(String),

    #[error("Lua error: {0}")]
    LuaError(#[from] mlua::Error),
}

/// A sandboxed Lua VM owned by a single worker thread
pub struct WorkerSandbox {
    lua: Lua,
    limits: SandboxLimits,
    metering: Metering,
    instruction_count: Arc<AtomicU64>,
    exceeded: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerSandbox {
    /// Create a sandbox that aborts once `cancelled` is raised
    pub fn new(limits: SandboxLimits, cancelled: Arc<AtomicBool>) -> Result<Self, SandboxError> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )?;

        lua.set_memory_limit(limits.max_memory)?;

        let instruction_count = Arc::new(AtomicU64::new(0));
        let exceeded = Arc::new(AtomicBool::new(false));

        let count_clone = instruction_count.clone();
        let exceeded_clone = exceeded.clone();
        let cancelled_clone = cancelled.clone();
        let max_instructions = limits.max_instructions;

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
            move |_lua, _debug| {
                if cancelled_clone.load(Ordering::Relaxed) {
                    return Err(mlua::Error::RuntimeError("worker terminated".to_string()));
                }
                let step = u64::from(HOOK_INTERVAL);
                let current = count_clone.fetch_add(step, Ordering::Relaxed) + step;
                if current > max_instructions {
                    exceeded_clone.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::RuntimeError(
                        "instruction limit exceeded".to_string(),
                    ));
                }
                Ok(VmState::Continue)
            },
        );

        Self::remove_dangerous_globals(&lua)?;
        Self::add_safe_globals(&lua)?;

        Ok(Self {
            lua,
            limits,
            metering: Metering::new(),
            instruction_count,
            exceeded,
            cancelled,
        })
    }

    fn remove_dangerous_globals(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();

        let dangerous = [
            "os",
            "io",
            "loadfile",
            "dofile",
            "load",
            "loadstring",
            "require",
            "package",
            "debug",
            "collectgarbage",
        ];

        for name in dangerous {
            globals.set(name, Value::Nil)?;
        }

        Ok(())
    }

    /// `print` is routed to the tracing subscriber
    fn add_safe_globals(lua: &Lua) -> LuaResult<()> {
        let print = lua.create_function(|_, args: mlua::MultiValue| {
            let line = args
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.to_string_lossy().to_string(),
                    other => format!("{:?}", other),
                })
                .collect::<Vec<_>>()
                .join("\t");
            debug!(target: "smaa_loader::worker::program", "{}", line);
            Ok(())
        })?;
        lua.globals().set("print", print)?;

        Ok(())
    }

    pub fn metering(&self) -> &Metering {
        &self.metering
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run a program chunk so that its globals become available
    pub fn load_program(&mut self, source: &str, name: &str) -> Result<(), SandboxError> {
        self.reset_counters();
        let result = self.lua.load(source).set_name(name).exec();
        self.finish(result)
    }

    /// Call a global function defined by the loaded program
    pub fn call_entry(&mut self, entry: &str) -> Result<Table, SandboxError> {
        let func: Option<Function> = self.lua.globals().get(entry)?;
        let func = func.ok_or_else(|| SandboxError::MissingEntryPoint(entry.to_string()))?;

        self.reset_counters();
        let result = func.call::<Table>(());
        let table = self.finish(result)?;
        self.metering.record_invocation();
        Ok(table)
    }

    fn reset_counters(&self) {
        self.instruction_count.store(0, Ordering::Relaxed);
        self.exceeded.store(false, Ordering::Relaxed);
    }

    fn finish<R>(&self, result: LuaResult<R>) -> Result<R, SandboxError> {
        let instr = self.instruction_count.load(Ordering::Relaxed);
        self.metering.add_instructions(instr);
        self.metering.sample_memory(self.lua.used_memory() as u64);

        if self.cancelled.load(Ordering::Relaxed) {
            return Err(SandboxError::Cancelled);
        }
        if self.exceeded.load(Ordering::Relaxed) {
            return Err(SandboxError::InstructionLimitExceeded(
                instr,
                self.limits.max_instructions,
            ));
        }

        result.map_err(SandboxError::from)
    }

    /// Check if a global exists
    pub fn global_exists(&self, name: &str) -> bool {
        self.lua
            .globals()
            .get::<Value>(name)
            .map(|v| !matches!(v, Value::Nil))
            .unwrap_or(false)
    }

    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }
}
