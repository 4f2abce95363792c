//! Spawner that runs the embedded SMAA lookup texture program

use std::sync::Arc;

use mlua::Table;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    RawImagePair, SandboxError, SandboxLimits, WorkerError, WorkerHandle, WorkerRequest,
    WorkerSandbox, WorkerScope,
};
use crate::images::RawImageData;

/// Lua source of the lookup texture generator, compiled into the binary
pub const SMAA_PROGRAM: &str = include_str!("smaa.lua");

/// Global function the program must define
const ENTRY_POINT: &str = "generate";

/// Creates compute units on demand
///
/// Every call must return a fresh, unshared worker.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> std::io::Result<WorkerHandle>;
}

/// Spawns worker threads that execute a Lua program in a sandbox
#[derive(Debug, Clone)]
pub struct LuaWorkerSpawner {
    program: Arc<str>,
    limits: SandboxLimits,
}

impl Default for LuaWorkerSpawner {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

impl LuaWorkerSpawner {
    /// Spawner for the built-in SMAA program
    pub fn new(limits: SandboxLimits) -> Self {
        Self::with_program(SMAA_PROGRAM, limits)
    }

    /// Spawner for a custom program exposing the same `generate` entry point
    pub fn with_program(program: impl Into<Arc<str>>, limits: SandboxLimits) -> Self {
        Self {
            program: program.into(),
            limits,
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }
}

impl WorkerSpawner for LuaWorkerSpawner {
    fn spawn(&self) -> std::io::Result<WorkerHandle> {
        let program = self.program.clone();
        let limits = self.limits.clone();
        WorkerHandle::spawn("smaa-worker", move |scope| run_program(scope, &program, limits))
    }
}

/// Worker thread body: boot the VM, then answer triggers until terminated
fn run_program(scope: WorkerScope, program: &str, limits: SandboxLimits) {
    let mut sandbox = match boot(program, limits, &scope) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            warn!("worker program failed to load: {}", e);
            scope.post_error(WorkerError::new(e.to_string()));
            return;
        }
    };

    while let Some(request) = scope.recv() {
        match request {
            WorkerRequest::Generate => {
                let delivered = match generate(&mut sandbox) {
                    Ok(pair) => scope.post(pair),
                    Err(e) => scope.post_error(WorkerError::new(e.to_string())),
                };
                debug!(
                    instructions = sandbox.metering().instructions(),
                    peak_memory = sandbox.metering().peak_memory(),
                    "worker program finished"
                );
                if !delivered {
                    break;
                }
            }
        }
    }
}

fn boot(
    program: &str,
    limits: SandboxLimits,
    scope: &WorkerScope,
) -> Result<WorkerSandbox, SandboxError> {
    let mut sandbox = WorkerSandbox::new(limits, scope.cancellation())?;
    sandbox.load_program(program, "smaa.lua")?;
    Ok(sandbox)
}

#[derive(Debug, Error)]
enum ProgramError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("malformed {field} output: {reason}")]
    Output { field: &'static str, reason: String },
}

fn generate(sandbox: &mut WorkerSandbox) -> Result<RawImagePair, ProgramError> {
    let output = sandbox.call_entry(ENTRY_POINT)?;
    Ok(RawImagePair {
        search: image_field(&output, "search")?,
        area: image_field(&output, "area")?,
    })
}

/// Read `{ width, height, data }` from the program output
fn image_field(output: &Table, field: &'static str) -> Result<RawImageData, ProgramError> {
    let malformed = |reason: String| ProgramError::Output { field, reason };

    let image: Table = output
        .get(field)
        .map_err(|e| malformed(e.to_string()))?;
    let width: u32 = image.get("width").map_err(|e| malformed(e.to_string()))?;
    let height: u32 = image.get("height").map_err(|e| malformed(e.to_string()))?;
    let data: Table = image.get("data").map_err(|e| malformed(e.to_string()))?;
    let bytes = data
        .sequence_values::<u8>()
        .collect::<mlua::Result<Vec<u8>>>()
        .map_err(|e| malformed(e.to_string()))?;

    RawImageData::new(width, height, bytes).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerEvent;

    const TINY_PROGRAM: &str = r#"
        function generate()
            return {
                search = { width = 1, height = 1, data = { 10, 20, 30, 255 } },
                area = { width = 1, height = 1, data = { 40, 50, 60, 255 } },
            }
        end
    "#;

    #[tokio::test]
    async fn test_custom_program_round_trip() {
        let spawner = LuaWorkerSpawner::with_program(TINY_PROGRAM, SandboxLimits::default());
        let mut worker = spawner.spawn().unwrap();
        worker.post(WorkerRequest::Generate).unwrap();

        match worker.next_event().await {
            Some(WorkerEvent::Message(pair)) => {
                assert_eq!(pair.search.data, vec![10, 20, 30, 255]);
                assert_eq!(pair.area.data, vec![40, 50, 60, 255]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_syntax_error_becomes_error_event() {
        let spawner = LuaWorkerSpawner::with_program("function (", SandboxLimits::default());
        let mut worker = spawner.spawn().unwrap();
        worker.post(WorkerRequest::Generate).ok();

        assert!(matches!(
            worker.next_event().await,
            Some(WorkerEvent::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_buffer_size_is_rejected() {
        let program = r#"
            function generate()
                return {
                    search = { width = 2, height = 2, data = { 1, 2, 3 } },
                    area = { width = 1, height = 1, data = { 0, 0, 0, 255 } },
                }
            end
        "#;
        let spawner = LuaWorkerSpawner::with_program(program, SandboxLimits::default());
        let mut worker = spawner.spawn().unwrap();
        worker.post(WorkerRequest::Generate).unwrap();

        match worker.next_event().await {
            Some(WorkerEvent::Error(e)) => assert!(e.message.contains("search")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedded_program_dimensions() {
        let spawner = LuaWorkerSpawner::default();
        let mut worker = spawner.spawn().unwrap();
        worker.post(WorkerRequest::Generate).unwrap();

        match worker.next_event().await {
            Some(WorkerEvent::Message(pair)) => {
                assert_eq!((pair.search.width, pair.search.height), (64, 16));
                assert_eq!((pair.area.width, pair.area.height), (160, 560));
                // Pattern 0 (no edges) never produces coverage
                assert_eq!(&pair.area.data[..2], &[0, 0]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
