//! Compute units - isolated worker threads running sandboxed Lua programs

mod channel;
mod metering;
mod program;
mod sandbox;

pub use channel::{RawImagePair, WorkerError, WorkerEvent, WorkerHandle, WorkerRequest, WorkerScope};
pub use metering::Metering;
pub use program::{LuaWorkerSpawner, WorkerSpawner, SMAA_PROGRAM};
pub use sandbox::{SandboxError, SandboxLimits, WorkerSandbox};
