//! Common test utilities - trackers, spawners and stores with observable behavior

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use smaa_loader::images::{CacheAccessError, CacheStore, RawImageData};
use smaa_loader::worker::{RawImagePair, WorkerError, WorkerHandle, WorkerSpawner};
use smaa_loader::ProgressTracker;

/// One tracker call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerCall {
    pub tracker: &'static str,
    pub event: &'static str,
    pub name: String,
}

/// Shared, ordered log of tracker calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<TrackerCall>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that appends to this log under `label`
    pub fn tracker(&self, label: &'static str) -> Arc<RecordingTracker> {
        Arc::new(RecordingTracker {
            label,
            log: self.clone(),
        })
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.0.lock().clone()
    }

    /// Number of `event` calls for `name` on `tracker`
    pub fn count(&self, tracker: &str, event: &str, name: &str) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|c| c.tracker == tracker && c.event == event && c.name == name)
            .count()
    }

    fn push(&self, tracker: &'static str, event: &'static str, name: &str) {
        self.0.lock().push(TrackerCall {
            tracker,
            event,
            name: name.to_string(),
        });
    }
}

pub struct RecordingTracker {
    label: &'static str,
    log: CallLog,
}

impl ProgressTracker for RecordingTracker {
    fn start(&self, name: &str) {
        self.log.push(self.label, "start", name);
    }

    fn end(&self, name: &str) {
        self.log.push(self.label, "end", name);
    }

    fn error(&self, name: &str) {
        self.log.push(self.label, "error", name);
    }
}

/// How a scripted worker answers the trigger
#[derive(Debug, Clone)]
pub enum Script {
    Respond(RawImagePair),
    Fail(WorkerError),
}

/// Spawner whose workers follow a script and count their lifecycle
pub struct ScriptedSpawner {
    script: Script,
    spawned: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedSpawner {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            spawned: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn responding(pair: RawImagePair) -> Arc<Self> {
        Self::new(Script::Respond(pair))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(Script::Fail(WorkerError::new(message)))
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers whose thread observed termination
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Poll until `count` workers have been released or two seconds pass
    pub async fn wait_released(&self, count: usize) -> bool {
        for _ in 0..200 {
            if self.released() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self) -> std::io::Result<WorkerHandle> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let released = self.released.clone();

        WorkerHandle::spawn("scripted-worker", move |scope| {
            if scope.recv().is_some() {
                match script {
                    Script::Respond(pair) => scope.post(pair),
                    Script::Fail(e) => scope.post_error(e),
                };
            }
            // Stay alive until the owner terminates us
            while scope.recv().is_some() {}
            released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Store whose every operation fails
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheAccessError> {
        Err(CacheAccessError::Unavailable {
            message: "store offline".to_string(),
        })
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), CacheAccessError> {
        Err(CacheAccessError::Unavailable {
            message: "store offline".to_string(),
        })
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheAccessError> {
        Err(CacheAccessError::Unavailable {
            message: "store offline".to_string(),
        })
    }
}

/// Single-pixel image of the given gray level
pub fn pixel(level: u8) -> RawImageData {
    RawImageData::new(1, 1, vec![level, level, level, 255]).expect("valid pixel")
}

pub fn pixel_pair(search: u8, area: u8) -> RawImagePair {
    RawImagePair {
        search: pixel(search),
        area: pixel(area),
    }
}
