//! Progress tracking for named units of work
//!
//! A tracker sees `start(name)` once per unit and then exactly one of
//! `end(name)` or `error(name)`. [`LoadingManager`] aggregates those calls and
//! signals completion once nothing is outstanding.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Observer of start/end/error transitions
///
/// Calls may arrive from any thread or task.
pub trait ProgressTracker: Send + Sync {
    fn start(&self, name: &str);
    fn end(&self, name: &str);
    fn error(&self, name: &str);
}

/// Outcome of a batch of tracked work
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    /// Units that ended successfully
    pub loaded: usize,
    /// Names of units that ended with an error, in arrival order
    pub failed: Vec<String>,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    /// Started but not yet terminated, per name
    outstanding: HashMap<String, usize>,
    total: usize,
    loaded: usize,
    failed: Vec<String>,
}

impl ProgressState {
    fn pending(&self) -> usize {
        self.outstanding.values().sum()
    }

    /// Consume one outstanding unit of `name`
    fn settle(&mut self, name: &str) -> bool {
        match self.outstanding.get_mut(name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.outstanding.remove(name);
                }
                true
            }
            _ => false,
        }
    }

    fn completion(&self) -> Completion {
        Completion {
            loaded: self.loaded,
            failed: self.failed.clone(),
        }
    }
}

/// Aggregating tracker with an awaitable completion signal
pub struct LoadingManager {
    state: Mutex<ProgressState>,
    completion: watch::Sender<Option<Completion>>,
    observer: Option<Arc<dyn ProgressTracker>>,
}

impl std::fmt::Debug for LoadingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoadingManager")
            .field("total", &state.total)
            .field("loaded", &state.loaded)
            .field("failed", &state.failed)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for LoadingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadingManager {
    pub fn new() -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            state: Mutex::new(ProgressState::default()),
            completion,
            observer: None,
        }
    }

    /// Wrap in Arc for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Forward every transition to `observer` after recording it
    pub fn with_observer(mut self, observer: Arc<dyn ProgressTracker>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Settled and started unit counts
    pub fn progress(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.loaded + state.failed.len(), state.total)
    }

    /// True when every started unit has terminated
    pub fn is_idle(&self) -> bool {
        self.state.lock().pending() == 0
    }

    /// Snapshot of the last completed batch, if the current one is done
    pub fn completion(&self) -> Option<Completion> {
        self.completion.borrow().clone()
    }

    /// Wait until the current batch completes
    pub async fn wait(&self) -> Completion {
        let mut rx = self.completion.subscribe();
        loop {
            if let Some(done) = rx.borrow_and_update().clone() {
                return done;
            }
            // The sender lives as long as `self`, so this cannot fail while borrowed
            if rx.changed().await.is_err() {
                return self.state.lock().completion();
            }
        }
    }

    fn terminate(&self, name: &str, failed: bool) -> bool {
        let mut state = self.state.lock();
        if !state.settle(name) {
            warn!("ignoring terminal call for '{}' with nothing outstanding", name);
            return false;
        }
        if failed {
            state.failed.push(name.to_string());
        } else {
            state.loaded += 1;
        }

        // Published under the state lock so a concurrent `start` sees either
        // the open batch or its completion, never the gap between them
        if state.pending() == 0 {
            let done = state.completion();
            debug!(loaded = done.loaded, failed = done.failed.len(), "all tracked work settled");
            self.completion.send_replace(Some(done));
        }
        true
    }
}

impl ProgressTracker for LoadingManager {
    fn start(&self, name: &str) {
        {
            let mut state = self.state.lock();
            if state.pending() == 0 && self.completion.borrow().is_some() {
                // New work after a completed batch opens a new batch
                *state = ProgressState::default();
                self.completion.send_replace(None);
            }
            *state.outstanding.entry(name.to_string()).or_insert(0) += 1;
            state.total += 1;
        }
        if let Some(observer) = &self.observer {
            observer.start(name);
        }
    }

    fn end(&self, name: &str) {
        if self.terminate(name, false) {
            if let Some(observer) = &self.observer {
                observer.end(name);
            }
        }
    }

    fn error(&self, name: &str) {
        if self.terminate(name, true) {
            if let Some(observer) = &self.observer {
                observer.error(name);
            }
        }
    }
}
