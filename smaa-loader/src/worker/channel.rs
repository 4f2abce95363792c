//! Worker thread lifecycle and the message protocol spoken across it
//!
//! The caller and the worker share no memory: the trigger travels over a
//! `std::sync::mpsc` channel into the worker thread and the single response
//! comes back over a Tokio channel. Owned buffers are moved, never shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

use crate::images::RawImageData;

/// Request sent to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Produce both lookup textures. Carries no payload.
    Generate,
}

/// The two raw pixel buffers a worker produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImagePair {
    pub search: RawImageData,
    pub area: RawImageData,
}

/// Error event raised by a worker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkerError {
    pub message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response emitted by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message(RawImagePair),
    Error(WorkerError),
}

/// Worker side of the channel, handed to the thread body
pub struct WorkerScope {
    requests: mpsc::Receiver<WorkerRequest>,
    events: UnboundedSender<WorkerEvent>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerScope {
    /// Block until the next request arrives
    ///
    /// Returns `None` once the worker has been terminated.
    pub fn recv(&self) -> Option<WorkerRequest> {
        if self.is_cancelled() {
            return None;
        }
        self.requests.recv().ok()
    }

    /// Post a result message. Returns false if nobody is listening anymore.
    pub fn post(&self, pair: RawImagePair) -> bool {
        self.events.send(WorkerEvent::Message(pair)).is_ok()
    }

    /// Post an error event. Returns false if nobody is listening anymore.
    pub fn post_error(&self, error: WorkerError) -> bool {
        self.events.send(WorkerEvent::Error(error)).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Flag observed by long-running programs to abort early
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

/// Caller side of a worker thread
///
/// Owns the thread and both channel ends. Dropping the handle terminates the
/// worker, so every exit path of the owner releases it.
pub struct WorkerHandle {
    id: Uuid,
    requests: Option<mpsc::Sender<WorkerRequest>>,
    events: UnboundedReceiver<WorkerEvent>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    terminated: bool,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl WorkerHandle {
    /// Spawn a worker thread running `body`
    ///
    /// Both channels exist before the thread starts, so a response can never
    /// be emitted before the caller is able to receive it.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(WorkerScope) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (request_tx, request_rx) = mpsc::channel();
        let (event_tx, event_rx) = unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let scope = WorkerScope {
            requests: request_rx,
            events: event_tx,
            cancelled: cancelled.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("{}-{}", name, &id.simple().to_string()[..8]))
            .spawn(move || body(scope))?;

        debug!(worker = %id, "spawned worker thread");

        Ok(Self {
            id,
            requests: Some(request_tx),
            events: event_rx,
            cancelled,
            thread: Some(thread),
            terminated: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send a request to the worker
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| WorkerError::new("worker has been terminated"))?;
        sender
            .send(request)
            .map_err(|_| WorkerError::new("worker exited before receiving the request"))
    }

    /// Wait for the next event. `None` means the worker went away silently.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Release the worker's thread and channels. Safe to call repeatedly.
    ///
    /// A thread still busy computing is detached; its VM observes the
    /// cancellation flag and unwinds on its own.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        self.cancelled.store(true, Ordering::Relaxed);
        self.requests.take();
        self.events.close();

        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            }
        }

        debug!(worker = %self.id, "worker terminated");
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pixel_pair() -> RawImagePair {
        RawImagePair {
            search: RawImageData::new(1, 1, vec![1, 2, 3, 255]).unwrap(),
            area: RawImageData::new(1, 1, vec![4, 5, 6, 255]).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_request_response() {
        let mut worker = WorkerHandle::spawn("test-worker", |scope| {
            while let Some(WorkerRequest::Generate) = scope.recv() {
                scope.post(pixel_pair());
            }
        })
        .unwrap();

        worker.post(WorkerRequest::Generate).unwrap();
        assert_eq!(
            worker.next_event().await,
            Some(WorkerEvent::Message(pixel_pair()))
        );
        worker.terminate();
        assert!(worker.is_terminated());
    }

    #[tokio::test]
    async fn test_silent_exit_yields_none() {
        let mut worker = WorkerHandle::spawn("test-worker", |_scope| {}).unwrap();
        assert_eq!(worker.next_event().await, None);
    }

    #[tokio::test]
    async fn test_post_after_terminate_fails() {
        let mut worker = WorkerHandle::spawn("test-worker", |scope| while scope.recv().is_some() {})
            .unwrap();
        worker.terminate();
        worker.terminate();
        assert!(worker.post(WorkerRequest::Generate).is_err());
    }

    #[tokio::test]
    async fn test_terminate_releases_worker_thread() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = WorkerHandle::spawn("test-worker", move |scope| {
            while scope.recv().is_some() {}
            let _ = done_tx.send(());
        })
        .unwrap();

        drop(worker);
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
