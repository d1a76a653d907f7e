use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::loading::loader::{Command, LoaderSnapshot};
use crate::prelude::{DisplayWindow, LoaderError, LoaderResult, TimedEvent};
use crate::telemetry::{LoaderMetrics, MetricsRecorder};

/// Cloneable entry point used by the chart layer to drive a
/// [`TimeWindowLoader`](crate::loading::TimeWindowLoader).
pub struct LoaderHandle<E> {
    commands: mpsc::UnboundedSender<Command<E>>,
    snapshots: watch::Receiver<LoaderSnapshot<E>>,
    metrics: Arc<MetricsRecorder>,
}

impl<E> Clone for LoaderHandle<E> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            snapshots: self.snapshots.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E: TimedEvent> LoaderHandle<E> {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command<E>>,
        snapshots: watch::Receiver<LoaderSnapshot<E>>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            commands,
            snapshots,
            metrics,
        }
    }

    fn send(&self, command: Command<E>) -> LoaderResult<()> {
        self.commands
            .send(command)
            .map_err(|_| LoaderError::Shutdown)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<LoaderResult<T>>) -> Command<E>,
    ) -> LoaderResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| LoaderError::Shutdown)?
    }

    /// Starts a session for `patient`, discarding any previous one.
    /// Resolves once the first window is resident.
    pub async fn initialize(&self, patient: impl Into<String>) -> LoaderResult<()> {
        let patient = patient.into();
        self.call(|reply| Command::Initialize { patient, reply })
            .await
    }

    /// Reloads the current patient from scratch.
    pub async fn refresh(&self) -> LoaderResult<()> {
        self.call(|reply| Command::Refresh { reply }).await
    }

    /// Makes `window` resident. Resolves `true` when a fetch and merge
    /// happened, `false` when the window was already covered or was
    /// superseded by a newer request. Before `initialize` this fails with
    /// `NotInitialized`; after a failed cycle, windows needing I/O fail with
    /// the pending error until `retry` succeeds.
    pub async fn request_window(&self, window: DisplayWindow) -> LoaderResult<bool> {
        self.call(|reply| Command::RequestWindow { window, reply })
            .await
    }

    /// Re-issues the failed fetch. Resolves `false` when nothing had failed.
    pub async fn retry(&self) -> LoaderResult<bool> {
        self.call(|reply| Command::Retry { reply }).await
    }

    pub fn snapshot(&self) -> LoaderSnapshot<E> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LoaderSnapshot<E>> {
        self.snapshots.clone()
    }

    pub fn on_ready(
        &self,
        callback: impl Fn(&LoaderSnapshot<E>) + Send + 'static,
    ) -> LoaderResult<()> {
        self.send(Command::OnReady(Box::new(callback)))
    }

    pub fn on_error(&self, callback: impl Fn(&LoaderError) + Send + 'static) -> LoaderResult<()> {
        self.send(Command::OnError(Box::new(callback)))
    }

    pub fn metrics(&self) -> LoaderMetrics {
        self.metrics.snapshot()
    }

    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }
}
