use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle over a long-lived provider streaming task.
///
/// Lifecycle contract:
/// - Prefer [`stop`](Self::stop) for a graceful shutdown that awaits the
///   task.
/// - [`abort`](Self::abort) force-cancels immediately.
/// - Dropping the handle sends a best-effort stop signal (when one exists)
///   and then aborts; the task may not observe the signal before the abort.
#[derive(Debug)]
pub struct StreamHandle {
    inner: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl StreamHandle {
    /// Handle over `inner` with a cooperative stop signal.
    #[must_use]
    pub const fn new(inner: JoinHandle<()>, stop_tx: oneshot::Sender<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: Some(stop_tx),
        }
    }

    /// Handle that can only abort; for connectors without a cooperative
    /// shutdown path.
    #[must_use]
    pub const fn new_abort_only(inner: JoinHandle<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: None,
        }
    }

    /// Request a graceful stop and await task completion. Task errors are
    /// ignored.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(inner) = self.inner.take() {
            let _ = inner.await;
        }
    }

    /// Force-cancel the task without waiting.
    pub fn abort(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abort();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(inner) = self.inner.take()
            && !inner.is_finished()
        {
            inner.abort();
        }
    }
}
