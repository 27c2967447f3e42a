use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::types::StreamEvent;

/// Channel capacity for consumers that read events as they are produced.
pub const DEFAULT_CAPACITY: usize = 64;

/// Write side of a run's event stream. The orchestrator is its only producer.
///
/// When the reading side goes away the run is cancelled, so an abandoned request stops
/// claiming worker slots and network calls.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Creates a sink and the receiver a transport reads from.
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, cancel), rx)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns false, and cancels the run, when nobody is listening anymore.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            if !self.cancel.is_cancelled() {
                log::info!("Progress consumer disconnected, cancelling run");
                self.cancel.cancel();
            }
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has gone away, cancelling the run at that moment.
    pub async fn closed(&self) {
        self.tx.closed().await;
        if !self.cancel.is_cancelled() {
            log::info!("Progress consumer disconnected, cancelling run");
            self.cancel.cancel();
        }
    }
}
