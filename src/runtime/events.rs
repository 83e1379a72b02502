/// Progress reporting from running nodes
///
/// Nodes report fractional progress through a `ProgressReporter`. Reporting is
/// fire-and-forget: when the engine's bounded channel is full the event is
/// dropped, so a chatty node can never stall its own execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// A single progress update from one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub execution_id: String,
    pub node_id: String,
    /// Completion fraction, always within `0.0..=1.0`
    pub fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(execution_id: &str, node_id: &str, fraction: f64, message: Option<String>) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            fraction,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Handle given to each node for reporting progress
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    execution_id: String,
    node_id: String,
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(execution_id: &str, node_id: &str, tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            tx: Some(tx),
        }
    }

    /// Reporter that discards everything, for running nodes outside an engine
    pub fn disabled(node_id: &str) -> Self {
        Self { execution_id: String::new(), node_id: node_id.to_string(), tx: None }
    }

    /// Report progress without blocking. Returns false when the event was
    /// dropped.
    pub fn report(&self, fraction: f64, message: impl Into<String>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let event = ProgressEvent::new(&self.execution_id, &self.node_id, fraction, Some(message.into()));
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(node_id = %self.node_id, "progress channel full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Receives progress events forwarded by the engine
///
/// Called from the engine's drain loop, so implementations must return
/// quickly and must not block.
pub trait ProgressConsumer: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Fans progress events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressConsumer for BroadcastProgress {
    fn emit(&self, event: &ProgressEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(ProgressEvent::new("x", "n", 1.7, None).fraction, 1.0);
        assert_eq!(ProgressEvent::new("x", "n", -0.2, None).fraction, 0.0);
        assert_eq!(ProgressEvent::new("x", "n", f64::NAN, None).fraction, 0.0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new("exec", "n1", tx);
        assert!(reporter.report(0.1, "first"));
        assert!(!reporter.report(0.2, "second"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_id, "n1");
        assert_eq!(event.message.as_deref(), Some("first"));
    }

    #[test]
    fn test_disabled_reporter() {
        assert!(!ProgressReporter::disabled("n").report(0.5, "ignored"));
    }

    #[tokio::test]
    async fn test_broadcast_consumer() {
        let progress = BroadcastProgress::new(8);
        let mut rx = progress.subscribe();
        progress.emit(&ProgressEvent::new("exec", "n", 0.5, None));
        assert_eq!(rx.recv().await.unwrap().fraction, 0.5);
    }
}
