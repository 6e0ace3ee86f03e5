//! Training progress events
//!
//! Trainers publish events on a broadcast channel. Sending never blocks:
//! a slow subscriber only loses the oldest events (it sees `Lagged`), and
//! with no subscribers events are simply dropped.

use crate::models::{EpochMetrics, ModelKind};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Events buffered per subscriber before the oldest are dropped
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// One step of a training run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        model: ModelKind,
        samples: usize,
        epochs: usize,
    },
    Epoch {
        model: ModelKind,
        metrics: EpochMetrics,
    },
    Diverged {
        model: ModelKind,
        epoch: usize,
    },
    Completed {
        model: ModelKind,
        version: String,
        duration_ms: u64,
    },
}

impl ProgressEvent {
    pub fn model(&self) -> ModelKind {
        match self {
            Self::Started { model, .. }
            | Self::Epoch { model, .. }
            | Self::Diverged { model, .. }
            | Self::Completed { model, .. } => *model,
        }
    }
}

/// Publishing side of the progress channel
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; a channel with no subscribers drops it.
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream, skipping over lagged gaps
    pub fn stream(&self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|event| event.ok())
    }
}

impl Default for ProgressSender {
    fn default() -> Self {
        Self::new(PROGRESS_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let sender = ProgressSender::default();
        let mut rx = sender.subscribe();

        sender.send(ProgressEvent::Started {
            model: ModelKind::Price,
            samples: 5,
            epochs: 20,
        });
        sender.send(ProgressEvent::Diverged {
            model: ModelKind::Price,
            epoch: 3,
        });

        assert!(matches!(rx.recv().await.unwrap(), ProgressEvent::Started { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Diverged {
                model: ModelKind::Price,
                epoch: 3
            }
        );
    }

    #[tokio::test]
    async fn test_send_without_subscribers_does_not_fail() {
        let sender = ProgressSender::new(1);
        sender.send(ProgressEvent::Diverged {
            model: ModelKind::Image,
            epoch: 1,
        });
    }

    #[tokio::test]
    async fn test_stream_skips_lag() {
        let sender = ProgressSender::new(2);
        let stream = sender.stream();
        tokio::pin!(stream);

        for epoch in 1..=5 {
            sender.send(ProgressEvent::Diverged {
                model: ModelKind::Image,
                epoch,
            });
        }
        drop(sender);

        let epochs: Vec<usize> = stream
            .map(|e| match e {
                ProgressEvent::Diverged { epoch, .. } => epoch,
                _ => 0,
            })
            .collect()
            .await;
        assert_eq!(epochs, vec![4, 5]);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(ProgressEvent::Completed {
            model: ModelKind::Price,
            version: "1.0.1".into(),
            duration_ms: 12,
        })
        .unwrap();
        assert_eq!(json["event"], "completed");
        assert_eq!(json["model"], "price");
    }
}
