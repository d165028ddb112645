//! Observation Bus (C8): fans execution and pool-status events out to
//! dashboard subscribers.
//!
//! The source pool notifies a list of callbacks (`_event_callbacks`)
//! synchronously in-process; the teacher's equivalent fan-out is the
//! `Reporter`/`MultiReporter` pair in `src/report/mod.rs`. Neither shape
//! fits a websocket audience directly, so this is cast as a
//! `tokio::sync::broadcast` channel instead: subscribers come and go
//! independently of the publisher, and a slow or absent dashboard client
//! never blocks an execution.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::pool::{ExecutionRecord, PoolStatistics, SlotStatus};

const CHANNEL_CAPACITY: usize = 256;

/// One event pushed to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PoolEvent {
    #[serde(rename = "execution_start")]
    ExecutionStart { execution_id: String, user_id: String, code: String, worker: String },

    #[serde(rename = "execution_end")]
    ExecutionEnd { execution_id: String, duration: i64, success: bool },

    #[serde(rename = "pool_status")]
    PoolStatus { workers: Vec<SlotStatus> },

    #[serde(rename = "stats")]
    Stats {
        total_executions: u64,
        avg_exec_time_ms: f64,
        avg_lines: f64,
        success_rate: f64,
    },

    #[serde(rename = "history")]
    History { entries: Vec<ExecutionRecord> },
}

impl PoolEvent {
    pub fn stats(stats: &PoolStatistics) -> Self {
        PoolEvent::Stats {
            total_executions: stats.total_executions,
            avg_exec_time_ms: stats.avg_exec_time_ms(),
            avg_lines: stats.avg_lines(),
            success_rate: stats.success_rate(),
        }
    }
}

/// A broadcast fan-out of [`PoolEvent`]s. Cloning the bus clones the
/// sender handle, which is cheap and keeps the channel alive.
#[derive(Clone)]
pub struct ObservationBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl ObservationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes an event. Returns without error even if there are no
    /// subscribers -- matching the source, which tolerates an empty
    /// callback list.
    pub fn publish(&self, event: PoolEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = ObservationBus::new();
        let mut rx = bus.subscribe();

        bus.publish(PoolEvent::ExecutionEnd { execution_id: "1".into(), duration: 5, success: true });

        let event = rx.recv().await.unwrap();
        match event {
            PoolEvent::ExecutionEnd { execution_id, .. } => assert_eq!(execution_id, "1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = ObservationBus::new();
        bus.publish(PoolEvent::PoolStatus { workers: Vec::new() });
    }
}
