//! Pool Allocator (C4): tracks which sandboxes are busy, hands them out to
//! the execution driver, and keeps the statistics and history the
//! dashboard reads.
//!
//! Grounded on `ContainerPool`'s `acquire`/`release`/`health_check`/
//! `get_stats`/`get_execution_history`, with the slot vector guarded by a
//! single `tokio::sync::Mutex` exactly as the source guards `self.workers`
//! with `self._lock`. No LRU, no waiting: `acquire` is a single forward
//! scan that returns immediately, busy or not.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::sandbox::SandboxHandle;

const MAX_HISTORY: usize = 100;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A record of one in-flight or completed execution, mirroring `ExecutionInfo`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub user_id: String,
    pub code: String,
    pub worker_name: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration_ms: Option<i64>,
    pub success: bool,
}

/// One slot in the pool: a sandbox plus its current busy/usage state.
pub struct Slot {
    pub handle: SandboxHandle,
    pub busy: bool,
    pub last_used: f64,
    pub current_execution: Option<ExecutionRecord>,
}

impl Slot {
    fn new(handle: SandboxHandle) -> Self {
        Self { handle, busy: false, last_used: 0.0, current_execution: None }
    }
}

/// A snapshot of one slot's state, for status events and health reports.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub name: String,
    pub busy: bool,
    pub healthy: bool,
    pub current_user: Option<String>,
}

/// Aggregate execution statistics, matching `get_stats`'s derived fields.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PoolStatistics {
    pub total_executions: u64,
    pub total_exec_time_ms: i64,
    pub total_lines: u64,
    pub success_count: u64,
}

impl PoolStatistics {
    pub fn avg_exec_time_ms(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_exec_time_ms as f64 / self.total_executions as f64
        }
    }

    pub fn avg_lines(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_lines as f64 / self.total_executions as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_executions as f64 * 100.0
        }
    }
}

/// Health summary across the whole pool, matching `health_check`'s shape.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub unhealthy: usize,
    pub workers: Vec<SlotStatus>,
}

struct Inner {
    slots: Vec<Slot>,
    stats: PoolStatistics,
    history: VecDeque<ExecutionRecord>,
}

/// The shared pool of sandboxes. Cheap to clone; internal state lives
/// behind a mutex and an `Arc`.
pub struct PoolAllocator {
    inner: Mutex<Inner>,
    http_client: Client,
}

impl PoolAllocator {
    pub fn new(handles: Vec<SandboxHandle>, http_client: Client) -> Arc<Self> {
        let slots = handles.into_iter().map(Slot::new).collect();
        Arc::new(Self {
            inner: Mutex::new(Inner { slots, stats: PoolStatistics::default(), history: VecDeque::new() }),
            http_client,
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn len(&self) -> usize {
        // Slot count never changes after startup; safe to read without the lock
        // via try_lock, falling back to 0 only if contended at the exact instant.
        self.inner.try_lock().map(|g| g.slots.len()).unwrap_or(0)
    }

    /// Scans the slot vector once and claims the first free one. Returns
    /// `None` immediately if every slot is busy -- no waiting.
    pub async fn acquire(&self) -> Option<usize> {
        let mut inner = self.inner.lock().await;
        let now = now_secs();
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if !slot.busy {
                slot.busy = true;
                slot.last_used = now;
                debug!(sandbox = %slot.handle.name, "acquired sandbox");
                return Some(index);
            }
        }
        None
    }

    pub async fn release(&self, index: usize) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(index) {
            slot.busy = false;
            slot.current_execution = None;
            debug!(sandbox = %slot.handle.name, "released sandbox");
        }
    }

    pub async fn set_current_execution(&self, index: usize, execution: ExecutionRecord) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(index) {
            slot.current_execution = Some(execution);
        }
    }

    pub async fn handle_for(&self, index: usize) -> Option<SandboxHandle> {
        let inner = self.inner.lock().await;
        inner.slots.get(index).map(|slot| slot.handle.clone())
    }

    pub async fn record_execution(&self, record: ExecutionRecord) {
        let mut inner = self.inner.lock().await;
        inner.stats.total_executions += 1;
        inner.stats.total_exec_time_ms += record.duration_ms.unwrap_or(0);
        inner.stats.total_lines += record.code.lines().count() as u64;
        if record.success {
            inner.stats.success_count += 1;
        }
        inner.history.push_back(record);
        if inner.history.len() > MAX_HISTORY {
            inner.history.pop_front();
        }
    }

    pub async fn statuses(&self) -> Vec<SlotStatus> {
        let inner = self.inner.lock().await;
        inner
            .slots
            .iter()
            .map(|slot| SlotStatus {
                name: slot.handle.name.clone(),
                busy: slot.busy,
                healthy: true,
                current_user: slot.current_execution.as_ref().map(|e| e.user_id.clone()),
            })
            .collect()
    }

    pub async fn stats(&self) -> PoolStatistics {
        self.inner.lock().await.stats.clone()
    }

    pub async fn history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock().await;
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    /// Probes every sandbox's `/health` endpoint concurrently and reports
    /// the aggregate counts.
    pub async fn health(&self) -> PoolHealth {
        let (handles, busy_flags): (Vec<SandboxHandle>, Vec<bool>) = {
            let inner = self.inner.lock().await;
            inner.slots.iter().map(|s| (s.handle.clone(), s.busy)).unzip()
        };

        let client = self.http_client.clone();
        let probes = handles.iter().map(|handle| {
            let client = client.clone();
            let url = handle.health_url();
            async move {
                client
                    .get(&url)
                    .timeout(HEALTH_CHECK_TIMEOUT)
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false)
            }
        });
        let healthy_flags = futures::future::join_all(probes).await;

        let mut health = PoolHealth { total: handles.len(), available: 0, busy: 0, unhealthy: 0, workers: Vec::new() };

        for ((handle, busy), healthy) in handles.iter().zip(busy_flags).zip(healthy_flags) {
            if healthy {
                if busy {
                    health.busy += 1;
                } else {
                    health.available += 1;
                }
            } else {
                health.unhealthy += 1;
            }
            health.workers.push(SlotStatus {
                name: handle.name.clone(),
                busy,
                healthy,
                current_user: None,
            });
        }

        health
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> SandboxHandle {
        SandboxHandle { name: name.to_string(), container_id: name.to_string(), ip: "127.0.0.1".to_string() }
    }

    #[tokio::test]
    async fn acquire_returns_distinct_slots_until_exhausted() {
        let pool = PoolAllocator::new(vec![handle("a"), handle("b")], Client::new());
        let first = pool.acquire().await;
        let second = pool.acquire().await;
        let third = pool.acquire().await;

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
        assert_eq!(third, None);
    }

    #[tokio::test]
    async fn release_makes_a_slot_available_again() {
        let pool = PoolAllocator::new(vec![handle("a")], Client::new());
        let slot = pool.acquire().await.unwrap();
        assert_eq!(pool.acquire().await, None);

        pool.release(slot).await;
        assert_eq!(pool.acquire().await, Some(slot));
    }

    #[tokio::test]
    async fn stats_accumulate_across_executions() {
        let pool = PoolAllocator::new(vec![handle("a")], Client::new());
        pool.record_execution(ExecutionRecord {
            execution_id: "1".into(),
            user_id: "anonymous".into(),
            code: "print(1)\nprint(2)".into(),
            worker_name: "a".into(),
            start_time: 0.0,
            end_time: Some(0.1),
            duration_ms: Some(100),
            success: true,
        })
        .await;
        pool.record_execution(ExecutionRecord {
            execution_id: "2".into(),
            user_id: "anonymous".into(),
            code: "bad".into(),
            worker_name: "a".into(),
            start_time: 0.0,
            end_time: Some(0.2),
            duration_ms: Some(200),
            success: false,
        })
        .await;

        let stats = pool.stats().await;
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.success_rate(), 50.0);
        assert_eq!(stats.avg_exec_time_ms(), 150.0);
    }

    #[tokio::test]
    async fn history_caps_at_max_and_returns_most_recent_first() {
        let pool = PoolAllocator::new(vec![handle("a")], Client::new());
        for i in 0..(MAX_HISTORY + 10) {
            pool.record_execution(ExecutionRecord {
                execution_id: i.to_string(),
                user_id: "anonymous".into(),
                code: String::new(),
                worker_name: "a".into(),
                start_time: 0.0,
                end_time: None,
                duration_ms: Some(0),
                success: true,
            })
            .await;
        }

        let history = pool.history(5).await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].execution_id, (MAX_HISTORY + 9).to_string());
    }
}
