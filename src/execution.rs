//! Execution Driver (C5): drives one code execution against an acquired
//! sandbox and classifies the outcome.
//!
//! Grounded on `ContainerPool.execute_code`: acquire, emit start + pool
//! status, POST to the sandbox with `timeout + 5` seconds of HTTP slack,
//! classify the response, record history and statistics, emit end + pool
//! status, release. The acquire/release bracket is the only part owned by
//! [`crate::pool::PoolAllocator`]; everything about the round-trip itself
//! lives here.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::observer::{ObservationBus, PoolEvent};
use crate::pool::{ExecutionRecord, PoolAllocator, now_secs};

/// Outcome of one execution, returned to the HTTP or queue ingress layer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Success { stdout: String, stderr: String, return_code: i32 },
    Error { error: String, status_code: u16 },
}

impl ExecutionOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionOutcome::Success { .. } => 200,
            ExecutionOutcome::Error { status_code, .. } => *status_code,
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn no_available_workers() -> Self {
        ExecutionOutcome::Error { error: "no available workers".to_string(), status_code: 503 }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponseBody {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    return_code: i32,
    #[serde(default)]
    error: Option<String>,
}

/// Runs `code` on the next available sandbox. Returns
/// [`ExecutionOutcome::no_available_workers`] immediately if the pool is
/// saturated -- no waiting, matching the source's `acquire` contract.
pub async fn execute(
    pool: &PoolAllocator,
    bus: &ObservationBus,
    config: &Config,
    code: String,
    timeout_secs: Option<u64>,
    user_id: String,
) -> ExecutionOutcome {
    let Some(slot) = pool.acquire().await else {
        return ExecutionOutcome::no_available_workers();
    };

    let timeout_secs = timeout_secs.unwrap_or(config.default_timeout_secs);
    let execution_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let start_time = now_secs();

    let Some(handle) = pool.handle_for(slot).await else {
        pool.release(slot).await;
        return ExecutionOutcome::Error { error: "sandbox vanished".to_string(), status_code: 500 };
    };

    bus.publish(PoolEvent::ExecutionStart {
        execution_id: execution_id.clone(),
        user_id: user_id.clone(),
        code: code.clone(),
        worker: handle.name.clone(),
    });
    bus.publish(PoolEvent::PoolStatus { workers: pool.statuses().await });

    let outcome = run_in_sandbox(pool, &handle.execute_url(), &code, timeout_secs).await;

    let end_time = now_secs();
    let duration_ms = ((end_time - start_time) * 1000.0) as i64;

    let record = ExecutionRecord {
        execution_id: execution_id.clone(),
        user_id,
        code,
        worker_name: handle.name.clone(),
        start_time,
        end_time: Some(end_time),
        duration_ms: Some(duration_ms),
        success: outcome.is_success(),
    };
    pool.record_execution(record).await;

    bus.publish(PoolEvent::ExecutionEnd {
        execution_id,
        duration: duration_ms,
        success: outcome.is_success(),
    });

    pool.release(slot).await;
    bus.publish(PoolEvent::PoolStatus { workers: pool.statuses().await });

    outcome
}

async fn run_in_sandbox(pool: &PoolAllocator, url: &str, code: &str, timeout_secs: u64) -> ExecutionOutcome {
    let request_timeout = Duration::from_secs(timeout_secs + 5);

    let response = pool
        .http_client()
        .post(url)
        .json(&json!({ "code": code, "timeout": timeout_secs }))
        .timeout(request_timeout)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            return ExecutionOutcome::Error { error: "execution timed out".to_string(), status_code: 408 };
        }
        Err(err) => {
            return ExecutionOutcome::Error { error: err.to_string(), status_code: 500 };
        }
    };

    let status = response.status();
    let body: ExecuteResponseBody = match response.json().await {
        Ok(body) => body,
        Err(err) => return ExecutionOutcome::Error { error: err.to_string(), status_code: 500 },
    };

    match status {
        StatusCode::OK => ExecutionOutcome::Success {
            stdout: body.stdout,
            stderr: body.stderr,
            return_code: body.return_code,
        },
        StatusCode::REQUEST_TIMEOUT => {
            ExecutionOutcome::Error { error: "execution timed out".to_string(), status_code: 408 }
        }
        other => ExecutionOutcome::Error {
            error: body.error.unwrap_or_else(|| "unknown error".to_string()),
            status_code: other.as_u16(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcome_reports_status_200() {
        let outcome = ExecutionOutcome::Success { stdout: "hi".into(), stderr: String::new(), return_code: 0 };
        assert_eq!(outcome.status_code(), 200);
        assert!(outcome.is_success());
    }

    #[test]
    fn no_available_workers_reports_status_503() {
        let outcome = ExecutionOutcome::no_available_workers();
        assert_eq!(outcome.status_code(), 503);
        assert!(!outcome.is_success());
    }
}
