//! Queue Ingress (C7): a Kafka consumer/producer pair that mirrors the
//! synchronous `/run-code` path for callers that prefer a message queue.
//!
//! Grounded on `kafka_consumer.py`'s `KafkaCodeRunner`: connect with
//! retries, consume one topic, decrypt with the chat-side key, run the
//! same static-check + execute pipeline the HTTP path uses, encrypt the
//! result with the runner-side key, and publish it keyed by
//! `request_id`. A decrypt, parse, or encode failure for one message is
//! logged and does not stop the loop; only the initial connect can fail
//! the whole ingress.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crypto::QueueCrypto;
use crate::execution;
use crate::observer::ObservationBus;
use crate::pool::PoolAllocator;
use crate::screener::static_check;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to connect to kafka after {MAX_CONNECT_ATTEMPTS} attempts: {0}")]
    Connect(#[from] rdkafka::error::KafkaError),

    #[error("queue encryption setup failed: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    request_id: Option<String>,
    code: String,
    #[serde(default = "default_user")]
    user_id: String,
    timeout: Option<u64>,
}

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Serialize)]
struct CodeResponse {
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
}

/// Connects producer and consumer with retry-with-backoff, matching the
/// source's five-attempt, five-second-delay connect loop.
pub async fn connect(config: &Config) -> Result<(StreamConsumer, FutureProducer), QueueError> {
    let bootstrap = config
        .kafka_bootstrap_servers
        .clone()
        .unwrap_or_else(|| "kafka:9092".to_string());

    let mut last_err = None;
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match try_connect(&bootstrap, config) {
            Ok(pair) => {
                info!(bootstrap = %bootstrap, "kafka producer and consumer connected");
                return Ok(pair);
            }
            Err(err) => {
                warn!(attempt, max = MAX_CONNECT_ATTEMPTS, error = %err, "kafka connection attempt failed");
                last_err = Some(err);
                if attempt < MAX_CONNECT_ATTEMPTS {
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }

    Err(QueueError::Connect(last_err.expect("at least one attempt recorded")))
}

fn try_connect(bootstrap: &str, config: &Config) -> Result<(StreamConsumer, FutureProducer), rdkafka::error::KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .set("group.id", &config.kafka_consumer_group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .create()?;
    consumer.subscribe(&[&config.kafka_code_request_topic])?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .set("message.max.bytes", "10485760")
        .set("request.timeout.ms", "30000")
        .create()?;

    Ok((consumer, producer))
}

/// Runs the consume loop until `shutdown` is cancelled.
pub async fn run(
    consumer: StreamConsumer,
    producer: FutureProducer,
    crypto: Arc<QueueCrypto>,
    pool: Arc<PoolAllocator>,
    bus: Arc<ObservationBus>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    info!("kafka code runner started");

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("kafka code runner cancelled");
                break;
            }
            message = consumer.recv() => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "kafka consumer error");
                continue;
            }
        };

        let Some(payload) = message.payload() else {
            warn!("received kafka message with no payload");
            continue;
        };
        let payload = payload.to_vec();

        if let Err(err) = handle_message(&payload, &crypto, &pool, &bus, &config, &producer, &config.kafka_code_response_topic).await {
            error!(error = %err, "failed to process kafka request");
        }
    }
}

async fn handle_message(
    payload: &[u8],
    crypto: &QueueCrypto,
    pool: &PoolAllocator,
    bus: &ObservationBus,
    config: &Config,
    producer: &FutureProducer,
    response_topic: &str,
) -> Result<(), QueueError> {
    let token = String::from_utf8_lossy(payload).to_string();
    let decrypted = match crypto.decrypt_request(&token) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to decrypt kafka request");
            return Ok(());
        }
    };

    let request: CodeRequest = match serde_json::from_slice(&decrypted) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "failed to parse decrypted kafka request");
            return Ok(());
        }
    };

    info!(request_id = ?request.request_id, "received code execution request");

    let response = process_request(pool, bus, config, request.code, request.user_id, request.timeout, config.static_check).await;
    let mut response = response;
    response.request_id = request.request_id.clone();

    let encrypted = crypto.encrypt_response(&serde_json::to_vec(&response).unwrap_or_default());

    let mut record = FutureRecord::to(response_topic).payload(encrypted.as_bytes());
    if let Some(request_id) = &request.request_id {
        record = record.key(request_id.as_bytes());
    }

    if let Err((err, _)) = producer.send(record, PRODUCE_TIMEOUT).await {
        error!(error = %err, "failed to send kafka response");
    } else {
        info!(request_id = ?request.request_id, "sent kafka response");
    }

    Ok(())
}

async fn process_request(
    pool: &PoolAllocator,
    bus: &ObservationBus,
    config: &Config,
    code: String,
    user_id: String,
    timeout: Option<u64>,
    static_check_enabled: bool,
) -> CodeResponse {
    if static_check_enabled {
        let violations = static_check(&code);
        if !violations.is_empty() {
            return CodeResponse {
                request_id: None,
                stdout: None,
                stderr: None,
                return_code: None,
                error: Some("forbidden constructs found".to_string()),
                status_code: Some(403),
                details: Some(violations),
            };
        }
    }

    let outcome = execution::execute(pool, bus, config, code, timeout, user_id).await;
    match outcome {
        execution::ExecutionOutcome::Success { stdout, stderr, return_code } => CodeResponse {
            request_id: None,
            stdout: Some(stdout),
            stderr: Some(stderr),
            return_code: Some(return_code),
            error: None,
            status_code: None,
            details: None,
        },
        execution::ExecutionOutcome::Error { error, status_code } => CodeResponse {
            request_id: None,
            stdout: None,
            stderr: None,
            return_code: None,
            error: Some(error),
            status_code: Some(status_code),
            details: None,
        },
    }
}
