//! Runtime configuration for the sandbox runner.
//!
//! All settings are read once from the process environment at startup into
//! an immutable [`Config`]. There is no configuration file: every knob here
//! corresponds to one environment variable documented in the deployment
//! README, following the surrounding chat application's own env-var-only
//! configuration style.

use std::time::Duration;

/// Errors produced while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var}: expected a float, got {value:?}")]
    InvalidFloat { var: &'static str, value: String },
}

/// Process-lifetime configuration, loaded once in `main` and shared via
/// `Arc` with both ingress paths.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of pre-spawned sandboxes.
    pub pool_size: usize,
    /// Starting port if sandboxes are ever published on the host. Ignored in
    /// internal-network mode, kept for parity with the source deployment.
    pub pool_base_port: u16,
    /// Sandbox memory cap, Docker syntax (e.g. "128m").
    pub worker_memory_limit: String,
    /// Sandbox CPU share, fraction of a core.
    pub worker_cpu_limit: f64,
    /// Default per-execution deadline in seconds.
    pub default_timeout_secs: u64,
    /// Whether the static screener (C1) runs before every execution.
    pub static_check: bool,
    /// Kafka ingress (C7) is enabled when this is non-empty.
    pub kafka_bootstrap_servers: Option<String>,
    pub kafka_code_request_topic: String,
    pub kafka_code_response_topic: String,
    pub kafka_consumer_group: String,
    /// Encryption key strings, hashed into Fernet keys by `crate::crypto`.
    pub chat_kafka_encryption_key: String,
    pub runner_kafka_encryption_key: String,
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// documented defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            pool_size: env_usize("POOL_SIZE", 5)?,
            pool_base_port: env_u16("POOL_BASE_PORT", 9000)?,
            worker_memory_limit: std::env::var("WORKER_MEMORY_LIMIT")
                .unwrap_or_else(|_| "128m".to_string()),
            worker_cpu_limit: env_f64("WORKER_CPU_LIMIT", 0.25)?,
            default_timeout_secs: env_u64("TIMEOUT", 10)?,
            static_check: env_bool("STATIC_CHECK", false),
            kafka_bootstrap_servers: std::env::var("KAFKA_BOOTSTRAP_SERVERS")
                .ok()
                .filter(|s| !s.is_empty()),
            kafka_code_request_topic: std::env::var("KAFKA_CODE_REQUEST_TOPIC")
                .unwrap_or_else(|_| "code-execution-requests".to_string()),
            kafka_code_response_topic: std::env::var("KAFKA_CODE_RESPONSE_TOPIC")
                .unwrap_or_else(|_| "code-execution-responses".to_string()),
            kafka_consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "runner-consumer-group".to_string()),
            chat_kafka_encryption_key: std::env::var("CHAT_KAFKA_ENCRYPTION_KEY")
                .unwrap_or_else(|_| "chat-kafka-encryption-key-32b!".to_string()),
            runner_kafka_encryption_key: std::env::var("RUNNER_KAFKA_ENCRYPTION_KEY")
                .unwrap_or_else(|_| "runner-kafka-encryption-key-32!".to_string()),
        })
    }

    /// The HTTP-level timeout for one execution round-trip: the sandbox's
    /// own deadline plus transport slack (spec §4.5).
    pub fn http_timeout(&self, deadline_secs: u64) -> Duration {
        Duration::from_secs(deadline_secs + 5)
    }
}

fn env_usize(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

fn env_u16(var: &'static str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

fn env_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

fn env_f64(var: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidFloat { var, value }),
        Err(_) => Ok(default),
    }
}

fn env_bool(var: &'static str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across test threads; serialize.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "POOL_SIZE",
            "POOL_BASE_PORT",
            "WORKER_MEMORY_LIMIT",
            "WORKER_CPU_LIMIT",
            "TIMEOUT",
            "STATIC_CHECK",
            "KAFKA_BOOTSTRAP_SERVERS",
            "KAFKA_CODE_REQUEST_TOPIC",
            "KAFKA_CODE_RESPONSE_TOPIC",
            "KAFKA_CONSUMER_GROUP",
            "CHAT_KAFKA_ENCRYPTION_KEY",
            "RUNNER_KAFKA_ENCRYPTION_KEY",
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = Config::from_env().unwrap();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.pool_base_port, 9000);
        assert_eq!(config.worker_memory_limit, "128m");
        assert_eq!(config.worker_cpu_limit, 0.25);
        assert_eq!(config.default_timeout_secs, 10);
        assert!(!config.static_check);
        assert!(config.kafka_bootstrap_servers.is_none());
    }

    #[test]
    fn empty_kafka_bootstrap_disables_queue() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("KAFKA_BOOTSTRAP_SERVERS", "") };
        let config = Config::from_env().unwrap();
        assert!(config.kafka_bootstrap_servers.is_none());
        unsafe { std::env::remove_var("KAFKA_BOOTSTRAP_SERVERS") };
    }

    #[test]
    fn malformed_numeric_env_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("WORKER_CPU_LIMIT", "abc") };
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidFloat { var: "WORKER_CPU_LIMIT", .. }
        ));
        unsafe { std::env::remove_var("WORKER_CPU_LIMIT") };
    }

    #[test]
    fn http_timeout_adds_five_seconds_of_slack() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = Config::from_env().unwrap();
        assert_eq!(config.http_timeout(10), Duration::from_secs(15));
    }
}
