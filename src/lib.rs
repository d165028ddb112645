//! # sandbox-runner
//!
//! A sandboxed code execution service: a pool of network-isolated Docker
//! containers that run untrusted Python snippets behind a shared allocator,
//! reachable over both a synchronous HTTP API and an asynchronous,
//! Fernet-encrypted Kafka queue.
//!
//! ## Architecture
//!
//! - [`config`] loads and validates the service's environment-driven
//!   configuration.
//! - [`screener`] statically rejects submissions that import forbidden
//!   modules, call forbidden functions, or touch forbidden attributes,
//!   using a real Python AST parse rather than string matching.
//! - [`image`] builds the sandbox's Docker image from an embedded build
//!   context on startup.
//! - [`sandbox`] provisions the internal worker network and spawns,
//!   health-checks, and tears down the sandbox containers themselves.
//! - [`pool`] is the [`pool::PoolAllocator`]: the single source of truth
//!   for which sandboxes are busy, plus execution statistics and history.
//! - [`execution`] drives one code execution against an acquired sandbox
//!   and classifies the outcome.
//! - [`crypto`] derives Fernet keys for the queue wire format.
//! - [`queue`] is the Kafka-backed ingress, mirroring the HTTP surface for
//!   callers that prefer a message queue.
//! - [`http`] is the axum-based HTTP ingress, dashboard, and websocket
//!   push endpoint.
//! - [`observer`] fans execution and pool-status events out to any number
//!   of subscribers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sandbox_runner::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     println!("pool size: {}", config.pool_size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod execution;
pub mod http;
pub mod image;
pub mod observer;
pub mod pool;
pub mod queue;
pub mod sandbox;
pub mod screener;

pub use config::Config;
pub use execution::ExecutionOutcome;
pub use pool::PoolAllocator;
