//! # uploadq
//!
//! Shared work queue for product uploaders.
//!
//! Managers import batches of supplier listing URLs; uploaders lease one URL
//! at a time, finish or release it, and expired leases flow back to the pool.
//! A SKU generator builds structured product codes and logs every code it
//! hands out. Embedded SQLite is the default store; Postgres (sqlx) serves
//! multi-process deployments. OpenTelemetry covers traces, metrics, and logs.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod queue;
pub mod sku;
pub mod storage;
pub mod telemetry;
pub mod urls;
