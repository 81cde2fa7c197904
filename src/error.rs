//! Error types and result handling for schema-producer.
//!
//! This module defines the main error type [`Error`], a convenience
//! [`Result`] alias, and the per-concern error types that callers match on
//! to tell retryable provisioning failures apart from delivery faults and
//! close failures.
//!
//! # Example
//!
//! ```rust
//! use schema_producer::{Error, Result};
//! use schema_producer::error::{ProvisionError, ProvisionFailure};
//!
//! fn open_orders() -> Result<()> {
//!     Err(ProvisionError::new(
//!         "orders",
//!         ProvisionFailure::Rejected("replication factor larger than broker count".to_string()),
//!     )
//!     .into())
//! }
//!
//! match open_orders() {
//!     Ok(()) => println!("Opened"),
//!     Err(Error::Provision(e)) => eprintln!("Topic not provisioned: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::kafka::DeliveryRecord;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error type for schema-producer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Kafka client construction or admin error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The topic descriptor is not acceptable to submit for creation.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// The cluster did not create the topic.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The record did not match the bound schemas. Raised before enqueue.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Outstanding deliveries did not all succeed.
    #[error(transparent)]
    Flush(#[from] FlushError),

    /// Transport resources were not released cleanly.
    #[error(transparent)]
    Close(#[from] CloseError),

    /// Schema registry client could not be built.
    #[error("Schema registry error: {0}")]
    SchemaRegistry(String),

    /// The publish queue is at capacity; the caller should flush and retry.
    #[error("Producer queue is full ({capacity} records)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The producer has already been closed.
    #[error("Producer is closed")]
    Closed,
}

/// Topic creation failure, carrying the topic name and the cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Topic '{topic}' could not be provisioned: {reason}")]
pub struct ProvisionError {
    /// Name of the topic that failed
    pub topic: String,
    /// Why the topic was not created
    pub reason: ProvisionFailure,
}

impl ProvisionError {
    pub fn new(topic: impl Into<String>, reason: ProvisionFailure) -> Self {
        Self {
            topic: topic.into(),
            reason,
        }
    }
}

/// Cause of a [`ProvisionError`]. Stored in the topic registry as the
/// `Failed` state so later callers can see why and retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionFailure {
    /// The cluster refused the topic (not enough brokers, bad partition count, ...).
    #[error("cluster rejected creation: {0}")]
    Rejected(String),

    /// The creation request did not resolve in time.
    #[error("creation did not resolve within {0:?}")]
    Timeout(Duration),

    /// The admin request itself failed before the cluster answered.
    #[error("admin request failed: {0}")]
    Admin(String),

    /// The caller stopped waiting while the creation was in flight.
    #[error("creation was cancelled before it resolved")]
    Cancelled,
}

/// Synchronous publish failure: the key or value does not fit the bound schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// A schema definition could not be parsed.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The value does not resolve against the subject's schema.
    #[error("Schema mismatch for subject '{subject}': {reason}")]
    SchemaMismatch { subject: String, reason: String },

    /// The value resolved but could not be encoded.
    #[error("Encoding failed for subject '{subject}': {reason}")]
    Encode { subject: String, reason: String },

    /// A value was supplied but the binding has no value schema.
    #[error("No value schema bound for topic '{topic}'; records must be key-only")]
    UnexpectedValue { topic: String },
}

/// Per-record transport fault, stored on the [`DeliveryRecord`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The broker or client reported a delivery failure.
    #[error("broker delivery failed: {0}")]
    Broker(String),

    /// The schema id for the record could not be resolved.
    #[error("schema registry lookup failed: {0}")]
    SchemaRegistry(String),

    /// The producer closed before the record was confirmed.
    #[error("record abandoned before delivery was confirmed")]
    Abandoned,
}

/// Result of a flush that did not confirm every record.
#[derive(Error, Debug)]
pub enum FlushError {
    /// The deadline passed with records still in flight.
    #[error("flush timed out after {timeout:?} with {} record(s) pending and {} failed", .pending.len(), .failed.len())]
    Timeout {
        timeout: Duration,
        /// Records still pending when the deadline passed, in publish order
        pending: Vec<Arc<DeliveryRecord>>,
        /// Records that failed since the previous flush
        failed: Vec<Arc<DeliveryRecord>>,
    },

    /// All records resolved but some of them failed.
    #[error("{} record(s) failed delivery", .failed.len())]
    Delivery { failed: Vec<Arc<DeliveryRecord>> },
}

/// Failure to release transport resources. Reported, never escalated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    /// Records were still pending and were abandoned.
    #[error("closed with {abandoned} undelivered record(s)")]
    Incomplete { abandoned: usize },

    /// The transport failed to shut down.
    #[error("transport close failed: {0}")]
    Transport(String),
}

/// A convenient Result type alias for schema-producer operations.
pub type Result<T> = std::result::Result<T, Error>;
