//! Producer lifecycle: open a topic-bound producer, publish, shut down.
//!
//! A [`ProducerFactory`] owns the pieces every producer shares (the topic
//! registry, the provisioner and the transport connector). Each
//! [`ProducerHandle`] it opens owns one [`PublishClient`] with its own
//! transport connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use schema_producer::kafka::{ProducerFactory, SchemaBinding};
//! use schema_producer::Config;
//!
//! # async fn example() -> schema_producer::Result<()> {
//! let config = Config::default();
//! let factory = ProducerFactory::from_config(&config)?;
//!
//! let descriptor = config.descriptor("orders")?;
//! let binding = SchemaBinding::parse(r#""int""#, None)?;
//! let mut producer = factory.open(descriptor, binding).await?;
//!
//! producer.publish_key(&42i32)?;
//!
//! let report = producer.shutdown().await;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, ProducerSettings};
use crate::error::{CloseError, FlushError};
use crate::kafka::admin::KafkaTopicAdmin;
use crate::kafka::delivery::{DeliveryHandle, DeliveryRecord};
use crate::kafka::provisioner::TopicProvisioner;
use crate::kafka::publish_client::{FlushSummary, PublishClient};
use crate::kafka::schema::SchemaBinding;
use crate::kafka::schema_registry::SchemaRegistryClient;
use crate::kafka::topic_registry::TopicRegistry;
use crate::kafka::transport::{Connector, KafkaConnector};
use crate::kafka::TopicDescriptor;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const SCHEMA_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a producer handle.
///
/// `Opening -> Open -> Flushing -> Closed`, or `Opening -> FailedOpen` when
/// the topic could not be provisioned.
///
/// `Opening` and `FailedOpen` only show up in the `state` field of the
/// open path's log events: no handle exists yet while opening, and a failed
/// open returns an error instead of a handle. [`ProducerHandle::state`]
/// reports `Open`, `Flushing` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Opening,
    Open,
    Flushing,
    Closed,
    FailedOpen,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleState::Opening => "opening",
            HandleState::Open => "open",
            HandleState::Flushing => "flushing",
            HandleState::Closed => "closed",
            HandleState::FailedOpen => "failed_open",
        };
        f.write_str(name)
    }
}

/// What shutdown could and could not confirm.
#[derive(Debug)]
pub struct ShutdownReport {
    pub topic: String,
    /// Records acknowledged over the producer's lifetime.
    pub acked: u64,
    /// Every record that failed delivery, including those an earlier flush
    /// already reported.
    pub failed: Vec<Arc<DeliveryRecord>>,
    /// Records still unconfirmed when the flush deadline passed. They are
    /// failed as abandoned when the transport closes.
    pub pending: Vec<Arc<DeliveryRecord>>,
    pub close_error: Option<CloseError>,
    /// The handle had already been shut down; nothing was flushed again.
    pub already_closed: bool,
}

impl ShutdownReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty() && self.close_error.is_none()
    }
}

/// Opens producers that share one topic registry.
pub struct ProducerFactory {
    registry: Arc<TopicRegistry>,
    provisioner: Arc<TopicProvisioner>,
    connector: Arc<dyn Connector>,
    settings: ProducerSettings,
}

impl ProducerFactory {
    pub fn new(
        registry: Arc<TopicRegistry>,
        provisioner: Arc<TopicProvisioner>,
        connector: Arc<dyn Connector>,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            registry,
            provisioner,
            connector,
            settings,
        }
    }

    /// Wires Kafka admin, schema registry and transport from configuration,
    /// with a fresh topic registry.
    pub fn from_config(config: &Config) -> Result<Self> {
        let admin = KafkaTopicAdmin::new(&config.kafka.brokers, config.topics.create_timeout())?;
        let provisioner = TopicProvisioner::new(Arc::new(admin), config.topics.create_timeout());
        let schema_registry = SchemaRegistryClient::new(
            config.kafka.schema_registry_url.clone(),
            SCHEMA_REGISTRY_TIMEOUT,
        )?;
        let connector = KafkaConnector::new(config.kafka.clone(), Arc::new(schema_registry));

        Ok(Self::new(
            Arc::new(TopicRegistry::new()),
            Arc::new(provisioner),
            Arc::new(connector),
            config.producer.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Makes sure the topic exists, then connects a publish client to it.
    ///
    /// Fails with [`Error::Provision`] if the topic could not be created;
    /// no producer is returned for a topic that may not exist.
    #[instrument(skip(self, descriptor, binding), fields(topic = %descriptor.name()))]
    pub async fn open(
        &self,
        descriptor: TopicDescriptor,
        binding: SchemaBinding,
    ) -> Result<ProducerHandle> {
        debug!(state = %HandleState::Opening, "Opening producer");

        let provisioner = &self.provisioner;
        let topic = &descriptor;
        let registration = self
            .registry
            .ensure_registered(descriptor.name(), move || provisioner.create(topic))
            .await;

        match registration {
            Ok(registration) if registration.already_known => {
                debug!("Reusing existing topic");
            }
            Ok(_) => {}
            Err(e) => {
                error!(state = %HandleState::FailedOpen, "Topic provisioning failed: {}", e);
                return Err(Error::Provision(e));
            }
        }

        let transport = match self.connector.connect() {
            Ok(transport) => transport,
            Err(e) => {
                error!(state = %HandleState::FailedOpen, "Transport connection failed: {}", e);
                return Err(e);
            }
        };

        let client = PublishClient::new(
            descriptor.name(),
            binding,
            transport,
            self.settings.queue_capacity,
        );
        debug!(state = %HandleState::Open, "Producer open");

        Ok(ProducerHandle {
            descriptor,
            client,
            state: HandleState::Open,
            flush_timeout: self.settings.flush_timeout(),
        })
    }
}

/// One open producer bound to a topic and a schema pair.
pub struct ProducerHandle {
    descriptor: TopicDescriptor,
    client: PublishClient,
    state: HandleState,
    flush_timeout: Duration,
}

impl ProducerHandle {
    pub fn descriptor(&self) -> &TopicDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn client(&self) -> &PublishClient {
        &self.client
    }

    pub fn set_flush_timeout(&mut self, timeout: Duration) {
        self.flush_timeout = timeout;
    }

    pub fn publish<K, V>(&self, key: &K, value: Option<&V>) -> Result<DeliveryHandle>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        if self.state != HandleState::Open {
            return Err(Error::Closed);
        }
        self.client.publish(key, value)
    }

    pub fn publish_key<K>(&self, key: &K) -> Result<DeliveryHandle>
    where
        K: Serialize + ?Sized,
    {
        self.publish::<K, ()>(key, None)
    }

    /// Flushes without closing.
    pub async fn flush(&self, timeout: Duration) -> std::result::Result<FlushSummary, FlushError> {
        self.client.flush(timeout).await
    }

    /// Flushes with the configured timeout, then closes the transport.
    ///
    /// Always finishes within the flush timeout and never fails: anything
    /// unconfirmed or any close failure is in the report. A second call
    /// returns an `already_closed` report without flushing again.
    #[instrument(skip(self), fields(topic = %self.descriptor.name()))]
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let topic = self.descriptor.name().to_string();
        if self.state == HandleState::Closed {
            debug!("Producer already closed");
            return ShutdownReport {
                topic,
                acked: self.client.acked_total(),
                failed: Vec::new(),
                pending: Vec::new(),
                close_error: None,
                already_closed: true,
            };
        }

        self.transition(HandleState::Flushing);
        let pending = match self.client.flush(self.flush_timeout).await {
            Ok(_) => Vec::new(),
            Err(FlushError::Delivery { failed }) => {
                warn!(failed = failed.len(), "Records failed delivery before shutdown");
                Vec::new()
            }
            Err(FlushError::Timeout {
                pending, failed, ..
            }) => {
                warn!(
                    pending = pending.len(),
                    failed = failed.len(),
                    "Records still unconfirmed at shutdown"
                );
                pending
            }
        };
        // includes failures an earlier flush already reported
        let failed = self.client.failed_records();

        let close_error = match self.client.close() {
            Ok(()) => {
                info!("producer closed");
                None
            }
            Err(e) => {
                warn!("producer close incomplete, {}", e);
                Some(e)
            }
        };
        self.transition(HandleState::Closed);

        ShutdownReport {
            topic,
            acked: self.client.acked_total(),
            failed,
            pending,
            close_error,
            already_closed: false,
        }
    }

    fn transition(&mut self, next: HandleState) {
        debug!(from = %self.state, to = %next, "Producer state change");
        self.state = next;
    }
}
