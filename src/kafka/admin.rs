use crate::kafka::TopicDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Per-topic answer from the cluster's control plane.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicCreationError {
    #[error("topic already exists")]
    AlreadyExists,

    #[error("{0}")]
    Rejected(String),

    /// The request never reached a per-topic answer.
    #[error("request failed: {0}")]
    Request(String),
}

pub type TopicCreationResults = HashMap<String, std::result::Result<(), TopicCreationError>>;

/// Administrative interface of the cluster.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Submits every descriptor in one request and returns one result per
    /// topic name. An `Err` means the request as a whole failed.
    async fn create_topics(
        &self,
        topics: &[TopicDescriptor],
    ) -> std::result::Result<TopicCreationResults, TopicCreationError>;
}

/// [`TopicAdmin`] backed by an rdkafka `AdminClient`.
pub struct KafkaTopicAdmin {
    admin_client: AdminClient<DefaultClientContext>,
    operation_timeout: Duration,
}

impl KafkaTopicAdmin {
    pub fn new(brokers: &[String], operation_timeout: Duration) -> Result<Self> {
        let admin_client: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            admin_client,
            operation_timeout,
        })
    }

    /// Blocking metadata lookup; call from a blocking context.
    pub fn topic_exists(&self, topic_name: &str, timeout: Duration) -> Result<bool> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic_name), timeout)
            .map_err(Error::Kafka)?;

        // Auto-created metadata entries for unknown topics carry an error code.
        Ok(metadata
            .topics()
            .iter()
            .any(|topic| topic.name() == topic_name && topic.error().is_none()))
    }

    pub async fn delete_topic(&self, topic_name: &str) -> Result<()> {
        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self
            .admin_client
            .delete_topics(&[topic_name], &opts)
            .await
            .map_err(Error::Kafka)?;

        for result in results {
            match result {
                Ok(topic) => {
                    info!("Successfully deleted topic: {}", topic);
                }
                Err((_topic, error)) => {
                    return Err(Error::Kafka(rdkafka::error::KafkaError::AdminOp(error)));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn create_topics(
        &self,
        topics: &[TopicDescriptor],
    ) -> std::result::Result<TopicCreationResults, TopicCreationError> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|descriptor| {
                descriptor.settings().iter().fold(
                    NewTopic::new(
                        descriptor.name(),
                        descriptor.partitions(),
                        TopicReplication::Fixed(descriptor.replication_factor()),
                    ),
                    |topic, (key, value)| topic.set(key, value),
                )
            })
            .collect();

        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self
            .admin_client
            .create_topics(new_topics.iter(), &opts)
            .await
            .map_err(|e| TopicCreationError::Request(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, Ok(())),
                Err((name, code)) => {
                    debug!(topic = %name, ?code, "Topic creation answered with error code");
                    (name, Err(creation_error(code)))
                }
            })
            .collect())
    }
}

fn creation_error(code: RDKafkaErrorCode) -> TopicCreationError {
    match code {
        RDKafkaErrorCode::TopicAlreadyExists => TopicCreationError::AlreadyExists,
        other => TopicCreationError::Rejected(other.to_string()),
    }
}
