pub mod admin;
pub mod delivery;
pub mod producer;
pub mod provisioner;
pub mod publish_client;
pub mod schema;
pub mod schema_registry;
pub mod topic;
pub mod topic_registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::{KafkaTopicAdmin, TopicAdmin, TopicCreationError};
pub use delivery::{DeliveryAck, DeliveryHandle, DeliveryOutcome, DeliveryRecord, Payload};
pub use producer::{HandleState, ProducerFactory, ProducerHandle, ShutdownReport};
pub use provisioner::TopicProvisioner;
pub use publish_client::{FlushSummary, PublishClient};
pub use schema::{AvroSchema, SchemaBinding, SchemaRef};
pub use schema_registry::SchemaRegistryClient;
pub use topic::TopicDescriptor;
pub use topic_registry::{Registration, TopicRegistry, TopicState};
pub use transport::{Connector, DeliveryFuture, KafkaConnector, KafkaTransport, OutboundRecord, Transport};

/// Current time in epoch milliseconds, for use as an event key.
pub fn time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
