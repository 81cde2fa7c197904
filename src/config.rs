use crate::kafka::TopicDescriptor;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub topics: TopicDefaults,
    #[serde(default)]
    pub producer: ProducerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_schema_registry_url")]
    pub schema_registry_url: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Defaults applied to topics created on behalf of a producer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicDefaults {
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,
    /// Topic-level configs such as `cleanup.policy` or `retention.ms`.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerSettings {
    #[serde(default = "default_flush_timeout_secs")]
    pub flush_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SCHEMA_PRODUCER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Builds a descriptor for `name` from the configured topic defaults.
    pub fn descriptor(&self, name: &str) -> Result<TopicDescriptor> {
        let descriptor = TopicDescriptor::new(
            name,
            self.topics.partitions,
            self.topics.replication_factor,
        )?;

        Ok(self
            .topics
            .settings
            .iter()
            .fold(descriptor, |d, (key, value)| d.with_setting(key, value)))
    }
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

impl TopicDefaults {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }
}

impl ProducerSettings {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            schema_registry_url: default_schema_registry_url(),
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            client_id: None,
        }
    }
}

impl Default for TopicDefaults {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            create_timeout_secs: default_create_timeout_secs(),
            settings: BTreeMap::new(),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            flush_timeout_secs: default_flush_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec![
        "PLAINTEXT://localhost:9092".to_string(),
        "PLAINTEXT://localhost:9093".to_string(),
        "PLAINTEXT://localhost:9094".to_string(),
    ]
}

fn default_schema_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

fn default_create_timeout_secs() -> u64 {
    30
}

fn default_flush_timeout_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_local_cluster() {
        let config = Config::default();

        assert_eq!(config.kafka.brokers.len(), 3);
        assert_eq!(
            config.kafka.bootstrap_servers(),
            "PLAINTEXT://localhost:9092,PLAINTEXT://localhost:9093,PLAINTEXT://localhost:9094"
        );
        assert_eq!(config.kafka.schema_registry_url, "http://localhost:8081");
        assert_eq!(config.topics.partitions, 1);
        assert_eq!(config.topics.replication_factor, 1);
        assert_eq!(config.producer.flush_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[kafka]
brokers = ["broker-1:9092"]

[topics]
partitions = 3
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.kafka.brokers, vec!["broker-1:9092".to_string()]);
        assert_eq!(config.kafka.acks, "all");
        assert_eq!(config.topics.partitions, 3);
        assert_eq!(config.topics.replication_factor, 1);
        assert_eq!(config.producer.queue_capacity, 10_000);

        let descriptor = config.descriptor("orders").unwrap();
        assert_eq!(descriptor.partitions(), 3);
    }

    #[test]
    fn test_descriptor_carries_topic_settings() {
        let mut config = Config::default();
        config
            .topics
            .settings
            .insert("cleanup.policy".to_string(), "compact".to_string());

        let descriptor = config.descriptor("orders").unwrap();
        assert_eq!(descriptor.name(), "orders");
        assert_eq!(
            descriptor.settings().get("cleanup.policy").map(String::as_str),
            Some("compact")
        );
    }

    #[test]
    fn test_descriptor_rejects_bad_defaults() {
        let mut config = Config::default();
        config.topics.partitions = 0;

        assert!(config.descriptor("orders").is_err());
    }
}
