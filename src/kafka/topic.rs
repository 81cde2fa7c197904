use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_TOPIC_NAME_LEN: usize = 249;

/// Name, partition count, replication factor and topic-level configs for a
/// topic to create. Once handed to a provisioner it is only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    name: String,
    partitions: i32,
    replication_factor: i32,
    #[serde(default)]
    settings: BTreeMap<String, String>,
}

impl TopicDescriptor {
    /// Validates the name and counts locally. Whether the replication factor
    /// fits the cluster's broker count is only known to the cluster.
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Result<Self> {
        let name = name.into();
        validate_topic_name(&name)?;

        if partitions < 1 {
            return Err(Error::InvalidTopic(format!(
                "topic '{}' needs at least one partition, got {}",
                name, partitions
            )));
        }
        if replication_factor < 1 {
            return Err(Error::InvalidTopic(format!(
                "topic '{}' needs a replication factor of at least one, got {}",
                name, replication_factor
            )));
        }

        Ok(Self {
            name,
            partitions,
            replication_factor,
            settings: BTreeMap::new(),
        })
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    pub fn replication_factor(&self) -> i32 {
        self.replication_factor
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }
}

fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidTopic("topic name must not be empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidTopic(format!("'{}' is not a legal topic name", name)));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(Error::InvalidTopic(format!(
            "topic name is {} characters, the limit is {}",
            name.len(),
            MAX_TOPIC_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::InvalidTopic(format!(
            "topic name '{}' contains illegal character '{}'",
            name, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_descriptor() {
        let descriptor = TopicDescriptor::new("orders", 3, 1)
            .unwrap()
            .with_setting("retention.ms", "604800000");

        assert_eq!(descriptor.name(), "orders");
        assert_eq!(descriptor.partitions(), 3);
        assert_eq!(descriptor.replication_factor(), 1);
        assert_eq!(descriptor.settings().len(), 1);
    }

    #[test]
    fn test_rejects_empty_name() {
        assert!(matches!(
            TopicDescriptor::new("", 1, 1),
            Err(Error::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_rejects_illegal_characters() {
        assert!(TopicDescriptor::new("org.chicago.cta/station", 1, 1).is_err());
        assert!(TopicDescriptor::new("..", 1, 1).is_err());
        assert!(TopicDescriptor::new("a".repeat(250), 1, 1).is_err());
        assert!(TopicDescriptor::new("org.chicago.cta.station_arrivals-v1", 1, 1).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_counts() {
        assert!(TopicDescriptor::new("orders", 0, 1).is_err());
        assert!(TopicDescriptor::new("orders", 1, 0).is_err());
        assert!(TopicDescriptor::new("orders", -3, 1).is_err());
    }
}
