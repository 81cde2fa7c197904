use crate::error::{ProvisionError, ProvisionFailure};
use crate::kafka::admin::{TopicAdmin, TopicCreationError};
use crate::kafka::TopicDescriptor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Issues topic creation requests and turns the cluster's answer into a
/// typed result. "Already exists" counts as success.
pub struct TopicProvisioner {
    admin: Arc<dyn TopicAdmin>,
    timeout: Duration,
}

impl TopicProvisioner {
    pub fn new(admin: Arc<dyn TopicAdmin>, timeout: Duration) -> Self {
        Self { admin, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, descriptor), fields(topic = %descriptor.name()))]
    pub async fn create(&self, descriptor: &TopicDescriptor) -> Result<(), ProvisionError> {
        let name = descriptor.name();
        info!(
            partitions = descriptor.partitions(),
            replication_factor = descriptor.replication_factor(),
            "Creating topic"
        );

        let request = self.admin.create_topics(std::slice::from_ref(descriptor));
        let mut results = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                error!("{} has not been created, {}", name, e);
                return Err(ProvisionError::new(name, ProvisionFailure::Admin(e.to_string())));
            }
            Err(_) => {
                error!("{} has not been created, no answer within {:?}", name, self.timeout);
                return Err(ProvisionError::new(name, ProvisionFailure::Timeout(self.timeout)));
            }
        };

        match results.remove(name) {
            Some(Ok(())) => {
                info!("{} has been created", name);
                Ok(())
            }
            Some(Err(TopicCreationError::AlreadyExists)) => {
                info!("{} already exists", name);
                Ok(())
            }
            Some(Err(e)) => {
                error!("{} has not been created, {}", name, e);
                Err(ProvisionError::new(name, ProvisionFailure::Rejected(e.to_string())))
            }
            None => {
                error!("{} has not been created, cluster returned no result for it", name);
                Err(ProvisionError::new(
                    name,
                    ProvisionFailure::Admin("no result returned for topic".to_string()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::testing::FakeAdmin;

    fn orders() -> TopicDescriptor {
        TopicDescriptor::new("orders", 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_created_topic_is_success() {
        let admin = Arc::new(FakeAdmin::new());
        let provisioner = TopicProvisioner::new(admin.clone(), Duration::from_secs(1));

        provisioner.create(&orders()).await.unwrap();

        assert_eq!(admin.calls(), 1);
        assert_eq!(admin.requested(), vec![orders()]);
    }

    #[tokio::test]
    async fn test_already_exists_is_success() {
        let admin = Arc::new(FakeAdmin::new().answering(Err(TopicCreationError::AlreadyExists)));
        let provisioner = TopicProvisioner::new(admin, Duration::from_secs(1));

        assert!(provisioner.create(&orders()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_carries_reason() {
        let admin = Arc::new(FakeAdmin::new().answering(Err(TopicCreationError::Rejected(
            "Replication factor: 3 larger than available brokers: 1".to_string(),
        ))));
        let provisioner = TopicProvisioner::new(admin, Duration::from_secs(1));

        let err = provisioner.create(&orders()).await.unwrap_err();
        assert_eq!(err.topic, "orders");
        match err.reason {
            ProvisionFailure::Rejected(reason) => assert!(reason.contains("larger than available")),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_failure_is_admin_error() {
        let admin = Arc::new(FakeAdmin::new().failing_request("broker transport failure"));
        let provisioner = TopicProvisioner::new(admin, Duration::from_secs(1));

        let err = provisioner.create(&orders()).await.unwrap_err();
        assert!(matches!(err.reason, ProvisionFailure::Admin(_)));
    }

    #[tokio::test]
    async fn test_slow_cluster_times_out() {
        let admin = Arc::new(FakeAdmin::new().with_delay(Duration::from_secs(60)));
        let provisioner = TopicProvisioner::new(admin, Duration::from_millis(50));

        let err = provisioner.create(&orders()).await.unwrap_err();
        assert_eq!(
            err.reason,
            ProvisionFailure::Timeout(Duration::from_millis(50))
        );
    }
}
