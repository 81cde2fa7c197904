#![allow(dead_code)]

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use schema_producer::config::ProducerSettings;
use schema_producer::error::{CloseError, DeliveryError};
use schema_producer::kafka::{
    Connector, DeliveryAck, DeliveryFuture, OutboundRecord, ProducerFactory, TopicAdmin,
    TopicCreationError, TopicDescriptor, TopicProvisioner, TopicRegistry, Transport,
};
use schema_producer::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Admin interface that counts requests per topic and can answer with a
/// scripted per-topic error.
pub struct CountingAdmin {
    calls: Mutex<HashMap<String, usize>>,
    answer: std::result::Result<(), TopicCreationError>,
    delay: Duration,
}

impl CountingAdmin {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            answer: Ok(()),
            delay: Duration::from_millis(25),
        }
    }

    pub fn answering(mut self, answer: std::result::Result<(), TopicCreationError>) -> Self {
        self.answer = answer;
        self
    }

    pub fn calls_for(&self, topic: &str) -> usize {
        self.calls.lock().get(topic).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl TopicAdmin for CountingAdmin {
    async fn create_topics(
        &self,
        topics: &[TopicDescriptor],
    ) -> std::result::Result<HashMap<String, std::result::Result<(), TopicCreationError>>, TopicCreationError>
    {
        {
            let mut calls = self.calls.lock();
            for topic in topics {
                *calls.entry(topic.name().to_string()).or_insert(0) += 1;
            }
        }
        tokio::time::sleep(self.delay).await;
        Ok(topics
            .iter()
            .map(|t| (t.name().to_string(), self.answer.clone()))
            .collect())
    }
}

/// Transport that acknowledges or fails every record and remembers what it sent.
pub struct RecordingTransport {
    fail_with: Option<String>,
    sent: Mutex<Vec<OutboundRecord>>,
    offset: AtomicI64,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn enqueue(
        &self,
        record: OutboundRecord,
    ) -> std::result::Result<DeliveryFuture, DeliveryError> {
        self.sent.lock().push(record);
        let offset = self.offset.fetch_add(1, Ordering::SeqCst);
        let result = match &self.fail_with {
            Some(reason) => Err(DeliveryError::Broker(reason.clone())),
            None => Ok(DeliveryAck {
                partition: 0,
                offset,
            }),
        };
        Ok(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            result
        }
        .boxed())
    }

    fn close(&self) -> std::result::Result<(), CloseError> {
        Ok(())
    }
}

pub struct RecordingConnector {
    fail_with: Option<String>,
    connects: AtomicUsize,
    transports: Mutex<Vec<Arc<RecordingTransport>>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            connects: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::new()
        }
    }

    pub fn transports(&self) -> Vec<Arc<RecordingTransport>> {
        self.transports.lock().clone()
    }
}

impl Connector for RecordingConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(RecordingTransport {
            fail_with: self.fail_with.clone(),
            sent: Mutex::new(Vec::new()),
            offset: AtomicI64::new(0),
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

pub fn test_factory(admin: Arc<CountingAdmin>, connector: Arc<RecordingConnector>) -> ProducerFactory {
    ProducerFactory::new(
        Arc::new(TopicRegistry::new()),
        Arc::new(TopicProvisioner::new(admin, Duration::from_secs(2))),
        connector,
        ProducerSettings {
            flush_timeout_secs: 2,
            queue_capacity: 1024,
        },
    )
}
