//! In-memory stand-ins for the cluster admin interface and the transport.

use crate::error::{CloseError, DeliveryError};
use crate::kafka::admin::{TopicAdmin, TopicCreationError, TopicCreationResults};
use crate::kafka::delivery::DeliveryAck;
use crate::kafka::transport::{Connector, DeliveryFuture, OutboundRecord, Transport};
use crate::kafka::TopicDescriptor;
use crate::Result;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct FakeAdmin {
    calls: AtomicUsize,
    requested: Mutex<Vec<TopicDescriptor>>,
    answer: std::result::Result<(), TopicCreationError>,
    request_error: Option<String>,
    delay: Duration,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            answer: Ok(()),
            request_error: None,
            delay: Duration::ZERO,
        }
    }

    pub fn answering(mut self, answer: std::result::Result<(), TopicCreationError>) -> Self {
        self.answer = answer;
        self
    }

    pub fn failing_request(mut self, reason: &str) -> Self {
        self.request_error = Some(reason.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<TopicDescriptor> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl TopicAdmin for FakeAdmin {
    async fn create_topics(
        &self,
        topics: &[TopicDescriptor],
    ) -> std::result::Result<TopicCreationResults, TopicCreationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().extend_from_slice(topics);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = &self.request_error {
            return Err(TopicCreationError::Request(reason.clone()));
        }
        Ok(topics
            .iter()
            .map(|t| (t.name().to_string(), self.answer.clone()))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub enum TransportMode {
    Ack,
    Fail(String),
    /// Deliveries resolve only on [`FakeTransport::release_all`].
    Hold,
}

pub struct FakeTransport {
    mode: TransportMode,
    sent: Mutex<Vec<OutboundRecord>>,
    held: Mutex<Vec<oneshot::Sender<()>>>,
    next_offset: AtomicI64,
    block_enqueue: bool,
    close_error: Option<String>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            next_offset: AtomicI64::new(0),
            block_enqueue: false,
            close_error: None,
            closed: AtomicBool::new(false),
        }
    }

    /// `enqueue` never returns, as with a transport stuck on back-pressure.
    pub fn blocking_enqueue(mut self) -> Self {
        self.block_enqueue = true;
        self
    }

    pub fn failing_close(mut self, reason: &str) -> Self {
        self.close_error = Some(reason.to_string());
        self
    }

    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().clone()
    }

    pub fn release_all(&self) {
        for release in self.held.lock().drain(..) {
            let _ = release.send(());
        }
    }

    /// Acknowledges the `count` oldest held deliveries.
    pub fn release_oldest(&self, count: usize) {
        let mut held = self.held.lock();
        let count = count.min(held.len());
        for release in held.drain(..count) {
            let _ = release.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn enqueue(
        &self,
        record: OutboundRecord,
    ) -> std::result::Result<DeliveryFuture, DeliveryError> {
        if self.block_enqueue {
            futures::future::pending::<()>().await;
        }
        self.sent.lock().push(record);
        let ack = DeliveryAck {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        };

        Ok(match &self.mode {
            TransportMode::Ack => futures::future::ready(Ok(ack)).boxed(),
            TransportMode::Fail(reason) => {
                futures::future::ready(Err(DeliveryError::Broker(reason.clone()))).boxed()
            }
            TransportMode::Hold => {
                let (release, released) = oneshot::channel();
                self.held.lock().push(release);
                async move {
                    released
                        .await
                        .map(|()| ack)
                        .map_err(|_| DeliveryError::Abandoned)
                }
                .boxed()
            }
        })
    }

    fn close(&self) -> std::result::Result<(), CloseError> {
        self.closed.store(true, Ordering::SeqCst);
        match &self.close_error {
            Some(reason) => Err(CloseError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

pub struct FakeConnector {
    mode: TransportMode,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeConnector {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            transports: Mutex::new(Vec::new()),
        }
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        let transport = Arc::new(FakeTransport::new(self.mode.clone()));
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
