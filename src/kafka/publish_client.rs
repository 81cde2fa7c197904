use crate::error::{CloseError, DeliveryError, FlushError};
use crate::kafka::delivery::{DeliveryAck, DeliveryHandle, DeliveryRecord, DeliveryTracker};
use crate::kafka::schema::{SchemaBinding, SchemaRef};
use crate::kafka::transport::{OutboundRecord, Transport};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Job {
    record: Arc<DeliveryRecord>,
    outbound: OutboundRecord,
}

type Completion = BoxFuture<'static, (Arc<DeliveryRecord>, std::result::Result<DeliveryAck, DeliveryError>)>;

/// Result of a flush in which every record was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    /// Records acknowledged since the previous flush.
    pub acked: u64,
}

/// Publishes schema-checked records to one topic.
///
/// `publish` never waits on the network: it encodes the record, queues it
/// for the I/O worker, and returns a [`DeliveryHandle`]. The worker hands
/// records to the transport in publish order and resolves each record when
/// the broker answers. `flush` waits for every record queued before it.
pub struct PublishClient {
    topic: String,
    binding: SchemaBinding,
    key_schema: SchemaRef,
    value_schema: Option<SchemaRef>,
    queue: Option<mpsc::Sender<Job>>,
    capacity: usize,
    tracker: Arc<DeliveryTracker>,
    transport: Arc<dyn Transport>,
    worker: Option<JoinHandle<()>>,
}

impl PublishClient {
    /// Starts the I/O worker; must be called inside a tokio runtime.
    pub fn new(
        topic: impl Into<String>,
        binding: SchemaBinding,
        transport: Arc<dyn Transport>,
        capacity: usize,
    ) -> Self {
        let topic = topic.into();
        let capacity = capacity.max(1);
        let (key_schema, value_schema) = binding.subjects(&topic);
        let (queue, jobs) = mpsc::channel(capacity);
        let tracker = Arc::new(DeliveryTracker::new());

        let worker = tokio::spawn(run_worker(
            jobs,
            Arc::clone(&transport),
            Arc::clone(&tracker),
        ));

        Self {
            topic,
            binding,
            key_schema,
            value_schema,
            queue: Some(queue),
            capacity,
            tracker,
            transport,
            worker: Some(worker),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn binding(&self) -> &SchemaBinding {
        &self.binding
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_none()
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Records acknowledged over the client's lifetime.
    pub fn acked_total(&self) -> u64 {
        self.tracker.acked_total()
    }

    /// Records that failed delivery over the client's lifetime, including
    /// those already reported by a flush.
    pub fn failed_records(&self) -> Vec<Arc<DeliveryRecord>> {
        self.tracker.failed_records()
    }

    /// Queues one record. Schema mismatches fail here, before anything is
    /// queued; transport faults show up later on the returned handle and in
    /// the next flush.
    pub fn publish<K, V>(&self, key: &K, value: Option<&V>) -> Result<DeliveryHandle>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let queue = self.queue.as_ref().ok_or(Error::Closed)?;
        let encoded = self.binding.encode(&self.topic, key, value)?;

        let permit = queue.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => Error::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(()) => Error::Closed,
        })?;

        let record = self
            .tracker
            .track(&self.topic, encoded.key.clone(), encoded.value.clone());
        permit.send(Job {
            record: Arc::clone(&record),
            outbound: OutboundRecord {
                topic: self.topic.clone(),
                key: encoded.key,
                value: encoded.value,
                key_schema: self.key_schema.clone(),
                value_schema: self.value_schema.clone(),
            },
        });

        Ok(DeliveryHandle::new(record))
    }

    /// Publishes a record that has no value.
    pub fn publish_key<K>(&self, key: &K) -> Result<DeliveryHandle>
    where
        K: Serialize + ?Sized,
    {
        self.publish::<K, ()>(key, None)
    }

    /// Waits until every record published before the call is acknowledged
    /// or failed. Records published while the flush waits are left for the
    /// next one.
    ///
    /// With nothing pending this returns at once. Failed records are
    /// reported by exactly one flush; [`PublishClient::failed_records`]
    /// keeps all of them.
    pub async fn flush(&self, timeout: Duration) -> std::result::Result<FlushSummary, FlushError> {
        let watermark = self.tracker.watermark();
        let drained = tokio::time::timeout(timeout, self.tracker.wait_drained(watermark)).await;
        let (acked, failed) = self.tracker.take_resolved();

        if drained.is_err() {
            let pending = self.tracker.pending_before(watermark);
            warn!(
                topic = %self.topic,
                pending = pending.len(),
                failed = failed.len(),
                "Flush timed out"
            );
            return Err(FlushError::Timeout {
                timeout,
                pending,
                failed,
            });
        }

        if !failed.is_empty() {
            warn!(topic = %self.topic, failed = failed.len(), "Deliveries failed");
            return Err(FlushError::Delivery { failed });
        }

        debug!(topic = %self.topic, acked, "Flush complete");
        Ok(FlushSummary { acked })
    }

    /// Stops accepting records and releases the transport.
    ///
    /// Records still pending are failed as abandoned and reported through
    /// [`CloseError::Incomplete`]. Calling close again is a no-op.
    pub fn close(&mut self) -> std::result::Result<(), CloseError> {
        if self.queue.take().is_none() {
            return Ok(());
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }

        let abandoned = self.tracker.abandon_pending();
        let transport_result = self.transport.close();

        if abandoned > 0 {
            if let Err(e) = &transport_result {
                warn!(topic = %self.topic, error = %e, "Transport close failed");
            }
            return Err(CloseError::Incomplete { abandoned });
        }
        transport_result?;

        info!(topic = %self.topic, "Publish client closed");
        Ok(())
    }
}

impl Drop for PublishClient {
    fn drop(&mut self) {
        if self.queue.is_some() {
            let abandoned = self.tracker.pending_count();
            if abandoned > 0 {
                warn!(topic = %self.topic, abandoned, "Publish client dropped without close");
            }
            if let Err(e) = self.close() {
                warn!(topic = %self.topic, error = %e, "Close on drop incomplete");
            }
        }
    }
}

async fn run_worker(
    mut jobs: mpsc::Receiver<Job>,
    transport: Arc<dyn Transport>,
    tracker: Arc<DeliveryTracker>,
) {
    let mut in_flight: FuturesUnordered<Completion> = FuturesUnordered::new();

    loop {
        tokio::select! {
            job = jobs.recv() => {
                let Some(Job { record, outbound }) = job else {
                    break;
                };
                match transport.enqueue(outbound).await {
                    Ok(delivery) => {
                        in_flight.push(async move { (record, delivery.await) }.boxed());
                    }
                    Err(e) => {
                        debug!(record = record.id(), error = %e, "Transport refused record");
                        tracker.complete(&record, Err(e));
                    }
                }
            }
            Some((record, result)) = in_flight.next(), if !in_flight.is_empty() => {
                tracker.complete(&record, result);
            }
        }
    }

    while let Some((record, result)) = in_flight.next().await {
        tracker.complete(&record, result);
    }
}
