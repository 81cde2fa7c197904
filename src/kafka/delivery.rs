//! Delivery tracking for published records.
//!
//! Each publish creates one [`DeliveryRecord`] that starts out pending and is
//! resolved exactly once by the I/O worker. The [`DeliveryTracker`] keeps the
//! pending set for a client so flush can wait on it and report what is left.

use crate::error::DeliveryError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Encoded record value. `Absent` (a null Kafka value) and an encoded empty
/// value are different records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Absent,
    Present(Bytes),
}

impl Payload {
    pub fn is_absent(&self) -> bool {
        matches!(self, Payload::Absent)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Absent => None,
            Payload::Present(bytes) => Some(bytes.as_ref()),
        }
    }
}

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryAck {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Pending,
    Acked(DeliveryAck),
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryOutcome::Pending)
    }
}

/// One published record and its delivery outcome.
#[derive(Debug)]
pub struct DeliveryRecord {
    id: u64,
    topic: String,
    key: Bytes,
    value: Payload,
    submitted_at: DateTime<Utc>,
    outcome: OnceLock<Result<DeliveryAck, DeliveryError>>,
    resolved: Notify,
}

impl DeliveryRecord {
    fn new(id: u64, topic: &str, key: Bytes, value: Payload) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            key,
            value,
            submitted_at: Utc::now(),
            outcome: OnceLock::new(),
            resolved: Notify::new(),
        }
    }

    /// Sequence number within the owning client, in publish order.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encoded key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Payload {
        &self.value
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn outcome(&self) -> DeliveryOutcome {
        match self.outcome.get() {
            None => DeliveryOutcome::Pending,
            Some(Ok(ack)) => DeliveryOutcome::Acked(*ack),
            Some(Err(e)) => DeliveryOutcome::Failed(e.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.get().is_none()
    }

    /// Sets the outcome. Returns `false` if it was already set.
    fn resolve(&self, result: Result<DeliveryAck, DeliveryError>) -> bool {
        if self.outcome.set(result).is_err() {
            return false;
        }
        self.resolved.notify_waiters();
        true
    }

    async fn wait(&self) -> Result<DeliveryAck, DeliveryError> {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.outcome.get() {
                return result.clone();
            }
            notified.await;
        }
    }
}

/// Caller-side view of one published record.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    record: Arc<DeliveryRecord>,
}

impl DeliveryHandle {
    pub(crate) fn new(record: Arc<DeliveryRecord>) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &Arc<DeliveryRecord> {
        &self.record
    }

    pub fn outcome(&self) -> DeliveryOutcome {
        self.record.outcome()
    }

    /// Waits until the record is acknowledged or fails.
    pub async fn wait(&self) -> Result<DeliveryAck, DeliveryError> {
        self.record.wait().await
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    next_id: u64,
    pending: BTreeMap<u64, Arc<DeliveryRecord>>,
    /// Failures not yet reported by a flush.
    failed: Vec<Arc<DeliveryRecord>>,
    /// Every failure over the tracker's lifetime.
    failed_total: Vec<Arc<DeliveryRecord>>,
    acked_since_flush: u64,
    acked_total: u64,
}

/// Pending and failed records of one publish client.
#[derive(Debug, Default)]
pub(crate) struct DeliveryTracker {
    state: Mutex<TrackerState>,
    resolved: Notify,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, topic: &str, key: Bytes, value: Payload) -> Arc<DeliveryRecord> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let record = Arc::new(DeliveryRecord::new(id, topic, key, value));
        state.pending.insert(id, Arc::clone(&record));
        record
    }

    /// Resolves a record and moves it out of the pending set. A second
    /// completion of the same record is ignored.
    pub fn complete(&self, record: &Arc<DeliveryRecord>, result: Result<DeliveryAck, DeliveryError>) {
        let failed = result.is_err();
        if !record.resolve(result) {
            return;
        }

        let mut state = self.state.lock();
        state.pending.remove(&record.id());
        if failed {
            state.failed.push(Arc::clone(record));
            state.failed_total.push(Arc::clone(record));
        } else {
            state.acked_since_flush += 1;
            state.acked_total += 1;
        }
        drop(state);
        self.resolved.notify_waiters();
    }

    /// Id the next tracked record will get. Every record tracked so far has
    /// a smaller id.
    pub fn watermark(&self) -> u64 {
        self.state.lock().next_id
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Pending records in publish order.
    pub fn pending_records(&self) -> Vec<Arc<DeliveryRecord>> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Pending records tracked before `watermark`, in publish order.
    pub fn pending_before(&self, watermark: u64) -> Vec<Arc<DeliveryRecord>> {
        self.state
            .lock()
            .pending
            .range(..watermark)
            .map(|(_, record)| Arc::clone(record))
            .collect()
    }

    /// Every record that failed delivery, whether or not a flush reported it.
    pub fn failed_records(&self) -> Vec<Arc<DeliveryRecord>> {
        self.state.lock().failed_total.clone()
    }

    pub fn acked_total(&self) -> u64 {
        self.state.lock().acked_total
    }

    /// Failures and ack count accumulated since the previous call.
    pub fn take_resolved(&self) -> (u64, Vec<Arc<DeliveryRecord>>) {
        let mut state = self.state.lock();
        let acked = std::mem::take(&mut state.acked_since_flush);
        let failed = std::mem::take(&mut state.failed);
        (acked, failed)
    }

    /// Waits until every record tracked before `watermark` is resolved.
    /// Records tracked later do not hold it up.
    pub async fn wait_drained(&self, watermark: u64) {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().pending.range(..watermark).next().is_none() {
                return;
            }
            notified.await;
        }
    }

    /// Fails every pending record with [`DeliveryError::Abandoned`].
    pub fn abandon_pending(&self) -> usize {
        let pending = self.pending_records();
        let count = pending.len();
        for record in &pending {
            self.complete(record, Err(DeliveryError::Abandoned));
        }
        count
    }
}
