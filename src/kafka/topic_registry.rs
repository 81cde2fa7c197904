//! Tracks which topics this process knows to exist.
//!
//! Every topic name gets its own slot with an async gate. A caller holds the
//! gate for the whole check-then-create sequence, so concurrent producers for
//! the same topic issue a single creation request while producers for
//! unrelated topics never wait on each other.

use crate::error::{ProvisionError, ProvisionFailure};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Creation state of a single topic name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TopicState {
    #[default]
    Unknown,
    Creating,
    Created,
    /// The last attempt failed. Callers that waited on it get its error;
    /// the next caller to arrive retries.
    Failed(ProvisionFailure),
}

/// Outcome of [`TopicRegistry::ensure_registered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// `true` when the topic was already `Created` and no request was made.
    pub already_known: bool,
}

#[derive(Debug, Default)]
struct SlotState {
    topic: TopicState,
    /// Creation attempts that ran to an answer. Cancelled attempts do not count.
    finished_attempts: u64,
    last_error: Option<ProvisionError>,
}

#[derive(Debug, Default)]
struct TopicSlot {
    gate: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl TopicSlot {
    fn load(&self) -> TopicState {
        self.state.lock().topic.clone()
    }

    fn finished_attempts(&self) -> u64 {
        self.state.lock().finished_attempts
    }

    fn store(&self, topic: TopicState) {
        self.state.lock().topic = topic;
    }

    fn finish(&self, result: &Result<(), ProvisionError>) {
        let mut state = self.state.lock();
        state.finished_attempts += 1;
        match result {
            Ok(()) => {
                state.topic = TopicState::Created;
                state.last_error = None;
            }
            Err(e) => {
                state.topic = TopicState::Failed(e.reason.clone());
                state.last_error = Some(e.clone());
            }
        }
    }

    /// Error of the attempt that finished last, if it failed.
    fn last_error(&self) -> Option<ProvisionError> {
        self.state.lock().last_error.clone()
    }
}

/// Resets a slot left in `Creating` when the creating future is dropped.
struct CreatingGuard<'a> {
    slot: &'a TopicSlot,
    armed: bool,
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot
                .store(TopicState::Failed(ProvisionFailure::Cancelled));
        }
    }
}

/// Shared, explicitly owned record of topic existence. Hand one instance to
/// every producer in the process through an `Arc`.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    slots: DashMap<String, Arc<TopicSlot>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &str) -> TopicState {
        self.slots
            .get(name)
            .map(|slot| slot.load())
            .unwrap_or_default()
    }

    /// Names of every topic currently in the `Created` state.
    pub fn known_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().load() == TopicState::Created)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Makes sure `name` exists, running `create` at most once across all
    /// concurrent callers.
    ///
    /// Callers that arrive while another caller is creating the topic wait
    /// for that attempt and share its outcome: `already_known: true` if it
    /// succeeded, its error if it failed. Only a caller arriving after a
    /// failure, or after a cancelled attempt, runs its own `create`.
    pub async fn ensure_registered<F, Fut>(
        &self,
        name: &str,
        create: F,
    ) -> Result<Registration, ProvisionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ProvisionError>>,
    {
        let slot = self.slot(name);
        let observed = slot.finished_attempts();
        let _gate = slot.gate.lock().await;

        match slot.load() {
            TopicState::Created => {
                debug!(topic = %name, "Topic already registered");
                return Ok(Registration {
                    already_known: true,
                });
            }
            TopicState::Failed(reason) if slot.finished_attempts() > observed => {
                debug!(topic = %name, %reason, "Attempt made while waiting failed");
                if let Some(e) = slot.last_error() {
                    return Err(e);
                }
            }
            TopicState::Failed(reason) => {
                debug!(topic = %name, %reason, "Retrying topic after failed attempt");
            }
            TopicState::Unknown | TopicState::Creating => {}
        }

        slot.store(TopicState::Creating);
        let mut guard = CreatingGuard {
            slot: &slot,
            armed: true,
        };

        let result = create().await;
        guard.armed = false;
        slot.finish(&result);

        result.map(|()| Registration {
            already_known: false,
        })
    }

    fn slot(&self, name: &str) -> Arc<TopicSlot> {
        // Clone out of the map so the shard lock is released before awaiting.
        if let Some(slot) = self.slots.get(name) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(name.to_string()).or_default().value())
    }
}
