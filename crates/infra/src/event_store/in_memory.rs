use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use irongate_core::StreamKey;
use irongate_events::{ConstraintKey, SearchQuery, UniqueAction, UniqueConstraint};

use super::r#trait::{stream_expectations, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Clone)]
struct StreamHead {
    sequence: u64,
    owner: String,
}

#[derive(Debug, Default)]
struct Log {
    events: Vec<StoredEvent>,
    heads: HashMap<StreamKey, StreamHead>,
    constraints: HashSet<ConstraintKey>,
}

/// Constraint changes of one push, staged on top of the committed set.
#[derive(Debug, Default)]
struct StagedConstraints {
    added: HashSet<ConstraintKey>,
    removed: HashSet<ConstraintKey>,
    removed_instances: HashSet<String>,
}

impl StagedConstraints {
    fn holds(&self, committed: &HashSet<ConstraintKey>, key: &ConstraintKey) -> bool {
        self.added.contains(key)
            || (committed.contains(key)
                && !self.removed.contains(key)
                && !self.removed_instances.contains(&key.instance_id))
    }

    fn apply(
        &mut self,
        committed: &HashSet<ConstraintKey>,
        instance_id: &str,
        op: &UniqueConstraint,
    ) -> Result<(), EventStoreError> {
        match op.action {
            UniqueAction::Add => {
                let key = op.key(instance_id);
                if self.holds(committed, &key) {
                    return Err(EventStoreError::UniqueConstraint {
                        message: op.error_message.clone(),
                    });
                }
                self.removed.remove(&key);
                self.added.insert(key);
            }
            UniqueAction::Remove => {
                let key = op.key(instance_id);
                self.added.remove(&key);
                self.removed.insert(key);
            }
            UniqueAction::RemoveInstance => {
                self.added.retain(|k| k.instance_id != instance_id);
                self.removed_instances.insert(instance_id.to_string());
            }
        }
        Ok(())
    }

    fn commit(self, committed: &mut HashSet<ConstraintKey>) {
        committed.retain(|k| !self.removed_instances.contains(&k.instance_id));
        for key in &self.removed {
            committed.remove(key);
        }
        committed.extend(self.added);
    }
}

/// In-memory event store.
///
/// Intended for tests/dev. One lock guards the log, stream heads and
/// constraints, so a push is checked and applied in one critical section and
/// never leaves partial state behind.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events, across all instances.
    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn filter(&self, query: &SearchQuery) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::InvalidPush("lock poisoned".to_string()))?;

        let selected = log
            .events
            .iter()
            .filter(|e| query.matches(*e))
            .cloned()
            .collect();
        Ok(query.arrange(selected))
    }

    async fn push(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let expectations = stream_expectations(&events)?;

        let mut log = self
            .log
            .write()
            .map_err(|_| EventStoreError::InvalidPush("lock poisoned".to_string()))?;

        let mut sequences: HashMap<StreamKey, u64> = HashMap::with_capacity(expectations.len());
        for (key, expected) in &expectations {
            let head = log.heads.get(key);
            let current = head.map(|h| h.sequence).unwrap_or(0);
            if let Some(seq) = expected.sequence {
                if seq != current {
                    return Err(EventStoreError::Concurrency(format!(
                        "{}/{}: expected sequence {seq}, found {current}",
                        key.aggregate_type, key.aggregate_id
                    )));
                }
            }
            if let Some(head) = head {
                if head.owner != expected.owner {
                    return Err(EventStoreError::InvalidPush(format!(
                        "{}/{}: owner is '{}', push uses '{}'",
                        key.aggregate_type, key.aggregate_id, head.owner, expected.owner
                    )));
                }
            }
            sequences.insert(key.clone(), current);
        }

        let mut staged = StagedConstraints::default();
        for e in &events {
            for op in &e.unique_constraints {
                staged.apply(&log.constraints, &e.aggregate.instance_id, op)?;
            }
        }

        // Everything is checked; from here on the push cannot fail.
        let created_at = Utc::now();
        let mut position = log.events.len() as u64;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let key = e.aggregate.stream_key();
            let sequence = sequences.entry(key).or_default();
            *sequence += 1;
            position += 1;
            committed.push(StoredEvent {
                aggregate: e.aggregate,
                event_type: e.event_type,
                sequence: *sequence,
                position,
                created_at,
                creator: e.creator,
                payload: e.payload,
            });
        }

        for (key, sequence) in sequences {
            let owner = expectations
                .get(&key)
                .map(|e| e.owner.clone())
                .unwrap_or_default();
            log.heads
                .entry(key)
                .and_modify(|h| h.sequence = sequence)
                .or_insert(StreamHead { sequence, owner });
        }
        staged.commit(&mut log.constraints);
        log.events.extend(committed.iter().cloned());

        debug!(events = committed.len(), position, "push committed");
        Ok(committed)
    }
}
