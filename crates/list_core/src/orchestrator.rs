use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use shared::domain::{EditKey, EntityId};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    events::ListEvent,
    overlay::{FieldUpdate, InvalidEdit},
    resource::{ResourceApi, ResourceError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    DeleteMany(Vec<EntityId>),
    UpdateFields(Vec<FieldUpdate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Delete,
    Update,
}

/// Why a single item of a batch did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable { message: String },
    Timeout,
    NotFound,
    Rejected { status: u16, message: String },
    Transport { message: String },
    Decode { message: String },
    /// The resource named this id among the ones it could not delete.
    Refused,
    /// The resource reported failures only as a count, so this id cannot be
    /// confirmed either way.
    Unconfirmed,
}

impl From<ResourceError> for ErrorKind {
    fn from(value: ResourceError) -> Self {
        match value {
            ResourceError::Unavailable(message) => Self::Unavailable { message },
            ResourceError::Timeout => Self::Timeout,
            ResourceError::NotFound => Self::NotFound,
            ResourceError::Rejected { status, message } => Self::Rejected { status, message },
            ResourceError::Transport(message) => Self::Transport { message },
            ResourceError::Decode(message) => Self::Decode { message },
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "unavailable: {message}"),
            Self::Timeout => write!(f, "timed out"),
            Self::NotFound => write!(f, "not found"),
            Self::Rejected { status, message } => write!(f, "rejected ({status}): {message}"),
            Self::Transport { message } => write!(f, "transport error: {message}"),
            Self::Decode { message } => write!(f, "unreadable response: {message}"),
            Self::Refused => write!(f, "refused by the resource"),
            Self::Unconfirmed => write!(f, "deletion not confirmed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateCounts {
    pub succeeded_count: u64,
    pub failed_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub key: EditKey,
    pub error: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub kind: BatchKind,
    /// Ids every request for which was confirmed.
    pub succeeded_ids: Vec<EntityId>,
    /// First failure per id.
    pub failed: BTreeMap<EntityId, ErrorKind>,
    /// Number of remote operations issued (one per delete id or per update).
    pub total_attempted: usize,
    pub updated_keys: Vec<EditKey>,
    pub failed_keys: Vec<KeyFailure>,
    pub aggregate: Option<AggregateCounts>,
    /// Staged edits held back by validation; filled in by the controller.
    pub invalid: Vec<InvalidEdit>,
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn empty(kind: BatchKind) -> Self {
        Self {
            kind,
            succeeded_ids: Vec::new(),
            failed: BTreeMap::new(),
            total_attempted: 0,
            updated_keys: Vec::new(),
            failed_keys: Vec::new(),
            aggregate: None,
            invalid: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.invalid.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded_ids.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Not a single request reached the resource; nothing changed remotely.
    #[error("batch could not be submitted: {0}")]
    Unavailable(String),
}

/// Turns a [`BatchOperation`] into remote calls and folds the outcomes into
/// a [`BatchResult`]. Per-item failures are data; only a batch that could not
/// be attempted at all is an error.
pub struct BatchMutationOrchestrator {
    api: Arc<dyn ResourceApi>,
    request_timeout: Option<Duration>,
    events: broadcast::Sender<ListEvent>,
}

impl BatchMutationOrchestrator {
    pub fn new(api: Arc<dyn ResourceApi>, events: broadcast::Sender<ListEvent>) -> Self {
        Self {
            api,
            request_timeout: None,
            events,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub async fn submit(&self, op: BatchOperation) -> Result<BatchResult, BatchError> {
        let result = match op {
            BatchOperation::DeleteMany(ids) => self.delete_many(ids).await?,
            BatchOperation::UpdateFields(updates) => self.update_fields(updates).await?,
        };

        if result.total_attempted > 0 {
            let mut touched: BTreeSet<EntityId> = result.succeeded_ids.iter().cloned().collect();
            touched.extend(result.failed.keys().cloned());
            let _ = self.events.send(ListEvent::CacheInvalidated {
                entity_ids: touched.into_iter().collect(),
            });
        }
        Ok(result)
    }

    async fn delete_many(&self, ids: Vec<EntityId>) -> Result<BatchResult, BatchError> {
        let ids = dedup_ids(ids);
        let mut result = BatchResult::empty(BatchKind::Delete);
        if ids.is_empty() {
            return Ok(result);
        }

        let response = match self.bounded(self.api.bulk_delete(&ids)).await {
            Ok(response) => response,
            Err(ResourceError::Unavailable(message)) => {
                return Err(BatchError::Unavailable(message));
            }
            Err(err) => {
                let kind = ErrorKind::from(err);
                result.total_attempted = ids.len();
                result.failed = ids.into_iter().map(|id| (id, kind.clone())).collect();
                result.completed_at = Utc::now();
                return Ok(result);
            }
        };

        result.total_attempted = ids.len();
        result.aggregate = Some(AggregateCounts {
            succeeded_count: response.deleted_count,
            failed_count: response.failed_count,
        });

        match response.failed_ids {
            Some(failed_ids) => {
                let refused: BTreeSet<EntityId> = failed_ids
                    .into_iter()
                    .filter(|id| ids.contains(id))
                    .collect();
                // A breakdown that disagrees with the count confirms nothing
                // beyond the ids it names.
                let consistent = refused.len() as u64 == response.failed_count;
                for id in ids {
                    if refused.contains(&id) {
                        result.failed.insert(id, ErrorKind::Refused);
                    } else if consistent {
                        result.succeeded_ids.push(id);
                    } else {
                        result.failed.insert(id, ErrorKind::Unconfirmed);
                    }
                }
            }
            None if response.failed_count == 0 => result.succeeded_ids = ids,
            None => {
                result.failed = ids
                    .into_iter()
                    .map(|id| (id, ErrorKind::Unconfirmed))
                    .collect();
            }
        }

        result.completed_at = Utc::now();
        Ok(result)
    }

    async fn update_fields(&self, updates: Vec<FieldUpdate>) -> Result<BatchResult, BatchError> {
        let updates = dedup_updates(updates);
        let mut result = BatchResult::empty(BatchKind::Update);
        if updates.is_empty() {
            return Ok(result);
        }

        // All requests are in flight together; every one of them is awaited
        // regardless of how its siblings end.
        let outcomes = join_all(updates.iter().map(|update| {
            self.bounded(self.api.update_field(&update.id, &update.field, &update.value))
        }))
        .await;

        if outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(ResourceError::Unavailable(_))))
        {
            let message = outcomes
                .into_iter()
                .find_map(|outcome| match outcome {
                    Err(ResourceError::Unavailable(message)) => Some(message),
                    _ => None,
                })
                .unwrap_or_default();
            return Err(BatchError::Unavailable(message));
        }

        result.total_attempted = updates.len();
        for (update, outcome) in updates.into_iter().zip(outcomes) {
            let key = update.key();
            match outcome {
                Ok(_) => result.updated_keys.push(key),
                Err(err) => {
                    let kind = ErrorKind::from(err);
                    result
                        .failed
                        .entry(key.entity_id.clone())
                        .or_insert_with(|| kind.clone());
                    result.failed_keys.push(KeyFailure { key, error: kind });
                }
            }
        }

        let mut succeeded: BTreeSet<EntityId> = BTreeSet::new();
        for key in &result.updated_keys {
            if !result.failed.contains_key(&key.entity_id) {
                succeeded.insert(key.entity_id.clone());
            }
        }
        result.succeeded_ids = succeeded.into_iter().collect();
        result.completed_at = Utc::now();
        Ok(result)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ResourceError>>,
    ) -> Result<T, ResourceError> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ResourceError::Timeout)),
            None => call.await,
        }
    }
}

fn dedup_ids(ids: Vec<EntityId>) -> Vec<EntityId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// Last value per key wins; position of the first occurrence is kept.
fn dedup_updates(updates: Vec<FieldUpdate>) -> Vec<FieldUpdate> {
    let mut index: HashMap<EditKey, usize> = HashMap::new();
    let mut deduped: Vec<FieldUpdate> = Vec::with_capacity(updates.len());
    for update in updates {
        match index.get(&update.key()) {
            Some(&slot) => deduped[slot] = update,
            None => {
                index.insert(update.key(), deduped.len());
                deduped.push(update);
            }
        }
    }
    deduped
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
