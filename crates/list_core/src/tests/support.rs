use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{Entity, EntityId, FieldName, ParsedValue},
    protocol::{BulkDeleteResponse, PageQuery, PageResponse},
};
use tokio::sync::{Mutex, Semaphore};

use crate::resource::{ResourceApi, ResourceError};

/// In-memory resource with knobs for failure injection.
pub(crate) struct FakeResourceApi {
    pub entities: Mutex<Vec<Entity>>,
    pub update_calls: Mutex<Vec<(EntityId, FieldName, ParsedValue)>>,
    pub delete_calls: Mutex<Vec<Vec<EntityId>>>,
    pub fetch_calls: Mutex<Vec<PageQuery>>,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    failing_updates: HashSet<EntityId>,
    slow_updates: HashSet<EntityId>,
    slow_delay: Duration,
    unavailable: bool,
    delete_response: Option<BulkDeleteResponse>,
    delete_error: Option<ResourceError>,
    gate: Option<Arc<Semaphore>>,
    delete_gate: Option<Arc<Semaphore>>,
    fetch_gate: Option<Arc<Semaphore>>,
}

pub(crate) fn entity(id: impl Into<EntityId>, cost_price: f64) -> Entity {
    let mut fields = serde_json::Map::new();
    fields.insert("cost_price".to_string(), json!(cost_price));
    fields.insert("name".to_string(), json!("item"));
    Entity {
        id: id.into(),
        fields,
    }
}

impl FakeResourceApi {
    pub fn with_entities(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            entities: Mutex::new(ids.into_iter().map(|id| entity(id, 1.0)).collect()),
            update_calls: Mutex::new(Vec::new()),
            delete_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
            max_in_flight: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            failing_updates: HashSet::new(),
            slow_updates: HashSet::new(),
            slow_delay: Duration::from_millis(0),
            unavailable: false,
            delete_response: None,
            delete_error: None,
            gate: None,
            delete_gate: None,
            fetch_gate: None,
        }
    }

    pub fn failing_update_for(mut self, id: impl Into<EntityId>) -> Self {
        self.failing_updates.insert(id.into());
        self
    }

    pub fn slow_update_for(mut self, id: impl Into<EntityId>, delay: Duration) -> Self {
        self.slow_updates.insert(id.into());
        self.slow_delay = delay;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_delete_response(mut self, response: BulkDeleteResponse) -> Self {
        self.delete_response = Some(response);
        self
    }

    pub fn with_delete_error(mut self, err: ResourceError) -> Self {
        self.delete_error = Some(err);
        self
    }

    /// Update requests block until the returned semaphore hands out permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Bulk deletes block until the returned semaphore hands out permits.
    pub fn gated_deletes(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.delete_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Page fetches read the rows first, then block on the returned
    /// semaphore, so a released fetch can hand back stale rows.
    pub fn gated_fetches(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.fetch_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub async fn update_call_count(&self) -> usize {
        self.update_calls.lock().await.len()
    }

    fn unavailable_error() -> ResourceError {
        ResourceError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl ResourceApi for FakeResourceApi {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse, ResourceError> {
        if self.unavailable {
            return Err(Self::unavailable_error());
        }
        self.fetch_calls.lock().await.push(query.clone());
        let entities = self.entities.lock().await;
        let filtered: Vec<&Entity> = entities
            .iter()
            .filter(|entity| {
                query.filters.iter().all(|(key, value)| {
                    entity.display_value(&FieldName::from(key.as_str())) == *value
                })
            })
            .collect();
        let skip = (query.page.saturating_sub(1) * query.page_size) as usize;
        let page = PageResponse {
            items: filtered
                .iter()
                .skip(skip)
                .take(query.page_size as usize)
                .map(|entity| (*entity).clone())
                .collect(),
            total_count: filtered.len() as u64,
        };
        drop(entities);

        if let Some(gate) = &self.fetch_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(page)
    }

    async fn bulk_delete(&self, ids: &[EntityId]) -> Result<BulkDeleteResponse, ResourceError> {
        if self.unavailable {
            return Err(Self::unavailable_error());
        }
        self.delete_calls.lock().await.push(ids.to_vec());
        if let Some(gate) = &self.delete_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(err) = &self.delete_error {
            return Err(err.clone());
        }
        if let Some(response) = &self.delete_response {
            return Ok(response.clone());
        }

        let mut entities = self.entities.lock().await;
        let before = entities.len();
        entities.retain(|entity| !ids.contains(&entity.id));
        let deleted = (before - entities.len()) as u64;
        Ok(BulkDeleteResponse::counts(deleted, ids.len() as u64 - deleted))
    }

    async fn update_field(
        &self,
        id: &EntityId,
        field: &FieldName,
        value: &ParsedValue,
    ) -> Result<Entity, ResourceError> {
        if self.unavailable {
            return Err(Self::unavailable_error());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.update_calls
            .lock()
            .await
            .push((id.clone(), field.clone(), value.clone()));

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.slow_updates.contains(id) {
            tokio::time::sleep(self.slow_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_updates.contains(id) {
            return Err(ResourceError::Rejected {
                status: 422,
                message: format!("entity {id} rejected the update"),
            });
        }

        let mut entities = self.entities.lock().await;
        let entity = entities
            .iter_mut()
            .find(|entity| &entity.id == id)
            .ok_or(ResourceError::NotFound)?;
        entity.fields.insert(field.to_string(), value.clone());
        Ok(entity.clone())
    }
}
