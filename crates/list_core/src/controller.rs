use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use shared::{
    domain::{Entity, EntityId, FieldName},
    protocol::PageQuery,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::ListViewSettings,
    events::ListEvent,
    orchestrator::{BatchError, BatchKind, BatchMutationOrchestrator, BatchOperation, BatchResult},
    overlay::StagedEditOverlay,
    resource::{ResourceApi, ResourceError},
    selection::{SelectionSet, TriState},
    validation::FieldValidator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    Idle,
    Editing,
    Committing,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a commit is already in flight")]
    CommitInProgress,
    #[error("a delete is already in flight")]
    DeleteInProgress,
    #[error("edit mode is not active")]
    NotEditing,
    #[error("nothing is selected")]
    EmptySelection,
    #[error("no delete is awaiting confirmation")]
    NoDeleteRequested,
    #[error("entities {ids:?} are targeted by a pending delete")]
    PendingDelete { ids: Vec<EntityId> },
    #[error("entities {ids:?} have staged or in-flight edits")]
    PendingEdits { ids: Vec<EntityId> },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("failed to load page: {0}")]
    Fetch(#[from] ResourceError),
}

/// When navigating should drop the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionPolicy {
    pub clear_on_page_change: bool,
    pub clear_on_filter_change: bool,
}

/// Read-only copy of the selection handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct SelectionSnapshot {
    selection: SelectionSet,
    visible: Vec<EntityId>,
}

impl SelectionSnapshot {
    pub fn selected_ids(&self) -> Vec<EntityId> {
        self.selection.selected_ids()
    }

    pub fn count(&self) -> usize {
        self.selection.count()
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.selection.is_selected(id)
    }

    pub fn is_all_selected(&self, visible: &[EntityId]) -> bool {
        self.selection.is_all_selected(visible)
    }

    pub fn is_partially_selected(&self, visible: &[EntityId]) -> bool {
        self.selection.is_partially_selected(visible)
    }

    /// Header checkbox for the rows currently on screen.
    pub fn header_state(&self) -> TriState {
        self.selection.tri_state(&self.visible)
    }
}

#[derive(Debug, Clone)]
pub struct OverlaySnapshot {
    overlay: StagedEditOverlay,
}

impl OverlaySnapshot {
    pub fn is_editing(&self, id: &EntityId, field: &FieldName) -> bool {
        self.overlay.is_editing(id, field)
    }

    pub fn value_of(&self, id: &EntityId, field: &FieldName) -> Option<&str> {
        self.overlay.value_of(id, field)
    }

    pub fn len(&self) -> usize {
        self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub query: PageQuery,
    pub items: Vec<Entity>,
    pub total_count: u64,
}

impl PageSnapshot {
    pub fn visible_ids(&self) -> Vec<EntityId> {
        self.items.iter().map(|entity| entity.id.clone()).collect()
    }
}

struct ViewState {
    selection: SelectionSet,
    overlay: StagedEditOverlay,
    edit_mode: EditMode,
    commit_in_flight: Option<BTreeSet<EntityId>>,
    delete_confirmation: Option<Vec<EntityId>>,
    delete_in_flight: Option<Vec<EntityId>>,
    query: PageQuery,
    items: Vec<Entity>,
    total_count: u64,
    page_generation: u64,
    last_result: Option<BatchResult>,
}

impl ViewState {
    fn visible_ids(&self) -> Vec<EntityId> {
        self.items.iter().map(|entity| entity.id.clone()).collect()
    }

    fn is_pending(&self) -> bool {
        self.commit_in_flight.is_some() || self.delete_in_flight.is_some()
    }

    /// Ids a delete is waiting on, confirmed or not.
    fn delete_targets(&self) -> BTreeSet<EntityId> {
        self.delete_confirmation
            .iter()
            .chain(self.delete_in_flight.iter())
            .flatten()
            .cloned()
            .collect()
    }

    /// Ids with staged edits or an update in flight.
    fn edit_targets(&self) -> BTreeSet<EntityId> {
        let mut ids = self.overlay.staged_ids();
        if let Some(in_flight) = &self.commit_in_flight {
            ids.extend(in_flight.iter().cloned());
        }
        ids
    }

    fn ensure_not_deleting<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a EntityId>,
    ) -> Result<(), ControllerError> {
        let targets = self.delete_targets();
        let overlap: Vec<EntityId> = ids
            .into_iter()
            .filter(|id| targets.contains(*id))
            .cloned()
            .collect();
        if overlap.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::PendingDelete { ids: overlap })
        }
    }

    fn set_edit_mode(&mut self, mode: EditMode) -> bool {
        let changed = self.edit_mode != mode;
        self.edit_mode = mode;
        changed
    }
}

/// Owns the selection, the staged edits and the batch pipeline of one list
/// view. Intents mutate state synchronously; only `commit`, `confirm_delete`
/// and page loads suspend, and no lock is held while they do.
pub struct ListViewController {
    api: Arc<dyn ResourceApi>,
    orchestrator: BatchMutationOrchestrator,
    validator: Arc<dyn FieldValidator>,
    policy: SelectionPolicy,
    state: Mutex<ViewState>,
    events: broadcast::Sender<ListEvent>,
}

impl ListViewController {
    pub fn new(
        api: Arc<dyn ResourceApi>,
        validator: Arc<dyn FieldValidator>,
        settings: &ListViewSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let orchestrator = BatchMutationOrchestrator::new(Arc::clone(&api), events.clone())
            .with_request_timeout(settings.request_timeout());
        Arc::new(Self {
            api,
            orchestrator,
            validator,
            policy: settings.selection_policy(),
            state: Mutex::new(ViewState {
                selection: SelectionSet::new(),
                overlay: StagedEditOverlay::new(),
                edit_mode: EditMode::Idle,
                commit_in_flight: None,
                delete_confirmation: None,
                delete_in_flight: None,
                query: PageQuery::first(settings.page_size),
                items: Vec::new(),
                total_count: 0,
                page_generation: 0,
                last_result: None,
            }),
            events,
        })
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ListEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ListEvent> {
        self.events.subscribe()
    }

    // --- selection intents ---

    pub fn toggle(&self, id: EntityId) {
        self.state().selection.toggle(id);
    }

    pub fn toggle_all_visible(&self) {
        let mut state = self.state();
        let visible = state.visible_ids();
        state.selection.toggle_all(&visible);
    }

    pub fn select_ids(&self, ids: impl IntoIterator<Item = EntityId>) {
        let mut state = self.state();
        for id in ids {
            state.selection.select(id);
        }
    }

    pub fn clear_selection(&self) {
        self.state().selection.clear();
    }

    // --- edit intents ---

    pub fn enter_edit_mode(&self) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.edit_mode != EditMode::Idle {
            return Ok(());
        }
        let visible = state.visible_ids();
        state.ensure_not_deleting(&visible)?;
        state.set_edit_mode(EditMode::Editing);
        drop(state);
        debug!("list: edit mode entered");
        self.emit(ListEvent::EditModeChanged(EditMode::Editing));
        Ok(())
    }

    pub fn start_edit(
        &self,
        id: EntityId,
        field: FieldName,
        current: impl Into<String>,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        state.ensure_not_deleting([&id])?;
        state.overlay.start_edit(id, field, current);
        let entered = state.edit_mode == EditMode::Idle && state.set_edit_mode(EditMode::Editing);
        drop(state);
        if entered {
            self.emit(ListEvent::EditModeChanged(EditMode::Editing));
        }
        Ok(())
    }

    pub fn update_value(
        &self,
        id: EntityId,
        field: FieldName,
        raw: impl Into<String>,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        state.ensure_not_deleting([&id])?;
        state.overlay.update_value(id, field, raw);
        let entered = state.edit_mode == EditMode::Idle && state.set_edit_mode(EditMode::Editing);
        drop(state);
        if entered {
            self.emit(ListEvent::EditModeChanged(EditMode::Editing));
        }
        Ok(())
    }

    pub fn cancel_edit(&self, id: &EntityId, field: &FieldName) {
        self.state().overlay.cancel_edit(id, field);
    }

    /// Drops every staged edit and leaves edit mode. Requests already sent
    /// keep running; their results no longer touch the overlay.
    pub fn cancel_all(&self) {
        let mut state = self.state();
        state.overlay.cancel_all();
        let changed = state.set_edit_mode(EditMode::Idle);
        drop(state);
        if changed {
            debug!("list: staged edits cancelled");
            self.emit(ListEvent::EditModeChanged(EditMode::Idle));
        }
    }

    /// Sends every valid staged edit. Valid keys that the resource accepted
    /// leave the overlay; rejected and invalid keys stay for another try.
    /// Rejected outright while any batch is pending.
    pub async fn commit(&self) -> Result<BatchResult, ControllerError> {
        let plan = {
            let mut state = self.state();
            if state.commit_in_flight.is_some() {
                warn!("list: commit rejected reason=in_flight");
                return Err(ControllerError::CommitInProgress);
            }
            if state.delete_in_flight.is_some() {
                warn!("list: commit rejected reason=delete_in_flight");
                return Err(ControllerError::DeleteInProgress);
            }
            if state.edit_mode != EditMode::Editing {
                return Err(ControllerError::NotEditing);
            }
            let plan = state.overlay.partition(self.validator.as_ref());
            let ids = plan.entity_ids();
            state.ensure_not_deleting(&ids)?;
            state.commit_in_flight = Some(ids);
            state.set_edit_mode(EditMode::Committing);
            plan
        };
        self.emit(ListEvent::EditModeChanged(EditMode::Committing));

        let submitted = if plan.is_empty() {
            Ok(BatchResult::empty(BatchKind::Update))
        } else {
            self.orchestrator
                .submit(BatchOperation::UpdateFields(plan.updates.clone()))
                .await
        };

        let mut state = self.state();
        state.commit_in_flight = None;
        let result = match submitted {
            Ok(mut result) => {
                for key in &result.updated_keys {
                    if let Some(revision) = plan.revision_of(key) {
                        state.overlay.remove_if_unchanged(key, revision);
                    }
                }
                result.invalid = plan.invalid;
                result
            }
            Err(err) => {
                let resumed = state.edit_mode == EditMode::Committing
                    && state.set_edit_mode(EditMode::Editing);
                drop(state);
                warn!("list: commit not submitted error={err}");
                if resumed {
                    self.emit(ListEvent::EditModeChanged(EditMode::Editing));
                }
                return Err(err.into());
            }
        };

        // A cancel while in flight already moved the view back to Idle.
        let next_mode = if state.edit_mode == EditMode::Committing {
            let next = if state.overlay.is_empty() {
                EditMode::Idle
            } else {
                EditMode::Editing
            };
            state.set_edit_mode(next);
            Some(next)
        } else {
            None
        };
        state.last_result = Some(result.clone());
        drop(state);

        info!(
            "list: commit finished attempted={} succeeded={} failed={} invalid={}",
            result.total_attempted,
            result.succeeded_count(),
            result.failed_count(),
            result.invalid.len()
        );
        if let Some(mode) = next_mode {
            self.emit(ListEvent::EditModeChanged(mode));
        }
        self.emit(ListEvent::BatchCompleted(result.clone()));
        Ok(result)
    }

    // --- delete intents ---

    /// Stages a delete of the current selection until the operator confirms.
    pub fn request_delete(&self) -> Result<Vec<EntityId>, ControllerError> {
        let mut state = self.state();
        if state.delete_in_flight.is_some() {
            return Err(ControllerError::DeleteInProgress);
        }
        let ids = state.selection.selected_ids();
        if ids.is_empty() {
            return Err(ControllerError::EmptySelection);
        }
        let edits = state.edit_targets();
        let overlap = state.selection.intersecting(&edits);
        if !overlap.is_empty() {
            warn!("list: delete rejected reason=pending_edits ids={}", overlap.len());
            return Err(ControllerError::PendingEdits { ids: overlap });
        }
        state.delete_confirmation = Some(ids.clone());
        Ok(ids)
    }

    pub fn dismiss_delete(&self) {
        self.state().delete_confirmation = None;
    }

    pub fn pending_delete(&self) -> Option<Vec<EntityId>> {
        self.state().delete_confirmation.clone()
    }

    pub async fn confirm_delete(&self) -> Result<BatchResult, ControllerError> {
        let ids = {
            let mut state = self.state();
            if state.delete_in_flight.is_some() {
                return Err(ControllerError::DeleteInProgress);
            }
            let ids = state
                .delete_confirmation
                .take()
                .ok_or(ControllerError::NoDeleteRequested)?;
            state.delete_in_flight = Some(ids.clone());
            ids
        };

        let submitted = self
            .orchestrator
            .submit(BatchOperation::DeleteMany(ids))
            .await;

        let mut state = self.state();
        state.delete_in_flight = None;
        let result = match submitted {
            Ok(result) => result,
            Err(err) => {
                drop(state);
                warn!("list: delete not submitted error={err}");
                return Err(err.into());
            }
        };

        // Only confirmed deletions leave the selection.
        state.selection.remove_all(&result.succeeded_ids);
        let gone: BTreeSet<&EntityId> = result.succeeded_ids.iter().collect();
        let before = state.items.len();
        state.items.retain(|entity| !gone.contains(&entity.id));
        let pruned = (before - state.items.len()) as u64;
        state.total_count = state.total_count.saturating_sub(pruned);
        // Pages fetched before the delete landed still list the removed rows.
        state.page_generation += 1;
        state.last_result = Some(result.clone());
        drop(state);

        info!(
            "list: delete finished attempted={} succeeded={} failed={}",
            result.total_attempted,
            result.succeeded_count(),
            result.failed_count()
        );
        self.emit(ListEvent::BatchCompleted(result.clone()));
        Ok(result)
    }

    // --- paging ---

    /// Fetches `query` and makes it the visible page. Changing page or
    /// filters clears the selection when the policy asks for it.
    pub async fn load_page(&self, query: PageQuery) -> Result<PageSnapshot, ControllerError> {
        let generation = {
            let mut state = self.state();
            state.page_generation += 1;
            state.page_generation
        };

        let page = self.api.fetch_page(&query).await?;

        let mut state = self.state();
        if state.page_generation != generation {
            debug!("list: dropping superseded page load page={}", query.page);
            return Ok(Self::page_of(&state));
        }
        let clear = (self.policy.clear_on_page_change && state.query.page_differs(&query))
            || (self.policy.clear_on_filter_change && state.query.filters_differ(&query));
        if clear {
            state.selection.clear();
        }
        state.query = query;
        state.items = page.items;
        state.total_count = page.total_count;
        let snapshot = Self::page_of(&state);
        drop(state);

        self.emit(ListEvent::PageLoaded {
            total_count: snapshot.total_count,
            visible: snapshot.items.len(),
        });
        Ok(snapshot)
    }

    pub async fn refresh(&self) -> Result<PageSnapshot, ControllerError> {
        let query = self.state().query.clone();
        self.load_page(query).await
    }

    pub async fn go_to_page(&self, page: u32) -> Result<PageSnapshot, ControllerError> {
        let query = self.state().query.clone().with_page(page);
        self.load_page(query).await
    }

    /// Applies a filter and returns to the first page.
    pub async fn set_filter(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<PageSnapshot, ControllerError> {
        let query = self
            .state()
            .query
            .clone()
            .with_filter(key, value)
            .with_page(1);
        self.load_page(query).await
    }

    fn page_of(state: &ViewState) -> PageSnapshot {
        PageSnapshot {
            query: state.query.clone(),
            items: state.items.clone(),
            total_count: state.total_count,
        }
    }

    // --- read side ---

    pub fn selection_snapshot(&self) -> SelectionSnapshot {
        let state = self.state();
        SelectionSnapshot {
            selection: state.selection.clone(),
            visible: state.visible_ids(),
        }
    }

    pub fn overlay_snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            overlay: self.state().overlay.clone(),
        }
    }

    pub fn page_snapshot(&self) -> PageSnapshot {
        Self::page_of(&self.state())
    }

    pub fn edit_mode(&self) -> EditMode {
        self.state().edit_mode
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    pub fn last_result(&self) -> Option<BatchResult> {
        self.state().last_result.clone()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
