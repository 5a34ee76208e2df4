//! Notifications a list view broadcasts to its collaborators.

use shared::domain::EntityId;

use crate::{controller::EditMode, orchestrator::BatchResult};

#[derive(Debug, Clone)]
pub enum ListEvent {
    /// Rows changed remotely; the list fetcher must not serve them from cache.
    CacheInvalidated { entity_ids: Vec<EntityId> },
    /// A commit or delete finished; input for the notification collaborator.
    BatchCompleted(BatchResult),
    EditModeChanged(EditMode),
    PageLoaded { total_count: u64, visible: usize },
}
