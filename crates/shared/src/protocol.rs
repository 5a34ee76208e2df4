use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityId};

/// Which slice of a resource a list view is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    pub page: u32,
    pub page_size: u32,
}

impl PageQuery {
    pub fn first(page_size: u32) -> Self {
        Self {
            filters: BTreeMap::new(),
            page: 1,
            page_size,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Page number or page size differs; filters are compared separately.
    pub fn page_differs(&self, other: &PageQuery) -> bool {
        self.page != other.page || self.page_size != other.page_size
    }

    pub fn filters_differ(&self, other: &PageQuery) -> bool {
        self.filters != other.filters
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub items: Vec<Entity>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<EntityId>,
}

/// Bulk-delete outcome. Most endpoints only report counts; some also name
/// the ids that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    pub deleted_count: u64,
    pub failed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_ids: Option<Vec<EntityId>>,
}

impl BulkDeleteResponse {
    pub fn counts(deleted_count: u64, failed_count: u64) -> Self {
        Self {
            deleted_count,
            failed_count,
            failed_ids: None,
        }
    }
}
