use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use shared::domain::{EditKey, EntityId, FieldName, ParsedValue};

use crate::validation::{FieldValidator, ParseResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEdit {
    pub key: EditKey,
    pub raw: String,
    /// Persisted value the cell was seeded from, if it was started that way.
    pub original: Option<String>,
    revision: u64,
}

impl StagedEdit {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_dirty(&self) -> bool {
        self.original.as_deref() != Some(self.raw.as_str())
    }
}

/// A validated value ready to be sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUpdate {
    pub id: EntityId,
    pub field: FieldName,
    pub value: ParsedValue,
}

impl FieldUpdate {
    pub fn key(&self) -> EditKey {
        EditKey::new(self.id.clone(), self.field.clone())
    }
}

/// A staged value the validator refused; it stays staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidEdit {
    pub key: EditKey,
    pub raw: String,
    pub reason: String,
}

/// Result of running the validator over the overlay.
#[derive(Debug, Clone, Default)]
pub struct CommitPlan {
    pub updates: Vec<FieldUpdate>,
    pub invalid: Vec<InvalidEdit>,
    revisions: BTreeMap<EditKey, u64>,
}

impl CommitPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Revision of `key` at the time the plan was taken.
    pub fn revision_of(&self, key: &EditKey) -> Option<u64> {
        self.revisions.get(key).copied()
    }

    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.updates.iter().map(|update| update.id.clone()).collect()
    }
}

/// In-progress cell edits, one per `(entity, field)`, last write wins.
#[derive(Debug, Clone, Default)]
pub struct StagedEditOverlay {
    edits: BTreeMap<EditKey, StagedEdit>,
    next_revision: u64,
}

impl StagedEditOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the cell with its persisted value. A cell that is already
    /// staged keeps the text the operator typed.
    pub fn start_edit(&mut self, id: EntityId, field: FieldName, current: impl Into<String>) {
        let key = EditKey { entity_id: id, field };
        if self.edits.contains_key(&key) {
            return;
        }
        let current = current.into();
        let revision = self.bump();
        self.edits.insert(
            key.clone(),
            StagedEdit {
                key,
                raw: current.clone(),
                original: Some(current),
                revision,
            },
        );
    }

    pub fn update_value(&mut self, id: EntityId, field: FieldName, raw: impl Into<String>) {
        let key = EditKey { entity_id: id, field };
        let revision = self.bump();
        let raw = raw.into();
        match self.edits.get_mut(&key) {
            Some(edit) => {
                edit.raw = raw;
                edit.revision = revision;
            }
            None => {
                self.edits.insert(
                    key.clone(),
                    StagedEdit {
                        key,
                        raw,
                        original: None,
                        revision,
                    },
                );
            }
        }
    }

    pub fn cancel_edit(&mut self, id: &EntityId, field: &FieldName) -> bool {
        self.edits
            .remove(&EditKey::new(id.clone(), field.clone()))
            .is_some()
    }

    pub fn cancel_all(&mut self) {
        self.edits.clear();
    }

    pub fn is_editing(&self, id: &EntityId, field: &FieldName) -> bool {
        self.get(id, field).is_some()
    }

    pub fn value_of(&self, id: &EntityId, field: &FieldName) -> Option<&str> {
        self.get(id, field).map(|edit| edit.raw.as_str())
    }

    pub fn get(&self, id: &EntityId, field: &FieldName) -> Option<&StagedEdit> {
        self.edits.get(&EditKey::new(id.clone(), field.clone()))
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EditKey> {
        self.edits.keys()
    }

    pub fn staged_ids(&self) -> BTreeSet<EntityId> {
        self.edits.keys().map(|key| key.entity_id.clone()).collect()
    }

    /// Validated values ready to send. Entries the validator rejects are
    /// left out of the list but stay staged.
    pub fn collect_committable(&self, validator: &dyn FieldValidator) -> Vec<FieldUpdate> {
        self.partition(validator).updates
    }

    pub fn partition(&self, validator: &dyn FieldValidator) -> CommitPlan {
        let mut plan = CommitPlan::default();
        for (key, edit) in &self.edits {
            match validator.validate(&key.field, &edit.raw) {
                ParseResult::Valid(value) => {
                    plan.revisions.insert(key.clone(), edit.revision);
                    plan.updates.push(FieldUpdate {
                        id: key.entity_id.clone(),
                        field: key.field.clone(),
                        value,
                    });
                }
                ParseResult::Invalid(reason) => plan.invalid.push(InvalidEdit {
                    key: key.clone(),
                    raw: edit.raw.clone(),
                    reason,
                }),
            }
        }
        plan
    }

    /// Drops `key` after a confirmed commit unless it was edited again (or
    /// cancelled and restaged) since the commit was planned.
    pub fn remove_if_unchanged(&mut self, key: &EditKey, revision: u64) -> bool {
        match self.edits.get(key) {
            Some(edit) if edit.revision == revision => {
                self.edits.remove(key);
                true
            }
            _ => false,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[cfg(test)]
#[path = "tests/overlay_tests.rs"]
mod tests;
