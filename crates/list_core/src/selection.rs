use std::collections::{BTreeSet, HashSet};

use shared::domain::EntityId;

/// Checkbox state of a "select all" header against the visible rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Unchecked,
    Indeterminate,
    Checked,
}

/// Ids the operator has ticked. Never checked against the remote dataset:
/// a stale id simply fails remotely when a batch runs against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    selected: BTreeSet<EntityId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, id: EntityId) {
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
    }

    pub fn select(&mut self, id: EntityId) {
        self.selected.insert(id);
    }

    pub fn deselect(&mut self, id: &EntityId) {
        self.selected.remove(id);
    }

    /// Header checkbox click: deselects the visible ids when all of them are
    /// selected, otherwise adds them. Selections outside `visible` stay.
    pub fn toggle_all(&mut self, visible: &[EntityId]) {
        if visible.is_empty() {
            return;
        }
        if self.is_all_selected(visible) {
            for id in visible {
                self.selected.remove(id);
            }
        } else {
            self.selected.extend(visible.iter().cloned());
        }
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.selected.contains(id)
    }

    pub fn is_all_selected(&self, visible: &[EntityId]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.selected.contains(id))
    }

    pub fn is_partially_selected(&self, visible: &[EntityId]) -> bool {
        let (hits, distinct) = self.visible_hits(visible);
        hits > 0 && hits < distinct
    }

    pub fn tri_state(&self, visible: &[EntityId]) -> TriState {
        if self.is_all_selected(visible) {
            TriState::Checked
        } else if self.is_partially_selected(visible) {
            TriState::Indeterminate
        } else {
            TriState::Unchecked
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn selected_ids(&self) -> Vec<EntityId> {
        self.selected.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn remove_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a EntityId>) {
        for id in ids {
            self.selected.remove(id);
        }
    }

    /// Selected ids that also appear in `ids`.
    pub fn intersecting<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) -> Vec<EntityId> {
        ids.into_iter()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `(selected ∩ visible, distinct visible)` with duplicates in `visible`
    /// counted once.
    fn visible_hits(&self, visible: &[EntityId]) -> (usize, usize) {
        let distinct: HashSet<&EntityId> = visible.iter().collect();
        let hits = distinct
            .iter()
            .filter(|id| self.selected.contains(**id))
            .count();
        (hits, distinct.len())
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
