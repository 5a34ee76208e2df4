use super::*;

fn ids(raw: &[i64]) -> Vec<EntityId> {
    raw.iter().copied().map(EntityId::Num).collect()
}

#[test]
fn toggle_flips_membership() {
    let mut selection = SelectionSet::new();
    selection.toggle(EntityId::Num(4));
    assert!(selection.is_selected(&EntityId::Num(4)));
    selection.toggle(EntityId::Num(4));
    assert!(!selection.is_selected(&EntityId::Num(4)));
    assert_eq!(selection.count(), 0);
}

#[test]
fn tri_state_walkthrough_over_five_visible_rows() {
    let visible = ids(&[1, 2, 3, 4, 5]);
    let mut selection = SelectionSet::new();

    selection.toggle(EntityId::Num(1));
    selection.toggle(EntityId::Num(2));
    assert!(selection.is_partially_selected(&visible));
    assert!(!selection.is_all_selected(&visible));
    assert_eq!(selection.tri_state(&visible), TriState::Indeterminate);

    for id in [3, 4, 5] {
        selection.toggle(EntityId::Num(id));
    }
    assert!(selection.is_all_selected(&visible));
    assert!(!selection.is_partially_selected(&visible));
    assert_eq!(selection.tri_state(&visible), TriState::Checked);

    selection.toggle_all(&visible);
    assert!(selection.selected_ids().is_empty());
    assert_eq!(selection.tri_state(&visible), TriState::Unchecked);
}

#[test]
fn toggle_all_twice_round_trips_and_keeps_off_page_selection() {
    let visible = ids(&[1, 2, 3]);
    let mut selection = SelectionSet::new();
    selection.select(EntityId::from("off-page"));
    let untouched = selection.clone();

    selection.toggle_all(&visible);
    assert!(selection.is_all_selected(&visible));
    assert!(selection.is_selected(&EntityId::from("off-page")));
    let all_selected = selection.clone();

    selection.toggle_all(&visible);
    assert_eq!(selection, untouched);

    selection.toggle_all(&visible);
    assert_eq!(selection, all_selected);
}

#[test]
fn toggle_all_from_partial_selects_the_rest() {
    let visible = ids(&[1, 2, 3]);
    let mut selection = SelectionSet::new();
    selection.select(EntityId::Num(2));

    selection.toggle_all(&visible);
    assert_eq!(selection.selected_ids(), visible);

    selection.toggle_all(&visible);
    assert!(selection.is_empty());
}

#[test]
fn empty_visible_list_is_inert() {
    let mut selection = SelectionSet::new();
    selection.select(EntityId::Num(9));
    selection.toggle_all(&[]);
    assert_eq!(selection.selected_ids(), ids(&[9]));
    assert!(!selection.is_all_selected(&[]));
    assert!(!selection.is_partially_selected(&[]));
    assert_eq!(selection.tri_state(&[]), TriState::Unchecked);
}

#[test]
fn duplicate_visible_ids_are_counted_once() {
    let visible = ids(&[1, 1, 2]);
    let mut selection = SelectionSet::new();
    selection.select(EntityId::Num(1));
    assert!(selection.is_partially_selected(&visible));

    selection.select(EntityId::Num(2));
    assert!(selection.is_all_selected(&visible));
    assert!(!selection.is_partially_selected(&visible));

    selection.clear();
    selection.toggle_all(&visible);
    assert_eq!(selection.count(), 2);
}

#[test]
fn predicates_are_mutually_exclusive_for_every_subset() {
    let visible = ids(&[1, 2, 3]);
    for mask in 0u8..8 {
        let mut selection = SelectionSet::new();
        for (bit, id) in visible.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                selection.select(id.clone());
            }
        }
        let hits = mask.count_ones() as usize;
        assert_eq!(selection.is_all_selected(&visible), hits == 3);
        assert_eq!(selection.is_partially_selected(&visible), hits > 0 && hits < 3);
        assert!(!(selection.is_all_selected(&visible) && selection.is_partially_selected(&visible)));
    }
}

#[test]
fn intersecting_reports_sorted_overlap() {
    let mut selection = SelectionSet::new();
    selection.select(EntityId::Num(3));
    selection.select(EntityId::Num(1));
    let probe = ids(&[5, 3, 1, 3]);
    assert_eq!(selection.intersecting(&probe), ids(&[1, 3]));

    selection.remove_all(&probe);
    assert!(selection.is_empty());
}
