//! DiffAccumulator.
//!
//! Folds a new per-cycle `Diff` into a pending `Diff` carried across
//! cycles, keyed by stable kiid. This guarantees that if the same entity
//! changes twice before a send, only the latest value per property
//! survives, and a changed entity's property list grows
//! rather than duplicating entries.

use crate::diff::{ChangedEntry, CollectionDiff, Diff};
use crate::model::Entity;

/// Fold `incoming` into `pending` in place.
pub fn accumulate(pending: &mut Diff, incoming: Diff) {
    if let Some(d) = incoming.drawings {
        accumulate_collection(pending.drawings_mut(), d);
    }
    if let Some(f) = incoming.footprints {
        accumulate_collection(pending.footprints_mut(), f);
    }
    if let Some(v) = incoming.vias {
        accumulate_collection(pending.vias_mut(), v);
    }
}

fn accumulate_collection<T: Entity>(pending: &mut CollectionDiff<T>, incoming: CollectionDiff<T>) {
    if let Some(added) = incoming.added {
        let slot = pending.added.get_or_insert_with(Vec::new);
        slot.extend(added);
    }
    if let Some(removed) = incoming.removed {
        let slot = pending.removed.get_or_insert_with(Vec::new);
        slot.extend(removed);
    }
    if let Some(changed) = incoming.changed {
        let slot = pending.changed.get_or_insert_with(Vec::new);
        for incoming_entry in changed {
            match slot.iter_mut().find(|e| e.kiid == incoming_entry.kiid) {
                Some(existing) => {
                    // Incoming values overwrite pending values for the same key.
                    for (key, value) in incoming_entry.changes {
                        existing.changes.insert(key, value);
                    }
                }
                None => slot.push(incoming_entry),
            }
        }
    }
}

/// Take the accumulated diff, leaving an empty one behind.
pub fn take(pending: &mut Diff) -> Diff {
    std::mem::take(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kiid;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn later_value_wins_for_same_property() {
        let mut pending = Diff::default();
        let mut d1 = Diff::default();
        d1.footprints_mut().changed = Some(vec![ChangedEntry::new(
            Kiid::new("f1"),
            BTreeMap::from([("rot".to_string(), json!(10))]),
        )]);
        accumulate(&mut pending, d1);

        let mut d2 = Diff::default();
        d2.footprints_mut().changed = Some(vec![ChangedEntry::new(
            Kiid::new("f1"),
            BTreeMap::from([("rot".to_string(), json!(90))]),
        )]);
        accumulate(&mut pending, d2);

        let changed = pending.footprints.unwrap().as_changed().to_vec();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].changes.get("rot"), Some(&json!(90)));
    }

    #[test]
    fn distinct_properties_accumulate_without_losing_either() {
        let mut pending = Diff::default();
        let mut d1 = Diff::default();
        d1.footprints_mut().changed = Some(vec![ChangedEntry::new(
            Kiid::new("f1"),
            BTreeMap::from([("rot".to_string(), json!(90))]),
        )]);
        accumulate(&mut pending, d1);

        let mut d2 = Diff::default();
        d2.footprints_mut().changed = Some(vec![ChangedEntry::new(
            Kiid::new("f1"),
            BTreeMap::from([("pos".to_string(), json!([1, 2]))]),
        )]);
        accumulate(&mut pending, d2);

        let changed = &pending.footprints.unwrap().as_changed()[0];
        assert_eq!(changed.changes.get("rot"), Some(&json!(90)));
        assert_eq!(changed.changes.get("pos"), Some(&json!([1, 2])));
    }

    #[test]
    fn added_and_removed_append_rather_than_replace() {
        let mut pending = Diff::default();
        let mut d1 = Diff::default();
        d1.drawings_mut().push_removed(Kiid::new("d1"));
        accumulate(&mut pending, d1);
        let mut d2 = Diff::default();
        d2.drawings_mut().push_removed(Kiid::new("d2"));
        accumulate(&mut pending, d2);
        assert_eq!(
            pending.drawings.unwrap().as_removed(),
            &[Kiid::new("d1"), Kiid::new("d2")]
        );
    }

    #[test]
    fn take_clears_the_pending_diff() {
        let mut pending = Diff::default();
        pending.drawings_mut().push_removed(Kiid::new("d1"));
        let taken = take(&mut pending);
        assert!(!taken.is_empty());
        assert!(pending.is_empty());
    }
}
