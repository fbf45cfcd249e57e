//! Updater.
//!
//! Applies a merged `Diff` to a `BoardModel` via the `Adapter`, then
//! re-hashes every touched entity and, on the Host side, performs
//! identity repair for any provisional kiids the Peer had minted.

use serde_json::Value;

use crate::adapter::{Adapter, KiidRemap};
use crate::diff::{CollectionDiff, Diff};
use crate::error::SyncError;
use crate::model::hash;
use crate::model::{Board, BoardModel, Entity, Kiid};

/// Generic add/change/remove bookkeeping for one collection, shared by
/// every `Adapter` implementation so the canonical `Board` mutation is
/// identical regardless of which native tool is behind the adapter.
/// `mint_permanent_kiid` is called once per added entity that carries a
/// provisional kiid, and should return
/// the tool-assigned permanent kiid for it.
pub fn apply_collection_bookkeeping<T: Entity>(
    stored: &mut Vec<T>,
    diff: Option<&CollectionDiff<T>>,
    mint_permanent_kiid: &mut impl FnMut(&Kiid) -> Kiid,
) -> Vec<KiidRemap> {
    let mut remaps = Vec::new();
    let Some(diff) = diff else {
        return remaps;
    };

    for kiid in diff.as_removed() {
        BoardModel::remove(stored, kiid);
    }

    for mut entity in diff.added.clone().unwrap_or_default() {
        let original = entity.kiid().clone();
        if original.is_provisional() {
            let permanent = mint_permanent_kiid(&original);
            entity.set_kiid(permanent.clone());
            remaps.push((original, permanent));
        }
        entity.recompute_hash();
        BoardModel::upsert(stored, entity);
    }

    for entry in diff.as_changed() {
        if let Some(stored_entity) = BoardModel::lookup_by_kiid(stored, &entry.kiid) {
            let mut merged = hash::canonical_json(stored_entity);
            if let Value::Object(map) = &mut merged {
                for (key, value) in &entry.changes {
                    map.insert(key.clone(), value.clone());
                }
            }
            if let Ok(mut updated) = serde_json::from_value::<T>(merged) {
                updated.recompute_hash();
                BoardModel::upsert(stored, updated);
            }
        }
    }

    remaps
}

/// Apply the same bookkeeping across all three collections of a `Board`.
/// Exposed so `Adapter` implementations (and tests) can reuse the exact
/// canonical-mutation semantics the core expects.
pub fn apply_bookkeeping(
    diff: &Diff,
    board: &mut Board,
    mut mint_permanent_kiid: impl FnMut(&Kiid) -> Kiid,
) -> Vec<KiidRemap> {
    let mut remaps = apply_collection_bookkeeping(&mut board.drawings, diff.drawings.as_ref(), &mut mint_permanent_kiid);
    remaps.extend(apply_collection_bookkeeping(&mut board.footprints, diff.footprints.as_ref(), &mut mint_permanent_kiid));
    remaps.extend(apply_collection_bookkeeping(&mut board.vias, diff.vias.as_ref(), &mut mint_permanent_kiid));
    remaps
}

fn resolve_kiid(original: &Kiid, remaps: &[KiidRemap]) -> Kiid {
    remaps
        .iter()
        .find(|(provisional, _)| provisional == original)
        .map(|(_, permanent)| permanent.clone())
        .unwrap_or_else(|| original.clone())
}

fn rehash_touched<T: Entity>(stored: &mut [T], diff: Option<&CollectionDiff<T>>, remaps: &[KiidRemap]) {
    let Some(diff) = diff else {
        return;
    };
    for entity in diff.as_added() {
        let kiid = resolve_kiid(entity.kiid(), remaps);
        if let Some(e) = BoardModel::lookup_by_kiid_mut(stored, &kiid) {
            e.recompute_hash();
        }
    }
    for entry in diff.as_changed() {
        let kiid = resolve_kiid(&entry.kiid, remaps);
        if let Some(e) = BoardModel::lookup_by_kiid_mut(stored, &kiid) {
            e.recompute_hash();
        }
    }
}

/// Build the identity-repair portion of the follow-up diff for one
/// collection: for every added entity whose kiid was
/// provisional and has since been remapped, schedule the provisional
/// kiid for removal and the now-permanent entity for addition.
fn identity_repair<T: Entity>(stored: &[T], diff: Option<&CollectionDiff<T>>, remaps: &[KiidRemap]) -> Option<CollectionDiff<T>> {
    let diff = diff?;
    let mut repair = CollectionDiff::default();
    for entity in diff.as_added() {
        let original = entity.kiid();
        if !original.is_provisional() {
            continue;
        }
        if let Some((_, permanent)) = remaps.iter().find(|(provisional, _)| provisional == original) {
            if let Some(stored_entity) = BoardModel::lookup_by_kiid(stored, permanent) {
                repair.push_removed(original.clone());
                repair.push_added(stored_entity.clone());
            }
        }
    }
    if repair.is_empty() {
        None
    } else {
        Some(repair)
    }
}

/// Apply a merged `Diff` to `model` via `adapter`, re-hash every touched
/// entity, and return the identity-repair follow-up diff if any
/// provisional kiid was resolved to a permanent one.
pub async fn apply(adapter: &dyn Adapter, diff: &Diff, model: &mut BoardModel) -> Result<Option<Diff>, SyncError> {
    let remaps = adapter.apply_diff(diff, &mut model.board).await?;

    rehash_touched(&mut model.board.drawings, diff.drawings.as_ref(), &remaps);
    rehash_touched(&mut model.board.footprints, diff.footprints.as_ref(), &remaps);
    rehash_touched(&mut model.board.vias, diff.vias.as_ref(), &remaps);

    let mut follow_up = Diff::default();
    if let Some(rep) = identity_repair(&model.board.drawings, diff.drawings.as_ref(), &remaps) {
        follow_up.drawings = Some(rep);
    }
    if let Some(rep) = identity_repair(&model.board.footprints, diff.footprints.as_ref(), &remaps) {
        follow_up.footprints = Some(rep);
    }
    if let Some(rep) = identity_repair(&model.board.vias, diff.vias.as_ref(), &remaps) {
        follow_up.vias = Some(rep);
    }

    Ok(if follow_up.is_empty() { None } else { Some(follow_up) })
}
