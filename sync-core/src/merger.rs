//! Merger.
//!
//! Resolves conflicts between a Host `Diff` and a Peer `Diff` produced in
//! the same sync cycle. Called by the Peer once it has scanned locally
//! and also received the Host's `Diff` via `REQDIF`, producing the one
//! `Diff` sent back to the Host.

use crate::diff::{ChangedEntry, CollectionDiff, Diff};
use crate::model::{Entity, Kiid};

/// Merge a Host diff and a Peer diff produced in the same cycle.
pub fn merge(host: Diff, peer: Diff) -> Diff {
    let mut out = Diff::default();

    // drawings.added conflict: the Peer's additions are canonical because
    // new drawings are created with provisional kiids on the Peer; the
    // Host's additions would otherwise have no mating geometry on the
    // Peer, so they are scheduled for removal instead.
    out.drawings = merge_collection_peer_wins_on_add(host.drawings, peer.drawings);

    // footprints.changed conflict: the Host is authoritative (footprints
    // originate from the ECAD schematic). The added-conflict rule used
    // for drawings extends to footprints too, for symmetry with how
    // provisional kiids are handled (see DESIGN.md).
    out.footprints = merge_collection_peer_wins_on_add(host.footprints, peer.footprints);

    // vias / other collections: single-side passthrough, else the same
    // by-kiid conflict resolution (host wins per overlapping property key).
    out.vias = merge_collection_plain(host.vias, peer.vias);

    out
}

/// Merge rule used for drawings (and footprints, see DESIGN.md): if both
/// sides added entities, the Peer's additions win and the Host's
/// are converted into removals; otherwise whichever side added passes
/// through unchanged. `changed`/`removed` always merge with host priority
/// on overlapping keys.
fn merge_collection_peer_wins_on_add<T: Entity>(
    host: Option<CollectionDiff<T>>,
    peer: Option<CollectionDiff<T>>,
) -> Option<CollectionDiff<T>> {
    match (host, peer) {
        (None, None) => None,
        (Some(h), None) => Some(h),
        (None, Some(p)) => Some(p),
        (Some(h), Some(p)) => {
            let mut out = CollectionDiff::default();

            let host_added_nonempty = h.added.as_ref().is_some_and(|v| !v.is_empty());
            let peer_added_nonempty = p.added.as_ref().is_some_and(|v| !v.is_empty());

            let mut removed = h.removed.unwrap_or_default();
            if host_added_nonempty && peer_added_nonempty {
                for entity in h.added.unwrap_or_default() {
                    removed.push(entity.kiid().clone());
                }
                out.added = p.added;
            } else {
                let mut combined = h.added.unwrap_or_default();
                combined.extend(p.added.unwrap_or_default());
                if !combined.is_empty() {
                    out.added = Some(combined);
                }
            }

            out.changed = merge_changed_host_wins(h.changed, p.changed);
            removed.extend(p.removed.unwrap_or_default());
            out.removed = dedup_kiids(removed);

            if out.is_empty() { None } else { Some(out) }
        }
    }
}

/// Plain by-kiid merge with no special added-conflict rule.
fn merge_collection_plain<T: Entity>(
    host: Option<CollectionDiff<T>>,
    peer: Option<CollectionDiff<T>>,
) -> Option<CollectionDiff<T>> {
    match (host, peer) {
        (None, None) => None,
        (Some(h), None) => Some(h),
        (None, Some(p)) => Some(p),
        (Some(h), Some(p)) => {
            let mut out = CollectionDiff::default();
            let mut added = h.added.unwrap_or_default();
            added.extend(p.added.unwrap_or_default());
            if !added.is_empty() {
                out.added = Some(added);
            }
            out.changed = merge_changed_host_wins(h.changed, p.changed);
            let mut removed = h.removed.unwrap_or_default();
            removed.extend(p.removed.unwrap_or_default());
            out.removed = dedup_kiids(removed);
            if out.is_empty() { None } else { Some(out) }
        }
    }
}

/// Merge two `changed` lists by kiid. On a property-key collision for the
/// same kiid, the Host's value wins; distinct keys on the same kiid
/// survive from both sides.
fn merge_changed_host_wins(
    host: Option<Vec<ChangedEntry>>,
    peer: Option<Vec<ChangedEntry>>,
) -> Option<Vec<ChangedEntry>> {
    let mut out: Vec<ChangedEntry> = peer.unwrap_or_default();
    for host_entry in host.unwrap_or_default() {
        match out.iter_mut().find(|e| e.kiid == host_entry.kiid) {
            Some(existing) => {
                for (key, value) in host_entry.changes {
                    existing.changes.insert(key, value);
                }
            }
            None => out.push(host_entry),
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

fn dedup_kiids(kiids: Vec<Kiid>) -> Option<Vec<Kiid>> {
    let mut out: Vec<Kiid> = Vec::new();
    for k in kiids {
        if !out.contains(&k) {
            out.push(k);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}
