//! The Differ — the heart of the core.
//!
//! Compares a freshly scanned replica against a stored `BoardModel` and
//! returns a `Diff`. Mutates the stored `BoardModel` in place as it goes
//! (added/changed/removed entities are written straight into the model,
//! matching the Python original's `pcb_scanner.py`, which updates its
//! in-memory `pcb` dict while building the diff it returns).

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::diff::{ChangedEntry, CollectionDiff, Diff};
use crate::model::hash;
use crate::model::{BoardModel, Drawing, Entity, Footprint, Kiid, Via};

/// Geometry tolerances consumed by the Differ.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    /// Degrees of rotation slack absorbing rad<->deg round-tripping noise.
    pub deg_to_rad_tolerance: f64,
    /// Canonical-unit (nm) slack per axis for position comparisons.
    pub placement_tolerance: i64,
    /// Canonical-unit (nm) slack for arc-midpoint snapping.
    pub arc_epsilon: i64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            deg_to_rad_tolerance: 0.01,
            placement_tolerance: 100,
            arc_epsilon: 1000,
        }
    }
}

/// Millimeters-to-nanometers scale factor: `Model3D::offset` is carried in
/// millimeters, while `Footprint::pos` is in the
/// canonical nanometer unit.
const MM_TO_NM: f64 = 1_000_000.0;

/// Compare a fresh scan against `model` and return the resulting `Diff`.
/// `model` is mutated in place to reflect the fresh scan.
pub struct Differ {
    pub tolerances: Tolerances,
}

impl Differ {
    pub fn new(tolerances: Tolerances) -> Self {
        Self { tolerances }
    }

    pub fn diff(&self, model: &mut BoardModel, mut fresh_drawings: Vec<Drawing>, mut fresh_footprints: Vec<Footprint>, fresh_vias: Vec<Via>) -> Diff {
        self.snap_arc_midpoints(&model.board.drawings, &mut fresh_drawings);
        for d in &mut fresh_drawings {
            d.canonicalize_point_order();
        }
        self.apply_model_offset_correction(&model.board.footprints, &mut fresh_footprints);

        let mut out = Diff::default();
        let drawings = diff_collection(&mut model.board.drawings, fresh_drawings, &self.tolerances);
        if !drawings.is_empty() {
            out.drawings = Some(drawings);
        }
        let footprints = diff_collection(&mut model.board.footprints, fresh_footprints, &self.tolerances);
        if !footprints.is_empty() {
            out.footprints = Some(footprints);
        }
        let vias = diff_collection(&mut model.board.vias, fresh_vias, &self.tolerances);
        if !vias.is_empty() {
            out.vias = Some(vias);
        }
        out
    }

    /// Arc-midpoint snapping: if a fresh
    /// arc's computed midpoint lies within `arc_epsilon` of the stored
    /// midpoint, prefer the stored value to avoid spurious changes from
    /// floating-point noise in the arc-length computation.
    fn snap_arc_midpoints(&self, stored: &[Drawing], fresh: &mut [Drawing]) {
        for f in fresh.iter_mut() {
            if let Drawing::Arc { points, kiid, .. } = f {
                if let Some(Drawing::Arc { points: stored_points, .. }) =
                    stored.iter().find(|s| s.kiid() == kiid)
                {
                    let dx = (points[1][0] - stored_points[1][0]).abs();
                    let dy = (points[1][1] - stored_points[1][1]).abs();
                    if dx <= self.tolerances.arc_epsilon && dy <= self.tolerances.arc_epsilon {
                        points[1] = stored_points[1];
                    }
                }
            }
        }
    }

    /// Footprint-moved-via-model-offset correction: a
    /// footprint with exactly one 3D model whose offset changed is
    /// interpreted as the footprint itself moving by that offset. The
    /// fresh model offset is reset to the prior value so the diff reports
    /// a changed `pos`, not a changed `3d_models`.
    fn apply_model_offset_correction(&self, stored: &[Footprint], fresh: &mut [Footprint]) {
        for f in fresh.iter_mut() {
            let (Some(models), true) = (f.models_3d.as_mut(), true) else {
                continue;
            };
            if models.len() != 1 {
                continue;
            }
            let Some(prior) = stored.iter().find(|s| s.kiid() == &f.kiid) else {
                continue;
            };
            let Some(prior_models) = prior.models_3d.as_ref() else {
                continue;
            };
            if prior_models.len() != 1 {
                continue;
            }
            let fresh_offset = models[0].offset;
            let prior_offset = prior_models[0].offset;
            if fresh_offset == prior_offset {
                continue;
            }
            let dx_mm = fresh_offset[0] - prior_offset[0];
            let dy_mm = fresh_offset[1] - prior_offset[1];
            f.pos[0] += (dx_mm * MM_TO_NM).round() as i64;
            f.pos[1] += (dy_mm * MM_TO_NM).round() as i64;
            models[0].offset = prior_offset;
        }
    }
}

/// Generic per-collection diff algorithm,
/// parameterized over any `Entity` so it runs identically for drawings,
/// footprints, and vias.
fn diff_collection<T: Entity>(stored: &mut Vec<T>, fresh: Vec<T>, tolerances: &Tolerances) -> CollectionDiff<T> {
    let known: HashSet<Kiid> = stored.iter().map(|e| e.kiid().clone()).collect();
    let fresh_kiids: HashSet<Kiid> = fresh.iter().map(|e| e.kiid().clone()).collect();
    let mut out = CollectionDiff::default();

    for mut fresh_entity in fresh {
        if !known.contains(fresh_entity.kiid()) {
            let new_id = BoardModel::next_id(stored);
            fresh_entity.set_id(new_id);
            fresh_entity.recompute_hash();
            out.push_added(fresh_entity.clone());
            stored.push(fresh_entity);
            continue;
        }

        let idx = stored
            .iter()
            .position(|e| e.kiid() == fresh_entity.kiid())
            .expect("kiid is in `known`, must be present in `stored`");

        let fresh_hash = hash::content_hash(&fresh_entity);
        if stored[idx].hash_field() == fresh_hash {
            continue;
        }

        let stored_value = hash::content_value(&stored[idx]);
        let fresh_value = hash::content_value(&fresh_entity);
        let changes = field_diff(&stored_value, &fresh_value, tolerances);
        if changes.is_empty() {
            // Every differing key fell within tolerance: not a real change.
            continue;
        }

        let mut merged = hash::canonical_json(&stored[idx]);
        if let Value::Object(map) = &mut merged {
            for (k, v) in &changes {
                map.insert(k.clone(), v.clone());
            }
        }
        let mut updated: T = serde_json::from_value(merged)
            .expect("merged value has the same shape as a stored entity");
        updated.recompute_hash();
        let kiid = updated.kiid().clone();
        stored[idx] = updated;
        out.changed.get_or_insert_with(Vec::new).push(ChangedEntry::new(kiid, changes));
    }

    for kiid in known.difference(&fresh_kiids) {
        out.push_removed(kiid.clone());
    }
    stored.retain(|e| fresh_kiids.contains(e.kiid()));

    out
}

/// Walk every shared key of two entity content-values and collect
/// `{key: new_value}` for keys whose value differs, applying the
/// rotation/position tolerances along the way.
fn field_diff(stored: &Value, fresh: &Value, tolerances: &Tolerances) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    let (Value::Object(stored_map), Value::Object(fresh_map)) = (stored, fresh) else {
        return out;
    };
    for (key, fresh_value) in fresh_map {
        let stored_value = stored_map.get(key);
        let equal = match stored_value {
            Some(sv) => values_equal(key, sv, fresh_value, tolerances),
            None => false,
        };
        if !equal {
            out.insert(key.clone(), fresh_value.clone());
        }
    }
    out
}

fn values_equal(key: &str, stored: &Value, fresh: &Value, tolerances: &Tolerances) -> bool {
    match key {
        "rot" => match (as_scalar_f64(stored), as_scalar_f64(fresh)) {
            (Some(a), Some(b)) => (a - b).abs() <= tolerances.deg_to_rad_tolerance,
            _ => stored == fresh,
        },
        "pos" => match (stored.as_array(), fresh.as_array()) {
            (Some(a), Some(b)) if a.len() == 2 && b.len() == 2 => {
                axis_within(&a[0], &b[0], tolerances.placement_tolerance)
                    && axis_within(&a[1], &b[1], tolerances.placement_tolerance)
            }
            _ => stored == fresh,
        },
        _ => stored == fresh,
    }
}

fn as_scalar_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn axis_within(a: &Value, b: &Value, tolerance: i64) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => (a - b).abs() <= tolerance,
        _ => a == b,
    }
}
