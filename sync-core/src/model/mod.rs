//! Canonical board data model.
//!
//! A `Board` is a flat arena per collection (general/drawings/footprints/
//! vias); relationships (pads and 3D models inside a footprint) are
//! expressed by inclusion, never by back-pointers.

pub mod hash;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A stable opaque identifier, preserved across sync cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kiid(pub String);

/// Prefix marking a kiid minted on the MCAD side before the ECAD side
/// has assigned a permanent one.
pub const PROVISIONAL_PREFIX: &str = "added-in-peer_";

impl Kiid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Build a provisional kiid from the new entity's content hash.
    pub fn provisional(content_hash: &str) -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{content_hash}"))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Kiid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rotation normalized to `(-180, 180]` degrees (I4).
///
/// `Deserialize` is hand-written rather than `#[serde(transparent)]` so
/// that I4 holds for every wire-deserialized `Rotation`, not only ones
/// built through `Rotation::new` in-process: a raw degree value arriving
/// in a `PCB`/`DIF`/`REP` payload, or re-parsed out of a merged
/// `changed` entry in the Updater, is normalized on the way in rather
/// than trusting the sender to have normalized it already.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Rotation(f64);

impl Rotation {
    pub fn new(degrees: f64) -> Self {
        Self(normalize_degrees(degrees))
    }

    pub fn degrees(&self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Rotation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let degrees = f64::deserialize(deserializer)?;
        Ok(Rotation::new(degrees))
    }
}

/// Normalize an angle in degrees to `(-180, 180]`.
fn normalize_degrees(mut deg: f64) -> f64 {
    deg %= 360.0;
    if deg <= -180.0 {
        deg += 360.0;
    } else if deg > 180.0 {
        deg -= 360.0;
    }
    deg
}

/// A point in the canonical unit (nanometers).
pub type Point = [i64; 2];

/// A 2D entity that owns an identity and a content hash.
///
/// A small accessor trait at the seam where generic code
/// (differ/accumulator/merger/updater) needs to treat heterogeneous
/// record types uniformly, rather than dispatching on a type string.
pub trait Entity: Clone + Serialize + for<'de> Deserialize<'de> {
    fn kiid(&self) -> &Kiid;
    fn set_kiid(&mut self, kiid: Kiid);
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn hash_field(&self) -> &str;
    fn set_hash_field(&mut self, hash: String);

    /// Recompute and store this entity's content hash.
    fn recompute_hash(&mut self) {
        let h = hash::content_hash(self);
        self.set_hash_field(h);
    }
}

/// General board metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct General {
    pub pcb_name: String,
    /// 4-character random tag allowing multiple replicas of the same board.
    pub pcb_id: String,
    pub thickness: i64,
    pub kiid: Kiid,
    pub file_directory: String,
}

/// Layer a footprint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layer {
    Top,
    Bot,
}

/// A tagged drawing variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum Drawing {
    Line {
        start: Point,
        end: Point,
        #[serde(rename = "ID")]
        id: i64,
        kiid: Kiid,
        hash: String,
    },
    Rect {
        /// Canonical order: `points[0]` and `points[1]` are swapped once
        /// during scan so both tools produce the same hash.
        points: Vec<Point>,
        #[serde(rename = "ID")]
        id: i64,
        kiid: Kiid,
        hash: String,
    },
    Polygon {
        points: Vec<Point>,
        #[serde(rename = "ID")]
        id: i64,
        kiid: Kiid,
        hash: String,
    },
    Arc {
        /// `[start, mid, end]`.
        points: [Point; 3],
        #[serde(rename = "ID")]
        id: i64,
        kiid: Kiid,
        hash: String,
    },
    Circle {
        center: Point,
        radius: i64,
        #[serde(rename = "ID")]
        id: i64,
        kiid: Kiid,
        hash: String,
    },
}

impl Drawing {
    /// Swap `points[0]` and `points[1]` for `Rect`/`Polygon`.
    pub fn canonicalize_point_order(&mut self) {
        if let Drawing::Rect { points, .. } | Drawing::Polygon { points, .. } = self {
            if points.len() >= 2 {
                points.swap(0, 1);
            }
        }
    }
}

impl Entity for Drawing {
    fn kiid(&self) -> &Kiid {
        match self {
            Drawing::Line { kiid, .. }
            | Drawing::Rect { kiid, .. }
            | Drawing::Polygon { kiid, .. }
            | Drawing::Arc { kiid, .. }
            | Drawing::Circle { kiid, .. } => kiid,
        }
    }
    fn set_kiid(&mut self, new_kiid: Kiid) {
        match self {
            Drawing::Line { kiid, .. }
            | Drawing::Rect { kiid, .. }
            | Drawing::Polygon { kiid, .. }
            | Drawing::Arc { kiid, .. }
            | Drawing::Circle { kiid, .. } => *kiid = new_kiid,
        }
    }
    fn id(&self) -> i64 {
        match self {
            Drawing::Line { id, .. }
            | Drawing::Rect { id, .. }
            | Drawing::Polygon { id, .. }
            | Drawing::Arc { id, .. }
            | Drawing::Circle { id, .. } => *id,
        }
    }
    fn set_id(&mut self, new_id: i64) {
        match self {
            Drawing::Line { id, .. }
            | Drawing::Rect { id, .. }
            | Drawing::Polygon { id, .. }
            | Drawing::Arc { id, .. }
            | Drawing::Circle { id, .. } => *id = new_id,
        }
    }
    fn hash_field(&self) -> &str {
        match self {
            Drawing::Line { hash, .. }
            | Drawing::Rect { hash, .. }
            | Drawing::Polygon { hash, .. }
            | Drawing::Arc { hash, .. }
            | Drawing::Circle { hash, .. } => hash,
        }
    }
    fn set_hash_field(&mut self, new_hash: String) {
        match self {
            Drawing::Line { hash, .. }
            | Drawing::Rect { hash, .. }
            | Drawing::Polygon { hash, .. }
            | Drawing::Arc { hash, .. }
            | Drawing::Circle { hash, .. } => *hash = new_hash,
        }
    }
}

/// A through-hole pad inside a footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pad {
    pub pos_delta: Point,
    /// `[major, minor]` hole diameters.
    pub hole_size: [i64; 2],
    pub kiid: Kiid,
    pub hash: String,
}

/// A 3D model placement inside a footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model3D {
    /// Zero-padded string identifier, unique within the footprint.
    pub model_id: String,
    pub filename: String,
    /// Offset in millimeters.
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    /// Rotation in degrees per axis.
    pub rot: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_path: Option<String>,
}

/// A footprint, with optional through-hole pads and 3D models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footprint {
    #[serde(rename = "ref")]
    pub reference: String,
    pub pos: Point,
    pub rot: Rotation,
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pads_pth: Option<Vec<Pad>>,
    #[serde(rename = "3d_models", default, skip_serializing_if = "Option::is_none")]
    pub models_3d: Option<Vec<Model3D>>,
    #[serde(rename = "ID")]
    pub id: i64,
    pub kiid: Kiid,
    pub hash: String,
}

impl Entity for Footprint {
    fn kiid(&self) -> &Kiid {
        &self.kiid
    }
    fn set_kiid(&mut self, kiid: Kiid) {
        self.kiid = kiid;
    }
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn hash_field(&self) -> &str {
        &self.hash
    }
    fn set_hash_field(&mut self, hash: String) {
        self.hash = hash;
    }
}

/// A via.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Via {
    pub center: Point,
    pub radius: i64,
    #[serde(rename = "ID")]
    pub id: i64,
    pub kiid: Kiid,
    pub hash: String,
}

impl Entity for Via {
    fn kiid(&self) -> &Kiid {
        &self.kiid
    }
    fn set_kiid(&mut self, kiid: Kiid) {
        self.kiid = kiid;
    }
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn hash_field(&self) -> &str {
        &self.hash
    }
    fn set_hash_field(&mut self, hash: String) {
        self.hash = hash;
    }
}

/// The full board document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub general: General,
    #[serde(default)]
    pub drawings: Vec<Drawing>,
    #[serde(default)]
    pub footprints: Vec<Footprint>,
    #[serde(default)]
    pub vias: Vec<Via>,
}

/// In-memory container over a `Board`, with stable-identity accessors.
/// A `Board` is destroyed when the session ends — there is no
/// persistence.
#[derive(Debug, Clone)]
pub struct BoardModel {
    pub board: Board,
}

impl BoardModel {
    pub fn new(board: Board) -> Self {
        Self { board }
    }

    /// Find an entity in `collection` by stable kiid.
    pub fn lookup_by_kiid<'a, T: Entity>(collection: &'a [T], kiid: &Kiid) -> Option<&'a T> {
        collection.iter().find(|e| e.kiid() == kiid)
    }

    /// Find an entity in `collection` by stable kiid, mutably.
    pub fn lookup_by_kiid_mut<'a, T: Entity>(
        collection: &'a mut [T],
        kiid: &Kiid,
    ) -> Option<&'a mut T> {
        collection.iter_mut().find(|e| e.kiid() == kiid)
    }

    /// Replace the entry with the same kiid, or append if none exists.
    pub fn upsert<T: Entity>(collection: &mut Vec<T>, entity: T) {
        if let Some(slot) = collection.iter_mut().find(|e| e.kiid() == entity.kiid()) {
            *slot = entity;
        } else {
            collection.push(entity);
        }
    }

    /// Remove the entry with the given kiid, if present.
    pub fn remove<T: Entity>(collection: &mut Vec<T>, kiid: &Kiid) {
        collection.retain(|e| e.kiid() != kiid);
    }

    /// The next sequential `ID` for a collection: `(max ID + 1)`, or `1`
    /// if the collection is empty.
    pub fn next_id<T: Entity>(collection: &[T]) -> i64 {
        collection.iter().map(Entity::id).max().unwrap_or(0) + 1
    }

    /// Digest of a canonical serialization of the whole board.
    pub fn hash_board(&self) -> String {
        hash::board_hash(&self.board)
    }

    /// Verify the hash-fixpoint invariant for every entity in every
    /// collection: `hash(e \ {hash,ID,kiid}) == e.hash`.
    pub fn check_hash_fixpoint(&self) -> Result<(), SyncError> {
        for d in &self.board.drawings {
            check_one(d)?;
        }
        for f in &self.board.footprints {
            check_one(f)?;
        }
        for v in &self.board.vias {
            check_one(v)?;
        }
        Ok(())
    }
}

fn check_one<T: Entity>(e: &T) -> Result<(), SyncError> {
    let expected = hash::content_hash(e);
    if expected != e.hash_field() {
        return Err(SyncError::AdapterFailure {
            entity_kiid: e.kiid().to_string(),
            reason: format!("hash fixpoint violated: expected {expected}, stored {}", e.hash_field()),
        });
    }
    Ok(())
}

/// Assert uniqueness of kiids within a collection.
pub fn assert_unique_kiids<T: Entity>(collection: &[T]) -> bool {
    let mut seen = std::collections::HashSet::new();
    collection.iter().all(|e| seen.insert(e.kiid().clone()))
}

/// Models-path roots from configuration, for resolving relative 3D-model
/// filenames. Kept here since it
/// travels with the board model the differ/updater work against.
pub type ModelsPath = HashMap<String, std::path::PathBuf>;
