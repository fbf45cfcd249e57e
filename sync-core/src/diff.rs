//! The `Diff` record shape shared by the Differ, DiffAccumulator, Merger,
//! and Updater.
//!
//! `CollectionDiff::changed` decodes either the standardized dict shape
//! `[{kiid: {prop: value}}]` or the legacy list-of-pairs shape
//! `[{kiid: [[prop, value], ...]}]` still emitted by older scanners,
//! normalizing the legacy form into the dict form on decode.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::model::{Drawing, Footprint, Kiid, Via};

/// One `{kiid: {prop: new_value, ...}}` entry of a `CollectionDiff::changed`
/// list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedEntry {
    pub kiid: Kiid,
    pub changes: BTreeMap<String, Value>,
}

impl ChangedEntry {
    pub fn new(kiid: Kiid, changes: BTreeMap<String, Value>) -> Self {
        Self { kiid, changes }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(obj) = value else {
            return Err("changed entry must be a JSON object".to_string());
        };
        if obj.len() != 1 {
            return Err(format!(
                "changed entry must carry exactly one kiid key, got {}",
                obj.len()
            ));
        }
        let (kiid_str, inner) = obj.into_iter().next().expect("checked len == 1");
        let changes = normalize_changes(inner)?;
        Ok(ChangedEntry {
            kiid: Kiid::new(kiid_str),
            changes,
        })
    }
}

/// Normalize a `changed[kiid]` value into the standardized dict shape,
/// accepting the legacy `[[key, value], ...]` list shape too.
fn normalize_changes(value: Value) -> Result<BTreeMap<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(pairs) => {
            let mut out = BTreeMap::new();
            for pair in pairs {
                let Value::Array(kv) = pair else {
                    return Err("legacy changed-list entry must be a [key, value] pair".to_string());
                };
                if kv.len() != 2 {
                    return Err("legacy changed-list entry must have exactly 2 elements".to_string());
                }
                let key = kv[0]
                    .as_str()
                    .ok_or("legacy changed-list key must be a string")?
                    .to_string();
                out.insert(key, kv[1].clone());
            }
            Ok(out)
        }
        other => Err(format!(
            "changed entry value must be an object or a [[key,value],...] list, got {other}"
        )),
    }
}

impl Serialize for ChangedEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.kiid.as_str(), &self.changes)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChangedEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ChangedEntry::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Per-collection `{added?, changed?, removed?}` delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDiff<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<Vec<ChangedEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<Kiid>>,
}

impl<T> Default for CollectionDiff<T> {
    fn default() -> Self {
        Self {
            added: None,
            changed: None,
            removed: None,
        }
    }
}

impl<T> CollectionDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.as_ref().is_none_or(Vec::is_empty)
            && self.changed.as_ref().is_none_or(Vec::is_empty)
            && self.removed.as_ref().is_none_or(Vec::is_empty)
    }

    pub fn push_added(&mut self, entity: T) {
        self.added.get_or_insert_with(Vec::new).push(entity);
    }

    pub fn push_removed(&mut self, kiid: Kiid) {
        self.removed.get_or_insert_with(Vec::new).push(kiid);
    }

    pub fn as_added(&self) -> &[T] {
        self.added.as_deref().unwrap_or(&[])
    }

    pub fn as_changed(&self) -> &[ChangedEntry] {
        self.changed.as_deref().unwrap_or(&[])
    }

    pub fn as_removed(&self) -> &[Kiid] {
        self.removed.as_deref().unwrap_or(&[])
    }
}

/// The full per-cycle (or accumulated) diff record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawings: Option<CollectionDiff<Drawing>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprints: Option<CollectionDiff<Footprint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vias: Option<CollectionDiff<Via>>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.drawings.as_ref().is_none_or(CollectionDiff::is_empty)
            && self.footprints.as_ref().is_none_or(CollectionDiff::is_empty)
            && self.vias.as_ref().is_none_or(CollectionDiff::is_empty)
    }

    pub fn drawings_mut(&mut self) -> &mut CollectionDiff<Drawing> {
        self.drawings.get_or_insert_with(CollectionDiff::default)
    }

    pub fn footprints_mut(&mut self) -> &mut CollectionDiff<Footprint> {
        self.footprints.get_or_insert_with(CollectionDiff::default)
    }

    pub fn vias_mut(&mut self) -> &mut CollectionDiff<Via> {
        self.vias.get_or_insert_with(CollectionDiff::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changed_entry_round_trips_dict_shape() {
        let entry = ChangedEntry::new(
            Kiid::new("k1"),
            BTreeMap::from([("rot".to_string(), json!(90))]),
        );
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v, json!({"k1": {"rot": 90}}));
        let back: ChangedEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn changed_entry_normalizes_legacy_list_shape() {
        let v = json!({"k1": [["rot", 90], ["pos", [1, 2]]]});
        let entry: ChangedEntry = serde_json::from_value(v).unwrap();
        assert_eq!(entry.kiid, Kiid::new("k1"));
        assert_eq!(entry.changes.get("rot"), Some(&json!(90)));
        assert_eq!(entry.changes.get("pos"), Some(&json!([1, 2])));
    }

    #[test]
    fn changed_entry_rejects_multi_key_object() {
        let v = json!({"k1": {}, "k2": {}});
        let err = serde_json::from_value::<ChangedEntry>(v).unwrap_err();
        assert!(err.to_string().contains("exactly one kiid key"));
    }
}
