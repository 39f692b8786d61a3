//! Snapshot types for persisting and restoring pending edits.
//!
//! A grid can be closed with uncommitted edits; the snapshot lets the host
//! store them and hand them back to a new [`DataSource`](crate::DataSource).
//! Maps are insertion-ordered so serialization is deterministic.

use crate::{
    error::Result,
    ledger::{LedgerMaps, ReplacedRecord, ValueChange},
    EditLedger, Error, Record, RecordId,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of an [`EditLedger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Id property of the ledger that produced the snapshot
    pub id_property: String,
    /// Locally created records
    pub added: IndexMap<RecordId, Record>,
    /// Pre-removal snapshots
    pub removed: IndexMap<RecordId, Record>,
    /// Per-property replacements
    pub replaced_values: IndexMap<RecordId, IndexMap<String, ValueChange>>,
    /// Whole-record replacements
    pub replaced_records: IndexMap<RecordId, ReplacedRecord>,
}

impl LedgerSnapshot {
    /// Capture the current state of a ledger.
    pub fn capture(ledger: &EditLedger) -> Self {
        let maps = ledger.maps.clone();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            id_property: ledger.id_property().to_string(),
            added: maps.added,
            removed: maps.removed,
            replaced_values: maps.replaced_values,
            replaced_records: maps.replaced_records,
        }
    }

    /// Count of ids with a pending edit.
    pub fn edit_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.replaced_values.len()
    }

    /// Check the ledger invariants hold for this snapshot.
    pub fn validate(&self, id_property: &str) -> Result<()> {
        if self.id_property != id_property {
            return Err(Error::InvalidSnapshot(format!(
                "id property mismatch: expected '{}', got '{}'",
                id_property, self.id_property
            )));
        }

        if let Some(id) = self.added.keys().find(|id| self.removed.contains_key(*id)) {
            return Err(Error::InvalidSnapshot(format!(
                "record {id} is both added and removed"
            )));
        }

        let same_keys = self.replaced_values.len() == self.replaced_records.len()
            && self
                .replaced_values
                .keys()
                .all(|id| self.replaced_records.contains_key(id));
        if !same_keys {
            return Err(Error::InvalidSnapshot(
                "replaced values and replaced records disagree".to_string(),
            ));
        }

        if let Some(id) = self.replaced_values.iter().find_map(|(id, changes)| {
            let collapsed = changes.is_empty()
                || changes.values().any(|c| c.original_value == c.new_value);
            collapsed.then_some(id)
        }) {
            return Err(Error::InvalidSnapshot(format!(
                "record {id} holds a no-op replacement"
            )));
        }

        Ok(())
    }

    /// Rebuild a ledger from this snapshot.
    pub fn into_ledger(self, id_property: &str) -> Result<EditLedger> {
        self.validate(id_property)?;
        let maps = LedgerMaps {
            added: self.added,
            removed: self.removed,
            replaced_values: self.replaced_values,
            replaced_records: self.replaced_records,
        };
        Ok(EditLedger::from_maps(self.id_property, maps))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edited_ledger() -> EditLedger {
        let mut ledger = EditLedger::new("id");
        ledger.add_data(json!({"id": "n", "v": 0})).unwrap();
        ledger.remove_data(json!({"id": "b", "v": 2})).unwrap();
        ledger
            .replace_value(&json!({"id": "a", "v": 1}), "v", json!(9))
            .unwrap();
        ledger
    }

    #[test]
    fn json_roundtrip_restores_ledger() {
        let ledger = edited_ledger();
        let json = LedgerSnapshot::capture(&ledger).to_json().unwrap();

        let restored = LedgerSnapshot::from_json(&json)
            .unwrap()
            .into_ledger("id")
            .unwrap();
        assert_eq!(restored.calc_patch(), ledger.calc_patch());
    }

    #[test]
    fn id_property_mismatch() {
        let snapshot = LedgerSnapshot::capture(&edited_ledger());
        let err = snapshot.into_ledger("key").unwrap_err();
        assert_eq!(err.key(), "InvalidSnapshot");
    }

    #[test]
    fn rejects_future_format() {
        let mut snapshot = LedgerSnapshot::capture(&edited_ledger());
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(LedgerSnapshot::from_json(&json).is_err());
    }

    #[test]
    fn rejects_added_and_removed() {
        let mut snapshot = LedgerSnapshot::capture(&edited_ledger());
        snapshot.removed.insert("n".into(), json!({"id": "n"}));
        assert!(snapshot.validate("id").is_err());
    }

    #[test]
    fn edit_count() {
        let snapshot = LedgerSnapshot::capture(&edited_ledger());
        assert_eq!(snapshot.edit_count(), 3);
    }
}
