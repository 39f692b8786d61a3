//! The edit ledger: uncommitted edits tracked independently of storage order.
//!
//! Every pending edit is keyed by record id in one of four insertion-ordered
//! maps. The ledger never holds the full dataset; instead it projects itself
//! onto whatever records an accessor returns ([`EditLedger::apply_data`]) and
//! emits the difference as a JSON Patch ([`EditLedger::calc_patch`]).
//!
//! # Invariants
//!
//! - An id is never both `added` and `removed`.
//! - `replaced_values` and `replaced_records` always have the same keys.
//! - A `replaced_values` entry never holds a property whose new value equals
//!   its original value; an entry with no properties left is dropped.

use crate::{
    error::Result,
    patch::{property_path, record_path, PatchOp},
    record::{property_value, record_id_of, with_property},
    EditStatus, EditedRecord, Error, Record, RecordId,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Original and current value of one replaced property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange {
    pub original_value: Value,
    pub new_value: Value,
}

/// Whole-record view of a replaced record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacedRecord {
    pub original: Record,
    pub edited: Record,
}

/// The four edit maps. Cloned wholesale for multi-edit snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LedgerMaps {
    pub(crate) added: IndexMap<RecordId, Record>,
    pub(crate) removed: IndexMap<RecordId, Record>,
    pub(crate) replaced_values: IndexMap<RecordId, IndexMap<String, ValueChange>>,
    pub(crate) replaced_records: IndexMap<RecordId, ReplacedRecord>,
}

impl LedgerMaps {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.replaced_values.is_empty()
    }
}

/// Tracker of uncommitted add/remove/replace edits.
#[derive(Debug, Clone)]
pub struct EditLedger {
    id_property: String,
    pub(crate) maps: LedgerMaps,
    multi_edit: Vec<LedgerMaps>,
}

impl EditLedger {
    /// Create an empty ledger keyed by `id_property`.
    pub fn new(id_property: impl Into<String>) -> Self {
        Self {
            id_property: id_property.into(),
            maps: LedgerMaps::default(),
            multi_edit: Vec::new(),
        }
    }

    pub(crate) fn from_maps(id_property: String, maps: LedgerMaps) -> Self {
        Self {
            id_property,
            maps,
            multi_edit: Vec::new(),
        }
    }

    /// Name of the property holding record ids.
    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    /// Derive the id of a record.
    pub fn get_data_id(&self, record: &Record) -> Result<RecordId> {
        record_id_of(record, &self.id_property)
    }

    /// Record a locally created record.
    ///
    /// Adding an id that is currently removed is treated as a re-add: the
    /// difference against the removed snapshot becomes a replacement.
    pub fn add_data(&mut self, record: Record) -> Result<()> {
        let id = self.get_data_id(&record)?;

        if self.maps.added.contains_key(&id) || self.maps.replaced_values.contains_key(&id) {
            return Err(Error::DuplicateDataId(id));
        }

        if let Some(snapshot) = self.maps.removed.shift_remove(&id) {
            let changes = diff_properties(&snapshot, &record);
            if !changes.is_empty() {
                self.maps.replaced_values.insert(id.clone(), changes);
                self.maps.replaced_records.insert(
                    id,
                    ReplacedRecord {
                        original: snapshot,
                        edited: record,
                    },
                );
            }
            return Ok(());
        }

        self.maps.added.insert(id, record);
        Ok(())
    }

    /// Record the removal of a record.
    pub fn remove_data(&mut self, record: Record) -> Result<()> {
        let id = self.get_data_id(&record)?;

        // Removing an added record just cancels the add
        if self.maps.added.shift_remove(&id).is_some() {
            return Ok(());
        }

        if self.maps.removed.contains_key(&id) {
            return Err(Error::UpdateRemovedData(id));
        }

        let snapshot = match self.maps.replaced_values.shift_remove(&id) {
            Some(changes) => {
                self.maps.replaced_records.shift_remove(&id);
                overlay(&record, &changes, |c| &c.original_value)
            }
            None => record,
        };

        self.maps.removed.insert(id, snapshot);
        Ok(())
    }

    /// Replace one property of a record.
    ///
    /// `old_record` must carry the value the ledger currently believes the
    /// property has; anything else means the caller edited a stale record.
    pub fn replace_value(
        &mut self,
        old_record: &Record,
        property: &str,
        new_value: Value,
    ) -> Result<()> {
        let id = self.get_data_id(old_record)?;

        if self.maps.removed.contains_key(&id) {
            return Err(Error::UpdateRemovedData(id));
        }

        let old_value = property_value(old_record, property);
        let inconsistent = || Error::InconsistentUpdate {
            id: id.clone(),
            property: property.to_string(),
        };

        if let Some(added) = self.maps.added.get_mut(&id) {
            if property_value(added, property) != old_value {
                return Err(inconsistent());
            }
            if let Some(map) = added.as_object_mut() {
                map.insert(property.to_string(), new_value);
            }
            return Ok(());
        }

        let believed = self
            .maps
            .replaced_values
            .get(&id)
            .and_then(|changes| changes.get(property))
            .map(|change| &change.new_value);
        if believed.is_some_and(|value| *value != old_value) {
            return Err(inconsistent());
        }

        if old_value == new_value {
            return Ok(());
        }

        let base = match self.maps.replaced_records.get(&id) {
            Some(replaced) => replaced.original.clone(),
            None => old_record.clone(),
        };

        let changes = self.maps.replaced_values.entry(id.clone()).or_default();
        match changes.get_mut(property) {
            Some(change) => {
                change.new_value = new_value;
                if change.new_value == change.original_value {
                    changes.shift_remove(property);
                }
            }
            None => {
                changes.insert(
                    property.to_string(),
                    ValueChange {
                        original_value: old_value,
                        new_value,
                    },
                );
            }
        }

        if changes.is_empty() {
            self.maps.replaced_values.shift_remove(&id);
            self.maps.replaced_records.shift_remove(&id);
        } else {
            let replaced = ReplacedRecord {
                original: overlay(&base, changes, |c| &c.original_value),
                edited: overlay(&base, changes, |c| &c.new_value),
            };
            self.maps.replaced_records.insert(id, replaced);
        }

        Ok(())
    }

    /// Project pending edits onto a record returned by an accessor.
    pub fn apply_data(&self, record: &Record) -> Result<EditedRecord> {
        let id = self.get_data_id(record)?;

        if let Some(added) = self.maps.added.get(&id) {
            return Ok(EditedRecord::added(id, added.clone()));
        }
        if self.maps.removed.contains_key(&id) {
            return Ok(EditedRecord::removed(id, record.clone()));
        }
        if let Some(changes) = self.maps.replaced_values.get(&id) {
            let original = overlay(record, changes, |c| &c.original_value);
            let edited = overlay(record, changes, |c| &c.new_value);
            return Ok(EditedRecord::updated(id, original, edited));
        }

        Ok(EditedRecord::unchanged(id, record.clone()))
    }

    /// What the ledger alone knows about an id, without an accessor record.
    pub fn project_id(&self, id: &str) -> Option<EditedRecord> {
        if let Some(added) = self.maps.added.get(id) {
            return Some(EditedRecord::added(id, added.clone()));
        }
        if let Some(snapshot) = self.maps.removed.get(id) {
            return Some(EditedRecord::removed(id, snapshot.clone()));
        }
        self.maps
            .replaced_records
            .get(id)
            .map(|r| EditedRecord::updated(id, r.original.clone(), r.edited.clone()))
    }

    /// Edit status of an id.
    pub fn status_of(&self, id: &str) -> EditStatus {
        if self.maps.added.contains_key(id) {
            EditStatus::Added
        } else if self.maps.removed.contains_key(id) {
            EditStatus::Removed
        } else if self.maps.replaced_values.contains_key(id) {
            EditStatus::Updated
        } else {
            EditStatus::Unchanged
        }
    }

    /// Build the patch that applies every pending edit.
    ///
    /// Order is fixed: removals, then additions, then replacements.
    pub fn calc_patch(&self) -> Vec<PatchOp> {
        let mut patch = Vec::new();

        for (id, snapshot) in &self.maps.removed {
            let path = record_path(id);
            patch.push(PatchOp::Test {
                path: path.clone(),
                value: snapshot.clone(),
            });
            patch.push(PatchOp::Remove { path });
        }

        for (id, record) in &self.maps.added {
            patch.push(PatchOp::Add {
                path: record_path(id),
                value: record.clone(),
            });
        }

        for (id, changes) in &self.maps.replaced_values {
            for (property, change) in changes {
                let path = property_path(id, property);
                patch.push(PatchOp::Test {
                    path: path.clone(),
                    value: change.original_value.clone(),
                });
                patch.push(PatchOp::Replace {
                    path,
                    value: change.new_value.clone(),
                });
            }
        }

        patch
    }

    /// Whether any edit is pending.
    pub fn has_change(&self) -> bool {
        !self.maps.is_empty()
    }

    /// Records created locally, in creation order.
    pub fn get_added_data_set(&self) -> Vec<Record> {
        self.maps.added.values().cloned().collect()
    }

    /// Added records as edited records, in creation order.
    pub fn added_records(&self) -> Vec<EditedRecord> {
        self.maps
            .added
            .iter()
            .map(|(id, record)| EditedRecord::added(id.clone(), record.clone()))
            .collect()
    }

    /// Number of locally created records.
    pub fn added_count(&self) -> usize {
        self.maps.added.len()
    }

    /// Snapshots of removed records, in removal order.
    pub fn get_removed_data_set(&self) -> Vec<Record> {
        self.maps.removed.values().cloned().collect()
    }

    /// Original/edited pairs of replaced records.
    pub fn get_replaced_data_set(&self) -> Vec<ReplacedRecord> {
        self.maps.replaced_records.values().cloned().collect()
    }

    /// Per-property changes of one replaced record.
    pub fn replaced_values(&self, id: &str) -> Option<&IndexMap<String, ValueChange>> {
        self.maps.replaced_values.get(id)
    }

    /// Ids with any pending edit.
    pub fn changed_ids(&self) -> Vec<RecordId> {
        self.maps
            .removed
            .keys()
            .chain(self.maps.added.keys())
            .chain(self.maps.replaced_values.keys())
            .cloned()
            .collect()
    }

    /// Drop every pending edit.
    pub fn clear(&mut self) {
        self.maps = LedgerMaps::default();
        self.multi_edit.clear();
    }

    /// Start a group of edits that can be undone as a whole.
    pub fn begin_multi_edit(&mut self) {
        self.multi_edit.push(self.maps.clone());
    }

    /// Keep every edit made since the matching `begin_multi_edit`.
    pub fn end_multi_edit(&mut self) {
        self.multi_edit.pop();
    }

    /// Restore the state at the matching `begin_multi_edit`.
    pub fn cancel_multi_edit(&mut self) {
        if let Some(maps) = self.multi_edit.pop() {
            self.maps = maps;
        }
    }

    /// Whether a multi-edit group is open.
    pub fn in_multi_edit(&self) -> bool {
        !self.multi_edit.is_empty()
    }
}

/// Copy `record` with every changed property set to the selected value.
fn overlay(
    record: &Record,
    changes: &IndexMap<String, ValueChange>,
    pick: impl Fn(&ValueChange) -> &Value,
) -> Record {
    changes.iter().fold(record.clone(), |acc, (property, change)| {
        with_property(&acc, property, pick(change).clone())
    })
}

/// Per-property difference between two records.
fn diff_properties(original: &Record, edited: &Record) -> IndexMap<String, ValueChange> {
    let empty = serde_json::Map::new();
    let before = original.as_object().unwrap_or(&empty);
    let after = edited.as_object().unwrap_or(&empty);

    before
        .keys()
        .chain(after.keys().filter(|k| !before.contains_key(*k)))
        .filter_map(|property| {
            let original_value = property_value(original, property);
            let new_value = property_value(edited, property);
            (original_value != new_value).then(|| {
                (
                    property.clone(),
                    ValueChange {
                        original_value,
                        new_value,
                    },
                )
            })
        })
        .collect()
}
