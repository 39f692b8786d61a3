//! Record types and the projection of edits onto them.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A schema-free keyed row. One property (the source's `id_property`) holds
/// the [`RecordId`].
pub type Record = Value;

/// How a record differs from what the accessor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    /// No pending edit
    Unchanged,
    /// Created locally, unknown to the accessor
    Added,
    /// One or more properties changed locally
    Updated,
    /// Removed locally
    Removed,
}

/// A record with its pending edits applied.
///
/// `original` is what the accessor holds, `edited` is what the user sees.
/// They are never both `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedRecord {
    /// Identifier of the record
    pub record_id: RecordId,
    /// Edit status
    pub edit_status: EditStatus,
    /// Record as stored by the accessor (absent for added records)
    pub original: Option<Record>,
    /// Record as edited locally (absent for removed records)
    pub edited: Option<Record>,
}

impl EditedRecord {
    /// A record with no pending edit.
    pub fn unchanged(record_id: impl Into<RecordId>, record: Record) -> Self {
        Self {
            record_id: record_id.into(),
            edit_status: EditStatus::Unchanged,
            original: Some(record.clone()),
            edited: Some(record),
        }
    }

    /// A record that only exists locally.
    pub fn added(record_id: impl Into<RecordId>, record: Record) -> Self {
        Self {
            record_id: record_id.into(),
            edit_status: EditStatus::Added,
            original: None,
            edited: Some(record),
        }
    }

    /// A record removed locally.
    pub fn removed(record_id: impl Into<RecordId>, original: Record) -> Self {
        Self {
            record_id: record_id.into(),
            edit_status: EditStatus::Removed,
            original: Some(original),
            edited: None,
        }
    }

    /// A record with locally replaced values.
    pub fn updated(record_id: impl Into<RecordId>, original: Record, edited: Record) -> Self {
        Self {
            record_id: record_id.into(),
            edit_status: EditStatus::Updated,
            original: Some(original),
            edited: Some(edited),
        }
    }

    /// The record to display: the edited one, or the original for removals.
    pub fn current(&self) -> &Record {
        match (&self.edited, &self.original) {
            (Some(edited), _) => edited,
            (None, Some(original)) => original,
            (None, None) => &Value::Null,
        }
    }

    /// Whether the row is still visible (not removed).
    pub fn is_visible(&self) -> bool {
        self.edit_status != EditStatus::Removed
    }
}

/// Read the record id held in `id_property`.
///
/// Ids must be strings without `/`, which is reserved for patch paths.
pub fn record_id_of(record: &Record, id_property: &str) -> Result<RecordId> {
    let value = record
        .get(id_property)
        .ok_or_else(|| Error::NotFoundIdProperty {
            property: id_property.to_string(),
        })?;

    match value {
        Value::String(id) if !id.contains('/') => Ok(id.clone()),
        other => Err(Error::IllegalTypeDataId {
            property: id_property.to_string(),
            found: other.to_string(),
        }),
    }
}

/// Value of a property, with missing properties reading as `null`.
pub fn property_value(record: &Record, property: &str) -> Value {
    record.get(property).cloned().unwrap_or(Value::Null)
}

/// Return a copy of `record` with `property` set to `value`.
pub(crate) fn with_property(record: &Record, property: &str, value: Value) -> Record {
    let mut copy = record.clone();
    if let Some(map) = copy.as_object_mut() {
        map.insert(property.to_string(), value);
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_record_id() {
        let record = json!({"id": "a", "v": 1});
        assert_eq!(record_id_of(&record, "id").unwrap(), "a");
    }

    #[test]
    fn missing_id_property() {
        let err = record_id_of(&json!({"v": 1}), "id").unwrap_err();
        assert_eq!(err.key(), "NotFoundIdProperty");
    }

    #[test]
    fn illegal_id_values() {
        let err = record_id_of(&json!({"id": 3}), "id").unwrap_err();
        assert_eq!(err.key(), "IllegalTypeDataId");

        let err = record_id_of(&json!({"id": "a/b"}), "id").unwrap_err();
        assert_eq!(err.key(), "IllegalTypeDataId");
    }

    #[test]
    fn current_prefers_edited() {
        let edited = EditedRecord::updated("a", json!({"id": "a", "v": 1}), json!({"id": "a", "v": 2}));
        assert_eq!(edited.current()["v"], 2);

        let removed = EditedRecord::removed("a", json!({"id": "a", "v": 1}));
        assert_eq!(removed.current()["v"], 1);
        assert!(!removed.is_visible());
    }

    #[test]
    fn serialization_uses_camel_case() {
        let edited = EditedRecord::added("a", json!({"id": "a"}));
        let json = serde_json::to_value(&edited).unwrap();
        assert_eq!(json["recordId"], "a");
        assert_eq!(json["editStatus"], "added");
        assert!(json["original"].is_null());
    }
}
