//! JSON Patch subset used to ship pending edits to a backend.
//!
//! Patches are always rooted at a flat map of record id to record, so a path
//! is either `/{id}` or `/{id}/{property}`. Segments are escaped as in
//! RFC 6901 (`~` as `~0`, `/` as `~1`).

use crate::{error::Result, record::property_value, Error, Record, RecordId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Test { path: String, value: Value },
}

impl PatchOp {
    /// Path targeted by this operation.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }

    /// Lower-case operation name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Test { .. } => "test",
        }
    }
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Path of a whole record.
pub fn record_path(id: &str) -> String {
    format!("/{}", escape(id))
}

/// Path of one property of a record.
pub fn property_path(id: &str, property: &str) -> String {
    format!("/{}/{}", escape(id), escape(property))
}

/// Split a patch path into record id and optional property name.
pub fn parse_path(path: &str) -> Result<(RecordId, Option<String>)> {
    let target = || Error::PatchTarget {
        path: path.to_string(),
    };

    let rest = path.strip_prefix('/').ok_or_else(target)?;
    let mut segments = rest.split('/');
    let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(target)?;
    let property = segments.next().map(unescape);
    if segments.next().is_some() || property.as_deref() == Some("") {
        return Err(target());
    }

    Ok((unescape(id), property))
}

/// Apply a patch to a keyed record set.
///
/// The patch is applied to a working copy which replaces `target` only when
/// every operation (including `test`s) succeeded, so a failed patch leaves
/// `target` untouched. Missing properties read as `null`.
pub fn apply_patch(target: &mut IndexMap<RecordId, Record>, patch: &[PatchOp]) -> Result<()> {
    let mut doc = target.clone();

    for op in patch {
        let (id, property) = parse_path(op.path())?;
        let missing = || Error::PatchTarget {
            path: op.path().to_string(),
        };

        match (op, property) {
            (PatchOp::Test { value, path }, None) => {
                if doc.get(&id) != Some(value) {
                    return Err(Error::PatchTest { path: path.clone() });
                }
            }
            (PatchOp::Test { value, path }, Some(property)) => {
                let record = doc.get(&id).ok_or_else(missing)?;
                if &property_value(record, &property) != value {
                    return Err(Error::PatchTest { path: path.clone() });
                }
            }
            (PatchOp::Add { value, .. }, None) => {
                doc.insert(id, value.clone());
            }
            (PatchOp::Replace { value, .. }, None) => {
                let slot = doc.get_mut(&id).ok_or_else(missing)?;
                *slot = value.clone();
            }
            (PatchOp::Remove { .. }, None) => {
                doc.shift_remove(&id).ok_or_else(missing)?;
            }
            (PatchOp::Add { value, .. } | PatchOp::Replace { value, .. }, Some(property)) => {
                let map = doc
                    .get_mut(&id)
                    .and_then(Value::as_object_mut)
                    .ok_or_else(missing)?;
                map.insert(property, value.clone());
            }
            (PatchOp::Remove { .. }, Some(property)) => {
                let map = doc
                    .get_mut(&id)
                    .and_then(Value::as_object_mut)
                    .ok_or_else(missing)?;
                map.remove(&property).ok_or_else(missing)?;
            }
        }
    }

    *target = doc;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> IndexMap<RecordId, Record> {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), json!({"id": "a", "v": 1}));
        map.insert("b".to_string(), json!({"id": "b", "v": 2}));
        map
    }

    #[test]
    fn wire_format() {
        let op = PatchOp::Test {
            path: property_path("a", "v"),
            value: json!(1),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json, json!({"op": "test", "path": "/a/v", "value": 1}));

        let parsed: PatchOp = serde_json::from_value(json!({"op": "remove", "path": "/b"})).unwrap();
        assert_eq!(parsed, PatchOp::Remove { path: "/b".into() });
    }

    #[test]
    fn path_escaping() {
        assert_eq!(property_path("a", "x/y~z"), "/a/x~1y~0z");
        let (id, property) = parse_path("/a/x~1y~0z").unwrap();
        assert_eq!(id, "a");
        assert_eq!(property.as_deref(), Some("x/y~z"));
    }

    #[test]
    fn malformed_paths() {
        assert!(parse_path("a").is_err());
        assert!(parse_path("/").is_err());
        assert!(parse_path("/a/b/c").is_err());
        assert!(parse_path("/a/").is_err());
    }

    #[test]
    fn apply_mixed_patch() {
        let mut doc = table();
        let patch = vec![
            PatchOp::Test {
                path: "/b".into(),
                value: json!({"id": "b", "v": 2}),
            },
            PatchOp::Remove { path: "/b".into() },
            PatchOp::Add {
                path: "/c".into(),
                value: json!({"id": "c", "v": 3}),
            },
            PatchOp::Test {
                path: "/a/v".into(),
                value: json!(1),
            },
            PatchOp::Replace {
                path: "/a/v".into(),
                value: json!(9),
            },
        ];

        apply_patch(&mut doc, &patch).unwrap();

        assert_eq!(doc.len(), 2);
        assert_eq!(doc["a"], json!({"id": "a", "v": 9}));
        assert_eq!(doc["c"], json!({"id": "c", "v": 3}));
    }

    #[test]
    fn failed_test_leaves_target_untouched() {
        let mut doc = table();
        let patch = vec![
            PatchOp::Remove { path: "/b".into() },
            PatchOp::Test {
                path: "/a/v".into(),
                value: json!(5),
            },
        ];

        let err = apply_patch(&mut doc, &patch).unwrap_err();
        assert_eq!(err, Error::PatchTest { path: "/a/v".into() });
        assert_eq!(doc, table());
    }

    #[test]
    fn remove_missing_record() {
        let mut doc = table();
        let err = apply_patch(&mut doc, &[PatchOp::Remove { path: "/zz".into() }]).unwrap_err();
        assert_eq!(err.key(), "PatchTarget");
    }
}
