//! Loading the initial records from disk.

use crate::config::ConfigError;
use gridsync_engine::Record;
use std::path::Path;

/// Read a JSON array of records.
pub fn load_seed(path: &Path) -> Result<Vec<Record>, ConfigError> {
    let seed_error = |reason: String| ConfigError::Seed {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| seed_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| seed_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_record_array() {
        let path = std::env::temp_dir().join(format!("gridsync-seed-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"id": "a", "v": 1}]"#).unwrap();

        let records = load_seed(&path).unwrap();
        assert_eq!(records, vec![json!({"id": "a", "v": 1})]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_seed(Path::new("/nonexistent/gridsync-seed.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Seed { .. }));
    }
}
