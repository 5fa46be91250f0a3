//! Target map management: load the previous run's map, save the current one (atomic).

use super::error::{Error, Result};
use super::types::{ParentTargetMap, Target, TargetMapEntry};
use std::path::{Path, PathBuf};

/// File name of the target map within an output directory.
pub const TARGET_MAP_FILE: &str = "target-map.json";

/// Load the target map of a previous run. A missing file yields an empty map.
pub fn load_target_map(path: &Path) -> Result<ParentTargetMap> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no parent target map, building everything");
        return Ok(ParentTargetMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let map: ParentTargetMap =
        serde_json::from_str(&content).map_err(|e| Error::TargetMap {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::debug!(path = %path.display(), entries = map.len(), "loaded parent target map");
    Ok(map)
}

/// The target map describing a set of targets.
pub fn target_map(targets: &[Target]) -> ParentTargetMap {
    targets
        .iter()
        .map(|t| {
            (
                t.label.clone(),
                TargetMapEntry {
                    descriptor: t.descriptor.clone(),
                    key: Some(t.key.clone()),
                },
            )
        })
        .collect()
}

/// Save a target map atomically (write to temp, then rename).
pub fn save_target_map(path: &Path, map: &ParentTargetMap) -> Result<()> {
    let json = serde_json::to_string_pretty(map).map_err(|e| Error::Serialize(e.to_string()))?;
    write_atomic(path, json.as_bytes())
}

/// Write a file atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }

    let tmp_path = temp_path(path);
    std::fs::write(&tmp_path, contents).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Sibling path a file is staged at before being renamed into place.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_targets() -> Vec<Target> {
        vec![
            Target::new(vec!["a".to_string()], None, "blake3:aaa".to_string(), None),
            Target::new(
                vec!["a".to_string()],
                Some("test".to_string()),
                "blake3:bbb".to_string(),
                None,
            ),
        ]
    }

    #[test]
    fn test_missing_map_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = load_target_map(&dir.path().join(TARGET_MAP_FILE)).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(TARGET_MAP_FILE);
        let map = target_map(&make_targets());
        save_target_map(&path, &map).unwrap();

        let loaded = load_target_map(&path).unwrap();
        assert_eq!(loaded, map);
        assert_eq!(loaded["a:test"].descriptor, "blake3:bbb");
        assert_eq!(
            loaded.keys().collect::<Vec<_>>(),
            vec!["a", "a:test"]
        );
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TARGET_MAP_FILE);
        save_target_map(&path, &target_map(&make_targets())).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("target-map.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_map_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TARGET_MAP_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let err = load_target_map(&path).unwrap_err();
        assert!(matches!(err, Error::TargetMap { .. }));
        assert!(!err.is_config());
    }

    #[test]
    fn test_map_without_keys_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TARGET_MAP_FILE);
        std::fs::write(&path, r#"{"a": {"descriptor": "blake3:aaa"}}"#).unwrap();
        let map = load_target_map(&path).unwrap();
        assert_eq!(map["a"].descriptor, "blake3:aaa");
    }
}
