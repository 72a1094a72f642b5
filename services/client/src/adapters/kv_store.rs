//! services/client/src/adapters/kv_store.rs
//!
//! A file-backed implementation of the `KeyValueStore` port: one JSON
//! file per well-known key inside the storage directory. This is the
//! durable home of the document-id and message maps between sessions.

use gutachter_core::{KeyValueStore, PortError, PortResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A store that keeps each key in its own file under a fixed directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates the store, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> PortResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| PortError::Unexpected(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed, well-known identifiers, but path separators must
        // never leak into the filename.
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", sanitized))
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> PortResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortError::Unexpected(format!(
                "cannot read stored key '{}': {}",
                key, e
            ))),
        }
    }

    fn save(&self, key: &str, value: &str) -> PortResult<()> {
        let path = self.path_for(key);
        // Write-then-rename so a crash mid-write never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        write_file(&tmp, value, key)?;
        fs::rename(&tmp, &path).map_err(|e| {
            PortError::Unexpected(format!("cannot persist key '{}': {}", key, e))
        })
    }
}

fn write_file(path: &Path, value: &str, key: &str) -> PortResult<()> {
    fs::write(path, value)
        .map_err(|e| PortError::Unexpected(format!("cannot write key '{}': {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempDir;

    #[test]
    fn missing_keys_load_as_none() {
        let tmp = TempDir::new("kv-missing");
        let store = JsonFileStore::new(tmp.path()).unwrap();
        assert_eq!(store.load("gutachter.document_ids").unwrap(), None);
    }

    #[test]
    fn saved_values_round_trip() {
        let tmp = TempDir::new("kv-roundtrip");
        let store = JsonFileStore::new(tmp.path()).unwrap();

        store
            .save("gutachter.messages", r#"{"version":1,"entries":{}}"#)
            .unwrap();
        assert_eq!(
            store.load("gutachter.messages").unwrap().as_deref(),
            Some(r#"{"version":1,"entries":{}}"#)
        );

        // Overwrites replace, they do not append.
        store.save("gutachter.messages", "{}").unwrap();
        assert_eq!(store.load("gutachter.messages").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn keys_with_separators_stay_inside_the_directory() {
        let tmp = TempDir::new("kv-sanitize");
        let store = JsonFileStore::new(tmp.path()).unwrap();
        store.save("../escape/attempt", "data").unwrap();
        assert_eq!(store.load("../escape/attempt").unwrap().as_deref(), Some("data"));
        assert!(tmp.path().join(".._escape_attempt.json").exists());
    }
}
