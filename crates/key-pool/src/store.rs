//! Durable usage-state file
//!
//! A JSON object mapping each key to its `KeyUsage`, read fully when the pool
//! opens and rewritten fully after every mutation. Writes go to a temp file
//! that is renamed over the target, so a crash never leaves a torn file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::usage::KeyUsage;

/// Location of the usage-state file, or none for in-memory operation.
#[derive(Debug, Clone)]
pub struct UsageStore {
    path: Option<PathBuf>,
}

impl UsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the whole state file. A missing file is an empty state.
    pub async fn load(&self) -> Result<HashMap<String, KeyUsage>> {
        let Some(path) = &self.path else {
            return Ok(HashMap::new());
        };

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "usage state file not found, starting empty");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };

        let state: HashMap<String, KeyUsage> = serde_json::from_str(&contents)
            .map_err(|e| Error::Persistence(format!("parsing {}: {e}", path.display())))?;
        info!(path = %path.display(), keys = state.len(), "loaded usage state");
        Ok(state)
    }

    /// Rewrite the whole state file.
    pub async fn save(&self, state: &HashMap<String, KeyUsage>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // sorted for stable diffs between runs
        let ordered: BTreeMap<&String, &KeyUsage> = state.iter().collect();
        write_atomic(path, &ordered).await
    }
}

/// Write the state to a temp file in the same directory, then rename it over
/// the target. Permissions are 0600 on unix since the keys are secrets.
async fn write_atomic(path: &Path, data: &BTreeMap<&String, &KeyUsage>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Persistence(format!("serializing usage state: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "usage".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Persistence(format!("writing temp state file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Persistence(format!("setting state file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Persistence(format!("renaming temp state file: {e}")))?;

    debug!(path = %path.display(), "persisted usage state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(requests: u32) -> KeyUsage {
        KeyUsage {
            requests_today: requests,
            ..KeyUsage::default()
        }
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path().join("api_keys_stats.json"));

        let mut state = HashMap::new();
        state.insert("key-a".to_string(), usage(3));
        state.insert("key-b".to_string(), usage(0));
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = UsageStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)), "got: {err}");
    }

    #[tokio::test]
    async fn unwritable_directory_is_persistence_error() {
        let store = UsageStore::new("/nonexistent/dir/stats.json");
        let err = store.save(&HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn in_memory_store_never_touches_disk() {
        let store = UsageStore::in_memory();
        let mut state = HashMap::new();
        state.insert("k".to_string(), usage(1));
        store.save(&state).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn output_is_sorted_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let store = UsageStore::new(&path);

        let mut state = HashMap::new();
        state.insert("zeta".to_string(), usage(1));
        state.insert("alpha".to_string(), usage(2));
        store.save(&state).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let alpha = contents.find("alpha").unwrap();
        let zeta = contents.find("zeta").unwrap();
        assert!(alpha < zeta);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        UsageStore::new(&path).save(&HashMap::new()).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "state file must be 0600, got {mode:o}");
    }
}
