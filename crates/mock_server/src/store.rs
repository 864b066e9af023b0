//! JSON-file storage for server records, one file per server.

use crate::error::ServerError;
use crate::record::{validate_name, ServerRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads and writes `<dir>/<name>.json` records.
#[derive(Debug, Clone)]
pub struct ServerStore {
    dir: PathBuf,
}

impl ServerStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ServerError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, ServerError> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    /// Writes `record`, creating the directory if needed.
    pub async fn save(&self, record: &ServerRecord) -> Result<(), ServerError> {
        record.validate()?;
        let path = self.path_for(&record.name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        debug!("Saved server record {}", path.display());
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<ServerRecord, ServerError> {
        let path = self.path_for(name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable record, sorted by name. Unreadable files are skipped
    /// with a warning.
    pub async fn load_all(&self) -> Result<Vec<ServerRecord>, ServerError> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable server record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn read_record(path: &Path) -> Result<ServerRecord, ServerError> {
        let content = tokio::fs::read_to_string(path).await?;
        let record: ServerRecord = serde_json::from_str(&content)?;
        record.validate()?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != record.name {
            return Err(ServerError::InvalidRecord(format!(
                "file name does not match server name {}",
                record.name
            )));
        }
        Ok(record)
    }

    /// Deletes a record. Missing records are not an error.
    pub async fn remove(&self, name: &str) -> Result<(), ServerError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = ServerStore::new(dir.path().join("servers"));
        let record = ServerRecord::new("alpha", 25570, "Hello");

        store.save(&record).await.unwrap();
        assert!(store.exists("alpha").await.unwrap());
        assert_eq!(store.load("alpha").await.unwrap(), record);

        store.remove("alpha").await.unwrap();
        store.remove("alpha").await.unwrap();
        assert!(!store.exists("alpha").await.unwrap());
        assert!(matches!(store.load("alpha").await, Err(ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_all_sorted_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let store = ServerStore::new(dir.path());
        store.save(&ServerRecord::new("zeta", 1, "z")).await.unwrap();
        store.save(&ServerRecord::new("beta", 2, "b")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{not json").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();
        let renamed = serde_json::to_string(&ServerRecord::new("other", 3, "o")).unwrap();
        tokio::fs::write(dir.path().join("mismatch.json"), renamed).await.unwrap();

        let names: Vec<String> = store.load_all().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["beta", "zeta"]);
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ServerStore::new(dir.path().join("nope"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let store = ServerStore::new(dir.path());
        assert!(matches!(store.load("../x").await, Err(ServerError::InvalidName(_))));
    }
}
