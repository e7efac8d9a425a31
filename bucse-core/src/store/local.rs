//! Local-directory object store, grounded in the original `dest_local.c`:
//! the repository is a directory tree with `repository.json`, `repository`,
//! `actions/`, and `storage/` siblings (spec §6.1).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{ActionBatch, ObjectStore, MAX_ACTION_FILE_LEN, MAX_CONTROL_BLOB_LEN};
use crate::error::{BucseError, Result};

pub struct LocalStore {
    root: PathBuf,
    /// Names already handed to the ingestion callback, mirroring
    /// `dest_local.c`'s `handledActions` list — prevents a writer from
    /// re-ingesting the event it just produced itself (spec §4.1).
    seen: Mutex<HashSet<String>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore {
            root: root.into(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn actions_dir(&self) -> PathBuf {
        self.root.join("actions")
    }

    fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    fn repository_json_path(&self) -> PathBuf {
        self.root.join("repository.json")
    }

    fn repository_path(&self) -> PathBuf {
        self.root.join("repository")
    }
}

async fn read_capped(path: &Path, cap: usize) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.len() > cap {
        return Err(BucseError::ControlBlobTooLarge(bytes.len()));
    }
    Ok(bytes)
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    async fn create_dirs(&self) -> Result<()> {
        if tokio::fs::metadata(&self.repository_json_path()).await.is_ok()
            || tokio::fs::metadata(&self.repository_path()).await.is_ok()
        {
            return Err(BucseError::Exists(self.root.clone()));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.actions_dir()).await?;
        tokio::fs::create_dir_all(self.storage_dir()).await?;
        Ok(())
    }

    async fn put_storage_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.storage_dir().join(name);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Err(BucseError::Exists(path));
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_storage_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.storage_dir().join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|_| BucseError::MissingBlock(name.to_string()))
    }

    async fn add_action_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_ACTION_FILE_LEN {
            return Err(BucseError::ActionFileTooLarge(bytes.len()));
        }
        let path = self.actions_dir().join(name);
        tokio::fs::write(&path, bytes).await?;
        self.seen.lock().insert(name.to_string());
        Ok(())
    }

    async fn put_repository_json_file(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_CONTROL_BLOB_LEN {
            return Err(BucseError::ControlBlobTooLarge(bytes.len()));
        }
        tokio::fs::write(self.repository_json_path(), bytes).await?;
        Ok(())
    }

    async fn get_repository_json_file(&self) -> Result<Vec<u8>> {
        read_capped(&self.repository_json_path(), MAX_CONTROL_BLOB_LEN).await
    }

    async fn put_repository_file(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_CONTROL_BLOB_LEN {
            return Err(BucseError::ControlBlobTooLarge(bytes.len()));
        }
        tokio::fs::write(self.repository_path(), bytes).await?;
        Ok(())
    }

    async fn get_repository_file(&self) -> Result<Vec<u8>> {
        read_capped(&self.repository_path(), MAX_CONTROL_BLOB_LEN).await
    }

    async fn list_new_action_files(&self) -> Result<Vec<ActionBatch>> {
        let mut entries = tokio::fs::read_dir(self.actions_dir()).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if !self.seen.lock().contains(&name) {
                names.push(name);
            }
        }

        let mut batches = Vec::with_capacity(names.len());
        let total = names.len();
        for (i, name) in names.into_iter().enumerate() {
            let path = self.actions_dir().join(&name);
            match read_capped(&path, MAX_ACTION_FILE_LEN).await {
                Ok(bytes) => batches.push(ActionBatch {
                    name: name.clone(),
                    bytes,
                    more_in_batch: i + 1 < total,
                }),
                Err(err) => {
                    tracing::warn!(name = %name, error = %err, "skipping unreadable action file");
                }
            }
        }

        let mut seen = self.seen.lock();
        for batch in &batches {
            seen.insert(batch.name.clone());
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_dirs_then_round_trip_control_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create_dirs().await.unwrap();

        store.put_repository_json_file(b"{}").await.unwrap();
        assert_eq!(store.get_repository_json_file().await.unwrap(), b"{}");

        store.put_repository_file(b"[1]").await.unwrap();
        assert_eq!(store.get_repository_file().await.unwrap(), b"[1]");
    }

    #[tokio::test]
    async fn create_dirs_is_rejected_when_already_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create_dirs().await.unwrap();
        store.put_repository_json_file(b"{}").await.unwrap();

        let store2 = LocalStore::new(dir.path());
        assert!(store2.create_dirs().await.is_err());
    }

    #[tokio::test]
    async fn storage_put_rejects_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create_dirs().await.unwrap();
        store.put_storage_file("abc", b"hello").await.unwrap();
        assert!(store.put_storage_file("abc", b"world").await.is_err());
    }

    #[tokio::test]
    async fn own_action_is_not_reingested() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create_dirs().await.unwrap();
        store.add_action_file("a1", b"[]").await.unwrap();

        let batches = store.list_new_action_files().await.unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn foreign_action_is_listed_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.create_dirs().await.unwrap();
        tokio::fs::write(dir.path().join("actions").join("foreign"), b"[]")
            .await
            .unwrap();

        let first = store.list_new_action_files().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.list_new_action_files().await.unwrap();
        assert!(second.is_empty());
    }
}
