//! Repository lifecycle (spec §4.9, C9): init and mount. Owns the
//! plaintext/encrypted control blobs and wires together the store, cipher,
//! block engine, and operations layer into a single handle the
//! concurrency harness and kernel bridge drive.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block_engine::BlockEngine;
use crate::cipher::{self, Cipher};
use crate::error::{BucseError, Result};
use crate::ops::Operations;
use crate::store::{self, ObjectStore};

/// The plaintext control blob (spec §6.2 `repository.json`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepositoryManifest {
    pub name: String,
    pub comment: String,
    pub encryption: String,
}

/// The encrypted control blob's payload (spec §6.2 `repository`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepositoryMeta {
    pub time: i64,
}

pub struct Repository {
    pub manifest: RepositoryManifest,
    pub created_at: i64,
    pub ops: Operations,
}

/// Creates a new repository at `url` (spec §4.9 "Init" / `bucse-init`):
/// picks a destination by URL prefix, calls `createDirs`, writes the
/// plaintext manifest, then writes the encrypted `{time}` blob.
pub async fn init(
    url: &str,
    name: &str,
    comment: &str,
    cipher_name: &str,
    passphrase: Option<&str>,
) -> Result<()> {
    let destination = store::open(url).await?;
    let cipher = cipher::from_name(cipher_name)?;
    if cipher.needs_passphrase() && passphrase.is_none() {
        return Err(BucseError::Unsupported(
            "chosen cipher requires a passphrase",
        ));
    }

    destination.create_dirs().await?;

    let manifest = RepositoryManifest {
        name: name.to_string(),
        comment: comment.to_string(),
        encryption: cipher_name.to_string(),
    };
    let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| BucseError::Store(e.to_string()))?;
    destination.put_repository_json_file(&manifest_bytes).await?;

    let time = now();
    let meta = RepositoryMeta { time };
    let meta_bytes = serde_json::to_vec(&meta).map_err(|e| BucseError::Store(e.to_string()))?;
    let encrypted = cipher.encrypt(&meta_bytes, passphrase)?;
    destination.put_repository_file(&encrypted).await?;

    Ok(())
}

/// Mounts an existing repository at `url` (spec §4.9 "Mount"): selects
/// the cipher from the plaintext manifest, decrypts the `repository` blob
/// to recover the creation timestamp, and wires up the operations layer.
/// Interactive passphrase prompting (echo-off, TTY check) is the
/// binary-boundary caller's job — this function just consumes whatever
/// passphrase it is handed.
pub async fn mount(
    url: &str,
    passphrase: Option<String>,
    cache_max_entries: usize,
    cache_max_bytes: usize,
) -> Result<Repository> {
    let destination: Arc<dyn ObjectStore> = Arc::from(store::open(url).await?);

    let manifest_bytes = destination.get_repository_json_file().await?;
    let manifest: RepositoryManifest =
        serde_json::from_slice(&manifest_bytes).map_err(|e| BucseError::Store(e.to_string()))?;

    let cipher: Arc<dyn Cipher> = Arc::from(cipher::from_name(&manifest.encryption)?);
    if cipher.needs_passphrase() && passphrase.is_none() {
        return Err(BucseError::Unsupported(
            "repository requires a passphrase but none was provided",
        ));
    }

    let encrypted_meta = destination.get_repository_file().await?;
    let meta_bytes = cipher.decrypt(&encrypted_meta, passphrase.as_deref())?;
    let meta: RepositoryMeta =
        serde_json::from_slice(&meta_bytes).map_err(|e| BucseError::Store(e.to_string()))?;

    let block_engine = BlockEngine::new(destination.clone(), cipher, passphrase);
    let cache = crate::cache::BlockCache::with_limits(cache_max_entries, cache_max_bytes);
    let ops = Operations::with_cache(destination.clone(), block_engine, cache, meta.time);

    Ok(Repository {
        manifest,
        created_at: meta.time,
        ops,
    })
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_then_mount_round_trips_manifest_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        init(&url, "repo", "a test repo", "none", None).await.unwrap();

        let repo = mount(&url, None, 1024, 1024 * 1024).await.unwrap();
        assert_eq!(repo.manifest.name, "repo");
        assert_eq!(repo.manifest.encryption, "none");
    }

    #[tokio::test]
    async fn mount_with_aes_requires_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        init(&url, "repo", "", "aes", Some("hunter2")).await.unwrap();

        assert!(mount(&url, None, 1024, 1024 * 1024).await.is_err());
        let repo = mount(&url, Some("hunter2".to_string()), 1024, 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(repo.manifest.encryption, "aes");
    }
}
