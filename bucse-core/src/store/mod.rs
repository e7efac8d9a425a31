//! Object Store Interface (spec §4.1, §6.1, §6.5).

mod local;
mod sftp;

pub use local::LocalStore;
pub use sftp::SftpStore;

use crate::error::Result;

pub const MAX_CONTROL_BLOB_LEN: usize = 1024 * 1024;
pub const MAX_ACTION_FILE_LEN: usize = 1024 * 1024;

/// A batch of freshly observed event objects handed to the ingestion
/// callback (spec §4.1 `setActionAddedCallback`, §4.6 step 3).
pub struct ActionBatch {
    pub name: String,
    pub bytes: Vec<u8>,
    /// True if more files in this batch are still to be handed over; the
    /// reconciler defers sort+apply until the last batch element (spec
    /// §4.6 step 3).
    pub more_in_batch: bool,
}

/// Capability-set the rest of the core consumes from the destination
/// (spec §4.1). `LocalStore` and `SftpStore` are the two concrete variants;
/// callers hold a `Box<dyn ObjectStore>` so the rest of the core is
/// oblivious to which is in use (spec §9 "Polymorphism").
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent-ish init used by `bucse-init`; fails if the two control
    /// blobs already exist (spec §4.1).
    async fn create_dirs(&self) -> Result<()>;

    /// Writes an immutable named object under the storage namespace.
    /// Fails if `name` collides — storage objects are append-only and
    /// names are never reused (spec §4.1, §6.1).
    async fn put_storage_file(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Reads a whole storage object.
    async fn get_storage_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Deposits an immutable event under the actions namespace and records
    /// `name` as already-seen, so a later poll does not re-ingest the
    /// writer's own event (spec §4.1).
    async fn add_action_file(&self, name: &str, bytes: &[u8]) -> Result<()>;

    async fn put_repository_json_file(&self, bytes: &[u8]) -> Result<()>;
    async fn get_repository_json_file(&self) -> Result<Vec<u8>>;

    async fn put_repository_file(&self, bytes: &[u8]) -> Result<()>;
    async fn get_repository_file(&self) -> Result<Vec<u8>>;

    /// Lists action objects not yet seen by this store handle, for the
    /// reconciler to ingest (spec §4.1, §4.6). Order is not guaranteed;
    /// the reconciler sorts by `Action.time`.
    async fn list_new_action_files(&self) -> Result<Vec<ActionBatch>>;

    /// Whether `tick()` should be called periodically (spec §4.1). Both
    /// concrete variants are tickable; the hook exists so a future
    /// push-based destination can opt out.
    fn is_tickable(&self) -> bool {
        true
    }

    /// Called at ~1Hz by the concurrency harness (spec §4.1, §4.10).
    async fn tick(&self) -> Result<Vec<ActionBatch>> {
        if self.is_tickable() {
            self.list_new_action_files().await
        } else {
            Ok(Vec::new())
        }
    }
}

/// Resolves a destination by URL scheme (spec §6.5): `file://<path>`,
/// `ssh://<host>[:<port>]/<path>`, or a bare path (treated as local).
pub async fn open(url: &str) -> Result<Box<dyn ObjectStore>> {
    if let Some(path) = url.strip_prefix("file://") {
        Ok(Box::new(LocalStore::new(path)))
    } else if let Some(rest) = url.strip_prefix("ssh://") {
        Ok(Box::new(SftpStore::connect(rest).await?))
    } else {
        Ok(Box::new(LocalStore::new(url)))
    }
}
