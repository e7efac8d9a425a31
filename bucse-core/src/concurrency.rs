//! Concurrency discipline (spec §4.10, C10): a single coarse lock guards
//! the projection, action log, and destination state; a background task
//! polls the destination at a fixed interval and folds new batches in.
//! Grounded in the teacher's `tokio::runtime::Runtime` + `block_on`
//! bridging pattern (`client/src/fs/mod.rs`), generalized from a
//! synchronous FUSE-thread bridge to an owned background poller plus an
//! `Arc<parking_lot::Mutex<..>>` handle shared with callers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::repository::Repository;

/// Shared, lock-guarded handle to a mounted repository (spec §4.10: "all
/// mutation and all projection reads happen under one lock").
#[derive(Clone)]
pub struct Handle(pub Arc<Mutex<Repository>>);

impl Handle {
    pub fn new(repository: Repository) -> Self {
        Handle(Arc::new(Mutex::new(repository)))
    }
}

/// Owns the background poll task and its shutdown signal (spec §4.10
/// "cooperative shutdown").
pub struct Concurrency {
    handle: Handle,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Concurrency {
    /// Spawns the ~1Hz (configurable) background tick task onto the
    /// current tokio runtime.
    pub fn spawn(handle: Handle, tick_interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let task_handle = handle.clone();
        let task_shutdown = shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick_interval) => {
                        if let Err(e) = tick(&task_handle).await {
                            tracing::warn!(error = %e, "tick failed");
                        }
                    }
                    _ = task_shutdown.notified() => break,
                }
            }
        });

        Concurrency {
            handle,
            shutdown,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Requests the background task stop and waits for it to exit (spec
    /// §4.10 "Unmount").
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Polls the destination once and folds every returned batch into the
/// reconciler, all under one lock acquisition (spec §4.10 fairness: the
/// poll does not interleave with a caller mid-operation).
async fn tick(handle: &Handle) -> crate::error::Result<()> {
    let mut repo = handle.0.lock();
    let store = repo.ops.store_handle();
    let batches = store.tick().await?;
    for batch in batches {
        repo.ops.ingest_action_batch(&batch.bytes, batch.more_in_batch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository;

    #[tokio::test]
    async fn tick_picks_up_foreign_action_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        repository::init(&url, "repo", "", "none", None).await.unwrap();
        let repo = repository::mount(&url, None, 64, 1024 * 1024).await.unwrap();
        let handle = Handle::new(repo);

        tokio::fs::write(
            dir.path().join("actions").join("foreign-action"),
            crate::action::serialize_actions(&[crate::action::Action::new_dir(
                1,
                crate::action::ActionKind::AddDirectory,
                "from-elsewhere".to_string(),
            )])
            .unwrap(),
        )
        .await
        .unwrap();

        tick(&handle).await.unwrap();
        let repo = handle.0.lock();
        assert!(repo
            .ops
            .reconciler()
            .projection()
            .resolve_dir("from-elsewhere")
            .is_ok());
    }

    #[tokio::test]
    async fn spawn_and_shutdown_completes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        repository::init(&url, "repo", "", "none", None).await.unwrap();
        let repo = repository::mount(&url, None, 64, 1024 * 1024).await.unwrap();
        let handle = Handle::new(repo);

        let concurrency = Concurrency::spawn(handle, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(50)).await;
        concurrency.shutdown().await;
    }
}
