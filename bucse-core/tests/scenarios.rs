//! End-to-end scenarios (spec §8.2): drive the public operations API
//! directly against a `LocalStore`-backed repository, without a kernel
//! mount.

use bucse_core::{init, mount};

async fn new_repo(cipher: &str, passphrase: Option<&str>) -> (tempfile::TempDir, bucse_core::Repository) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    init(&url, "scenario-repo", "for tests", cipher, passphrase)
        .await
        .unwrap();
    let repo = mount(&url, passphrase.map(str::to_string), 1024, 16 * 1024 * 1024)
        .await
        .unwrap();
    (dir, repo)
}

#[tokio::test]
async fn directory_tree_survives_nested_create_and_listing() {
    let (_dir, mut repo) = new_repo("none", None).await;

    repo.ops.mkdir("a").await.unwrap();
    repo.ops.mkdir("a/b").await.unwrap();
    repo.ops.mkdir("a/b/c").await.unwrap();

    let top = repo.ops.readdir("").unwrap();
    assert_eq!(top.len(), 1);
    let nested = repo.ops.readdir("a/b").unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].0, "c");
}

#[tokio::test]
async fn write_then_overwrite_preserves_untouched_bytes() {
    let (_dir, mut repo) = new_repo("none", None).await;

    let fh = repo.ops.create("f.txt").await.unwrap();
    repo.ops.write(fh, 0, b"abcdefghij").unwrap();
    repo.ops.release(fh).await.unwrap();

    let fh = repo.ops.open("f.txt").unwrap();
    repo.ops.write(fh, 3, b"XYZ").unwrap();
    repo.ops.release(fh).await.unwrap();

    let fh = repo.ops.open("f.txt").unwrap();
    let data = repo.ops.read(fh, 0, 10).await.unwrap();
    assert_eq!(&data, b"abcXYZghij");
}

#[tokio::test]
async fn aes_repository_round_trips_with_correct_passphrase() {
    let (_dir, mut repo) = new_repo("aes", Some("correct horse battery staple")).await;

    let fh = repo.ops.create("secret.txt").await.unwrap();
    repo.ops.write(fh, 0, b"classified payload").unwrap();
    repo.ops.release(fh).await.unwrap();

    let fh = repo.ops.open("secret.txt").unwrap();
    let data = repo.ops.read(fh, 0, 19).await.unwrap();
    assert_eq!(&data, b"classified payload");
}

#[tokio::test]
async fn aes_repository_rejects_wrong_passphrase_at_mount() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    init(&url, "repo", "", "aes", Some("right-pass")).await.unwrap();

    let mounted = mount(&url, Some("wrong-pass".to_string()), 64, 1024 * 1024).await;
    // Decryption either fails outright, or (with CBC padding) produces
    // garbage JSON the manifest parser rejects — either way mount() errs.
    assert!(mounted.is_err());
}

#[tokio::test]
async fn concurrent_writers_converge_via_reconciler_tick() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    init(&url, "repo", "", "none", None).await.unwrap();

    let mut writer_a = mount(&url, None, 64, 1024 * 1024).await.unwrap();
    let mut writer_b = mount(&url, None, 64, 1024 * 1024).await.unwrap();

    writer_a.ops.mkdir("from-a").await.unwrap();
    writer_b.ops.mkdir("from-b").await.unwrap();

    // Neither writer has polled for the other's action yet.
    assert!(writer_a.ops.getattr("from-b").await.is_err());

    let store = writer_a.ops.store_handle();
    let batches = store.tick().await.unwrap();
    for batch in batches {
        writer_a
            .ops
            .ingest_action_batch(&batch.bytes, batch.more_in_batch)
            .unwrap();
    }

    assert!(writer_a.ops.getattr("from-b").await.is_ok());
}

#[tokio::test]
async fn rename_directory_moves_whole_subtree() {
    let (_dir, mut repo) = new_repo("none", None).await;
    repo.ops.mkdir("old").await.unwrap();
    let fh = repo.ops.create("old/file.txt").await.unwrap();
    repo.ops.write(fh, 0, b"x").unwrap();
    repo.ops.release(fh).await.unwrap();

    repo.ops.rename("old", "new").await.unwrap();

    assert!(repo.ops.getattr("old").await.is_err());
    assert!(repo.ops.getattr("new").await.is_ok());
    // Live projection reflects the move immediately. Replay-from-log
    // idempotence for the same pattern is covered separately in
    // reconciler.rs (directory_rename_survives_full_replay).
    assert!(repo.ops.getattr("new/file.txt").await.is_ok());
}
