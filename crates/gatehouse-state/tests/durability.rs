//! Restart durability: a tag acknowledged by `put` is readable from a freshly
//! opened store pointing at the same location.

use gatehouse_state::{RunId, StateBackend, StorageError};

#[tokio::test]
async fn test_fs_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let location = format!("fs://{}", dir.path().display());

    {
        let store = StateBackend::parse(&location).unwrap().open().await.unwrap();
        store
            .put(&RunId::from("run-1"), "push-b1-run-1")
            .await
            .unwrap();
    }

    let store = StateBackend::parse(&location).unwrap().open().await.unwrap();
    let record = store.get(&RunId::from("run-1")).await.unwrap();
    assert_eq!(record.tag, "push-b1-run-1");

    let found = store.find_by_tag("push-b1-run-1").await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn test_append_only_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backend = StateBackend::Fs(dir.path().to_path_buf());

    {
        let store = backend.open().await.unwrap();
        store.put(&RunId::from("r"), "push-b1-r").await.unwrap();
    }

    let store = backend.open().await.unwrap();
    let err = store.put(&RunId::from("r"), "push-b1-r2").await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateTag { .. }));
    assert_eq!(store.list().await.unwrap().len(), 1);
}
