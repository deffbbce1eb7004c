//! Filesystem-backed tag ledger.
//!
//! Layout: a single JSON-lines file, one `TagRecord` per line, append-only.
//! Each `put` appends its line and calls `sync_data` before returning, so an
//! acknowledged tag survives a crash or restart. The append runs on tokio's
//! blocking pool. A failed append is cut back off the file; if even that fails
//! the store refuses further writes until it is reopened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::StorageError;
use crate::storage_traits::{validate_put, RunId, StorageResult, TagRecord, TagStore};

/// Default file name inside the ledger directory.
pub const LEDGER_FILE: &str = "tags.jsonl";

/// Append-only JSON-lines tag ledger.
pub struct FsTagStore {
    path: PathBuf,
    // Guards both the in-memory index and the append handle.
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    records: Vec<TagRecord>,
    file: File,
    // Set when a failed append could not be rolled back.
    dirty: bool,
}

impl FsTagStore {
    /// Open (or create) the ledger at `<root>/tags.jsonl`, replaying existing records.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let path = root.join(LEDGER_FILE);

        let records = if path.exists() {
            replay(&path)?
        } else {
            Vec::new()
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), records = records.len(), "Opened tag ledger");

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                records,
                file,
                dirty: false,
            })),
        })
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> StorageResult<MutexGuard<'_, Inner>> {
    inner
        .lock()
        .map_err(|_| StorageError::Backend("tag ledger lock poisoned".to_string()))
}

/// The append handle of the ledger.
trait LedgerFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LedgerFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
enum AppendFailure {
    /// The file is back at its previous length.
    RolledBack(io::Error),
    /// Partial bytes may remain at the end of the file.
    Dirty(io::Error),
}

/// Write and sync `line`; on failure cut the file back to where it was.
fn append_line<F: LedgerFile>(file: &mut F, line: &[u8]) -> Result<(), AppendFailure> {
    let before = file.size().map_err(AppendFailure::RolledBack)?;
    let written = file.write_all(line).and_then(|()| file.sync());
    match written {
        Ok(()) => Ok(()),
        Err(e) => match file.truncate(before).and_then(|()| file.sync()) {
            Ok(()) => Err(AppendFailure::RolledBack(e)),
            Err(rollback) => {
                warn!(error = %rollback, "Could not roll back partial ledger append");
                Err(AppendFailure::Dirty(e))
            }
        },
    }
}

fn append_record(inner: &Mutex<Inner>, run_id: RunId, tag: &str) -> StorageResult<TagRecord> {
    let mut inner = lock_inner(inner)?;
    if inner.dirty {
        return Err(StorageError::Backend(
            "tag ledger has an unrecovered partial write; reopen it".to_string(),
        ));
    }

    if let Some(existing) = inner.records.iter().find(|r| r.run_id == run_id) {
        return Err(StorageError::DuplicateTag {
            run_id: run_id.0.clone(),
            existing: existing.tag.clone(),
        });
    }
    if let Some(holder) = inner.records.iter().find(|r| r.tag == tag) {
        return Err(StorageError::TagInUse {
            tag: tag.to_string(),
            run_id: holder.run_id.0.clone(),
        });
    }

    let record = TagRecord::new(run_id, tag);
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    match append_line(&mut inner.file, &line) {
        Ok(()) => {}
        Err(AppendFailure::RolledBack(e)) => return Err(e.into()),
        Err(AppendFailure::Dirty(e)) => {
            inner.dirty = true;
            return Err(e.into());
        }
    }
    inner.records.push(record.clone());
    Ok(record)
}

/// Read every record; a torn final line (crash mid-append) is truncated away.
fn replay(path: &Path) -> StorageResult<Vec<TagRecord>> {
    let content = fs::read_to_string(path)?;
    let good_len = match content.rfind('\n') {
        Some(idx) => idx + 1,
        None => 0,
    };

    if good_len < content.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = content.len() - good_len,
            "Discarding torn tail of tag ledger"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(good_len as u64)?;
        file.sync_all()?;
    }

    let mut records = Vec::new();
    for (idx, line) in content[..good_len].lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: TagRecord = serde_json::from_str(line).map_err(|e| StorageError::Corrupt {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl TagStore for FsTagStore {
    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn put(&self, run_id: &RunId, tag: &str) -> StorageResult<TagRecord> {
        validate_put(run_id, tag)?;
        let inner = Arc::clone(&self.inner);
        let owned_run = run_id.clone();
        let owned_tag = tag.to_string();

        let record = tokio::task::spawn_blocking(move || {
            append_record(&inner, owned_run, &owned_tag)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("tag ledger writer failed: {e}")))??;

        debug!(tag = %tag, "Tag appended to ledger");
        Ok(record)
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<TagRecord> {
        let inner = self.lock()?;
        inner
            .records
            .iter()
            .find(|r| &r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<TagRecord>> {
        let inner = self.lock()?;
        Ok(inner.records.iter().find(|r| r.tag == tag).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<TagRecord>> {
        Ok(self.lock()?.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsTagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTagStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get() {
        let (_dir, store) = make_store();
        let run = RunId::from("run-1");
        store.put(&run, "push-b1-run-1").await.unwrap();
        assert_eq!(store.get(&run).await.unwrap().tag, "push-b1-run-1");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsTagStore::open(dir.path()).unwrap();
            store.put(&RunId::from("a"), "push-b1-a").await.unwrap();
            store.put(&RunId::from("b"), "pr-b1-b").await.unwrap();
        }

        let reopened = FsTagStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&RunId::from("a")).await.unwrap().tag, "push-b1-a");
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_rejected_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsTagStore::open(dir.path()).unwrap();
            store.put(&RunId::from("a"), "push-b1-a").await.unwrap();
        }
        let reopened = FsTagStore::open(dir.path()).unwrap();
        let err = reopened
            .put(&RunId::from("a"), "push-b2-a")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTag { .. }));
    }

    #[tokio::test]
    async fn torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsTagStore::open(dir.path()).unwrap();
            store.put(&RunId::from("a"), "push-b1-a").await.unwrap();
        }
        let path = dir.path().join(LEDGER_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"run_id":"b","tag":"pu"#).unwrap();
        drop(file);

        let reopened = FsTagStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);

        reopened.put(&RunId::from("b"), "push-b1-b").await.unwrap();
        let again = FsTagStore::open(dir.path()).unwrap();
        assert_eq!(again.list().await.unwrap().len(), 2);
    }

    /// In-memory ledger file that runs out of space after `room` bytes.
    struct FullDisk {
        data: Vec<u8>,
        room: usize,
        truncate_fails: bool,
    }

    impl FullDisk {
        fn new(data: &[u8], room: usize) -> Self {
            Self {
                data: data.to_vec(),
                room,
                truncate_fails: false,
            }
        }
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LedgerFile for FullDisk {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::other("read-only file system"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_append_is_rolled_back() {
        let first = b"{\"run_id\":\"a\"}\n";
        let mut file = FullDisk::new(first, 5);

        let err = append_line(&mut file, b"{\"run_id\":\"b\"}\n").unwrap_err();
        assert!(matches!(err, AppendFailure::RolledBack(_)));
        assert_eq!(file.data, first);

        file.room = 64;
        append_line(&mut file, b"{\"run_id\":\"c\"}\n").unwrap();
        let text = String::from_utf8(file.data).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec![
            r#"{"run_id":"a"}"#,
            r#"{"run_id":"c"}"#,
        ]);
    }

    #[test]
    fn failed_rollback_is_reported_dirty() {
        let mut file = FullDisk::new(b"", 3);
        file.truncate_fails = true;
        let err = append_line(&mut file, b"{\"run_id\":\"b\"}\n").unwrap_err();
        assert!(matches!(err, AppendFailure::Dirty(_)));
    }

    #[tokio::test]
    async fn dirty_store_refuses_writes_until_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTagStore::open(dir.path()).unwrap();
        store.put(&RunId::from("a"), "push-b1-a").await.unwrap();
        store.lock().unwrap().dirty = true;

        let err = store
            .put(&RunId::from("b"), "push-b1-b")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        drop(store);

        let reopened = FsTagStore::open(dir.path()).unwrap();
        reopened.put(&RunId::from("b"), "push-b1-b").await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_puts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsTagStore::open(dir.path()).unwrap());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                let run = RunId::from(format!("r{i}").as_str());
                store.put(&run, &format!("push-b1-r{i}")).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        drop(store);

        let reopened = FsTagStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn corrupt_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LEDGER_FILE), "not json\n").unwrap();
        match FsTagStore::open(dir.path()) {
            Err(StorageError::Corrupt { line, .. }) => assert_eq!(line, 1),
            Err(other) => panic!("expected Corrupt, got {other:?}"),
            Ok(_) => panic!("expected Corrupt, got Ok"),
        }
    }
}
