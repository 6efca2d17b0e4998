//! History store - append-only JSONL record of finished tasks
//!
//! The storage directory holds two kinds of files:
//! - `history.jsonl`: one serialized [`Task`] per line, in finish order
//! - `<nanos>.log`: captured output of a single task
//!
//! The daemon is the only writer. Reads stream the file line by line and may
//! interleave freely with appends. A record that cannot be decoded, such as
//! one torn by a crash mid-append, is skipped with a warning.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::domain::{Task, TaskId};

/// Name of the history file inside the storage directory
pub const HISTORY_FILE: &str = "history.jsonl";

/// Extension used for per-task output capture files
pub const CAPTURE_EXTENSION: &str = "log";

/// Errors from history store operations
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode task {id}")]
    Encode {
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Durable record of every task that reached success or failure
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Create a store rooted at `dir` without touching the filesystem
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(?dir, "HistoryStore::new: called");
        Self { dir }
    }

    /// Create the storage directory and an empty history file if missing
    pub async fn open(dir: impl Into<PathBuf>) -> HistoryResult<Self> {
        let store = Self::new(dir);
        store.ensure().await?;
        info!(dir = ?store.dir, "History store opened");
        Ok(store)
    }

    pub fn history_file(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Path for a fresh output capture file, named by a nanosecond timestamp
    pub fn new_capture_path(&self) -> PathBuf {
        let now = Utc::now();
        let stamp = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        self.dir.join(format!("{}.{}", stamp, CAPTURE_EXTENSION))
    }

    /// Create the directory and history file, and end a torn last record
    /// with a newline so the next append starts on a line of its own
    async fn ensure(&self) -> HistoryResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.history_file())
            .await?;

        if file.metadata().await?.len() == 0 {
            return Ok(());
        }
        file.seek(SeekFrom::End(-1)).await?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            warn!(path = ?self.history_file(), "History ends in a partial record, terminating it");
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Append one finished task as a single JSON line
    pub async fn append(&self, task: &Task) -> HistoryResult<()> {
        debug!(id = task.id, status = %task.status, "HistoryStore::append: called");
        let mut line = serde_json::to_string(task).map_err(|source| HistoryError::Encode { id: task.id, source })?;
        line.push('\n');

        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_file())
            .await?;
        // One write call per record so appends never interleave partial lines
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Stream every record, in finish order, through `visit`
    async fn scan<F>(&self, mut visit: F) -> HistoryResult<()>
    where
        F: FnMut(Task),
    {
        let path = self.history_file();
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "HistoryStore::scan: no history file");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Raw segments, so a record cut inside a multi-byte character is
        // skipped like any other unreadable record
        let mut records = BufReader::new(file).split(b'\n');
        let mut line_no = 0usize;
        while let Some(raw) = records.next_segment().await? {
            line_no += 1;
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Task>(&raw) {
                Ok(task) => visit(task),
                Err(e) => warn!(?path, line = line_no, error = %e, "HistoryStore::scan: failed to parse line, skipping"),
            }
        }
        debug!(records = line_no, "HistoryStore::scan: reached end of history");
        Ok(())
    }

    /// Every record whose end time is strictly before `before`
    pub async fn query(&self, before: DateTime<Utc>) -> HistoryResult<Vec<Task>> {
        debug!(%before, "HistoryStore::query: called");
        let mut found = Vec::new();
        self.scan(|task| {
            if task.end_time.is_some_and(|end| end < before) {
                found.push(task);
            }
        })
        .await?;
        debug!(count = found.len(), "HistoryStore::query: returning");
        Ok(found)
    }

    /// Most recent record for `id`, if any
    pub async fn find(&self, id: TaskId) -> HistoryResult<Option<Task>> {
        debug!(id, "HistoryStore::find: called");
        let mut found = None;
        self.scan(|task| {
            if task.id == id {
                found = Some(task);
            }
        })
        .await?;
        Ok(found)
    }

    /// Greatest id across all records, used to seed id assignment at startup
    pub async fn max_id(&self) -> HistoryResult<Option<TaskId>> {
        let mut max: Option<TaskId> = None;
        self.scan(|task| {
            max = Some(max.map_or(task.id, |m| m.max(task.id)));
        })
        .await?;
        debug!(?max, "HistoryStore::max_id: returning");
        Ok(max)
    }

    /// Delete the history and every capture file not listed in `keep`, then
    /// recreate an empty history file. Returns the number of files removed.
    pub async fn purge(&self, keep: &[PathBuf]) -> HistoryResult<usize> {
        debug!(keep = keep.len(), "HistoryStore::purge: called");
        let keep: HashSet<&Path> = keep.iter().map(PathBuf::as_path).collect();
        let mut removed = 0;

        match fs::remove_file(self.history_file()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if fs::try_exists(&self.dir).await? {
            let mut entries = fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let is_capture = path.extension().is_some_and(|ext| ext == CAPTURE_EXTENSION);
                if !is_capture || keep.contains(path.as_path()) {
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(?path, error = %e, "HistoryStore::purge: failed to remove capture file"),
                }
            }
        }

        self.ensure().await?;
        info!(removed, "History store purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use tempfile::tempdir;

    fn finished(id: TaskId, end: DateTime<Utc>) -> Task {
        let mut task = Task::new(format!("echo {}", id), "/tmp");
        task.id = id;
        task.enqueue_time = Some(end - chrono::Duration::seconds(2));
        task.start_time = Some(end - chrono::Duration::seconds(1));
        task.end_time = Some(end);
        task.exit_code = Some(0);
        task.status = TaskStatus::Success;
        task
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("store");
        let store = HistoryStore::open(&dir).await.unwrap();
        assert!(store.history_file().exists());
        assert_eq!(store.max_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_append_writes_one_line_per_task() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        let now = Utc::now();

        store.append(&finished(1, now)).await.unwrap();
        store.append(&finished(2, now)).await.unwrap();

        let content = std::fs::read_to_string(store.history_file()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_query_filters_strictly_before() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        let t0 = Utc::now();

        store.append(&finished(1, t0)).await.unwrap();
        store.append(&finished(2, t0 + chrono::Duration::seconds(10))).await.unwrap();
        store.append(&finished(3, t0 + chrono::Duration::seconds(20))).await.unwrap();

        let ids: Vec<_> = store
            .query(t0 + chrono::Duration::seconds(10))
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![1]);

        let all = store.query(t0 + chrono::Duration::seconds(21)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_query_skips_records_without_end_time() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        let t0 = Utc::now();

        let mut unfinished = finished(5, t0);
        unfinished.end_time = None;
        store.append(&unfinished).await.unwrap();
        store.append(&finished(6, t0)).await.unwrap();

        // Records after one without an end time are still read
        let tasks = store.query(t0 + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 6);
        assert_eq!(store.max_id().await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_max_id_uses_record_ids() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        let now = Utc::now();

        store.append(&finished(12, now)).await.unwrap();
        store.append(&finished(40, now)).await.unwrap();
        store.append(&finished(17, now)).await.unwrap();

        assert_eq!(store.max_id().await.unwrap(), Some(40));
    }

    #[tokio::test]
    async fn test_find_returns_record() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        store.append(&finished(3, Utc::now())).await.unwrap();

        assert_eq!(store.find(3).await.unwrap().map(|t| t.id), Some(3));
        assert!(store.find(4).await.unwrap().is_none());
    }

    fn append_raw(store: &HistoryStore, bytes: &[u8]) {
        std::fs::OpenOptions::new()
            .append(true)
            .open(store.history_file())
            .and_then(|mut f| std::io::Write::write_all(&mut f, bytes))
            .unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        store.append(&finished(1, Utc::now())).await.unwrap();
        append_raw(&store, b"{not json\n");
        store.append(&finished(3, Utc::now())).await.unwrap();

        assert_eq!(store.max_id().await.unwrap(), Some(3));
        assert_eq!(store.query(Utc::now() + chrono::Duration::seconds(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_torn_last_record_is_ignored_and_terminated() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        store.append(&finished(1, Utc::now())).await.unwrap();
        // Cut inside a multi-byte character, as a crash mid-append might
        let mut torn = br#"{"id":2,"command":"echo caf"#.to_vec();
        torn.push(0xC3);
        append_raw(&store, &torn);

        assert_eq!(store.max_id().await.unwrap(), Some(1));

        // Reopening ends the torn record so new appends stay readable
        let store = HistoryStore::open(temp.path()).await.unwrap();
        store.append(&finished(4, Utc::now())).await.unwrap();
        assert_eq!(store.max_id().await.unwrap(), Some(4));
        assert_eq!(store.find(4).await.unwrap().map(|t| t.id), Some(4));

        let content = std::fs::read(store.history_file()).unwrap();
        assert_eq!(content.iter().filter(|b| **b == b'\n').count(), 3);
    }

    #[tokio::test]
    async fn test_encode_error_message_names_task() {
        let source = serde_json::from_str::<Task>("{").unwrap_err();
        let err = HistoryError::Encode { id: 7, source };
        assert_eq!(err.to_string(), "Failed to encode task 7");
    }

    #[tokio::test]
    async fn test_missing_history_file_reads_empty() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::new(temp.path().join("absent"));
        assert!(store.query(Utc::now()).await.unwrap().is_empty());
        assert_eq!(store.max_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_keeps_live_captures() {
        let temp = tempdir().unwrap();
        let store = HistoryStore::open(temp.path()).await.unwrap();
        store.append(&finished(1, Utc::now())).await.unwrap();

        let old = temp.path().join("100.log");
        let live = temp.path().join("200.log");
        let unrelated = temp.path().join("notes.txt");
        std::fs::write(&old, "old").unwrap();
        std::fs::write(&live, "live").unwrap();
        std::fs::write(&unrelated, "keep me").unwrap();

        let removed = store.purge(std::slice::from_ref(&live)).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!old.exists());
        assert!(live.exists());
        assert!(unrelated.exists());
        assert!(store.history_file().exists());
        assert!(store.query(Utc::now()).await.unwrap().is_empty());
    }

    #[test]
    fn test_capture_paths_are_logs_in_store_dir() {
        let store = HistoryStore::new("/var/tmp/tq");
        let path = store.new_capture_path();
        assert_eq!(path.parent(), Some(Path::new("/var/tmp/tq")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("log"));
    }
}
