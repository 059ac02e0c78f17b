//! JSON-lines ledger store: one append-only file per run.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    tokio::{fs, io::AsyncWriteExt, sync::Mutex},
    tracing::warn,
};

use crate::{
    Error, Result,
    error::Context,
    handle::validate_run_id,
    store::{LedgerStore, sort_history},
    types::LedgerRecord,
};

const EXTENSION: &str = "jsonl";

/// File-backed store. Records for run `r` live in `<dir>/r.jsonl`.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf> {
        if !validate_run_id(run_id) {
            return Err(Error::InvalidRunId {
                run_id: run_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{run_id}.{EXTENSION}")))
    }

    /// Parse a run file. A torn final line (crash mid-append) is dropped.
    async fn read_records(path: &Path) -> Result<Vec<LedgerRecord>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<LedgerRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if i + 1 == lines.len() => {
                    warn!(path = %path.display(), error = %e, "ignoring torn ledger line");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }

    async fn run_files(&self) -> Result<Vec<(String, PathBuf)>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn append(&self, record: &LedgerRecord) -> Result<()> {
        let path = self.run_path(&record.run_id)?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Vec<LedgerRecord>> {
        let path = self.run_path(run_id)?;
        let mut records = Self::read_records(&path).await?;
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    async fn module_history(&self, module_id: &str) -> Result<Vec<LedgerRecord>> {
        let mut history = Vec::new();
        for (_, path) in self.run_files().await? {
            history.extend(
                Self::read_records(&path)
                    .await?
                    .into_iter()
                    .filter(|r| r.module_id == module_id),
            );
        }
        sort_history(&mut history);
        Ok(history)
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        Ok(self
            .run_files()
            .await?
            .into_iter()
            .map(|(run_id, _)| run_id)
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::LedgerStatus, tempfile::TempDir};

    fn record(run_id: &str, module_id: &str, seq: u64, status: LedgerStatus) -> LedgerRecord {
        LedgerRecord {
            run_id: run_id.into(),
            module_id: module_id.into(),
            seq,
            status,
            at_ms: 1000 + seq,
            parameters: None,
            parameters_digest: None,
            error: None,
            outcome: None,
        }
    }

    #[tokio::test]
    async fn append_and_reload_run() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("ledger"));

        store
            .append(&record("r1", "a", 1, LedgerStatus::Pending))
            .await
            .unwrap();
        store
            .append(&record("r1", "a", 2, LedgerStatus::InProgress))
            .await
            .unwrap();

        let reopened = FileStore::new(tmp.path().join("ledger"));
        let records = reopened.load_run("r1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, LedgerStatus::InProgress);
        assert!(tmp.path().join("ledger/r1.jsonl").exists());
    }

    #[tokio::test]
    async fn missing_run_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        assert!(store.load_run("nope").await.unwrap().is_empty());
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn torn_last_line_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        store
            .append(&record("r1", "a", 1, LedgerStatus::Pending))
            .await
            .unwrap();

        let path = tmp.path().join("r1.jsonl");
        let mut data = std::fs::read_to_string(&path).unwrap();
        data.push_str("{\"run_id\":\"r1\",\"mod");
        std::fs::write(&path, data).unwrap();

        let records = store.load_run("r1").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        std::fs::write(tmp.path().join("r1.jsonl"), "garbage\n{}\n").unwrap();
        assert!(store.load_run("r1").await.is_err());
    }

    #[tokio::test]
    async fn history_spans_runs() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        store
            .append(&record("r1", "a", 1, LedgerStatus::Complete))
            .await
            .unwrap();
        store
            .append(&record("r2", "a", 1, LedgerStatus::Skipped))
            .await
            .unwrap();
        store
            .append(&record("r2", "b", 2, LedgerStatus::Complete))
            .await
            .unwrap();

        let history = store.module_history("a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(store.list_runs().await.unwrap(), ["r1", "r2"]);
    }

    #[tokio::test]
    async fn rejects_path_like_run_ids() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store
            .append(&record("../escape", "a", 1, LedgerStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRunId { .. }));
    }
}
