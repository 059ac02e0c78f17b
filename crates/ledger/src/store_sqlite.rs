//! SQLite-backed ledger store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Result,
    error::Context,
    store::{LedgerStore, sort_history},
    types::LedgerRecord,
};

/// SQLite-backed persistence for ledger records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    ///
    /// `database_url` is e.g. `sqlite://state/ledger.db?mode=rwc`.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    ///
    /// Call [`crate::run_migrations`] before using this constructor.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<LedgerRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            records.push(serde_json::from_str(&data)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, record: &LedgerRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO ledger_records (run_id, module_id, seq, status, at_ms, data)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.run_id)
        .bind(&record.module_id)
        .bind(record.seq as i64)
        .bind(record.status.to_string())
        .bind(record.at_ms as i64)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Vec<LedgerRecord>> {
        let rows = sqlx::query("SELECT data FROM ledger_records WHERE run_id = ? ORDER BY seq")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Self::decode(rows)
    }

    async fn module_history(&self, module_id: &str) -> Result<Vec<LedgerRecord>> {
        let rows = sqlx::query("SELECT data FROM ledger_records WHERE module_id = ?")
            .bind(module_id)
            .fetch_all(&self.pool)
            .await?;
        let mut history = Self::decode(rows)?;
        sort_history(&mut history);
        Ok(history)
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT run_id FROM ledger_records ORDER BY run_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("run_id")).collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::LedgerStatus, tempfile::TempDir};

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", tmp.path().join("ledger.db").display());
        let store = SqliteStore::new(&url).await.unwrap();
        (tmp, store)
    }

    fn record(run_id: &str, module_id: &str, seq: u64, status: LedgerStatus) -> LedgerRecord {
        LedgerRecord {
            run_id: run_id.into(),
            module_id: module_id.into(),
            seq,
            status,
            at_ms: 500 + seq,
            parameters: None,
            parameters_digest: Some("abc".into()),
            error: None,
            outcome: None,
        }
    }

    #[tokio::test]
    async fn append_and_load() {
        let (_tmp, store) = store().await;
        store
            .append(&record("r1", "a", 2, LedgerStatus::InProgress))
            .await
            .unwrap();
        store
            .append(&record("r1", "a", 1, LedgerStatus::Pending))
            .await
            .unwrap();

        let records = store.load_run("r1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, LedgerStatus::Pending);
        assert_eq!(records[0].parameters_digest.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn duplicate_seq_is_rejected() {
        let (_tmp, store) = store().await;
        store
            .append(&record("r1", "a", 1, LedgerStatus::Pending))
            .await
            .unwrap();
        assert!(
            store
                .append(&record("r1", "b", 1, LedgerStatus::Pending))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn history_and_runs() {
        let (_tmp, store) = store().await;
        store
            .append(&record("r2", "a", 1, LedgerStatus::Complete))
            .await
            .unwrap();
        store
            .append(&record("r1", "a", 1, LedgerStatus::Complete))
            .await
            .unwrap();
        assert_eq!(store.module_history("a").await.unwrap().len(), 2);
        assert_eq!(store.list_runs().await.unwrap(), ["r1", "r2"]);
    }
}
