// SQLite daily_rollup table: one row per calendar date, upserted in place.

use chrono::NaiveDate;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use super::{DayRecord, RollupStore};
use crate::models::Readings;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct RollupRepo {
    pool: SqlitePool,
}

impl RollupRepo {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_rollup (
                date TEXT PRIMARY KEY,
                voltage REAL NOT NULL,
                current REAL NOT NULL,
                power REAL NOT NULL,
                frequency REAL NOT NULL,
                apparent REAL NOT NULL,
                reactive REAL NOT NULL,
                energy REAL NOT NULL,
                power_factor REAL NOT NULL,
                sample_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(repo = "rollup", operation = "upsert", date = %record.date))]
    pub async fn upsert(&self, record: &DayRecord) -> anyhow::Result<()> {
        let updated_at = chrono::Utc::now().timestamp_millis();
        let a = &record.averages;
        sqlx::query(
            r#"
            INSERT INTO daily_rollup
            (date, voltage, current, power, frequency, apparent, reactive, energy, power_factor,
             sample_count, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(date) DO UPDATE SET
                voltage = excluded.voltage,
                current = excluded.current,
                power = excluded.power,
                frequency = excluded.frequency,
                apparent = excluded.apparent,
                reactive = excluded.reactive,
                energy = excluded.energy,
                power_factor = excluded.power_factor,
                sample_count = excluded.sample_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.date.format(DATE_FORMAT).to_string())
        .bind(a.voltage)
        .bind(a.current)
        .bind(a.power)
        .bind(a.frequency)
        .bind(a.apparent)
        .bind(a.reactive)
        .bind(a.energy)
        .bind(a.power_factor)
        .bind(record.sample_count as i64)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "rollup", operation = "delete"))]
    pub async fn delete(&self, date: NaiveDate) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM daily_rollup WHERE date = $1")
            .bind(date.format(DATE_FORMAT).to_string())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// All stored days, oldest first.
    #[instrument(skip(self), fields(repo = "rollup", operation = "load_all"))]
    pub async fn load_all(&self) -> anyhow::Result<Vec<DayRecord>> {
        let rows = sqlx::query(
            "SELECT date, voltage, current, power, frequency, apparent, reactive, energy,
                    power_factor, sample_count
             FROM daily_rollup ORDER BY date ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::parse_row(&row) {
                Ok(r) => out.push(r),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable daily_rollup row"),
            }
        }
        Ok(out)
    }

    /// Reclaim space after deletes.
    #[instrument(skip(self), fields(repo = "rollup", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<DayRecord> {
        let date: String = row.try_get("date")?;
        let sample_count: i64 = row.try_get("sample_count")?;
        Ok(DayRecord {
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT)?,
            averages: Readings {
                voltage: row.try_get("voltage")?,
                current: row.try_get("current")?,
                power: row.try_get("power")?,
                frequency: row.try_get("frequency")?,
                apparent: row.try_get("apparent")?,
                reactive: row.try_get("reactive")?,
                energy: row.try_get("energy")?,
                power_factor: row.try_get("power_factor")?,
            },
            sample_count: sample_count.max(0) as u64,
        })
    }
}

enum RollupOp {
    Put(DayRecord),
    Remove(NaiveDate),
    /// Answered once every earlier op has been applied.
    Flush(oneshot::Sender<()>),
}

/// `RollupStore` over [`RollupRepo`]. Writes are queued to one writer task and applied in
/// call order, never awaited by ingest. Failures are logged and dropped.
pub struct SqliteRollupStore {
    ops: mpsc::UnboundedSender<RollupOp>,
}

impl SqliteRollupStore {
    /// Must be called from within a tokio runtime.
    pub fn new(repo: Arc<RollupRepo>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let (ops, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(repo, rx));
        Ok(Self { ops })
    }

    fn enqueue(&self, op: RollupOp) {
        if self.ops.send(op).is_err() {
            tracing::warn!(operation = "rollup_enqueue", "rollup writer is gone; write dropped");
        }
    }

    /// Waits until every write queued so far has reached the database.
    pub async fn drain(&self) {
        let (done, rx) = oneshot::channel();
        self.enqueue(RollupOp::Flush(done));
        let _ = rx.await;
    }
}

async fn run_writer(repo: Arc<RollupRepo>, mut ops: mpsc::UnboundedReceiver<RollupOp>) {
    while let Some(op) = ops.recv().await {
        match op {
            RollupOp::Put(record) => {
                if let Err(e) = repo.upsert(&record).await {
                    tracing::warn!(
                        error = %e,
                        operation = "rollup_upsert",
                        date = %record.date,
                        "daily rollup write failed; dropped"
                    );
                }
            }
            RollupOp::Remove(date) => {
                if let Err(e) = repo.delete(date).await {
                    tracing::warn!(
                        error = %e,
                        operation = "rollup_delete",
                        date = %date,
                        "daily rollup delete failed; dropped"
                    );
                }
            }
            RollupOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("rollup writer stopped");
}

impl RollupStore for SqliteRollupStore {
    fn put(&self, record: DayRecord) {
        self.enqueue(RollupOp::Put(record));
    }

    fn remove(&self, date: NaiveDate) {
        self.enqueue(RollupOp::Remove(date));
    }
}
