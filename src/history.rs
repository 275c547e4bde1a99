use async_trait::async_trait;
use brk_types::upload::{UploadHistoryRepository, UploadRun, UploadStatus};
use rusqlite::params;
use rusqlite::types::Type;
use std::str::FromStr;
use std::sync::Mutex;
use tokio_rusqlite::Connection;

fn errors_to_db(errors: &[String]) -> Option<String> {
    serde_json::to_string(errors).ok()
}

fn errors_from_db(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadRun> {
    let status: String = row.get(7)?;
    let status = UploadStatus::from_str(&status)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, err.into()))?;
    Ok(UploadRun {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        filename: row.get(2)?,
        total_products: row.get::<_, i64>(3)? as usize,
        successful_products: row.get::<_, i64>(4)? as usize,
        failed_products: row.get::<_, i64>(5)? as usize,
        created_at: row.get(6)?,
        status,
        has_images: row.get(8)?,
        errors: errors_from_db(row.get(9)?),
    })
}

pub struct SqliteUploadHistoryRepository {
    conn: Connection,
}

impl SqliteUploadHistoryRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS upload_history (
                    id TEXT PRIMARY KEY,
                    upload_id TEXT NOT NULL UNIQUE,
                    filename TEXT NOT NULL,
                    total_products INTEGER NOT NULL,
                    successful_products INTEGER NOT NULL,
                    failed_products INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    status TEXT NOT NULL,
                    has_images INTEGER NOT NULL,
                    errors TEXT
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl UploadHistoryRepository for SqliteUploadHistoryRepository {
    async fn save(&self, run: UploadRun) -> Result<(), anyhow::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO upload_history (id, upload_id, filename, total_products, successful_products, failed_products, created_at, status, has_images, errors) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        run.id,
                        run.upload_id,
                        run.filename,
                        run.total_products as i64,
                        run.successful_products as i64,
                        run.failed_products as i64,
                        run.created_at,
                        run.status.as_str(),
                        run.has_images,
                        errors_to_db(&run.errors),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UploadRun>, anyhow::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, upload_id, filename, total_products, successful_products, failed_products, created_at, status, has_images, errors FROM upload_history ORDER BY created_at DESC",
                )?;
                let runs = stmt
                    .query_map([], row_to_run)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await?)
    }

    async fn set_status(
        &self,
        upload_id: &str,
        status: UploadStatus,
    ) -> Result<bool, anyhow::Error> {
        let upload_id = upload_id.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE upload_history SET status = ?1 WHERE upload_id = ?2",
                    params![status.as_str(), upload_id],
                )?;
                Ok(changed > 0)
            })
            .await?)
    }
}

#[derive(Default)]
pub struct MemoryUploadHistoryRepository {
    runs: Mutex<Vec<UploadRun>>,
}

impl MemoryUploadHistoryRepository {
    fn with_lock<T>(&self, f: impl FnOnce(&mut Vec<UploadRun>) -> T) -> Result<T, anyhow::Error> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| anyhow::anyhow!("Upload history lock poisoned"))?;
        Ok(f(&mut runs))
    }
}

#[async_trait]
impl UploadHistoryRepository for MemoryUploadHistoryRepository {
    async fn save(&self, run: UploadRun) -> Result<(), anyhow::Error> {
        self.with_lock(|runs| runs.push(run))
    }

    async fn list(&self) -> Result<Vec<UploadRun>, anyhow::Error> {
        self.with_lock(|runs| {
            let mut runs = runs.clone();
            runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            runs
        })
    }

    async fn set_status(
        &self,
        upload_id: &str,
        status: UploadStatus,
    ) -> Result<bool, anyhow::Error> {
        self.with_lock(|runs| {
            match runs.iter_mut().find(|r| r.upload_id == upload_id) {
                Some(run) => {
                    run.status = status;
                    true
                }
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filename: &str, successful: usize, failed: usize) -> UploadRun {
        UploadRun::new(
            filename.to_string(),
            successful + failed,
            successful,
            failed,
            false,
            vec!["Row 2 (BRK001): boom".to_string(); failed.min(1)],
        )
    }

    #[tokio::test]
    async fn sqlite_round_trips_and_flips_status() {
        let conn = Connection::open_in_memory().await.unwrap();
        let repo = SqliteUploadHistoryRepository::init(conn).await.unwrap();
        let recorded = run("products.xlsx", 2, 1);
        let upload_id = recorded.upload_id.clone();
        repo.save(recorded).await.unwrap();

        let runs = repo.list().await.unwrap();
        assert_eq!(1, runs.len());
        assert_eq!(UploadStatus::Partial, runs[0].status);
        assert_eq!(2, runs[0].successful_products);
        assert_eq!(1, runs[0].errors.len());

        assert!(repo
            .set_status(&upload_id, UploadStatus::RolledBack)
            .await
            .unwrap());
        let runs = repo.list().await.unwrap();
        assert_eq!(UploadStatus::RolledBack, runs[0].status);
        // Counters survive the flip.
        assert_eq!(2, runs[0].successful_products);
        assert_eq!(1, runs[0].failed_products);

        assert!(!repo
            .set_status("upload_0", UploadStatus::RolledBack)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn memory_lists_newest_first() {
        let repo = MemoryUploadHistoryRepository::default();
        let mut older = run("first.xlsx", 1, 0);
        older.created_at -= time::Duration::minutes(5);
        repo.save(older).await.unwrap();
        repo.save(run("second.xlsx", 1, 0)).await.unwrap();
        let runs = repo.list().await.unwrap();
        assert_eq!("second.xlsx", runs[0].filename);
        assert!(!repo
            .set_status("missing", UploadStatus::RolledBack)
            .await
            .unwrap());
    }
}
