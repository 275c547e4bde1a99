use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle of one bulk-upload run. Derived from the counters when the
/// run is recorded; only a rollback mutates it afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("partial")]
    Partial,
    #[display("rolled_back")]
    RolledBack,
}

impl UploadStatus {
    /// `Completed` iff nothing failed, `Failed` iff nothing succeeded,
    /// `Partial` otherwise.
    pub fn from_counts(successful: usize, failed: usize) -> Self {
        if failed == 0 {
            Self::Completed
        } else if successful == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            "rolled_back" => Ok(Self::RolledBack),
            other => Err(anyhow::anyhow!("Unknown upload status: {other}")),
        }
    }
}

/// One ledger row per bulk-upload invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadRun {
    pub id: String,
    pub upload_id: String,
    pub filename: String,
    pub total_products: usize,
    pub successful_products: usize,
    pub failed_products: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: UploadStatus,
    pub has_images: bool,
    pub errors: Vec<String>,
}

impl UploadRun {
    pub fn new(
        filename: String,
        total: usize,
        successful: usize,
        failed: usize,
        has_images: bool,
        errors: Vec<String>,
    ) -> Self {
        let created_at = OffsetDateTime::now_utc();
        let id = format!(
            "upload_{}",
            created_at.unix_timestamp_nanos() / 1_000_000
        );
        Self {
            upload_id: id.clone(),
            id,
            filename,
            total_products: total,
            successful_products: successful,
            failed_products: failed,
            created_at,
            status: UploadStatus::from_counts(successful, failed),
            has_images,
            errors,
        }
    }
}

/// Shape returned to callers of the bulk upload operation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BulkUploadResult {
    pub success: bool,
    pub message: String,
    pub total_products: usize,
    pub successful_products: usize,
    pub failed_products: usize,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait UploadHistoryRepository: Send + Sync {
    async fn save(&self, run: UploadRun) -> Result<(), anyhow::Error>;
    /// Newest-first.
    async fn list(&self) -> Result<Vec<UploadRun>, anyhow::Error>;
    /// Returns whether a run with that id existed. Counters are never
    /// touched; a rollback is a status flip only.
    async fn set_status(
        &self,
        upload_id: &str,
        status: UploadStatus,
    ) -> Result<bool, anyhow::Error>;
}
