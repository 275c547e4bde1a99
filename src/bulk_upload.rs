use crate::archive::ImageMap;
use crate::images::{resolve_product_image, ImageStore};
use brk_types::product::{Product, ProductRepository};
use brk_types::upload::{BulkUploadResult, UploadHistoryRepository, UploadRun, UploadStatus};
use log_error::LogError;
use std::sync::Arc;
use time::OffsetDateTime;

fn row_error(index: usize, code: &str, message: impl std::fmt::Display) -> String {
    let code = if code.trim().is_empty() { "unknown" } else { code };
    format!("Row {} ({code}): {message}", index + 1)
}

fn backfill_sku(product: &mut Product) {
    if !product.sku.trim().is_empty() {
        return;
    }
    let mut sku = product.derived_sku();
    if sku.is_empty() {
        sku = format!(
            "{}_{}",
            product.codigo_brk,
            OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
        );
        sku.retain(|c| !c.is_whitespace());
        sku = sku.to_uppercase();
    }
    product.sku = sku;
}

/// Imports parsed products one row at a time.
///
/// Rows are strictly sequential: each row finishes its repository round
/// trip before the next starts, so the progress callback is monotone and
/// row errors land in spreadsheet order. A failing row never aborts the
/// run; it is recorded and the loop moves on.
pub struct BulkUploadService {
    products: Arc<dyn ProductRepository>,
    history: Arc<dyn UploadHistoryRepository>,
    images: Arc<dyn ImageStore>,
    degraded: bool,
}

impl BulkUploadService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        history: Arc<dyn UploadHistoryRepository>,
        images: Arc<dyn ImageStore>,
        degraded: bool,
    ) -> Self {
        Self {
            products,
            history,
            images,
            degraded,
        }
    }

    /// `true` when the backing database was unreachable at startup and
    /// writes go to the in-process store instead.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub async fn upload_products(
        &self,
        rows: Vec<Product>,
        images: Option<&ImageMap>,
        filename: &str,
        mut progress: impl FnMut(f64) + Send,
    ) -> BulkUploadResult {
        let total = rows.len();
        let has_images = images.map(|m| !m.is_empty()).unwrap_or(false);
        let mut successful = 0usize;
        let mut errors = Vec::new();

        for (index, mut product) in rows.into_iter().enumerate() {
            if let Err(err) = self.upload_row(&mut product, images).await {
                log::error!("Import row {} failed: {err:#}", index + 1);
                errors.push(row_error(index, product.code(), err));
            } else {
                successful += 1;
            }
            // Exactly one progress tick per row, ending at 100.
            progress((index + 1) as f64 / total as f64 * 100.0);
        }

        let failed = errors.len();
        let run = UploadRun::new(
            filename.to_string(),
            total,
            successful,
            failed,
            has_images,
            errors.clone(),
        );
        log::info!(
            "Upload {} finished: {successful}/{total} products imported ({})",
            run.upload_id,
            run.status
        );
        // A broken ledger must not fail an import that already happened.
        self.history.save(run).await.log_error("Unable to record upload history");

        let message = if self.degraded {
            format!("Saved {successful} of {total} products in memory (database unavailable)")
        } else {
            format!("Uploaded {successful} of {total} products")
        };
        BulkUploadResult {
            success: successful > 0,
            message,
            total_products: total,
            successful_products: successful,
            failed_products: failed,
            errors,
        }
    }

    async fn upload_row(
        &self,
        product: &mut Product,
        images: Option<&ImageMap>,
    ) -> Result<(), anyhow::Error> {
        if product.codigo_brk.trim().is_empty() {
            return Err(anyhow::anyhow!("missing product code"));
        }
        backfill_sku(product);

        if let (Some(images), Some(ref_brk)) = (images, product.ref_brk.clone()) {
            if let Some(url) = resolve_product_image(self.images.as_ref(), &ref_brk, images).await {
                product.images = vec![url];
            }
        }

        if self.degraded {
            // In-process store only; upsert semantics without lookups.
            return self.products.save(product.clone()).await;
        }
        match self.products.get_one(&product.sku).await? {
            Some(_) => self.products.update_by_sku(product.clone()).await,
            None => self.products.insert(product.clone()).await,
        }
    }

    /// Marks a recorded run as rolled back. Product rows written by the
    /// run stay in place; only the ledger status changes. Returns `false`
    /// when no run with that id exists.
    pub async fn rollback(&self, upload_id: &str) -> Result<bool, anyhow::Error> {
        let found = self
            .history
            .set_status(upload_id, UploadStatus::RolledBack)
            .await?;
        if found && self.degraded {
            // Nothing durable to preserve, so degraded mode wipes the
            // in-process catalog wholesale.
            self.products.clear().await?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryUploadHistoryRepository;
    use crate::images::MemoryImageStore;
    use crate::product::MemoryProductRepository;
    use async_trait::async_trait;
    use brk_types::product::SearchQuery;
    use typesafe_repository::async_ops::{Get, List, Remove, Save};
    use typesafe_repository::prelude::*;

    fn product(code: &str) -> Product {
        Product {
            codigo_brk: code.to_string(),
            marca: Some("Ford".to_string()),
            modelo: Some("Focus".to_string()),
            ..Product::default()
        }
    }

    fn service(
        products: Arc<dyn ProductRepository>,
    ) -> (BulkUploadService, Arc<MemoryUploadHistoryRepository>) {
        let history = Arc::new(MemoryUploadHistoryRepository::default());
        let service = BulkUploadService::new(
            products,
            history.clone(),
            Arc::new(MemoryImageStore::default()),
            false,
        );
        (service, history)
    }

    /// Delegates to an in-memory store but refuses a chosen product code.
    struct RejectingRepository {
        inner: MemoryProductRepository,
        reject: String,
    }

    impl Repository<Product> for RejectingRepository {
        type Error = anyhow::Error;
    }

    #[async_trait]
    impl Save<Product> for RejectingRepository {
        async fn save(&self, p: Product) -> Result<(), Self::Error> {
            self.inner.save(p).await
        }
    }

    #[async_trait]
    impl Get<Product> for RejectingRepository {
        async fn get_one(&self, sku: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
            self.inner.get_one(sku).await
        }
    }

    #[async_trait]
    impl List<Product> for RejectingRepository {
        async fn list(&self) -> Result<Vec<Product>, Self::Error> {
            self.inner.list().await
        }
    }

    #[async_trait]
    impl Remove<Product> for RejectingRepository {
        async fn remove(&self, sku: &IdentityOf<Product>) -> Result<(), Self::Error> {
            self.inner.remove(sku).await
        }
    }

    #[async_trait]
    impl ProductRepository for RejectingRepository {
        async fn insert(&self, p: Product) -> Result<(), Self::Error> {
            if p.codigo_brk == self.reject {
                return Err(anyhow::anyhow!("constraint violation"));
            }
            self.inner.insert(p).await
        }

        async fn update_by_sku(&self, p: Product) -> Result<(), Self::Error> {
            self.inner.update_by_sku(p).await
        }

        async fn search(&self, q: &SearchQuery) -> Result<Vec<Product>, Self::Error> {
            self.inner.search(q).await
        }

        async fn count(&self) -> Result<usize, Self::Error> {
            self.inner.count().await
        }

        async fn clear(&self) -> Result<(), Self::Error> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn progress_ticks_once_per_row_and_ends_at_100() {
        let (service, _) = service(Arc::new(MemoryProductRepository::default()));
        let mut ticks = Vec::new();
        let rows = vec![product("BRK001"), product("BRK002"), product("BRK003")];
        let result = service
            .upload_products(rows, None, "products.xlsx", |p| ticks.push(p))
            .await;
        assert_eq!(3, ticks.len());
        assert!(ticks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Some(&100.0), ticks.last());
        assert_eq!(3, result.successful_products);
        assert!(result.success);
    }

    #[tokio::test]
    async fn failing_rows_are_counted_and_do_not_abort_the_run() {
        let repo = Arc::new(RejectingRepository {
            inner: MemoryProductRepository::default(),
            reject: "BRK002".to_string(),
        });
        let (service, history) = service(repo.clone());
        let rows = vec![product("BRK001"), product("BRK002"), product("BRK003")];
        let result = service
            .upload_products(rows, None, "products.xlsx", |_| {})
            .await;

        assert!(result.success);
        assert_eq!(3, result.total_products);
        assert_eq!(2, result.successful_products);
        assert_eq!(1, result.failed_products);
        assert_eq!(1, result.errors.len());
        assert!(result.errors[0].starts_with("Row 2 (BRK002):"));
        assert_eq!(2, repo.count().await.unwrap());

        let runs = history.list().await.unwrap();
        assert_eq!(UploadStatus::Partial, runs[0].status);
        assert_eq!(result.errors, runs[0].errors);
    }

    #[tokio::test]
    async fn run_with_no_successes_is_failed() {
        let repo = Arc::new(RejectingRepository {
            inner: MemoryProductRepository::default(),
            reject: "BRK001".to_string(),
        });
        let (service, history) = service(repo);
        let result = service
            .upload_products(vec![product("BRK001")], None, "products.xlsx", |_| {})
            .await;
        assert!(!result.success);
        assert_eq!(0, result.successful_products);
        let runs = history.list().await.unwrap();
        assert_eq!(UploadStatus::Failed, runs[0].status);
    }

    #[tokio::test]
    async fn second_upload_of_same_code_updates_in_place() {
        let repo = Arc::new(MemoryProductRepository::default());
        let (service, _) = service(repo.clone());
        let mut first = product("BRK001");
        first.name = Some("Old".to_string());
        service
            .upload_products(vec![first], None, "a.xlsx", |_| {})
            .await;
        let mut second = product("BRK001");
        second.name = Some("New".to_string());
        let result = service
            .upload_products(vec![second], None, "b.xlsx", |_| {})
            .await;
        assert_eq!(1, result.successful_products);
        assert_eq!(1, repo.count().await.unwrap());
        let all = repo.list().await.unwrap();
        assert_eq!(Some("New".to_string()), all[0].name);
    }

    #[tokio::test]
    async fn matched_image_lands_on_the_stored_product() {
        let repo = Arc::new(MemoryProductRepository::default());
        let (service, _) = service(repo.clone());
        let mut images = ImageMap::default();
        images.insert("BRK001.webp".to_string(), vec![1, 2, 3]);
        let mut row = product("BRK001");
        row.ref_brk = Some("BRK001".to_string());
        service
            .upload_products(vec![row], Some(&images), "a.xlsx", |_| {})
            .await;
        let all = repo.list().await.unwrap();
        assert_eq!(
            vec!["memory://products/BRK001.webp".to_string()],
            all[0].images
        );
    }

    #[tokio::test]
    async fn rollback_flips_status_and_keeps_counters() {
        let (service, history) = service(Arc::new(MemoryProductRepository::default()));
        service
            .upload_products(vec![product("BRK001")], None, "a.xlsx", |_| {})
            .await;
        let upload_id = history.list().await.unwrap()[0].upload_id.clone();

        assert!(service.rollback(&upload_id).await.unwrap());
        let runs = history.list().await.unwrap();
        assert_eq!(UploadStatus::RolledBack, runs[0].status);
        assert_eq!(1, runs[0].successful_products);

        assert!(!service.rollback("upload_0").await.unwrap());
    }

    #[tokio::test]
    async fn degraded_mode_saves_in_memory_and_rollback_clears() {
        let repo = Arc::new(MemoryProductRepository::default());
        let history = Arc::new(MemoryUploadHistoryRepository::default());
        let service = BulkUploadService::new(
            repo.clone(),
            history.clone(),
            Arc::new(MemoryImageStore::default()),
            true,
        );
        let result = service
            .upload_products(
                vec![product("BRK001"), product("BRK002")],
                None,
                "a.xlsx",
                |_| {},
            )
            .await;
        assert!(result.success);
        assert!(result.message.contains("in memory"));
        assert_eq!(2, repo.count().await.unwrap());

        // An unknown id must not wipe the in-process catalog.
        assert!(!service.rollback("upload_0").await.unwrap());
        assert_eq!(2, repo.count().await.unwrap());

        let upload_id = history.list().await.unwrap()[0].upload_id.clone();
        assert!(service.rollback(&upload_id).await.unwrap());
        assert_eq!(0, repo.count().await.unwrap());
    }

    #[test]
    fn sku_backfill_prefers_derived_identity() {
        let mut p = product("BRK001");
        backfill_sku(&mut p);
        assert_eq!("BRK001FORDFOCUS", p.sku);

        let mut explicit = product("BRK001");
        explicit.sku = "CUSTOM".to_string();
        backfill_sku(&mut explicit);
        assert_eq!("CUSTOM", explicit.sku);
    }
}
