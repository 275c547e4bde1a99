use crate::archive::extract_images;
use crate::bulk_upload::BulkUploadService;
use crate::control::{AdminUser, ControllerError, Response};
use crate::spreadsheet::parse_products;
use crate::template::{create_template, TEMPLATE_FILENAME};
use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::web::{Data, Path};
use actix_web::{get, post, HttpResponse};
use anyhow::Context;
use brk_types::upload::UploadHistoryRepository;
use serde::Serialize;
use std::sync::{Arc, Mutex};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, Serialize)]
pub struct ProgressInfo {
    pub filename: String,
    pub percent: f64,
}

/// Last-known progress of the running (or most recent) import, polled by
/// the admin UI while the upload request is still in flight.
#[derive(Clone, Default)]
pub struct UploadProgress(Arc<Mutex<Option<ProgressInfo>>>);

impl UploadProgress {
    pub fn set(&self, filename: &str, percent: f64) {
        if let Ok(mut state) = self.0.lock() {
            *state = Some(ProgressInfo {
                filename: filename.to_string(),
                percent,
            });
        }
    }

    pub fn get(&self) -> Option<ProgressInfo> {
        self.0.lock().ok().and_then(|state| state.clone())
    }
}

#[derive(MultipartForm, Debug)]
pub struct BulkUploadForm {
    file: TempFile,
    images: Option<TempFile>,
}

#[post("/upload")]
async fn bulk_upload(
    service: Data<Arc<BulkUploadService>>,
    progress: Data<UploadProgress>,
    form: MultipartForm<BulkUploadForm>,
    _user: AdminUser,
) -> Response {
    let form = form.into_inner();
    let filename = form
        .file
        .file_name
        .clone()
        .unwrap_or_else(|| "upload.xlsx".to_string());

    let bytes = tokio::fs::read(form.file.file.path())
        .await
        .context("Unable to read the uploaded spreadsheet")?;
    let rows = parse_products(&bytes).map_err(|err| ControllerError::InvalidInput {
        field: "file".to_string(),
        msg: format!("{err:#}"),
    })?;

    let images = match &form.images {
        Some(archive) => {
            let bytes = tokio::fs::read(archive.file.path())
                .await
                .context("Unable to read the uploaded image archive")?;
            Some(
                extract_images(bytes)
                    .await
                    .map_err(|err| ControllerError::InvalidInput {
                        field: "images".to_string(),
                        msg: format!("{err:#}"),
                    })?,
            )
        }
        None => None,
    };

    progress.set(&filename, 0.0);
    let tracker = progress.clone();
    let tracked_name = filename.clone();
    let result = service
        .upload_products(rows, images.as_ref(), &filename, move |percent| {
            tracker.set(&tracked_name, percent)
        })
        .await;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/upload/progress")]
async fn upload_progress(progress: Data<UploadProgress>, _user: AdminUser) -> Response {
    Ok(HttpResponse::Ok().json(progress.get()))
}

#[get("/upload/history")]
async fn upload_history(
    history: Data<Arc<dyn UploadHistoryRepository>>,
    _user: AdminUser,
) -> Response {
    Ok(HttpResponse::Ok().json(history.list().await?))
}

#[post("/upload/{upload_id}/rollback")]
async fn rollback_upload(
    service: Data<Arc<BulkUploadService>>,
    upload_id: Path<String>,
    _user: AdminUser,
) -> Response {
    if !service.rollback(&upload_id.into_inner()).await? {
        return Err(ControllerError::NotFound);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "status": "rolled_back",
    })))
}

#[get("/upload/template")]
async fn upload_template(_user: AdminUser) -> Response {
    let bytes = create_template()?;
    Ok(HttpResponse::Ok()
        .content_type(XLSX_CONTENT_TYPE)
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{TEMPLATE_FILENAME}\""),
        ))
        .body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_tracks_latest_tick() {
        let progress = UploadProgress::default();
        assert!(progress.get().is_none());
        progress.set("products.xlsx", 50.0);
        progress.set("products.xlsx", 100.0);
        let info = progress.get().unwrap();
        assert_eq!(100.0, info.percent);
        assert_eq!("products.xlsx", info.filename);
    }
}
