use crate::control::{AdminUser, ControllerError, Response};
use actix_web::web::{Data, Json, Path};
use actix_web::{delete, get, post, HttpResponse};
use brk_types::category::{Category, CategoryRepository};
use brk_types::product::{Product, ProductRepository};
use brk_types::upload::UploadHistoryRepository;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[post("/products")]
async fn save_product(
    repo: Data<Arc<dyn ProductRepository>>,
    product: Json<Product>,
    _user: AdminUser,
) -> Response {
    let mut product = product.into_inner();
    if product.codigo_brk.trim().is_empty() {
        return Err(ControllerError::InvalidInput {
            field: "codigo_brk".to_string(),
            msg: "a product code is required".to_string(),
        });
    }
    if product.sku.trim().is_empty() {
        product.sku = product.derived_sku();
    }
    repo.save(product.clone()).await?;
    Ok(HttpResponse::Ok().json(product))
}

#[delete("/products/{sku}")]
async fn delete_product(
    repo: Data<Arc<dyn ProductRepository>>,
    sku: Path<String>,
    _user: AdminUser,
) -> Response {
    let sku = sku.into_inner();
    repo.get_one(&sku).await?.ok_or(ControllerError::NotFound)?;
    repo.remove(&sku).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct CategoryDto {
    pub name: String,
    pub description: Option<String>,
}

#[post("/categories")]
async fn create_category(
    repo: Data<Arc<dyn CategoryRepository>>,
    dto: Json<CategoryDto>,
    _user: AdminUser,
) -> Response {
    let dto = dto.into_inner();
    if dto.name.trim().is_empty() {
        return Err(ControllerError::InvalidInput {
            field: "name".to_string(),
            msg: "a category name is required".to_string(),
        });
    }
    let category = Category::new(dto.name.trim().to_string(), dto.description);
    repo.save(category.clone()).await?;
    Ok(HttpResponse::Ok().json(category))
}

#[delete("/categories/{id}")]
async fn delete_category(
    repo: Data<Arc<dyn CategoryRepository>>,
    id: Path<Uuid>,
    _user: AdminUser,
) -> Response {
    let id = id.into_inner();
    repo.get_one(&id).await?.ok_or(ControllerError::NotFound)?;
    repo.remove(&id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

#[get("/dashboard")]
async fn dashboard(
    products: Data<Arc<dyn ProductRepository>>,
    categories: Data<Arc<dyn CategoryRepository>>,
    history: Data<Arc<dyn UploadHistoryRepository>>,
    _user: AdminUser,
) -> Response {
    let product_count = products.count().await?;
    let category_count = categories.list().await?.len();
    let runs = history.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "product_count": product_count,
        "category_count": category_count,
        "upload_count": runs.len(),
        "recent_uploads": runs.into_iter().take(10).collect::<Vec<_>>(),
    })))
}
