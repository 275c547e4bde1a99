use crate::control::{ControllerError, Response};
use actix_web::web::{Data, Path, Query};
use actix_web::{get, HttpResponse};
use brk_types::category::CategoryRepository;
use brk_types::product::{ProductRepository, SearchQuery};
use std::sync::Arc;

#[get("/products")]
async fn products(
    repo: Data<Arc<dyn ProductRepository>>,
    query: Query<SearchQuery>,
) -> Response {
    let products = repo.search(&query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(products))
}

#[get("/products/{sku}")]
async fn product(repo: Data<Arc<dyn ProductRepository>>, sku: Path<String>) -> Response {
    let product = repo
        .get_one(&sku.into_inner())
        .await?
        .ok_or(ControllerError::NotFound)?;
    Ok(HttpResponse::Ok().json(product))
}

#[get("/categories")]
async fn categories(repo: Data<Arc<dyn CategoryRepository>>) -> Response {
    let categories = repo.list().await?;
    Ok(HttpResponse::Ok().json(categories))
}
