use actix_multipart::form::MultipartFormConfig;
use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::middleware::{DefaultHeaders, TrailingSlash};
use actix_web::web::{scope, Data, FormConfig};
use actix_web::{App, HttpServer};
use brk_catalog::bulk_upload::BulkUploadService;
use brk_catalog::control::upload::UploadProgress;
use brk_catalog::images::{FilesystemImageStore, ImageStore, MemoryImageStore};
use brk_catalog::{category, control, history, product, PORT, PUBLIC_URL, SELF_ADDR};
use brk_types::category::CategoryRepository;
use brk_types::product::ProductRepository;
use brk_types::upload::UploadHistoryRepository;
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const CATALOG_DB: &str = "storage/catalog.db";

struct Stores {
    products: Arc<dyn ProductRepository>,
    categories: Arc<dyn CategoryRepository>,
    history: Arc<dyn UploadHistoryRepository>,
    images: Arc<dyn ImageStore>,
}

/// Opens the sqlite-backed stores, probing connectivity first so a broken
/// database file surfaces here and not on the first request.
///
/// Each repository gets its own Connection due to ownership requirements.
/// SQLite with WAL mode supports multiple connections to the same
/// database file safely.
async fn open_sqlite_stores() -> Result<Stores, anyhow::Error> {
    std::fs::create_dir_all("storage")?;
    let probe = Connection::open(CATALOG_DB).await?;
    probe
        .call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await?;

    let products = Arc::new(
        product::SqliteProductRepository::init(Connection::open(CATALOG_DB).await?).await?,
    );
    let categories = Arc::new(
        category::SqliteCategoryRepository::init(Connection::open(CATALOG_DB).await?).await?,
    );
    let history = Arc::new(
        history::SqliteUploadHistoryRepository::init(Connection::open(CATALOG_DB).await?).await?,
    );
    Ok(Stores {
        products,
        categories,
        history,
        images: Arc::new(FilesystemImageStore::new(
            "static/products",
            format!("{}/static/products", *PUBLIC_URL),
        )),
    })
}

fn memory_stores() -> Stores {
    Stores {
        products: Arc::new(product::MemoryProductRepository::default()),
        categories: Arc::new(category::MemoryCategoryRepository::default()),
        history: Arc::new(history::MemoryUploadHistoryRepository::default()),
        images: Arc::new(MemoryImageStore::default()),
    }
}

fn session_key() -> Result<Key, anyhow::Error> {
    let secret = match envmnt::get_parse::<_, String, _>("SESSION_KEY") {
        Ok(v) => v,
        Err(envmnt::errors::EnvmntError::Missing(_)) => {
            let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
            let mut f = std::fs::File::options().append(true).open(".env")?;
            f.write_all(format!("SESSION_KEY={key}\n").as_bytes())?;
            key
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to read secret key: {err}"));
        }
    };
    Ok(Key::from(secret.as_bytes()))
}

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let (stores, degraded) = match open_sqlite_stores().await {
        Ok(stores) => (stores, false),
        Err(err) => {
            log::error!("Database unavailable, falling back to in-memory storage: {err:#}");
            (memory_stores(), true)
        }
    };
    let Stores {
        products,
        categories,
        history,
        images,
    } = stores;

    let upload_service = Arc::new(BulkUploadService::new(
        products.clone(),
        history.clone(),
        images.clone(),
        degraded,
    ));
    let upload_progress = UploadProgress::default();
    let secret_key = session_key()?;

    log::info!("Listening on {}:{}", *SELF_ADDR, *PORT);
    HttpServer::new(move || {
        App::new()
            .app_data(FormConfig::default().limit(256 * 1024))
            .app_data(MultipartFormConfig::default().total_limit(50 * 1024 * 1024))
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"))
                    .add(("Access-Control-Allow-Headers", "*")),
            )
            .wrap(actix_web::middleware::Compress::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_http_only(false)
                    .cookie_secure(false)
                    .build(),
            )
            .wrap(actix_web::middleware::NormalizePath::new(
                TrailingSlash::Trim,
            ))
            .app_data(Data::new(products.clone()))
            .app_data(Data::new(categories.clone()))
            .app_data(Data::new(history.clone()))
            .app_data(Data::new(upload_service.clone()))
            .app_data(Data::new(upload_progress.clone()))
            .service(actix_files::Files::new("/static", "static"))
            .service(
                scope("/api")
                    .service(control::catalog::products)
                    .service(control::catalog::product)
                    .service(control::catalog::categories),
            )
            .service(
                scope("/admin")
                    .service(control::log_in)
                    .service(control::log_out)
                    .service(control::admin::save_product)
                    .service(control::admin::delete_product)
                    .service(control::admin::create_category)
                    .service(control::admin::delete_category)
                    .service(control::admin::dashboard)
                    .service(control::upload::bulk_upload)
                    .service(control::upload::upload_progress)
                    .service(control::upload::upload_history)
                    .service(control::upload::rollback_upload)
                    .service(control::upload::upload_template),
            )
    })
    .bind((SELF_ADDR.as_str(), *PORT))?
    .run()
    .await?;
    Ok(())
}
