use async_trait::async_trait;
use brk_types::product::{Product, ProductRepository, SearchQuery};
use rusqlite::types::Type;
use rusqlite::params;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Remove, Save};
use typesafe_repository::prelude::*;

const COLUMNS: &str = "sku, codigo_brk, name, description, category, vendor, subgrupo, ref_brk, posicion, ref_fmsi_oem, marca, linea, modelo, version, price, stock, largo_mm, ancho_mm, espesor_mm, diametro_a_mm, alto_b_mm, espesor_c_mm, espesor_min_mm, agujeros, diametro_interno_a_mm, diametro_orificio_central_c_mm, altura_total_d_mm, agujeros4, diametro_interno_maximo, diametro, largo, x_juego_pastilla, largo_mm10, images, created_at, updated_at";

fn images_to_db(images: &[String]) -> Option<String> {
    if images.is_empty() {
        return None;
    }
    serde_json::to_string(images).ok()
}

fn images_from_db(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let price = row
        .get::<_, Option<String>>(14)?
        .map(|s| Decimal::from_str(&s))
        .transpose()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(err)))?;
    let stock: Option<i64> = row.get(15)?;
    Ok(Product {
        sku: row.get(0)?,
        codigo_brk: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        vendor: row.get(5)?,
        subgrupo: row.get(6)?,
        ref_brk: row.get(7)?,
        posicion: row.get(8)?,
        ref_fmsi_oem: row.get(9)?,
        marca: row.get(10)?,
        linea: row.get(11)?,
        modelo: row.get(12)?,
        version: row.get(13)?,
        price,
        stock: stock.map(|q| q.max(0) as u32),
        largo_mm: row.get(16)?,
        ancho_mm: row.get(17)?,
        espesor_mm: row.get(18)?,
        diametro_a_mm: row.get(19)?,
        alto_b_mm: row.get(20)?,
        espesor_c_mm: row.get(21)?,
        espesor_min_mm: row.get(22)?,
        agujeros: row.get(23)?,
        diametro_interno_a_mm: row.get(24)?,
        diametro_orificio_central_c_mm: row.get(25)?,
        altura_total_d_mm: row.get(26)?,
        agujeros4: row.get(27)?,
        diametro_interno_maximo: row.get(28)?,
        diametro: row.get(29)?,
        largo: row.get(30)?,
        x_juego_pastilla: row.get(31)?,
        largo_mm10: row.get(32)?,
        images: images_from_db(row.get(33)?),
        created_at: row.get(34)?,
        updated_at: row.get(35)?,
    })
}

macro_rules! product_params {
    ($p:expr) => {
        params![
            $p.sku,
            $p.codigo_brk,
            $p.name,
            $p.description,
            $p.category,
            $p.vendor,
            $p.subgrupo,
            $p.ref_brk,
            $p.posicion,
            $p.ref_fmsi_oem,
            $p.marca,
            $p.linea,
            $p.modelo,
            $p.version,
            $p.price.map(|d| d.to_string()),
            $p.stock.map(|q| q as i64),
            $p.largo_mm,
            $p.ancho_mm,
            $p.espesor_mm,
            $p.diametro_a_mm,
            $p.alto_b_mm,
            $p.espesor_c_mm,
            $p.espesor_min_mm,
            $p.agujeros,
            $p.diametro_interno_a_mm,
            $p.diametro_orificio_central_c_mm,
            $p.altura_total_d_mm,
            $p.agujeros4,
            $p.diametro_interno_maximo,
            $p.diametro,
            $p.largo,
            $p.x_juego_pastilla,
            $p.largo_mm10,
            images_to_db(&$p.images),
            $p.created_at,
            $p.updated_at,
        ]
    };
}

const INSERT_SQL: &str = "INSERT INTO products (sku, codigo_brk, name, description, category, vendor, subgrupo, ref_brk, posicion, ref_fmsi_oem, marca, linea, modelo, version, price, stock, largo_mm, ancho_mm, espesor_mm, diametro_a_mm, alto_b_mm, espesor_c_mm, espesor_min_mm, agujeros, diametro_interno_a_mm, diametro_orificio_central_c_mm, altura_total_d_mm, agujeros4, diametro_interno_maximo, diametro, largo, x_juego_pastilla, largo_mm10, images, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36)";

const UPDATE_SQL: &str = "UPDATE products SET codigo_brk=?2, name=?3, description=?4, category=?5, vendor=?6, subgrupo=?7, ref_brk=?8, posicion=?9, ref_fmsi_oem=?10, marca=?11, linea=?12, modelo=?13, version=?14, price=?15, stock=?16, largo_mm=?17, ancho_mm=?18, espesor_mm=?19, diametro_a_mm=?20, alto_b_mm=?21, espesor_c_mm=?22, espesor_min_mm=?23, agujeros=?24, diametro_interno_a_mm=?25, diametro_orificio_central_c_mm=?26, altura_total_d_mm=?27, agujeros4=?28, diametro_interno_maximo=?29, diametro=?30, largo=?31, x_juego_pastilla=?32, largo_mm10=?33, images=?34, updated_at=?36 WHERE sku=?1";

pub struct SqliteProductRepository {
    conn: Connection,
}

impl SqliteProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            conn.execute(
                "CREATE TABLE IF NOT EXISTS products (
                    sku TEXT PRIMARY KEY,
                    codigo_brk TEXT NOT NULL,
                    name TEXT,
                    description TEXT,
                    category TEXT,
                    vendor TEXT,
                    subgrupo TEXT,
                    ref_brk TEXT,
                    posicion TEXT,
                    ref_fmsi_oem TEXT,
                    marca TEXT,
                    linea TEXT,
                    modelo TEXT,
                    version TEXT,
                    price TEXT,
                    stock INTEGER,
                    largo_mm REAL,
                    ancho_mm REAL,
                    espesor_mm REAL,
                    diametro_a_mm REAL,
                    alto_b_mm REAL,
                    espesor_c_mm REAL,
                    espesor_min_mm REAL,
                    agujeros TEXT,
                    diametro_interno_a_mm REAL,
                    diametro_orificio_central_c_mm REAL,
                    altura_total_d_mm REAL,
                    agujeros4 TEXT,
                    diametro_interno_maximo REAL,
                    diametro REAL,
                    largo REAL,
                    x_juego_pastilla TEXT,
                    largo_mm10 REAL,
                    images TEXT,
                    created_at TEXT,
                    updated_at TEXT
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl Repository<Product> for SqliteProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Product> for SqliteProductRepository {
    async fn save(&self, mut p: Product) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                let now = OffsetDateTime::now_utc();
                p.created_at.get_or_insert(now);
                p.updated_at = Some(now);
                conn.execute(
                    &INSERT_SQL.replacen("INSERT", "INSERT OR REPLACE", 1),
                    product_params!(p),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<Product> for SqliteProductRepository {
    async fn get_one(&self, sku: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
        let sku = sku.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {COLUMNS} FROM products WHERE sku = ?1"))?;
                let p = stmt
                    .query_map([sku], row_to_product)?
                    .next()
                    .transpose()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl List<Product> for SqliteProductRepository {
    async fn list(&self) -> Result<Vec<Product>, Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM products ORDER BY created_at DESC"
                ))?;
                let p = stmt
                    .query_map([], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl Remove<Product> for SqliteProductRepository {
    async fn remove(&self, sku: &IdentityOf<Product>) -> Result<(), Self::Error> {
        let sku = sku.clone();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM products WHERE sku = ?1", params![sku])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn insert(&self, mut p: Product) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                let now = OffsetDateTime::now_utc();
                p.created_at.get_or_insert(now);
                p.updated_at = Some(now);
                conn.execute(INSERT_SQL, product_params!(p))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn update_by_sku(&self, mut p: Product) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                p.updated_at = Some(OffsetDateTime::now_utc());
                conn.execute(UPDATE_SQL, product_params!(p))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, Self::Error> {
        let q = query.q.clone().unwrap_or_default();
        let category = query.category.clone();
        let limit = query.limit.unwrap_or(100).min(1000) as i64;
        let offset = query.offset.unwrap_or(0) as i64;
        Ok(self
            .conn
            .call(move |conn| {
                let pattern = format!("%{q}%");
                let category_pattern = category.unwrap_or_else(|| "%".to_string());
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM products
                    WHERE (name LIKE ?1 OR sku LIKE ?1 OR codigo_brk LIKE ?1 OR marca LIKE ?1 OR modelo LIKE ?1)
                    AND COALESCE(category, '') LIKE ?2
                    ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
                ))?;
                let p = stmt
                    .query_map(
                        params![pattern, category_pattern, limit, offset],
                        row_to_product,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }

    async fn count(&self) -> Result<usize, Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT COUNT(*) FROM products")?;
                let count = stmt
                    .query_map([], |row| row.get::<_, i64>(0))?
                    .next()
                    .transpose()?
                    .unwrap_or_default();
                Ok(count as usize)
            })
            .await?)
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM products", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// In-process fallback store, selected at startup when the backing
/// database is unreachable. Nothing here survives a restart.
#[derive(Default)]
pub struct MemoryProductRepository {
    products: Mutex<Vec<Product>>,
}

impl MemoryProductRepository {
    fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut Vec<Product>) -> T,
    ) -> Result<T, anyhow::Error> {
        let mut products = self
            .products
            .lock()
            .map_err(|_| anyhow::anyhow!("Product store lock poisoned"))?;
        Ok(f(&mut products))
    }
}

impl Repository<Product> for MemoryProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Product> for MemoryProductRepository {
    async fn save(&self, mut p: Product) -> Result<(), Self::Error> {
        self.with_lock(|products| {
            let now = OffsetDateTime::now_utc();
            p.created_at.get_or_insert(now);
            p.updated_at = Some(now);
            match products.iter_mut().find(|e| e.sku == p.sku) {
                Some(existing) => *existing = p,
                None => products.push(p),
            }
        })
    }
}

#[async_trait]
impl Get<Product> for MemoryProductRepository {
    async fn get_one(&self, sku: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
        self.with_lock(|products| products.iter().find(|p| &p.sku == sku).cloned())
    }
}

#[async_trait]
impl List<Product> for MemoryProductRepository {
    async fn list(&self) -> Result<Vec<Product>, Self::Error> {
        self.with_lock(|products| products.clone())
    }
}

#[async_trait]
impl Remove<Product> for MemoryProductRepository {
    async fn remove(&self, sku: &IdentityOf<Product>) -> Result<(), Self::Error> {
        self.with_lock(|products| products.retain(|p| &p.sku != sku))
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn insert(&self, mut p: Product) -> Result<(), Self::Error> {
        self.with_lock(|products| {
            if products.iter().any(|e| e.sku == p.sku) {
                return Err(anyhow::anyhow!("Product {} already exists", p.sku));
            }
            let now = OffsetDateTime::now_utc();
            p.created_at.get_or_insert(now);
            p.updated_at = Some(now);
            products.push(p);
            Ok(())
        })?
    }

    async fn update_by_sku(&self, mut p: Product) -> Result<(), Self::Error> {
        self.with_lock(|products| {
            match products.iter_mut().find(|e| e.sku == p.sku) {
                Some(existing) => {
                    p.created_at = existing.created_at;
                    p.updated_at = Some(OffsetDateTime::now_utc());
                    *existing = p;
                    Ok(())
                }
                None => Err(anyhow::anyhow!("Product {} not found", p.sku)),
            }
        })?
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, Self::Error> {
        let q = query.q.clone().unwrap_or_default().to_lowercase();
        let category = query.category.clone();
        let limit = query.limit.unwrap_or(100).min(1000);
        let offset = query.offset.unwrap_or(0);
        self.with_lock(|products| {
            products
                .iter()
                .filter(|p| {
                    let text_ok = q.is_empty()
                        || p.name
                            .as_deref()
                            .is_some_and(|n| n.to_lowercase().contains(&q))
                        || p.sku.to_lowercase().contains(&q)
                        || p.codigo_brk.to_lowercase().contains(&q)
                        || p.marca
                            .as_deref()
                            .is_some_and(|m| m.to_lowercase().contains(&q))
                        || p.modelo
                            .as_deref()
                            .is_some_and(|m| m.to_lowercase().contains(&q));
                    let category_ok = category
                        .as_deref()
                        .map(|c| p.category.as_deref() == Some(c))
                        .unwrap_or(true);
                    text_ok && category_ok
                })
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    async fn count(&self) -> Result<usize, Self::Error> {
        self.with_lock(|products| products.len())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.with_lock(|products| products.clear())
    }
}
