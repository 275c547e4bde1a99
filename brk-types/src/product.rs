use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use typesafe_repository::async_ops::{Get, List, Remove, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;

/// One catalog row. `sku` is the durable unique key; `codigo_brk` is the
/// natural product code and the only field the import pipeline requires.
/// Optional numerics stay `None` when the source cell is blank or
/// unparseable — `None` means "unspecified", not "measured as zero".
#[derive(Id, Clone, Debug, Default, Serialize, Deserialize)]
#[Id(ref_id, get_id)]
pub struct Product {
    #[id]
    pub sku: String,
    pub codigo_brk: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub subgrupo: Option<String>,
    pub ref_brk: Option<String>,
    pub posicion: Option<String>,
    pub ref_fmsi_oem: Option<String>,
    pub marca: Option<String>,
    pub linea: Option<String>,
    pub modelo: Option<String>,
    pub version: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<u32>,
    pub largo_mm: Option<f64>,
    pub ancho_mm: Option<f64>,
    pub espesor_mm: Option<f64>,
    pub diametro_a_mm: Option<f64>,
    pub alto_b_mm: Option<f64>,
    pub espesor_c_mm: Option<f64>,
    pub espesor_min_mm: Option<f64>,
    pub agujeros: Option<String>,
    pub diametro_interno_a_mm: Option<f64>,
    pub diametro_orificio_central_c_mm: Option<f64>,
    pub altura_total_d_mm: Option<f64>,
    pub agujeros4: Option<String>,
    pub diametro_interno_maximo: Option<f64>,
    pub diametro: Option<f64>,
    pub largo: Option<f64>,
    pub x_juego_pastilla: Option<String>,
    pub largo_mm10: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Product {
    pub fn code(&self) -> &str {
        &self.codigo_brk
    }

    /// Derived SKU when none was supplied: code + brand + line + model,
    /// whitespace stripped, upper-cased. Deterministic for identical input.
    pub fn derived_sku(&self) -> String {
        derive_sku(
            &self.codigo_brk,
            self.marca.as_deref().unwrap_or_default(),
            self.linea.as_deref().unwrap_or_default(),
            self.modelo.as_deref().unwrap_or_default(),
        )
    }
}

pub fn derive_sku(codigo_brk: &str, marca: &str, linea: &str, modelo: &str) -> String {
    let mut sku = format!("{codigo_brk}{marca}{linea}{modelo}");
    sku.retain(|c| !c.is_whitespace());
    sku.to_uppercase()
}

pub fn derive_name(marca: &str, linea: &str, modelo: &str, subgrupo: &str) -> String {
    let name = join_non_empty(&[marca, linea, modelo, subgrupo]);
    if name.is_empty() {
        "Producto sin nombre".to_string()
    } else {
        name
    }
}

pub fn derive_description(
    subgrupo: &str,
    posicion: &str,
    marca: &str,
    linea: &str,
    modelo: &str,
    version: &str,
) -> String {
    let target = join_non_empty(&[marca, linea, modelo, version]);
    let kind = join_non_empty(&[subgrupo, posicion]);
    match (kind.is_empty(), target.is_empty()) {
        (false, false) => format!("{kind} para {target}"),
        (false, true) => kind,
        (true, false) => target,
        (true, true) => String::new(),
    }
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filters for the public listing endpoint.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait]
pub trait ProductRepository:
    Repository<Product, Error = anyhow::Error>
    + Save<Product>
    + Get<Product>
    + List<Product>
    + Remove<Product>
    + Send
    + Sync
{
    /// Fails when the sku already exists, unlike `save`.
    async fn insert(&self, product: Product) -> Result<(), Self::Error>;
    /// Updates the row identified by `product.sku`.
    async fn update_by_sku(&self, product: Product) -> Result<(), Self::Error>;
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, Self::Error>;
    async fn count(&self) -> Result<usize, Self::Error>;
    async fn clear(&self) -> Result<(), Self::Error>;
}
