use async_trait::async_trait;
use brk_types::category::{Category, CategoryRepository};
use rusqlite::params;
use std::sync::Mutex;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Remove, Save};
use typesafe_repository::prelude::*;

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

pub struct SqliteCategoryRepository {
    conn: Connection,
}

impl SqliteCategoryRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS categories (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl Repository<Category> for SqliteCategoryRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Category> for SqliteCategoryRepository {
    async fn save(&self, c: Category) -> Result<(), Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO categories (id, name, description) VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET name=?2, description=?3",
                    params![c.id, c.name, c.description],
                )?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Get<Category> for SqliteCategoryRepository {
    async fn get_one(&self, id: &IdentityOf<Category>) -> Result<Option<Category>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, description FROM categories WHERE id = ?1")?;
                let c = stmt
                    .query_map([id], row_to_category)?
                    .next()
                    .transpose()?;
                Ok(c)
            })
            .await?)
    }
}

#[async_trait]
impl List<Category> for SqliteCategoryRepository {
    async fn list(&self) -> Result<Vec<Category>, Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, description FROM categories ORDER BY name")?;
                let c = stmt
                    .query_map([], row_to_category)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(c)
            })
            .await?)
    }
}

#[async_trait]
impl Remove<Category> for SqliteCategoryRepository {
    async fn remove(&self, id: &IdentityOf<Category>) -> Result<(), Self::Error> {
        let id = *id;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl CategoryRepository for SqliteCategoryRepository {}

#[derive(Default)]
pub struct MemoryCategoryRepository {
    categories: Mutex<Vec<Category>>,
}

impl MemoryCategoryRepository {
    fn with_lock<T>(&self, f: impl FnOnce(&mut Vec<Category>) -> T) -> Result<T, anyhow::Error> {
        let mut categories = self
            .categories
            .lock()
            .map_err(|_| anyhow::anyhow!("Category store lock poisoned"))?;
        Ok(f(&mut categories))
    }
}

impl Repository<Category> for MemoryCategoryRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Category> for MemoryCategoryRepository {
    async fn save(&self, category: Category) -> Result<(), Self::Error> {
        self.with_lock(|categories| {
            match categories.iter_mut().find(|c| c.id == category.id) {
                Some(existing) => *existing = category,
                None => categories.push(category),
            }
        })
    }
}

#[async_trait]
impl Get<Category> for MemoryCategoryRepository {
    async fn get_one(&self, id: &IdentityOf<Category>) -> Result<Option<Category>, Self::Error> {
        self.with_lock(|categories| categories.iter().find(|c| &c.id == id).cloned())
    }
}

#[async_trait]
impl List<Category> for MemoryCategoryRepository {
    async fn list(&self) -> Result<Vec<Category>, Self::Error> {
        self.with_lock(|categories| {
            let mut categories = categories.clone();
            categories.sort_by(|a, b| a.name.cmp(&b.name));
            categories
        })
    }
}

#[async_trait]
impl Remove<Category> for MemoryCategoryRepository {
    async fn remove(&self, id: &IdentityOf<Category>) -> Result<(), Self::Error> {
        self.with_lock(|categories| categories.retain(|c| &c.id != id))
    }
}

impl CategoryRepository for MemoryCategoryRepository {}
