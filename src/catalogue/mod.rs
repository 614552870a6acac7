//! Product repository and catalogue snapshot cache. Readers hold an
//! `Arc` clone of the snapshot for the duration of a request; admin
//! mutations rebuild a fresh snapshot and atomically swap it in rather
//! than mutating caches in place.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{MediaDescriptor, ProductId, ProductRow};

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An immutable view of the browsable catalogue dimensions, rebuilt
/// after any admin mutation that could change them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogueSnapshot {
    pub cities: Vec<String>,
    pub districts_by_city: std::collections::BTreeMap<String, Vec<String>>,
    pub product_types: Vec<String>,
}

pub struct CatalogueCache {
    inner: RwLock<Arc<CatalogueSnapshot>>,
}

impl CatalogueCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(CatalogueSnapshot::default())),
        }
    }

    pub async fn current(&self) -> Arc<CatalogueSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn refresh(&self, pool: &SqlitePool) -> Result<(), CatalogueError> {
        let snapshot = ProductRepository::build_snapshot(pool).await?;
        let mut guard = self.inner.write().await;
        *guard = Arc::new(snapshot);
        Ok(())
    }
}

impl Default for CatalogueCache {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProductRepository;

struct ProductRowSql {
    id: i64,
    city: String,
    district: String,
    product_type: String,
    size: String,
    unit_price_cents: i64,
    description: String,
    media_json: String,
    available: i64,
    reserved: i64,
}

impl ProductRowSql {
    fn into_domain(self) -> ProductRow {
        let media: Vec<MediaDescriptor> = serde_json::from_str(&self.media_json).unwrap_or_default();
        ProductRow {
            id: self.id,
            city: self.city,
            district: self.district,
            product_type: self.product_type,
            size: self.size,
            unit_price: crate::money::from_minor_units(self.unit_price_cents),
            description: self.description,
            media,
            available: self.available != 0,
            reserved: self.reserved != 0,
        }
    }
}

const SELECT_COLUMNS: &str =
    "id, city, district, product_type, size, unit_price_cents, description, media_json, available, reserved";

fn row_to_sql(row: sqlx::sqlite::SqliteRow) -> ProductRowSql {
    ProductRowSql {
        id: row.get(0),
        city: row.get(1),
        district: row.get(2),
        product_type: row.get(3),
        size: row.get(4),
        unit_price_cents: row.get(5),
        description: row.get(6),
        media_json: row.get(7),
        available: row.get(8),
        reserved: row.get(9),
    }
}

impl ProductRepository {
    pub async fn get(pool: &SqlitePool, id: ProductId) -> Result<Option<ProductRow>, CatalogueError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM products WHERE id = ?1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(row_to_sql).map(ProductRowSql::into_domain))
    }

    pub async fn list_browsable(
        pool: &SqlitePool,
        city: &str,
        district: &str,
    ) -> Result<Vec<ProductRow>, CatalogueError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM products \
             WHERE city = ?1 AND district = ?2 AND available = 1 AND reserved = 0"
        ))
        .bind(city)
        .bind(district)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(row_to_sql).map(ProductRowSql::into_domain).collect())
    }

    pub async fn insert(
        pool: &SqlitePool,
        city: &str,
        district: &str,
        product_type: &str,
        size: &str,
        unit_price: Decimal,
        description: &str,
        media: &[MediaDescriptor],
    ) -> Result<ProductId, CatalogueError> {
        let media_json = serde_json::to_string(media).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(
            "INSERT INTO products (city, district, product_type, size, unit_price_cents, description, media_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(city)
        .bind(district)
        .bind(product_type)
        .bind(size)
        .bind(crate::money::to_minor_units(unit_price))
        .bind(description)
        .bind(media_json)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Deletes a fulfilled product row. Callers are responsible for
    /// delivering its media before calling this (media delivery ordering
    /// is deliberate: text is the fallback receipt if media upload
    /// fails).
    pub async fn delete(pool: &SqlitePool, id: ProductId) -> Result<(), CatalogueError> {
        sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn build_snapshot(pool: &SqlitePool) -> Result<CatalogueSnapshot, CatalogueError> {
        let rows = sqlx::query("SELECT DISTINCT city, district FROM products WHERE available = 1")
            .fetch_all(pool)
            .await?;

        let mut cities: BTreeSet<String> = BTreeSet::new();
        let mut districts_by_city: std::collections::BTreeMap<String, Vec<String>> =
            std::collections::BTreeMap::new();
        for row in rows {
            let city: String = row.get(0);
            let district: String = row.get(1);
            cities.insert(city.clone());
            let entry = districts_by_city.entry(city).or_default();
            if !entry.contains(&district) {
                entry.push(district);
            }
        }

        let type_rows = sqlx::query("SELECT DISTINCT product_type FROM products WHERE available = 1")
            .fetch_all(pool)
            .await?;
        let product_types = type_rows.into_iter().map(|r| r.get::<String, _>(0)).collect();

        Ok(CatalogueSnapshot {
            cities: cities.into_iter().collect(),
            districts_by_city,
            product_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn snapshot_reflects_inserted_products() {
        let db = Database::connect(":memory:").await.unwrap();
        ProductRepository::insert(
            db.pool(),
            "Berlin",
            "Mitte",
            "widget",
            "M",
            Decimal::new(1000, 2),
            "desc",
            &[],
        )
        .await
        .unwrap();

        let cache = CatalogueCache::new();
        cache.refresh(db.pool()).await.unwrap();
        let snapshot = cache.current().await;
        assert_eq!(snapshot.cities, vec!["Berlin".to_string()]);
        assert_eq!(snapshot.product_types, vec!["widget".to_string()]);
    }

    #[tokio::test]
    async fn list_browsable_excludes_reserved() {
        let db = Database::connect(":memory:").await.unwrap();
        let id = ProductRepository::insert(
            db.pool(),
            "Berlin",
            "Mitte",
            "widget",
            "M",
            Decimal::new(1000, 2),
            "desc",
            &[],
        )
        .await
        .unwrap();
        sqlx::query("UPDATE products SET reserved = 1 WHERE id = ?1")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
        let listed = ProductRepository::list_browsable(db.pool(), "Berlin", "Mitte")
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
