use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::models::{Product, ProductSource};
use crate::Result;

const CREATE_SNAPSHOTS: &str = "CREATE TABLE IF NOT EXISTS cache_snapshots (
    source TEXT PRIMARY KEY NOT NULL,
    captured_at TEXT NOT NULL,
    item_count INTEGER NOT NULL
)";

const CREATE_PRODUCTS: &str = "CREATE TABLE IF NOT EXISTS cached_products (
    source TEXT NOT NULL,
    product_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (source, product_id)
)";

#[derive(Debug, Clone, FromRow)]
struct CachedProductRow {
    product_id: String,
    payload_json: String,
}

#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    captured_at: DateTime<Utc>,
    item_count: i64,
}

/// Scraped products per source, with a capture timestamp, in SQLite.
///
/// Every failure on the read side degrades to a cache miss.
#[derive(Clone)]
pub struct ProductCache {
    pool: Option<SqlitePool>,
}

impl ProductCache {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self> {
        // Every :memory: connection is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::with_pool(pool).await
    }

    /// Open `path`, or fall back to an in-memory cache, or to no cache at all.
    pub async fn open_or_fallback(path: &Path) -> Self {
        match Self::open(path).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %path.display(), "Product cache unavailable, using memory: {}", e);
                match Self::in_memory().await {
                    Ok(cache) => cache,
                    Err(e) => {
                        warn!("In-memory product cache failed too, caching disabled: {}", e);
                        Self::disabled()
                    }
                }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { pool: None }
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_SNAPSHOTS).execute(&pool).await?;
        sqlx::query(CREATE_PRODUCTS).execute(&pool).await?;
        Ok(Self { pool: Some(pool) })
    }

    /// Products for `source` if the last `put` happened within `max_age`.
    pub async fn get(&self, source: ProductSource, max_age: Duration) -> Option<Vec<Product>> {
        let pool = self.pool.as_ref()?;

        let snapshot = match sqlx::query_as::<_, SnapshotRow>(
            "SELECT captured_at, item_count FROM cache_snapshots WHERE source = ?",
        )
        .bind(source.as_str())
        .fetch_optional(pool)
        .await
        {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(%source, "Cache miss: nothing stored");
                return None;
            }
            Err(e) => {
                warn!(%source, "Cache miss: could not read snapshot: {}", e);
                return None;
            }
        };

        let age = Utc::now() - snapshot.captured_at;
        if age > max_age {
            debug!(%source, age_minutes = age.num_minutes(), "Cache miss: entry is stale");
            return None;
        }

        let rows = match sqlx::query_as::<_, CachedProductRow>(
            "SELECT product_id, payload_json FROM cached_products WHERE source = ? ORDER BY position",
        )
        .bind(source.as_str())
        .fetch_all(pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(%source, "Cache miss: could not read products: {}", e);
                return None;
            }
        };

        if rows.len() as i64 != snapshot.item_count {
            warn!(%source, expected = snapshot.item_count, found = rows.len(), "Cache miss: entry is incomplete");
            return None;
        }

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Product>(&row.payload_json) {
                Ok(product) => products.push(product),
                Err(e) => {
                    warn!(%source, product_id = %row.product_id, "Cache miss: unreadable entry: {}", e);
                    return None;
                }
            }
        }

        info!(%source, count = products.len(), "Using cached products");
        Some(products)
    }

    /// Replace everything stored for `source`.
    pub async fn put(&self, source: ProductSource, products: &[Product]) -> Result<()> {
        self.put_captured_at(source, products, Utc::now()).await
    }

    pub async fn put_captured_at(
        &self,
        source: ProductSource,
        products: &[Product],
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        let unique: Vec<&Product> = products.iter().filter(|p| seen.insert(&p.id)).collect();

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM cached_products WHERE source = ?")
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO cache_snapshots (source, captured_at, item_count) VALUES (?, ?, ?)",
        )
        .bind(source.as_str())
        .bind(captured_at)
        .bind(unique.len() as i64)
        .execute(&mut *tx)
        .await?;

        for (position, product) in unique.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cached_products (source, product_id, position, payload_json) VALUES (?, ?, ?, ?)",
            )
            .bind(source.as_str())
            .bind(product.id.as_str())
            .bind(position as i64)
            .bind(serde_json::to_string(product)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(%source, count = unique.len(), "Cached products");
        Ok(())
    }

    /// Drop cached products for one source, or for all of them.
    pub async fn clear(&self, source: Option<ProductSource>) -> Result<()> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(());
        };

        let mut tx = pool.begin().await?;
        match source {
            Some(source) => {
                sqlx::query("DELETE FROM cached_products WHERE source = ?")
                    .bind(source.as_str())
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM cache_snapshots WHERE source = ?")
                    .bind(source.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM cached_products").execute(&mut *tx).await?;
                sqlx::query("DELETE FROM cache_snapshots").execute(&mut *tx).await?;
            }
        }
        tx.commit().await?;

        info!(source = ?source, "Cleared product cache");
        Ok(())
    }
}
