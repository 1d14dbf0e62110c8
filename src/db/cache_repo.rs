use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::mutation_repo::StoreError;

/// Most-recent-response cache for read routes, served when offline.
///
/// One row per route; a successful live read overwrites the previous
/// entry for that route.
#[derive(Clone)]
pub struct ResponseCache {
    pool: SqlitePool,
}

impl ResponseCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores the latest successful response body for a route.
    pub async fn put(&self, route: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO response_cache (route, body, cached_at)
            VALUES (?, ?, ?)
            ON CONFLICT(route) DO UPDATE SET body = excluded.body, cached_at = excluded.cached_at
            "#,
        )
        .bind(route)
        .bind(body.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the cached body and capture time for a route, if any.
    pub async fn get(
        &self,
        route: &str,
    ) -> Result<Option<(serde_json::Value, DateTime<Utc>)>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT body, cached_at FROM response_cache WHERE route = ?")
                .bind(route)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((body, cached_at)) => {
                let body = serde_json::from_str(&body)
                    .map_err(|e| StoreError::Corrupt(format!("cached body for {}: {}", route, e)))?;
                let cached_at = DateTime::parse_from_rfc3339(&cached_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        StoreError::Corrupt(format!("cache timestamp for {}: {}", route, e))
                    })?;
                Ok(Some((body, cached_at)))
            }
            None => Ok(None),
        }
    }

    /// Drops every cached response.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
