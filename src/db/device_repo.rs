use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::mutation_repo::StoreError;

/// Persistence for the per-installation device identity.
///
/// The identity is generated once and kept for the lifetime of the
/// installation; every locally originated mutation is tagged with it.
#[derive(Clone)]
pub struct DeviceStore {
    pool: SqlitePool,
}

impl DeviceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the stored device identity, creating it on first call.
    pub async fn get_or_create(&self) -> Result<Uuid, StoreError> {
        if let Some(id) = self.get().await? {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO device_identity (id, device_id, created_at) VALUES (1, ?, ?)",
        )
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            // Lost the race to another writer; use the identity it stored.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => self
                .get()
                .await?
                .ok_or_else(|| StoreError::Corrupt("device identity vanished".to_string())),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Returns the stored device identity without creating one.
    pub async fn get(&self) -> Result<Option<Uuid>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT device_id FROM device_identity WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((id,)) => Uuid::parse_str(&id)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("device id '{}': {}", id, e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_identity_created_once() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        let store = DeviceStore::new(pool);

        assert!(store.get().await.unwrap().is_none());

        let first = store.get_or_create().await.unwrap();
        let second = store.get_or_create().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identity_survives_pool_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let id = {
            let pool = init_db(db_path.clone()).await.unwrap();
            let store = DeviceStore::new(pool.clone());
            let id = store.get_or_create().await.unwrap();
            pool.close().await;
            id
        };

        let pool = init_db(db_path).await.unwrap();
        let store = DeviceStore::new(pool);
        assert_eq!(store.get().await.unwrap(), Some(id));
    }
}
