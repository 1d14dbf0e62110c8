//! Durable mutation store backed by sqlite.
//!
//! Every user action captured while offline lands here as one row, keyed
//! by its client-generated id. All writes go through single-writer
//! transactions; status changes are per-record updates validated against
//! the `MutationStatus` state machine, so a crash between calls never
//! leaves a record half-written.

use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{EntityType, MutationAction, MutationStatus, PendingMutation, StatusCounts};

const SELECT_COLUMNS: &str = "SELECT id, entity_type, action, payload, created_at, status, \
     error_message, synced_at, device_id, attempts, next_attempt_at FROM mutations";

/// Errors from durable store operations.
#[derive(Debug)]
pub enum StoreError {
    /// A record with this id already exists.
    DuplicateId(Uuid),
    /// No record with this id.
    NotFound(Uuid),
    /// The requested status change violates the state machine.
    InvalidTransition {
        id: Uuid,
        from: MutationStatus,
        to: MutationStatus,
    },
    /// A stored row could not be decoded back into a mutation.
    Corrupt(String),
    /// Underlying database failure.
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateId(id) => write!(f, "Mutation id already exists: {}", id),
            StoreError::NotFound(id) => write!(f, "No mutation with id: {}", id),
            StoreError::InvalidTransition { id, from, to } => {
                write!(f, "Invalid status transition {} -> {} for {}", from, to, id)
            }
            StoreError::Corrupt(msg) => write!(f, "Corrupt mutation record: {}", msg),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

#[derive(sqlx::FromRow)]
struct MutationRow {
    id: String,
    entity_type: String,
    action: String,
    payload: String,
    created_at: String,
    status: String,
    error_message: Option<String>,
    synced_at: Option<String>,
    device_id: String,
    attempts: i64,
    next_attempt_at: Option<String>,
}

impl MutationRow {
    fn parse(self) -> Result<PendingMutation, StoreError> {
        let id = parse_uuid(&self.id)?;
        let entity_type: EntityType = self.entity_type.parse().map_err(StoreError::Corrupt)?;
        let action: MutationAction = self.action.parse().map_err(StoreError::Corrupt)?;
        let status: MutationStatus = self.status.parse().map_err(StoreError::Corrupt)?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| StoreError::Corrupt(format!("payload for {}: {}", id, e)))?;

        Ok(PendingMutation {
            id,
            entity_type,
            action,
            payload,
            created_at: parse_timestamp(&self.created_at)?,
            status,
            error_message: self.error_message,
            synced_at: self.synced_at.as_deref().map(parse_timestamp).transpose()?,
            device_id: parse_uuid(&self.device_id)?,
            attempts: self.attempts.max(0) as u32,
            next_attempt_at: self
                .next_attempt_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("uuid '{}': {}", s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

/// Transactional store of pending/completed mutation records.
#[derive(Clone)]
pub struct MutationStore {
    pool: SqlitePool,
}

impl MutationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists a freshly captured mutation.
    ///
    /// Fails with [`StoreError::DuplicateId`] if a record with the same id
    /// already exists; ids are never reused.
    pub async fn append(&self, mutation: &PendingMutation) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mutations (id, entity_type, action, payload, created_at, status,
                                   error_message, synced_at, device_id, attempts, next_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mutation.id.to_string())
        .bind(mutation.entity_type.to_string())
        .bind(mutation.action.to_string())
        .bind(mutation.payload.to_string())
        .bind(mutation.created_at.to_rfc3339())
        .bind(mutation.status.to_string())
        .bind(&mutation.error_message)
        .bind(mutation.synced_at.map(|t| t.to_rfc3339()))
        .bind(mutation.device_id.to_string())
        .bind(mutation.attempts as i64)
        .bind(mutation.next_attempt_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateId(mutation.id))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Fetches a single record by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<PendingMutation>, StoreError> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row: Option<MutationRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(MutationRow::parse).transpose()
    }

    /// Lists all records in creation order.
    pub async fn list_all(&self) -> Result<Vec<PendingMutation>, StoreError> {
        let sql = format!("{} ORDER BY created_at, rowid", SELECT_COLUMNS);
        let rows: Vec<MutationRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(MutationRow::parse).collect()
    }

    /// Lists records with any of the given statuses, in creation order.
    pub async fn list_by_statuses(
        &self,
        statuses: &[MutationStatus],
    ) -> Result<Vec<PendingMutation>, StoreError> {
        if statuses.is_empty() {
            return self.list_all().await;
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "{} WHERE status IN ({}) ORDER BY created_at, rowid",
            SELECT_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, MutationRow>(&sql);
        for status in statuses {
            query = query.bind(status.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(MutationRow::parse).collect()
    }

    /// Lazily streams every record in creation order.
    ///
    /// The sequence is finite and restartable: each call re-runs the query
    /// from the beginning.
    pub fn stream_all(
        &self,
    ) -> impl Stream<Item = Result<PendingMutation, StoreError>> + Send + '_ {
        const SQL: &str = "SELECT id, entity_type, action, payload, created_at, status, \
             error_message, synced_at, device_id, attempts, next_attempt_at \
             FROM mutations ORDER BY created_at, rowid";

        sqlx::query_as::<_, MutationRow>(SQL)
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::Database).and_then(MutationRow::parse))
    }

    /// Atomically moves one record to a new status.
    ///
    /// Validates the transition against the state machine and fails with
    /// [`StoreError::NotFound`] when the id is unknown. `error_message` and
    /// `synced_at` are overwritten with the given values.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: MutationStatus,
        error_message: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = Self::current_status(&mut tx, id).await?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }

        sqlx::query("UPDATE mutations SET status = ?, error_message = ?, synced_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(error_message)
            .bind(synced_at.map(|t| t.to_rfc3339()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Marks a record as entering a dispatched batch.
    ///
    /// Bumps the attempt counter and records when the record becomes
    /// eligible again should this attempt fail.
    pub async fn mark_syncing(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = Self::current_status(&mut tx, id).await?;
        if !current.can_transition_to(MutationStatus::Syncing) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: MutationStatus::Syncing,
            });
        }

        sqlx::query(
            "UPDATE mutations SET status = 'syncing', attempts = attempts + 1, \
             next_attempt_at = ?, error_message = NULL WHERE id = ?",
        )
        .bind(next_attempt_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns a dispatched record to `pending` after a batch transport
    /// failure, keeping its attempt counter and backoff schedule.
    pub async fn revert_to_pending(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_status(id, MutationStatus::Pending, None, None)
            .await
    }

    /// Resets a failed record for another round of delivery.
    ///
    /// Clears the error and the attempt counter; the record becomes
    /// immediately eligible.
    pub async fn resubmit(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = Self::current_status(&mut tx, id).await?;
        if current != MutationStatus::Failed {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: MutationStatus::Pending,
            });
        }

        sqlx::query(
            "UPDATE mutations SET status = 'pending', error_message = NULL, \
             attempts = 0, next_attempt_at = NULL WHERE id = ?",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns any record stranded in `syncing` (by a crash mid-drain)
    /// to `pending`. Called once at agent startup, never while a drain
    /// may be in flight.
    pub async fn recover_stranded(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE mutations SET status = 'pending' WHERE status = 'syncing'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Removes records matching the status filter; `None` removes all.
    pub async fn clear(&self, filter: Option<MutationStatus>) -> Result<u64, StoreError> {
        let result = match filter {
            Some(status) => {
                sqlx::query("DELETE FROM mutations WHERE status = ?")
                    .bind(status.to_string())
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM mutations").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    /// Per-status aggregate counts.
    pub async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM mutations GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status: MutationStatus = status.parse().map_err(StoreError::Corrupt)?;
            let count = count.max(0) as u64;
            match status {
                MutationStatus::Pending => counts.pending = count,
                MutationStatus::Syncing => counts.syncing = count,
                MutationStatus::Synced => counts.synced = count,
                MutationStatus::Failed => counts.failed = count,
                MutationStatus::Conflict => counts.conflict = count,
            }
        }
        Ok(counts)
    }

    async fn current_status(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: Uuid,
    ) -> Result<MutationStatus, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM mutations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some((status,)) => status.parse().map_err(StoreError::Corrupt),
            None => Err(StoreError::NotFound(id)),
        }
    }
}
