//! Postgres-backed generation store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (on insert) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` |
//!
//! ## Status Guard
//!
//! `update` only changes `status` when the row is still `PENDING` (or already
//! holds the requested status). A guarded-out update returns no row; the store
//! then distinguishes a missing key from a rejected transition with a second
//! read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use imagegen_core::{GenerationId, GenerationPatch, GenerationRecord, GenerationStatus, NewGeneration};

use super::{GenerationStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    generation_id   TEXT PRIMARY KEY,
    prompt          TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'COMPLETE', 'FAILED')),
    attempt_count   INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
    last_attempt_at TIMESTAMPTZ,
    last_error      VARCHAR(1500),
    result_payload  TEXT[],
    image_width     INTEGER NOT NULL,
    image_height    INTEGER NOT NULL,
    core_model      TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
)
"#;

const RECORD_COLUMNS: &str = "generation_id, prompt, status, attempt_count, last_attempt_at, \
     last_error, result_payload, image_width, image_height, core_model, created_at, updated_at";

/// Postgres-backed generation store.
///
/// Uses the SQLx connection pool, which is thread-safe; every write is a
/// single statement keyed by `generation_id`, so writers on different keys
/// never block each other beyond row locks.
#[derive(Debug, Clone)]
pub struct PostgresGenerationStore {
    pool: Arc<PgPool>,
}

impl PostgresGenerationStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the `generations` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn current_status(&self, id: &GenerationId) -> Result<Option<GenerationStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM generations WHERE generation_id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?;

        row.map(|r| {
            let raw: String = r
                .try_get("status")
                .map_err(|e| map_sqlx_error("current_status", e))?;
            raw.parse::<GenerationStatus>()
                .map_err(|e| StoreError::Storage(e.to_string()))
        })
        .transpose()
    }
}

#[async_trait]
impl GenerationStore for PostgresGenerationStore {
    #[instrument(skip(self, new), fields(request_id = %new.id), err)]
    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
        let now = Utc::now();

        let sql = format!(
            r#"
            INSERT INTO generations (
                generation_id, prompt, status, attempt_count,
                image_width, image_height, core_model, created_at, updated_at
            )
            VALUES ($1, $2, 'PENDING', 0, $3, $4, $5, $6, $6)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(new.id.as_str())
            .bind(&new.prompt)
            .bind(to_i32(new.image_width)?)
            .bind(to_i32(new.image_height)?)
            .bind(&new.core_model)
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(new.id.clone())
                } else {
                    map_sqlx_error("create_generation", e)
                }
            })?;

        record_from_row(&row)
    }

    #[instrument(skip(self, patch), fields(request_id = %id), err)]
    async fn update(
        &self,
        id: &GenerationId,
        patch: GenerationPatch,
    ) -> Result<GenerationRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE generations SET
                status          = COALESCE($2, status),
                attempt_count   = COALESCE($3, attempt_count),
                last_attempt_at = COALESCE($4, last_attempt_at),
                last_error      = COALESCE($5, last_error),
                result_payload  = COALESCE($6::text[], result_payload),
                updated_at      = $7
            WHERE generation_id = $1
                AND ($2::text IS NULL OR status = 'PENDING' OR status = $2)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let attempt_count = patch.attempt_count.map(to_i32).transpose()?;

        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(patch.status.map(|s| s.as_str()))
            .bind(attempt_count)
            .bind(patch.last_attempt_at)
            .bind(patch.last_error.as_deref())
            .bind(patch.result_payload)
            .bind(Utc::now())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_generation", e))?;

        if let Some(row) = row {
            return record_from_row(&row);
        }

        match (self.current_status(id).await?, patch.status) {
            (None, _) => Err(StoreError::NotFound(id.clone())),
            (Some(from), Some(to)) => Err(StoreError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            }),
            // Row exists and no status guard applied: only a concurrent delete explains this.
            (Some(_), None) => Err(StoreError::NotFound(id.clone())),
        }
    }

    #[instrument(skip(self), fields(request_id = %id), err)]
    async fn find_by_id(&self, id: &GenerationId) -> Result<Option<GenerationRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM generations WHERE generation_id = $1");

        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_generation", e))?;

        row.as_ref().map(record_from_row).transpose()
    }
}

fn record_from_row(row: &PgRow) -> Result<GenerationRecord, StoreError> {
    let get_err = |e: sqlx::Error| map_sqlx_error("decode_generation_row", e);

    let id: String = row.try_get("generation_id").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let attempt_count: i32 = row.try_get("attempt_count").map_err(get_err)?;
    let image_width: i32 = row.try_get("image_width").map_err(get_err)?;
    let image_height: i32 = row.try_get("image_height").map_err(get_err)?;

    Ok(GenerationRecord {
        id: GenerationId::parse(&id).map_err(|e| StoreError::Storage(e.to_string()))?,
        prompt: row.try_get("prompt").map_err(get_err)?,
        status: status
            .parse()
            .map_err(|e: imagegen_core::DomainError| StoreError::Storage(e.to_string()))?,
        attempt_count: from_i32("attempt_count", attempt_count)?,
        last_attempt_at: row
            .try_get::<Option<DateTime<Utc>>, _>("last_attempt_at")
            .map_err(get_err)?,
        last_error: row.try_get("last_error").map_err(get_err)?,
        result_payload: row
            .try_get::<Option<Vec<String>>, _>("result_payload")
            .map_err(get_err)?,
        image_width: from_i32("image_width", image_width)?,
        image_height: from_i32("image_height", image_height)?,
        core_model: row.try_get("core_model").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Storage(format!("value {value} exceeds INTEGER range")))
}

fn from_i32(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Storage(format!("negative {column} in row: {value}")))
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
