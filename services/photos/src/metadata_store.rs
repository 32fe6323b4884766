use crate::config::DatabaseConfig;
use crate::model::{LifecycleState, PhotoRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Fields written together by a lifecycle transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub object_key: String,
    pub access_url: String,
    pub access_url_generated_at: DateTime<Utc>,
}

/// Persistence for photo records.
///
/// `transition` and `delete_if_recycled` are conditional writes: they only
/// take effect if the stored state still matches, atomically.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>>;

    /// Create the record unless one with the same id exists. Returns
    /// whether a new record was written.
    async fn insert(&self, record: &PhotoRecord) -> Result<bool>;

    /// Apply `transition` if the record is currently in `transition.from`.
    /// Returns the updated record, or `None` if the condition failed.
    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Option<PhotoRecord>>;

    async fn refresh_access_url(
        &self,
        id: Uuid,
        access_url: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete the record if it is recycled. Returns the deleted record, or
    /// `None` if the condition failed.
    async fn delete_if_recycled(&self, id: Uuid) -> Result<Option<PhotoRecord>>;

    /// Records of `owner` in `state` (owner index)
    async fn list_by_owner(&self, owner: &str, state: LifecycleState) -> Result<Vec<PhotoRecord>>;

    /// Records in `state` owned by anyone except `owner`
    async fn list_not_owned_by(
        &self,
        owner: &str,
        state: LifecycleState,
    ) -> Result<Vec<PhotoRecord>>;

    /// Cheap round trip used by readiness checks
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct PhotoRow {
    id: Uuid,
    owner: String,
    object_key: String,
    lifecycle_state: String,
    uploaded_at: DateTime<Utc>,
    access_url: String,
    access_url_generated_at: Option<DateTime<Utc>>,
}

impl TryFrom<PhotoRow> for PhotoRecord {
    type Error = anyhow::Error;

    fn try_from(row: PhotoRow) -> Result<Self> {
        let state = row
            .lifecycle_state
            .parse::<LifecycleState>()
            .map_err(anyhow::Error::msg)?;

        Ok(PhotoRecord {
            id: row.id,
            owner: row.owner,
            object_key: row.object_key,
            state,
            uploaded_at: row.uploaded_at,
            access_url: row.access_url,
            access_url_generated_at: row.access_url_generated_at,
        })
    }
}

fn into_records(rows: Vec<PhotoRow>) -> Result<Vec<PhotoRecord>> {
    rows.into_iter().map(PhotoRecord::try_from).collect()
}

const PHOTO_COLUMNS: &str = "id, owner, object_key, lifecycle_state, uploaded_at, \
                             access_url, access_url_generated_at";

/// PostgreSQL-backed photo repository
pub struct PgPhotoRepository {
    pool: PgPool,
}

impl PgPhotoRepository {
    /// Create a new repository with its own connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks and the session registry)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PhotoRepository for PgPhotoRepository {
    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query photo")?;

        row.map(PhotoRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(photo_id = %record.id, owner = %record.owner))]
    async fn insert(&self, record: &PhotoRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO photos (
                id, owner, object_key, lifecycle_state, uploaded_at,
                access_url, access_url_generated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.owner)
        .bind(&record.object_key)
        .bind(record.state.as_str())
        .bind(record.uploaded_at)
        .bind(&record.access_url)
        .bind(record.access_url_generated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert photo")?;

        let created = result.rows_affected() == 1;
        if !created {
            warn!("Photo record already exists, keeping the stored one");
        }

        Ok(created)
    }

    #[instrument(skip(self, transition), fields(from = %transition.from, to = %transition.to))]
    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Option<PhotoRecord>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            UPDATE photos
            SET lifecycle_state = $3,
                object_key = $4,
                access_url = $5,
                access_url_generated_at = $6
            WHERE id = $1 AND lifecycle_state = $2
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&transition.object_key)
        .bind(&transition.access_url)
        .bind(transition.access_url_generated_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update photo state")?;

        debug!(applied = row.is_some(), "Conditional state update finished");

        row.map(PhotoRecord::try_from).transpose()
    }

    async fn refresh_access_url(
        &self,
        id: Uuid,
        access_url: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE photos SET access_url = $2, access_url_generated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(access_url)
        .bind(generated_at)
        .execute(&self.pool)
        .await
        .context("Failed to refresh access URL")?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_if_recycled(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            "DELETE FROM photos WHERE id = $1 AND lifecycle_state = $2 RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(id)
        .bind(LifecycleState::Recycled.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to delete photo")?;

        row.map(PhotoRecord::try_from).transpose()
    }

    async fn list_by_owner(&self, owner: &str, state: LifecycleState) -> Result<Vec<PhotoRecord>> {
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS} FROM photos
            WHERE owner = $1 AND lifecycle_state = $2
            ORDER BY uploaded_at DESC
            "#
        ))
        .bind(owner)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query photos by owner")?;

        into_records(rows)
    }

    async fn list_not_owned_by(
        &self,
        owner: &str,
        state: LifecycleState,
    ) -> Result<Vec<PhotoRecord>> {
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS} FROM photos
            WHERE owner <> $1 AND lifecycle_state = $2
            ORDER BY uploaded_at DESC
            "#
        ))
        .bind(owner)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan photos")?;

        into_records(rows)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database is not reachable")?;
        Ok(())
    }
}
