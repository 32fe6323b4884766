use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tracing::{debug, instrument};

/// Mapping from a user identity to its live push sessions.
///
/// Nothing enforces one session per owner; lookups may return several.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn put(&self, session_id: &str, owner: &str) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    async fn query_by_owner(&self, owner: &str) -> Result<Vec<String>>;
}

/// Session registry stored next to the photo records
pub struct PgSessionRegistry {
    pool: PgPool,
}

impl PgSessionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRegistry for PgSessionRegistry {
    #[instrument(skip(self))]
    async fn put(&self, session_id: &str, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO push_sessions (session_id, owner, connected_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id) DO UPDATE SET owner = EXCLUDED.owner
            "#,
        )
        .bind(session_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("Failed to register push session")?;

        debug!("Push session registered");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM push_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("Failed to remove push session")?;

        debug!("Push session removed");
        Ok(())
    }

    async fn query_by_owner(&self, owner: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT session_id FROM push_sessions WHERE owner = $1 ORDER BY connected_at",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query push sessions")?;

        Ok(rows.into_iter().map(|(session_id,)| session_id).collect())
    }
}
