//! SQLite-backed registry. File databases run in WAL mode; the in-memory
//! variant is single-connection so every caller shares one database.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::{
    is_foreign_key_violation, is_unique_violation, now_epoch, secs, Registry, StoreError,
    StoreResult,
};
use crate::models::environment::{Deadline, Environment};
use crate::models::token::Token;

const ENV_COLUMNS: &str = "env_id, type, name, namespace, owner, delete_at, delete_at_sec";

#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "registry database opened");

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations/sqlite").run(&self.pool).await?;
        Ok(())
    }
}

/// SQLite has no row locks: take the write lock first with the UPDATE, then
/// re-render the display string from the new epoch value in the same
/// transaction.
async fn extend_locked(
    conn: &mut SqliteConnection,
    id: &str,
    period: Duration,
) -> StoreResult<Environment> {
    let env = sqlx::query_as::<_, Environment>(&format!(
        "UPDATE environments SET delete_at_sec = delete_at_sec + ? WHERE env_id = ?
         RETURNING {ENV_COLUMNS}"
    ))
    .bind(secs(period))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let deadline = Deadline::from_epoch(env.deadline.epoch()).map_err(|source| {
        StoreError::Deadline {
            id: id.to_string(),
            source,
        }
    })?;

    sqlx::query("UPDATE environments SET delete_at = ? WHERE env_id = ?")
        .bind(deadline.formatted())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(Environment { deadline, ..env })
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn write_environments(&self, envs: &[Environment]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for e in envs {
            let result = sqlx::query(&format!(
                "INSERT INTO environments ({ENV_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (env_id) DO NOTHING"
            ))
            .bind(&e.id)
            .bind(&e.kind)
            .bind(&e.name)
            .bind(&e.namespace)
            .bind(&e.owner)
            .bind(e.deadline.formatted())
            .bind(e.deadline.epoch())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
                info!(
                    env_id = %e.id,
                    env_type = %e.kind,
                    delete_at = %e.deadline,
                    "new environment added: {}",
                    e.display_name()
                );
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_environments(&self) -> StoreResult<Vec<Environment>> {
        let rows = sqlx::query_as::<_, Environment>(&format!(
            "SELECT {ENV_COLUMNS} FROM environments ORDER BY delete_at_sec ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_environment(&self, id: &str) -> StoreResult<Environment> {
        sqlx::query_as::<_, Environment>(&format!(
            "SELECT {ENV_COLUMNS} FROM environments WHERE env_id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn stale_environments(&self, threshold: Duration) -> StoreResult<Vec<Environment>> {
        let now = now_epoch();
        let rows = sqlx::query_as::<_, Environment>(&format!(
            "SELECT {ENV_COLUMNS} FROM environments
             WHERE delete_at_sec >= ? AND delete_at_sec < ?
             ORDER BY delete_at_sec ASC"
        ))
        .bind(now)
        .bind(now.saturating_add(secs(threshold)))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn outdated_environments(&self) -> StoreResult<Vec<Environment>> {
        let rows = sqlx::query_as::<_, Environment>(&format!(
            "SELECT {ENV_COLUMNS} FROM environments WHERE delete_at_sec < ? ORDER BY delete_at_sec ASC"
        ))
        .bind(now_epoch())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn extend_environment(&self, id: &str, period: Duration) -> StoreResult<Environment> {
        let mut tx = self.pool.begin().await?;
        let env = extend_locked(&mut tx, id, period).await?;
        tx.commit().await?;
        Ok(env)
    }

    async fn delete_environment(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM environments WHERE env_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn issue_token(&self, env_id: &str) -> StoreResult<Token> {
        let token = Token::generate(env_id);
        sqlx::query("INSERT INTO tokens (env_id, token) VALUES (?, ?)")
            .bind(&token.env_id)
            .bind(&token.token)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::TokenExists(env_id.to_string())
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound(env_id.to_string())
                } else {
                    StoreError::Database(e)
                }
            })?;
        Ok(token)
    }

    async fn get_token(&self, env_id: &str) -> StoreResult<Option<Token>> {
        let token = sqlx::query_as::<_, Token>("SELECT env_id, token FROM tokens WHERE env_id = ?")
            .bind(env_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    async fn delete_token(&self, env_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE env_id = ?")
            .bind(env_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn redeem_token(
        &self,
        env_id: &str,
        token: &str,
        period: Duration,
    ) -> StoreResult<Environment> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query("DELETE FROM tokens WHERE env_id = ? AND token = ?")
            .bind(env_id)
            .bind(token)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(StoreError::TokenRejected(env_id.to_string()));
        }

        let env = extend_locked(&mut tx, env_id, period).await?;
        tx.commit().await?;
        Ok(env)
    }
}
