use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::PgPool;

use super::{
    is_foreign_key_violation, is_unique_violation, now_epoch, secs, Registry, StoreError,
    StoreResult,
};
use crate::models::environment::Environment;
use crate::models::token::Token;

const ENV_COLUMNS: &str = "env_id, type, name, namespace, owner, delete_at, delete_at_sec";

#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub async fn connect_with(options: PgConnectOptions) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from migrations/postgres.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations/postgres").run(&self.pool).await?;
        Ok(())
    }
}

/// Lock the row, compute the next deadline from the stored one and persist
/// both encodings. Runs inside the caller's transaction.
async fn extend_locked(
    conn: &mut PgConnection,
    id: &str,
    period: Duration,
) -> StoreResult<Environment> {
    let env = sqlx::query_as::<_, Environment>(&format!(
        "SELECT {ENV_COLUMNS} FROM environments WHERE env_id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let deadline = env
        .deadline
        .extended_by(period)
        .map_err(|source| StoreError::Deadline {
            id: id.to_string(),
            source,
        })?;

    sqlx::query("UPDATE environments SET delete_at = $1, delete_at_sec = $2 WHERE env_id = $3")
        .bind(deadline.formatted())
        .bind(deadline.epoch())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(Environment { deadline, ..env })
}

#[async_trait]
impl Registry for PgRegistry {
    async fn write_environments(&self, envs: &[Environment]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for e in envs {
            let result = sqlx::query(&format!(
                "INSERT INTO environments ({ENV_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)
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
                tracing::info!(
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
            "SELECT {ENV_COLUMNS} FROM environments WHERE env_id = $1"
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
             WHERE delete_at_sec >= $1 AND delete_at_sec < $1 + $2
             ORDER BY delete_at_sec ASC"
        ))
        .bind(now)
        .bind(secs(threshold))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn outdated_environments(&self) -> StoreResult<Vec<Environment>> {
        let rows = sqlx::query_as::<_, Environment>(&format!(
            "SELECT {ENV_COLUMNS} FROM environments WHERE delete_at_sec < $1 ORDER BY delete_at_sec ASC"
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
        // tokens.env_id cascades
        let result = sqlx::query("DELETE FROM environments WHERE env_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn issue_token(&self, env_id: &str) -> StoreResult<Token> {
        let token = Token::generate(env_id);
        sqlx::query("INSERT INTO tokens (env_id, token) VALUES ($1, $2)")
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
        let token = sqlx::query_as::<_, Token>("SELECT env_id, token FROM tokens WHERE env_id = $1")
            .bind(env_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    async fn delete_token(&self, env_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE env_id = $1")
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

        // A concurrent redeemer blocks on the row lock and then sees zero rows.
        let claimed = sqlx::query("DELETE FROM tokens WHERE env_id = $1 AND token = $2")
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
