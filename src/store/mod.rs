//! Environment registry: durable store for environments and extension tokens.
//!
//! Every component (crawlers, deleter, stale notifier, HTTP boundary) talks to
//! the registry only through [`Registry`]. Each operation is atomic on its own;
//! nothing is serialized across operations except by the database itself.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::environment::{DeadlineError, Environment};
use crate::models::token::Token;

pub mod postgres;
pub mod sqlite;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("environment not found: {0}")]
    NotFound(String),

    #[error("a token is already outstanding for environment {0}")]
    TokenExists(String),

    #[error("token rejected for environment {0}")]
    TokenRejected(String),

    #[error("deadline error for environment {id}: {source}")]
    Deadline {
        id: String,
        #[source]
        source: DeadlineError,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Insert every environment whose id is not yet present; existing records
    /// are left untouched (first write wins). Returns how many were inserted.
    async fn write_environments(&self, envs: &[Environment]) -> StoreResult<u64>;

    async fn list_environments(&self) -> StoreResult<Vec<Environment>>;

    /// Fails with [`StoreError::NotFound`] when absent.
    async fn get_environment(&self, id: &str) -> StoreResult<Environment>;

    /// Environments whose deadline is not yet past but falls within
    /// `threshold` of now.
    async fn stale_environments(&self, threshold: Duration) -> StoreResult<Vec<Environment>>;

    /// Environments whose deadline is strictly before now.
    async fn outdated_environments(&self) -> StoreResult<Vec<Environment>>;

    /// Push the stored deadline forward by `period` (anchored on the stored
    /// deadline, not on now). Returns the updated record.
    async fn extend_environment(&self, id: &str, period: Duration) -> StoreResult<Environment>;

    /// Remove an environment and its token. Returns false when nothing matched.
    async fn delete_environment(&self, id: &str) -> StoreResult<bool>;

    /// Create the token for `env_id`. Fails with [`StoreError::TokenExists`]
    /// while another one is outstanding, [`StoreError::NotFound`] when the
    /// environment is unknown.
    async fn issue_token(&self, env_id: &str) -> StoreResult<Token>;

    async fn get_token(&self, env_id: &str) -> StoreResult<Option<Token>>;

    async fn delete_token(&self, env_id: &str) -> StoreResult<bool>;

    /// Claim-and-consume: in one transaction delete the token only if it
    /// matches `token`, then extend the environment by `period`. A token can
    /// therefore back at most one extension. Nothing changes on failure.
    async fn redeem_token(
        &self,
        env_id: &str,
        token: &str,
        period: Duration,
    ) -> StoreResult<Environment>;
}

pub(crate) fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
