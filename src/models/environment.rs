use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Layout of the human-readable half of a [`Deadline`] (UTC).
pub const DEADLINE_FORMAT: &str = "%d-%m-%y %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeadlineError {
    #[error("deadline out of range")]
    OutOfRange,
}

/// Point in time after which an environment may be reclaimed.
///
/// Stored twice: a display string and Unix epoch seconds. The epoch value is
/// authoritative; the string is always rendered from it, so the two encodings
/// cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deadline {
    delete_at: String,
    delete_at_sec: i64,
}

impl Deadline {
    pub fn from_epoch(secs: i64) -> Result<Self, DeadlineError> {
        let at = DateTime::<Utc>::from_timestamp(secs, 0).ok_or(DeadlineError::OutOfRange)?;
        Ok(Self::at(at))
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            delete_at: at.format(DEADLINE_FORMAT).to_string(),
            delete_at_sec: at.timestamp(),
        }
    }

    /// Deadline `ttl` from now.
    pub fn after(ttl: Duration) -> Result<Self, DeadlineError> {
        Self::from_epoch(Utc::now().timestamp()).and_then(|now| now.extended_by(ttl))
    }

    /// This deadline pushed forward by `period`. Anchored on the deadline
    /// itself, never on the current time.
    pub fn extended_by(&self, period: Duration) -> Result<Self, DeadlineError> {
        let secs = i64::try_from(period.as_secs()).map_err(|_| DeadlineError::OutOfRange)?;
        let next = self
            .delete_at_sec
            .checked_add(secs)
            .ok_or(DeadlineError::OutOfRange)?;
        Self::from_epoch(next)
    }

    pub fn epoch(&self) -> i64 {
        self.delete_at_sec
    }

    pub fn formatted(&self) -> &str {
        &self.delete_at
    }

    pub fn is_past(&self, now: i64) -> bool {
        self.delete_at_sec < now
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.delete_at)
    }
}

/// One tracked unit of ephemeral infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Environment {
    #[serde(rename = "env_id")]
    #[sqlx(rename = "env_id")]
    pub id: String,
    /// Tag of the connector that owns this environment.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Empty for platforms without namespaces.
    pub namespace: String,
    pub owner: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub deadline: Deadline,
}

impl Environment {
    /// Name for logs and messages: `name` or `name (namespace: ns)`.
    pub fn display_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{} (namespace: {})", self.name, self.namespace)
        }
    }
}
