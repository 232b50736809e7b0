//! `GET /extend?env_id=&period=&token=`: the self-service extension link.
//!
//! The token is checked before anything else and consumed in the same
//! transaction that moves the deadline, so one token backs at most one
//! extension even when the link is opened twice concurrently.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::errors::AppError;
use crate::models::duration::parse_duration;
use crate::models::environment::Environment;

#[derive(Debug, Default, Deserialize)]
pub struct ExtendParams {
    #[serde(default)]
    pub env_id: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub token: String,
}

/// Run the extension protocol. On success the returned record carries the
/// new deadline and the token is gone.
pub async fn extend_environment(
    state: &AppState,
    params: &ExtendParams,
) -> Result<Environment, AppError> {
    if params.env_id.is_empty() || params.token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let live = state.registry.get_token(&params.env_id).await?;
    if !live.is_some_and(|t| t.matches(&params.token)) {
        warn!(env_id = %params.env_id, "extension rejected: invalid token");
        return Err(AppError::Unauthorized);
    }

    let period = validate_period(&params.period, state.max_extend).map_err(|e| {
        warn!(env_id = %params.env_id, period = %params.period, "extension rejected: {}", e);
        e
    })?;

    let env = state
        .registry
        .redeem_token(&params.env_id, &params.token, period)
        .await?;
    Ok(env)
}

/// Parse `period` and bound it by `max`.
pub fn validate_period(period: &str, max: Duration) -> Result<Duration, AppError> {
    let d = parse_duration(period).map_err(|_| AppError::BadRequest("invalid period".into()))?;
    if d.is_zero() {
        return Err(AppError::BadRequest("invalid period".into()));
    }
    if d > max {
        return Err(AppError::BadRequest(
            "period is greater than max duration".into(),
        ));
    }
    Ok(d)
}

pub async fn extend_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtendParams>,
) -> Response {
    match extend_environment(&state, &params).await {
        Ok(env) => {
            state.metrics.extension("extended");
            info!(
                env_id = %env.id,
                env_type = %env.kind,
                period = %params.period,
                delete_at = %env.deadline,
                "extended environment {}",
                env.display_name()
            );
            format!(
                "Extended environment: {}, type: {}, period: {}",
                env.display_name(),
                env.kind,
                params.period
            )
            .into_response()
        }
        Err(e) => {
            let outcome = match &e {
                AppError::Unauthorized => "unauthorized",
                AppError::BadRequest(_) => "invalid_period",
                AppError::NotFound(_) => "not_found",
                _ => "error",
            };
            state.metrics.extension(outcome);
            e.into_plain_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    #[test]
    fn test_validate_period_bounds() {
        assert_eq!(validate_period("1w", WEEK).unwrap(), WEEK);
        assert_eq!(
            validate_period("12h", WEEK).unwrap(),
            Duration::from_secs(43_200)
        );
        assert!(matches!(validate_period("8d", WEEK), Err(AppError::BadRequest(_))));
        assert!(matches!(validate_period("0s", WEEK), Err(AppError::BadRequest(_))));
        assert!(matches!(validate_period("soon", WEEK), Err(AppError::BadRequest(_))));
        assert!(matches!(validate_period("", WEEK), Err(AppError::BadRequest(_))));
    }
}
