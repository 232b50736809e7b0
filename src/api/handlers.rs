use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::errors::AppError;
use crate::models::duration::parse_duration;
use crate::models::environment::{Deadline, Environment};
use crate::store::StoreError;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddEnvironmentRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Empty means the configured default TTL.
    #[serde(default)]
    pub ttl: String,
}

// ── Handlers ─────────────────────────────────────────────────

pub async fn list_environments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let envs = state.registry.list_environments().await?;
    Ok(Json(json!({ "success": true, "data": envs })))
}

/// Register an environment by hand. The connector for its type resolves the
/// canonical id and confirms the environment exists before it is written.
pub async fn add_environment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddEnvironmentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.name.trim().is_empty() || req.owner.trim().is_empty() {
        return Err(AppError::BadRequest("name and owner are required".into()));
    }

    let connector = state
        .connectors
        .get(&req.kind)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let ttl = if req.ttl.trim().is_empty() {
        state.default_ttl
    } else {
        parse_duration(&req.ttl).map_err(|e| AppError::BadRequest(format!("invalid ttl: {e}")))?
    };
    let deadline =
        Deadline::after(ttl).map_err(|e| AppError::BadRequest(format!("invalid ttl: {e}")))?;

    let mut env = Environment {
        id: String::new(),
        kind: req.kind,
        name: req.name.trim().to_string(),
        namespace: req.namespace.trim().to_string(),
        owner: req.owner.trim().to_string(),
        deadline,
    };

    env.id = connector.resolve_id(&env).await.map_err(|e| {
        warn!(error = %format!("{e:#}"), "error getting environment id");
        AppError::BadRequest("error getting environment id".into())
    })?;

    connector.verify(&env).await.map_err(|e| {
        warn!(env_id = %env.id, error = %format!("{e:#}"), "error checking environment");
        AppError::BadRequest("error checking environment".into())
    })?;

    match state.registry.get_environment(&env.id).await {
        Ok(_) => return Err(AppError::Conflict("environment already exists".into())),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // Insert-if-absent: a crawler may have written it in the meantime.
    if state.registry.write_environments(std::slice::from_ref(&env)).await? == 0 {
        return Err(AppError::Conflict("environment already exists".into()));
    }

    info!(
        env_id = %env.id,
        env_type = %env.kind,
        delete_at = %env.deadline,
        "environment {} added",
        env.display_name()
    );
    Ok(Json(json!({ "success": true, "data": env })))
}

/// Drop the registry record (and its token). The platform is not touched.
pub async fn delete_environment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.registry.delete_environment(&id).await? {
        return Err(AppError::NotFound(format!("environment {id}")));
    }
    info!(env_id = %id, "environment removed from registry");
    Ok(Json(json!({ "success": true, "data": { "deleted": id } })))
}
