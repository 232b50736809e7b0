//! Admin API client behind the `env` subcommands.

use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::ClientSettings;
use crate::models::environment::Environment;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEnvironment {
    pub name: String,
    pub namespace: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ttl: String,
}

pub struct EnvClient {
    http: reqwest::Client,
    base_url: String,
    auth: String,
}

impl EnvClient {
    pub fn new(settings: &ClientSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&settings.admin_api_key);
        Ok(Self {
            http,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            auth: format!("Basic {encoded}"),
        })
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Environment>> {
        let resp = self
            .http
            .get(format!("{}/api/environments", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .send()
            .await
            .context("error sending request")?;
        unwrap_envelope(resp, "failed to list environments").await
    }

    pub async fn add(&self, env: &NewEnvironment) -> anyhow::Result<Environment> {
        if env.kind == "helm" && env.namespace.is_empty() {
            anyhow::bail!("namespace is required for helm environments");
        }
        let resp = self
            .http
            .post(format!("{}/api/environments", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .json(env)
            .send()
            .await
            .context("error sending request")?;
        unwrap_envelope(resp, "failed to add environment").await
    }
}

async fn unwrap_envelope<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> anyhow::Result<T> {
    let status = resp.status();
    let envelope: Envelope<T> = resp
        .json()
        .await
        .with_context(|| format!("{what}: unexpected response (status {status})"))?;

    match envelope {
        Envelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope {
            error: Some(e), ..
        } => anyhow::bail!("{what}: {} (code: {})", e.message, e.code),
        _ => anyhow::bail!("{what}: empty response (status {status})"),
    }
}

/// Tab-aligned table for `env list`.
pub fn render_table(envs: &[Environment]) -> String {
    let rows: Vec<[String; 5]> = envs
        .iter()
        .map(|e| {
            [
                e.owner.clone(),
                e.id.clone(),
                e.display_name(),
                e.kind.clone(),
                e.deadline.to_string(),
            ]
        })
        .collect();
    let header = ["Owner", "ID", "Name", "Type", "DeleteAt"].map(String::from);

    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}
