//! Helm release connector.
//!
//! Talks to the cluster through the `helm` (and, for namespace cleanup,
//! `kubectl`) binaries. Ownership and TTL come from the release's
//! user-supplied values `ec_owner` / `ec_ttl`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::Connector;
use crate::models::duration::parse_duration;
use crate::models::environment::{Deadline, Environment};
use crate::notification::Notifier;

pub const KIND: &str = "helm";

const OWNER_KEY: &str = "ec_owner";
const TTL_KEY: &str = "ec_ttl";
const UNINSTALL_TIMEOUT: &str = "300s";

/// Runs an external program and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<Vec<u8>>;
}

pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<Vec<u8>> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {} exited with {}: {}",
                program,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HelmSettings {
    pub kubeconfig: Option<PathBuf>,
    pub delete_release_namespace: bool,
    pub whitelist_releases_regex: Vec<String>,
    pub blacklist_namespaces: Vec<String>,
}

pub struct HelmConnector {
    settings: HelmSettings,
    filter: Option<String>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Deserialize)]
struct ListedRelease {
    name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseStatus {
    info: ReleaseInfo,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    first_deployed: String,
    status: String,
}

impl HelmConnector {
    pub fn new(
        settings: HelmSettings,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let filter = release_filter(&settings.whitelist_releases_regex)?;
        Ok(Self {
            settings,
            filter,
            runner,
            notifier,
        })
    }

    fn kube_args(&self, args: &mut Vec<String>) {
        if let Some(path) = &self.settings.kubeconfig {
            args.push("--kubeconfig".into());
            args.push(path.display().to_string());
        }
    }

    async fn helm(&self, mut args: Vec<String>) -> anyhow::Result<Vec<u8>> {
        self.kube_args(&mut args);
        self.runner.run("helm", &args).await
    }

    async fn list_releases(&self) -> anyhow::Result<Vec<ListedRelease>> {
        let mut args = strings(&["list", "--all-namespaces", "--deployed", "-o", "json"]);
        if let Some(filter) = &self.filter {
            args.push("--filter".into());
            args.push(filter.clone());
        }
        let out = self.helm(args).await.context("error getting releases")?;
        serde_json::from_slice(&out).context("error decoding helm list output")
    }

    async fn release_values(&self, name: &str, namespace: &str) -> anyhow::Result<serde_json::Value> {
        let out = self
            .helm(strings(&["get", "values", name, "-n", namespace, "-o", "json"]))
            .await
            .with_context(|| format!("error getting values of release {name} ({namespace})"))?;
        serde_json::from_slice(&out).context("error decoding helm values output")
    }

    async fn release_status(&self, name: &str, namespace: &str) -> anyhow::Result<ReleaseStatus> {
        let out = self
            .helm(strings(&["status", name, "-n", namespace, "-o", "json"]))
            .await
            .with_context(|| format!("error getting release {name} ({namespace})"))?;
        serde_json::from_slice(&out).context("error decoding helm status output")
    }

    async fn release_id(&self, name: &str, namespace: &str) -> anyhow::Result<String> {
        let status = self.release_status(name, namespace).await?;
        release_id(name, namespace, &status.info.first_deployed)
    }

    /// One listed release → tracked environment, or `None` when it is
    /// blacklisted, orphaned or carries an unusable TTL.
    async fn inspect(&self, rel: &ListedRelease) -> anyhow::Result<Option<Environment>> {
        if self.settings.blacklist_namespaces.contains(&rel.namespace) {
            warn!("skipped helm release {} ({}): blacklisted", rel.name, rel.namespace);
            return Ok(None);
        }

        let values = self.release_values(&rel.name, &rel.namespace).await?;
        let owner = string_value(&values, OWNER_KEY);
        let ttl = string_value(&values, TTL_KEY);

        let (owner, ttl) = match (owner, ttl) {
            (Some(owner), Some(ttl)) => (owner, ttl),
            _ => {
                warn!(
                    "skipped helm release {} ({}): owner or ttl is empty",
                    rel.name, rel.namespace
                );
                let orphan = Environment {
                    id: String::new(),
                    kind: KIND.to_string(),
                    name: rel.name.clone(),
                    namespace: rel.namespace.clone(),
                    owner: String::new(),
                    deadline: Deadline::from_epoch(0)?,
                };
                if let Err(e) = self.notifier.notify_orphan(&orphan).await {
                    warn!(error = %e, "failed to send orphan notification");
                }
                return Ok(None);
            }
        };

        let deadline = match parse_duration(&ttl)
            .map_err(anyhow::Error::from)
            .and_then(|ttl| Deadline::after(ttl).map_err(anyhow::Error::from))
        {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "skipped helm release {} ({}): error setting deleteAt: {}",
                    rel.name, rel.namespace, e
                );
                return Ok(None);
            }
        };

        Ok(Some(Environment {
            id: self.release_id(&rel.name, &rel.namespace).await?,
            kind: KIND.to_string(),
            name: rel.name.clone(),
            namespace: rel.namespace.clone(),
            owner,
            deadline,
        }))
    }
}

#[async_trait]
impl Connector for HelmConnector {
    fn kind(&self) -> &str {
        KIND
    }

    async fn discover(&self) -> anyhow::Result<Vec<Environment>> {
        let releases = self.list_releases().await?;
        if releases.is_empty() {
            info!(
                "no helm releases found for specified filter: {}",
                self.filter.as_deref().unwrap_or("")
            );
            return Ok(Vec::new());
        }

        let mut envs = Vec::with_capacity(releases.len());
        for rel in &releases {
            match self.inspect(rel).await {
                Ok(Some(env)) => envs.push(env),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "skipped helm release {} ({}): {:#}",
                        rel.name, rel.namespace, e
                    );
                }
            }
        }
        Ok(envs)
    }

    async fn resolve_id(&self, env: &Environment) -> anyhow::Result<String> {
        self.release_id(&env.name, &env.namespace).await
    }

    async fn verify(&self, env: &Environment) -> anyhow::Result<()> {
        let status = self.release_status(&env.name, &env.namespace).await?;
        if status.info.status != "deployed" {
            anyhow::bail!(
                "release {} is in state {}, expected deployed",
                env.display_name(),
                status.info.status
            );
        }
        let id = release_id(&env.name, &env.namespace, &status.info.first_deployed)?;
        if id != env.id {
            anyhow::bail!(
                "release {} changed: id {} does not match registry id {}",
                env.display_name(),
                id,
                env.id
            );
        }
        Ok(())
    }

    async fn delete(&self, env: &Environment) -> anyhow::Result<()> {
        self.helm(strings(&[
            "uninstall",
            &env.name,
            "-n",
            &env.namespace,
            "--wait",
            "--timeout",
            UNINSTALL_TIMEOUT,
        ]))
        .await
        .context("error deleting release")?;

        if self.settings.delete_release_namespace {
            let mut args = strings(&["delete", "namespace", &env.namespace, "--wait=false"]);
            self.kube_args(&mut args);
            self.runner
                .run("kubectl", &args)
                .await
                .context("error deleting release namespace")?;
        }

        info!(env_id = %env.id, "helm release {} uninstalled", env.display_name());
        Ok(())
    }
}

/// Whitelist patterns OR-ed into one `helm list --filter` expression.
fn release_filter(patterns: &[String]) -> anyhow::Result<Option<String>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let filter = patterns
        .iter()
        .map(|p| format!("({p})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&filter).with_context(|| format!("invalid release whitelist regex: {filter}"))?;
    Ok(Some(filter))
}

/// `namespace/name@<first deploy epoch>`: a reinstall under the same name is
/// a different environment.
fn release_id(name: &str, namespace: &str, first_deployed: &str) -> anyhow::Result<String> {
    let first = DateTime::parse_from_rfc3339(first_deployed)
        .with_context(|| format!("invalid first_deployed timestamp: {first_deployed}"))?;
    Ok(format!("{namespace}/{name}@{}", first.timestamp()))
}

fn string_value(values: &serde_json::Value, key: &str) -> Option<String> {
    values
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
