//! Expiry job: reclaims environments whose deadline has passed.
//!
//! Each outdated environment goes through three independent steps:
//!
//! 1. verify it still exists on the platform and matches the record,
//! 2. reclaim it (platform delete, then registry delete), skipped in dry-run,
//! 3. announce the deletion to its owner.
//!
//! A failure on one environment is logged and never stops the sweep.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::Job;
use crate::connector::{Connector, ConnectorSet};
use crate::metrics::Metrics;
use crate::models::environment::Environment;
use crate::notification::Notifier;
use crate::store::{Registry, StoreResult};

/// What happened to the outdated environments in one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub outdated: usize,
    /// Reclaimed, or would have been in dry-run.
    pub reclaimed: usize,
    pub announced: usize,
    pub skipped: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum Reclaim {
    Done,
    Suppressed,
}

pub struct Deleter {
    registry: Arc<dyn Registry>,
    connectors: ConnectorSet,
    notifier: Arc<dyn Notifier>,
    dry_run: bool,
    metrics: Metrics,
}

impl Deleter {
    pub fn new(
        registry: Arc<dyn Registry>,
        connectors: ConnectorSet,
        notifier: Arc<dyn Notifier>,
        dry_run: bool,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            connectors,
            notifier,
            dry_run,
            metrics,
        }
    }

    pub async fn sweep(&self) -> StoreResult<SweepReport> {
        let envs = self.registry.outdated_environments().await?;
        let mut report = SweepReport {
            outdated: envs.len(),
            ..SweepReport::default()
        };

        for env in &envs {
            let connector = match self.connectors.get(&env.kind) {
                Ok(c) => c,
                Err(e) => {
                    error!(env_id = %env.id, error = %e, "skipping outdated environment");
                    report.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = connector.verify(env).await {
                warn!(
                    env_id = %env.id,
                    error = %format!("{e:#}"),
                    "environment {} failed verification, leaving it for the next sweep",
                    env.display_name()
                );
                report.skipped += 1;
                continue;
            }

            let reclaim = match self.reclaim(connector.as_ref(), env).await {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        env_id = %env.id,
                        error = %format!("{e:#}"),
                        "error deleting environment {}",
                        env.display_name()
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            report.reclaimed += 1;
            self.metrics
                .deleted(&env.kind, reclaim == Reclaim::Suppressed);

            if self.announce(env).await {
                report.announced += 1;
            }
        }

        Ok(report)
    }

    /// The destructive half. Dry-run stops here and nothing else.
    async fn reclaim(&self, connector: &dyn Connector, env: &Environment) -> anyhow::Result<Reclaim> {
        if self.dry_run {
            info!(
                env_id = %env.id,
                env_type = %env.kind,
                "dry run: would delete environment {}",
                env.display_name()
            );
            return Ok(Reclaim::Suppressed);
        }

        connector.delete(env).await?;
        self.registry.delete_environment(&env.id).await?;
        info!(
            env_id = %env.id,
            env_type = %env.kind,
            "deleted environment {}",
            env.display_name()
        );
        Ok(Reclaim::Done)
    }

    async fn announce(&self, env: &Environment) -> bool {
        match self.notifier.notify_deleted(env).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    env_id = %env.id,
                    error = %format!("{e:#}"),
                    "error sending delete message"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Job for Deleter {
    fn name(&self) -> &str {
        "deleter"
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let report = self.sweep().await?;
        info!(
            outdated = report.outdated,
            reclaimed = report.reclaimed,
            announced = report.announced,
            skipped = report.skipped,
            dry_run = self.dry_run,
            "deleter task finished"
        );
        Ok(())
    }
}
