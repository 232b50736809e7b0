//! Stale notifier: offers owners an extension before their deadline passes.
//!
//! For every environment inside the stale window a token is issued and the
//! owner is sent the extension links. An environment that already has an
//! outstanding token was notified on an earlier tick and is left alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Job;
use crate::metrics::Metrics;
use crate::models::environment::Environment;
use crate::notification::Notifier;
use crate::store::{Registry, StoreError, StoreResult};

pub struct StaleNotifier {
    registry: Arc<dyn Registry>,
    notifier: Arc<dyn Notifier>,
    threshold: Duration,
    metrics: Metrics,
}

impl StaleNotifier {
    pub fn new(
        registry: Arc<dyn Registry>,
        notifier: Arc<dyn Notifier>,
        threshold: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            notifier,
            threshold,
            metrics,
        }
    }

    /// Returns how many owners were notified.
    pub async fn check(&self) -> StoreResult<usize> {
        let envs = self.registry.stale_environments(self.threshold).await?;
        let mut notified = 0;
        for env in &envs {
            if self.offer_extension(env).await {
                notified += 1;
            }
        }
        Ok(notified)
    }

    async fn offer_extension(&self, env: &Environment) -> bool {
        let token = match self.registry.issue_token(&env.id).await {
            Ok(t) => t,
            Err(StoreError::TokenExists(_)) => {
                debug!(env_id = %env.id, "extension already offered");
                return false;
            }
            Err(e) => {
                warn!(env_id = %env.id, error = %e, "error issuing extension token");
                return false;
            }
        };
        self.metrics.token_issued();

        if let Err(e) = self.notifier.notify_stale(env, &token).await {
            warn!(
                env_id = %env.id,
                error = %format!("{e:#}"),
                "error sending stale message, withdrawing token"
            );
            if let Err(e) = self.registry.delete_token(&env.id).await {
                warn!(env_id = %env.id, error = %e, "error withdrawing extension token");
            }
            return false;
        }
        true
    }
}

#[async_trait]
impl Job for StaleNotifier {
    fn name(&self) -> &str {
        "stale_notifier"
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let notified = self.check().await?;
        info!(notified, "stale notifier task finished");
        Ok(())
    }
}
