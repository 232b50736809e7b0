//! Discovery job: one instance per enabled connector.
//!
//! The crawler only persists what its connector reports. Filtering and orphan
//! reporting happen inside the connector; registry writes are insert-if-absent,
//! so owner and deadline are fixed at first discovery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Job;
use crate::connector::Connector;
use crate::metrics::Metrics;
use crate::store::Registry;

pub struct Crawler {
    name: String,
    connector: Arc<dyn Connector>,
    registry: Arc<dyn Registry>,
    metrics: Metrics,
}

impl Crawler {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<dyn Registry>, metrics: Metrics) -> Self {
        Self {
            name: format!("crawler:{}", connector.kind()),
            connector,
            registry,
            metrics,
        }
    }

    /// One discovery pass. Returns how many environments were new.
    pub async fn crawl(&self) -> anyhow::Result<u64> {
        let kind = self.connector.kind();
        debug!(env_type = kind, "crawler task started");

        let envs = self.connector.discover().await?;
        if envs.is_empty() {
            debug!(env_type = kind, "no environments discovered");
            return Ok(0);
        }

        let inserted = self.registry.write_environments(&envs).await?;
        self.metrics.discovered(kind, inserted);
        info!(
            env_type = kind,
            discovered = envs.len(),
            inserted,
            "crawler task finished"
        );
        Ok(inserted)
    }
}

#[async_trait]
impl Job for Crawler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        self.crawl().await.map(|_| ())
    }
}
