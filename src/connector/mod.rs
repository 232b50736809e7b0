//! Platform connectors.
//!
//! A connector knows how to find, identify, re-check and remove environments
//! on one kind of infrastructure. The set of enabled connectors is built once
//! at startup and handed to every component as a [`ConnectorSet`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::environment::Environment;

pub mod helm;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Tag stored in `Environment::kind` for everything this connector owns.
    fn kind(&self) -> &str;

    /// Current environments on the platform. Blacklisted units are filtered
    /// out; units without owner/TTL metadata are reported as orphans and
    /// excluded.
    async fn discover(&self) -> anyhow::Result<Vec<Environment>>;

    /// Canonical platform id for an environment described by name/namespace.
    async fn resolve_id(&self, env: &Environment) -> anyhow::Result<String>;

    /// Fails unless the environment still exists and matches the record.
    async fn verify(&self, env: &Environment) -> anyhow::Result<()>;

    async fn delete(&self, env: &Environment) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
#[error("connector not found for type: {0}")]
pub struct UnknownConnector(pub String);

/// Lookup table from type tag to connector.
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its own [`Connector::kind`]. A later
    /// registration for the same kind replaces the earlier one.
    pub fn insert(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.kind().to_string(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.insert(connector);
        self
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Connector>, UnknownConnector> {
        self.connectors
            .get(kind)
            .cloned()
            .ok_or_else(|| UnknownConnector(kind.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Connector>> {
        self.connectors.values()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str);

    #[async_trait]
    impl Connector for Stub {
        fn kind(&self) -> &str {
            self.0
        }
        async fn discover(&self) -> anyhow::Result<Vec<Environment>> {
            Ok(vec![])
        }
        async fn resolve_id(&self, env: &Environment) -> anyhow::Result<String> {
            Ok(env.name.clone())
        }
        async fn verify(&self, _env: &Environment) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _env: &Environment) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lookup_by_kind() {
        let set = ConnectorSet::new()
            .with(Arc::new(Stub("helm")))
            .with(Arc::new(Stub("vsphere_vm")));

        assert_eq!(set.get("helm").unwrap().kind(), "helm");
        assert_eq!(set.kinds(), vec!["helm", "vsphere_vm"]);
        let err = set.get("nomad").err().unwrap();
        assert_eq!(err.to_string(), "connector not found for type: nomad");
    }
}
