//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use env_cleaner::connector::Connector;
use env_cleaner::models::environment::{Deadline, Environment};
use env_cleaner::models::token::Token;
use env_cleaner::notification::Notifier;
use env_cleaner::store::sqlite::SqliteRegistry;

pub fn env_at(id: &str, owner: &str, delete_at_sec: i64) -> Environment {
    Environment {
        id: id.to_string(),
        kind: "fake".into(),
        name: format!("release-{id}"),
        namespace: "review".into(),
        owner: owner.to_string(),
        deadline: Deadline::from_epoch(delete_at_sec).unwrap(),
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn registry() -> Arc<SqliteRegistry> {
    Arc::new(SqliteRegistry::open_in_memory().await.unwrap())
}

/// Connector over a fixed inventory. Ids listed in `broken` fail
/// verification; `deleted` records platform deletes.
#[derive(Default)]
pub struct FakeConnector {
    pub inventory: Mutex<Vec<Environment>>,
    pub broken: Mutex<HashSet<String>>,
    pub failing_deletes: Mutex<HashSet<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn with_inventory(envs: Vec<Environment>) -> Arc<Self> {
        let c = Self::default();
        *c.inventory.lock().unwrap() = envs;
        Arc::new(c)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> &str {
        "fake"
    }

    async fn discover(&self) -> anyhow::Result<Vec<Environment>> {
        Ok(self.inventory.lock().unwrap().clone())
    }

    async fn resolve_id(&self, env: &Environment) -> anyhow::Result<String> {
        Ok(format!("{}/{}", env.namespace, env.name))
    }

    async fn verify(&self, env: &Environment) -> anyhow::Result<()> {
        if self.broken.lock().unwrap().contains(&env.id) {
            anyhow::bail!("environment {} no longer matches", env.id);
        }
        Ok(())
    }

    async fn delete(&self, env: &Environment) -> anyhow::Result<()> {
        if self.failing_deletes.lock().unwrap().contains(&env.id) {
            anyhow::bail!("platform refused to delete {}", env.id);
        }
        self.deleted.lock().unwrap().push(env.id.clone());
        Ok(())
    }
}

/// Records every notification; optionally fails stale deliveries.
#[derive(Default)]
pub struct RecordingNotifier {
    pub orphans: Mutex<Vec<String>>,
    pub stale: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_stale: bool,
    pub fail_deleted: bool,
}

impl RecordingNotifier {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn stale(&self) -> Vec<(String, String)> {
        self.stale.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_orphan(&self, env: &Environment) -> anyhow::Result<()> {
        self.orphans.lock().unwrap().push(env.name.clone());
        Ok(())
    }

    async fn notify_stale(&self, env: &Environment, token: &Token) -> anyhow::Result<()> {
        if self.fail_stale {
            anyhow::bail!("chat service unavailable");
        }
        self.stale
            .lock()
            .unwrap()
            .push((env.id.clone(), token.token.clone()));
        Ok(())
    }

    async fn notify_deleted(&self, env: &Environment) -> anyhow::Result<()> {
        if self.fail_deleted {
            anyhow::bail!("chat service unavailable");
        }
        self.deleted.lock().unwrap().push(env.id.clone());
        Ok(())
    }
}
