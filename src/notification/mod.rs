//! Owner and operator notifications.
//!
//! [`Notifier`] is the capability the jobs and connectors call on lifecycle
//! events. [`ChannelNotifier`] composes the messages, picks the recipient and
//! hands them to whichever transports are enabled. Delivery failures are
//! returned to the caller, which logs them and carries on.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::models::environment::Environment;
use crate::models::token::Token;

pub mod slack;

use slack::{SlackMessage, SlackNotifier};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_orphan(&self, env: &Environment) -> anyhow::Result<()>;
    async fn notify_stale(&self, env: &Environment, token: &Token) -> anyhow::Result<()>;
    async fn notify_deleted(&self, env: &Environment) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// Route owner messages to the admin channel instead.
    pub admin_only: bool,
    /// Public base URL used in extension links.
    pub api_url: String,
    pub stale_threshold: Duration,
    pub max_extend: Duration,
    pub sender_name: String,
    pub admin_channel: String,
}

pub struct ChannelNotifier {
    settings: NotifierSettings,
    slack: Option<SlackNotifier>,
}

impl ChannelNotifier {
    pub fn new(settings: NotifierSettings, slack: Option<SlackNotifier>) -> Self {
        Self { settings, slack }
    }

    fn owner_channel<'a>(&'a self, env: &'a Environment) -> &'a str {
        if self.settings.admin_only {
            &self.settings.admin_channel
        } else {
            &env.owner
        }
    }

    async fn deliver(&self, channel: &str, text: String) -> anyhow::Result<()> {
        match &self.slack {
            Some(slack) => {
                let msg = SlackMessage::new(&self.settings.sender_name, channel, text)?;
                slack.send(&msg).await
            }
            None => {
                tracing::debug!(channel, "no notification transport enabled, skipping");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_orphan(&self, env: &Environment) -> anyhow::Result<()> {
        info!(env_type = %env.kind, "sending orphan message for environment {}", env.display_name());
        self.deliver(&self.settings.admin_channel, orphan_message(env))
            .await
    }

    async fn notify_stale(&self, env: &Environment, token: &Token) -> anyhow::Result<()> {
        info!(
            env_id = %env.id,
            env_type = %env.kind,
            "sending stale message for environment {}",
            env.display_name()
        );
        let periods = extension_periods(self.settings.stale_threshold, self.settings.max_extend);
        let links = extension_links(&self.settings.api_url, &env.id, &token.token, &periods);
        self.deliver(self.owner_channel(env), stale_message(env, &links))
            .await
    }

    async fn notify_deleted(&self, env: &Environment) -> anyhow::Result<()> {
        info!(
            env_id = %env.id,
            env_type = %env.kind,
            "sending delete message for environment {}",
            env.display_name()
        );
        self.deliver(self.owner_channel(env), deleted_message(env))
            .await
    }
}

/// Suggested extension periods: the stale threshold, half the maximum, and
/// the maximum.
pub fn extension_periods(stale_threshold: Duration, max_extend: Duration) -> [Duration; 3] {
    [stale_threshold, max_extend / 2, max_extend]
}

/// `(label, url)` pairs pointing at `GET /extend`.
pub fn extension_links(
    api_url: &str,
    env_id: &str,
    token: &str,
    periods: &[Duration],
) -> Vec<(String, String)> {
    let base = api_url.trim_end_matches('/');
    periods
        .iter()
        .map(|p| {
            let period = humantime::format_duration(*p).to_string();
            let url = format!(
                "{}/extend?env_id={}&period={}&token={}",
                base,
                urlencoding::encode(env_id),
                urlencoding::encode(&period),
                urlencoding::encode(token),
            );
            (period, url)
        })
        .collect()
}

pub fn orphan_message(env: &Environment) -> String {
    format!(
        "*Environment: {}, type: {}, is orphaned*\nIt has no owner or TTL metadata and is not tracked.",
        env.display_name(),
        env.kind
    )
}

pub fn stale_message(env: &Environment, links: &[(String, String)]) -> String {
    let mut text = format!(
        "*Environment {}, type: {}, is stale and will be deleted at {} (UTC)*\n\
         Use one of the following links to extend your environment:\n",
        env.display_name(),
        env.kind,
        env.deadline
    );
    for (label, url) in links {
        text.push_str(&format!("- <{url}|Extend {label}>\n"));
    }
    text
}

pub fn deleted_message(env: &Environment) -> String {
    format!(
        "*Environment: {}, type: {}, is outdated and has been deleted*",
        env.display_name(),
        env.kind
    )
}
