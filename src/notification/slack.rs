use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

/// Incoming-webhook transport for Slack.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("env-cleaner/1.0")
            .build()
            .context("failed to build slack HTTP client")?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub async fn send(&self, message: &SlackMessage) -> anyhow::Result<()> {
        tracing::debug!(channel = %message.channel, "sending slack notification");

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    pub username: String,
    pub channel: String,
    pub text: String,
}

impl SlackMessage {
    /// Bare names are treated as users (`alice` → `@alice`); `#channel` and
    /// `@user` are passed through.
    pub fn new(sender_name: &str, channel: &str, text: String) -> anyhow::Result<Self> {
        let channel = channel.trim();
        if sender_name.is_empty() || channel.is_empty() {
            anyhow::bail!("sender name and channel cannot be empty");
        }
        let channel = if channel.starts_with('#') || channel.starts_with('@') {
            channel.to_string()
        } else {
            format!("@{channel}")
        };
        Ok(Self {
            username: sender_name.to_string(),
            channel,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_channel_normalisation() {
        let m = SlackMessage::new("cleaner", "alice", "hi".into()).unwrap();
        assert_eq!(m.channel, "@alice");
        let m = SlackMessage::new("cleaner", "#ops", "hi".into()).unwrap();
        assert_eq!(m.channel, "#ops");
        assert!(SlackMessage::new("", "alice", "hi".into()).is_err());
        assert!(SlackMessage::new("cleaner", "  ", "hi".into()).is_err());
    }

    #[tokio::test]
    async fn test_send_posts_json_payload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({
                "username": "cleaner",
                "channel": "@alice",
                "text": "hello",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let slack = SlackNotifier::new(format!("{}/hook", mock_server.uri())).unwrap();
        let msg = SlackMessage::new("cleaner", "alice", "hello".into()).unwrap();
        slack.send(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_surfaces_non_2xx() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("channel_not_found"))
            .mount(&mock_server)
            .await;

        let slack = SlackNotifier::new(mock_server.uri()).unwrap();
        let msg = SlackMessage::new("cleaner", "alice", "hello".into()).unwrap();
        let err = slack.send(&msg).await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }
}
