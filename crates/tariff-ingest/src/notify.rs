//! Outcome notifications
//!
//! Channels are fanned out by [`NotificationHub`]. Every channel gets a
//! bounded time to deliver; a slow or failing channel is reported as `false`
//! in the result map and never fails the job that triggered it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tariff_common::types::Severity;
use tracing::{error, info, warn};

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Started,
    Success,
    Failed,
    ValidationIssues,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Started => "started",
            NotificationKind::Success => "success",
            NotificationKind::Failed => "failed",
            NotificationKind::ValidationIssues => "validation-issues",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        severity: Severity,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            subject: subject.into(),
            message: message.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used as the key in delivery results
    fn channel(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Fan-out over all configured channels
#[derive(Clone)]
pub struct NotificationHub {
    channels: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_TIMEOUT)
    }
}

impl NotificationHub {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: Vec::new(),
            timeout,
        }
    }

    pub fn with_channel(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.channels.push(notifier);
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.channel().to_string()).collect()
    }

    /// Deliver to every channel concurrently; never returns an error
    pub async fn notify(&self, notification: Notification) -> HashMap<String, bool> {
        let deliveries = self.channels.iter().map(|channel| {
            let notification = &notification;
            async move {
                let name = channel.channel().to_string();
                let sent = tokio::time::timeout(self.timeout, channel.send(notification)).await;
                let delivered = match sent {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(
                            channel = %name,
                            kind = notification.kind.as_str(),
                            error = %e,
                            "Notification failed"
                        );
                        false
                    },
                    Err(_) => {
                        warn!(
                            channel = %name,
                            kind = notification.kind.as_str(),
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Notification timed out"
                        );
                        false
                    },
                };
                (name, delivered)
            }
        });

        futures::future::join_all(deliveries).await.into_iter().collect()
    }
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<()> {
        let metadata = Value::Object(n.metadata.clone());
        let kind = n.kind.as_str();
        match n.severity {
            Severity::Error => error!(kind, %metadata, "{}: {}", n.subject, n.message),
            Severity::Warning => warn!(kind, %metadata, "{}: {}", n.subject, n.message),
            Severity::Info => info!(kind, %metadata, "{}: {}", n.subject, n.message),
        }
        Ok(())
    }
}

/// POSTs the notification as JSON to a webhook
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    notification: &'a Notification,
    sent_at: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = WebhookPayload {
            notification,
            sent_at: Utc::now().to_rfc3339(),
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("webhook request failed: {e}"))?;

        response
            .error_for_status()
            .map_err(|e| anyhow!("webhook HTTP error: {e}"))?;
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn channel(&self) -> &str {
        "memory"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StuckNotifier;

    #[async_trait]
    impl Notifier for StuckNotifier {
        fn channel(&self) -> &str {
            "stuck"
        }

        async fn send(&self, _: &Notification) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn channel(&self) -> &str {
            "failing"
        }

        async fn send(&self, _: &Notification) -> Result<()> {
            Err(anyhow!("channel down"))
        }
    }

    fn sample() -> Notification {
        Notification::new(NotificationKind::Started, Severity::Info, "Job started", "CI")
            .with_meta("source_id", "CI")
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_bounds_slow_and_failing_channels() {
        let memory = Arc::new(MemoryNotifier::new());
        let hub = NotificationHub::new(Duration::from_secs(2))
            .with_channel(memory.clone())
            .with_channel(Arc::new(StuckNotifier))
            .with_channel(Arc::new(FailingNotifier));

        let results = hub.notify(sample()).await;

        assert_eq!(results.get("memory"), Some(&true));
        assert_eq!(results.get("stuck"), Some(&false));
        assert_eq!(results.get("failing"), Some(&false));
        assert_eq!(memory.kinds(), vec![NotificationKind::Started]);
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()));
        notifier.send(&sample()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["kind"], "started");
        assert_eq!(body["metadata"]["source_id"], "CI");
        assert!(body["sent_at"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri());
        assert!(notifier.send(&sample()).await.is_err());
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::ValidationIssues).unwrap(),
            "\"validation-issues\""
        );
    }
}
