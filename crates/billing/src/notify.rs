//! Outbound notifications
//!
//! Fire-and-forget: a notification that cannot be delivered is logged
//! and dropped, never allowed to abort reconciliation.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BillingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    SubscriptionCanceled,
    PaymentSucceeded,
    PaymentFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SubscriptionCanceled => "subscription.canceled",
            NotificationKind::PaymentSucceeded => "payment.succeeded",
            NotificationKind::PaymentFailed => "payment.failed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, payload: Value);
}

/// Posts `{event, payload}` to a configured webhook (chat integration,
/// internal fan-out service, ...). Delivery failures are logged only.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    /// Notifier from config: a webhook notifier when a URL is set,
    /// otherwise the disabled no-op.
    pub fn from_config(config: &BillingConfig) -> std::sync::Arc<dyn Notifier> {
        match &config.notify_webhook_url {
            Some(url) => {
                tracing::info!("Outbound notifications enabled");
                std::sync::Arc::new(WebhookNotifier::new(url.clone()))
            }
            None => {
                tracing::warn!(
                    "Outbound notifications disabled (BILLING_NOTIFY_WEBHOOK_URL not set)"
                );
                std::sync::Arc::new(NoopNotifier)
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, kind: NotificationKind, payload: Value) {
        let body = serde_json::json!({
            "event": kind.as_str(),
            "payload": payload,
        });

        match self.http.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(kind = kind.as_str(), "Notification delivered");
            }
            Ok(response) => {
                tracing::error!(
                    kind = kind.as_str(),
                    status = %response.status(),
                    "Notification endpoint returned an error"
                );
            }
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "Failed to deliver notification");
            }
        }
    }
}

/// Used when no notification endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, kind: NotificationKind, _payload: Value) {
        tracing::debug!(kind = kind.as_str(), "Notification skipped (notifier disabled)");
    }
}
