//! Provider webhook handling
//!
//! Verifies inbound deliveries (content type plus HMAC signature over
//! the raw body) and routes the typed event to the reconciler. Fails
//! closed before dispatch; after verification every delivery is
//! acknowledged, with handler failures surfaced to the audit log
//! instead of the provider's retry machinery.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{EventKind, ProviderEvent};
use crate::reconciler::EntitlementReconciler;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

pub struct WebhookHandler {
    config: BillingConfig,
    reconciler: EntitlementReconciler,
}

impl WebhookHandler {
    pub fn new(config: BillingConfig, reconciler: EntitlementReconciler) -> Self {
        Self { config, reconciler }
    }

    /// Verify and parse a provider webhook delivery.
    ///
    /// Rejects on a non-JSON content type, a missing or mismatched
    /// signature, a stale timestamp, or a payload the envelope parser
    /// cannot read. Never logs the secret or the payload body.
    pub fn verify_event(
        &self,
        content_type: Option<&str>,
        signature: Option<&str>,
        payload: &str,
    ) -> BillingResult<ProviderEvent> {
        match content_type {
            Some(ct) if ct.starts_with("application/json") => {}
            other => {
                let got = other.unwrap_or("<none>").to_string();
                tracing::warn!(content_type = %got, "Rejected webhook with wrong content type");
                return Err(BillingError::InvalidContentType(got));
            }
        }

        let signature = signature.ok_or_else(|| {
            tracing::warn!("Rejected webhook without a signature header");
            BillingError::SignatureVerificationFailed
        })?;

        if self.config.webhook_secret.is_empty() {
            tracing::error!("Webhook secret not configured, rejecting delivery");
            return Err(BillingError::SignatureVerificationFailed);
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.config.webhook_secret, now)?;

        let event = ProviderEvent::parse(payload)?;
        tracing::info!(
            event_id = %event.id,
            event_type = event.kind.name(),
            payload_len = payload.len(),
            "Verified webhook event"
        );
        Ok(event)
    }

    /// Route a verified event to its handler.
    ///
    /// One handler per event type; unrecognized types are logged no-ops
    /// because the provider's taxonomy evolves independently of ours.
    /// A handler failure is wrapped with the event context so the
    /// caller can log it and still acknowledge the delivery.
    ///
    /// There is deliberately no processed-event-id ledger here: every
    /// transition is an absolute assignment, so redelivery converges.
    /// Add a dedup ledger before introducing any delta-style transition.
    pub async fn handle_event(&self, event: &ProviderEvent) -> BillingResult<()> {
        let result = match &event.kind {
            EventKind::CheckoutCompleted(session) => {
                self.reconciler.checkout_completed(session).await
            }
            EventKind::SubscriptionCreated(subscription)
            | EventKind::SubscriptionUpdated(subscription) => {
                self.reconciler.subscription_changed(subscription).await
            }
            EventKind::SubscriptionDeleted(subscription) => {
                self.reconciler.subscription_deleted(subscription).await
            }
            EventKind::InvoicePaid(invoice) => self.reconciler.invoice_paid(invoice).await,
            EventKind::InvoicePaymentFailed(invoice) => {
                self.reconciler.invoice_payment_failed(invoice).await
            }
            EventKind::Unhandled(event_type) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Received unhandled event type - no handler configured"
                );
                Ok(())
            }
        };

        result.map_err(|e| {
            tracing::error!(
                event_id = %event.id,
                event_type = event.kind.name(),
                error = %e,
                "Event handler failed"
            );
            BillingError::Handler(format!("{} ({}): {e}", event.kind.name(), event.id))
        })
    }
}

/// Check a `t=<unix>,v1=<hex hmac>` signature header against the raw
/// payload: HMAC-SHA256 of `"{t}.{payload}"` with the shared secret
/// (`whsec_` prefix stripped), inside the timestamp tolerance.
pub(crate) fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Signature header has no timestamp");
        BillingError::SignatureVerificationFailed
    })?;
    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Signature header has no v1 signature");
        BillingError::SignatureVerificationFailed
    })?;

    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Signature timestamp outside tolerance"
        );
        return Err(BillingError::SignatureVerificationFailed);
    }

    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::SignatureVerificationFailed)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!(timestamp = timestamp, "Webhook signature mismatch");
        return Err(BillingError::SignatureVerificationFailed);
    }

    Ok(())
}

/// Produce a valid signature header for a payload. Test helper.
#[cfg(test)]
pub(crate) fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}
