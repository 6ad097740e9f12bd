//! Provider event model
//!
//! Webhook deliveries are parsed into a tagged union over the event
//! kinds this system handles; every other kind collapses into
//! [`EventKind::Unhandled`] and is acknowledged as a no-op, because the
//! provider's event taxonomy evolves independently of ours.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::BillingResult;

/// A verified, typed provider event.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    /// Provider-assigned event id. Used for logging and tracing only;
    /// redelivery safety rests on transition idempotence, not dedup.
    pub id: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    CheckoutCompleted(CheckoutSession),
    SubscriptionCreated(SubscriptionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    InvoicePaid(InvoiceObject),
    InvoicePaymentFailed(InvoiceObject),
    /// Any event type without a handler; carries the provider's type
    /// string for the audit log.
    Unhandled(String),
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::CheckoutCompleted(_) => "checkout.session.completed",
            EventKind::SubscriptionCreated(_) => "customer.subscription.created",
            EventKind::SubscriptionUpdated(_) => "customer.subscription.updated",
            EventKind::SubscriptionDeleted(_) => "customer.subscription.deleted",
            EventKind::InvoicePaid(_) => "invoice.paid",
            EventKind::InvoicePaymentFailed(_) => "invoice.payment_failed",
            EventKind::Unhandled(name) => name,
        }
    }
}

/// Checkout session payload. The tenant reference travels in the
/// session metadata (set when the checkout session was created).
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata.get("tenant_id").map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Unix timestamp of the current billing period's end.
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl SubscriptionObject {
    /// Price id of the first subscription item, the one entitlement is
    /// resolved from.
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    /// Whether the provider considers this subscription entitled.
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: Value,
}

impl ProviderEvent {
    /// Parse the provider's `{id, type, data: {object}}` envelope into
    /// a typed event. Payloads with a handled type but a malformed
    /// object are an error; unknown types are not.
    pub fn parse(payload: &str) -> BillingResult<Self> {
        let envelope: Envelope = serde_json::from_str(payload)?;
        let object = envelope.data.object;

        let kind = match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                EventKind::CheckoutCompleted(serde_json::from_value(object)?)
            }
            "customer.subscription.created" => {
                EventKind::SubscriptionCreated(serde_json::from_value(object)?)
            }
            "customer.subscription.updated" => {
                EventKind::SubscriptionUpdated(serde_json::from_value(object)?)
            }
            "customer.subscription.deleted" => {
                EventKind::SubscriptionDeleted(serde_json::from_value(object)?)
            }
            "invoice.paid" => EventKind::InvoicePaid(serde_json::from_value(object)?),
            "invoice.payment_failed" => {
                EventKind::InvoicePaymentFailed(serde_json::from_value(object)?)
            }
            other => EventKind::Unhandled(other.to_string()),
        };

        Ok(Self {
            id: envelope.id,
            kind,
        })
    }
}
