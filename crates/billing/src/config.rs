//! Billing configuration
//!
//! Built once at startup and passed into the verifier and reconciler.
//! Business logic never reads process environment directly.

use crate::error::{BillingError, BillingResult};

/// Plan name every tenant starts on and falls back to after cancellation.
pub const FREE_PLAN: &str = "Free";

/// Default plan resolved when a provider price id is missing from the
/// catalog. A paid default on purpose: an unresolved price must never
/// leave a paying tenant without entitlement.
pub const DEFAULT_PLAN: &str = "Pro";

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Shared secret for webhook signature verification (whsec_...).
    pub webhook_secret: String,
    /// Provider API secret key, used to fetch subscriptions during
    /// checkout completion.
    pub provider_api_key: String,
    /// Provider REST API base URL. Overridable for tests.
    pub provider_api_base: String,
    /// Plan name returned when a price id is not in the catalog.
    pub default_plan: String,
    /// Outbound notification webhook URL; notifications are disabled
    /// when unset.
    pub notify_webhook_url: Option<String>,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        let webhook_secret = std::env::var("BILLING_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("BILLING_WEBHOOK_SECRET not set".to_string()))?;
        let provider_api_key = std::env::var("BILLING_PROVIDER_API_KEY")
            .map_err(|_| BillingError::Config("BILLING_PROVIDER_API_KEY not set".to_string()))?;

        Ok(Self {
            webhook_secret,
            provider_api_key,
            provider_api_base: std::env::var("BILLING_PROVIDER_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            default_plan: std::env::var("BILLING_DEFAULT_PLAN")
                .unwrap_or_else(|_| DEFAULT_PLAN.to_string()),
            notify_webhook_url: std::env::var("BILLING_NOTIFY_WEBHOOK_URL").ok(),
        })
    }
}
