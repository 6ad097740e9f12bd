// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Caixa Billing Module
//!
//! Subscription billing reconciliation for the Caixa bookkeeping
//! service: provider webhook events in, durable entitlement state out.
//!
//! ## Features
//!
//! - **Webhook Verification**: HMAC signature check over the raw body,
//!   fails closed
//! - **Typed Events**: tagged union over the handled provider event
//!   kinds, unknown kinds are acknowledged no-ops
//! - **Entitlement Reconciliation**: idempotent plan/status state
//!   machine, tolerant of out-of-order and duplicate delivery
//! - **Plan Catalog**: provider price id to plan name resolution with a
//!   configured default on miss
//! - **Archival Compaction**: retention cap on free-tier ledgers,
//!   bounded batched writes
//! - **Notifications**: fire-and-forget webhook fan-out

pub mod archival;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod notify;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod tenant;
pub mod webhooks;


// Archival
pub use archival::{ArchivalCompactor, RETENTION_LIMIT};

// Catalog
pub use catalog::{Plan, PlanCatalog};

// Config
pub use config::{BillingConfig, DEFAULT_PLAN, FREE_PLAN};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    CheckoutSession, EventKind, InvoiceObject, ProviderEvent, SubscriptionObject,
};

// Notify
pub use notify::{NoopNotifier, NotificationKind, Notifier, WebhookNotifier};

// Provider
pub use provider::{HttpProviderClient, ProviderClient};

// Reconciler
pub use reconciler::EntitlementReconciler;

// Store
pub use store::{Document, DocumentStore, MemoryStore, PgStore, StoreError, WriteOp, MAX_BATCH_SIZE};

// Tenant
pub use tenant::{collections, Payment, PaymentStatus, Tenant, TenantStatus};

// Webhooks
pub use webhooks::WebhookHandler;

use std::sync::Arc;

/// Main billing service wiring the webhook pipeline together.
pub struct BillingService {
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Build the service with explicit collaborators.
    pub fn new(
        config: BillingConfig,
        store: Arc<dyn DocumentStore>,
        provider_client: Arc<dyn ProviderClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reconciler = EntitlementReconciler::new(
            store,
            provider_client,
            notifier,
            config.default_plan.clone(),
        );
        Self {
            webhooks: WebhookHandler::new(config, reconciler),
        }
    }

    /// Build the service from environment variables, with the real
    /// provider client and notifier.
    pub fn from_env(store: Arc<dyn DocumentStore>) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let provider_client = Arc::new(HttpProviderClient::new(&config));
        let notifier = WebhookNotifier::from_config(&config);
        Ok(Self::new(config, store, provider_client, notifier))
    }
}
