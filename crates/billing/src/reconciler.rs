//! Entitlement reconciler
//!
//! The state machine that turns provider events into tenant entitlement
//! state. Every transition is an absolute field assignment, so
//! redelivered events converge to the same state instead of compounding.
//! There is no event-id dedup ledger; any future delta-style transition
//! must add one first.
//!
//! Multi-document effects (tenant update plus payment append) are two
//! sequential per-document-atomic writes. They can partially apply on a
//! crash in between; that trade-off favors availability and is accepted.

use std::sync::Arc;

use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::archival::ArchivalCompactor;
use crate::catalog::PlanCatalog;
use crate::config::FREE_PLAN;
use crate::error::{BillingError, BillingResult};
use crate::events::{CheckoutSession, InvoiceObject, SubscriptionObject};
use crate::notify::{NotificationKind, Notifier};
use crate::provider::ProviderClient;
use crate::store::DocumentStore;
use crate::tenant::{collections, Payment, PaymentStatus, Tenant, TenantStatus};

pub struct EntitlementReconciler {
    store: Arc<dyn DocumentStore>,
    catalog: PlanCatalog,
    compactor: ArchivalCompactor,
    provider: Arc<dyn ProviderClient>,
    notifier: Arc<dyn Notifier>,
}

impl EntitlementReconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn ProviderClient>,
        notifier: Arc<dyn Notifier>,
        default_plan: String,
    ) -> Self {
        let catalog = PlanCatalog::new(store.clone(), default_plan);
        let compactor = ArchivalCompactor::new(store.clone());
        Self {
            store,
            catalog,
            compactor,
            provider,
            notifier,
        }
    }

    /// Checkout completed: link the provider customer to the tenant
    /// named in the session metadata, then apply the state of the
    /// session's subscription.
    pub async fn checkout_completed(&self, session: &CheckoutSession) -> BillingResult<()> {
        let tenant_id = match session.tenant_id() {
            Some(id) => id,
            None => {
                tracing::warn!("Checkout session carries no tenant metadata, ignoring");
                return Ok(());
            }
        };

        if self.store.get(collections::TENANTS, tenant_id).await?.is_none() {
            tracing::warn!(
                tenant_id = %tenant_id,
                "Checkout session references an unknown tenant, ignoring"
            );
            return Ok(());
        }

        let mut fields = json!({ "status": TenantStatus::Active.as_str() });
        if let Some(customer) = &session.customer {
            fields["customerId"] = json!(customer);
        }
        self.store
            .update(collections::TENANTS, tenant_id, fields)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            customer_id = ?session.customer,
            "Linked provider customer to tenant"
        );

        // The session payload has no price; fetch the subscription to
        // resolve the plan.
        if let Some(subscription_id) = &session.subscription {
            let subscription = self.provider.get_subscription(subscription_id).await?;
            self.apply_subscription_state(tenant_id, &subscription)
                .await?;
        } else {
            tracing::warn!(
                tenant_id = %tenant_id,
                "Checkout session has no subscription; plan will be set by a subscription event"
            );
        }

        Ok(())
    }

    /// Subscription created or updated: sync plan, status and the
    /// deferred-cancellation marker from the provider's view.
    pub async fn subscription_changed(&self, subscription: &SubscriptionObject) -> BillingResult<()> {
        let tenant = match self
            .find_tenant_by_customer(subscription.customer.as_deref())
            .await?
        {
            Some(tenant) => tenant,
            None => return Ok(()),
        };

        self.apply_subscription_state(&tenant.id, subscription).await
    }

    /// Subscription deleted: back to the free tier, then compact the
    /// tenant's ledger and emit the cancellation notification.
    pub async fn subscription_deleted(&self, subscription: &SubscriptionObject) -> BillingResult<()> {
        let tenant = match self
            .find_tenant_by_customer(subscription.customer.as_deref())
            .await?
        {
            Some(tenant) => tenant,
            None => return Ok(()),
        };

        self.store
            .update(
                collections::TENANTS,
                &tenant.id,
                json!({
                    "plan": FREE_PLAN,
                    "status": TenantStatus::Active.as_str(),
                    "subscriptionId": Value::Null,
                    "cancelAt": Value::Null,
                }),
            )
            .await?;

        tracing::info!(
            tenant_id = %tenant.id,
            subscription_id = %subscription.id,
            previous_plan = %tenant.plan,
            "Subscription deleted, tenant downgraded to free tier"
        );

        // Storage hygiene must never block the downgrade itself.
        if let Err(e) = self.compactor.compact(&tenant.id).await {
            tracing::error!(
                tenant_id = %tenant.id,
                error = %BillingError::Archival(e.to_string()),
                "Post-downgrade compaction failed; a later run will converge"
            );
        }

        self.notifier
            .notify(
                NotificationKind::SubscriptionCanceled,
                json!({
                    "tenantId": tenant.id,
                    "previousPlan": tenant.plan,
                }),
            )
            .await;

        Ok(())
    }

    pub async fn invoice_paid(&self, invoice: &InvoiceObject) -> BillingResult<()> {
        self.record_payment(invoice, PaymentStatus::Paid, invoice.amount_paid)
            .await
    }

    pub async fn invoice_payment_failed(&self, invoice: &InvoiceObject) -> BillingResult<()> {
        self.record_payment(invoice, PaymentStatus::Failed, invoice.amount_due)
            .await
    }

    /// Append a payment record for an invoice event. Tenant entitlement
    /// is unchanged; this is the audit trail.
    async fn record_payment(
        &self,
        invoice: &InvoiceObject,
        status: PaymentStatus,
        amount_cents: i64,
    ) -> BillingResult<()> {
        let tenant = match self
            .find_tenant_by_customer(invoice.customer.as_deref())
            .await?
        {
            Some(tenant) => tenant,
            None => return Ok(()),
        };

        let payment = Payment {
            tenant_id: tenant.id.clone(),
            invoice_id: invoice.id.clone(),
            plan: tenant.plan.clone(),
            amount_cents,
            currency: invoice
                .currency
                .clone()
                .unwrap_or_else(|| "brl".to_string()),
            status,
            created_at: OffsetDateTime::now_utc(),
        };

        // Keyed by the invoice id, so a redelivery overwrites the same
        // record instead of appending a duplicate.
        self.store
            .set(
                collections::PAYMENTS,
                &Payment::doc_id(&invoice.id),
                serde_json::to_value(&payment)?,
                false,
            )
            .await?;

        tracing::info!(
            tenant_id = %tenant.id,
            invoice_id = %invoice.id,
            amount_cents = amount_cents,
            status = ?status,
            "Recorded payment"
        );

        let kind = match status {
            PaymentStatus::Paid => NotificationKind::PaymentSucceeded,
            PaymentStatus::Failed => NotificationKind::PaymentFailed,
        };
        self.notifier
            .notify(
                kind,
                json!({
                    "tenantId": tenant.id,
                    "invoiceId": invoice.id,
                    "amountCents": amount_cents,
                    "currency": payment.currency,
                }),
            )
            .await;

        Ok(())
    }

    /// Write the absolute entitlement state derived from a provider
    /// subscription onto a tenant.
    async fn apply_subscription_state(
        &self,
        tenant_id: &str,
        subscription: &SubscriptionObject,
    ) -> BillingResult<()> {
        let plan = match subscription.price_id() {
            Some(price_id) => self.catalog.resolve_price(price_id).await?,
            None => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    subscription_id = %subscription.id,
                    "Subscription has no price id, resolving to default plan"
                );
                self.catalog.resolve_price("").await?
            }
        };

        // Deferred cancellation keeps paid entitlement until the period
        // ends; everything else maps straight from the provider status.
        let (status, cancel_at) = match (
            subscription.cancel_at_period_end,
            subscription.current_period_end,
        ) {
            (true, Some(end)) => {
                let at = OffsetDateTime::from_unix_timestamp(end)
                    .unwrap_or_else(|_| OffsetDateTime::now_utc())
                    .format(&Rfc3339)
                    .map_err(|e| BillingError::Handler(e.to_string()))?;
                (TenantStatus::Canceling, json!(at))
            }
            _ => {
                let status = if subscription.is_active() {
                    TenantStatus::Active
                } else {
                    TenantStatus::Inactive
                };
                (status, Value::Null)
            }
        };

        let mut fields = json!({
            "plan": plan.clone(),
            "status": status.as_str(),
            "subscriptionId": subscription.id.clone(),
            "cancelAt": cancel_at,
        });
        if let Some(customer) = &subscription.customer {
            fields["customerId"] = json!(customer);
        }

        self.store
            .update(collections::TENANTS, tenant_id, fields)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            plan = %plan,
            status = status.as_str(),
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Applied subscription state"
        );

        Ok(())
    }

    /// Resolve the tenant for a non-checkout event, treating a miss as
    /// a logged no-op: the event may be a duplicate or refer to a
    /// tenant that was never linked, and dropping it beats failing the
    /// whole delivery.
    async fn find_tenant_by_customer(
        &self,
        customer_id: Option<&str>,
    ) -> BillingResult<Option<Tenant>> {
        let customer_id = match customer_id {
            Some(id) => id,
            None => {
                tracing::warn!("Event carries no customer id, ignoring");
                return Ok(None);
            }
        };

        match self.lookup_customer(customer_id).await {
            Ok(tenant) => Ok(Some(tenant)),
            Err(BillingError::TenantNotFound(customer)) => {
                tracing::info!(
                    customer_id = %customer,
                    "No tenant holds this customer id, ignoring event"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Which tenant currently holds a provider customer id.
    async fn lookup_customer(&self, customer_id: &str) -> BillingResult<Tenant> {
        let docs = self
            .store
            .query(collections::TENANTS, "customerId", &json!(customer_id))
            .await?;

        if docs.len() > 1 {
            tracing::warn!(
                customer_id = %customer_id,
                matches = docs.len(),
                "Multiple tenants share a customer id, using the first"
            );
        }

        match docs.first() {
            Some(doc) => Tenant::from_document(doc),
            None => Err(BillingError::TenantNotFound(customer_id.to_string())),
        }
    }
}
