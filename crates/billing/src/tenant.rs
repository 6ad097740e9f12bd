//! Tenant and payment records
//!
//! Stored shapes for the documents the reconciler owns. Field names are
//! camelCase to match the persisted document layout.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::FREE_PLAN;
use crate::error::BillingResult;
use crate::store::Document;

/// Document collections this subsystem reads and writes.
pub mod collections {
    pub const TENANTS: &str = "tenants";
    pub const PLANS: &str = "plans";
    pub const PAYMENTS: &str = "payments";
    pub const TRANSACTIONS: &str = "transactions";
}

/// Entitlement status of a tenant.
///
/// `Canceling` is the deferred-cancellation state: the tenant keeps
/// paid entitlement until `cancel_at` passes or a termination event
/// arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
    Canceling,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Canceling => "canceling",
        }
    }
}

/// A tenant (user/account) record as seen by the reconciler.
///
/// Invariant: at most one subscription id at a time; cleared together
/// with the cancellation marker on termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default = "free_plan")]
    pub plan: String,
    #[serde(default = "default_status")]
    pub status: TenantStatus,
    /// Effective timestamp of a deferred cancellation; present only
    /// while `status` is `Canceling`.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub cancel_at: Option<OffsetDateTime>,
}

fn free_plan() -> String {
    FREE_PLAN.to_string()
}

fn default_status() -> TenantStatus {
    TenantStatus::Active
}

impl Tenant {
    pub fn from_document(doc: &Document) -> BillingResult<Self> {
        let mut tenant: Tenant = serde_json::from_value(doc.fields.clone())?;
        tenant.id = doc.id.clone();
        Ok(tenant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

/// One payment record per provider invoice. Append-only: created by the
/// reconciler, never mutated, read only as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub tenant_id: String,
    pub invoice_id: String,
    /// Plan name at the time of the charge.
    pub plan: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Payment {
    /// Derived document key: provider invoice id with a stable prefix,
    /// so redelivered invoice events overwrite the same record.
    pub fn doc_id(invoice_id: &str) -> String {
        format!("pay_{invoice_id}")
    }
}
