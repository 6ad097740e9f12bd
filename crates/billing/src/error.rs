//! Billing error types

use thiserror::Error;

use crate::store::StoreError;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by webhook verification and event reconciliation.
///
/// Only `InvalidContentType` and `SignatureVerificationFailed` are ever
/// surfaced to the provider as a non-success response. Everything past
/// verification is best-effort: handler failures are logged and the
/// delivery is acknowledged anyway so the provider does not retry-storm
/// on a transient internal fault.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invalid content type: expected application/json, got {0}")]
    InvalidContentType(String),

    #[error("webhook signature verification failed")]
    SignatureVerificationFailed,

    #[error("no tenant found for provider customer {0}")]
    TenantNotFound(String),

    #[error("event handler failed: {0}")]
    Handler(String),

    #[error("archival compaction failed: {0}")]
    Archival(String),

    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider api error: {0}")]
    Provider(String),

    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
