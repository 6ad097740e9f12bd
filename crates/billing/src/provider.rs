//! Payment provider API client
//!
//! The reconciler needs exactly one provider API call: fetching a
//! subscription by id while completing a checkout (the checkout session
//! payload does not carry the price). The trait keeps that seam
//! mockable in tests.

use async_trait::async_trait;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::SubscriptionObject;

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<SubscriptionObject>;
}

/// REST client against the provider API, authenticated with the secret
/// key from [`BillingConfig`].
pub struct HttpProviderClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl HttpProviderClient {
    pub fn new(config: &BillingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.provider_api_base.clone(),
            api_key: config.provider_api_key.clone(),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<SubscriptionObject> {
        let url = format!("{}/subscriptions/{}", self.api_base, subscription_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Provider(format!(
                "GET /subscriptions/{} returned {}",
                subscription_id,
                response.status()
            )));
        }

        response
            .json::<SubscriptionObject>()
            .await
            .map_err(|e| BillingError::Provider(e.to_string()))
    }
}
