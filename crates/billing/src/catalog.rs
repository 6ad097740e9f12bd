//! Plan catalog
//!
//! Maps provider price ids to internal plan names by scanning the small
//! set of plan records. Resolution never hard-fails: an unknown price
//! id resolves to the configured default plan, because entitlement must
//! survive a catalog that is stale relative to the provider's price
//! configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BillingResult;
use crate::store::DocumentStore;
use crate::tenant::collections;

/// A plan record. Feature flags ride along for the rest of the product;
/// resolution only looks at the price ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub price_id_monthly: Option<String>,
    #[serde(default)]
    pub price_id_yearly: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

pub struct PlanCatalog {
    store: Arc<dyn DocumentStore>,
    default_plan: String,
}

impl PlanCatalog {
    pub fn new(store: Arc<dyn DocumentStore>, default_plan: String) -> Self {
        Self {
            store,
            default_plan,
        }
    }

    /// Resolve a provider price id to a plan name.
    ///
    /// First plan whose monthly or yearly price id matches wins; a miss
    /// resolves to the default plan and is logged for operator
    /// follow-up.
    pub async fn resolve_price(&self, price_id: &str) -> BillingResult<String> {
        let docs = self.store.list(collections::PLANS).await?;

        for doc in &docs {
            let plan: Plan = match serde_json::from_value(doc.fields.clone()) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(plan_id = %doc.id, error = %e, "Skipping malformed plan record");
                    continue;
                }
            };

            if plan.price_id_monthly.as_deref() == Some(price_id)
                || plan.price_id_yearly.as_deref() == Some(price_id)
            {
                return Ok(plan.name);
            }
        }

        tracing::warn!(
            price_id = %price_id,
            default_plan = %self.default_plan,
            "Price id not in plan catalog, resolving to default plan"
        );
        Ok(self.default_plan.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn catalog_with_plans() -> PlanCatalog {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                collections::PLANS,
                "plan_free",
                json!({ "name": "Free", "features": [] }),
                false,
            )
            .await
            .unwrap();
        store
            .set(
                collections::PLANS,
                "plan_pro",
                json!({
                    "name": "Pro",
                    "priceIdMonthly": "price_pro_monthly",
                    "priceIdYearly": "price_pro_yearly",
                }),
                false,
            )
            .await
            .unwrap();
        PlanCatalog::new(store, "Pro".to_string())
    }

    #[tokio::test]
    async fn resolves_monthly_price_id() {
        let catalog = catalog_with_plans().await;
        assert_eq!(catalog.resolve_price("price_pro_monthly").await.unwrap(), "Pro");
    }

    #[tokio::test]
    async fn resolves_yearly_price_id() {
        let catalog = catalog_with_plans().await;
        assert_eq!(catalog.resolve_price("price_pro_yearly").await.unwrap(), "Pro");
    }

    #[tokio::test]
    async fn unknown_price_id_resolves_to_default() {
        let catalog = catalog_with_plans().await;
        assert_eq!(catalog.resolve_price("price_gone").await.unwrap(), "Pro");
    }

    #[tokio::test]
    async fn empty_catalog_resolves_to_default() {
        let store = Arc::new(MemoryStore::new());
        let catalog = PlanCatalog::new(store, "Pro".to_string());
        assert_eq!(catalog.resolve_price("price_any").await.unwrap(), "Pro");
    }
}
