//! Billing webhook endpoint
//!
//! Receives provider deliveries on `POST /webhooks/billing`. The raw
//! body, the `Stripe-Signature` header, and the content type go to the
//! billing verifier; only a verification failure produces a non-2xx
//! response. Handler failures are logged and still acknowledged with
//! 200, because the provider retries non-2xx responses and a payload
//! that fails deterministically would retry forever.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

pub async fn handle_billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok());

    let event = match state
        .billing
        .webhooks
        .verify_event(content_type, signature, &body)
    {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    if let Err(e) = state.billing.webhooks.handle_event(&event).await {
        tracing::error!(
            event_id = %event.id,
            error = %e,
            "Webhook handler failed; acknowledging anyway"
        );
    }

    Json(json!({ "received": true })).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use caixa_billing::{
        BillingConfig, BillingService, DocumentStore, HttpProviderClient, MemoryStore,
        NoopNotifier,
    };
    use hmac::{Hmac, Mac};
    use serde_json::{json, Value};
    use sha2::Sha256;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::routes::create_router;
    use crate::state::AppState;

    const SECRET: &str = "whsec_api_test_secret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn test_app() -> (axum::Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let billing_config = BillingConfig {
            webhook_secret: SECRET.to_string(),
            provider_api_key: "sk_test_dummy".to_string(),
            provider_api_base: "http://provider.invalid".to_string(),
            default_plan: "Pro".to_string(),
            notify_webhook_url: None,
        };
        let provider = Arc::new(HttpProviderClient::new(&billing_config));
        let billing = Arc::new(BillingService::new(
            billing_config,
            store.clone(),
            provider,
            Arc::new(NoopNotifier),
        ));
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: "postgres://unused".to_string(),
        };
        (create_router(AppState::new(config, billing)), store)
    }

    fn webhook_request(body: &str, signature: Option<&str>, content_type: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/billing")
            .header("content-type", content_type);
        if let Some(sig) = signature {
            builder = builder.header("Stripe-Signature", sig);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _store) = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_valid_delivery_is_acknowledged() {
        let (app, store) = test_app();
        store
            .set(
                "tenants",
                "t1",
                json!({ "customerId": "cus_1", "plan": "Free", "status": "active" }),
                false,
            )
            .await
            .unwrap();
        store
            .set(
                "plans",
                "plan_pro",
                json!({ "name": "Pro", "priceIdMonthly": "price_pro_monthly" }),
                false,
            )
            .await
            .unwrap();

        let payload = json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "items": { "data": [ { "price": { "id": "price_pro_monthly" } } ] }
            } }
        })
        .to_string();
        let signature = sign(&payload, OffsetDateTime::now_utc().unix_timestamp());

        let response = app
            .oneshot(webhook_request(&payload, Some(&signature), "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(body_json(response).await, json!({ "received": true }));

        let tenant = store.get("tenants", "t1").await.unwrap().unwrap();
        assert_eq!(tenant.fields["plan"], "Pro");
        assert_eq!(tenant.fields["subscriptionId"], "sub_1");
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_with_400() {
        let (app, store) = test_app();
        let docs_before = store.document_count().await;

        let payload = json!({
            "id": "evt_1",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1", "customer": "cus_1", "amount_paid": 4990 } }
        })
        .to_string();

        let response = app
            .oneshot(webhook_request(
                &payload,
                Some("t=1,v1=deadbeef"),
                "application/json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body = body_json(response).await;
        assert!(body["error"].is_string());

        assert_eq!(store.document_count().await, docs_before);
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected_with_400() {
        let (app, _store) = test_app();
        let response = app
            .oneshot(webhook_request("{}", None, "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected_with_400() {
        let (app, _store) = test_app();
        let payload = "{}";
        let signature = sign(payload, OffsetDateTime::now_utc().unix_timestamp());

        let response = app
            .oneshot(webhook_request(payload, Some(&signature), "text/plain"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_unhandled_event_type_gets_200() {
        let (app, store) = test_app();
        let docs_before = store.document_count().await;

        let payload = json!({
            "id": "evt_1",
            "type": "invoice.finalized",
            "data": { "object": {} }
        })
        .to_string();
        let signature = sign(&payload, OffsetDateTime::now_utc().unix_timestamp());

        let response = app
            .oneshot(webhook_request(&payload, Some(&signature), "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(body_json(response).await, json!({ "received": true }));
        assert_eq!(store.document_count().await, docs_before);
    }

    #[tokio::test]
    async fn test_handler_failure_still_acknowledges() {
        let (app, store) = test_app();
        store
            .set(
                "tenants",
                "t1",
                json!({ "plan": "Free", "status": "active" }),
                false,
            )
            .await
            .unwrap();

        // Checkout for a known tenant whose subscription fetch will fail
        // (unreachable provider base URL). The delivery must still be
        // acknowledged so the provider does not retry forever.
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "tenant_id": "t1" }
            } }
        })
        .to_string();
        let signature = sign(&payload, OffsetDateTime::now_utc().unix_timestamp());

        let response = app
            .oneshot(webhook_request(&payload, Some(&signature), "application/json"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
}
