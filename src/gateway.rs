use crate::errors::{RelayError, RelayResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Payload for initializing a hosted checkout
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub tx_ref: String,
    pub callback_url: String,
    pub return_url: String,
    pub customization: Customization,
}

#[derive(Debug, Clone, Serialize)]
pub struct Customization {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub checkout_url: String,
}

/// The remote payment gateway, as seen by the relay
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a gateway transaction and return where to send the payer.
    async fn initialize(&self, request: &CheckoutRequest) -> RelayResult<Checkout>;

    /// Raw verification document for `tx_ref`, whatever its status.
    async fn verify(&self, tx_ref: &str) -> RelayResult<Value>;
}

/// Chapa REST client
///
/// Every call has a hard timeout. Transport failures and 5xx answers are
/// retried under `retry`; anything else is returned to the caller as is.
pub struct ChapaClient {
    client: Client,
    base_url: String,
    secret_key: String,
    retry: RetryPolicy,
}

impl ChapaClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            retry,
        })
    }

    async fn send_json<F>(&self, operation: &'static str, build: F) -> RelayResult<(StatusCode, Value)>
    where
        F: Fn() -> RequestBuilder,
    {
        self.retry
            .retry_async(|attempt| {
                let request = build().bearer_auth(&self.secret_key);
                async move {
                    tracing::debug!(operation, attempt, "Calling payment gateway");

                    let response = request.send().await.map_err(|e| {
                        RelayError::GatewayUnavailable(format!("{} request failed: {}", operation, e))
                    })?;

                    let status = response.status();
                    if status.is_server_error() {
                        return Err(RelayError::GatewayUnavailable(format!(
                            "{} returned {}",
                            operation, status
                        )));
                    }

                    let body = response.json::<Value>().await.map_err(|e| {
                        RelayError::GatewayUnavailable(format!(
                            "{} returned an unreadable body: {}",
                            operation, e
                        ))
                    })?;

                    Ok((status, body))
                }
            })
            .await
    }
}

#[async_trait]
impl PaymentGateway for ChapaClient {
    async fn initialize(&self, request: &CheckoutRequest) -> RelayResult<Checkout> {
        let url = format!("{}/transaction/initialize", self.base_url);

        tracing::info!(
            tx_ref = %request.tx_ref,
            amount = %request.amount,
            "Initializing gateway transaction"
        );

        let (status, body) = self
            .send_json("initialize", || self.client.post(&url).json(request))
            .await?;

        let checkout = parse_checkout(&body)?;
        tracing::info!(tx_ref = %request.tx_ref, http_status = %status, "Gateway checkout created");

        Ok(checkout)
    }

    async fn verify(&self, tx_ref: &str) -> RelayResult<Value> {
        let url = format!("{}/transaction/verify/{}", self.base_url, tx_ref);

        let (status, body) = self
            .send_json("verify", || self.client.get(&url))
            .await?;
        tracing::info!(tx_ref = %tx_ref, http_status = %status, "Gateway verification fetched");

        Ok(body)
    }
}

/// Extract the checkout URL from an initialize response, or the gateway's
/// own message when it refused.
pub fn parse_checkout(body: &Value) -> RelayResult<Checkout> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        return Err(RelayError::Gateway(gateway_message(body)));
    }

    body.pointer("/data/checkout_url")
        .and_then(Value::as_str)
        .map(|url| Checkout {
            checkout_url: url.to_string(),
        })
        .ok_or_else(|| {
            RelayError::GatewayUnavailable("initialize response has no checkout_url".to_string())
        })
}

/// Chapa reports validation problems as an object keyed by field; those are
/// passed through as compact JSON.
fn gateway_message(body: &Value) -> String {
    match body.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}
