use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::WebhookError;

/// Read side of the billing provider that event handlers depend on.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Fetches a checkout session with its line items expanded.
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, WebhookError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, WebhookError>;
}

#[derive(Clone)]
pub struct StripeApi {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeApi {
    pub fn new(secret_key: String, base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create Stripe HTTP client")?;

        Ok(Self {
            http,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<T> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Stripe GET failed for {}", path))?;

        parse_stripe_response(response, path).await
    }
}

#[async_trait]
impl BillingProvider for StripeApi {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, WebhookError> {
        self.get_json(
            &format!("checkout/sessions/{}", session_id),
            &[("expand[]", "line_items")],
        )
        .await
        .map_err(WebhookError::ProviderCall)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, WebhookError> {
        self.get_json(&format!("subscriptions/{}", subscription_id), &[])
            .await
            .map_err(WebhookError::ProviderCall)
    }
}

async fn parse_stripe_response<T: DeserializeOwned>(
    response: reqwest::Response,
    path: &str,
) -> anyhow::Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read Stripe response body for {}", path))?;

    if !status.is_success() {
        return Err(anyhow!(
            "Stripe API {} failed with status {}: {}",
            path,
            status,
            text
        ));
    }

    serde_json::from_str::<T>(&text)
        .with_context(|| format!("failed to decode Stripe response for {}", path))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<IdOrObject>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub line_items: Option<LineItems>,
}

impl CheckoutSession {
    pub fn customer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    pub fn line_items(&self) -> &[LineItem] {
        self.line_items
            .as_ref()
            .map(|items| items.data.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItems {
    pub data: Vec<LineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub price: Option<Price>,
}

impl LineItem {
    pub fn price_id(&self) -> Option<&str> {
        self.price.as_ref().map(|price| price.id.as_str())
    }

    pub fn is_recurring(&self) -> bool {
        self.price
            .as_ref()
            .and_then(|price| price.price_type.as_deref())
            == Some("recurring")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(rename = "type", default)]
    pub price_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: IdOrObject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdOrObject {
    Id(String),
    Object { id: String },
}

impl IdOrObject {
    pub fn id(&self) -> &str {
        match self {
            IdOrObject::Id(value) => value,
            IdOrObject::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}
