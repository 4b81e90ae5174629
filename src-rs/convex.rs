use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::{
    directory::{BindOutcome, Directory, SubscriptionRecord, SubscriptionUpsert, UserRecord},
    error::WebhookError,
    plans::{BillingPeriod, PlanTag},
    serde_convex::de_i64_from_number,
};

#[derive(Clone)]
pub struct ConvexClient {
    base_url: String,
    http: reqwest::Client,
}

const CONVEX_CLIENT_HEADER: &str = "npm-1.26.2";

impl ConvexClient {
    pub fn new(base_url: String) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "Convex-Client",
            HeaderValue::from_static(CONVEX_CLIENT_HEADER),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create Convex HTTP client")?;

        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn query<T: DeserializeOwned>(&self, path: &str, args: Value) -> anyhow::Result<T> {
        let value = self.call("query", path, args).await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode Convex query result for {path}"))
    }

    pub async fn mutation<T: DeserializeOwned>(
        &self,
        path: &str,
        args: Value,
    ) -> anyhow::Result<T> {
        let value = self.call("mutation", path, args).await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode Convex mutation result for {path}"))
    }

    async fn call(&self, kind: &str, path: &str, args: Value) -> anyhow::Result<Value> {
        let endpoint = format!("{}/api/{}", self.base_url.trim_end_matches('/'), kind);
        let body = json!({
            "path": path,
            "format": "convex_encoded_json",
            "args": [args],
        });

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Convex {} request failed for {} (base_url={})",
                    kind, path, self.base_url
                )
            })?;

        let status = response.status();
        let response_body: Value = response
            .json()
            .await
            .with_context(|| format!("failed to parse Convex {} response for {}", kind, path))?;

        // 560 carries a function error in the regular envelope
        if !status.is_success() && status.as_u16() != 560 {
            return Err(anyhow!(
                "Convex {} HTTP error {} for {}: {}",
                kind,
                status,
                path,
                response_body
            ));
        }

        match response_body.get("status").and_then(Value::as_str) {
            Some("success") => Ok(response_body.get("value").cloned().unwrap_or(Value::Null)),
            Some("error") => {
                let message = response_body
                    .get("errorMessage")
                    .and_then(Value::as_str)
                    .unwrap_or("Convex function error");
                Err(anyhow!("Convex {} {} failed: {}", kind, path, message))
            }
            _ => Err(anyhow!(
                "Invalid Convex {} response for {}: {}",
                kind,
                path,
                response_body
            )),
        }
    }
}

/// Directory backed by Convex functions.
///
/// The deployment is expected to expose `users:getByEmail`,
/// `users:getByCustomerId`, `users:bindCustomerId` (conditional on the field
/// being unset), `users:setPlan` and `subscriptions:upsertByUserId` (unique
/// index on `userId`).
#[derive(Clone)]
pub struct ConvexDirectory {
    client: ConvexClient,
}

impl ConvexDirectory {
    pub fn new(client: ConvexClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct ConvexUser {
    #[serde(rename = "_id")]
    id: String,
    email: String,
    #[serde(rename = "customerId", default)]
    customer_id: Option<String>,
    #[serde(default)]
    plan: Option<String>,
}

impl From<ConvexUser> for UserRecord {
    fn from(user: ConvexUser) -> Self {
        let plan = match user.plan.as_deref() {
            Some("premium") => PlanTag::Premium,
            _ => PlanTag::Free,
        };
        Self {
            id: user.id,
            email: user.email,
            customer_id: user.customer_id,
            plan,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConvexBindResult {
    bound: bool,
}

#[derive(Debug, Deserialize)]
struct ConvexSubscription {
    #[serde(rename = "userId")]
    user_id: String,
    plan: PlanTag,
    period: BillingPeriod,
    #[serde(rename = "startDate", deserialize_with = "de_i64_from_number")]
    start_date: i64,
    #[serde(rename = "endDate", deserialize_with = "de_i64_from_number")]
    end_date: i64,
}

impl TryFrom<ConvexSubscription> for SubscriptionRecord {
    type Error = anyhow::Error;

    fn try_from(subscription: ConvexSubscription) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: subscription.user_id,
            plan: subscription.plan,
            period: subscription.period,
            start_date: millis_to_datetime(subscription.start_date)?,
            end_date: millis_to_datetime(subscription.end_date)?,
        })
    }
}

fn millis_to_datetime(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {millis}"))
}

#[async_trait]
impl Directory for ConvexDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, WebhookError> {
        let user: Option<ConvexUser> = self
            .client
            .query("users:getByEmail", json!({ "email": email }))
            .await
            .map_err(WebhookError::Directory)?;
        Ok(user.map(UserRecord::from))
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserRecord>, WebhookError> {
        let user: Option<ConvexUser> = self
            .client
            .query("users:getByCustomerId", json!({ "customerId": customer_id }))
            .await
            .map_err(WebhookError::Directory)?;
        Ok(user.map(UserRecord::from))
    }

    async fn bind_customer_id_if_absent(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<BindOutcome, WebhookError> {
        let result: ConvexBindResult = self
            .client
            .mutation(
                "users:bindCustomerId",
                json!({ "userId": user_id, "customerId": customer_id }),
            )
            .await
            .map_err(WebhookError::Directory)?;
        Ok(if result.bound {
            BindOutcome::Bound
        } else {
            BindOutcome::AlreadyBound
        })
    }

    async fn set_plan(&self, user_id: &str, plan: PlanTag) -> Result<(), WebhookError> {
        let _value: Value = self
            .client
            .mutation(
                "users:setPlan",
                json!({ "userId": user_id, "plan": plan.as_str() }),
            )
            .await
            .map_err(WebhookError::Directory)?;
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> Result<SubscriptionRecord, WebhookError> {
        let stored: ConvexSubscription = self
            .client
            .mutation(
                "subscriptions:upsertByUserId",
                json!({
                    "userId": upsert.user_id,
                    "plan": upsert.plan.as_str(),
                    "period": upsert.period.as_str(),
                    "startDate": upsert.start_date.timestamp_millis(),
                    "endDate": upsert.end_date.timestamp_millis(),
                }),
            )
            .await
            .map_err(WebhookError::Directory)?;
        SubscriptionRecord::try_from(stored).map_err(WebhookError::Directory)
    }
}
