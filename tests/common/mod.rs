#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use billing_webhook_server::{
    config::{FailurePolicy, WebhookConfig},
    directory::{
        BindOutcome, Directory, MemoryDirectory, SubscriptionRecord, SubscriptionUpsert,
        UserRecord,
    },
    error::WebhookError,
    plans::PlanTag,
    processor::WebhookProcessor,
    stripe_api::{BillingProvider, CheckoutSession, ProviderSubscription},
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const MONTHLY_PRICE: &str = "price_monthly_test";
pub const YEARLY_PRICE: &str = "price_yearly_test";

/// Billing provider double serving canned sessions and subscriptions.
#[derive(Default)]
pub struct FakeBilling {
    sessions: Mutex<HashMap<String, Value>>,
    subscriptions: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<String>>,
    unavailable: Mutex<bool>,
}

impl FakeBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, session: Value) -> Self {
        let id = session["id"].as_str().unwrap().to_string();
        self.sessions.lock().insert(id, session);
        self
    }

    pub fn with_subscription(self, subscription_id: &str, customer_id: &str) -> Self {
        self.subscriptions.lock().insert(
            subscription_id.to_string(),
            json!({ "id": subscription_id, "object": "subscription", "customer": customer_id }),
        );
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn lookup(
        &self,
        store: &Mutex<HashMap<String, Value>>,
        path: String,
        id: &str,
    ) -> Result<Value, WebhookError> {
        self.calls.lock().push(path.clone());
        if *self.unavailable.lock() {
            return Err(WebhookError::ProviderCall(anyhow::anyhow!(
                "Stripe GET failed for {path}: connection refused"
            )));
        }
        store.lock().get(id).cloned().ok_or_else(|| {
            WebhookError::ProviderCall(anyhow::anyhow!(
                "Stripe API {path} failed with status 404 Not Found"
            ))
        })
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, WebhookError> {
        let value = self.lookup(
            &self.sessions,
            format!("checkout/sessions/{session_id}"),
            session_id,
        )?;
        serde_json::from_value(value).map_err(|error| WebhookError::ProviderCall(error.into()))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, WebhookError> {
        let value = self.lookup(
            &self.subscriptions,
            format!("subscriptions/{subscription_id}"),
            subscription_id,
        )?;
        serde_json::from_value(value).map_err(|error| WebhookError::ProviderCall(error.into()))
    }
}

/// Directory whose `set_plan` can be made to fail; everything else goes to
/// the wrapped in-memory store.
pub struct FlakyPlanDirectory {
    pub inner: MemoryDirectory,
    fail_set_plan: Mutex<bool>,
}

impl FlakyPlanDirectory {
    pub fn new(inner: MemoryDirectory) -> Self {
        Self {
            inner,
            fail_set_plan: Mutex::new(false),
        }
    }

    pub fn set_fail_set_plan(&self, fail: bool) {
        *self.fail_set_plan.lock() = fail;
    }
}

#[async_trait]
impl Directory for FlakyPlanDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, WebhookError> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserRecord>, WebhookError> {
        self.inner.find_user_by_customer_id(customer_id).await
    }

    async fn bind_customer_id_if_absent(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<BindOutcome, WebhookError> {
        self.inner.bind_customer_id_if_absent(user_id, customer_id).await
    }

    async fn set_plan(&self, user_id: &str, plan: PlanTag) -> Result<(), WebhookError> {
        if *self.fail_set_plan.lock() {
            return Err(WebhookError::Directory(anyhow::anyhow!(
                "Convex mutation users:setPlan failed: connection reset"
            )));
        }
        self.inner.set_plan(user_id, plan).await
    }

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> Result<SubscriptionRecord, WebhookError> {
        self.inner.upsert_subscription(upsert).await
    }
}

pub fn webhook_config(failure_policy: FailurePolicy) -> WebhookConfig {
    WebhookConfig {
        webhook_secret: WEBHOOK_SECRET.to_string(),
        signature_tolerance_secs: 300,
        monthly_price_id: MONTHLY_PRICE.to_string(),
        yearly_price_id: YEARLY_PRICE.to_string(),
        failure_policy,
    }
}

pub struct Harness {
    pub billing: Arc<FakeBilling>,
    pub directory: Arc<MemoryDirectory>,
    pub processor: WebhookProcessor,
}

impl Harness {
    pub fn new(billing: FakeBilling, directory: MemoryDirectory) -> Self {
        let billing = Arc::new(billing);
        let directory = Arc::new(directory);
        let processor = WebhookProcessor::new(
            &webhook_config(FailurePolicy::default()),
            billing.clone(),
            directory.clone(),
        );
        Self {
            billing,
            directory,
            processor,
        }
    }

    /// Signs `payload` as the provider would at `now`.
    pub fn sign(&self, payload: &[u8], now: DateTime<Utc>) -> String {
        self.processor
            .verifier()
            .signature_header(now.timestamp(), payload)
            .unwrap()
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 15, 0, 0).unwrap()
}

pub fn user(id: &str, email: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        email: email.to_string(),
        customer_id: None,
        plan: PlanTag::Free,
    }
}

pub fn directory_with(users: impl IntoIterator<Item = UserRecord>) -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    for user in users {
        directory.insert_user(user);
    }
    directory
}

pub fn event_body(event_id: &str, event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "object": "event",
        "type": event_type,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn checkout_completed(event_id: &str, session_id: &str) -> Vec<u8> {
    event_body(
        event_id,
        "checkout.session.completed",
        json!({ "id": session_id, "object": "checkout.session" }),
    )
}

pub fn subscription_deleted(event_id: &str, subscription_id: &str) -> Vec<u8> {
    event_body(
        event_id,
        "customer.subscription.deleted",
        json!({ "id": subscription_id, "object": "subscription" }),
    )
}

pub fn recurring(price_id: &str) -> Value {
    json!({ "object": "item", "price": { "id": price_id, "type": "recurring" } })
}

pub fn one_time(price_id: &str) -> Value {
    json!({ "object": "item", "price": { "id": price_id, "type": "one_time" } })
}

pub fn session(session_id: &str, customer: Option<&str>, email: Option<&str>, items: Vec<Value>) -> Value {
    json!({
        "id": session_id,
        "object": "checkout.session",
        "customer": customer,
        "customer_details": { "email": email },
        "line_items": { "object": "list", "data": items }
    })
}
