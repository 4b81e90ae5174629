//! User and subscription storage contracts used by the event handlers.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::WebhookError,
    plans::{BillingPeriod, PlanTag},
};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default = "default_plan")]
    pub plan: PlanTag,
}

fn default_plan() -> PlanTag {
    PlanTag::Free
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionRecord {
    pub user_id: String,
    pub plan: PlanTag,
    pub period: BillingPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Full replacement for the subscription keyed by `user_id`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionUpsert {
    pub user_id: String,
    pub plan: PlanTag,
    pub period: BillingPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindOutcome {
    Bound,
    AlreadyBound,
}

/// Read/write contract the directory backend must satisfy.
///
/// `upsert_subscription` must be keyed uniquely by user id and
/// `bind_customer_id_if_absent` must be a conditional write; concurrent
/// deliveries for the same user rely on both.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, WebhookError>;

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserRecord>, WebhookError>;

    async fn bind_customer_id_if_absent(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<BindOutcome, WebhookError>;

    async fn set_plan(&self, user_id: &str, plan: PlanTag) -> Result<(), WebhookError>;

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> Result<SubscriptionRecord, WebhookError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, UserRecord>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    writes: u64,
}

/// In-process directory for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<MemoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads users from a JSON array of `{ "id", "email", "customerId"?, "plan"? }`.
    pub fn from_seed_json(raw: &str) -> anyhow::Result<Self> {
        let users: Vec<UserRecord> =
            serde_json::from_str(raw).context("failed to decode directory seed")?;
        let directory = Self::new();
        for user in users {
            directory.insert_user(user);
        }
        Ok(directory)
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.state.lock().users.insert(user.id.clone(), user);
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.state.lock().users.get(user_id).cloned()
    }

    pub fn subscription(&self, user_id: &str) -> Option<SubscriptionRecord> {
        self.state.lock().subscriptions.get(user_id).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of mutating calls that changed stored state.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, WebhookError> {
        let state = self.state.lock();
        let user = state.users.values().find(|user| user.email == email).cloned();
        Ok(user)
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserRecord>, WebhookError> {
        let state = self.state.lock();
        let user = state
            .users
            .values()
            .find(|user| user.customer_id.as_deref() == Some(customer_id))
            .cloned();
        Ok(user)
    }

    async fn bind_customer_id_if_absent(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<BindOutcome, WebhookError> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| WebhookError::UserNotFound(user_id.to_string()))?;
        if user.customer_id.is_some() {
            return Ok(BindOutcome::AlreadyBound);
        }
        user.customer_id = Some(customer_id.to_string());
        state.writes += 1;
        Ok(BindOutcome::Bound)
    }

    async fn set_plan(&self, user_id: &str, plan: PlanTag) -> Result<(), WebhookError> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| WebhookError::UserNotFound(user_id.to_string()))?;
        user.plan = plan;
        state.writes += 1;
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        upsert: SubscriptionUpsert,
    ) -> Result<SubscriptionRecord, WebhookError> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&upsert.user_id) {
            return Err(WebhookError::UserNotFound(upsert.user_id));
        }
        let record = SubscriptionRecord {
            user_id: upsert.user_id.clone(),
            plan: upsert.plan,
            period: upsert.period,
            start_date: upsert.start_date,
            end_date: upsert.end_date,
        };
        state.subscriptions.insert(upsert.user_id, record.clone());
        state.writes += 1;
        Ok(record)
    }
}
