//! `checkout.session.completed`: turns a paid checkout into a premium
//! subscription for the directory user with the same email.

use chrono::{DateTime, Utc};

use crate::{
    directory::{BindOutcome, Directory, SubscriptionUpsert},
    error::WebhookError,
    plans::{PlanTag, PriceMap},
    stripe_api::{BillingProvider, LineItem},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckoutOutcome {
    /// The session carried no customer email, so there is nobody to entitle.
    NoCustomerEmail,
    Reconciled {
        user_id: String,
        customer_binding: Option<BindOutcome>,
        subscriptions_upserted: usize,
        one_time_items: usize,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum LineItemAction {
    Subscribe(SubscriptionUpsert),
    /// One-time purchases are not fulfilled here.
    OneTimePurchase { price_id: Option<String> },
}

fn plan_line_item(
    item: &LineItem,
    user_id: &str,
    prices: &PriceMap,
    now: DateTime<Utc>,
) -> Result<LineItemAction, WebhookError> {
    if !item.is_recurring() {
        return Ok(LineItemAction::OneTimePurchase {
            price_id: item.price_id().map(str::to_string),
        });
    }

    let price_id = item.price_id().unwrap_or_default();
    let (period, end_date) = prices.period_and_end_date(price_id, now)?;
    Ok(LineItemAction::Subscribe(SubscriptionUpsert {
        user_id: user_id.to_string(),
        plan: PlanTag::Premium,
        period,
        start_date: now,
        end_date,
    }))
}

/// Applies a completed checkout session.
///
/// Every line item is priced before the first directory write, so an unknown
/// price leaves the user untouched. Replays overwrite the subscription with a
/// window computed from `now`; a later retry therefore ends later.
pub async fn reconcile_checkout_session(
    billing: &dyn BillingProvider,
    directory: &dyn Directory,
    prices: &PriceMap,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<CheckoutOutcome, WebhookError> {
    let session = billing.retrieve_checkout_session(session_id).await?;

    let email = match session.customer_email() {
        Some(email) => email,
        None => {
            tracing::info!(session_id = %session.id, "checkout session has no customer email; skipping");
            return Ok(CheckoutOutcome::NoCustomerEmail);
        }
    };

    let user = directory
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| WebhookError::UserNotFound(format!("email {email}")))?;

    let actions = session
        .line_items()
        .iter()
        .map(|item| plan_line_item(item, &user.id, prices, now))
        .collect::<Result<Vec<_>, _>>()?;

    let customer_binding = match session.customer.as_ref().map(|customer| customer.id()) {
        Some(customer_id) if user.customer_id.is_none() => {
            let outcome = directory
                .bind_customer_id_if_absent(&user.id, customer_id)
                .await?;
            if outcome == BindOutcome::AlreadyBound {
                tracing::warn!(
                    user_id = %user.id,
                    customer_id = %customer_id,
                    "customer id was bound concurrently; keeping existing binding"
                );
            }
            Some(outcome)
        }
        Some(customer_id) => {
            if user.customer_id.as_deref() != Some(customer_id) {
                tracing::warn!(
                    user_id = %user.id,
                    customer_id = %customer_id,
                    bound_customer_id = ?user.customer_id,
                    "checkout customer differs from bound customer id; binding unchanged"
                );
            }
            Some(BindOutcome::AlreadyBound)
        }
        None => None,
    };

    let mut subscriptions_upserted = 0;
    let mut one_time_items = 0;

    for action in actions {
        match action {
            LineItemAction::Subscribe(upsert) => {
                let stored = directory.upsert_subscription(upsert).await?;
                directory.set_plan(&user.id, PlanTag::Premium).await?;
                subscriptions_upserted += 1;
                tracing::info!(
                    user_id = %user.id,
                    period = stored.period.as_str(),
                    end_date = %stored.end_date,
                    "subscription upserted"
                );
            }
            LineItemAction::OneTimePurchase { price_id } => {
                one_time_items += 1;
                tracing::info!(
                    user_id = %user.id,
                    price_id = ?price_id,
                    "one-time line item not fulfilled by webhook"
                );
            }
        }
    }

    Ok(CheckoutOutcome::Reconciled {
        user_id: user.id,
        customer_binding,
        subscriptions_upserted,
        one_time_items,
    })
}
