use crate::{
    directory::Directory, error::WebhookError, plans::PlanTag, stripe_api::BillingProvider,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DowngradeOutcome {
    pub user_id: String,
    pub customer_id: String,
}

/// `customer.subscription.deleted`: reverts the bound user to the free plan.
///
/// The subscription row is left in place; the plan tag decides entitlement.
pub async fn downgrade_cancelled_subscription(
    billing: &dyn BillingProvider,
    directory: &dyn Directory,
    subscription_id: &str,
) -> Result<DowngradeOutcome, WebhookError> {
    let subscription = billing.retrieve_subscription(subscription_id).await?;
    let customer_id = subscription.customer.id();

    let user = match directory.find_user_by_customer_id(customer_id).await? {
        Some(user) => user,
        None => {
            tracing::error!(
                subscription_id = %subscription.id,
                customer_id = %customer_id,
                "no user bound to customer for deleted subscription"
            );
            return Err(WebhookError::UserNotFound(format!("customer {customer_id}")));
        }
    };

    directory.set_plan(&user.id, PlanTag::Free).await?;
    tracing::info!(user_id = %user.id, customer_id = %customer_id, "plan downgraded to free");

    Ok(DowngradeOutcome {
        user_id: user.id,
        customer_id: customer_id.to_string(),
    })
}
