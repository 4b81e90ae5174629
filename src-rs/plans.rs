use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::WebhookConfig, error::WebhookError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTag {
    Free,
    Premium,
}

impl PlanTag {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanTag::Free => "free",
            PlanTag::Premium => "premium",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    pub fn months(self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Yearly => 12,
        }
    }

    /// End of an entitlement that starts at `start`.
    ///
    /// Calendar months are added with the day clamped to the last day of the
    /// target month, so Jan 31 + 1 month is Feb 28/29.
    pub fn end_date(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start.checked_add_months(Months::new(self.months()))
    }
}

/// The two configured recurring prices.
#[derive(Clone, Debug)]
pub struct PriceMap {
    monthly_price_id: String,
    yearly_price_id: String,
}

impl PriceMap {
    pub fn new(monthly_price_id: impl Into<String>, yearly_price_id: impl Into<String>) -> Self {
        Self {
            monthly_price_id: monthly_price_id.into(),
            yearly_price_id: yearly_price_id.into(),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(
            config.monthly_price_id.clone(),
            config.yearly_price_id.clone(),
        )
    }

    pub fn period_for_price_id(&self, price_id: &str) -> Option<BillingPeriod> {
        let price_id = price_id.trim();
        if price_id.is_empty() {
            None
        } else if price_id == self.yearly_price_id {
            Some(BillingPeriod::Yearly)
        } else if price_id == self.monthly_price_id {
            Some(BillingPeriod::Monthly)
        } else {
            None
        }
    }

    /// Billing period for `price_id` and the entitlement end counted from `now`.
    pub fn period_and_end_date(
        &self,
        price_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(BillingPeriod, DateTime<Utc>), WebhookError> {
        let period = self
            .period_for_price_id(price_id)
            .ok_or_else(|| WebhookError::InvalidPrice(price_id.to_string()))?;
        let end_date = period.end_date(now).ok_or_else(|| {
            WebhookError::InvalidPrice(format!("{price_id}: end date out of range"))
        })?;
        Ok((period, end_date))
    }
}
