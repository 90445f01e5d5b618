use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Feature flags of a plan, stored as JSON on the plan row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    /// Yearly cap on library additions; `None` means unlimited
    #[serde(default)]
    pub max_books_per_year: Option<i64>,
    #[serde(default)]
    pub collections: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub stripe_price_id: Option<String>,
    pub features: Json<PlanFeatures>,
}

/// Mirror of Stripe's subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Statuses that grant premium access
    pub fn grants_premium(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub stripe_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription state reported by Stripe, keyed by the Stripe subscription id
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub user_id: Uuid,
    pub plan_id: String,
    pub stripe_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// Rolling 12-month window used to count library additions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsagePeriod {
    /// The period containing `now`, anchored on the yearly anniversary of `anchor`.
    ///
    /// Periods are `[anchor + k years, anchor + (k + 1) years)`. Each bound is
    /// computed from the anchor directly, so a Feb 29 anchor clamps to Feb 28
    /// in common years without drifting.
    pub fn containing(anchor: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut years = now.year() - anchor.year();
        while shift_years(anchor, years) > now {
            years -= 1;
        }
        while shift_years(anchor, years + 1) <= now {
            years += 1;
        }

        Self {
            start: shift_years(anchor, years),
            end: shift_years(anchor, years + 1),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn shift_years(anchor: DateTime<Utc>, years: i32) -> DateTime<Utc> {
    let months = Months::new(years.unsigned_abs() * 12);
    let shifted = if years >= 0 {
        anchor.checked_add_months(months)
    } else {
        anchor.checked_sub_months(months)
    };
    shifted.unwrap_or(anchor)
}

/// Library additions counted in one usage period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUsage {
    pub user_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub books_added: i32,
}

impl SubscriptionUsage {
    pub fn empty(user_id: Uuid, period: UsagePeriod) -> Self {
        Self {
            user_id,
            period_start: period.start,
            period_end: period.end,
            books_added: 0,
        }
    }

    /// Whether one more addition fits under `limit` (`None` = unlimited)
    pub fn allows_addition(&self, limit: Option<i64>) -> bool {
        limit.map_or(true, |max| i64::from(self.books_added) < max)
    }

    pub fn remaining(&self, limit: Option<i64>) -> Option<i64> {
        limit.map(|max| (max - i64::from(self.books_added)).max(0))
    }
}
