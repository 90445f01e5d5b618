use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::constants::{FREE_PLAN_ID, PREMIUM_PLAN_ID};
use crate::error::{AppError, Result};
use crate::integrations::CheckoutRequest;
use crate::models::{SubscriptionPlan, UsagePeriod, User, UserSubscription};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub books_added: i32,
    /// `None` means unlimited
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOverview {
    pub plan: SubscriptionPlan,
    pub is_premium: bool,
    pub subscription: Option<UserSubscription>,
    pub usage: UsageSummary,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

/// The plan whose features currently apply to `user`
pub async fn effective_plan(state: &AppState, user: &User) -> Result<SubscriptionPlan> {
    let plan_id = if user.is_premium {
        PREMIUM_PLAN_ID
    } else {
        FREE_PLAN_ID
    };

    state
        .store
        .find_plan(plan_id)
        .await?
        .ok_or(AppError::NotFound("Plan"))
}

/// GET /api/v1/plans
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.store.list_plans().await?))
}

/// Plan, Stripe subscription record and usage for the current period
///
/// GET /api/v1/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<SubscriptionOverview>> {
    let plan = effective_plan(&state, &user).await?;
    let subscription = state.store.find_subscription_for_user(user.id).await?;

    let period = UsagePeriod::containing(user.usage_anchor(), Utc::now());
    let usage = state.store.usage_for_period(user.id, period).await?;
    let limit = plan.features.max_books_per_year;

    Ok(Json(SubscriptionOverview {
        is_premium: user.is_premium,
        subscription,
        usage: UsageSummary {
            books_added: usage.books_added,
            limit,
            remaining: usage.remaining(limit),
            period_start: period.start,
            period_end: period.end,
        },
        plan,
    }))
}

/// Start a Stripe Checkout session for Premium
///
/// POST /api/v1/subscription/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<RedirectResponse>> {
    if user.is_premium {
        return Err(AppError::Conflict(
            "Already subscribed to Premium".to_string(),
        ));
    }

    let app_url = state.config.app_url.trim_end_matches('/');
    let url = state
        .billing
        .create_checkout_session(CheckoutRequest {
            user_id: user.id,
            customer_id: user.stripe_customer_id.clone(),
            email: user.email.clone(),
            price_id: state.config.stripe_premium_price_id.clone(),
            success_url: format!("{app_url}/settings/billing?checkout=success"),
            cancel_url: format!("{app_url}/pricing?checkout=canceled"),
        })
        .await?;

    tracing::info!("Created checkout session for user {}", user.id);
    Ok(Json(RedirectResponse { url }))
}

/// Open the Stripe billing portal
///
/// POST /api/v1/subscription/portal
pub async fn create_portal(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<RedirectResponse>> {
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("No billing account found".to_string()))?;

    let return_url = format!(
        "{}/settings/billing",
        state.config.app_url.trim_end_matches('/')
    );
    let url = state
        .billing
        .create_portal_session(customer_id, &return_url)
        .await?;

    Ok(Json(RedirectResponse { url }))
}
