use axum::{
    extract::{rejection::StringRejection, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{PREMIUM_PLAN_ID, STRIPE_SIGNATURE_TOLERANCE_SECS};
use crate::error::{AppError, Result};
use crate::integrations::email::{
    payment_failed_email, send_in_background, subscription_canceled_email,
};
use crate::integrations::stripe::{
    CheckoutSessionObject, InvoiceObject, StripeEvent, SubscriptionObject,
};
use crate::models::{SubscriptionStatus, SubscriptionUpsert, User};
use crate::security::verify_stripe_signature;
use crate::AppState;

fn decode_object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::warn!("Malformed {} payload in {}: {}", event.event_type, event.id, e);
        AppError::InvalidInput(format!("Malformed {} payload", event.event_type))
    })
}

/// Stripe webhook receiver
///
/// Verifies the `Stripe-Signature` header against the raw body, then
/// dispatches on event type. Unknown events are acknowledged so Stripe
/// stops retrying them.
///
/// POST /api/webhooks/stripe
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<String, StringRejection>,
) -> Result<Json<Value>> {
    let body = body?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    if !verify_stripe_signature(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        STRIPE_SIGNATURE_TOLERANCE_SECS,
    ) {
        return Err(AppError::InvalidSignature);
    }

    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid event payload: {e}")))?;

    tracing::info!("Stripe event {} ({})", event.event_type, event.id);

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            checkout_completed(&state, decode_object(&event)?).await?;
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            subscription_changed(&state, decode_object(&event)?).await?;
        }
        "customer.subscription.deleted" => {
            subscription_deleted(&state, decode_object(&event)?).await?;
        }
        "invoice.payment_failed" => {
            payment_failed(&state, decode_object(&event)?).await?;
        }
        other => {
            tracing::debug!("Ignoring Stripe event type {}", other);
        }
    }

    Ok(Json(json!({ "received": true })))
}

async fn user_for_customer(state: &AppState, customer_id: &str) -> Result<Option<User>> {
    let user = state.store.find_user_by_stripe_customer(customer_id).await?;
    if user.is_none() {
        tracing::warn!("No user linked to Stripe customer {}", customer_id);
    }
    Ok(user)
}

/// The user a subscription belongs to: by linked customer, else by the
/// `user_id` metadata set at checkout. Subscription events may precede
/// `checkout.session.completed`; the metadata path links the customer.
async fn user_for_subscription(
    state: &AppState,
    subscription: &SubscriptionObject,
) -> Result<Option<User>> {
    if let Some(user) = state
        .store
        .find_user_by_stripe_customer(&subscription.customer)
        .await?
    {
        return Ok(Some(user));
    }

    let by_metadata = match subscription
        .metadata
        .get("user_id")
        .and_then(|id| Uuid::parse_str(id).ok())
    {
        Some(user_id) => state.store.find_user(user_id).await?,
        None => None,
    };

    let Some(mut user) = by_metadata else {
        tracing::warn!(
            "No user for Stripe customer {} (subscription {})",
            subscription.customer,
            subscription.id
        );
        return Ok(None);
    };

    state
        .store
        .link_stripe_customer(user.id, &subscription.customer)
        .await?;
    user.stripe_customer_id = Some(subscription.customer.clone());
    tracing::info!(
        "Linked Stripe customer {} to user {} from subscription metadata",
        subscription.customer,
        user.id
    );
    Ok(Some(user))
}

async fn checkout_completed(state: &AppState, session: CheckoutSessionObject) -> Result<()> {
    let by_reference = match session
        .client_reference_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
    {
        Some(user_id) => state.store.find_user(user_id).await?,
        None => None,
    };

    let user = match (by_reference, session.customer.as_deref()) {
        (Some(user), _) => user,
        (None, Some(customer)) => match user_for_customer(state, customer).await? {
            Some(user) => user,
            None => return Ok(()),
        },
        (None, None) => {
            tracing::warn!("Checkout session {} has no user reference", session.id);
            return Ok(());
        }
    };

    if let Some(customer) = &session.customer {
        if user.stripe_customer_id.as_ref() != Some(customer) {
            state.store.link_stripe_customer(user.id, customer).await?;
        }
    }

    state.store.set_premium(user.id, true, Utc::now()).await?;

    if let Some(subscription_id) = session.subscription {
        state
            .store
            .upsert_subscription(SubscriptionUpsert {
                user_id: user.id,
                plan_id: PREMIUM_PLAN_ID.to_string(),
                stripe_subscription_id: subscription_id,
                status: SubscriptionStatus::Active,
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
            })
            .await?;
    }

    tracing::info!("User {} upgraded to Premium", user.id);
    Ok(())
}

async fn subscription_changed(state: &AppState, subscription: SubscriptionObject) -> Result<()> {
    let Some(user) = user_for_subscription(state, &subscription).await? else {
        return Ok(());
    };

    state
        .store
        .upsert_subscription(SubscriptionUpsert {
            user_id: user.id,
            plan_id: PREMIUM_PLAN_ID.to_string(),
            stripe_subscription_id: subscription.id.clone(),
            status: subscription.status,
            current_period_start: subscription.period_start(),
            current_period_end: subscription.period_end(),
            cancel_at_period_end: subscription.cancel_at_period_end,
        })
        .await?;

    let premium = subscription.status.grants_premium();
    if premium != user.is_premium {
        state.store.set_premium(user.id, premium, Utc::now()).await?;
        tracing::info!(
            "User {} premium set to {} (subscription {:?})",
            user.id,
            premium,
            subscription.status
        );
    }

    Ok(())
}

async fn subscription_deleted(state: &AppState, subscription: SubscriptionObject) -> Result<()> {
    let Some(user) = user_for_subscription(state, &subscription).await? else {
        return Ok(());
    };

    state
        .store
        .upsert_subscription(SubscriptionUpsert {
            user_id: user.id,
            plan_id: PREMIUM_PLAN_ID.to_string(),
            stripe_subscription_id: subscription.id.clone(),
            status: SubscriptionStatus::Canceled,
            current_period_start: subscription.period_start(),
            current_period_end: subscription.period_end(),
            cancel_at_period_end: false,
        })
        .await?;

    let updated = state.store.set_premium(user.id, false, Utc::now()).await?;
    tracing::info!("User {} subscription {} ended", user.id, subscription.id);

    send_in_background(
        state.mailer.clone(),
        subscription_canceled_email(&updated, &state.config.app_url),
    );
    Ok(())
}

async fn payment_failed(state: &AppState, invoice: InvoiceObject) -> Result<()> {
    let Some(customer) = invoice.customer.as_deref() else {
        tracing::warn!("Invoice {} has no customer", invoice.id);
        return Ok(());
    };
    let Some(mut user) = user_for_customer(state, customer).await? else {
        return Ok(());
    };
    if user.email.is_none() {
        user.email = invoice.customer_email.clone();
    }

    tracing::warn!(
        "Payment failed for user {} (invoice {}, {} {})",
        user.id,
        invoice.id,
        invoice.amount_due,
        invoice.currency.as_deref().unwrap_or("")
    );

    send_in_background(
        state.mailer.clone(),
        payment_failed_email(
            &user,
            &state.config.app_url,
            invoice.hosted_invoice_url.as_deref(),
        ),
    );
    Ok(())
}
