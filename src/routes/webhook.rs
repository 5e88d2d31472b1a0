// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook route for Stripe subscription events.

use crate::error::AppError;
use crate::models::{Subscription, SubscriptionStatus, WebhookEventRecord};
use crate::services::stripe::{
    verify_signature, StripeEvent, WebhookAction, SIGNATURE_TOLERANCE_SECS, TRIAL_PERIOD_DAYS,
};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/stripe", post(handle_event))
}

/// Handle incoming webhook events (POST).
///
/// 400 for anything unsigned or unparseable, 500 when storage fails so the
/// processor retries, 200 otherwise.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("Security Alert: Webhook without signature header");
        return StatusCode::BAD_REQUEST;
    };

    let now = Utc::now();
    if let Err(e) = verify_signature(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        now.timestamp(),
        SIGNATURE_TOLERANCE_SECS,
    ) {
        tracing::warn!(error = %e, "Security Alert: Webhook signature verification failed");
        return StatusCode::BAD_REQUEST;
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    let action = match event.action() {
        Ok(action) => action,
        Err(e) => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Failed to parse webhook event object"
            );
            return StatusCode::BAD_REQUEST;
        }
    };

    if action == WebhookAction::Ignore {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Unhandled webhook event type"
        );
        return StatusCode::OK;
    }

    match process_event(&state, &event, action, now).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Error handling webhook"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Apply an event once. The idempotency record is written last, so a
/// failure anywhere leaves the event to be retried in full.
async fn process_event(
    state: &AppState,
    event: &StripeEvent,
    action: WebhookAction,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if state.db.is_webhook_event_processed(&event.id).await? {
        tracing::info!(event_id = %event.id, "Duplicate webhook event, skipping");
        return Ok(());
    }

    apply_action(state, action, now).await?;

    state
        .db
        .record_webhook_event(&WebhookEventRecord {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            processed_at: format_utc_rfc3339(now),
        })
        .await
}

async fn apply_action(
    state: &AppState,
    action: WebhookAction,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let now_str = format_utc_rfc3339(now);

    match action {
        WebhookAction::ActivateSubscription {
            user_id,
            customer_id,
            subscription_id,
        } => {
            let created_at = state
                .db
                .get_subscription(&user_id)
                .await?
                .map(|s| s.created_at)
                .unwrap_or_else(|| now_str.clone());

            let trial_end = now + chrono::Duration::days(TRIAL_PERIOD_DAYS);
            let subscription = Subscription {
                user_id,
                stripe_customer_id: customer_id,
                stripe_subscription_id: subscription_id,
                status: SubscriptionStatus::Active,
                current_period_end: Some(format_utc_rfc3339(trial_end)),
                created_at,
                updated_at: now_str,
            };
            state.db.upsert_subscription(&subscription).await?;

            tracing::info!(user_id = %subscription.user_id, "Subscription activated");
        }
        WebhookAction::SyncSubscription {
            subscription_id,
            status,
            current_period_end,
        } => {
            let Some(mut subscription) = state
                .db
                .find_subscription_by_stripe_id(&subscription_id)
                .await?
            else {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    "No stored subscription for processor subscription"
                );
                return Ok(());
            };

            subscription.status = SubscriptionStatus::from_processor(&status);
            subscription.current_period_end = current_period_end
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(format_utc_rfc3339);
            subscription.updated_at = now_str;
            state.db.upsert_subscription(&subscription).await?;

            tracing::info!(
                user_id = %subscription.user_id,
                subscription_id = %subscription_id,
                processor_status = %status,
                "Subscription synced"
            );
        }
        WebhookAction::Ignore => {}
    }

    Ok(())
}
