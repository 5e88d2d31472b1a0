// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Premium subscription status and checkout.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Subscription;
use crate::services::stripe::CheckoutSession;
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Billing routes (require authentication via JWT).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/subscription", get(get_subscription))
        .route("/api/checkout", post(create_checkout))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SubscriptionResponse {
    pub subscription: Option<Subscription>,
    pub is_premium: bool,
    pub is_trial_active: bool,
}

impl SubscriptionResponse {
    fn new(subscription: Option<Subscription>, now: chrono::DateTime<chrono::Utc>) -> Self {
        let is_premium = subscription.as_ref().is_some_and(Subscription::is_premium);
        let is_trial_active = subscription
            .as_ref()
            .is_some_and(|s| s.is_trial_active(now));
        Self {
            subscription,
            is_premium,
            is_trial_active,
        }
    }
}

/// Current user's subscription.
async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SubscriptionResponse>> {
    let subscription = state.db.get_subscription(&user.user_id).await?;
    Ok(Json(SubscriptionResponse::new(
        subscription,
        chrono::Utc::now(),
    )))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CheckoutResponse {
    /// Hosted checkout page to redirect to
    pub url: String,
}

/// Start a premium checkout for the current user.
async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CheckoutResponse>> {
    let session = state
        .stripe
        .create_checkout_session(&user.user_id, user.email.as_deref(), &state.config.app_url)
        .await?;

    Ok(Json(CheckoutResponse {
        url: checkout_url(session)?,
    }))
}

/// Hosted page URL of a freshly created session.
fn checkout_url(session: CheckoutSession) -> Result<String> {
    session.url.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Checkout session {} has no URL",
            session.id
        ))
    })
}
