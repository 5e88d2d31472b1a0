// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe client for premium subscriptions.
//!
//! Handles:
//! - Checkout session creation (form-encoded REST call)
//! - Webhook signature verification (`Stripe-Signature` header)
//! - Event parsing into the actions we apply to subscriptions

use crate::error::AppError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Accepted age of a webhook signature timestamp, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Free trial granted with a new subscription.
pub const TRIAL_PERIOD_DAYS: i64 = 60;

const PRODUCT_NAME: &str = "Travel-with.de Premium";
const PRODUCT_DESCRIPTION: &str = "Access to all premium features";
/// Monthly price in euro cents.
const UNIT_AMOUNT_CENTS: u32 = 999;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

/// Checkout session returned by Stripe.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

impl StripeClient {
    /// Create a new client against `base_url` (normally `https://api.stripe.com`).
    pub fn new(base_url: String, secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    /// Start a subscription checkout for a user.
    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        user_email: Option<&str>,
        app_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let params = checkout_params(user_id, user_email, app_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Payment(format!("Checkout request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Payment(format!("HTTP {}: {}", status, body)));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| AppError::Payment(format!("JSON parse error: {}", e)))?;

        tracing::info!(user_id, session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}

/// Form parameters for a premium checkout session.
fn checkout_params(
    user_id: &str,
    user_email: Option<&str>,
    app_url: &str,
) -> Vec<(&'static str, String)> {
    let app_url = app_url.trim_end_matches('/');
    let mut params = vec![
        ("mode", "subscription".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", "eur".to_string()),
        (
            "line_items[0][price_data][unit_amount]",
            UNIT_AMOUNT_CENTS.to_string(),
        ),
        (
            "line_items[0][price_data][recurring][interval]",
            "month".to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            PRODUCT_NAME.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][description]",
            PRODUCT_DESCRIPTION.to_string(),
        ),
        (
            "subscription_data[trial_period_days]",
            TRIAL_PERIOD_DAYS.to_string(),
        ),
        (
            "success_url",
            format!("{}/dashboard?session_id={{CHECKOUT_SESSION_ID}}", app_url),
        ),
        ("cancel_url", format!("{}/pricing", app_url)),
        ("metadata[userId]", user_id.to_string()),
    ];
    if let Some(email) = user_email {
        params.push(("customer_email", email.to_string()));
    }
    params
}

// ─── Webhook Signatures ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature timestamp outside tolerance")]
    Expired,
    #[error("No matching signature")]
    Mismatch,
}

/// Compute the hex `v1` signature for a payload signed at `timestamp`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`).
///
/// Any one matching `v1` entry is enough; other schemes are ignored.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let expected =
        compute_signature(secret, timestamp, payload).ok_or(SignatureError::Mismatch)?;
    let matched = signatures
        .iter()
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ─── Webhook Events ──────────────────────────────────────────

/// Webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    #[serde(default)]
    current_period_end: Option<i64>,
}

/// What a webhook event asks us to do.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    /// Checkout finished; start the user's subscription.
    ActivateSubscription {
        user_id: String,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    },
    /// Subscription changed at the processor; mirror its status.
    SyncSubscription {
        subscription_id: String,
        status: String,
        /// Unix seconds
        current_period_end: Option<i64>,
    },
    /// Nothing to apply.
    Ignore,
}

impl StripeEvent {
    /// Decode the event object for the types we handle.
    pub fn action(&self) -> Result<WebhookAction, serde_json::Error> {
        match self.event_type.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSessionObject =
                    serde_json::from_value(self.data.object.clone())?;
                let user_id = session.metadata.as_ref().and_then(|m| m.get("userId"));
                Ok(match user_id {
                    Some(user_id) if !user_id.is_empty() => WebhookAction::ActivateSubscription {
                        user_id: user_id.clone(),
                        customer_id: session.customer,
                        subscription_id: session.subscription,
                    },
                    _ => WebhookAction::Ignore,
                })
            }
            "customer.subscription.updated" | "customer.subscription.deleted" => {
                let sub: SubscriptionObject = serde_json::from_value(self.data.object.clone())?;
                Ok(WebhookAction::SyncSubscription {
                    subscription_id: sub.id,
                    status: sub.status,
                    current_period_end: sub.current_period_end,
                })
            }
            _ => Ok(WebhookAction::Ignore),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_760_000_000;

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        format!(
            "t={},v1={}",
            timestamp,
            compute_signature(SECRET, timestamp, payload).unwrap()
        )
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = header_for(payload, NOW);
        assert_eq!(
            verify_signature(payload, &header, SECRET, NOW, SIGNATURE_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let payload = br#"{"id":"evt_1"}"#;
        let good = compute_signature(SECRET, NOW, payload).unwrap();
        let header = format!("t={},v1=deadbeef,v0=abc,v1={}", NOW, good);
        assert_eq!(
            verify_signature(payload, &header, SECRET, NOW, SIGNATURE_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = header_for(br#"{"id":"evt_1"}"#, NOW);
        assert_eq!(
            verify_signature(
                br#"{"id":"evt_2"}"#,
                &header,
                SECRET,
                NOW,
                SIGNATURE_TOLERANCE_SECS
            ),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = header_for(payload, NOW);
        let secret = "whsec_other";
        assert_eq!(
            verify_signature(payload, &header, secret, NOW, SIGNATURE_TOLERANCE_SECS),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = header_for(payload, NOW - SIGNATURE_TOLERANCE_SECS - 1);
        assert_eq!(
            verify_signature(payload, &header, SECRET, NOW, SIGNATURE_TOLERANCE_SECS),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_expired() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", t);
            assert_eq!(
                verify_signature(b"{}", &header, SECRET, NOW, SIGNATURE_TOLERANCE_SECS),
                Err(SignatureError::Expired),
                "t = {}",
                t
            );
        }
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "garbage", "t=abc,v1=00", "v1=00", "t=1760000000"] {
            assert_eq!(
                verify_signature(b"{}", header, SECRET, NOW, SIGNATURE_TOLERANCE_SECS),
                Err(SignatureError::Malformed),
                "header {:?}",
                header
            );
        }
    }

    #[test]
    fn test_checkout_completed_action() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "userId": "user_1" }
            }}
        }))
        .unwrap();

        assert_eq!(
            event.action().unwrap(),
            WebhookAction::ActivateSubscription {
                user_id: "user_1".to_string(),
                customer_id: Some("cus_1".to_string()),
                subscription_id: Some("sub_1".to_string()),
            }
        );
    }

    #[test]
    fn test_checkout_without_user_is_ignored() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": { "customer": "cus_1" } }
        }))
        .unwrap();

        assert_eq!(event.action().unwrap(), WebhookAction::Ignore);
    }

    #[test]
    fn test_subscription_deleted_action() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": { "object": {
                "id": "sub_1",
                "status": "canceled",
                "current_period_end": 1760000000
            }}
        }))
        .unwrap();

        assert_eq!(
            event.action().unwrap(),
            WebhookAction::SyncSubscription {
                subscription_id: "sub_1".to_string(),
                status: "canceled".to_string(),
                current_period_end: Some(1_760_000_000),
            }
        );
    }

    #[test]
    fn test_checkout_params() {
        let params = checkout_params("user_1", Some("a@example.com"), "https://travel-with.de/");
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("subscription"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("999"));
        assert_eq!(get("subscription_data[trial_period_days]"), Some("60"));
        assert_eq!(get("metadata[userId]"), Some("user_1"));
        assert_eq!(get("customer_email"), Some("a@example.com"));
        assert_eq!(
            get("success_url"),
            Some("https://travel-with.de/dashboard?session_id={CHECKOUT_SESSION_ID}")
        );
        assert_eq!(get("cancel_url"), Some("https://travel-with.de/pricing"));
    }
}
