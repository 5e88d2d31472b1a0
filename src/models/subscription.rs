// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Premium subscription records, synced from payment webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
}

impl SubscriptionStatus {
    /// Map a Stripe subscription status onto ours.
    pub fn from_processor(status: &str) -> Self {
        match status {
            "active" | "trialing" => SubscriptionStatus::Active,
            "canceled" | "cancelled" | "incomplete_expired" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

/// Stored subscription, keyed by user ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Subscription {
    pub user_id: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    /// End of the paid (or trial) period, RFC3339
    pub current_period_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Subscription {
    pub fn is_premium(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Active and the current period hasn't ended yet.
    pub fn is_trial_active(&self, now: DateTime<Utc>) -> bool {
        self.is_premium()
            && self
                .current_period_end
                .as_deref()
                .and_then(|end| DateTime::parse_from_rfc3339(end).ok())
                .is_some_and(|end| end.with_timezone(&Utc) > now)
    }
}

/// Idempotency record for a processed webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    /// Processor event ID (also used as document ID)
    pub event_id: String,
    pub event_type: String,
    pub processed_at: String,
}
