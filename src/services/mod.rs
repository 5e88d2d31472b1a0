// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - external integrations.

pub mod stripe;

pub use stripe::{StripeClient, StripeEvent, WebhookAction};
