// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod join;
pub mod ride;
pub mod search;
pub mod subscription;

pub use join::{JoinError, JoinStatus, RideJoin};
pub use ride::{Ride, RideRequest, RideStatus, TransportType};
pub use search::{RideSearch, SearchParams};
pub use subscription::{Subscription, SubscriptionStatus, WebhookEventRecord};
