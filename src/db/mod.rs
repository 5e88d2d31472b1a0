// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    pub const RIDES: &str = "rides";
    pub const RIDE_JOINS: &str = "ride_joins";
    /// Keyed by user ID
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    /// Processed payment webhook events (keyed by event ID)
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
}
