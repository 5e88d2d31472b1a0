// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dashboard: a user's own rides, requests waiting on them, and their joins.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{Ride, RideJoin};
use crate::AppState;
use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Dashboard routes (require authentication via JWT).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/dashboard", get(get_dashboard))
}

/// A join with the ride it belongs to.
///
/// `ride` is `None` if the ride was deleted after the join was read.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct JoinWithRide {
    #[serde(flatten)]
    pub join: RideJoin,
    pub ride: Option<Ride>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DashboardResponse {
    /// Rides I offer, soonest first
    pub my_rides: Vec<Ride>,
    /// Pending requests on my rides, newest first
    pub pending_requests: Vec<JoinWithRide>,
    /// Rides I asked to join, newest first
    pub my_joins: Vec<JoinWithRide>,
}

fn attach_rides(joins: Vec<RideJoin>, rides: &HashMap<String, Ride>) -> Vec<JoinWithRide> {
    joins
        .into_iter()
        .map(|join| {
            let ride = rides.get(&join.ride_id).cloned();
            JoinWithRide { join, ride }
        })
        .collect()
}

/// Everything the dashboard page shows, in one call.
async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DashboardResponse>> {
    let (my_rides, pending, my_joins) = tokio::try_join!(
        state.db.rides_for_owner(&user.user_id),
        state.db.pending_joins_for_owner(&user.user_id),
        state.db.joins_for_user(&user.user_id),
    )?;

    // Pending requests all point at my own rides, which we already have.
    let owned: HashMap<String, Ride> = my_rides
        .iter()
        .map(|ride| (ride.id.clone(), ride.clone()))
        .collect();

    let mut joined_ids: Vec<String> = my_joins.iter().map(|j| j.ride_id.clone()).collect();
    joined_ids.sort_unstable();
    joined_ids.dedup();
    let joined_rides = state.db.get_rides(&joined_ids).await?;

    tracing::debug!(
        user_id = %user.user_id,
        rides = my_rides.len(),
        pending = pending.len(),
        joins = my_joins.len(),
        "Dashboard loaded"
    );

    Ok(Json(DashboardResponse {
        pending_requests: attach_rides(pending, &owned),
        my_joins: attach_rides(my_joins, &joined_rides),
        my_rides,
    }))
}
