// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride listing routes: search, detail, and owner create/edit/delete.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{JoinStatus, Ride, RideJoin, RideRequest, RideSearch, SearchParams};
use crate::time_utils::{now_rfc3339, today_utc};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Rides shown on the landing page.
const RECENT_RIDES_LIMIT: usize = 6;

/// Routes readable without a session.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rides/search", get(search_rides))
        .route("/api/rides/recent", get(recent_rides))
        .route("/api/rides/{id}", get(get_ride))
}

/// Ride routes that require authentication.
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rides", post(create_ride))
        .route(
            "/api/rides/{id}",
            axum::routing::put(update_ride).delete(delete_ride),
        )
        .route("/api/rides/{id}/participants", get(list_participants))
}

// ─── Search ──────────────────────────────────────────────────

/// List of rides.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RidesResponse {
    pub rides: Vec<Ride>,
}

/// Search bookable rides.
async fn search_rides(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<RidesResponse>> {
    let search = RideSearch::from_params(params, today_utc())?;
    let rides = state.db.search_rides(&search).await?;

    tracing::debug!(
        from = ?search.from,
        to = ?search.to,
        date = ?search.date,
        results = rides.len(),
        "Ride search"
    );

    Ok(Json(RidesResponse { rides }))
}

/// Newest bookable rides.
async fn recent_rides(State(state): State<Arc<AppState>>) -> Result<Json<RidesResponse>> {
    let search = RideSearch::from_params(SearchParams::default(), today_utc())?;
    let rides = state.db.recent_rides(&search, RECENT_RIDES_LIMIT).await?;
    Ok(Json(RidesResponse { rides }))
}

/// Ride detail.
async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
) -> Result<Json<Ride>> {
    let ride = state
        .db
        .get_ride(&ride_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ride {} not found", ride_id)))?;
    Ok(Json(ride))
}

// ─── Owner CRUD ──────────────────────────────────────────────

/// Offer a new ride.
async fn create_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<RideRequest>,
) -> Result<(StatusCode, Json<Ride>)> {
    let (input, _status) = request.into_input()?;

    let ride = Ride::new(
        uuid::Uuid::new_v4().to_string(),
        &user,
        input,
        &now_rfc3339(),
    );
    state.db.create_ride(&ride).await?;

    Ok((StatusCode::CREATED, Json(ride)))
}

/// Edit one of your rides.
async fn update_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
    Json(request): Json<RideRequest>,
) -> Result<Json<Ride>> {
    let (input, status) = request.into_input()?;
    let ride = state
        .db
        .update_ride(&ride_id, &user.user_id, input, status)
        .await?;
    Ok(Json(ride))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteRideResponse {
    pub success: bool,
    /// Join requests removed along with the ride
    pub removed_joins: usize,
}

/// Delete one of your rides and its join requests.
async fn delete_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
) -> Result<Json<DeleteRideResponse>> {
    let removed_joins = state.db.delete_ride(&ride_id, &user.user_id).await?;
    Ok(Json(DeleteRideResponse {
        success: true,
        removed_joins,
    }))
}

// ─── Participants ────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ParticipantsResponse {
    pub joins: Vec<RideJoin>,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl ParticipantsResponse {
    fn new(joins: Vec<RideJoin>) -> Self {
        let count = |status: JoinStatus| joins.iter().filter(|j| j.status == status).count();
        Self {
            pending: count(JoinStatus::Pending),
            accepted: count(JoinStatus::Accepted),
            rejected: count(JoinStatus::Rejected),
            joins,
        }
    }
}

/// All join requests on one of your rides.
async fn list_participants(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
) -> Result<Json<ParticipantsResponse>> {
    let ride = state
        .db
        .get_ride(&ride_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ride {} not found", ride_id)))?;
    if !ride.is_owned_by(&user.user_id) {
        return Err(AppError::Forbidden(
            "Only the ride owner can see participants".to_string(),
        ));
    }

    let joins = state.db.joins_for_ride(&ride.id).await?;
    Ok(Json(ParticipantsResponse::new(joins)))
}
