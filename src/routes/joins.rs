// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Join request routes.
//!
//! Each transition is a single Firestore transaction (see `db::firestore`);
//! handlers only validate input and shape the response.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::RideJoin;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Join routes (require authentication via JWT).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rides/{id}/join", post(request_join))
        .route("/api/joins/{id}/accept", post(accept_join))
        .route("/api/joins/{id}/reject", post(reject_join))
        .route("/api/joins/{id}", delete(remove_join))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct JoinRequestBody {
    /// Note to the driver; a default greeting is used when empty
    #[serde(default)]
    #[validate(length(max = 500))]
    pub message: Option<String>,
}

/// Ask to join a ride.
async fn request_join(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
    Json(body): Json<JoinRequestBody>,
) -> Result<(StatusCode, Json<RideJoin>)> {
    body.validate()?;
    let join = state.db.request_join(&ride_id, &user, body.message).await?;
    Ok((StatusCode::CREATED, Json(join)))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AcceptJoinResponse {
    pub join: RideJoin,
    /// Seats left on the ride after accepting
    pub available_seats: u32,
}

/// Accept a pending request on your ride.
async fn accept_join(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(join_id): Path<String>,
) -> Result<Json<AcceptJoinResponse>> {
    let (join, ride) = state.db.accept_join(&join_id, &user.user_id).await?;
    Ok(Json(AcceptJoinResponse {
        join,
        available_seats: ride.available_seats,
    }))
}

/// Reject a pending request on your ride.
async fn reject_join(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(join_id): Path<String>,
) -> Result<Json<RideJoin>> {
    let join = state.db.reject_join(&join_id, &user.user_id).await?;
    Ok(Json(join))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RemoveJoinResponse {
    pub success: bool,
    /// Whether an accepted seat went back to the ride
    pub seat_released: bool,
}

/// Cancel your own request, or remove a participant from your ride.
async fn remove_join(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(join_id): Path<String>,
) -> Result<Json<RemoveJoinResponse>> {
    let seat_released = state.db.remove_join(&join_id, &user.user_id).await?;
    Ok(Json(RemoveJoinResponse {
        success: true,
        seat_released,
    }))
}
