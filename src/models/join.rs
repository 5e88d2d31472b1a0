// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Join requests and their state transitions.
//!
//! A join moves `pending -> accepted | rejected` and may be removed at any
//! time by its requester (cancel) or the ride owner. Every transition that
//! touches seats takes the ride by `&mut` so the caller writes both
//! documents in one transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::middleware::auth::AuthUser;
use crate::models::ride::{Ride, RideStatus};

/// Message stored when the requester doesn't write one.
pub const DEFAULT_JOIN_MESSAGE: &str = "I would like to join this ride";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Pending,
    Accepted,
    Rejected,
}

impl JoinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStatus::Pending => "pending",
            JoinStatus::Accepted => "accepted",
            JoinStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for JoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a join transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Ride not found")]
    RideNotFound,
    #[error("Join request not found")]
    JoinNotFound,
    #[error("You cannot join your own ride")]
    OwnRide,
    #[error("This ride is no longer accepting requests")]
    RideInactive,
    #[error("This ride is full - no seats available")]
    NoSeats,
    #[error("You already have a pending request for this ride")]
    AlreadyPending,
    #[error("You have already joined this ride")]
    AlreadyJoined,
    #[error("Only the ride owner can manage join requests")]
    NotOwner,
    #[error("Only the requester or the ride owner can remove a join")]
    NotParticipant,
    #[error("Join request is already {0}")]
    NotPending(JoinStatus),
}

/// Stored join request in Firestore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RideJoin {
    /// Document ID, see [`RideJoin::doc_id`]
    pub id: String,
    pub ride_id: String,
    /// Denormalized ride owner, for "requests on my rides" queries
    pub ride_owner_id: String,
    /// Requester
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub status: JoinStatus,
    pub message: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl RideJoin {
    /// Document ID for a (ride, requester) pair.
    ///
    /// One document per pair means a user can never hold two live
    /// requests for the same ride.
    pub fn doc_id(ride_id: &str, user_id: &str) -> String {
        format!("{}_{}", ride_id, urlencoding::encode(user_id))
    }

    /// Create a pending request from `requester` for `ride`.
    ///
    /// `existing` is the stored join for the same pair, if any. A rejected
    /// request may be re-sent; pending and accepted ones may not.
    pub fn request(
        ride: &Ride,
        requester: &AuthUser,
        message: Option<String>,
        existing: Option<&RideJoin>,
        now: &str,
    ) -> Result<RideJoin, JoinError> {
        if ride.is_owned_by(&requester.user_id) {
            return Err(JoinError::OwnRide);
        }
        if ride.status != RideStatus::Active {
            return Err(JoinError::RideInactive);
        }
        if ride.available_seats == 0 {
            return Err(JoinError::NoSeats);
        }
        match existing.map(|j| j.status) {
            Some(JoinStatus::Pending) => return Err(JoinError::AlreadyPending),
            Some(JoinStatus::Accepted) => return Err(JoinError::AlreadyJoined),
            Some(JoinStatus::Rejected) | None => {}
        }

        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_JOIN_MESSAGE.to_string());

        Ok(RideJoin {
            id: Self::doc_id(&ride.id, &requester.user_id),
            ride_id: ride.id.clone(),
            ride_owner_id: ride.user_id.clone(),
            user_id: requester.user_id.clone(),
            user_email: requester.email.clone().unwrap_or_default(),
            user_name: requester.display_name(),
            status: JoinStatus::Pending,
            message,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    /// Accept a pending request, taking one seat from `ride`.
    ///
    /// Nothing is modified on error.
    pub fn accept(&mut self, ride: &mut Ride, owner_id: &str, now: &str) -> Result<(), JoinError> {
        self.check_owner_action(ride, owner_id)?;
        if !ride.reserve_seat(now) {
            return Err(JoinError::NoSeats);
        }
        self.status = JoinStatus::Accepted;
        self.updated_at = now.to_string();
        Ok(())
    }

    /// Reject a pending request. Seats are unchanged.
    pub fn reject(&mut self, ride: &Ride, owner_id: &str, now: &str) -> Result<(), JoinError> {
        self.check_owner_action(ride, owner_id)?;
        self.status = JoinStatus::Rejected;
        self.updated_at = now.to_string();
        Ok(())
    }

    /// Check that `actor_id` may remove this join and return its seat if
    /// it was accepted.
    ///
    /// Returns `true` when a seat was released on `ride`. `ride` is `None`
    /// when the ride document is already gone; then only the requester may
    /// remove the join.
    pub fn remove(
        &self,
        ride: Option<&mut Ride>,
        actor_id: &str,
        now: &str,
    ) -> Result<bool, JoinError> {
        let is_requester = self.user_id == actor_id;
        match ride {
            Some(ride) => {
                if !is_requester && !ride.is_owned_by(actor_id) {
                    return Err(JoinError::NotParticipant);
                }
                if self.status == JoinStatus::Accepted {
                    ride.release_seat(now);
                    return Ok(true);
                }
                Ok(false)
            }
            None if is_requester => Ok(false),
            None => Err(JoinError::NotParticipant),
        }
    }

    fn check_owner_action(&self, ride: &Ride, owner_id: &str) -> Result<(), JoinError> {
        if !ride.is_owned_by(owner_id) {
            return Err(JoinError::NotOwner);
        }
        if self.status != JoinStatus::Pending {
            return Err(JoinError::NotPending(self.status));
        }
        Ok(())
    }
}
