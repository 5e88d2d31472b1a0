// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride listing model for storage and API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::time_utils::parse_date;

/// Maximum seats a ride can offer.
pub const MAX_SEATS: u32 = 8;

/// How the ride travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Car,
    Train,
    Bus,
    Other,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Car => "car",
            TransportType::Train => "train",
            TransportType::Bus => "bus",
            TransportType::Other => "other",
        }
    }
}

impl FromStr for TransportType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(TransportType::Car),
            "train" => Ok(TransportType::Train),
            "bus" => Ok(TransportType::Bus),
            "other" => Ok(TransportType::Other),
            other => Err(AppError::BadRequest(format!(
                "Unknown transport type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle of a ride listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Active,
    Cancelled,
    Completed,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Active => "active",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored ride record in Firestore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Ride {
    /// Ride ID (also used as document ID)
    pub id: String,
    /// Owner's identity provider user ID
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub title: String,
    pub description: String,
    pub from_location: String,
    pub to_location: String,
    /// Departure date (`YYYY-MM-DD`, sorts lexically)
    pub departure_date: String,
    /// Departure time (`HH:MM`)
    pub departure_time: String,
    /// Seats still open to join requests
    pub available_seats: u32,
    pub transport_type: TransportType,
    /// Rides are free; always 0.
    pub price_per_person: f64,
    pub status: RideStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Ride {
    /// Build a new active ride owned by `owner`.
    pub fn new(id: String, owner: &AuthUser, input: RideInput, now: &str) -> Self {
        Self {
            id,
            user_id: owner.user_id.clone(),
            user_email: owner.email.clone().unwrap_or_default(),
            user_name: owner.display_name(),
            title: input.title,
            description: input.description,
            from_location: input.from_location,
            to_location: input.to_location,
            departure_date: input.departure_date,
            departure_time: input.departure_time,
            available_seats: input.available_seats,
            transport_type: input.transport_type,
            price_per_person: 0.0,
            status: RideStatus::Active,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Apply an owner edit. Ownership is checked by the caller.
    pub fn apply_update(&mut self, input: RideInput, status: Option<RideStatus>, now: &str) {
        self.title = input.title;
        self.description = input.description;
        self.from_location = input.from_location;
        self.to_location = input.to_location;
        self.departure_date = input.departure_date;
        self.departure_time = input.departure_time;
        self.available_seats = input.available_seats;
        self.transport_type = input.transport_type;
        if let Some(status) = status {
            self.status = status;
        }
        self.updated_at = now.to_string();
    }

    /// Take one seat. Returns `false` (and changes nothing) if the ride is full.
    pub fn reserve_seat(&mut self, now: &str) -> bool {
        match self.available_seats.checked_sub(1) {
            Some(remaining) => {
                self.available_seats = remaining;
                self.updated_at = now.to_string();
                true
            }
            None => false,
        }
    }

    /// Give a seat back after an accepted join is removed.
    pub fn release_seat(&mut self, now: &str) {
        self.available_seats = self.available_seats.saturating_add(1);
        self.updated_at = now.to_string();
    }
}

/// Ride fields supplied by the owner on create/edit.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RideRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: String,
    #[validate(length(min = 1, max = 100))]
    pub from_location: String,
    #[validate(length(min = 1, max = 100))]
    pub to_location: String,
    #[validate(length(min = 1))]
    pub departure_date: String,
    #[validate(length(min = 1))]
    pub departure_time: String,
    #[validate(range(min = 1, max = 8))]
    pub available_seats: u32,
    pub transport_type: TransportType,
    /// Only honored on edit.
    #[serde(default)]
    pub status: Option<RideStatus>,
}

/// Validated, normalized ride fields.
#[derive(Debug, Clone)]
pub struct RideInput {
    pub title: String,
    pub description: String,
    pub from_location: String,
    pub to_location: String,
    pub departure_date: String,
    pub departure_time: String,
    pub available_seats: u32,
    pub transport_type: TransportType,
}

impl RideRequest {
    /// Trim, validate and split off the optional status.
    pub fn into_input(self) -> Result<(RideInput, Option<RideStatus>), AppError> {
        let normalized = RideRequest {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            from_location: self.from_location.trim().to_string(),
            to_location: self.to_location.trim().to_string(),
            departure_date: self.departure_date.trim().to_string(),
            departure_time: self.departure_time.trim().to_string(),
            ..self
        };
        normalized.validate()?;

        let date = parse_date(&normalized.departure_date)
            .ok_or_else(|| AppError::BadRequest("departure_date must be YYYY-MM-DD".to_string()))?;
        let time = chrono::NaiveTime::parse_from_str(&normalized.departure_time, "%H:%M")
            .map_err(|_| AppError::BadRequest("departure_time must be HH:MM".to_string()))?;

        Ok((
            RideInput {
                title: normalized.title,
                description: normalized.description,
                from_location: normalized.from_location,
                to_location: normalized.to_location,
                departure_date: crate::time_utils::format_date(date),
                departure_time: time.format("%H:%M").to_string(),
                available_seats: normalized.available_seats,
                transport_type: normalized.transport_type,
            },
            normalized.status,
        ))
    }
}
