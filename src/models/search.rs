// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride search criteria.
//!
//! Firestore handles the equality/range part of a search
//! (`status == active`, `departure_date >= floor`); the substring and seat
//! filters it can't express are applied with [`RideSearch::matches`].

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::ride::{Ride, RideStatus, TransportType, MAX_SEATS};
use crate::time_utils::{format_date, parse_date};

const MAX_LOCATION_LEN: usize = 100;

/// Raw search query string.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
    /// Transport type or "any"
    pub transport: Option<String>,
    /// Minimum free seats
    pub passengers: Option<String>,
}

/// Validated search.
#[derive(Debug, Clone, PartialEq)]
pub struct RideSearch {
    /// Lowercased substring of `from_location`
    pub from: Option<String>,
    /// Lowercased substring of `to_location`
    pub to: Option<String>,
    pub date: Option<NaiveDate>,
    pub transport: Option<TransportType>,
    pub min_seats: u32,
    pub today: NaiveDate,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn location_filter(value: Option<String>, field: &str) -> Result<Option<String>, AppError> {
    match non_empty(value) {
        Some(v) if v.chars().count() > MAX_LOCATION_LEN => Err(AppError::BadRequest(format!(
            "'{}' must be at most {} characters",
            field, MAX_LOCATION_LEN
        ))),
        other => Ok(other.map(|v| v.to_lowercase())),
    }
}

impl RideSearch {
    /// Validate query parameters. `today` anchors the "no past rides" rule.
    pub fn from_params(params: SearchParams, today: NaiveDate) -> Result<Self, AppError> {
        let from = location_filter(params.from, "from")?;
        let to = location_filter(params.to, "to")?;

        let date = non_empty(params.date)
            .map(|raw| {
                parse_date(&raw).ok_or_else(|| {
                    AppError::BadRequest("Invalid 'date' parameter: must be YYYY-MM-DD".to_string())
                })
            })
            .transpose()?;

        let transport = match non_empty(params.transport) {
            Some(t) if t.eq_ignore_ascii_case("any") => None,
            Some(t) => Some(t.parse::<TransportType>()?),
            None => None,
        };

        let min_seats = match non_empty(params.passengers) {
            Some(raw) => {
                let seats: u32 = raw.parse().map_err(|_| {
                    AppError::BadRequest("Invalid 'passengers' parameter".to_string())
                })?;
                if seats == 0 || seats > MAX_SEATS {
                    return Err(AppError::BadRequest(format!(
                        "'passengers' must be between 1 and {}",
                        MAX_SEATS
                    )));
                }
                seats
            }
            None => 1,
        };

        Ok(Self {
            from,
            to,
            date,
            transport,
            min_seats,
            today,
        })
    }

    /// Earliest departure date the store query should return.
    pub fn date_floor(&self) -> String {
        match self.date {
            Some(date) if date > self.today => format_date(date),
            _ => format_date(self.today),
        }
    }

    /// Full predicate, including the filters the store already applied.
    pub fn matches(&self, ride: &Ride) -> bool {
        if ride.status != RideStatus::Active || ride.available_seats < self.min_seats.max(1) {
            return false;
        }

        let Some(departure) = parse_date(&ride.departure_date) else {
            return false;
        };
        if departure < self.today {
            return false;
        }
        if self.date.is_some_and(|d| d != departure) {
            return false;
        }
        if self.transport.is_some_and(|t| t != ride.transport_type) {
            return false;
        }
        if let Some(from) = &self.from {
            if !ride.from_location.to_lowercase().contains(from.as_str()) {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if !ride.to_location.to_lowercase().contains(to.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Sort rides by departure, soonest first.
pub fn sort_by_departure(rides: &mut [Ride]) {
    rides.sort_by(|a, b| {
        a.departure_date
            .cmp(&b.departure_date)
            .then_with(|| a.departure_time.cmp(&b.departure_time))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Keep the `limit` most recently posted rides, newest first.
pub fn newest_first(mut rides: Vec<Ride>, limit: usize) -> Vec<Ride> {
    rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rides.truncate(limit);
    rides
}
