// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Rides (listings, search)
//! - Ride joins (join requests and seat accounting)
//! - Subscriptions (premium tier, synced from payment webhooks)
//! - Webhook events (idempotency records)
//!
//! Every operation that writes a join together with its ride's seat count
//! runs inside `run_transaction`. Firestore aborts a transaction whose read
//! set changed before commit, and the client retries it with fresh reads,
//! so two concurrent accepts can never both take the last seat.

use std::collections::HashMap;

use crate::db::collections;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::ride::RideInput;
use crate::models::search::{newest_first, sort_by_departure};
use crate::models::{
    JoinError, JoinStatus, Ride, RideJoin, RideSearch, RideStatus, Subscription, WebhookEventRecord,
};
use crate::time_utils::now_rfc3339;
use futures_util::{stream, FutureExt, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore limits transactions to 500 writes; keep headroom for the ride itself.
const MAX_JOINS_PER_RIDE_DELETE: usize = 450;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Ride Operations ─────────────────────────────────────────

    /// Get a ride by ID.
    pub async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RIDES)
            .obj()
            .one(ride_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get several rides by ID. Missing rides are absent from the map.
    pub async fn get_rides(&self, ride_ids: &[String]) -> Result<HashMap<String, Ride>, AppError> {
        let results = stream::iter(ride_ids.to_vec())
            .map(|ride_id| async move { self.get_ride(&ride_id).await })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<Option<Ride>, AppError>>>()
            .await;

        let mut rides = HashMap::new();
        for ride in results {
            if let Some(ride) = ride? {
                rides.insert(ride.id.clone(), ride);
            }
        }
        Ok(rides)
    }

    /// Store a new ride.
    pub async fn create_ride(&self, ride: &Ride) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(&ride.id)
            .object(ride)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tracing::info!(
            ride_id = %ride.id,
            user_id = %ride.user_id,
            seats = ride.available_seats,
            "Ride created"
        );
        Ok(())
    }

    /// Apply an owner edit to a ride.
    pub async fn update_ride(
        &self,
        ride_id: &str,
        owner_id: &str,
        input: RideInput,
        status: Option<RideStatus>,
    ) -> Result<Ride, AppError> {
        let ride_id = ride_id.to_string();
        let owner_id = owner_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let ride_id = ride_id.clone();
                let owner_id = owner_id.clone();
                let input = input.clone();
                async move {
                    let Some(mut ride) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&ride_id)
                        .await?
                    else {
                        return Ok(Err(AppError::NotFound(format!(
                            "Ride {} not found",
                            ride_id
                        ))));
                    };
                    if !ride.is_owned_by(&owner_id) {
                        return Ok(Err(AppError::Forbidden(
                            "You can only edit your own rides".to_string(),
                        )));
                    }

                    ride.apply_update(input, status, &now_rfc3339());

                    db.fluent()
                        .update()
                        .in_col(collections::RIDES)
                        .document_id(&ride.id)
                        .object(&ride)
                        .add_to_transaction(transaction)?;

                    Ok(Ok(ride))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Ride update transaction failed: {}", e)))?;

        let ride = outcome?;
        tracing::info!(ride_id = %ride.id, status = %ride.status, "Ride updated");
        Ok(ride)
    }

    /// Delete a ride and all of its joins atomically.
    ///
    /// Returns the number of joins removed.
    pub async fn delete_ride(&self, ride_id: &str, owner_id: &str) -> Result<usize, AppError> {
        let ride_id = ride_id.to_string();
        let owner_id = owner_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let ride_id = ride_id.clone();
                let owner_id = owner_id.clone();
                async move {
                    let Some(ride) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&ride_id)
                        .await?
                    else {
                        return Ok(Err(AppError::NotFound(format!(
                            "Ride {} not found",
                            ride_id
                        ))));
                    };
                    if !ride.is_owned_by(&owner_id) {
                        return Ok(Err(AppError::Forbidden(
                            "You can only delete your own rides".to_string(),
                        )));
                    }

                    let filter_ride_id = ride_id.clone();
                    let joins: Vec<RideJoin> = db
                        .fluent()
                        .select()
                        .from(collections::RIDE_JOINS)
                        .filter(move |q| q.for_all([q.field("ride_id").eq(filter_ride_id.clone())]))
                        .obj()
                        .query()
                        .await?;

                    if joins.len() > MAX_JOINS_PER_RIDE_DELETE {
                        return Ok(Err(AppError::Conflict(
                            "Ride has too many join requests to delete at once".to_string(),
                        )));
                    }

                    for join in &joins {
                        db.fluent()
                            .delete()
                            .from(collections::RIDE_JOINS)
                            .document_id(&join.id)
                            .add_to_transaction(transaction)?;
                    }
                    db.fluent()
                        .delete()
                        .from(collections::RIDES)
                        .document_id(&ride_id)
                        .add_to_transaction(transaction)?;

                    Ok(Ok(joins.len()))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Ride delete transaction failed: {}", e)))?;

        let removed_joins = outcome?;
        tracing::info!(ride_id = %ride_id, removed_joins, "Ride deleted");
        Ok(removed_joins)
    }

    /// Search bookable rides.
    ///
    /// The store applies `status == active` and the departure date floor;
    /// the remaining criteria are checked by [`RideSearch::matches`].
    pub async fn search_rides(&self, search: &RideSearch) -> Result<Vec<Ride>, AppError> {
        let floor = search.date_floor();

        let rides: Vec<Ride> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::RIDES)
            .filter(move |q| {
                q.for_all([
                    q.field("status").eq(RideStatus::Active.as_str()),
                    q.field("departure_date")
                        .greater_than_or_equal(floor.clone()),
                ])
            })
            .order_by([(
                "departure_date",
                firestore::FirestoreQueryDirection::Ascending,
            )])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut matching: Vec<Ride> = rides.into_iter().filter(|r| search.matches(r)).collect();
        sort_by_departure(&mut matching);
        Ok(matching)
    }

    /// Most recently posted bookable rides.
    pub async fn recent_rides(
        &self,
        search: &RideSearch,
        limit: usize,
    ) -> Result<Vec<Ride>, AppError> {
        let rides = self.search_rides(search).await?;
        Ok(newest_first(rides, limit))
    }

    /// All rides owned by a user, soonest departure first.
    pub async fn rides_for_owner(&self, owner_id: &str) -> Result<Vec<Ride>, AppError> {
        let owner_id = owner_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RIDES)
            .filter(move |q| q.for_all([q.field("user_id").eq(owner_id.clone())]))
            .order_by([(
                "departure_date",
                firestore::FirestoreQueryDirection::Ascending,
            )])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Join Queries ────────────────────────────────────────────

    /// Get a join by document ID.
    pub async fn get_join(&self, join_id: &str) -> Result<Option<RideJoin>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RIDE_JOINS)
            .obj()
            .one(join_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All joins for a ride, newest first.
    pub async fn joins_for_ride(&self, ride_id: &str) -> Result<Vec<RideJoin>, AppError> {
        let ride_id = ride_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RIDE_JOINS)
            .filter(move |q| q.for_all([q.field("ride_id").eq(ride_id.clone())]))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Pending requests on rides owned by `owner_id`, newest first.
    pub async fn pending_joins_for_owner(&self, owner_id: &str) -> Result<Vec<RideJoin>, AppError> {
        let owner_id = owner_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RIDE_JOINS)
            .filter(move |q| {
                q.for_all([
                    q.field("ride_owner_id").eq(owner_id.clone()),
                    q.field("status").eq(JoinStatus::Pending.as_str()),
                ])
            })
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Joins requested by a user, newest first.
    pub async fn joins_for_user(&self, user_id: &str) -> Result<Vec<RideJoin>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RIDE_JOINS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Join Transitions ────────────────────────────────────────

    /// Create a pending join request.
    ///
    /// The ride and any previous request by the same user are read inside
    /// the transaction, so the seat and duplicate checks hold at commit.
    pub async fn request_join(
        &self,
        ride_id: &str,
        requester: &AuthUser,
        message: Option<String>,
    ) -> Result<RideJoin, AppError> {
        let ride_id = ride_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let ride_id = ride_id.clone();
                let requester = requester.clone();
                let message = message.clone();
                async move {
                    let Some(ride) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&ride_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::RideNotFound));
                    };

                    let join_id = RideJoin::doc_id(&ride_id, &requester.user_id);
                    let existing = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDE_JOINS)
                        .obj::<RideJoin>()
                        .one(&join_id)
                        .await?;

                    let join = match RideJoin::request(
                        &ride,
                        &requester,
                        message,
                        existing.as_ref(),
                        &now_rfc3339(),
                    ) {
                        Ok(join) => join,
                        Err(e) => return Ok(Err(e)),
                    };

                    db.fluent()
                        .update()
                        .in_col(collections::RIDE_JOINS)
                        .document_id(&join.id)
                        .object(&join)
                        .add_to_transaction(transaction)?;

                    Ok(Ok(join))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Join request transaction failed: {}", e)))?;

        let join = outcome?;
        tracing::info!(
            join_id = %join.id,
            ride_id = %join.ride_id,
            user_id = %join.user_id,
            "Join requested"
        );
        Ok(join)
    }

    /// Accept a pending join and take a seat, atomically.
    ///
    /// Returns the updated join and ride.
    pub async fn accept_join(
        &self,
        join_id: &str,
        owner_id: &str,
    ) -> Result<(RideJoin, Ride), AppError> {
        let join_id = join_id.to_string();
        let owner_id = owner_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let join_id = join_id.clone();
                let owner_id = owner_id.clone();
                async move {
                    let Some(mut join) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDE_JOINS)
                        .obj::<RideJoin>()
                        .one(&join_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::JoinNotFound));
                    };
                    let Some(mut ride) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&join.ride_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::RideNotFound));
                    };

                    if let Err(e) = join.accept(&mut ride, &owner_id, &now_rfc3339()) {
                        return Ok(Err(e));
                    }

                    db.fluent()
                        .update()
                        .in_col(collections::RIDE_JOINS)
                        .document_id(&join.id)
                        .object(&join)
                        .add_to_transaction(transaction)?;
                    db.fluent()
                        .update()
                        .in_col(collections::RIDES)
                        .document_id(&ride.id)
                        .object(&ride)
                        .add_to_transaction(transaction)?;

                    Ok(Ok((join, ride)))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Accept transaction failed: {}", e)))?;

        let (join, ride) = outcome?;
        tracing::info!(
            join_id = %join.id,
            ride_id = %ride.id,
            seats_left = ride.available_seats,
            "Join accepted"
        );
        Ok((join, ride))
    }

    /// Reject a pending join. Seats are untouched.
    pub async fn reject_join(&self, join_id: &str, owner_id: &str) -> Result<RideJoin, AppError> {
        let join_id = join_id.to_string();
        let owner_id = owner_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let join_id = join_id.clone();
                let owner_id = owner_id.clone();
                async move {
                    let Some(mut join) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDE_JOINS)
                        .obj::<RideJoin>()
                        .one(&join_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::JoinNotFound));
                    };
                    let Some(ride) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&join.ride_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::RideNotFound));
                    };

                    if let Err(e) = join.reject(&ride, &owner_id, &now_rfc3339()) {
                        return Ok(Err(e));
                    }

                    db.fluent()
                        .update()
                        .in_col(collections::RIDE_JOINS)
                        .document_id(&join.id)
                        .object(&join)
                        .add_to_transaction(transaction)?;

                    Ok(Ok(join))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Reject transaction failed: {}", e)))?;

        let join = outcome?;
        tracing::info!(join_id = %join.id, ride_id = %join.ride_id, "Join rejected");
        Ok(join)
    }

    /// Remove a join (requester cancel or owner delete).
    ///
    /// If the join was accepted its seat goes back to the ride in the same
    /// transaction. Returns whether a seat was released.
    pub async fn remove_join(&self, join_id: &str, actor_id: &str) -> Result<bool, AppError> {
        let join_id = join_id.to_string();
        let actor_id = actor_id.to_string();

        let outcome = self
            .get_client()?
            .run_transaction(|db, transaction| {
                let join_id = join_id.clone();
                let actor_id = actor_id.clone();
                async move {
                    let Some(join) = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDE_JOINS)
                        .obj::<RideJoin>()
                        .one(&join_id)
                        .await?
                    else {
                        return Ok(Err(JoinError::JoinNotFound));
                    };
                    let mut ride = db
                        .fluent()
                        .select()
                        .by_id_in(collections::RIDES)
                        .obj::<Ride>()
                        .one(&join.ride_id)
                        .await?;

                    let released = match join.remove(ride.as_mut(), &actor_id, &now_rfc3339()) {
                        Ok(released) => released,
                        Err(e) => return Ok(Err(e)),
                    };

                    db.fluent()
                        .delete()
                        .from(collections::RIDE_JOINS)
                        .document_id(&join.id)
                        .add_to_transaction(transaction)?;
                    if let (true, Some(ride)) = (released, ride.as_ref()) {
                        db.fluent()
                            .update()
                            .in_col(collections::RIDES)
                            .document_id(&ride.id)
                            .object(ride)
                            .add_to_transaction(transaction)?;
                    }

                    Ok(Ok(released))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Remove join transaction failed: {}", e)))?;

        let released = outcome?;
        tracing::info!(join_id = %join_id, actor_id = %actor_id, released, "Join removed");
        Ok(released)
    }

    // ─── Subscription Operations ─────────────────────────────────

    /// Get a user's subscription.
    pub async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SUBSCRIPTIONS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the subscription carrying a Stripe subscription ID.
    pub async fn find_subscription_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let stripe_subscription_id = stripe_subscription_id.to_string();
        let found: Vec<Subscription> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SUBSCRIPTIONS)
            .filter(move |q| {
                q.for_all([q
                    .field("stripe_subscription_id")
                    .eq(stripe_subscription_id.clone())])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(found.into_iter().next())
    }

    /// Create or replace a user's subscription.
    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SUBSCRIPTIONS)
            .document_id(&subscription.user_id)
            .object(subscription)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Webhook Idempotency ─────────────────────────────────────

    /// Whether a webhook event was already applied.
    pub async fn is_webhook_event_processed(&self, event_id: &str) -> Result<bool, AppError> {
        let record: Option<WebhookEventRecord> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::WEBHOOK_EVENTS)
            .obj()
            .one(event_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(record.is_some())
    }

    /// Record a webhook event as applied.
    pub async fn record_webhook_event(&self, record: &WebhookEventRecord) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::WEBHOOK_EVENTS)
            .document_id(&record.event_id)
            .object(record)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
