// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Set FIRESTORE_EMULATOR_HOST to run them; otherwise they are skipped.
//!
//! Every test uses fresh UUIDs, so runs don't interfere with each other.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use travelwith_api::error::AppError;
use travelwith_api::middleware::auth::AuthUser;
use travelwith_api::models::ride::RideInput;
use travelwith_api::models::{
    JoinStatus, Ride, RideSearch, RideStatus, SearchParams, SubscriptionStatus, TransportType,
};
use travelwith_api::services::stripe::compute_signature;
use travelwith_api::time_utils::{format_date, now_rfc3339, today_utc};

mod common;
use common::{create_app_with_db, create_test_jwt, test_db, test_user};

fn ride_input(from: &str, seats: u32, days_ahead: i64) -> RideInput {
    RideInput {
        title: format!("{} to Hamburg", from),
        description: String::new(),
        from_location: from.to_string(),
        to_location: "Hamburg".to_string(),
        departure_date: format_date(today_utc() + chrono::Duration::days(days_ahead)),
        departure_time: "08:30".to_string(),
        available_seats: seats,
        transport_type: TransportType::Car,
    }
}

async fn create_ride(
    db: &travelwith_api::db::FirestoreDb,
    owner: &AuthUser,
    input: RideInput,
) -> Ride {
    let ride = Ride::new(
        uuid::Uuid::new_v4().to_string(),
        owner,
        input,
        &now_rfc3339(),
    );
    db.create_ride(&ride).await.unwrap();
    ride
}

async fn seats(db: &travelwith_api::db::FirestoreDb, ride_id: &str) -> u32 {
    db.get_ride(ride_id).await.unwrap().unwrap().available_seats
}

// ═══════════════════════════════════════════════════════════════════════════
// RIDE + JOIN LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_create_ride_keeps_seat_count() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 4, 7)).await;

    let stored = db.get_ride(&ride.id).await.unwrap().unwrap();
    assert_eq!(stored.available_seats, 4);
    assert_eq!(stored.status, RideStatus::Active);
    assert_eq!(stored.user_id, owner.user_id);
}

#[tokio::test]
async fn test_accept_takes_a_seat() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 3, 7)).await;

    let join = db.request_join(&ride.id, &rider, None).await.unwrap();
    assert_eq!(join.status, JoinStatus::Pending);
    assert_eq!(
        seats(&db, &ride.id).await,
        3,
        "requesting doesn't take a seat"
    );

    let (accepted, updated) = db.accept_join(&join.id, &owner.user_id).await.unwrap();
    assert_eq!(accepted.status, JoinStatus::Accepted);
    assert_eq!(updated.available_seats, 2);
    assert_eq!(seats(&db, &ride.id).await, 2);

    let stored = db.get_join(&join.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JoinStatus::Accepted);
}

#[tokio::test]
async fn test_reject_leaves_seats_alone() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 2, 7)).await;

    let join = db.request_join(&ride.id, &rider, None).await.unwrap();
    let rejected = db.reject_join(&join.id, &owner.user_id).await.unwrap();

    assert_eq!(rejected.status, JoinStatus::Rejected);
    assert_eq!(seats(&db, &ride.id).await, 2);

    // A rejected request can be sent again
    let again = db
        .request_join(&ride.id, &rider, Some("Please?".to_string()))
        .await
        .unwrap();
    assert_eq!(again.id, join.id);
    assert_eq!(again.status, JoinStatus::Pending);
}

#[tokio::test]
async fn test_cancel_accepted_join_returns_seat() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 1, 7)).await;

    let join = db.request_join(&ride.id, &rider, None).await.unwrap();
    db.accept_join(&join.id, &owner.user_id).await.unwrap();
    assert_eq!(seats(&db, &ride.id).await, 0);

    let released = db.remove_join(&join.id, &rider.user_id).await.unwrap();
    assert!(released);
    assert_eq!(seats(&db, &ride.id).await, 1);
    assert!(db.get_join(&join.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_join_rules_enforced() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let stranger = test_user("stranger");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 2, 7)).await;

    let own = db.request_join(&ride.id, &owner, None).await;
    assert!(matches!(own, Err(AppError::BadRequest(_))));

    let join = db.request_join(&ride.id, &rider, None).await.unwrap();
    let duplicate = db.request_join(&ride.id, &rider, None).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let not_owner = db.accept_join(&join.id, &rider.user_id).await;
    assert!(matches!(not_owner, Err(AppError::Forbidden(_))));

    let outsider = db.remove_join(&join.id, &stranger.user_id).await;
    assert!(matches!(outsider, Err(AppError::Forbidden(_))));

    let missing = db.request_join("no-such-ride", &rider, None).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    assert_eq!(seats(&db, &ride.id).await, 2);
}

#[tokio::test]
async fn test_concurrent_accepts_take_last_seat_once() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let first = test_user("rider");
    let second = test_user("rider");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 1, 7)).await;

    let join_a = db.request_join(&ride.id, &first, None).await.unwrap();
    let join_b = db.request_join(&ride.id, &second, None).await.unwrap();

    let (a, b) = tokio::join!(
        db.accept_join(&join_a.id, &owner.user_id),
        db.accept_join(&join_b.id, &owner.user_id),
    );

    let succeeded = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(
        succeeded, 1,
        "exactly one accept must win: {:?} / {:?}",
        a, b
    );
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(AppError::Conflict(_))), "{:?}", loser);

    assert_eq!(seats(&db, &ride.id).await, 0);
}

#[tokio::test]
async fn test_delete_ride_removes_joins() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let ride = create_ride(&db, &owner, ride_input("Berlin", 2, 7)).await;
    let join = db.request_join(&ride.id, &rider, None).await.unwrap();

    let forbidden = db.delete_ride(&ride.id, &rider.user_id).await;
    assert!(matches!(forbidden, Err(AppError::Forbidden(_))));

    let removed = db.delete_ride(&ride.id, &owner.user_id).await.unwrap();
    assert_eq!(removed, 1);
    assert!(db.get_ride(&ride.id).await.unwrap().is_none());
    assert!(db.get_join(&join.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_owner_edit_and_dashboard_queries() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let rider = test_user("rider");
    let later = create_ride(&db, &owner, ride_input("Berlin", 2, 14)).await;
    let sooner = create_ride(&db, &owner, ride_input("Potsdam", 2, 3)).await;

    let edited = db
        .update_ride(
            &later.id,
            &owner.user_id,
            ride_input("Berlin Ost", 5, 14),
            Some(RideStatus::Cancelled),
        )
        .await
        .unwrap();
    assert_eq!(edited.from_location, "Berlin Ost");
    assert_eq!(edited.available_seats, 5);
    assert_eq!(edited.status, RideStatus::Cancelled);

    let mine = db.rides_for_owner(&owner.user_id).await.unwrap();
    let ids: Vec<&str> = mine.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, [sooner.id.as_str(), later.id.as_str()]);

    let join = db.request_join(&sooner.id, &rider, None).await.unwrap();
    let pending = db.pending_joins_for_owner(&owner.user_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, join.id);

    let joined = db.joins_for_user(&rider.user_id).await.unwrap();
    assert_eq!(joined.len(), 1);
    let rides = db.get_rides(&[sooner.id.clone()]).await.unwrap();
    assert!(rides.contains_key(&sooner.id));
}

async fn get_participants(
    app: axum::Router,
    ride_id: &str,
    token: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/rides/{}/participants", ride_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_participants_visible_to_owner_only() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let riders = [test_user("rider"), test_user("rider"), test_user("rider")];
    let ride = create_ride(&db, &owner, ride_input("Kassel", 3, 5)).await;

    let mut joins = Vec::new();
    for rider in &riders {
        joins.push(db.request_join(&ride.id, rider, None).await.unwrap());
    }
    db.accept_join(&joins[0].id, &owner.user_id).await.unwrap();
    db.reject_join(&joins[1].id, &owner.user_id).await.unwrap();

    let (app, state) = create_app_with_db(db.clone());
    let key = &state.config.session_signing_key;

    let rider_token = create_test_jwt(&riders[0].user_id, key);
    let (status, _) = get_participants(app.clone(), &ride.id, &rider_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let owner_token = create_test_jwt(&owner.user_id, key);
    let (status, body) = get_participants(app, &ride.id, &owner_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joins"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["pending"], 1);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["rejected"], 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SEARCH
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_search_by_origin() {
    require_emulator!();

    let db = test_db().await;
    let owner = test_user("owner");
    let marker = format!("Berlin-{}", uuid::Uuid::new_v4().simple());

    let bookable = create_ride(&db, &owner, ride_input(&marker, 2, 5)).await;
    let sooner = create_ride(&db, &owner, ride_input(&format!("{} Süd", marker), 1, 2)).await;

    // Past, full and cancelled rides never show up.
    create_ride(&db, &owner, ride_input(&marker, 2, -1)).await;

    let mut full = Ride::new(
        uuid::Uuid::new_v4().to_string(),
        &owner,
        ride_input(&marker, 1, 5),
        &now_rfc3339(),
    );
    full.available_seats = 0;
    db.create_ride(&full).await.unwrap();

    let mut cancelled = Ride::new(
        uuid::Uuid::new_v4().to_string(),
        &owner,
        ride_input(&marker, 2, 5),
        &now_rfc3339(),
    );
    cancelled.status = RideStatus::Cancelled;
    db.create_ride(&cancelled).await.unwrap();

    create_ride(&db, &owner, ride_input("Munich", 2, 5)).await;

    let search = RideSearch::from_params(
        SearchParams {
            from: Some(marker.to_uppercase()),
            ..Default::default()
        },
        today_utc(),
    )
    .unwrap();
    let results = db.search_rides(&search).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, [sooner.id.as_str(), bookable.id.as_str()]);
}

// ═══════════════════════════════════════════════════════════════════════════
// SUBSCRIPTION WEBHOOKS
// ═══════════════════════════════════════════════════════════════════════════

async fn post_signed(app: axum::Router, payload: serde_json::Value) -> StatusCode {
    let payload = payload.to_string();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature("whsec_test_secret", timestamp, payload.as_bytes()).unwrap();

    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .header(
                "Stripe-Signature",
                format!("t={},v1={}", timestamp, signature),
            )
            .body(Body::from(payload))
            .unwrap(),
    )
    .await
    .unwrap()
    .status()
}

#[tokio::test]
async fn test_subscription_lifecycle_via_webhooks() {
    require_emulator!();

    let db = test_db().await;
    let user = test_user("subscriber");
    let sub_id = format!("sub_{}", uuid::Uuid::new_v4().simple());

    let checkout = json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "customer": "cus_1",
            "subscription": sub_id,
            "metadata": { "userId": user.user_id }
        }}
    });

    let (app, _) = create_app_with_db(db.clone());
    assert_eq!(post_signed(app, checkout.clone()).await, StatusCode::OK);

    let subscription = db.get_subscription(&user.user_id).await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(subscription.is_trial_active(chrono::Utc::now()));

    // Redelivery is acknowledged and doesn't change anything
    let (app, _) = create_app_with_db(db.clone());
    assert_eq!(post_signed(app, checkout).await, StatusCode::OK);
    assert_eq!(
        db.get_subscription(&user.user_id).await.unwrap().unwrap(),
        subscription
    );

    let deleted = json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": "customer.subscription.deleted",
        "data": { "object": {
            "id": sub_id,
            "status": "canceled",
            "current_period_end": 1_700_000_000
        }}
    });
    let (app, _) = create_app_with_db(db.clone());
    assert_eq!(post_signed(app, deleted).await, StatusCode::OK);

    let subscription = db.get_subscription(&user.user_id).await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
    assert!(!subscription.is_premium());
    assert_eq!(
        subscription.current_period_end.as_deref(),
        Some("2023-11-14T22:13:20Z")
    );
}
