// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use travelwith_api::config::Config;
use travelwith_api::db::FirestoreDb;
use travelwith_api::middleware::auth::AuthUser;
use travelwith_api::routes::create_router;
use travelwith_api::services::StripeClient;
use travelwith_api::AppState;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

/// Build an app around the given database.
#[allow(dead_code)]
pub fn create_app_with_db(db: FirestoreDb) -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let stripe = StripeClient::new(
        config.stripe_api_base.clone(),
        config.stripe_secret_key.clone(),
    );

    let state = Arc::new(AppState { config, db, stripe });

    (create_router(state.clone()), state)
}

/// Create a test app with offline mock dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    create_app_with_db(test_db_offline())
}

/// Session token for `user_id`, signed the way the identity provider does.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: usize,
        iat: usize,
        email: String,
        username: &'a str,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id,
        exp: now + 86400,
        iat: now,
        email: format!("{}@example.com", user_id),
        username: user_id,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

/// Unique user ID for test isolation.
#[allow(dead_code)]
pub fn unique_user_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Authenticated user with a fresh unique ID.
#[allow(dead_code)]
pub fn test_user(prefix: &str) -> AuthUser {
    let user_id = unique_user_id(prefix);
    AuthUser {
        email: Some(format!("{}@example.com", user_id)),
        username: Some(prefix.to_string()),
        name: None,
        user_id,
    }
}
