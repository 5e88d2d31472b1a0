//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment and
//! read once at startup.

use std::env;

/// Default base URL for the Stripe REST API.
pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Public app URL used for checkout success/cancel redirects
    pub app_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Stripe API base URL (overridable for tests)
    pub stripe_api_base: String,

    // --- Secrets ---
    /// Key the identity provider signs session tokens with (raw bytes)
    pub session_signing_key: Vec<u8>,
    /// Stripe secret API key
    pub stripe_secret_key: String,
    /// Stripe webhook endpoint signing secret
    pub stripe_webhook_secret: String,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".to_string(),
            app_url: "http://localhost:3000".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            stripe_api_base: STRIPE_API_BASE.to_string(),
            session_signing_key: b"test_session_key_32_bytes_min!!".to_vec(),
            stripe_secret_key: "sk_test_123".to_string(),
            stripe_webhook_secret: "whsec_test_secret".to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            app_url: env::var("APP_URL").unwrap_or_else(|_| frontend_url.clone()),
            frontend_url,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| STRIPE_API_BASE.to_string()),

            session_signing_key: env::var("SESSION_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("SESSION_SIGNING_KEY"))?
                .into_bytes(),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))?,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
