//! Wardsync reference reconciliation server
//!
//! A development/reference implementation of the reconciliation endpoint
//! the sync agent submits batches to. Applies mutations idempotently by
//! id, so retried batches never duplicate effects.
//!
//! # Configuration
//!
//! Environment variables:
//! - `WARDSYNC_SERVER_PORT`: Port to listen on (default: 8080)
//! - `WARDSYNC_SERVER_KEYS`: Path to API key file (default: ~/.config/wardsync-server/keys.yaml)
//!
//! # Key File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     label: "triage-desk-tablet"
//! ```
//!
//! With no key file (or an empty one) the server runs open, which is the
//! normal mode for local development.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /sync/batch`: Batch reconciliation (auth required when keys are configured)

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wardsync::server::ReconcileState;

// ============================================================================
// Configuration
// ============================================================================

/// API key entry in the key file
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    #[serde(default)]
    label: Option<String>,
}

/// Key file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct KeyFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Path to the API key file
    keys_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("WARDSYNC_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let keys_path = std::env::var("WARDSYNC_SERVER_KEYS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("wardsync-server")
                    .join("keys.yaml")
            });

        Self { port, keys_path }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// API key store - maps key -> label
#[derive(Debug, Clone, Default)]
struct ApiKeyStore {
    keys: HashMap<String, Option<String>>,
}

impl ApiKeyStore {
    /// Load API keys from the key file; a missing file means open mode.
    fn load(keys_path: &PathBuf) -> Self {
        let keys = match std::fs::read_to_string(keys_path) {
            Ok(contents) => match serde_yaml::from_str::<KeyFile>(&contents) {
                Ok(file) => {
                    let mut map = HashMap::new();
                    for entry in file.api_keys {
                        map.insert(entry.key, entry.label);
                    }
                    tracing::info!("Loaded {} API key(s)", map.len());
                    map
                }
                Err(e) => {
                    tracing::warn!("Failed to parse key file: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => {
                tracing::info!(
                    "No key file at {}; running without authentication",
                    keys_path.display()
                );
                HashMap::new()
            }
        };

        Self { keys }
    }

    fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    fn validate(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }
}

/// Auth error response
#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

/// Authentication middleware; `/health` stays open for probes.
async fn auth_middleware(
    State(keys): State<Arc<ApiKeyStore>>,
    request: Request,
    next: Next,
) -> Response {
    if keys.is_open() || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "invalid_auth",
                    message: "Authorization header must use Bearer scheme",
                }),
            )
                .into_response();
        }
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "missing_auth",
                    message: "Authorization header required",
                }),
            )
                .into_response();
        }
    };

    if keys.validate(api_key) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(AuthError {
                error: "invalid_key",
                message: "Invalid API key",
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wardsync_server=info,wardsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    let keys = Arc::new(ApiKeyStore::load(&config.keys_path));

    // Build router
    let state = Arc::new(ReconcileState::new());
    let app = wardsync::server::router(state)
        .layer(middleware::from_fn_with_state(keys, auth_middleware))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting reconciliation server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
