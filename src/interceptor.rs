//! Request interception in front of entity-mutating calls.
//!
//! Every outbound request from a foreground view passes through here.
//! While the remote service is reachable, requests forward live with a
//! bounded timeout; when it is not (or the live call dies in transport),
//! mutations are captured into the durable store and acknowledged with a
//! synthetic accepted-offline response, and reads fall back to the most
//! recent cached response.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::broadcast::{StatusBroadcaster, SyncEvent};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{MutationStore, ResponseCache, StoreError};
use crate::models::{EntityType, MutationAction, PendingMutation};

/// Methods the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// The mutation action a method maps to; `None` for reads.
    fn action(self) -> Option<MutationAction> {
        match self {
            RequestMethod::Get => None,
            RequestMethod::Post => Some(MutationAction::Create),
            RequestMethod::Put => Some(MutationAction::Update),
            RequestMethod::Delete => Some(MutationAction::Delete),
        }
    }
}

/// One outbound request from a foreground view.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: RequestMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: RequestMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// What the router hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterResponse {
    /// The live response, passed through unmodified.
    Live { status: u16, body: Value },
    /// The mutation was captured durably for later delivery.
    AcceptedOffline { id: Uuid },
    /// A read served from the local response cache.
    CachedOffline { body: Value },
    /// Nothing could be served offline.
    UnavailableOffline { message: String },
}

impl RouterResponse {
    /// HTTP-style status code for this response.
    pub fn status_code(&self) -> u16 {
        match self {
            RouterResponse::Live { status, .. } => *status,
            RouterResponse::AcceptedOffline { .. } => 202,
            RouterResponse::CachedOffline { .. } => 200,
            RouterResponse::UnavailableOffline { .. } => 503,
        }
    }

    /// HTTP-style body for this response.
    pub fn body(&self) -> Value {
        match self {
            RouterResponse::Live { body, .. } => body.clone(),
            RouterResponse::AcceptedOffline { id } => json!({
                "offline": true,
                "id": id.to_string(),
            }),
            RouterResponse::CachedOffline { body } => {
                let mut wrapped = body.clone();
                if let Value::Object(map) = &mut wrapped {
                    map.insert("offline".to_string(), Value::Bool(true));
                    map.insert("cached".to_string(), Value::Bool(true));
                }
                wrapped
            }
            RouterResponse::UnavailableOffline { message } => json!({
                "success": false,
                "offline": true,
                "message": message,
            }),
        }
    }
}

/// Errors surfaced to the caller of [`RequestRouter::handle`].
#[derive(Debug)]
pub enum RouterError {
    /// The durable store rejected the capture.
    Store(StoreError),
    /// The HTTP client could not be constructed.
    Http(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::Store(e) => write!(f, "Storage error: {}", e),
            RouterError::Http(e) => write!(f, "HTTP client error: {}", e),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Store(e) => Some(e),
            RouterError::Http(_) => None,
        }
    }
}

impl From<StoreError> for RouterError {
    fn from(e: StoreError) -> Self {
        RouterError::Store(e)
    }
}

/// A route prefix mapped to the entity family it mutates.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    pub prefix: String,
    pub entity_type: EntityType,
}

/// Default entity routes for the hospital-operations API.
pub fn default_routes() -> Vec<RoutePattern> {
    vec![
        RoutePattern {
            prefix: "/api/appointments".to_string(),
            entity_type: EntityType::Appointment,
        },
        RoutePattern {
            prefix: "/api/vitals".to_string(),
            entity_type: EntityType::VitalsReading,
        },
        RoutePattern {
            prefix: "/api/queue".to_string(),
            entity_type: EntityType::QueueEntry,
        },
        RoutePattern {
            prefix: "/api/records".to_string(),
            entity_type: EntityType::GenericRecord,
        },
    ]
}

/// Sits in front of all entity-mutating calls and decides, per request,
/// whether to forward live or to capture offline.
pub struct RequestRouter {
    routes: Vec<RoutePattern>,
    store: MutationStore,
    cache: ResponseCache,
    monitor: Arc<ConnectivityMonitor>,
    broadcaster: StatusBroadcaster,
    device_id: Uuid,
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl RequestRouter {
    pub fn new(
        config: &Config,
        routes: Vec<RoutePattern>,
        store: MutationStore,
        cache: ResponseCache,
        monitor: Arc<ConnectivityMonitor>,
        broadcaster: StatusBroadcaster,
        device_id: Uuid,
    ) -> Result<Self, RouterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.live_timeout_secs))
            .build()
            .map_err(|e| RouterError::Http(e.to_string()))?;

        Ok(Self {
            routes,
            store,
            cache,
            monitor,
            broadcaster,
            device_id,
            http,
            base_url: config.remote_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Routes one outbound request.
    pub async fn handle(&self, request: OutboundRequest) -> Result<RouterResponse, RouterError> {
        match request.method.action() {
            None => self.handle_read(&request).await,
            Some(action) => self.handle_mutation(&request, action).await,
        }
    }

    async fn handle_read(&self, request: &OutboundRequest) -> Result<RouterResponse, RouterError> {
        if self.monitor.is_reachable() {
            match self.forward_live(request).await {
                Ok((status, body)) => {
                    if (200..300).contains(&status) {
                        if let Err(e) = self.cache.put(&request.path, &body).await {
                            tracing::warn!("could not cache response for {}: {}", request.path, e);
                        }
                    }
                    return Ok(RouterResponse::Live { status, body });
                }
                Err(e) => {
                    tracing::warn!("live read of {} failed: {}", request.path, e);
                    self.monitor.set_reachable(false);
                }
            }
        }

        match self.cache.get(&request.path).await? {
            Some((body, cached_at)) => {
                tracing::debug!(
                    "serving {} from cache (captured {})",
                    request.path,
                    cached_at.to_rfc3339()
                );
                Ok(RouterResponse::CachedOffline { body })
            }
            None => Ok(RouterResponse::UnavailableOffline {
                message: format!("no cached response for {}", request.path),
            }),
        }
    }

    async fn handle_mutation(
        &self,
        request: &OutboundRequest,
        action: MutationAction,
    ) -> Result<RouterResponse, RouterError> {
        if self.monitor.is_reachable() {
            match self.forward_live(request).await {
                Ok((status, body)) => return Ok(RouterResponse::Live { status, body }),
                Err(e) => {
                    tracing::warn!("live call to {} failed: {}", request.path, e);
                    self.monitor.set_reachable(false);
                }
            }
        }

        let Some(entity_type) = self.match_route(&request.path) else {
            return Ok(RouterResponse::UnavailableOffline {
                message: format!("{} cannot be queued offline", request.path),
            });
        };

        let payload = request.body.clone().unwrap_or_else(|| json!({}));
        let mutation = PendingMutation::new(entity_type, action, payload, self.device_id);
        self.store.append(&mutation).await?;

        tracing::info!(
            "captured offline {} {} as {}",
            mutation.action,
            mutation.entity_type,
            mutation.id
        );
        self.broadcaster
            .notify(SyncEvent::ItemStored { id: mutation.id });

        Ok(RouterResponse::AcceptedOffline { id: mutation.id })
    }

    fn match_route(&self, path: &str) -> Option<EntityType> {
        self.routes
            .iter()
            .find(|r| path.starts_with(&r.prefix))
            .map(|r| r.entity_type)
    }

    /// Attempts the live call; any transport error is returned as a string
    /// so the caller can fall back to offline handling.
    async fn forward_live(&self, request: &OutboundRequest) -> Result<(u16, Value), String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| "no remote endpoint configured".to_string())?;
        let url = format!("{}{}", base.trim_end_matches('/'), request.path);

        let mut call = self.http.request(request.method.as_reqwest(), &url);
        if let Some(key) = &self.api_key {
            call = call.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(body) = &request.body {
            call = call.json(body);
        }

        let response = call.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);

        Ok((status, body))
    }
}
