//! # mms-api
//!
//! HTTP surface of the mms layer: the org / repo / ref resource tree, model
//! reads, loads, updates and queries, diffs, and `/health`.
//!
//! Every route except `/health` requires a bearer token; see [`auth`].

pub mod auth;
pub mod error;
pub mod handlers;
pub mod negotiation;

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use mms_core::defaults;
use mms_engine::Engine;

pub use auth::{Authenticator, Caller, Claims, JwtConfig};
pub use error::{ApiError, ApiResult};

use handlers::{diffs, health, models, orgs, refs, repos};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, auth: Authenticator) -> Self {
        Self {
            engine,
            auth: Arc::new(auth),
        }
    }
}

/// Listener and request limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub allowed_origins: Vec<HeaderValue>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::SERVER_HOST.to_string(),
            port: defaults::SERVER_PORT,
            max_body_bytes: defaults::MAX_BODY_BYTES,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `HOST` | `0.0.0.0` | Bind address |
    /// | `PORT` | `8080` | Bind port |
    /// | `MMS_MAX_BODY_BYTES` | 256 MiB | Request body limit |
    /// | `ALLOWED_ORIGINS` | none | Comma list of CORS origins |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(default.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),
            max_body_bytes: std::env::var("MMS_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_body_bytes),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
        }
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

fn parse_origins(value: &str) -> Vec<HeaderValue> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Invalid CORS origin '{}': {}", s, e);
                None
            }
        })
        .collect()
}

/// UUIDv7 request ids, so ids sort by arrival.
#[derive(Clone, Copy, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// The complete application router.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let repo = "/orgs/:org/repos/:repo";
    Router::new()
        .route("/health", get(health::health_check))
        .route("/orgs", get(orgs::list_orgs))
        .route(
            "/orgs/:org",
            get(orgs::get_org).put(orgs::put_org).delete(orgs::delete_org),
        )
        .route("/orgs/:org/repos", get(repos::list_repos))
        .route(
            repo,
            get(repos::get_repo).put(repos::put_repo).delete(repos::delete_repo),
        )
        .route(&format!("{repo}/branches"), get(refs::list_branches))
        .route(
            &format!("{repo}/branches/:id"),
            get(refs::get_branch).put(refs::put_branch).delete(refs::delete_branch),
        )
        .route(
            &format!("{repo}/branches/:id/graph"),
            get(models::get_branch_graph).put(models::put_branch_graph),
        )
        .route(&format!("{repo}/branches/:id/update"), post(models::update_branch))
        .route(&format!("{repo}/branches/:id/query"), post(models::query_branch))
        .route(&format!("{repo}/branches/:id/diff"), post(diffs::diff_branch))
        .route(&format!("{repo}/locks"), get(refs::list_locks))
        .route(
            &format!("{repo}/locks/:id"),
            get(refs::get_lock).put(refs::put_lock).delete(refs::delete_lock),
        )
        .route(&format!("{repo}/locks/:id/graph"), get(models::get_lock_graph))
        .route(&format!("{repo}/locks/:id/query"), post(models::query_lock))
        .route(&format!("{repo}/locks/:id/diff"), post(diffs::diff_lock))
        .route(&format!("{repo}/commits/:id"), get(repos::get_commit))
        .route(&format!("{repo}/diffs/:id"), get(diffs::get_diff))
        .route(&format!("{repo}/diffs/:id/insertions"), get(diffs::get_insertions))
        .route(&format!("{repo}/diffs/:id/deletions"), get(diffs::get_deletions))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(config.allowed_origins.clone()))
                .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::IF_MATCH,
                    header::IF_NONE_MATCH,
                ])
                .expose_headers([
                    header::ETAG,
                    header::LOCATION,
                    header::LINK,
                    HeaderName::from_static("x-request-id"),
                ])
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}
