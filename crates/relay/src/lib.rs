// Picture edit relay: WebSocket rooms where collaborators on the same
// picture see who holds the single editor lock and receive each edit action.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod directory;
pub mod error;
pub mod events;
pub mod gatekeeper;
pub mod lock_table;
pub mod metrics;
pub mod registry;
pub mod ws;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::auth::jwt::JwtAccessTokenService;
use crate::config::{ConfigError, EventChannelConfig};
use crate::coordinator::EditCoordinator;
use crate::directory::PictureDirectory;
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::events::EventDispatcher;
use crate::metrics::RelayMetrics;
use crate::registry::SessionRegistry;
use crate::ws::EditRelayState;

/// A running relay: shared room state plus the event dispatcher feeding it.
pub struct EditRelay {
    state: EditRelayState,
    coordinator: Arc<EditCoordinator>,
    dispatcher: EventDispatcher,
    metrics: Arc<RelayMetrics>,
}

impl EditRelay {
    /// Spawn dispatcher workers and assemble the connection state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        events: EventChannelConfig,
        directory: PictureDirectory,
        jwt_service: Arc<JwtAccessTokenService>,
    ) -> Result<Self, ConfigError> {
        let metrics = metrics::install_global_metrics();
        let coordinator = Arc::new(EditCoordinator::new(Arc::new(SessionRegistry::new())));
        let dispatcher = EventDispatcher::start(events, Arc::clone(&coordinator))?;
        let state = EditRelayState::new(
            directory,
            jwt_service,
            Arc::clone(&coordinator),
            Arc::clone(dispatcher.channel()),
        );

        Ok(Self { state, coordinator, dispatcher, metrics })
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), Arc::clone(&self.metrics))
    }

    pub fn coordinator(&self) -> &Arc<EditCoordinator> {
        &self.coordinator
    }

    /// Refuse new events, drain queued ones, and stop the workers.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

fn build_router(state: EditRelayState, metrics: Arc<RelayMetrics>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics).with_state(metrics))
            .merge(ws::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render_prometheus(),
    )
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = duration_millis(started_at.elapsed());
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
