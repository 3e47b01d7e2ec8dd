//! HTTP router and shared application state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::loader::LoaderSet;
use crate::registry::ServiceRegistry;

use super::handlers;

/// Shared application state.
pub struct AppState {
    /// The reloadable service registry.
    pub registry: Arc<ServiceRegistry>,
    /// Loaders consulted by the reload endpoint.
    pub loaders: Arc<LoaderSet>,
    /// Policies sources, as configured at startup.
    pub sources: Vec<String>,
}

/// Create the router with all routes and layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/allowed", post(handlers::allowed))
        .route("/__reload__", post(handlers::reload))
        .route("/__lbheartbeat__", get(handlers::lbheartbeat))
        .route("/__heartbeat__", get(handlers::heartbeat))
        .route("/__version__", get(handlers::version))
        .fallback(handlers::not_found)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
