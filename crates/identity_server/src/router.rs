//! Router construction for the identity server.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use identity_core::IdentityReconciler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Build the full axum router with all routes and middleware.
pub fn build_router(reconciler: Arc<IdentityReconciler>) -> Router {
    Router::new()
        .route("/", get(handlers::health::banner))
        .route("/health", get(handlers::health::health))
        .route("/identify", post(handlers::identify::identify))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(reconciler)
}
