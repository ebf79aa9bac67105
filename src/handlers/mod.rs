mod health;
mod limit;
mod metrics;
mod proxy;

pub use health::health_handler;
pub use limit::{LIMITED_BODY, gitea_limit, retry_after_secs, too_many_requests};
pub use metrics::metrics_handler;
pub use proxy::{MAX_BODY_BYTES, ProxyError, proxy_handler};

use axum::{Router, extract::DefaultBodyLimit, middleware, routing::get};
use std::sync::Arc;

use crate::state::AppState;

// Everything goes to the upstream, behind the admission gate.
// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the gate sees the peer IP.
pub fn gateway_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            gitea_limit,
        ))
        .with_state(state)
}

pub fn admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
