use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::admission::{Decision, Gate};

pub const LIMITED_BODY: &str = "rate limit exceeded for anonymous IP\n";

// Admission middleware: forwards to `next` or answers 429 / 403 itself
pub async fn gitea_limit(State(gate): State<Arc<Gate>>, req: Request, next: Next) -> Response {
    // transport peer only, forwarded-for headers are not trusted
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let decision = gate.decide(ip, req.headers()).await;
    match decision {
        Ok(Decision::Forward(_)) => next.run(req).await,
        Ok(Decision::Deny { retry_after }) => too_many_requests(retry_after),
        Err(e) => {
            warn!(error = %e, path = %req.uri().path(), "rejecting request");
            e.into_response()
        }
    }
}

pub fn too_many_requests(retry_after: Duration) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        LIMITED_BODY,
    )
        .into_response();

    let secs = retry_after_secs(retry_after);
    if secs > 0 {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

// Rounded up, so 300ms left is announced as 1s rather than 0
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
