use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::ProxyConfig;
use crate::errors::{ProxyError, ProxyResult};
use crate::routing::Director;

/// Shared state for every forwarded request.
pub struct ProxyContext {
    director: Director,
    client: reqwest::Client,
    max_body_bytes: usize,
}

/// Builds the forwarding application: a single fallback route that catches
/// every method and path and relays it to the selected backend.
pub fn create_app(director: Director, config: &ProxyConfig) -> ProxyResult<Router> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .build()
        .map_err(|e| ProxyError::Internal(format!("Failed to build HTTP client: {e}")))?;

    let context = Arc::new(ProxyContext {
        director,
        client,
        max_body_bytes: config.max_request_size_mb as usize * 1024 * 1024,
    });

    Ok(Router::new()
        .fallback(forward_request)
        .layer(TraceLayer::new_for_http())
        .with_state(context))
}

async fn forward_request(
    State(context): State<Arc<ProxyContext>>,
    request: Request,
) -> Response {
    match relay(context, request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to proxy request: {e}");
            (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
        }
    }
}

async fn relay(context: Arc<ProxyContext>, request: Request) -> ProxyResult<Response> {
    // The routing flag is observed exactly once per request, inside
    // select_backend; the decision cannot change mid-request.
    let backend = context.director.select_backend().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("http://{backend}{path_and_query}");
    debug!("Forwarding {} {} to {}", request.method(), request.uri().path(), target);

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, context.max_body_bytes)
        .await
        .map_err(|e| ProxyError::Upstream(format!("Failed to read request body: {e}")))?;

    // The outbound client computes Host and Content-Length itself.
    let mut outbound_headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if name != header::HOST && name != header::CONTENT_LENGTH {
            outbound_headers.insert(name.clone(), value.clone());
        }
    }

    let upstream = context
        .client
        .request(parts.method, &target)
        .headers(outbound_headers)
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Request to {backend} failed: {e}")))?;

    let mut response = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        // Hop-by-hop headers do not survive the relay; the body below is
        // re-framed by axum.
        if name != header::TRANSFER_ENCODING
            && name != header::CONNECTION
            && name != header::CONTENT_LENGTH
        {
            response = response.header(name.clone(), value.clone());
        }
    }

    let payload = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Failed to read response from {backend}: {e}")))?;

    response
        .body(Body::from(payload))
        .map_err(|e| ProxyError::Internal(format!("Failed to assemble response: {e}")))
}
