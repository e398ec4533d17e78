use std::net::SocketAddr;

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;

use migproxy::config::ProxyConfig;
use migproxy::proxy::create_app;
use migproxy::routing::{Director, RoutingFlag};

/// Spawns a backend that echoes enough of the request to prove what the
/// proxy forwarded: `{tag}|{method}|{path_and_query}|{x-probe}|{body}`.
async fn spawn_backend(tag: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request| async move {
        let method = request.method().clone();
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| "/".to_string());
        let probe = request
            .headers()
            .get("x-probe")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let body = to_bytes(request.into_body(), 1024 * 1024).await.unwrap();

        (
            StatusCode::OK,
            [("x-backend", tag)],
            format!(
                "{tag}|{method}|{path_and_query}|{probe}|{}",
                String::from_utf8_lossy(&body)
            ),
        )
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

async fn spawn_proxy(
    routing: RoutingFlag,
    default_backend: SocketAddr,
    legacy_backend: SocketAddr,
) -> SocketAddr {
    let config = ProxyConfig {
        bind_address: "127.0.0.1:0".to_string(),
        default_backend: default_backend.to_string(),
        legacy_backend: legacy_backend.to_string(),
        request_timeout_seconds: 5,
        max_request_size_mb: 1,
    };
    let director = Director::new(
        routing,
        config.default_backend.clone(),
        config.legacy_backend.clone(),
    );
    let app = create_app(director, &config).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_routing_follows_the_flag() {
    let default_backend = spawn_backend("default").await;
    let legacy_backend = spawn_backend("legacy").await;

    let routing = RoutingFlag::new(true);
    let proxy = spawn_proxy(routing.clone(), default_backend, legacy_backend).await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("http://{proxy}/ping"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("default|"), "unexpected backend: {body}");

    // Flip to the legacy backend, as a migration-start message would.
    routing.set(false);
    let body = client
        .get(format!("http://{proxy}/ping"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("legacy|"), "unexpected backend: {body}");

    // And back, as cleanup would.
    routing.set(true);
    let body = client
        .get(format!("http://{proxy}/ping"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("default|"), "unexpected backend: {body}");
}

#[tokio::test]
async fn test_method_path_headers_and_body_are_forwarded() {
    let default_backend = spawn_backend("default").await;
    let legacy_backend = spawn_backend("legacy").await;

    let routing = RoutingFlag::new(true);
    let proxy = spawn_proxy(routing, default_backend, legacy_backend).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{proxy}/v1/items?source=old"))
        .header("x-probe", "probe-42")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Backend response headers survive the relay.
    assert_eq!(
        response.headers().get("x-backend").unwrap().to_str().unwrap(),
        "default"
    );

    let body = response.text().await.unwrap();
    assert_eq!(body, "default|POST|/v1/items?source=old|probe-42|payload");
}

#[tokio::test]
async fn test_unreachable_backend_yields_bad_gateway() {
    // Reserve an address, then free it so nothing listens there.
    let unreachable = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let legacy_backend = spawn_backend("legacy").await;

    let routing = RoutingFlag::new(true);
    let proxy = spawn_proxy(routing.clone(), unreachable, legacy_backend).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{proxy}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // The healthy backend still answers once routing moves off the dead one.
    routing.set(false);
    let response = client
        .get(format!("http://{proxy}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
