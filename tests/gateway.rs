use anyhow::Result;
use authgate::{
    api::{
        self,
        handlers::proxy::{Upstream, UPSTREAM_UNAVAILABLE_MESSAGE},
    },
    protection::{LocalEvaluator, NoSessionProvider, ProtectionState, RouteClassifier},
};
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

// Identity service stand-in: echoes what it was sent.
async fn spawn_upstream() -> Result<Url> {
    let app = Router::new().fallback(|uri: Uri, headers: HeaderMap, body: Bytes| async move {
        let forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (
            StatusCode::CREATED,
            [("x-upstream-path", uri.to_string()), ("x-seen-xff", forwarded_for)],
            body,
        )
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(Url::parse(&format!("http://{addr}"))?)
}

fn gateway(upstream: Url) -> Result<Router> {
    let state = Arc::new(ProtectionState::new(
        RouteClassifier::default(),
        Arc::new(NoSessionProvider),
        Arc::new(LocalEvaluator::new()),
    ));
    Ok(api::router(state, Arc::new(Upstream::new(upstream)?)))
}

#[tokio::test]
async fn health_reports_evaluator() -> Result<()> {
    let app = gateway(Url::parse("http://127.0.0.1:9")?)?;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let health: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(health["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(health["evaluator"], "local");
    Ok(())
}

#[tokio::test]
async fn allowed_request_is_proxied() -> Result<()> {
    let app = gateway(spawn_upstream().await?)?;
    let payload = r#"{"email":"jane@gmail.com","password":"correct horse"}"#;

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/sign-up/email?callbackURL=%2Fhome")
                .header(header::USER_AGENT, BROWSER)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::from(payload))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response
            .headers()
            .get("x-upstream-path")
            .and_then(|v| v.to_str().ok()),
        Some("/api/auth/sign-up/email?callbackURL=%2Fhome")
    );
    assert_eq!(
        response
            .headers()
            .get("x-seen-xff")
            .and_then(|v| v.to_str().ok()),
        Some("198.51.100.4")
    );
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(body, Bytes::from_static(payload.as_bytes()));
    Ok(())
}

#[tokio::test]
async fn denied_request_never_reaches_upstream() -> Result<()> {
    // unreachable upstream: a 502 here would mean the request was forwarded
    let app = gateway(Url::parse("http://127.0.0.1:9")?)?;

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/sign-in/email")
                .header(header::USER_AGENT, "python-requests/2.32")
                .body(Body::from("{}"))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() -> Result<()> {
    let app = gateway(Url::parse("http://127.0.0.1:9")?)?;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/auth/get-session")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let payload: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(payload["message"], UPSTREAM_UNAVAILABLE_MESSAGE);
    Ok(())
}
