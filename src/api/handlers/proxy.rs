//! Forwarding to the identity service.

use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::{redirect::Policy, Client};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, instrument};
use url::Url;

use crate::APP_USER_AGENT;

pub const UPSTREAM_UNAVAILABLE_MESSAGE: &str = "Upstream unavailable";

/// Connection-scoped headers that must not be forwarded (RFC 9110 7.6.1).
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone, Debug)]
pub struct Upstream {
    client: Client,
    base: Url,
}

impl Upstream {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url) -> Result<Self, reqwest::Error> {
        // redirects belong to the browser, not to us
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .redirect(Policy::none())
            .build()?;
        Ok(Self { client, base })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Target URL for an inbound path and query, below the base path.
    #[must_use]
    pub fn target(&self, path_and_query: &str) -> Url {
        let mut target = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        let (path, query) = path_and_query
            .split_once('?')
            .map_or((path_and_query, None), |(path, query)| (path, Some(query)));
        target.set_path(&format!("{base_path}{path}"));
        target.set_query(query);
        target
    }
}

/// Forward the request verbatim and stream the upstream response back.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    Extension(upstream): Extension<Arc<Upstream>>,
    request: Request,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());

    let target = upstream.target(path_and_query);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    if let Some(peer) = peer {
        append_forwarded_for(&mut headers, peer);
    }

    let response = upstream
        .client
        .request(parts.method, target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match response {
        Ok(response) => {
            debug!(status = %response.status(), "upstream responded");
            let status = response.status();
            let mut headers = response.headers().clone();
            strip_hop_by_hop(&mut headers);

            let mut forwarded = Response::new(Body::from_stream(response.bytes_stream()));
            *forwarded.status_mut() = status;
            *forwarded.headers_mut() = headers;
            forwarded
        }
        Err(err) => {
            error!("Upstream request failed: {err}");
            unavailable()
        }
    }
}

fn unavailable() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "message": UPSTREAM_UNAVAILABLE_MESSAGE })),
    )
        .into_response()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // headers named by `Connection` are connection-scoped too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let peer = peer.ip().to_string();
    let value = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer}"),
        _ => peer,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn target_keeps_path_and_query() -> Result<()> {
        let upstream = Upstream::new(Url::parse("http://identity:3000")?)?;
        assert_eq!(
            upstream.target("/api/auth/sign-in/email?redirect=%2Fhome").as_str(),
            "http://identity:3000/api/auth/sign-in/email?redirect=%2Fhome"
        );
        Ok(())
    }

    #[test]
    fn target_respects_base_path() -> Result<()> {
        let upstream = Upstream::new(Url::parse("http://identity:3000/svc/")?)?;
        assert_eq!(
            upstream.target("/api/auth/get-session").as_str(),
            "http://identity:3000/svc/api/auth/get-session"
        );
        Ok(())
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::COOKIE));
    }

    #[test]
    fn forwarded_for_is_appended() -> Result<()> {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1:5000".parse()?);
        assert_eq!(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("10.0.0.1")
        );

        append_forwarded_for(&mut headers, "10.0.0.2:5000".parse()?);
        assert_eq!(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("10.0.0.1, 10.0.0.2")
        );
        Ok(())
    }
}
