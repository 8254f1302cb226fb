//! Session lookup against the identity service.
//!
//! The lookup is only used to pick a fingerprint, so every failure is logged
//! and treated as "no session".

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap,
};
use reqwest::Client;
use serde::Deserialize;
use std::{future::Future, pin::Pin, time::Duration};
use tracing::{debug, warn};
use url::Url;

use crate::APP_USER_AGENT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("session endpoint returned status {0}")]
    Status(u16),
}

pub type SessionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<SessionInfo>, SessionError>> + Send + 'a>>;

pub trait SessionProvider: Send + Sync {
    /// Resolve the session carried by `headers`, if any.
    fn session<'a>(&'a self, headers: &'a HeaderMap) -> SessionFuture<'a>;
}

/// Look up a session and swallow failures.
pub async fn lookup_user_id(provider: &dyn SessionProvider, headers: &HeaderMap) -> Option<String> {
    match provider.session(headers).await {
        Ok(session) => session.map(|session| session.user_id),
        Err(err) => {
            warn!("Session lookup failed, continuing without session: {err}");
            None
        }
    }
}

/// Provider for deployments without a session endpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSessionProvider;

impl SessionProvider for NoSessionProvider {
    fn session<'a>(&'a self, _headers: &'a HeaderMap) -> SessionFuture<'a> {
        Box::pin(async { Ok(None) })
    }
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: String,
}

/// Calls `GET {upstream}{prefix}/get-session` with the caller's credentials.
#[derive(Clone, Debug)]
pub struct HttpSessionProvider {
    client: Client,
    endpoint: Url,
}

impl HttpSessionProvider {
    /// The endpoint keeps any base path of `upstream`, matching what the
    /// proxy forwards to.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(upstream: &Url, prefix: &str, timeout: Duration) -> Result<Self, SessionError> {
        let mut path = upstream.path().trim_end_matches('/').to_string();
        for segment in prefix.split('/').filter(|segment| !segment.is_empty()) {
            path.push('/');
            path.push_str(segment);
        }
        path.push_str("/get-session");

        let mut endpoint = upstream.clone();
        endpoint.set_path(&path);
        endpoint.set_query(None);
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn fetch(&self, headers: &HeaderMap) -> Result<Option<SessionInfo>, SessionError> {
        let cookie = headers.get(COOKIE);
        let authorization = headers.get(AUTHORIZATION);
        if cookie.is_none() && authorization.is_none() {
            return Ok(None);
        }

        let mut request = self.client.get(self.endpoint.clone());
        if let Some(value) = cookie {
            request = request.header(COOKIE, value.clone());
        }
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(parse_session(&body))
    }
}

impl SessionProvider for HttpSessionProvider {
    fn session<'a>(&'a self, headers: &'a HeaderMap) -> SessionFuture<'a> {
        Box::pin(self.fetch(headers))
    }
}

/// The identity service answers `null` when there is no session.
fn parse_session(body: &[u8]) -> Option<SessionInfo> {
    match serde_json::from_slice::<Option<SessionEnvelope>>(body) {
        Ok(envelope) => envelope
            .and_then(|envelope| envelope.user)
            .map(|user| SessionInfo { user_id: user.id })
            .filter(|session| !session.user_id.trim().is_empty()),
        Err(err) => {
            debug!("Unexpected session payload: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::HeaderValue;

    #[test]
    fn endpoint_is_joined_to_upstream() -> Result<()> {
        let upstream = Url::parse("http://identity:3000")?;
        let provider = HttpSessionProvider::new(&upstream, "/api/auth/", Duration::from_secs(1))?;
        assert_eq!(
            provider.endpoint().as_str(),
            "http://identity:3000/api/auth/get-session"
        );
        Ok(())
    }

    #[test]
    fn endpoint_keeps_upstream_base_path() -> Result<()> {
        for base in ["http://identity:3000/svc", "http://identity:3000/svc/"] {
            let upstream = Url::parse(base)?;
            let provider =
                HttpSessionProvider::new(&upstream, "/api/auth", Duration::from_secs(1))?;
            assert_eq!(
                provider.endpoint().as_str(),
                "http://identity:3000/svc/api/auth/get-session"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn session_is_read_below_base_path() -> Result<()> {
        use axum::{routing::get, Router};

        let app = Router::new().route(
            "/svc/api/auth/get-session",
            get(|headers: HeaderMap| async move {
                if headers.contains_key(COOKIE) {
                    r#"{"user":{"id":"user_7"}}"#
                } else {
                    "null"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let upstream = Url::parse(&format!("http://{addr}/svc/"))?;
        let provider = HttpSessionProvider::new(&upstream, "/api/auth", Duration::from_secs(2))?;
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("session_token=abc"));

        assert_eq!(
            lookup_user_id(&provider, &headers).await,
            Some("user_7".to_string())
        );
        Ok(())
    }

    #[test]
    fn session_payloads() {
        assert_eq!(
            parse_session(br#"{"session":{"id":"s1"},"user":{"id":"user_1","email":"a@b.com"}}"#),
            Some(SessionInfo {
                user_id: "user_1".to_string()
            })
        );
        assert_eq!(parse_session(b"null"), None);
        assert_eq!(parse_session(br#"{"user":null}"#), None);
        assert_eq!(parse_session(br#"{"user":{"id":""}}"#), None);
        assert_eq!(parse_session(b"<html>"), None);
    }

    #[tokio::test]
    async fn anonymous_requests_skip_the_lookup() -> Result<()> {
        // port 9 is never contacted without credentials
        let upstream = Url::parse("http://127.0.0.1:9")?;
        let provider = HttpSessionProvider::new(&upstream, "/api/auth", Duration::from_millis(200))?;
        assert_eq!(provider.session(&HeaderMap::new()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_failures_mean_no_session() -> Result<()> {
        let upstream = Url::parse("http://127.0.0.1:9")?;
        let provider = HttpSessionProvider::new(&upstream, "/api/auth", Duration::from_millis(200))?;
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("session_token=abc"));
        assert_eq!(lookup_user_id(&provider, &headers).await, None);
        assert_eq!(lookup_user_id(&NoSessionProvider, &headers).await, None);
        Ok(())
    }
}
