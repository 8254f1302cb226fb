//! Request dispatcher: the axum middleware that runs the pipeline.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header::CONTENT_LENGTH, request::Parts, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

use super::{
    body::{extract_body_intent, BodyIntent, MalformedBodyPolicy},
    compose::{compose_and_evaluate, select_chain},
    decision::{reduce, ResponseDescriptor, BODY_TOO_LARGE_MESSAGE, INVALID_BODY_MESSAGE},
    evaluator::{EvaluationRequest, EvaluatorError, ProtectionEvaluator, RequestSnapshot},
    identity::{resolve_client_address, resolve_fingerprint},
    route::{RouteClassifier, RouteIntent},
    session::{lookup_user_id, SessionProvider},
};

pub const DEFAULT_EVALUATOR_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ProtectionConfig {
    evaluator_timeout: Duration,
    max_body_bytes: usize,
    malformed_body: MalformedBodyPolicy,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            evaluator_timeout: DEFAULT_EVALUATOR_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            malformed_body: MalformedBodyPolicy::default(),
        }
    }
}

impl ProtectionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_evaluator_timeout(mut self, timeout: Duration) -> Self {
        self.evaluator_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    #[must_use]
    pub const fn with_malformed_body_policy(mut self, policy: MalformedBodyPolicy) -> Self {
        self.malformed_body = policy;
        self
    }

    #[must_use]
    pub const fn evaluator_timeout(&self) -> Duration {
        self.evaluator_timeout
    }

    #[must_use]
    pub const fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    #[must_use]
    pub const fn malformed_body_policy(&self) -> MalformedBodyPolicy {
        self.malformed_body
    }
}

/// Shared, read-only state for [`protect`].
pub struct ProtectionState {
    classifier: RouteClassifier,
    sessions: Arc<dyn SessionProvider>,
    evaluator: Arc<dyn ProtectionEvaluator>,
    config: ProtectionConfig,
}

impl ProtectionState {
    #[must_use]
    pub fn new(
        classifier: RouteClassifier,
        sessions: Arc<dyn SessionProvider>,
        evaluator: Arc<dyn ProtectionEvaluator>,
    ) -> Self {
        Self {
            classifier,
            sessions,
            evaluator,
            config: ProtectionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ProtectionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn evaluator(&self) -> &dyn ProtectionEvaluator {
        self.evaluator.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }
}

/// Protect the auth namespace. Non-POST and unprotected requests are passed
/// through untouched; everything else is evaluated exactly once and either
/// answered with a JSON denial or forwarded with its body intact.
pub async fn protect(
    State(state): State<Arc<ProtectionState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let route = state.classifier.classify(request.uri().path());
    if route == RouteIntent::Unprotected {
        debug!(path = %request.uri().path(), "unprotected route, forwarding");
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();

    let (body, intent) = match route {
        RouteIntent::SignupOrReset => match inspect_body(&state.config, &parts, body).await {
            Ok(inspected) => inspected,
            Err(descriptor) => return descriptor.into_response(),
        },
        _ => (body, BodyIntent::WithoutEmail),
    };

    let Some(chain) = select_chain(route, &intent) else {
        return next.run(Request::from_parts(parts, body)).await;
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let session_user = lookup_user_id(state.sessions.as_ref(), &parts.headers).await;
    let fingerprint = resolve_fingerprint(session_user.as_deref(), &parts.headers, peer);

    let email = match intent {
        BodyIntent::WithEmail(email) => Some(email),
        BodyIntent::WithoutEmail => None,
    };
    let evaluation = EvaluationRequest {
        fingerprint,
        email,
        request: RequestSnapshot::new(
            &parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &parts.headers,
            resolve_client_address(&parts.headers, peer),
        ),
    };

    let timeout = state.config.evaluator_timeout;
    let outcome = match tokio::time::timeout(
        timeout,
        compose_and_evaluate(state.evaluator.as_ref(), chain, evaluation),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => return fail_closed(&err, chain.name),
        Err(_) => {
            return fail_closed(&EvaluatorError::Timeout(timeout.as_millis()), chain.name)
        }
    };

    if let Some(descriptor) = reduce(&outcome) {
        warn!(
            chain = chain.name,
            reason = outcome.reason.kind(),
            status = descriptor.status.as_u16(),
            path = %parts.uri.path(),
            "request denied"
        );
        return descriptor.into_response();
    }

    debug!(chain = chain.name, "request allowed");

    next.run(Request::from_parts(parts, body)).await
}

/// Buffer a sign-up or reset body and work out its email intent. The returned
/// body replays the buffered bytes for the upstream.
async fn inspect_body(
    config: &ProtectionConfig,
    parts: &Parts,
    body: Body,
) -> Result<(Body, BodyIntent), ResponseDescriptor> {
    let too_large = ResponseDescriptor::new(StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE_MESSAGE);

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|length| length > config.max_body_bytes) {
        warn!(path = %parts.uri.path(), "declared body exceeds limit");
        return Err(too_large);
    }

    let bytes = match to_bytes(body, config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %parts.uri.path(), "Failed to buffer request body: {err}");
            return Err(too_large);
        }
    };

    let intent = match extract_body_intent(&bytes) {
        Ok(intent) => intent,
        Err(err) => match config.malformed_body {
            MalformedBodyPolicy::Fallback => {
                debug!("Unreadable body, evaluating without email: {err}");
                BodyIntent::WithoutEmail
            }
            MalformedBodyPolicy::Reject => {
                warn!(path = %parts.uri.path(), "Rejecting unreadable body: {err}");
                return Err(ResponseDescriptor::new(
                    StatusCode::BAD_REQUEST,
                    INVALID_BODY_MESSAGE,
                ));
            }
        },
    };

    Ok((Body::from(bytes), intent))
}

fn fail_closed(err: &EvaluatorError, chain: &'static str) -> Response {
    error!(chain, "Protection evaluation failed, denying request: {err}");
    ResponseDescriptor::access_denied().into_response()
}
