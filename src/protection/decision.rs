//! Evaluation outcomes and their mapping to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeSet;

use super::rules::EmailType;

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";
pub const ACCESS_DENIED_MESSAGE: &str = "Access Denied";
pub const EMAIL_INVALID_MESSAGE: &str = "Email format is invalid. Check for typos.";
pub const EMAIL_DISPOSABLE_MESSAGE: &str = "Disposable email addresses are not allowed.";
pub const EMAIL_NO_MX_MESSAGE: &str = "Email domain is invalid or has no MX records.";
pub const EMAIL_GENERIC_MESSAGE: &str = "Invalid email. Please try another one.";
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body.";
pub const BODY_TOO_LARGE_MESSAGE: &str = "Request body too large.";

/// Most specific failure first.
const EMAIL_PRIORITY: [(EmailType, &str); 3] = [
    (EmailType::Invalid, EMAIL_INVALID_MESSAGE),
    (EmailType::Disposable, EMAIL_DISPOSABLE_MESSAGE),
    (EmailType::NoMxRecords, EMAIL_NO_MX_MESSAGE),
];

/// Primary reason reported by the evaluator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    None,
    RateLimit,
    Bot,
    Email(BTreeSet<EmailType>),
    Shield,
}

impl Reason {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RateLimit => "rate_limit",
            Self::Bot => "bot",
            Self::Email(_) => "email",
            Self::Shield => "shield",
        }
    }
}

/// Result of one evaluator call. Built fresh per request and consumed once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub allowed: bool,
    pub reason: Reason,
}

impl EvaluationOutcome {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: Reason::None,
        }
    }

    #[must_use]
    pub const fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    #[must_use]
    pub fn deny_email<I>(types: I) -> Self
    where
        I: IntoIterator<Item = EmailType>,
    {
        Self::deny(Reason::Email(types.into_iter().collect()))
    }

    #[must_use]
    pub const fn is_denied(&self) -> bool {
        !self.allowed
    }
}

/// Terminal response for a denied request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ResponseDescriptor {
    #[must_use]
    pub const fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    #[must_use]
    pub const fn access_denied() -> Self {
        Self::new(StatusCode::FORBIDDEN, ACCESS_DENIED_MESSAGE)
    }
}

impl IntoResponse for ResponseDescriptor {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

/// Map an outcome to the response that ends the request, or `None` when the
/// request should be forwarded.
#[must_use]
pub fn reduce(outcome: &EvaluationOutcome) -> Option<ResponseDescriptor> {
    if outcome.allowed {
        return None;
    }

    let descriptor = match &outcome.reason {
        Reason::RateLimit => {
            ResponseDescriptor::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE)
        }
        Reason::Email(types) => {
            ResponseDescriptor::new(StatusCode::BAD_REQUEST, email_message(types))
        }
        Reason::Bot | Reason::Shield | Reason::None => ResponseDescriptor::access_denied(),
    };

    Some(descriptor)
}

fn email_message(types: &BTreeSet<EmailType>) -> &'static str {
    EMAIL_PRIORITY
        .iter()
        .find(|(email_type, _)| types.contains(email_type))
        .map_or(EMAIL_GENERIC_MESSAGE, |&(_, message)| message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::to_bytes;

    #[test]
    fn allowed_outcome_produces_no_descriptor() {
        assert_eq!(reduce(&EvaluationOutcome::allow()), None);
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let descriptor = reduce(&EvaluationOutcome::deny(Reason::RateLimit));
        assert_eq!(
            descriptor,
            Some(ResponseDescriptor::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later."
            ))
        );
    }

    #[test]
    fn bot_shield_and_unknown_map_to_403() {
        for reason in [Reason::Bot, Reason::Shield, Reason::None] {
            let descriptor = reduce(&EvaluationOutcome::deny(reason));
            assert_eq!(
                descriptor,
                Some(ResponseDescriptor::new(StatusCode::FORBIDDEN, "Access Denied"))
            );
        }
    }

    #[test]
    fn invalid_wins_over_disposable() {
        let outcome = EvaluationOutcome::deny_email([EmailType::Disposable, EmailType::Invalid]);
        let descriptor = reduce(&outcome);
        assert_eq!(
            descriptor,
            Some(ResponseDescriptor::new(
                StatusCode::BAD_REQUEST,
                EMAIL_INVALID_MESSAGE
            ))
        );
    }

    #[test]
    fn disposable_wins_over_no_mx() {
        let outcome =
            EvaluationOutcome::deny_email([EmailType::NoMxRecords, EmailType::Disposable]);
        assert_eq!(
            reduce(&outcome).map(|d| d.message),
            Some("Disposable email addresses are not allowed.")
        );
    }

    #[test]
    fn no_mx_alone() {
        let outcome = EvaluationOutcome::deny_email([EmailType::NoMxRecords]);
        assert_eq!(
            reduce(&outcome).map(|d| d.message),
            Some("Email domain is invalid or has no MX records.")
        );
    }

    #[test]
    fn empty_email_types_use_generic_message() {
        let outcome = EvaluationOutcome::deny_email([]);
        assert_eq!(
            reduce(&outcome),
            Some(ResponseDescriptor::new(
                StatusCode::BAD_REQUEST,
                "Invalid email. Please try another one."
            ))
        );
    }

    #[tokio::test]
    async fn descriptor_renders_json_message() -> Result<()> {
        let response = ResponseDescriptor::access_denied().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let payload: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(payload, serde_json::json!({ "message": "Access Denied" }));
        Ok(())
    }
}
