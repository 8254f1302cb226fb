//! Evaluator backed by a remote protection service.

use reqwest::{header::AUTHORIZATION, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    decision::{EvaluationOutcome, Reason},
    evaluator::{
        EvaluationFuture, EvaluationRequest, EvaluatorError, ProtectionEvaluator, RequestSnapshot,
    },
    rules::{EmailType, Rule, RuleChain},
};
use crate::APP_USER_AGENT;

#[derive(Serialize)]
struct DecisionRequest<'a> {
    fingerprint: &'a str,
    email: Option<&'a str>,
    request: &'a RequestSnapshot,
    chain: &'static str,
    rules: &'static [Rule],
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    conclusion: String,
    #[serde(default)]
    reason: Option<DecisionReason>,
}

#[derive(Debug, Deserialize)]
struct DecisionReason {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    email_types: Vec<String>,
}

#[derive(Debug)]
pub struct HttpEvaluator {
    client: Client,
    url: Url,
    key: SecretString,
}

impl HttpEvaluator {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, key: SecretString, timeout: Duration) -> Result<Self, EvaluatorError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url, key })
    }

    #[instrument(skip(self, request), fields(chain = chain.name))]
    async fn decide(
        &self,
        request: &EvaluationRequest,
        chain: &'static RuleChain,
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        let payload = DecisionRequest {
            fingerprint: request.fingerprint.as_str(),
            email: request.email.as_deref(),
            request: &request.request,
            chain: chain.name,
            rules: chain.rules,
        };

        let response = self
            .client
            .post(self.url.clone())
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.key.expose_secret()),
            )
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Evaluator returned {status}");
            return Err(EvaluatorError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let decision: DecisionResponse =
            serde_json::from_slice(&body).map_err(|e| EvaluatorError::Decode(e.to_string()))?;

        debug!(conclusion = %decision.conclusion, "evaluator decision");

        into_outcome(decision)
    }
}

impl ProtectionEvaluator for HttpEvaluator {
    fn evaluate<'a>(
        &'a self,
        request: &'a EvaluationRequest,
        chain: &'static RuleChain,
    ) -> EvaluationFuture<'a> {
        Box::pin(self.decide(request, chain))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

fn into_outcome(decision: DecisionResponse) -> Result<EvaluationOutcome, EvaluatorError> {
    match decision.conclusion.trim().to_ascii_uppercase().as_str() {
        "ALLOW" => Ok(EvaluationOutcome::allow()),
        "DENY" => Ok(EvaluationOutcome::deny(
            decision.reason.map_or(Reason::None, into_reason),
        )),
        other => Err(EvaluatorError::Decode(format!(
            "unknown conclusion '{other}'"
        ))),
    }
}

fn into_reason(reason: DecisionReason) -> Reason {
    match reason.kind.trim().to_ascii_uppercase().as_str() {
        "RATE_LIMIT" => Reason::RateLimit,
        "BOT" => Reason::Bot,
        "SHIELD" => Reason::Shield,
        "EMAIL" => {
            let types: BTreeSet<EmailType> = reason
                .email_types
                .iter()
                .filter_map(|value| EmailType::from_wire(value))
                .collect();
            Reason::Email(types)
        }
        _ => Reason::None,
    }
}
