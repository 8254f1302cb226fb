//! Protection evaluator contract.
//!
//! The evaluator receives the fingerprint, the optional email and a snapshot of
//! the request, runs the rule chain and reports the first violated rule. Rate
//! limit state belongs to the evaluator; the pipeline never counts requests.

use axum::http::{HeaderMap, Method};
use serde::Serialize;
use std::{collections::BTreeMap, future::Future, net::IpAddr, pin::Pin};

use super::{decision::EvaluationOutcome, identity::Fingerprint, rules::RuleChain};

/// Headers copied into the request snapshot for evaluator-side heuristics.
const SNAPSHOT_HEADERS: [&str; 6] = [
    "user-agent",
    "accept",
    "accept-language",
    "accept-encoding",
    "content-type",
    "origin",
];

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("evaluator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("evaluator returned status {0}")]
    Status(u16),
    #[error("evaluator response could not be decoded: {0}")]
    Decode(String),
    #[error("evaluator did not answer within {0} ms")]
    Timeout(u128),
}

/// The parts of an inbound request the evaluator may inspect.
#[derive(Clone, Debug, Serialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl RequestSnapshot {
    #[must_use]
    pub fn new(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        ip: Option<IpAddr>,
    ) -> Self {
        let snapshot: BTreeMap<String, String> = SNAPSHOT_HEADERS
            .iter()
            .filter_map(|name| {
                headers
                    .get(*name)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| ((*name).to_string(), value.to_string()))
            })
            .collect();
        Self {
            method: method.as_str().to_string(),
            path: path.to_string(),
            query: query.map(str::to_string),
            ip,
            user_agent: snapshot.get("user-agent").cloned(),
            headers: snapshot,
        }
    }
}

/// Everything one evaluation needs besides the rule chain.
#[derive(Clone, Debug)]
pub struct EvaluationRequest {
    pub fingerprint: Fingerprint,
    pub email: Option<String>,
    pub request: RequestSnapshot,
}

pub type EvaluationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EvaluationOutcome, EvaluatorError>> + Send + 'a>>;

pub trait ProtectionEvaluator: Send + Sync {
    /// Evaluate `chain` against `request` and report the first violated rule.
    fn evaluate<'a>(
        &'a self,
        request: &'a EvaluationRequest,
        chain: &'static RuleChain,
    ) -> EvaluationFuture<'a>;

    /// Short label for logs and `/health`.
    fn name(&self) -> &'static str;
}
