//! Rule composition: route intent plus body intent to one rule chain.

use tracing::debug;

use super::{
    body::BodyIntent,
    decision::EvaluationOutcome,
    evaluator::{EvaluationRequest, EvaluatorError, ProtectionEvaluator},
    route::RouteIntent,
    rules::{RuleChain, GENERIC_AUTH, SIGNUP_FALLBACK, SIGNUP_PROTECTION},
};

/// Pick the chain for a request. `None` means the request is not evaluated.
#[must_use]
pub fn select_chain(route: RouteIntent, body: &BodyIntent) -> Option<&'static RuleChain> {
    match (route, body) {
        (RouteIntent::Unprotected, _) => None,
        (RouteIntent::SignupOrReset, BodyIntent::WithEmail(_)) => Some(&SIGNUP_PROTECTION),
        (RouteIntent::SignupOrReset, BodyIntent::WithoutEmail) => Some(&SIGNUP_FALLBACK),
        (RouteIntent::GenericAuth, _) => Some(&GENERIC_AUTH),
    }
}

/// Run exactly one evaluator call for `chain`. The email is only sent along
/// with chains that check it.
///
/// # Errors
/// Propagates the evaluator failure; the caller decides how to fail.
pub async fn compose_and_evaluate(
    evaluator: &dyn ProtectionEvaluator,
    chain: &'static RuleChain,
    mut request: EvaluationRequest,
) -> Result<EvaluationOutcome, EvaluatorError> {
    if !chain.checks_email() {
        request.email = None;
    }

    debug!(
        chain = chain.name,
        evaluator = evaluator.name(),
        "evaluating request"
    );

    evaluator.evaluate(&request, chain).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::{
        decision::Reason, evaluator::EvaluationFuture, evaluator::RequestSnapshot,
        identity::Fingerprint, rules::Rule,
    };
    use anyhow::Result;
    use axum::http::{HeaderMap, Method};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, Option<String>)>>,
    }

    impl ProtectionEvaluator for Recorder {
        fn evaluate<'a>(
            &'a self,
            request: &'a EvaluationRequest,
            chain: &'static RuleChain,
        ) -> EvaluationFuture<'a> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((chain.name, request.email.clone()));
            }
            Box::pin(async { Ok(EvaluationOutcome::deny(Reason::Bot)) })
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn request(email: Option<&str>) -> EvaluationRequest {
        EvaluationRequest {
            fingerprint: Fingerprint::sentinel(),
            email: email.map(str::to_string),
            request: RequestSnapshot::new(
                &Method::POST,
                "/api/auth/sign-up/email",
                None,
                &HeaderMap::new(),
                None,
            ),
        }
    }

    #[test]
    fn signup_with_email_gets_full_bundle() {
        let chain = select_chain(
            RouteIntent::SignupOrReset,
            &BodyIntent::WithEmail("a@b.com".to_string()),
        );
        assert_eq!(chain.map(|c| c.name), Some("signup-protection"));
        assert!(chain.is_some_and(RuleChain::checks_email));
    }

    #[test]
    fn signup_without_email_falls_back() {
        let chain = select_chain(RouteIntent::SignupOrReset, &BodyIntent::WithoutEmail);
        assert_eq!(chain.map(|c| c.name), Some("signup-fallback"));
        assert!(chain.is_some_and(|c| !c.checks_email()));
        assert_eq!(
            chain.and_then(RuleChain::rate_limit).map(|p| p.name),
            Some("restrictive")
        );
    }

    #[test]
    fn generic_auth_ignores_body() {
        for body in [
            BodyIntent::WithoutEmail,
            BodyIntent::WithEmail("a@b.com".to_string()),
        ] {
            let chain = select_chain(RouteIntent::GenericAuth, &body);
            assert_eq!(chain.map(|c| c.name), Some("generic-auth"));
            assert_eq!(
                chain.and_then(RuleChain::rate_limit).map(|p| p.name),
                Some("lax")
            );
        }
    }

    #[test]
    fn unprotected_is_never_evaluated() {
        assert_eq!(
            select_chain(RouteIntent::Unprotected, &BodyIntent::WithoutEmail),
            None
        );
    }

    #[test]
    fn every_chain_starts_with_shield() {
        for chain in [&SIGNUP_PROTECTION, &SIGNUP_FALLBACK, &GENERIC_AUTH] {
            assert!(matches!(chain.rules.first(), Some(Rule::Shield(_))));
        }
    }

    #[tokio::test]
    async fn one_call_per_request_and_email_only_when_checked() -> Result<()> {
        let recorder = Recorder::default();

        let outcome =
            compose_and_evaluate(&recorder, &SIGNUP_PROTECTION, request(Some("a@b.com"))).await?;
        assert_eq!(outcome, EvaluationOutcome::deny(Reason::Bot));
        compose_and_evaluate(&recorder, &GENERIC_AUTH, request(Some("a@b.com"))).await?;

        let calls = recorder
            .calls
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .clone();
        assert_eq!(
            calls,
            vec![
                ("signup-protection", Some("a@b.com".to_string())),
                ("generic-auth", None),
            ]
        );
        Ok(())
    }
}
