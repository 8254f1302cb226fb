//! In-process evaluator.
//!
//! Implements the evaluator contract without a remote service: sliding-window
//! counters per fingerprint, user-agent bot classification, email checks and a
//! small attack-pattern shield. Counters live in this process only, so each
//! replica enforces its own limits.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use super::{
    decision::{EvaluationOutcome, Reason},
    evaluator::{EvaluationFuture, EvaluationRequest, ProtectionEvaluator},
    rules::{BotPolicy, EmailPolicy, EmailType, RateLimitPolicy, Rule, RuleChain},
};

static EMAIL_SYNTAX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Lowercase user-agent fragments and the bot category they identify.
const BOT_SIGNATURES: [(&str, &str); 21] = [
    ("curl/", "CURL"),
    ("wget/", "WGET"),
    ("python-requests", "PYTHON"),
    ("python-urllib", "PYTHON"),
    ("aiohttp", "PYTHON"),
    ("httpx", "PYTHON"),
    ("go-http-client", "GO_HTTP"),
    ("okhttp", "JAVA_HTTP"),
    ("java/", "JAVA_HTTP"),
    ("apache-httpclient", "JAVA_HTTP"),
    ("libwww-perl", "PERL"),
    ("node-fetch", "NODE_HTTP"),
    ("undici", "NODE_HTTP"),
    ("axios/", "NODE_HTTP"),
    ("postmanruntime", "POSTMAN"),
    ("headlesschrome", "HEADLESS_BROWSER"),
    ("phantomjs", "HEADLESS_BROWSER"),
    ("playwright", "HEADLESS_BROWSER"),
    ("scrapy", "SCRAPER"),
    ("spider", "CRAWLER"),
    ("crawler", "CRAWLER"),
];

/// `bot` closing a product token (`Googlebot/2.1`, `Slackbot-LinkExpanding`,
/// `bingbot;`), never inside a device model such as `CUBOT_X30`.
static BOT_TOKEN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"bot(?:[/;)\-]|$)").ok());

const CRAWLER: &str = "CRAWLER";

/// Missing or blank user agents are treated as automated.
const UNIDENTIFIED_CLIENT: &str = "UNIDENTIFIED";

const DISPOSABLE_DOMAINS: [&str; 14] = [
    "10minutemail.com",
    "dispostable.com",
    "getnada.com",
    "guerrillamail.com",
    "maildrop.cc",
    "mailinator.com",
    "mintemail.com",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
    "fakeinbox.com",
];

/// Domains that can never receive mail (RFC 2606 / RFC 7505).
const NO_MX_SUFFIXES: [&str; 8] = [
    "invalid",
    "test",
    "localhost",
    "example",
    "local",
    "example.com",
    "example.net",
    "example.org",
];

const SHIELD_PATTERNS: [&str; 10] = [
    "../",
    "..%2f",
    "%2e%2e",
    "<script",
    "%3cscript",
    "javascript:",
    "' or '1'='1",
    "union select",
    "${jndi:",
    "/etc/passwd",
];

#[derive(Debug)]
struct Window {
    length: Duration,
    hits: VecDeque<Instant>,
}

#[derive(Debug, Default)]
pub struct LocalEvaluator {
    windows: Mutex<HashMap<(&'static str, String), Window>>,
}

impl LocalEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows whose hits have all expired.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| {
            window
                .hits
                .back()
                .is_some_and(|last| now.duration_since(*last) < window.length)
        });
        let purged = before - windows.len();
        if purged > 0 {
            debug!("purged {purged} expired rate limit windows");
        }
    }

    /// Purge expired windows every `every` until the evaluator is dropped.
    pub fn spawn_purge_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let evaluator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(evaluator) = evaluator.upgrade() else {
                    break;
                };
                evaluator.purge_expired().await;
            }
        })
    }

    async fn evaluate_chain(
        &self,
        request: &EvaluationRequest,
        chain: &'static RuleChain,
    ) -> EvaluationOutcome {
        for rule in chain.rules {
            let (violation, mode) = match rule {
                Rule::Shield(policy) => (shield_violation(request), policy.mode),
                Rule::Bot(policy) => (bot_violation(policy, request), policy.mode),
                Rule::Email(policy) => (email_violation(policy, request), policy.mode),
                Rule::RateLimit(policy) => (
                    self.rate_limit_violation(policy, request, policy.mode.is_enforcing())
                        .await,
                    policy.mode,
                ),
            };

            if let Some(reason) = violation {
                if mode.is_enforcing() {
                    return EvaluationOutcome::deny(reason);
                }
                info!(
                    chain = chain.name,
                    reason = reason.kind(),
                    "dry-run rule violated, request allowed"
                );
            }
        }

        EvaluationOutcome::allow()
    }

    async fn rate_limit_violation(
        &self,
        policy: &RateLimitPolicy,
        request: &EvaluationRequest,
        enforcing: bool,
    ) -> Option<Reason> {
        let now = Instant::now();
        let key = (policy.name, request.fingerprint.as_str().to_string());
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key).or_insert_with(|| Window {
            length: policy.window,
            hits: VecDeque::new(),
        });

        while window
            .hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= policy.window)
        {
            window.hits.pop_front();
        }

        let limit = usize::try_from(policy.max).unwrap_or(usize::MAX);
        if window.hits.len() >= limit {
            return Some(Reason::RateLimit);
        }

        // Dry-run checks observe the window without consuming it.
        if enforcing {
            window.hits.push_back(now);
        }
        None
    }
}

impl ProtectionEvaluator for LocalEvaluator {
    fn evaluate<'a>(
        &'a self,
        request: &'a EvaluationRequest,
        chain: &'static RuleChain,
    ) -> EvaluationFuture<'a> {
        Box::pin(async move { Ok(self.evaluate_chain(request, chain).await) })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn shield_violation(request: &EvaluationRequest) -> Option<Reason> {
    let snapshot = &request.request;
    let haystack = format!(
        "{}?{}",
        snapshot.path,
        snapshot.query.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    SHIELD_PATTERNS
        .iter()
        .any(|pattern| haystack.contains(pattern))
        .then_some(Reason::Shield)
}

fn bot_violation(policy: &BotPolicy, request: &EvaluationRequest) -> Option<Reason> {
    let category = classify_user_agent(request.request.user_agent.as_deref())?;
    if policy.allows(category) {
        debug!(category, "automated client allowed by policy");
        return None;
    }
    Some(Reason::Bot)
}

fn email_violation(policy: &EmailPolicy, request: &EvaluationRequest) -> Option<Reason> {
    let email = request.email.as_deref()?;
    let failures: BTreeSet<EmailType> = classify_email(email)
        .into_iter()
        .filter(|email_type| policy.denies(*email_type))
        .collect();
    if failures.is_empty() {
        None
    } else {
        Some(Reason::Email(failures))
    }
}

/// Bot category for a user agent, or `None` for a browser-like client.
#[must_use]
pub fn classify_user_agent(user_agent: Option<&str>) -> Option<&'static str> {
    let user_agent = user_agent.map(str::trim).unwrap_or_default();
    if user_agent.is_empty() {
        return Some(UNIDENTIFIED_CLIENT);
    }
    let lowered = user_agent.to_lowercase();
    BOT_SIGNATURES
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|&(_, category)| category)
        .or_else(|| {
            BOT_TOKEN
                .as_ref()
                .is_some_and(|regex| regex.is_match(&lowered))
                .then_some(CRAWLER)
        })
}

/// All failure types that apply to `email`.
#[must_use]
pub fn classify_email(email: &str) -> BTreeSet<EmailType> {
    let mut failures = BTreeSet::new();
    let normalized = email.trim().to_lowercase();

    let syntax_ok = EMAIL_SYNTAX
        .as_ref()
        .is_some_and(|regex| regex.is_match(&normalized));
    if !syntax_ok {
        failures.insert(EmailType::Invalid);
    }

    let Some((_, domain)) = normalized.rsplit_once('@') else {
        return failures;
    };
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() {
        return failures;
    }

    if DISPOSABLE_DOMAINS
        .iter()
        .any(|candidate| domain_matches(domain, candidate))
    {
        failures.insert(EmailType::Disposable);
    }
    if NO_MX_SUFFIXES
        .iter()
        .any(|candidate| domain_matches(domain, candidate))
    {
        failures.insert(EmailType::NoMxRecords);
    }

    failures
}

/// `domain` equals `candidate` or is a subdomain of it.
fn domain_matches(domain: &str, candidate: &str) -> bool {
    domain == candidate
        || domain
            .strip_suffix(candidate)
            .is_some_and(|rest| rest.ends_with('.'))
}
