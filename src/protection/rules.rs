//! Rule presets and the named chains built from them.
//!
//! Everything here is `const` data: presets are fixed at compile time and there
//! is no runtime mutation path. Chains list rules in evaluation order; the
//! evaluator reports the first violated rule as the decision reason.

use serde::{Serialize, Serializer};
use std::time::Duration;

/// Whether a violated rule denies the request or is only logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Live,
    DryRun,
}

impl Mode {
    #[must_use]
    pub const fn is_enforcing(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Email classifications an evaluator may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailType {
    Invalid,
    Disposable,
    NoMxRecords,
}

impl EmailType {
    /// Parse the wire name used by remote evaluators.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INVALID" => Some(Self::Invalid),
            "DISPOSABLE" => Some(Self::Disposable),
            "NO_MX_RECORDS" => Some(Self::NoMxRecords),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ShieldPolicy {
    pub mode: Mode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EmailPolicy {
    pub mode: Mode,
    pub deny: &'static [EmailType],
}

impl EmailPolicy {
    #[must_use]
    pub fn denies(&self, email_type: EmailType) -> bool {
        self.deny.contains(&email_type)
    }
}

/// Bot detection; an empty allow-list blocks every detected automated client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BotPolicy {
    pub mode: Mode,
    pub allow: &'static [&'static str],
}

impl BotPolicy {
    #[must_use]
    pub fn allows(&self, category: &str) -> bool {
        self.allow
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(category))
    }
}

/// Sliding-window rate limit keyed by fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub mode: Mode,
    pub max: u32,
    #[serde(rename = "window_seconds", serialize_with = "serialize_seconds")]
    pub window: Duration,
}

fn serialize_seconds<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(window.as_secs())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    Shield(ShieldPolicy),
    Email(EmailPolicy),
    Bot(BotPolicy),
    RateLimit(RateLimitPolicy),
}

pub const SHIELD: ShieldPolicy = ShieldPolicy { mode: Mode::Live };

pub const EMAIL: EmailPolicy = EmailPolicy {
    mode: Mode::Live,
    deny: &[
        EmailType::Disposable,
        EmailType::Invalid,
        EmailType::NoMxRecords,
    ],
};

pub const BOTS: BotPolicy = BotPolicy {
    mode: Mode::Live,
    allow: &[],
};

/// 5 requests per 10 minutes.
pub const RESTRICTIVE_RATE_LIMIT: RateLimitPolicy = RateLimitPolicy {
    name: "restrictive",
    mode: Mode::Live,
    max: 5,
    window: Duration::from_secs(10 * 60),
};

/// 60 requests per minute.
pub const LAX_RATE_LIMIT: RateLimitPolicy = RateLimitPolicy {
    name: "lax",
    mode: Mode::Live,
    max: 60,
    window: Duration::from_secs(60),
};

/// An ordered, named list of rules sent to the evaluator in one call.
#[derive(Debug, PartialEq, Eq)]
pub struct RuleChain {
    pub name: &'static str,
    pub rules: &'static [Rule],
}

impl RuleChain {
    #[must_use]
    pub fn checks_email(&self) -> bool {
        self.rules.iter().any(|rule| matches!(rule, Rule::Email(_)))
    }

    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitPolicy> {
        self.rules.iter().find_map(|rule| match rule {
            Rule::RateLimit(policy) => Some(policy),
            _ => None,
        })
    }
}

/// Email + bot + restrictive rate limit, for sign-up and reset requests that
/// carry a candidate email.
pub static SIGNUP_PROTECTION: RuleChain = RuleChain {
    name: "signup-protection",
    rules: &[
        Rule::Shield(SHIELD),
        Rule::RateLimit(RESTRICTIVE_RATE_LIMIT),
        Rule::Bot(BOTS),
        Rule::Email(EMAIL),
    ],
};

/// Sign-up and reset requests whose body has no usable email.
pub static SIGNUP_FALLBACK: RuleChain = RuleChain {
    name: "signup-fallback",
    rules: &[
        Rule::Shield(SHIELD),
        Rule::Bot(BOTS),
        Rule::RateLimit(RESTRICTIVE_RATE_LIMIT),
    ],
};

pub static GENERIC_AUTH: RuleChain = RuleChain {
    name: "generic-auth",
    rules: &[
        Rule::Shield(SHIELD),
        Rule::Bot(BOTS),
        Rule::RateLimit(LAX_RATE_LIMIT),
    ],
};
