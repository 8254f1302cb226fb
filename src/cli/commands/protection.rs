use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::protection::MalformedBodyPolicy;

pub const ARG_EVALUATOR_URL: &str = "evaluator-url";
pub const ARG_EVALUATOR_KEY: &str = "evaluator-key";
pub const ARG_EVALUATOR_TIMEOUT_MS: &str = "evaluator-timeout-ms";
pub const ARG_MAX_BODY_BYTES: &str = "max-body-bytes";
pub const ARG_MALFORMED_BODY: &str = "malformed-body";

#[derive(Debug, Clone)]
pub struct RemoteEvaluator {
    pub url: Url,
    pub key: SecretString,
}

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` selects the in-process evaluator.
    pub remote: Option<RemoteEvaluator>,
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub malformed_body: MalformedBodyPolicy,
}

impl Options {
    /// Parse protection arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the evaluator URL is invalid or set without a key.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let remote = match get_non_empty(ARG_EVALUATOR_URL) {
            Some(url) => {
                let url = Url::parse(&url)
                    .with_context(|| format!("invalid --{ARG_EVALUATOR_URL}: {url}"))?;
                let key = get_non_empty(ARG_EVALUATOR_KEY).with_context(|| {
                    format!(
                        "missing required argument: --{ARG_EVALUATOR_KEY} (required with --{ARG_EVALUATOR_URL})"
                    )
                })?;
                Some(RemoteEvaluator {
                    url,
                    key: SecretString::from(key),
                })
            }
            None => None,
        };

        let timeout_ms = matches
            .get_one::<u64>(ARG_EVALUATOR_TIMEOUT_MS)
            .copied()
            .unwrap_or(2000);
        let max_body_bytes = matches
            .get_one::<usize>(ARG_MAX_BODY_BYTES)
            .copied()
            .unwrap_or(65536);
        let malformed_body = match matches.get_one::<String>(ARG_MALFORMED_BODY) {
            Some(value) => value
                .parse::<MalformedBodyPolicy>()
                .map_err(|e| anyhow::anyhow!(e))?,
            None => MalformedBodyPolicy::default(),
        };

        Ok(Self {
            remote,
            timeout: Duration::from_millis(timeout_ms),
            max_body_bytes,
            malformed_body,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EVALUATOR_URL)
                .long(ARG_EVALUATOR_URL)
                .help("Remote protection service decision endpoint")
                .long_help(
                    "Remote protection service decision endpoint.\n\nWhen unset, requests are evaluated in-process and rate limit counters are local to this instance.",
                )
                .env("AUTHGATE_EVALUATOR_URL"),
        )
        .arg(
            Arg::new(ARG_EVALUATOR_KEY)
                .long(ARG_EVALUATOR_KEY)
                .help("Bearer key for the remote protection service")
                .env("AUTHGATE_EVALUATOR_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EVALUATOR_TIMEOUT_MS)
                .long(ARG_EVALUATOR_TIMEOUT_MS)
                .help("Evaluator deadline in milliseconds, requests are denied when it passes")
                .default_value("2000")
                .env("AUTHGATE_EVALUATOR_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX_BODY_BYTES)
                .long(ARG_MAX_BODY_BYTES)
                .help("Largest sign-up or reset body buffered for inspection")
                .default_value("65536")
                .env("AUTHGATE_MAX_BODY_BYTES")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_MALFORMED_BODY)
                .long(ARG_MALFORMED_BODY)
                .help("Unparseable sign-up or reset body: fallback (bot + rate limit only) or reject (400)")
                .default_value(MalformedBodyPolicy::Fallback.as_str())
                .env("AUTHGATE_MALFORMED_BODY")
                .value_parser([
                    MalformedBodyPolicy::Fallback.as_str(),
                    MalformedBodyPolicy::Reject.as_str(),
                ]),
        )
}
