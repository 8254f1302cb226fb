use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use url::Url;

use crate::protection::route::DEFAULT_AUTH_PREFIX;

pub const ARG_UPSTREAM_URL: &str = "upstream-url";
pub const ARG_AUTH_PREFIX: &str = "auth-prefix";
pub const ARG_UNPROTECTED_PATH: &str = "unprotected-path";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Url,
    pub prefix: String,
    /// Empty when not configured; the classifier default then applies.
    pub unprotected_paths: Vec<String>,
}

impl Options {
    /// Parse upstream arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the upstream URL is missing or invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = match matches.get_one::<String>(ARG_UPSTREAM_URL) {
            Some(value) if !value.trim().is_empty() => value.trim(),
            _ => anyhow::bail!("missing required argument: --{ARG_UPSTREAM_URL}"),
        };
        let url = Url::parse(url).with_context(|| format!("invalid --{ARG_UPSTREAM_URL}: {url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--{ARG_UPSTREAM_URL} must be an http(s) URL, got {url}");
        }

        let prefix = matches
            .get_one::<String>(ARG_AUTH_PREFIX)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_PREFIX.to_string());

        let unprotected_paths = matches
            .get_many::<String>(ARG_UNPROTECTED_PATH)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            url,
            prefix,
            unprotected_paths,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_UPSTREAM_URL)
                .long(ARG_UPSTREAM_URL)
                .help("Base URL of the identity service, example: http://identity:3000")
                .env("AUTHGATE_UPSTREAM_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_AUTH_PREFIX)
                .long(ARG_AUTH_PREFIX)
                .help("Path prefix of the authentication namespace")
                .default_value(DEFAULT_AUTH_PREFIX)
                .env("AUTHGATE_AUTH_PREFIX"),
        )
        .arg(
            Arg::new(ARG_UNPROTECTED_PATH)
                .long(ARG_UNPROTECTED_PATH)
                .help("Path prefix forwarded without protection (repeatable, comma separated)")
                .long_help(
                    "Absolute path prefix under the auth namespace that is forwarded without evaluation.\n\nDefaults to `{auth-prefix}/callback` so OAuth callbacks are never blocked. Setting this replaces the default.",
                )
                .env("AUTHGATE_UNPROTECTED_PATHS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
}
