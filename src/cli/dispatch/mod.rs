//! Command-line argument dispatch.
//!
//! Turns validated CLI matches into an [`Action`] carrying the full server
//! configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{protection, upstream, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let upstream_opts = upstream::Options::parse(matches)?;
    let protection_opts = protection::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        upstream_url: upstream_opts.url,
        auth_prefix: upstream_opts.prefix,
        unprotected_paths: upstream_opts.unprotected_paths,
        evaluator: protection_opts.remote,
        evaluator_timeout: protection_opts.timeout,
        max_body_bytes: protection_opts.max_body_bytes,
        malformed_body: protection_opts.malformed_body,
    }))
}
