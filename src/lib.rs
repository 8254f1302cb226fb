//! # Authgate (Auth Endpoint Protection Gateway)
//!
//! `authgate` sits in front of an identity service and owns its authentication
//! namespace (default `/api/auth`). Every `POST` under the namespace is
//! evaluated against a rule chain before it is forwarded; everything else is
//! passed through untouched.
//!
//! ## Rule Chains
//!
//! - **Sign-up / password reset** with an email in the body: shield, restrictive
//!   rate limit (5 per 10 minutes), bot detection and email validation.
//! - **Sign-up / password reset** without a usable email: shield, bot detection
//!   and the restrictive rate limit.
//! - **Any other auth POST**: shield, bot detection and a lax rate limit
//!   (60 per minute).
//!
//! OAuth callbacks (`{prefix}/callback`) are never evaluated.
//!
//! ## Fingerprints
//!
//! Rate limits are keyed by the session user id when the identity service
//! reports a session, otherwise by the client address taken from proxy
//! headers or the socket peer, and finally by a fixed sentinel address.
//!
//! ## Evaluators
//!
//! Decisions come from a remote protection service (`--evaluator-url`) or,
//! without one, from the in-process evaluator. An evaluator that fails or times
//! out denies the request with `403`.

pub mod api;
pub mod cli;
pub mod protection;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
