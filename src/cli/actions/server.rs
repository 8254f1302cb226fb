use crate::{
    api::{self, handlers::proxy::Upstream},
    cli::{commands::protection::RemoteEvaluator, telemetry},
    protection::{
        HttpEvaluator, HttpSessionProvider, LocalEvaluator, MalformedBodyPolicy, ProtectionConfig,
        ProtectionEvaluator, ProtectionState, RouteClassifier,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

/// How often idle in-process rate limit windows are dropped.
const WINDOW_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub upstream_url: Url,
    pub auth_prefix: String,
    pub unprotected_paths: Vec<String>,
    pub evaluator: Option<RemoteEvaluator>,
    pub evaluator_timeout: Duration,
    pub max_body_bytes: usize,
    pub malformed_body: MalformedBodyPolicy,
}

impl Args {
    #[must_use]
    pub fn classifier(&self) -> RouteClassifier {
        let classifier = RouteClassifier::new(&self.auth_prefix);
        if self.unprotected_paths.is_empty() {
            classifier
        } else {
            classifier.with_unprotected_paths(&self.unprotected_paths)
        }
    }

    #[must_use]
    pub fn protection_config(&self) -> ProtectionConfig {
        ProtectionConfig::new()
            .with_evaluator_timeout(self.evaluator_timeout)
            .with_max_body_bytes(self.max_body_bytes)
            .with_malformed_body_policy(self.malformed_body)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if a client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let classifier = args.classifier();

    let sessions = HttpSessionProvider::new(
        &args.upstream_url,
        classifier.prefix(),
        args.evaluator_timeout,
    )
    .context("Failed to build session provider")?;

    let evaluator: Arc<dyn ProtectionEvaluator> = match &args.evaluator {
        Some(remote) => Arc::new(
            HttpEvaluator::new(remote.url.clone(), remote.key.clone(), args.evaluator_timeout)
                .context("Failed to build evaluator client")?,
        ),
        None => {
            let local = Arc::new(LocalEvaluator::new());
            local.spawn_purge_task(WINDOW_PURGE_INTERVAL);
            local
        }
    };

    let state = ProtectionState::new(classifier, Arc::new(sessions), evaluator)
        .with_config(args.protection_config());

    let upstream =
        Upstream::new(args.upstream_url.clone()).context("Failed to build upstream client")?;

    let result = api::new(args.port, Arc::new(state), Arc::new(upstream)).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let unprotected = if args.unprotected_paths.is_empty() {
        format!("{}/callback", args.auth_prefix.trim_end_matches('/'))
    } else {
        args.unprotected_paths.join(",")
    };
    let evaluator = args
        .evaluator
        .as_ref()
        .map_or_else(|| "local".to_string(), |remote| remote.url.to_string());
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("upstream_url", args.upstream_url.to_string()),
        ("auth_prefix", args.auth_prefix.clone()),
        ("unprotected_paths", unprotected),
        ("evaluator", evaluator),
        (
            "evaluator_timeout_ms",
            args.evaluator_timeout.as_millis().to_string(),
        ),
        ("max_body_bytes", args.max_body_bytes.to_string()),
        ("malformed_body", args.malformed_body.as_str().to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const BANNER: &str = r"
   _____
  |  _  |
  | |_| |
  |_____|  A U T H G A T E {VERSION}
   |   |
   |___|";
