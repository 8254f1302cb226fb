pub mod logging;
pub mod protection;
pub mod upstream;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("authgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("AUTHGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = upstream::with_args(command);
    let command = protection::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protection::{ARG_EVALUATOR_TIMEOUT_MS, ARG_EVALUATOR_URL, ARG_MALFORMED_BODY};
    use upstream::{ARG_AUTH_PREFIX, ARG_UNPROTECTED_PATH, ARG_UPSTREAM_URL};

    const ENV_VARS: [&str; 10] = [
        "AUTHGATE_PORT",
        "AUTHGATE_UPSTREAM_URL",
        "AUTHGATE_AUTH_PREFIX",
        "AUTHGATE_UNPROTECTED_PATHS",
        "AUTHGATE_EVALUATOR_URL",
        "AUTHGATE_EVALUATOR_KEY",
        "AUTHGATE_EVALUATOR_TIMEOUT_MS",
        "AUTHGATE_MAX_BODY_BYTES",
        "AUTHGATE_MALFORMED_BODY",
        "AUTHGATE_LOG_LEVEL",
    ];

    fn with_clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(ENV_VARS.map(|name| (name, None::<&str>)), f);
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "authgate");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        with_clean_env(|| {
            let matches =
                new().get_matches_from(["authgate", "--upstream-url", "http://identity:3000"]);
            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
            assert_eq!(
                matches.get_one::<String>(ARG_AUTH_PREFIX).map(String::as_str),
                Some("/api/auth")
            );
            assert_eq!(
                matches.get_one::<u64>(ARG_EVALUATOR_TIMEOUT_MS).copied(),
                Some(2000)
            );
            assert_eq!(
                matches.get_one::<String>(ARG_MALFORMED_BODY).map(String::as_str),
                Some("fallback")
            );
            assert!(matches.get_one::<String>(ARG_EVALUATOR_URL).is_none());
            assert!(matches.get_many::<String>(ARG_UNPROTECTED_PATH).is_none());
        });
    }

    #[test]
    fn test_upstream_url_required() {
        with_clean_env(|| {
            let result = new().try_get_matches_from(["authgate"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("AUTHGATE_PORT", Some("443")),
                ("AUTHGATE_UPSTREAM_URL", Some("http://identity:3000")),
                (
                    "AUTHGATE_UNPROTECTED_PATHS",
                    Some("/api/auth/callback,/api/auth/get-session"),
                ),
                ("AUTHGATE_EVALUATOR_TIMEOUT_MS", Some("500")),
                ("AUTHGATE_MALFORMED_BODY", Some("reject")),
                ("AUTHGATE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(["authgate"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_UPSTREAM_URL).cloned(),
                    Some("http://identity:3000".to_string())
                );
                assert_eq!(
                    matches
                        .get_many::<String>(ARG_UNPROTECTED_PATH)
                        .map(|values| values.cloned().collect::<Vec<_>>()),
                    Some(vec![
                        "/api/auth/callback".to_string(),
                        "/api/auth/get-session".to_string()
                    ])
                );
                assert_eq!(
                    matches.get_one::<u64>(ARG_EVALUATOR_TIMEOUT_MS).copied(),
                    Some(500)
                );
                assert_eq!(
                    matches.get_one::<String>(ARG_MALFORMED_BODY).cloned(),
                    Some("reject".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            with_clean_env(|| {
                let mut args = vec![
                    "authgate".to_string(),
                    "--upstream-url".to_string(),
                    "http://identity:3000".to_string(),
                ];

                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    fn try_with(extra: [&str; 2]) -> Result<clap::ArgMatches, clap::error::ErrorKind> {
        let base = ["authgate", "--upstream-url", "http://identity:3000"];
        new()
            .try_get_matches_from(base.into_iter().chain(extra))
            .map_err(|e| e.kind())
    }

    #[test]
    fn test_invalid_values_fail() {
        with_clean_env(|| {
            assert_eq!(
                try_with(["--malformed-body", "ignore"]).err(),
                Some(clap::error::ErrorKind::InvalidValue)
            );
            assert!(try_with(["--evaluator-timeout-ms", "0"]).is_err());
            assert_eq!(
                try_with(["--port", "http"]).err(),
                Some(clap::error::ErrorKind::ValueValidation)
            );
        });
    }
}
