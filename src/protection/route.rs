//! Route intent classification.

pub const DEFAULT_AUTH_PREFIX: &str = "/api/auth";

/// Sub-paths that trigger the sign-up protection bundle.
const SIGNUP_OR_RESET_PATHS: [&str; 2] = ["/sign-up", "/request-password-reset"];

/// Sub-paths that bypass protection (OAuth callback completion).
const DEFAULT_UNPROTECTED_PATHS: [&str; 1] = ["/callback"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteIntent {
    SignupOrReset,
    GenericAuth,
    Unprotected,
}

impl RouteIntent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignupOrReset => "signup_or_reset",
            Self::GenericAuth => "generic_auth",
            Self::Unprotected => "unprotected",
        }
    }
}

/// Maps request paths to a [`RouteIntent`]. Total and side-effect free.
#[derive(Clone, Debug)]
pub struct RouteClassifier {
    prefix: String,
    signup_or_reset: Vec<String>,
    unprotected: Vec<String>,
}

impl RouteClassifier {
    /// Build a classifier for the given namespace with the default bypass list.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let prefix = normalize_prefix(prefix);
        let signup_or_reset = SIGNUP_OR_RESET_PATHS
            .iter()
            .map(|path| format!("{prefix}{path}"))
            .collect();
        let unprotected = DEFAULT_UNPROTECTED_PATHS
            .iter()
            .map(|path| format!("{prefix}{path}"))
            .collect();
        Self {
            prefix,
            signup_or_reset,
            unprotected,
        }
    }

    /// Replace the bypass list. Entries are absolute path prefixes.
    #[must_use]
    pub fn with_unprotected_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unprotected = paths
            .into_iter()
            .map(|path| path.as_ref().trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn classify(&self, path: &str) -> RouteIntent {
        if !self.in_namespace(path) {
            return RouteIntent::Unprotected;
        }
        if self
            .signup_or_reset
            .iter()
            .any(|candidate| path.starts_with(candidate.as_str()))
        {
            return RouteIntent::SignupOrReset;
        }
        if self
            .unprotected
            .iter()
            .any(|candidate| path.starts_with(candidate.as_str()))
        {
            return RouteIntent::Unprotected;
        }
        RouteIntent::GenericAuth
    }

    fn in_namespace(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

impl Default for RouteClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_PREFIX)
    }
}

/// Leading slash, no trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
