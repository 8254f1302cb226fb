//! Request body inspection for sign-up and reset requests.

use serde_json::Value;
use std::str::FromStr;

/// What the body tells us about the email rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BodyIntent {
    WithEmail(String),
    WithoutEmail,
}

#[derive(Debug, thiserror::Error)]
pub enum BodyParseError {
    #[error("request body is empty")]
    Empty,
    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do when a sign-up or reset body cannot be parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MalformedBodyPolicy {
    /// Evaluate bot and rate-limit rules only, as if no email was sent.
    #[default]
    Fallback,
    /// Deny with `400 Bad Request`.
    Reject,
}

impl MalformedBodyPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fallback => "fallback",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for MalformedBodyPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "fallback" => Ok(Self::Fallback),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "invalid malformed body policy '{other}', expected 'fallback' or 'reject'"
            )),
        }
    }
}

/// Inspect a buffered copy of the body. Only a JSON object whose `email`
/// member is a string yields [`BodyIntent::WithEmail`].
///
/// # Errors
/// Returns [`BodyParseError`] when the body is empty or not JSON.
pub fn extract_body_intent(body: &[u8]) -> Result<BodyIntent, BodyParseError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(BodyParseError::Empty);
    }

    let value: Value = serde_json::from_slice(body)?;
    let intent = match value.get("email") {
        Some(Value::String(email)) => BodyIntent::WithEmail(email.clone()),
        _ => BodyIntent::WithoutEmail,
    };

    Ok(intent)
}
