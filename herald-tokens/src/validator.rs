//! Push token format validation
//!
//! Tokens come from four provider families. The patterns below are matched in
//! priority order and must stay bit-exact, since tokens already issued by
//! devices in the field are checked against them:
//!
//! | format        | shape                                   |
//! |---------------|-----------------------------------------|
//! | `EXPO`        | `ExponentPushToken[<id>]` (legacy)      |
//! | `EXPO_MODERN` | `ExpoPushToken[<id>]`                   |
//! | `FCM`         | 100+ url-safe characters, opaque        |
//! | `APNS`        | 64 hexadecimal characters               |
//!
//! Anything else that is well formed is reported as `UNKNOWN`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Platform;

/// Shortest token any provider issues
pub const MIN_TOKEN_LENGTH: usize = 10;

/// Longest token accepted before it is considered garbage
pub const MAX_TOKEN_LENGTH: usize = 4096;

/// FCM tokens matching the opaque pattern must still be at least this long
pub const MIN_FCM_TOKEN_LENGTH: usize = 140;

/// FCM tokens at least this long were issued to Android devices, shorter ones to browsers
pub const FCM_ANDROID_MIN_LENGTH: usize = 163;

/// Inner value providers hand out for devices that never registered
pub const UNREGISTERED_SENTINEL: &str = "UNREGISTERED";

#[allow(clippy::unwrap_used, reason = "Patterns are static and covered by tests")]
static ALLOWED_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\[\]]+$").unwrap());

#[allow(clippy::unwrap_used, reason = "Patterns are static and covered by tests")]
static EXPO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ExponentPushToken\[([A-Za-z0-9_-]+)\]$").unwrap());

#[allow(clippy::unwrap_used, reason = "Patterns are static and covered by tests")]
static EXPO_MODERN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ExpoPushToken\[([A-Za-z0-9_-]+)\]$").unwrap());

#[allow(clippy::unwrap_used, reason = "Patterns are static and covered by tests")]
static FCM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{100,}$").unwrap());

#[allow(clippy::unwrap_used, reason = "Patterns are static and covered by tests")]
static APNS_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Fa-f0-9]{64}$").unwrap());

/// Provider format a token was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenFormat {
    /// Legacy bracketed form, `ExponentPushToken[...]`
    Expo,
    /// Modern bracketed form, `ExpoPushToken[...]`
    ExpoModern,
    /// Long opaque token from Firebase Cloud Messaging
    Fcm,
    /// 64 hex character Apple device token
    Apns,
    Unknown,
}

impl TokenFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expo => "EXPO",
            Self::ExpoModern => "EXPO_MODERN",
            Self::Fcm => "FCM",
            Self::Apns => "APNS",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether this is the current bracketed form
    #[must_use]
    pub const fn is_modern(self) -> bool {
        matches!(self, Self::ExpoModern)
    }

    /// Whether this is the legacy bracketed form
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Expo)
    }
}

impl std::fmt::Display for TokenFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the token gathered while validating it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Length in characters
    pub length: usize,
    /// Whether the token uses one of the bracketed forms
    pub bracketed: bool,
    /// Platform implied by the format, if the format implies one
    pub platform_hint: Option<Platform>,
}

/// Outcome of [`TokenValidator::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub format: TokenFormat,
    pub errors: Vec<String>,
    pub metadata: TokenMetadata,
}

impl ValidationResult {
    fn rejected(format: TokenFormat, error: String, metadata: TokenMetadata) -> Self {
        Self {
            is_valid: false,
            format,
            errors: vec![error],
            metadata,
        }
    }

    /// All errors joined into one line, for logs and deactivation reasons
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Classifies and validates raw token strings
///
/// Validation is a pure function of the input: the same string always yields
/// the same validity, format and errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenValidator;

impl TokenValidator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validate `token` against the known provider formats
    #[must_use]
    pub fn validate(&self, token: &str) -> ValidationResult {
        let length = token.chars().count();
        let mut metadata = TokenMetadata {
            length,
            bracketed: false,
            platform_hint: None,
        };

        if token.trim().is_empty() {
            return ValidationResult::rejected(
                TokenFormat::Unknown,
                "Token is empty or missing".to_string(),
                metadata,
            );
        }

        if length < MIN_TOKEN_LENGTH {
            return ValidationResult::rejected(
                TokenFormat::Unknown,
                format!(
                    "Token length {length} is below the minimum length of {MIN_TOKEN_LENGTH} characters"
                ),
                metadata,
            );
        }

        if length > MAX_TOKEN_LENGTH {
            return ValidationResult::rejected(
                TokenFormat::Unknown,
                format!(
                    "Token length {length} exceeds the maximum length of {MAX_TOKEN_LENGTH} characters"
                ),
                metadata,
            );
        }

        if !ALLOWED_CHARACTERS.is_match(token) {
            return ValidationResult::rejected(
                TokenFormat::Unknown,
                "Token contains invalid characters (allowed: A-Z, a-z, 0-9, '_', '-', '[', ']')"
                    .to_string(),
                metadata,
            );
        }

        let format = classify(token);
        metadata.bracketed = matches!(format, TokenFormat::Expo | TokenFormat::ExpoModern);
        metadata.platform_hint = match format {
            TokenFormat::Fcm if length >= FCM_ANDROID_MIN_LENGTH => Some(Platform::Android),
            TokenFormat::Fcm => Some(Platform::Web),
            TokenFormat::Apns => Some(Platform::Ios),
            TokenFormat::Expo | TokenFormat::ExpoModern | TokenFormat::Unknown => None,
        };

        let errors = secondary_checks(token, format, length);

        ValidationResult {
            is_valid: errors.is_empty(),
            format,
            errors,
            metadata,
        }
    }
}

/// Match `token` against the provider patterns in priority order
fn classify(token: &str) -> TokenFormat {
    if EXPO_PATTERN.is_match(token) {
        TokenFormat::Expo
    } else if EXPO_MODERN_PATTERN.is_match(token) {
        TokenFormat::ExpoModern
    } else if FCM_PATTERN.is_match(token) {
        TokenFormat::Fcm
    } else if APNS_PATTERN.is_match(token) {
        TokenFormat::Apns
    } else {
        TokenFormat::Unknown
    }
}

fn bracket_inner(token: &str, format: TokenFormat) -> Option<&str> {
    let pattern = match format {
        TokenFormat::Expo => &EXPO_PATTERN,
        TokenFormat::ExpoModern => &EXPO_MODERN_PATTERN,
        _ => return None,
    };

    pattern
        .captures(token)
        .and_then(|captures| captures.get(1))
        .map(|inner| inner.as_str())
}

/// Format-specific checks applied once a token has been classified
fn secondary_checks(token: &str, format: TokenFormat, length: usize) -> Vec<String> {
    let mut errors = Vec::new();

    match format {
        TokenFormat::Expo | TokenFormat::ExpoModern => {
            if bracket_inner(token, format)
                .is_some_and(|inner| inner.eq_ignore_ascii_case(UNREGISTERED_SENTINEL))
            {
                errors.push(format!(
                    "Token is the unregistered device placeholder for {format}"
                ));
            }
        }
        TokenFormat::Fcm => {
            if length < MIN_FCM_TOKEN_LENGTH {
                errors.push(format!(
                    "FCM token length {length} is below the minimum length of {MIN_FCM_TOKEN_LENGTH} characters"
                ));
            }
        }
        TokenFormat::Apns => {}
        TokenFormat::Unknown => {
            errors.push("Token format not recognized as EXPO, EXPO_MODERN, FCM or APNS".to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const DEFECT_KEYWORDS: [&str; 5] = ["empty", "length", "characters", "format", "unregistered"];

    fn validate(token: &str) -> ValidationResult {
        TokenValidator::new().validate(token)
    }

    #[test]
    fn test_legacy_expo_token() {
        let result = validate("ExponentPushToken[abc123]");
        assert!(result.is_valid);
        assert_eq!(result.format, TokenFormat::Expo);
        assert_eq!(result.format.as_str(), "EXPO");
        assert!(result.errors.is_empty());
        assert!(result.metadata.bracketed);
    }

    #[test]
    fn test_modern_expo_token() {
        let result = validate("ExpoPushToken[xyz-789_AB]");
        assert!(result.is_valid);
        assert_eq!(result.format, TokenFormat::ExpoModern);
        assert!(result.format.is_modern());
    }

    #[test]
    fn test_short_token_mentions_length() {
        let result = validate("short");
        assert!(!result.is_valid);
        assert_eq!(result.format, TokenFormat::Unknown);
        assert!(result.errors[0].contains("length"));
    }

    #[test]
    fn test_empty_token() {
        for input in ["", "   "] {
            let result = validate(input);
            assert!(!result.is_valid);
            assert_eq!(result.format, TokenFormat::Unknown);
            assert!(result.errors[0].contains("empty"));
        }
    }

    #[test]
    fn test_overlong_token() {
        let result = validate(&"a".repeat(MAX_TOKEN_LENGTH + 1));
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("exceeds"));
    }

    #[test]
    fn test_invalid_characters() {
        let result = validate("ExponentPushToken[abc 123]");
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("invalid characters"));

        let result = validate("fcm:token/with=padding");
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("characters"));
    }

    #[test]
    fn test_unregistered_sentinel_is_invalid() {
        for token in [
            "ExponentPushToken[UNREGISTERED]",
            "ExpoPushToken[unregistered]",
        ] {
            let result = validate(token);
            assert!(!result.is_valid, "{token} should be rejected");
            assert!(result.errors[0].contains("unregistered"));
        }
    }

    #[test]
    fn test_fcm_tiers() {
        let android = validate(&"A".repeat(FCM_ANDROID_MIN_LENGTH));
        assert!(android.is_valid);
        assert_eq!(android.format, TokenFormat::Fcm);
        assert_eq!(android.metadata.platform_hint, Some(Platform::Android));

        let web = validate(&"b".repeat(MIN_FCM_TOKEN_LENGTH));
        assert!(web.is_valid);
        assert_eq!(web.metadata.platform_hint, Some(Platform::Web));
    }

    #[test]
    fn test_fcm_minimum_length_after_pattern_match() {
        let result = validate(&"c".repeat(120));
        assert_eq!(result.format, TokenFormat::Fcm);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("FCM token length 120"));
    }

    #[test]
    fn test_apns_token() {
        let token = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
        let result = validate(token);
        assert!(result.is_valid);
        assert_eq!(result.format, TokenFormat::Apns);
        assert_eq!(result.metadata.platform_hint, Some(Platform::Ios));
    }

    #[test]
    fn test_unknown_format() {
        let result = validate("just-some-device-token");
        assert!(!result.is_valid);
        assert_eq!(result.format, TokenFormat::Unknown);
        assert!(result.errors[0].contains("format not recognized"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let inputs = [
            String::new(),
            "short".to_string(),
            "ExponentPushToken[abc123]".to_string(),
            "ExpoPushToken[UNREGISTERED]".to_string(),
            "x".repeat(120),
            "y".repeat(200),
            "f".repeat(64),
            "not a token!".to_string(),
            "[]".repeat(20),
        ];

        for input in &inputs {
            let first = validate(input);
            for _ in 0..5 {
                let again = validate(input);
                assert_eq!(again.is_valid, first.is_valid);
                assert_eq!(again.format, first.format);
                assert_eq!(again.errors.len(), first.errors.len());
            }
        }
    }

    #[test]
    fn test_rejections_are_descriptive() {
        let inputs = [
            String::new(),
            "tiny".to_string(),
            "z".repeat(MAX_TOKEN_LENGTH + 10),
            "has spaces in it".to_string(),
            "ExponentPushToken[UNREGISTERED]".to_string(),
            "q".repeat(110),
            "plain-device-token".to_string(),
            "[[[[[[[[[[]]]]]]]]]]".to_string(),
        ];

        for input in &inputs {
            let result = validate(input);
            assert!(!result.is_valid, "{input:?} should be invalid");
            assert!(!result.errors.is_empty());
            for error in &result.errors {
                assert!(error.len() >= 10, "error too terse: {error}");
                let lowered = error.to_lowercase();
                assert!(
                    DEFECT_KEYWORDS.iter().any(|k| lowered.contains(k)),
                    "error names no defect: {error}"
                );
            }
        }
    }
}
